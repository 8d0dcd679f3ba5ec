//! Background task that drives `Client::sync` on a fixed interval
//!
//! The pump owns a clone of the client and a `watch` channel for shutdown.
//! The session lock is only taken inside `sync`, never across an `.await`.

use crate::client::Client;
use crate::error::ClientError;
use crate::session::ConnectionState;
use crate::transport::Transport;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Ticks allowed for a graceful disconnect to drain before forcing a close
const GRACEFUL_DRAIN_TICKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpSignal {
    Run,
    Stop,
    Shutdown,
}

pub struct Pump;

impl Pump {
    /// Spawn the pump on the current tokio runtime
    pub fn spawn<T: Transport + 'static>(client: Client<T>, interval: Duration) -> PumpHandle {
        let (signal_tx, mut signal_rx) = watch::channel(PumpSignal::Run);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Starting background pump");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Check for shutdown signal first (higher priority)
                    biased;

                    changed = signal_rx.changed() => {
                        let signal = if changed.is_ok() {
                            *signal_rx.borrow()
                        } else {
                            PumpSignal::Stop
                        };
                        match signal {
                            PumpSignal::Run => continue,
                            PumpSignal::Stop => {
                                info!("Stop signal received, pump exiting");
                                break;
                            }
                            PumpSignal::Shutdown => {
                                info!("Shutdown signal received, disconnecting");
                                graceful_disconnect(&client, &mut ticker).await;
                                break;
                            }
                        }
                    }

                    _ = ticker.tick() => {
                        match client.sync() {
                            Ok(_) => {}
                            Err(ClientError::LockPoisoned) => {
                                error!("Session lock poisoned, pump exiting");
                                break;
                            }
                            Err(e) => warn!(error = %e, "Sync failed"),
                        }
                    }
                }
            }

            debug!("Background pump stopped");
        });

        PumpHandle { signal_tx, handle }
    }
}

async fn graceful_disconnect<T: Transport>(client: &Client<T>, ticker: &mut Interval) {
    match client.disconnect() {
        Ok(()) => {}
        Err(ClientError::NotConnected { .. }) => return,
        Err(e) => warn!(error = %e, "Disconnect failed"),
    }

    for _ in 0..GRACEFUL_DRAIN_TICKS {
        if matches!(client.state(), Ok(ConnectionState::Disconnected(_)) | Err(_)) {
            return;
        }
        ticker.tick().await;
        if let Err(e) = client.sync() {
            warn!(error = %e, "Sync failed while draining");
        }
    }

    warn!("DISCONNECT not flushed in time, closing transport");
    if let Err(e) = client.close() {
        warn!(error = %e, "Close failed");
    }
}

/// Handle to a running pump
pub struct PumpHandle {
    signal_tx: watch::Sender<PumpSignal>,
    handle: JoinHandle<()>,
}

impl PumpHandle {
    /// Stop ticking without touching the connection; observed within one tick
    pub async fn stop(self) -> Result<(), ClientError> {
        self.signal_tx.send_replace(PumpSignal::Stop);
        self.handle.await?;
        Ok(())
    }

    /// Send DISCONNECT, close the transport, then stop
    pub async fn shutdown(self) -> Result<(), ClientError> {
        self.signal_tx.send_replace(PumpSignal::Shutdown);
        self.handle.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
