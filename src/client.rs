//! Thread-safe client facade
//!
//! [`Client`] wraps one [`Session`] behind a `std::sync::Mutex` and is cheap
//! to clone, so application threads and the background pump can share it.
//! Every operation runs its whole state transition under the lock. Handlers
//! are cloned out under the lock and invoked after it is released.

use crate::clock::{Clock, SystemClock};
use crate::error::{ClientError, ClientResult};
use crate::observability::MetricsSnapshot;
use crate::protocol::QoS;
use crate::session::{
    ConnectOptions, ConnectionState, DisconnectReason, EventHandler, MessageHandler, Session,
    SessionEvent, SessionSettings, SyncReport,
};
use crate::transport::{TcpTransport, Transport};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, trace};

pub struct Client<T: Transport> {
    session: Arc<Mutex<Session<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Create an isolated client; nothing is shared with other instances
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: SessionSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new(settings))),
            clock,
        }
    }

    fn lock(&self) -> ClientResult<MutexGuard<'_, Session<T>>> {
        self.session.lock().map_err(|_| ClientError::LockPoisoned)
    }

    /// Start a connection over an already opened transport
    ///
    /// Returns once CONNECT is queued; use [`Client::wait_connected`] or
    /// watch the events to learn the broker's answer.
    pub fn connect(&self, transport: T, options: ConnectOptions) -> ClientResult<()> {
        let now = self.clock.now();
        self.lock()?.connect(transport, options, now)
    }

    /// Queue a non-retained publish; returns the packet identifier for QoS 1
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> ClientResult<Option<u16>> {
        self.publish_with_retain(topic, payload, qos, false)
    }

    pub fn publish_with_retain(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<Option<u16>> {
        let payload = payload.into();
        let now = self.clock.now();
        self.lock()?.publish(topic, payload, qos, retain, now)
    }

    pub fn subscribe(&self, filter: &str, qos: QoS) -> ClientResult<u16> {
        self.lock()?.subscribe(filter, qos)
    }

    pub fn unsubscribe(&self, filter: &str) -> ClientResult<u16> {
        self.lock()?.unsubscribe(filter)
    }

    pub fn set_message_handler<H>(&self, handler: H) -> ClientResult<()>
    where
        H: MessageHandler + 'static,
    {
        self.lock()?.set_message_handler(Arc::new(handler));
        Ok(())
    }

    pub fn set_event_handler<H>(&self, handler: H) -> ClientResult<()>
    where
        H: EventHandler + 'static,
    {
        self.lock()?.set_event_handler(Arc::new(handler));
        Ok(())
    }

    /// Run one session step and dispatch its results to the handlers
    ///
    /// Returns the events raised by this step.
    pub fn sync(&self) -> ClientResult<Vec<SessionEvent>> {
        let (report, message_handler, event_handler) = {
            let mut session = self.lock()?;
            let report = session.sync(self.clock.now());
            (report, session.message_handler(), session.event_handler())
        };
        Ok(Self::dispatch(report, message_handler, event_handler))
    }

    /// Graceful disconnect; DISCONNECT is flushed by this call or later syncs
    pub fn disconnect(&self) -> ClientResult<()> {
        let (report, message_handler, event_handler) = {
            let mut session = self.lock()?;
            let report = session.disconnect(self.clock.now())?;
            (report, session.message_handler(), session.event_handler())
        };
        Self::dispatch(report, message_handler, event_handler);
        Ok(())
    }

    /// Drop the transport immediately, without DISCONNECT
    pub fn close(&self) -> ClientResult<()> {
        let (report, message_handler, event_handler) = {
            let mut session = self.lock()?;
            let report = session.close();
            (report, session.message_handler(), session.event_handler())
        };
        Self::dispatch(report, message_handler, event_handler);
        Ok(())
    }

    pub fn state(&self) -> ClientResult<ConnectionState> {
        Ok(self.lock()?.state().clone())
    }

    pub fn state_receiver(&self) -> ClientResult<watch::Receiver<ConnectionState>> {
        Ok(self.lock()?.subscribe_state())
    }

    /// Wait until CONNACK accepted the connection
    ///
    /// Something must be driving `sync()` (normally the pump) for this to
    /// make progress. A rejection surfaces as `ConnectionRejected`.
    pub async fn wait_connected(&self) -> ClientResult<()> {
        let mut state_rx = self.state_receiver()?;
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {}
                ConnectionState::Disconnected(Some(DisconnectReason::Rejected { code })) => {
                    return Err(ClientError::ConnectionRejected { code })
                }
                other @ ConnectionState::Disconnected(_) => {
                    return Err(ClientError::NotConnected { state: other })
                }
                other @ ConnectionState::Disconnecting => {
                    return Err(ClientError::InvalidState { state: other })
                }
            }

            if state_rx.changed().await.is_err() {
                return Err(ClientError::NotConnected {
                    state: self.state()?,
                });
            }
        }
    }

    pub fn metrics(&self) -> ClientResult<MetricsSnapshot> {
        Ok(self.lock()?.metrics().snapshot())
    }

    /// Identifiers of QoS 1 publishes still waiting for PUBACK
    pub fn pending_publishes(&self) -> ClientResult<Vec<u16>> {
        Ok(self.lock()?.pending_publishes())
    }

    pub fn subscriptions(&self) -> ClientResult<Vec<(String, QoS)>> {
        Ok(self.lock()?.subscriptions())
    }

    fn dispatch(
        report: SyncReport,
        message_handler: Option<Arc<dyn MessageHandler>>,
        event_handler: Option<Arc<dyn EventHandler>>,
    ) -> Vec<SessionEvent> {
        match message_handler {
            Some(handler) => {
                for message in &report.messages {
                    handler.on_message(message);
                }
            }
            None if !report.messages.is_empty() => {
                debug!(count = report.messages.len(), "No message handler, dropping messages");
            }
            None => {}
        }

        if let Some(handler) = event_handler {
            for event in &report.events {
                trace!(?event, "Dispatching session event");
                handler.on_event(event);
            }
        }
        report.events
    }
}

impl Client<TcpTransport> {
    /// Open a TCP connection and start the MQTT handshake over it
    ///
    /// The TCP connect itself blocks until the socket is established.
    pub fn connect_tcp(&self, host: &str, port: u16, options: ConnectOptions) -> ClientResult<()> {
        let transport = TcpTransport::connect(host, port)
            .map_err(|e| ClientError::TransportFatal(e.into()))?;
        self.connect(transport, options)
    }
}
