use std::time::{Duration, Instant};

/// Limit for the CONNACK wait when keepalive is disabled
pub const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Send/receive activity tracking for PINGREQ scheduling and timeouts
#[derive(Debug, Clone)]
pub(crate) struct KeepAlive {
    interval: Option<Duration>,
    last_sent: Instant,
    last_received: Instant,
    ping_outstanding: bool,
}

impl KeepAlive {
    /// `keep_alive_secs == 0` disables pings and the silence timeout
    pub fn new(keep_alive_secs: u16, now: Instant) -> Self {
        let interval = (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs.into()));
        Self {
            interval,
            last_sent: now,
            last_received: now,
            ping_outstanding: false,
        }
    }

    pub fn on_send(&mut self, now: Instant) {
        self.last_sent = now;
    }

    pub fn on_receive(&mut self, now: Instant) {
        self.last_received = now;
    }

    pub fn on_pong(&mut self) {
        self.ping_outstanding = false;
    }

    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding
    }

    /// True when nothing has been sent, or nothing received, for a full
    /// interval and no ping is already waiting for its PINGRESP; marks the
    /// ping outstanding
    ///
    /// Receive silence alone also triggers a ping; its PINGRESP has to land
    /// before the 1.5 interval timeout even while the client keeps sending.
    pub fn should_ping(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };

        let send_idle = now.saturating_duration_since(self.last_sent) >= interval;
        let receive_idle = now.saturating_duration_since(self.last_received) >= interval;
        if self.ping_outstanding || !(send_idle || receive_idle) {
            return false;
        }

        self.ping_outstanding = true;
        true
    }

    /// Receive silence beyond 1.5 intervals, or beyond [`CONNACK_TIMEOUT`]
    /// while still waiting for CONNACK with keepalive disabled
    pub fn timed_out(&self, now: Instant, awaiting_connack: bool) -> bool {
        let limit = match self.interval {
            Some(interval) => interval + interval / 2,
            None if awaiting_connack => CONNACK_TIMEOUT,
            None => return false,
        };

        now.saturating_duration_since(self.last_received) >= limit
    }
}
