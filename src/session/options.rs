//! Per-connection options and session-wide limits

use crate::error::{ClientError, ClientResult};
use crate::protocol::{validate_topic_name, Connect, LastWill, QoS};
use bytes::Bytes;
use std::time::Duration;

/// Retry, buffering and size limits for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Wait for PUBACK before a QoS 1 publish is re-sent
    pub retry_timeout: Duration,
    /// Transmissions of a QoS 1 publish before it is reported as failed
    pub max_attempts: u32,
    /// Publishes, subscribes and unsubscribes awaiting acknowledgement
    pub max_inflight: usize,
    /// Bytes of application frames that may wait for the transport
    pub send_buffer_size: usize,
    /// Largest packet accepted from the broker or produced by `publish`
    pub max_packet_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::from_millis(5000),
            max_attempts: 3,
            max_inflight: 64,
            send_buffer_size: 64 * 1024,
            max_packet_size: 256 * 1024,
        }
    }
}

/// CONNECT parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    /// Seconds; 0 disables keepalive
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<LastWill>,
}

impl ConnectOptions {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive_secs: 60,
            clean_session: true,
            username: None,
            password: None,
            will: None,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive_secs: u16) -> Self {
        self.keep_alive_secs = keep_alive_secs;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_credentials<U, P>(mut self, username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<Bytes>,
    {
        self.username = Some(username.into());
        self.password = password.map(Into::into);
        self
    }

    pub fn with_will(mut self, will: LastWill) -> Self {
        self.will = Some(will);
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.client_id.len() > u16::MAX as usize {
            return Err(ClientError::invalid_argument("client identifier too long"));
        }
        if self.client_id.is_empty() && !self.clean_session {
            return Err(ClientError::invalid_argument(
                "an empty client identifier requires a clean session",
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ClientError::invalid_argument(
                "a password cannot be sent without a username",
            ));
        }
        if let Some(will) = &self.will {
            validate_topic_name(&will.topic)?;
            if will.qos == QoS::ExactlyOnce {
                return Err(ClientError::invalid_argument("QoS 2 wills are not supported"));
            }
        }
        Ok(())
    }

    pub(crate) fn to_packet(&self) -> Connect {
        Connect {
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive_secs,
            clean_session: self.clean_session,
            will: self.will.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.retry_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_attempts, 3);

        let options = ConnectOptions::new("sensor-1");
        assert_eq!(options.keep_alive_secs, 60);
        assert!(options.clean_session);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_client_id_needs_clean_session() {
        assert!(ConnectOptions::new("").validate().is_ok());
        assert!(ConnectOptions::new("")
            .with_clean_session(false)
            .validate()
            .is_err());
    }

    #[test]
    fn test_password_requires_username() {
        let mut options = ConnectOptions::new("c");
        options.password = Some(Bytes::from_static(b"secret"));
        assert!(options.validate().is_err());

        let options = ConnectOptions::new("c").with_credentials("user", Some("secret"));
        assert!(options.validate().is_ok());
        assert_eq!(options.to_packet().username.as_deref(), Some("user"));
    }

    #[test]
    fn test_will_topic_is_validated() {
        let will = LastWill {
            topic: "status/+".to_string(),
            payload: Bytes::from_static(b"offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        assert!(ConnectOptions::new("c").with_will(will).validate().is_err());
    }
}
