//! Error types for the MQTT client session
//!
//! Fatal conditions (`TransportFatal`, `ProtocolMalformed`) always move the
//! session to `Disconnected`; argument and state errors are rejected at the call
//! site with no side effect. Would-block and retry conditions never surface
//! here, `sync()` absorbs them.

use crate::protocol::{CodecError, ConnectReturnCode, TopicError};
use crate::session::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport failure: {0}")]
    TransportFatal(#[from] TransportError),

    #[error("Malformed packet from broker: {0}")]
    ProtocolMalformed(#[from] CodecError),

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Connection rejected by broker: code {code} ({})", rejection_reason(.code))]
    ConnectionRejected { code: u8 },

    /// Error form of `SessionEvent::DeliveryFailed`, see `SessionEvent::as_error`
    #[error("Delivery failed for packet {packet_id}: no acknowledgement after retries")]
    DeliveryFailed { packet_id: u16 },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Operation not valid in state {state:?}")]
    InvalidState { state: ConnectionState },

    #[error("Send buffer full: {queued} bytes queued, limit {limit}")]
    SendBufferFull { queued: usize, limit: usize },

    #[error("No packet identifier available: {in_flight} exchanges in flight")]
    PacketIdsExhausted { in_flight: usize },

    #[error("Session lock poisoned")]
    LockPoisoned,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Background pump failed: {0}")]
    PumpFailed(#[from] tokio::task::JoinError),
}

impl ClientError {
    /// Create invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create protocol violation error
    pub fn protocol_violation<S: Into<String>>(message: S) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Whether this error ends the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::TransportFatal(_)
                | ClientError::ProtocolMalformed(_)
                | ClientError::ProtocolViolation { .. }
                | ClientError::ConnectionRejected { .. }
        )
    }
}

impl From<TopicError> for ClientError {
    fn from(error: TopicError) -> Self {
        ClientError::invalid_argument(error.to_string())
    }
}

fn rejection_reason(code: &u8) -> &'static str {
    ConnectReturnCode::describe(*code)
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_constructor() {
        let error = ClientError::invalid_argument("empty topic filter");
        assert!(matches!(error, ClientError::InvalidArgument { .. }));
        assert_eq!(error.to_string(), "Invalid argument: empty topic filter");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_connection_rejected_describes_code() {
        let error = ClientError::ConnectionRejected { code: 4 };
        assert_eq!(
            error.to_string(),
            "Connection rejected by broker: code 4 (bad username or password)"
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn test_topic_error_maps_to_invalid_argument() {
        let error: ClientError = TopicError::Empty.into();
        assert!(matches!(error, ClientError::InvalidArgument { .. }));
    }

    #[test]
    fn test_codec_error_is_fatal() {
        let error: ClientError = CodecError::RemainingLengthOverflow.into();
        assert!(matches!(error, ClientError::ProtocolMalformed(_)));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_transport_error_is_fatal() {
        let error: ClientError = TransportError::Closed.into();
        assert!(error.is_fatal());
        assert!(!ClientError::DeliveryFailed { packet_id: 1 }.is_fatal());
    }

    #[test]
    fn test_all_variants_display() {
        let errors = vec![
            ClientError::protocol_violation("CONNACK while connected"),
            ClientError::DeliveryFailed { packet_id: 3 },
            ClientError::NotConnected {
                state: ConnectionState::Disconnected(None),
            },
            ClientError::InvalidState {
                state: ConnectionState::Connected,
            },
            ClientError::SendBufferFull {
                queued: 1024,
                limit: 1024,
            },
            ClientError::PacketIdsExhausted { in_flight: 65_535 },
            ClientError::LockPoisoned,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
