//! Connection lifecycle, session events and delivered messages

use crate::error::ClientError;
use crate::protocol::{QoS, SubscribeReturnCode};
use bytes::Bytes;

/// Lifecycle state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; carries the reason the previous connection ended, if any
    Disconnected(Option<DisconnectReason>),
    /// CONNECT sent (or queued), waiting for CONNACK
    Connecting,
    /// CONNACK accepted; publishes and subscriptions flow
    Connected,
    /// DISCONNECT queued, draining the outgoing queue before closing
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }

    /// Whether `publish`/`subscribe` may enqueue packets in this state
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application asked for it
    Requested,
    /// CONNACK carried a non-zero return code
    Rejected { code: u8 },
    /// Nothing heard from the broker for 1.5 times the keepalive interval
    KeepAliveTimeout,
    /// Reset, broken pipe or peer close
    TransportFailure(String),
    /// Malformed or unexpected packet from the broker
    ProtocolError(String),
}

impl From<&ClientError> for DisconnectReason {
    fn from(error: &ClientError) -> Self {
        match error {
            ClientError::ConnectionRejected { code } => DisconnectReason::Rejected { code: *code },
            ClientError::TransportFatal(e) => DisconnectReason::TransportFailure(e.to_string()),
            ClientError::ProtocolMalformed(e) => DisconnectReason::ProtocolError(e.to_string()),
            ClientError::ProtocolViolation { message } => {
                DisconnectReason::ProtocolError(message.clone())
            }
            other => DisconnectReason::ProtocolError(other.to_string()),
        }
    }
}

/// Events raised by `sync()` for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        session_present: bool,
    },
    ConnectionRejected {
        code: u8,
    },
    /// PUBACK received for a QoS 1 publish
    Published {
        packet_id: u16,
    },
    Subscribed {
        packet_id: u16,
        return_codes: Vec<SubscribeReturnCode>,
    },
    Unsubscribed {
        packet_id: u16,
    },
    /// A QoS 1 publish ran out of attempts; the session stays up
    DeliveryFailed {
        packet_id: u16,
        topic: Bytes,
    },
    Disconnected {
        reason: DisconnectReason,
    },
}

impl SessionEvent {
    /// Error form of events that report a failure
    pub fn as_error(&self) -> Option<ClientError> {
        match self {
            SessionEvent::DeliveryFailed { packet_id, .. } => Some(ClientError::DeliveryFailed {
                packet_id: *packet_id,
            }),
            SessionEvent::ConnectionRejected { code } => {
                Some(ClientError::ConnectionRejected { code: *code })
            }
            _ => None,
        }
    }
}

/// An application message delivered by the broker
///
/// Only valid for the duration of the handler call in spirit: the handler
/// receives a reference and must clone whatever it wants to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Raw topic bytes, not assumed to be UTF-8 or terminated
    pub topic: Bytes,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl ReceivedMessage {
    /// Explicitly sized copy of the topic for display
    pub fn topic_lossy(&self) -> String {
        String::from_utf8_lossy(&self.topic).into_owned()
    }

    /// Explicitly sized copy of the payload for display
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
