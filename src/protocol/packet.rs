//! MQTT 3.1.1 control packet types
//!
//! Plain data types for every packet the client sends or receives. Encoding and
//! decoding live in [`super::codec`]; nothing here performs I/O.

use super::codec::CodecError;
use bytes::Bytes;

/// Protocol name carried in every CONNECT
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;
/// Largest value the remaining-length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Control packet type, the high nibble of the first fixed-header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Flags every non-PUBLISH packet must carry in the low nibble
    pub fn fixed_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::Subscribe | PacketType::Unsubscribe => Some(0b0010),
            _ => Some(0b0000),
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            // PUBREC/PUBREL/PUBCOMP belong to QoS 2, 0 and 15 are reserved
            other => Err(CodecError::UnsupportedPacketType(other)),
        }
    }
}

/// Quality of Service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(CodecError::InvalidQoS(other)),
        }
    }
}

/// CONNACK return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Human readable reason, used in logs and error messages
    pub fn describe(code: u8) -> &'static str {
        match Self::try_from(code) {
            Ok(ConnectReturnCode::Accepted) => "connection accepted",
            Ok(ConnectReturnCode::UnacceptableProtocolVersion) => "unacceptable protocol version",
            Ok(ConnectReturnCode::IdentifierRejected) => "client identifier rejected",
            Ok(ConnectReturnCode::ServerUnavailable) => "server unavailable",
            Ok(ConnectReturnCode::BadUsernamePassword) => "bad username or password",
            Ok(ConnectReturnCode::NotAuthorized) => "not authorized",
            Err(_) => "unknown return code",
        }
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUsernamePassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(CodecError::malformed(format!(
                "invalid CONNACK return code {other}"
            ))),
        }
    }
}

/// Last will registered with the broker on CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    /// Raw return code; see [`ConnectReturnCode`]
    pub code: u8,
}

/// PUBLISH packet
///
/// `topic` is kept as raw bytes: the codec never assumes it is valid UTF-8
/// or terminated. `packet_id` is present exactly when `qos > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: Bytes,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    /// Build an outgoing QoS 0 publish
    pub fn new(topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

/// Per-filter SUBACK result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    Granted(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub fn to_byte(self) -> u8 {
        match self {
            SubscribeReturnCode::Granted(qos) => qos as u8,
            SubscribeReturnCode::Failure => 0x80,
        }
    }
}

impl TryFrom<u8> for SubscribeReturnCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(SubscribeReturnCode::Failure),
            qos => QoS::try_from(qos)
                .map(SubscribeReturnCode::Granted)
                .map_err(|_| CodecError::malformed(format!("invalid SUBACK return code {value}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// Every control packet the codec understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_rejects_qos2_flow_and_reserved() {
        for value in [0u8, 5, 6, 7, 15] {
            assert!(matches!(
                PacketType::try_from(value),
                Err(CodecError::UnsupportedPacketType(v)) if v == value
            ));
        }
    }

    #[test]
    fn test_fixed_flags() {
        assert_eq!(PacketType::Subscribe.fixed_flags(), Some(0b0010));
        assert_eq!(PacketType::Unsubscribe.fixed_flags(), Some(0b0010));
        assert_eq!(PacketType::PingReq.fixed_flags(), Some(0));
        assert_eq!(PacketType::Publish.fixed_flags(), None);
    }

    #[test]
    fn test_suback_return_codes() {
        assert_eq!(
            SubscribeReturnCode::try_from(0x01).unwrap(),
            SubscribeReturnCode::Granted(QoS::AtLeastOnce)
        );
        assert_eq!(
            SubscribeReturnCode::try_from(0x80).unwrap(),
            SubscribeReturnCode::Failure
        );
        assert!(SubscribeReturnCode::try_from(0x03).is_err());
        assert_eq!(SubscribeReturnCode::Failure.to_byte(), 0x80);
    }

    #[test]
    fn test_connect_return_code_description() {
        assert_eq!(ConnectReturnCode::describe(0), "connection accepted");
        assert_eq!(ConnectReturnCode::describe(5), "not authorized");
        assert_eq!(ConnectReturnCode::describe(42), "unknown return code");
    }
}
