//! MQTT 3.1.1 protocol layer
//!
//! Packet types, the wire codec and topic rules. Nothing in this module does
//! I/O.

pub mod codec;
pub mod packet;
pub mod topics;

pub use codec::{decode, decode_with_limit, encode, encode_into, CodecError, Decoded};
pub use packet::{
    ConnAck, Connect, ConnectReturnCode, LastWill, Packet, PacketType, Publish, QoS, SubAck,
    Subscribe, SubscribeFilter, SubscribeReturnCode, Unsubscribe,
};
pub use topics::{topic_matches, validate_topic_filter, validate_topic_name, TopicError};
