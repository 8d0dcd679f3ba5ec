//! Pure MQTT 3.1.1 wire codec
//!
//! [`encode`] turns a [`Packet`] into a complete frame (fixed header,
//! variable header and payload). [`decode`] parses one frame from the front of
//! a byte buffer and reports how many bytes it used; when the buffer does not
//! yet hold the whole frame it returns [`Decoded::Incomplete`] and consumes
//! nothing, so callers can simply retry after more bytes arrive.

use super::packet::{
    ConnAck, Connect, LastWill, Packet, PacketType, Publish, QoS, SubAck, Subscribe,
    SubscribeFilter, SubscribeReturnCode, Unsubscribe, MAX_REMAINING_LENGTH, PROTOCOL_LEVEL,
    PROTOCOL_NAME,
};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest frame the codec can produce or accept: one header byte, four
/// length bytes and the maximum body
pub const MAX_FRAME_SIZE: usize = 1 + 4 + MAX_REMAINING_LENGTH;

/// Codec errors; every variant means the byte stream can no longer be trusted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("remaining length uses more than four bytes")]
    RemainingLengthOverflow,
    #[error("unsupported packet type {0}")]
    UnsupportedPacketType(u8),
    #[error("reserved flags {flags:#06b} set on {packet_type:?}")]
    ReservedFlags { packet_type: PacketType, flags: u8 },
    #[error("invalid QoS {0}")]
    InvalidQoS(u8),
    #[error("packet of {size} bytes exceeds the limit of {limit} bytes")]
    PacketTooLarge { size: usize, limit: usize },
    #[error("malformed packet: {0}")]
    Malformed(String),
}

impl CodecError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed(message.into())
    }
}

/// Outcome of a successful [`decode`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full frame was parsed from the first `consumed` bytes
    Complete { packet: Packet, consumed: usize },
    /// More bytes are required; nothing was consumed
    Incomplete,
}

/// Encode a packet into a freshly allocated frame
pub fn encode(packet: &Packet) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet, appending the frame to `buf`
///
/// On error `buf` is left untouched.
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), CodecError> {
    let mut body = BytesMut::new();

    let flags = match packet {
        Packet::Connect(connect) => {
            encode_connect(connect, &mut body)?;
            0
        }
        Packet::ConnAck(connack) => {
            body.put_u8(u8::from(connack.session_present));
            body.put_u8(connack.code);
            0
        }
        Packet::Publish(publish) => encode_publish(publish, &mut body)?,
        Packet::PubAck(packet_id) | Packet::UnsubAck(packet_id) => {
            put_packet_id(*packet_id, &mut body)?;
            0
        }
        Packet::Subscribe(subscribe) => {
            encode_subscribe(subscribe, &mut body)?;
            0b0010
        }
        Packet::SubAck(suback) => {
            put_packet_id(suback.packet_id, &mut body)?;
            if suback.return_codes.is_empty() {
                return Err(CodecError::malformed("SUBACK without return codes"));
            }
            for code in &suback.return_codes {
                body.put_u8(code.to_byte());
            }
            0
        }
        Packet::Unsubscribe(unsubscribe) => {
            put_packet_id(unsubscribe.packet_id, &mut body)?;
            if unsubscribe.filters.is_empty() {
                return Err(CodecError::malformed("UNSUBSCRIBE without topic filters"));
            }
            for filter in &unsubscribe.filters {
                put_binary(filter.as_bytes(), &mut body)?;
            }
            0b0010
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
    };

    let header = ((packet.packet_type() as u8) << 4) | (flags & 0x0F);
    buf.reserve(1 + 4 + body.len());
    let mut header_buf = BytesMut::with_capacity(5);
    header_buf.put_u8(header);
    encode_remaining_length(body.len(), &mut header_buf)?;

    buf.extend_from_slice(&header_buf);
    buf.extend_from_slice(&body);
    Ok(())
}

/// Decode one frame with no size limit beyond the protocol maximum
pub fn decode(buf: &[u8]) -> Result<Decoded, CodecError> {
    decode_with_limit(buf, MAX_FRAME_SIZE)
}

/// Decode one frame, rejecting frames larger than `max_packet_size` bytes
///
/// The limit is checked as soon as the fixed header is available, so an
/// oversized frame is reported before its body has been buffered.
pub fn decode_with_limit(buf: &[u8], max_packet_size: usize) -> Result<Decoded, CodecError> {
    let Some(&first) = buf.first() else {
        return Ok(Decoded::Incomplete);
    };

    let packet_type = PacketType::try_from(first >> 4)?;
    let flags = first & 0x0F;
    if let Some(expected) = packet_type.fixed_flags() {
        if flags != expected {
            return Err(CodecError::ReservedFlags { packet_type, flags });
        }
    }

    let Some((remaining_len, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(Decoded::Incomplete);
    };

    let frame_len = 1 + len_bytes + remaining_len;
    if frame_len > max_packet_size {
        return Err(CodecError::PacketTooLarge {
            size: frame_len,
            limit: max_packet_size,
        });
    }
    if buf.len() < frame_len {
        return Ok(Decoded::Incomplete);
    }

    let body = &buf[1 + len_bytes..frame_len];
    let packet = decode_body(packet_type, flags, body)?;

    Ok(Decoded::Complete {
        packet,
        consumed: frame_len,
    })
}

/// Parse the variable-length remaining-length field
///
/// Returns `Ok(None)` when the field continues past the end of `buf`,
/// otherwise the value and the number of bytes it occupied.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (index, byte) in buf.iter().enumerate() {
        if index >= 4 {
            return Err(CodecError::RemainingLengthOverflow);
        }

        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }

        multiplier *= 128;
    }

    if buf.len() >= 4 {
        return Err(CodecError::RemainingLengthOverflow);
    }

    Ok(None)
}

/// Append the base-128 encoding of `len` to `buf`
pub fn encode_remaining_length(len: usize, buf: &mut BytesMut) -> Result<(), CodecError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(CodecError::PacketTooLarge {
            size: len,
            limit: MAX_REMAINING_LENGTH,
        });
    }

    let mut rest = len;
    loop {
        let mut byte = (rest % 128) as u8;
        rest /= 128;
        if rest > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);

        if rest == 0 {
            return Ok(());
        }
    }
}

fn encode_connect(connect: &Connect, body: &mut BytesMut) -> Result<(), CodecError> {
    put_binary(PROTOCOL_NAME.as_bytes(), body)?;
    body.put_u8(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0b0000_0010;
    }
    if let Some(will) = &connect.will {
        flags |= 0b0000_0100;
        flags |= (will.qos as u8) << 3;
        if will.retain {
            flags |= 0b0010_0000;
        }
    }
    if connect.password.is_some() {
        flags |= 0b0100_0000;
    }
    if connect.username.is_some() {
        flags |= 0b1000_0000;
    }

    body.put_u8(flags);
    body.put_u16(connect.keep_alive);

    put_binary(connect.client_id.as_bytes(), body)?;
    if let Some(will) = &connect.will {
        put_binary(will.topic.as_bytes(), body)?;
        put_binary(&will.payload, body)?;
    }
    if let Some(username) = &connect.username {
        put_binary(username.as_bytes(), body)?;
    }
    if let Some(password) = &connect.password {
        put_binary(password, body)?;
    }

    Ok(())
}

fn encode_publish(publish: &Publish, body: &mut BytesMut) -> Result<u8, CodecError> {
    put_binary(&publish.topic, body)?;

    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, _) => {}
        (_, Some(packet_id)) => put_packet_id(packet_id, body)?,
        (_, None) => {
            return Err(CodecError::malformed(
                "PUBLISH with QoS > 0 requires a packet identifier",
            ))
        }
    }

    body.extend_from_slice(&publish.payload);

    let mut flags = (publish.qos as u8) << 1;
    if publish.dup {
        flags |= 0b1000;
    }
    if publish.retain {
        flags |= 0b0001;
    }
    Ok(flags)
}

fn encode_subscribe(subscribe: &Subscribe, body: &mut BytesMut) -> Result<(), CodecError> {
    put_packet_id(subscribe.packet_id, body)?;

    if subscribe.filters.is_empty() {
        return Err(CodecError::malformed("SUBSCRIBE without topic filters"));
    }

    for entry in &subscribe.filters {
        put_binary(entry.filter.as_bytes(), body)?;
        body.put_u8(entry.qos as u8);
    }

    Ok(())
}

fn put_packet_id(packet_id: u16, body: &mut BytesMut) -> Result<(), CodecError> {
    if packet_id == 0 {
        return Err(CodecError::malformed("packet identifier must be non-zero"));
    }
    body.put_u16(packet_id);
    Ok(())
}

fn put_binary(data: &[u8], body: &mut BytesMut) -> Result<(), CodecError> {
    let len = u16::try_from(data.len()).map_err(|_| {
        CodecError::malformed(format!(
            "field of {} bytes exceeds the 65535 byte limit",
            data.len()
        ))
    })?;
    body.put_u16(len);
    body.extend_from_slice(data);
    Ok(())
}

fn decode_body(packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = Reader::new(body);

    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(decode_connect(&mut reader)?),
        PacketType::ConnAck => {
            let ack_flags = reader.read_u8()?;
            if ack_flags & 0b1111_1110 != 0 {
                return Err(CodecError::malformed("reserved CONNACK flags set"));
            }
            let code = reader.read_u8()?;
            let session_present = ack_flags & 0b0000_0001 != 0;
            if code != 0 && session_present {
                return Err(CodecError::malformed(
                    "session present set on a refused connection",
                ));
            }
            Packet::ConnAck(ConnAck {
                session_present,
                code,
            })
        }
        PacketType::Publish => Packet::Publish(decode_publish(flags, &mut reader)?),
        PacketType::PubAck => Packet::PubAck(reader.read_packet_id()?),
        PacketType::Subscribe => {
            let packet_id = reader.read_packet_id()?;
            let mut filters = Vec::new();
            while reader.remaining() > 0 {
                let filter = reader.read_string()?;
                let options = reader.read_u8()?;
                if options & 0b1111_1100 != 0 {
                    return Err(CodecError::malformed("reserved subscription option bits set"));
                }
                filters.push(SubscribeFilter {
                    filter,
                    qos: QoS::try_from(options)?,
                });
            }
            if filters.is_empty() {
                return Err(CodecError::malformed("SUBSCRIBE without topic filters"));
            }
            Packet::Subscribe(Subscribe { packet_id, filters })
        }
        PacketType::SubAck => {
            let packet_id = reader.read_packet_id()?;
            let return_codes = reader
                .take_rest()
                .iter()
                .map(|code| SubscribeReturnCode::try_from(*code))
                .collect::<Result<Vec<_>, _>>()?;
            if return_codes.is_empty() {
                return Err(CodecError::malformed("SUBACK without return codes"));
            }
            Packet::SubAck(SubAck {
                packet_id,
                return_codes,
            })
        }
        PacketType::Unsubscribe => {
            let packet_id = reader.read_packet_id()?;
            let mut filters = Vec::new();
            while reader.remaining() > 0 {
                filters.push(reader.read_string()?);
            }
            if filters.is_empty() {
                return Err(CodecError::malformed("UNSUBSCRIBE without topic filters"));
            }
            Packet::Unsubscribe(Unsubscribe { packet_id, filters })
        }
        PacketType::UnsubAck => Packet::UnsubAck(reader.read_packet_id()?),
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => Packet::Disconnect,
    };

    reader.expect_empty()?;
    Ok(packet)
}

fn decode_connect(reader: &mut Reader<'_>) -> Result<Connect, CodecError> {
    let protocol_name = reader.read_binary()?;
    if protocol_name != PROTOCOL_NAME.as_bytes() {
        return Err(CodecError::malformed("unexpected protocol name"));
    }

    let level = reader.read_u8()?;
    if level != PROTOCOL_LEVEL {
        return Err(CodecError::malformed(format!(
            "unsupported protocol level {level}"
        )));
    }

    let flags = reader.read_u8()?;
    if flags & 0b0000_0001 != 0 {
        return Err(CodecError::malformed("reserved CONNECT flag set"));
    }

    let clean_session = flags & 0b0000_0010 != 0;
    let will_flag = flags & 0b0000_0100 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0b11)?;
    let will_retain = flags & 0b0010_0000 != 0;
    let password_flag = flags & 0b0100_0000 != 0;
    let username_flag = flags & 0b1000_0000 != 0;

    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(CodecError::malformed("will QoS or retain set without a will"));
    }

    let keep_alive = reader.read_u16()?;
    let client_id = reader.read_string()?;

    let will = if will_flag {
        let topic = reader.read_string()?;
        let payload = Bytes::copy_from_slice(reader.read_binary()?);
        Some(LastWill {
            topic,
            payload,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(reader.read_string()?)
    } else {
        None
    };
    let password = if password_flag {
        Some(Bytes::copy_from_slice(reader.read_binary()?))
    } else {
        None
    };

    Ok(Connect {
        client_id,
        keep_alive,
        clean_session,
        will,
        username,
        password,
    })
}

fn decode_publish(flags: u8, reader: &mut Reader<'_>) -> Result<Publish, CodecError> {
    let qos = QoS::try_from((flags >> 1) & 0b11)?;
    let dup = flags & 0b1000 != 0;
    let retain = flags & 0b0001 != 0;

    if qos == QoS::AtMostOnce && dup {
        return Err(CodecError::malformed("DUP flag set on a QoS 0 PUBLISH"));
    }

    let topic = Bytes::copy_from_slice(reader.read_binary()?);
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(reader.read_packet_id()?),
    };
    let payload = Bytes::copy_from_slice(reader.take_rest());

    Ok(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload,
    })
}

/// Bounds-checked reader over one packet body
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_packet_id(&mut self) -> Result<u16, CodecError> {
        match self.read_u16()? {
            0 => Err(CodecError::malformed("packet identifier must be non-zero")),
            id => Ok(id),
        }
    }

    fn read_binary(&mut self) -> Result<&'a [u8], CodecError> {
        let len = usize::from(self.read_u16()?);
        self.take(len)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_binary()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::malformed("string field is not valid UTF-8"))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < len {
            return Err(CodecError::malformed(format!(
                "field of {len} bytes overruns the packet body"
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn take_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn expect_empty(&self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::malformed(format!(
                "{} trailing bytes after packet body",
                self.buf.len()
            )))
        }
    }
}
