//! Mock implementations for testing
//!
//! [`MockTransport`] and [`MockBroker`] share one in-memory wire. Whatever the
//! client writes is decoded and logged on the broker side, and the broker
//! answers CONNECT, SUBSCRIBE, UNSUBSCRIBE and PINGREQ on its own (each reply
//! can be switched off). PUBACKs are only sent automatically when asked to,
//! so retry behavior can be observed. [`ManualClock`] lets tests move time
//! forward explicitly.

use crate::clock::Clock;
use crate::protocol::{
    decode, encode_into, ConnAck, Decoded, Packet, Publish, QoS, SubAck, SubscribeReturnCode,
};
use crate::transport::{Transport, TransportError};
use bytes::{Buf, BytesMut};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BrokerBehavior {
    connack_code: Option<u8>,
    session_present: bool,
    puback: bool,
    suback: bool,
    unsuback: bool,
    pingresp: bool,
}

impl Default for BrokerBehavior {
    fn default() -> Self {
        Self {
            connack_code: Some(0),
            session_present: false,
            puback: false,
            suback: true,
            unsuback: true,
            pingresp: true,
        }
    }
}

#[derive(Debug, Default)]
struct Wire {
    to_client: BytesMut,
    from_client: BytesMut,
    received: Vec<Packet>,
    behavior: BrokerBehavior,
    broker_closed: bool,
    client_closed: bool,
    write_limit: Option<usize>,
    write_blocked: bool,
    fail_next: Option<io::ErrorKind>,
    malformed_from_client: bool,
}

impl Wire {
    fn queue(&mut self, packet: &Packet) {
        if encode_into(packet, &mut self.to_client).is_err() {
            self.malformed_from_client = true;
        }
    }

    fn process_client_bytes(&mut self) {
        loop {
            match decode(&self.from_client) {
                Ok(Decoded::Complete { packet, consumed }) => {
                    self.from_client.advance(consumed);
                    self.respond(&packet);
                    self.received.push(packet);
                }
                Ok(Decoded::Incomplete) => break,
                Err(_) => {
                    self.malformed_from_client = true;
                    self.from_client.clear();
                    break;
                }
            }
        }
    }

    fn respond(&mut self, packet: &Packet) {
        match packet {
            Packet::Connect(_) => {
                if let Some(code) = self.behavior.connack_code {
                    let session_present = code == 0 && self.behavior.session_present;
                    self.queue(&Packet::ConnAck(ConnAck {
                        session_present,
                        code,
                    }));
                }
            }
            Packet::Publish(Publish {
                qos: QoS::AtLeastOnce,
                packet_id: Some(packet_id),
                ..
            }) if self.behavior.puback => self.queue(&Packet::PubAck(*packet_id)),
            Packet::Subscribe(subscribe) if self.behavior.suback => {
                let return_codes = subscribe
                    .filters
                    .iter()
                    .map(|f| SubscribeReturnCode::Granted(f.qos))
                    .collect();
                self.queue(&Packet::SubAck(SubAck {
                    packet_id: subscribe.packet_id,
                    return_codes,
                }));
            }
            Packet::Unsubscribe(unsubscribe) if self.behavior.unsuback => {
                self.queue(&Packet::UnsubAck(unsubscribe.packet_id))
            }
            Packet::PingReq if self.behavior.pingresp => self.queue(&Packet::PingResp),
            _ => {}
        }
    }
}

fn lock(wire: &Mutex<Wire>) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client side of the in-memory wire
#[derive(Debug, Clone)]
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    /// A transport and the broker listening on the other end
    pub fn pair() -> (MockTransport, MockBroker) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        (
            MockTransport {
                wire: Arc::clone(&wire),
            },
            MockBroker { wire },
        )
    }
}

impl Transport for MockTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut wire = lock(&self.wire);
        if let Some(kind) = wire.fail_next.take() {
            return Err(io::Error::from(kind).into());
        }
        if wire.broker_closed || wire.client_closed {
            return Err(TransportError::Closed);
        }
        if wire.write_blocked {
            return Err(TransportError::WouldBlock);
        }

        let n = wire.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        wire.from_client.extend_from_slice(&buf[..n]);
        wire.process_client_bytes();
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut wire = lock(&self.wire);
        if let Some(kind) = wire.fail_next.take() {
            return Err(io::Error::from(kind).into());
        }
        if wire.to_client.is_empty() {
            return if wire.broker_closed || wire.client_closed {
                Err(TransportError::Closed)
            } else {
                Err(TransportError::WouldBlock)
            };
        }

        let n = buf.len().min(wire.to_client.len());
        buf[..n].copy_from_slice(&wire.to_client[..n]);
        wire.to_client.advance(n);
        Ok(n)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        lock(&self.wire).client_closed = true;
        Ok(())
    }
}

/// Broker side of the in-memory wire
#[derive(Debug, Clone)]
pub struct MockBroker {
    wire: Arc<Mutex<Wire>>,
}

impl MockBroker {
    /// Queue a packet for the client to read
    pub fn send(&self, packet: &Packet) {
        lock(&self.wire).queue(packet);
    }

    /// Queue raw bytes for the client to read
    pub fn send_raw(&self, bytes: &[u8]) {
        lock(&self.wire).to_client.extend_from_slice(bytes);
    }

    /// Close from the broker side; buffered bytes stay readable
    pub fn close(&self) {
        lock(&self.wire).broker_closed = true;
    }

    /// Whether the client closed its transport
    pub fn is_closed(&self) -> bool {
        lock(&self.wire).client_closed
    }

    /// Whether the client ever wrote bytes that did not decode
    pub fn saw_malformed(&self) -> bool {
        lock(&self.wire).malformed_from_client
    }

    pub fn received(&self) -> Vec<Packet> {
        lock(&self.wire).received.clone()
    }

    /// Drain the log of packets received from the client
    pub fn take_received(&self) -> Vec<Packet> {
        std::mem::take(&mut lock(&self.wire).received)
    }

    /// PUBLISH packets received so far, oldest first
    pub fn published(&self) -> Vec<Publish> {
        lock(&self.wire)
            .received
            .iter()
            .filter_map(|packet| match packet {
                Packet::Publish(publish) => Some(publish.clone()),
                _ => None,
            })
            .collect()
    }

    /// CONNACK return code sent on CONNECT; `None` leaves CONNECT unanswered
    pub fn set_auto_connack(&self, code: Option<u8>) {
        lock(&self.wire).behavior.connack_code = code;
    }

    pub fn set_session_present(&self, session_present: bool) {
        lock(&self.wire).behavior.session_present = session_present;
    }

    pub fn set_auto_puback(&self, enabled: bool) {
        lock(&self.wire).behavior.puback = enabled;
    }

    pub fn set_auto_suback(&self, enabled: bool) {
        lock(&self.wire).behavior.suback = enabled;
    }

    pub fn set_auto_unsuback(&self, enabled: bool) {
        lock(&self.wire).behavior.unsuback = enabled;
    }

    pub fn set_auto_pingresp(&self, enabled: bool) {
        lock(&self.wire).behavior.pingresp = enabled;
    }

    /// Accept at most `limit` bytes per write call
    pub fn set_write_limit(&self, limit: Option<usize>) {
        lock(&self.wire).write_limit = limit;
    }

    /// Make every write report would-block
    pub fn set_write_blocked(&self, blocked: bool) {
        lock(&self.wire).write_blocked = blocked;
    }

    /// Fail the next read or write with an I/O error of this kind
    pub fn fail_next(&self, kind: io::ErrorKind) {
        lock(&self.wire).fail_next = Some(kind);
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, Connect};

    fn connect_frame() -> Vec<u8> {
        encode(&Packet::Connect(Connect {
            client_id: "mock".to_string(),
            keep_alive: 30,
            clean_session: true,
            will: None,
            username: None,
            password: None,
        }))
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_broker_answers_connect() {
        let (mut transport, broker) = MockTransport::pair();
        let frame = connect_frame();
        assert_eq!(transport.write(&frame).unwrap(), frame.len());

        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x20, 0x02, 0x00, 0x00]);
        assert!(matches!(broker.received().as_slice(), [Packet::Connect(_)]));
    }

    #[test]
    fn test_split_writes_are_reassembled() {
        let (mut transport, broker) = MockTransport::pair();
        broker.set_write_limit(Some(3));
        let frame = connect_frame();

        let mut offset = 0;
        while offset < frame.len() {
            offset += transport.write(&frame[offset..]).unwrap();
        }
        assert_eq!(broker.take_received().len(), 1);
        assert!(broker.received().is_empty());
    }

    #[test]
    fn test_close_and_faults() {
        let (mut transport, broker) = MockTransport::pair();
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.read(&mut buf),
            Err(TransportError::WouldBlock)
        ));

        broker.fail_next(io::ErrorKind::ConnectionReset);
        assert!(matches!(transport.write(b"x"), Err(TransportError::Io(_))));

        broker.send(&Packet::PingResp);
        broker.close();
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert!(matches!(transport.read(&mut buf), Err(TransportError::Closed)));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, Duration::from_secs(3));
    }
}
