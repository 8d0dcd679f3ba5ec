//! MQTT session state machine
//!
//! A [`Session`] owns one transport and everything needed to speak MQTT over
//! it: the outgoing frame queue, the table of packets awaiting
//! acknowledgement, the subscription table and keepalive tracking. It never
//! blocks and never reads the clock itself; every time-dependent operation
//! takes `now`, and [`Session::sync`] does all the I/O.
//!
//! Handlers are stored here but never invoked here. `sync` returns a
//! [`SyncReport`] and the caller dispatches it once the session lock is
//! released.

mod handler;
mod keepalive;
mod options;
mod outgoing;
mod pending;
mod state;
mod subscriptions;

pub use handler::{EventHandler, MessageHandler};
pub use keepalive::CONNACK_TIMEOUT;
pub use options::{ConnectOptions, SessionSettings};
pub use state::{ConnectionState, DisconnectReason, ReceivedMessage, SessionEvent};

use crate::error::{ClientError, ClientResult};
use crate::observability::SessionMetrics;
use crate::protocol::{
    decode_with_limit, encode, validate_topic_filter, validate_topic_name, ConnAck,
    ConnectReturnCode, Decoded, Packet, Publish, QoS, SubAck, Subscribe, SubscribeFilter,
    SubscribeReturnCode, Unsubscribe,
};
use crate::transport::{Transport, TransportError};
use bytes::{Buf, Bytes, BytesMut};
use keepalive::KeepAlive;
use outgoing::OutgoingQueue;
use pending::{PendingControl, PendingTable, RetryAction};
use std::sync::Arc;
use std::time::Instant;
use subscriptions::SubscriptionTable;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK: usize = 4096;
/// Upper bound on bytes pulled from the transport in one `sync`
const MAX_READ_PER_SYNC: usize = 64 * 1024;

/// Messages and events produced by one session step
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub messages: Vec<ReceivedMessage>,
    pub events: Vec<SessionEvent>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.events.is_empty()
    }
}

pub struct Session<T: Transport> {
    settings: SessionSettings,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    transport: Option<T>,
    keep_alive: KeepAlive,
    outgoing: OutgoingQueue,
    pending: PendingTable,
    subscriptions: SubscriptionTable,
    /// Filters from earlier connections, replayed if the broker lost them
    replay: Vec<SubscribeFilter>,
    inbound: BytesMut,
    message_handler: Option<Arc<dyn MessageHandler>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    metrics: Arc<SessionMetrics>,
}

impl<T: Transport> Session<T> {
    pub fn new(settings: SessionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected(None));
        Self {
            outgoing: OutgoingQueue::new(settings.send_buffer_size),
            pending: PendingTable::new(settings.max_inflight),
            settings,
            state: ConnectionState::Disconnected(None),
            state_tx,
            transport: None,
            keep_alive: KeepAlive::new(0, Instant::now()),
            subscriptions: SubscriptionTable::default(),
            replay: Vec::new(),
            inbound: BytesMut::new(),
            message_handler: None,
            event_handler: None,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Identifiers of QoS 1 publishes still waiting for PUBACK
    pub fn pending_publishes(&self) -> Vec<u16> {
        self.pending.publish_ids()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.entries()
    }

    pub fn set_message_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.message_handler = Some(handler);
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn message_handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.message_handler.clone()
    }

    pub fn event_handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.event_handler.clone()
    }

    /// Install a transport and queue CONNECT in the handshake slot
    ///
    /// Nothing is written until the next `sync`.
    pub fn connect(
        &mut self,
        transport: T,
        options: ConnectOptions,
        now: Instant,
    ) -> ClientResult<()> {
        if !self.state.is_disconnected() {
            return Err(ClientError::InvalidState {
                state: self.state.clone(),
            });
        }
        options.validate()?;

        let _span = crate::lifecycle_span!(
            event = "connect",
            client_id = %options.client_id,
            keep_alive = options.keep_alive_secs
        )
        .entered();

        let frame = encode_frame(&Packet::Connect(options.to_packet()))?;
        self.outgoing.clear();
        self.outgoing.set_handshake(frame);
        self.inbound.clear();
        self.keep_alive = KeepAlive::new(options.keep_alive_secs, now);
        self.replay = self.subscriptions.to_filters();
        self.transport = Some(transport);
        self.metrics.connection_attempt();

        info!(
            clean_session = options.clean_session,
            pending = self.pending.in_flight(),
            "Connecting to broker"
        );
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Queue a PUBLISH; returns the packet identifier for QoS 1
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> ClientResult<Option<u16>> {
        self.ensure_accepting()?;
        validate_topic_name(topic)?;

        let mut publish = Publish {
            dup: false,
            qos,
            retain,
            topic: Bytes::copy_from_slice(topic.as_bytes()),
            packet_id: None,
            payload,
        };

        match qos {
            QoS::AtMostOnce => {
                let frame = self.encode_outgoing(&Packet::Publish(publish))?;
                self.outgoing.push(frame)?;
                self.metrics.message_published();
                trace!(topic, "Queued QoS 0 publish");
                Ok(None)
            }
            QoS::AtLeastOnce => {
                let packet_id = self.pending.next_packet_id()?;
                publish.packet_id = Some(packet_id);
                let frame = self.encode_outgoing(&Packet::Publish(publish.clone()))?;
                self.outgoing.push(frame)?;
                self.pending
                    .insert_publish(publish, now, self.settings.retry_timeout);
                self.metrics.message_published();
                debug!(topic, packet_id, "Queued QoS 1 publish");
                Ok(Some(packet_id))
            }
            QoS::ExactlyOnce => Err(ClientError::invalid_argument(
                "QoS 2 publishing is not supported",
            )),
        }
    }

    /// Queue a SUBSCRIBE for one filter; the table is updated immediately
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> ClientResult<u16> {
        self.ensure_accepting()?;
        validate_topic_filter(filter)?;
        if qos == QoS::ExactlyOnce {
            return Err(ClientError::invalid_argument(
                "QoS 2 subscriptions are not supported",
            ));
        }

        let packet_id = self.pending.next_packet_id()?;
        let frame = self.encode_outgoing(&Packet::Subscribe(Subscribe {
            packet_id,
            filters: vec![SubscribeFilter {
                filter: filter.to_string(),
                qos,
            }],
        }))?;
        self.outgoing.push(frame)?;
        self.pending
            .insert_control(packet_id, PendingControl::Subscribe(vec![filter.to_string()]));
        self.subscriptions.insert(filter, qos);

        info!(filter, ?qos, packet_id, "Subscribing");
        Ok(packet_id)
    }

    /// Queue an UNSUBSCRIBE for one filter; the table is updated immediately
    pub fn unsubscribe(&mut self, filter: &str) -> ClientResult<u16> {
        self.ensure_accepting()?;
        validate_topic_filter(filter)?;

        let packet_id = self.pending.next_packet_id()?;
        let frame = self.encode_outgoing(&Packet::Unsubscribe(Unsubscribe {
            packet_id,
            filters: vec![filter.to_string()],
        }))?;
        self.outgoing.push(frame)?;
        self.pending.insert_control(
            packet_id,
            PendingControl::Unsubscribe(vec![filter.to_string()]),
        );
        self.subscriptions.remove(filter);

        info!(filter, packet_id, "Unsubscribing");
        Ok(packet_id)
    }

    /// Begin a graceful disconnect
    ///
    /// From `Connected` a DISCONNECT is queued behind any pending frames and
    /// the session drains in `Disconnecting` until the queue is empty. Before
    /// CONNACK there is nothing to say to the broker, so the transport is
    /// simply closed.
    pub fn disconnect(&mut self, now: Instant) -> ClientResult<SyncReport> {
        let mut report = SyncReport::default();
        let _span = crate::lifecycle_span!(event = "disconnect").entered();

        match self.state {
            ConnectionState::Connected => {
                self.outgoing.push_control(encode_frame(&Packet::Disconnect)?);
                self.set_state(ConnectionState::Disconnecting);
                info!(queued = self.outgoing.queued_bytes(), "Disconnecting from broker");
                if let Err(error) = self.drain(now, &mut report) {
                    self.fail(&error, &mut report);
                }
                Ok(report)
            }
            ConnectionState::Connecting => {
                self.teardown(DisconnectReason::Requested, &mut report);
                Ok(report)
            }
            ConnectionState::Disconnecting => Ok(report),
            ConnectionState::Disconnected(_) => Err(ClientError::NotConnected {
                state: self.state.clone(),
            }),
        }
    }

    /// Drop the connection immediately without a DISCONNECT
    pub fn close(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        if !self.state.is_disconnected() {
            self.teardown(DisconnectReason::Requested, &mut report);
        }
        report
    }

    /// Advance the session: flush, read, retry, keepalive, flush
    ///
    /// Fatal errors are not returned; they move the session to
    /// `Disconnected` and show up as a `Disconnected` event.
    pub fn sync(&mut self, now: Instant) -> SyncReport {
        let mut report = SyncReport::default();
        if self.state.is_disconnected() {
            return report;
        }

        if let Err(error) = self.step(now, &mut report) {
            self.fail(&error, &mut report);
        }
        report
    }

    fn step(&mut self, now: Instant, report: &mut SyncReport) -> ClientResult<()> {
        self.flush(now)?;

        if self.state != ConnectionState::Disconnecting {
            self.receive(now, report)?;
        }

        if self.state.is_connected() {
            self.retry_pending(now, report)?;
        }

        let awaiting_connack = self.state == ConnectionState::Connecting;
        if self.keep_alive.timed_out(now, awaiting_connack) {
            warn!(
                ping_outstanding = self.keep_alive.ping_outstanding(),
                "Keepalive timeout, broker went silent"
            );
            self.teardown(DisconnectReason::KeepAliveTimeout, report);
            return Ok(());
        }

        if self.state.is_connected() && self.keep_alive.should_ping(now) {
            self.outgoing.push_control(encode_frame(&Packet::PingReq)?);
            self.metrics.ping_sent();
            trace!("Queued PINGREQ");
        }

        self.drain(now, report)
    }

    /// Flush, then finish a pending disconnect once everything is written
    fn drain(&mut self, now: Instant, report: &mut SyncReport) -> ClientResult<()> {
        self.flush(now)?;
        if self.state == ConnectionState::Disconnecting && self.outgoing.is_empty() {
            self.teardown(DisconnectReason::Requested, report);
        }
        Ok(())
    }

    fn flush(&mut self, now: Instant) -> ClientResult<()> {
        let include_queue = self.state != ConnectionState::Connecting;
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };

        let flushed = self.outgoing.flush(transport, include_queue)?;
        if flushed.bytes > 0 {
            self.keep_alive.on_send(now);
            self.metrics.bytes_written(flushed.bytes);
            for _ in 0..flushed.frames {
                self.metrics.packet_sent();
            }
            trace!(bytes = flushed.bytes, frames = flushed.frames, "Flushed");
        }
        Ok(())
    }

    fn receive(&mut self, now: Instant, report: &mut SyncReport) -> ClientResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        let mut read_error = None;
        while total < MAX_READ_PER_SYNC {
            match transport.read(&mut chunk) {
                Ok(0) | Err(TransportError::WouldBlock) => break,
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        if total > 0 {
            self.keep_alive.on_receive(now);
            self.metrics.bytes_read(total);
        }

        // Frames that arrived before a close are still processed, so a
        // rejecting CONNACK followed by EOF reports the rejection.
        while !self.inbound.is_empty() {
            match decode_with_limit(&self.inbound, self.settings.max_packet_size)? {
                Decoded::Complete { packet, consumed } => {
                    self.inbound.advance(consumed);
                    self.metrics.packet_received();
                    self.handle_packet(packet, now, report)?;
                }
                Decoded::Incomplete => break,
            }
        }

        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn handle_packet(
        &mut self,
        packet: Packet,
        now: Instant,
        report: &mut SyncReport,
    ) -> ClientResult<()> {
        trace!(packet_type = ?packet.packet_type(), "Received packet");

        if self.state == ConnectionState::Connecting {
            return match packet {
                Packet::ConnAck(ack) => self.handle_connack(ack, now, report),
                other => Err(ClientError::protocol_violation(format!(
                    "{:?} received before CONNACK",
                    other.packet_type()
                ))),
            };
        }

        match packet {
            Packet::Publish(publish) => self.handle_publish(publish, report),
            Packet::PubAck(packet_id) => {
                self.handle_puback(packet_id, now, report);
                Ok(())
            }
            Packet::SubAck(ack) => self.handle_suback(ack, report),
            Packet::UnsubAck(packet_id) => self.handle_unsuback(packet_id, report),
            Packet::PingResp => {
                self.keep_alive.on_pong();
                self.metrics.pong_received();
                trace!("PINGRESP received");
                Ok(())
            }
            Packet::ConnAck(_) => Err(ClientError::protocol_violation(
                "CONNACK received on an established connection",
            )),
            other @ (Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq
            | Packet::Disconnect) => Err(ClientError::protocol_violation(format!(
                "{:?} is never sent by a broker",
                other.packet_type()
            ))),
        }
    }

    fn handle_connack(
        &mut self,
        ack: ConnAck,
        now: Instant,
        report: &mut SyncReport,
    ) -> ClientResult<()> {
        if ack.code != ConnectReturnCode::Accepted as u8 {
            return Err(ClientError::ConnectionRejected { code: ack.code });
        }

        self.set_state(ConnectionState::Connected);
        self.metrics.connection_established();
        info!(session_present = ack.session_present, "Connected to broker");
        report.events.push(SessionEvent::Connected {
            session_present: ack.session_present,
        });

        // Restored subscriptions and parked publishes go out ahead of
        // anything queued while the handshake was pending.
        let mut front = Vec::new();
        let replay = std::mem::take(&mut self.replay);
        if !ack.session_present {
            let filters: Vec<SubscribeFilter> = replay
                .into_iter()
                .filter(|f| self.subscriptions.contains(&f.filter))
                .collect();
            if !filters.is_empty() {
                front.extend(self.restore_subscriptions(filters)?);
            }
        }

        let resend = self.pending.resume(now, self.settings.retry_timeout);
        if !resend.is_empty() {
            info!(count = resend.len(), "Re-sending unacknowledged publishes");
        }
        for publish in resend {
            front.push(encode_frame(&Packet::Publish(publish))?);
            self.metrics.retransmission();
        }

        self.outgoing.push_control_front(front);
        Ok(())
    }

    fn restore_subscriptions(
        &mut self,
        filters: Vec<SubscribeFilter>,
    ) -> ClientResult<Option<Bytes>> {
        let packet_id = match self.pending.next_packet_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Cannot restore subscriptions");
                return Ok(None);
            }
        };

        let names = filters.iter().map(|f| f.filter.clone()).collect();
        info!(count = filters.len(), packet_id, "Restoring subscriptions");
        let frame = encode_frame(&Packet::Subscribe(Subscribe { packet_id, filters }))?;
        self.pending
            .insert_control(packet_id, PendingControl::Subscribe(names));
        Ok(Some(frame))
    }

    fn handle_publish(&mut self, publish: Publish, report: &mut SyncReport) -> ClientResult<()> {
        match (publish.qos, publish.packet_id) {
            (QoS::ExactlyOnce, _) => {
                return Err(ClientError::protocol_violation(
                    "QoS 2 PUBLISH received but never requested",
                ))
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.outgoing
                    .push_control(encode_frame(&Packet::PubAck(packet_id))?);
            }
            _ => {}
        }

        self.metrics.message_received();
        if !self.subscriptions.matches(&publish.topic) {
            debug!(
                topic = %String::from_utf8_lossy(&publish.topic),
                "Dropping message without a matching subscription"
            );
            return Ok(());
        }

        report.messages.push(ReceivedMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        });
        Ok(())
    }

    fn handle_puback(&mut self, packet_id: u16, now: Instant, report: &mut SyncReport) {
        match self.pending.acknowledge(packet_id) {
            Some(entry) => {
                self.metrics
                    .message_acknowledged(now.saturating_duration_since(entry.first_sent));
                debug!(packet_id, attempts = entry.attempts, "Publish acknowledged");
                report.events.push(SessionEvent::Published { packet_id });
            }
            None => warn!(packet_id, "Ignoring PUBACK for unknown packet identifier"),
        }
    }

    fn handle_suback(&mut self, ack: SubAck, report: &mut SyncReport) -> ClientResult<()> {
        match self.pending.release_control(ack.packet_id) {
            Some(PendingControl::Subscribe(filters)) => {
                if filters.len() != ack.return_codes.len() {
                    warn!(
                        packet_id = ack.packet_id,
                        expected = filters.len(),
                        received = ack.return_codes.len(),
                        "SUBACK return code count mismatch"
                    );
                }
                for (filter, code) in filters.iter().zip(&ack.return_codes) {
                    if *code == SubscribeReturnCode::Failure {
                        warn!(filter = %filter, "Broker refused subscription");
                        self.subscriptions.remove(filter);
                    }
                }
                report.events.push(SessionEvent::Subscribed {
                    packet_id: ack.packet_id,
                    return_codes: ack.return_codes,
                });
                Ok(())
            }
            Some(PendingControl::Unsubscribe(_)) => Err(ClientError::protocol_violation(format!(
                "SUBACK for UNSUBSCRIBE packet {}",
                ack.packet_id
            ))),
            None => {
                warn!(packet_id = ack.packet_id, "Ignoring SUBACK for unknown packet identifier");
                Ok(())
            }
        }
    }

    fn handle_unsuback(&mut self, packet_id: u16, report: &mut SyncReport) -> ClientResult<()> {
        match self.pending.release_control(packet_id) {
            Some(PendingControl::Unsubscribe(_)) => {
                debug!(packet_id, "Unsubscribe acknowledged");
                report.events.push(SessionEvent::Unsubscribed { packet_id });
                Ok(())
            }
            Some(PendingControl::Subscribe(_)) => Err(ClientError::protocol_violation(format!(
                "UNSUBACK for SUBSCRIBE packet {packet_id}"
            ))),
            None => {
                warn!(packet_id, "Ignoring UNSUBACK for unknown packet identifier");
                Ok(())
            }
        }
    }

    fn retry_pending(&mut self, now: Instant, report: &mut SyncReport) -> ClientResult<()> {
        let actions = self.pending.due(
            now,
            self.settings.retry_timeout,
            self.settings.max_attempts,
        );
        if actions.is_empty() {
            return Ok(());
        }

        let _span = crate::mqtt_span!(operation = "retry", due = actions.len()).entered();
        for action in actions {
            match action {
                RetryAction::Resend(publish) => {
                    warn!(packet_id = ?publish.packet_id, "Re-sending unacknowledged publish");
                    self.outgoing
                        .push_control(encode_frame(&Packet::Publish(publish))?);
                    self.metrics.retransmission();
                }
                RetryAction::GiveUp { packet_id, topic } => {
                    warn!(
                        packet_id,
                        topic = %String::from_utf8_lossy(&topic),
                        attempts = self.settings.max_attempts,
                        "Delivery failed, no PUBACK"
                    );
                    self.metrics.delivery_failed();
                    report
                        .events
                        .push(SessionEvent::DeliveryFailed { packet_id, topic });
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: &ClientError, report: &mut SyncReport) {
        let reason = DisconnectReason::from(error);
        match &reason {
            DisconnectReason::Rejected { code } => {
                warn!(
                    code,
                    reason = ConnectReturnCode::describe(*code),
                    "Broker rejected connection"
                );
                self.metrics.connection_rejected();
                report
                    .events
                    .push(SessionEvent::ConnectionRejected { code: *code });
            }
            _ => error!(error = %error, "Session failed"),
        }
        self.teardown(reason, report);
    }

    fn teardown(&mut self, reason: DisconnectReason, report: &mut SyncReport) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Error closing transport: {}", e);
            }
        }

        self.outgoing.clear();
        self.inbound.clear();
        for (packet_id, control) in self.pending.suspend() {
            debug!(packet_id, ?control, "Dropping unacknowledged request");
        }
        self.metrics.connection_lost();

        info!(reason = ?reason, "Disconnected");
        self.set_state(ConnectionState::Disconnected(Some(reason.clone())));
        report.events.push(SessionEvent::Disconnected { reason });
    }

    fn ensure_accepting(&self) -> ClientResult<()> {
        if self.state.accepts_requests() {
            Ok(())
        } else {
            Err(ClientError::NotConnected {
                state: self.state.clone(),
            })
        }
    }

    fn encode_outgoing(&self, packet: &Packet) -> ClientResult<Bytes> {
        let frame = encode_frame(packet)?;
        if frame.len() > self.settings.max_packet_size {
            return Err(ClientError::invalid_argument(format!(
                "packet of {} bytes exceeds the {} byte limit",
                frame.len(),
                self.settings.max_packet_size
            )));
        }
        Ok(frame)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Session state change");
        }
        self.state = state.clone();
        self.state_tx.send_replace(state);
    }
}

/// Encoding only fails on oversized fields, which are the caller's fault
fn encode_frame(packet: &Packet) -> ClientResult<Bytes> {
    encode(packet).map_err(|e| ClientError::invalid_argument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBroker, MockTransport};
    use std::time::Duration;

    fn connected_session(keep_alive: u16) -> (Session<MockTransport>, MockBroker, Instant) {
        let (transport, broker) = MockTransport::pair();
        let mut session = Session::new(SessionSettings::default());
        let now = Instant::now();
        session
            .connect(transport, ConnectOptions::new("test").with_keep_alive(keep_alive), now)
            .unwrap();
        let report = session.sync(now);
        assert_eq!(
            report.events,
            vec![SessionEvent::Connected {
                session_present: false
            }]
        );
        broker.take_received();
        (session, broker, now)
    }

    #[test]
    fn test_connect_only_from_disconnected() {
        let (mut session, _broker, now) = connected_session(60);
        let (transport, _) = MockTransport::pair();
        assert!(matches!(
            session.connect(transport, ConnectOptions::new("again"), now),
            Err(ClientError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_publish_requires_session() {
        let mut session: Session<MockTransport> = Session::new(SessionSettings::default());
        assert!(matches!(
            session.publish(
                "a/b",
                Bytes::from_static(b"x"),
                QoS::AtMostOnce,
                false,
                Instant::now()
            ),
            Err(ClientError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_queue_waits_for_connack() {
        let (transport, broker) = MockTransport::pair();
        broker.set_auto_connack(None);
        let mut session = Session::new(SessionSettings::default());
        let now = Instant::now();
        session
            .connect(transport, ConnectOptions::new("test"), now)
            .unwrap();
        session
            .publish("a/b", Bytes::from_static(b"early"), QoS::AtMostOnce, false, now)
            .unwrap();

        session.sync(now);
        let received = broker.take_received();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], Packet::Connect(_)));

        broker.send(&Packet::ConnAck(ConnAck {
            session_present: false,
            code: 0,
        }));
        session.sync(now);
        assert!(session.state().is_connected());
        assert!(matches!(broker.take_received().as_slice(), [Packet::Publish(_)]));
    }

    #[test]
    fn test_packet_before_connack_is_violation() {
        let (transport, broker) = MockTransport::pair();
        broker.set_auto_connack(None);
        let mut session = Session::new(SessionSettings::default());
        let now = Instant::now();
        session
            .connect(transport, ConnectOptions::new("test"), now)
            .unwrap();
        broker.send(&Packet::PingResp);

        let report = session.sync(now);
        assert!(matches!(
            session.state(),
            ConnectionState::Disconnected(Some(DisconnectReason::ProtocolError(_)))
        ));
        assert!(matches!(
            report.events.as_slice(),
            [SessionEvent::Disconnected { .. }]
        ));
    }

    #[test]
    fn test_inbound_qos1_publish_is_acknowledged_and_delivered() {
        let (mut session, broker, now) = connected_session(60);
        session.subscribe("sensors/+", QoS::AtLeastOnce).unwrap();
        session.sync(now);
        broker.take_received();

        broker.send(&Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            packet_id: Some(77),
            ..Publish::new("sensors/temp", "21.5")
        }));
        broker.send(&Packet::Publish(Publish::new("other/topic", "ignored")));

        let report = session.sync(now);
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].topic_lossy(), "sensors/temp");
        assert_eq!(broker.take_received(), vec![Packet::PubAck(77)]);
    }

    #[test]
    fn test_inbound_qos2_is_violation() {
        let (mut session, broker, now) = connected_session(60);
        broker.send(&Packet::Publish(Publish {
            qos: QoS::ExactlyOnce,
            packet_id: Some(1),
            ..Publish::new("a", "b")
        }));
        session.sync(now);
        assert!(session.state().is_disconnected());
    }

    #[test]
    fn test_unknown_puback_is_ignored() {
        let (mut session, broker, now) = connected_session(60);
        broker.send(&Packet::PubAck(999));
        let report = session.sync(now);
        assert!(report.is_empty());
        assert!(session.state().is_connected());
    }

    #[test]
    fn test_suback_failure_removes_filter() {
        let (mut session, broker, now) = connected_session(60);
        broker.set_auto_suback(false);
        let packet_id = session.subscribe("secret/#", QoS::AtMostOnce).unwrap();
        session.sync(now);
        assert_eq!(session.subscriptions().len(), 1);

        broker.send(&Packet::SubAck(SubAck {
            packet_id,
            return_codes: vec![SubscribeReturnCode::Failure],
        }));
        let report = session.sync(now);
        assert!(session.subscriptions().is_empty());
        assert!(matches!(
            report.events.as_slice(),
            [SessionEvent::Subscribed { .. }]
        ));
    }

    #[test]
    fn test_unsubscribe_round_trip() {
        let (mut session, broker, now) = connected_session(60);
        session.subscribe("a/#", QoS::AtMostOnce).unwrap();
        session.sync(now);
        let packet_id = session.unsubscribe("a/#").unwrap();
        assert!(session.subscriptions().is_empty());

        let report = session.sync(now);
        assert!(report
            .events
            .contains(&SessionEvent::Unsubscribed { packet_id }));
        assert!(broker
            .take_received()
            .iter()
            .any(|p| matches!(p, Packet::Unsubscribe(_))));
    }

    #[test]
    fn test_ping_when_idle_and_pong_keeps_session() {
        let (mut session, broker, start) = connected_session(10);

        session.sync(start + Duration::from_secs(10));
        assert_eq!(broker.take_received(), vec![Packet::PingReq]);
        // Auto PINGRESP refreshed the receive clock
        session.sync(start + Duration::from_secs(20));
        assert!(session.state().is_connected());
    }

    #[test]
    fn test_graceful_disconnect_sends_disconnect() {
        let (mut session, broker, now) = connected_session(60);
        let report = session.disconnect(now).unwrap();

        assert_eq!(
            session.state(),
            &ConnectionState::Disconnected(Some(DisconnectReason::Requested))
        );
        assert!(report.events.contains(&SessionEvent::Disconnected {
            reason: DisconnectReason::Requested
        }));
        assert_eq!(broker.take_received(), vec![Packet::Disconnect]);
        assert!(broker.is_closed());
    }

    #[test]
    fn test_oversized_publish_rejected() {
        let (mut session, _broker, now) = connected_session(60);
        let payload = Bytes::from(vec![0u8; SessionSettings::default().max_packet_size]);
        assert!(matches!(
            session.publish("a/b", payload, QoS::AtMostOnce, false, now),
            Err(ClientError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_transport_failure_disconnects() {
        let (mut session, broker, now) = connected_session(60);
        broker.close();
        let report = session.sync(now);
        assert!(matches!(
            report.events.as_slice(),
            [SessionEvent::Disconnected {
                reason: DisconnectReason::TransportFailure(_)
            }]
        ));
    }
}
