//! Packets awaiting acknowledgement and packet identifier allocation
//!
//! QoS 1 publishes wait for PUBACK and are retransmitted on a deadline.
//! SUBSCRIBE and UNSUBSCRIBE wait for their acks without retries; they only
//! reserve their identifier. An identifier is never handed out while any
//! entry still holds it.

use crate::error::{ClientError, ClientResult};
use crate::protocol::Publish;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// A QoS 1 publish waiting for PUBACK
#[derive(Debug, Clone)]
pub(crate) struct PendingPublish {
    pub publish: Publish,
    /// Transmissions so far, including the first
    pub attempts: u32,
    pub deadline: Instant,
    pub first_sent: Instant,
    /// Position in first-transmission order
    pub sequence: u64,
    /// Connection dropped before the ack; re-send once CONNACK arrives
    pub awaiting_reconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingControl {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// What the retry scan decided for one expired entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RetryAction {
    /// Send again with DUP set
    Resend(Publish),
    /// Out of attempts; the entry has been dropped
    GiveUp { packet_id: u16, topic: Bytes },
}

#[derive(Debug)]
pub(crate) struct PendingTable {
    publishes: BTreeMap<u16, PendingPublish>,
    controls: HashMap<u16, PendingControl>,
    next_id: u16,
    next_sequence: u64,
    max_inflight: usize,
}

impl PendingTable {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            publishes: BTreeMap::new(),
            controls: HashMap::new(),
            next_id: 1,
            next_sequence: 0,
            max_inflight,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.publishes.len() + self.controls.len()
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.publishes.contains_key(&packet_id) || self.controls.contains_key(&packet_id)
    }

    pub fn publish_ids(&self) -> Vec<u16> {
        self.publishes.keys().copied().collect()
    }

    /// Pick the next free identifier without reserving it
    ///
    /// Identifiers run 1..=65535 and wrap, skipping any still in use. The
    /// counter only moves when an entry is inserted, so a caller that fails
    /// between picking and inserting leaves the sequence untouched.
    pub fn next_packet_id(&self) -> ClientResult<u16> {
        if self.in_flight() >= self.max_inflight {
            return Err(ClientError::PacketIdsExhausted {
                in_flight: self.in_flight(),
            });
        }

        let mut id = self.next_id;
        for _ in 0..u16::MAX {
            if !self.contains(id) {
                return Ok(id);
            }
            id = following_id(id);
        }

        Err(ClientError::PacketIdsExhausted {
            in_flight: self.in_flight(),
        })
    }

    pub fn insert_publish(&mut self, publish: Publish, now: Instant, retry_timeout: Duration) {
        if let Some(packet_id) = publish.packet_id {
            self.next_id = following_id(packet_id);
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.publishes.insert(
                packet_id,
                PendingPublish {
                    publish,
                    attempts: 1,
                    deadline: now + retry_timeout,
                    first_sent: now,
                    sequence,
                    awaiting_reconnect: false,
                },
            );
        }
    }

    pub fn acknowledge(&mut self, packet_id: u16) -> Option<PendingPublish> {
        self.publishes.remove(&packet_id)
    }

    pub fn insert_control(&mut self, packet_id: u16, control: PendingControl) {
        self.next_id = following_id(packet_id);
        self.controls.insert(packet_id, control);
    }

    pub fn release_control(&mut self, packet_id: u16) -> Option<PendingControl> {
        self.controls.remove(&packet_id)
    }

    /// Scan for publishes whose deadline has passed
    ///
    /// An entry below `max_attempts` is re-armed and returned for resend;
    /// one that has used every attempt is removed and reported as a failure.
    /// Entries parked for reconnect are left alone.
    pub fn due(
        &mut self,
        now: Instant,
        retry_timeout: Duration,
        max_attempts: u32,
    ) -> Vec<RetryAction> {
        let expired: Vec<u16> = self
            .publishes
            .iter()
            .filter(|(_, entry)| !entry.awaiting_reconnect && entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut actions = Vec::with_capacity(expired.len());
        for id in expired {
            let exhausted = self
                .publishes
                .get(&id)
                .map(|entry| entry.attempts >= max_attempts)
                .unwrap_or(false);

            if exhausted {
                if let Some(entry) = self.publishes.remove(&id) {
                    actions.push(RetryAction::GiveUp {
                        packet_id: id,
                        topic: entry.publish.topic,
                    });
                }
            } else if let Some(entry) = self.publishes.get_mut(&id) {
                entry.attempts += 1;
                entry.deadline = now + retry_timeout;
                entry.publish.dup = true;
                actions.push(RetryAction::Resend(entry.publish.clone()));
            }
        }
        actions
    }

    /// Connection lost: park every publish until the next CONNACK
    ///
    /// Subscribe and unsubscribe acks can no longer arrive, so those entries
    /// are returned to the caller and dropped.
    pub fn suspend(&mut self) -> Vec<(u16, PendingControl)> {
        for entry in self.publishes.values_mut() {
            entry.awaiting_reconnect = true;
        }
        self.controls.drain().collect()
    }

    /// Reconnected: hand back parked publishes, marked DUP, with fresh
    /// deadlines, in the order they were first sent
    pub fn resume(&mut self, now: Instant, retry_timeout: Duration) -> Vec<Publish> {
        let mut parked: Vec<&mut PendingPublish> = self
            .publishes
            .values_mut()
            .filter(|entry| entry.awaiting_reconnect)
            .collect();
        parked.sort_by_key(|entry| entry.sequence);

        parked
            .into_iter()
            .map(|entry| {
                entry.awaiting_reconnect = false;
                entry.deadline = now + retry_timeout;
                entry.publish.dup = true;
                entry.publish.clone()
            })
            .collect()
    }
}

/// Successor in 1..=65535, wrapping past zero
fn following_id(id: u16) -> u16 {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
