//! Encoded frames waiting for the transport

use crate::error::{ClientError, ClientResult};
use crate::transport::{Transport, TransportError};
use bytes::Bytes;
use std::collections::VecDeque;

/// Result of one flush pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flushed {
    pub bytes: usize,
    pub frames: usize,
}

/// FIFO of encoded frames plus a handshake slot that is always written first
///
/// `offset` is how much of the front frame (handshake slot if occupied,
/// otherwise the queue head) the transport has already accepted.
#[derive(Debug)]
pub(crate) struct OutgoingQueue {
    handshake: Option<Bytes>,
    frames: VecDeque<Bytes>,
    offset: usize,
    queued_bytes: usize,
    limit: usize,
}

impl OutgoingQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            handshake: None,
            frames: VecDeque::new(),
            offset: 0,
            queued_bytes: 0,
            limit,
        }
    }

    pub fn set_handshake(&mut self, frame: Bytes) {
        self.handshake = Some(frame);
    }

    pub fn handshake_pending(&self) -> bool {
        self.handshake.is_some()
    }

    /// Queue an application frame, refusing it if the byte limit would be exceeded
    pub fn push(&mut self, frame: Bytes) -> ClientResult<()> {
        if self.queued_bytes + frame.len() > self.limit {
            return Err(ClientError::SendBufferFull {
                queued: self.queued_bytes,
                limit: self.limit,
            });
        }
        self.push_control(frame);
        Ok(())
    }

    /// Queue a protocol frame (acks, pings, DISCONNECT) regardless of the limit
    pub fn push_control(&mut self, frame: Bytes) {
        self.queued_bytes += frame.len();
        self.frames.push_back(frame);
    }

    /// Queue protocol frames ahead of everything not yet started, keeping
    /// their order
    ///
    /// A head frame the transport has partly accepted stays in front.
    pub fn push_control_front(&mut self, frames: Vec<Bytes>) {
        let at = usize::from(self.handshake.is_none() && self.offset > 0).min(self.frames.len());
        for (i, frame) in frames.into_iter().enumerate() {
            self.queued_bytes += frame.len();
            self.frames.insert(at + i, frame);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handshake.is_none() && self.frames.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn clear(&mut self) {
        self.handshake = None;
        self.frames.clear();
        self.offset = 0;
        self.queued_bytes = 0;
    }

    /// Write as much as the transport accepts without blocking
    ///
    /// The queue is only drained when `include_queue` is set; before CONNACK
    /// only the handshake slot may go out.
    pub fn flush<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        include_queue: bool,
    ) -> Result<Flushed, TransportError> {
        let mut flushed = Flushed::default();

        loop {
            let from_handshake = self.handshake.is_some();
            let frame = match (&self.handshake, self.frames.front()) {
                (Some(handshake), _) => handshake.clone(),
                (None, Some(frame)) if include_queue => frame.clone(),
                _ => break,
            };

            let written = match transport.write(&frame[self.offset..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(TransportError::WouldBlock) => break,
                Err(e) => return Err(e),
            };

            flushed.bytes += written;
            self.offset += written;
            if self.offset < frame.len() {
                continue;
            }

            self.offset = 0;
            flushed.frames += 1;
            if from_handshake {
                self.handshake = None;
            } else if let Some(done) = self.frames.pop_front() {
                self.queued_bytes -= done.len();
            }
        }

        Ok(flushed)
    }
}
