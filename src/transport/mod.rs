//! Byte-stream transport for the MQTT session
//!
//! The session only needs ordered, reliable, full-duplex byte delivery. This
//! module provides that as a non-blocking [`Transport`] trait so the session
//! can be driven by a timer without ever parking the calling thread, plus the
//! TCP implementation used in production.

use std::io;
use thiserror::Error;

pub mod tcp;

pub use tcp::TcpTransport;

/// Transport errors, classified into "try again later" and fatal
#[derive(Debug, Error)]
pub enum TransportError {
    /// No progress is possible right now; not an error condition
    #[error("operation would block")]
    WouldBlock,
    /// The peer closed the stream
    #[error("connection closed by peer")]
    Closed,
    /// Any other I/O failure (reset, broken pipe, ...)
    #[error("transport I/O error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    /// Whether the session must give up on this transport
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::WouldBlock)
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(error),
        }
    }
}

/// Non-blocking, ordered byte stream
///
/// Implementations must never suspend the caller: when no progress is
/// possible they return [`TransportError::WouldBlock`] immediately. A read of
/// zero bytes is never returned; a closed stream is reported as
/// [`TransportError::Closed`].
pub trait Transport: Send {
    /// Write some prefix of `buf`, returning how many bytes were accepted
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read available bytes into `buf`, returning how many were read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the stream; further reads and writes fail
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        (**self).write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}
