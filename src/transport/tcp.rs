//! Non-blocking TCP transport

use super::{Transport, TransportError};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use tracing::debug;

/// TCP stream switched to non-blocking mode after the connect handshake
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Open a TCP connection to the broker
    ///
    /// The TCP handshake itself blocks; every read and write afterwards is
    /// non-blocking.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let addrs: Vec<_> = (host, port).to_socket_addrs()?.collect();
        let stream = TcpStream::connect(&addrs[..])?;
        debug!("TCP connection established to {}:{}", host, port);
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        loop {
            match self.stream.write(buf) {
                Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = TcpTransport::connect("127.0.0.1", port).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (transport, peer)
    }

    #[test]
    fn test_read_would_block_when_idle() {
        let (mut transport, _peer) = pair();
        let mut buf = [0u8; 16];
        assert!(matches!(
            transport.read(&mut buf),
            Err(TransportError::WouldBlock)
        ));
    }

    #[test]
    fn test_round_trip_bytes() {
        let (mut transport, mut peer) = pair();

        assert_eq!(transport.write(b"ping").unwrap(), 4);
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"ping");

        peer.write_all(b"pong").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 16];
        loop {
            match transport.read(&mut buf) {
                Ok(n) => {
                    assert_eq!(&buf[..n], b"pong");
                    break;
                }
                Err(TransportError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
    }

    #[test]
    fn test_peer_close_is_fatal() {
        let (mut transport, peer) = pair();
        drop(peer);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 16];
        loop {
            match transport.read(&mut buf) {
                Err(TransportError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    assert!(e.is_fatal());
                    break;
                }
                Ok(n) => panic!("unexpected {n} bytes from a closed peer"),
            }
        }
    }
}
