//! Transport (module G, ambient collaborator): a real UDP endpoint.
//!
//! This is dumb byte plumbing -- it neither inspects `dst` nor knows about
//! the consensus core. Every replica binds its own OS-assigned local port
//! and exchanges datagrams with a single fixed router address; the router
//! (out of scope, part of the surrounding test harness) is what actually
//! demultiplexes by destination id.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::TransportError;
use crate::message::Envelope;

/// Safe upper bound on a UDP datagram payload.
const MAX_DATAGRAM: usize = 65536;

/// The receive deadline that lets the owning event loop interleave timer
/// evaluation between reads.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Transport {
    socket: UdpSocket,
    router_addr: SocketAddr,
}

impl Transport {
    /// Bind a fresh local UDP socket and point it at the shared router port.
    pub fn bind(router_port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let router_addr: SocketAddr = format!("127.0.0.1:{router_port}")
            .parse()
            .expect("127.0.0.1:<port> is always a valid socket address");
        Ok(Transport { socket, router_addr })
    }

    /// Encode and send one envelope to the router.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.socket.send_to(&envelope.encode(), self.router_addr)?;
        Ok(())
    }

    /// Wait for up to [`RECV_TIMEOUT`] for one datagram's raw bytes.
    ///
    /// `Ok(None)` is the ordinary "deadline elapsed, nothing arrived" case
    /// that lets the event loop fall through to timer evaluation; it is not
    /// an error.
    pub fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
