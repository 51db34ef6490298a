//! Non-blocking UDP input.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::info;

use crate::protocol::MAX_PACKET_SIZE;

/// A bound socket that is polled instead of waited on.
pub struct UdpListener {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpListener {
    /// Bind to `addr` in non-blocking mode.
    pub fn bind(addr: &str) -> io::Result<UdpListener> {
        info!("[udp] Listening for E1.31 at {}", addr);
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(UdpListener {
            socket,
            buf: vec![0; MAX_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Take the next queued datagram, if there is one.
    ///
    /// Returns `Ok(None)` as soon as the queue is empty.
    pub fn poll(&mut self) -> io::Result<Option<(&[u8], SocketAddr)>> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, source)) => Ok(Some((&self.buf[..len], source))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
