use std::cell::RefCell;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::protocol::{Universe, MAX_PACKET_SIZE};

/// Sends E1.31 data packets to one unicast destination.
pub struct E131Client {
    /// UDP socket reused between calls.
    socket: UdpSocket,
    /// Component identifier stamped on every packet.
    cid: [u8; 16],
    /// Buffer reused between calls.
    buf: RefCell<Vec<u8>>,
}

impl E131Client {
    /// Build a new client talking to `host:port`.
    ///
    /// `host` may be an IP address or a resolvable name.
    pub fn new(host: &str, port: u16) -> io::Result<E131Client> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        // Sends never wait on the network.
        socket.set_nonblocking(true)?;
        Ok(E131Client {
            socket,
            cid: *uuid::Uuid::new_v4().as_bytes(),
            buf: RefCell::new(Vec::with_capacity(MAX_PACKET_SIZE)),
        })
    }

    /// Resolved destination.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    pub fn cid(&self) -> &[u8; 16] {
        &self.cid
    }

    /// Send one universe as a data packet.
    pub fn send(&self, universe: &Universe) -> io::Result<usize> {
        let mut buf = self.buf.borrow_mut();
        universe.write_to(&self.cid, &mut buf)?;
        self.socket.send(&buf)
    }
}
