//! Packet radio emulated over UDP.
//!
//! Every node owns one socket on `base_port + node`. A broadcast is fanned
//! out to the port of every other address in the universe, which mimics a
//! single shared channel where everybody hears everybody.

use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use meshturn::{DEFAULT_MTU, Frame, NodeId, Transport, TransportError};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, trace};

/// Bytes in front of every datagram: destination, then sender.
const HEADER_LEN: usize = 2;

/// The smallest read timeout a socket accepts.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// UDP stand-in for an RF95-class transceiver.
#[derive(Debug)]
pub struct UdpRadio {
    local: NodeId,
    socket: UdpSocket,
    peers: Vec<(NodeId, SocketAddr)>,
    loss: f64,
    rng: StdRng,
    buf: Vec<u8>,
}

impl UdpRadio {
    /// Binds the socket of `local` and resolves the port of every peer.
    pub fn bind(
        local: NodeId,
        universe: &[NodeId],
        host: &str,
        base_port: u16,
        loss: f64,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(address(host, base_port, local)?)?;
        let peers = universe
            .iter()
            .filter(|&&id| id != local)
            .map(|&id| Ok((id, address(host, base_port, id)?)))
            .collect::<Result<Vec<_>, TransportError>>()?;
        debug!(node = %local, addr = ?socket.local_addr().ok(), peers = peers.len(), "radio bound");
        Ok(Self {
            local,
            socket,
            peers,
            loss,
            rng: StdRng::from_entropy(),
            buf: vec![0; HEADER_LEN + DEFAULT_MTU],
        })
    }

    fn lost(&mut self) -> bool {
        self.loss > 0.0 && self.rng.gen_bool(self.loss)
    }
}

/// Socket address of node `id`.
fn address(host: &str, base_port: u16, id: NodeId) -> Result<SocketAddr, TransportError> {
    let port = base_port
        .checked_add(u16::from(id.get()))
        .ok_or_else(|| TransportError::Io(format!("no port for node {id} above {base_port}")))?;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::Io(format!("{host} resolves to no address")))
}

impl Transport for UdpRadio {
    fn send(&mut self, to: NodeId, frame: &[u8]) -> Result<(), TransportError> {
        let mut datagram = Vec::with_capacity(HEADER_LEN + frame.len());
        datagram.extend_from_slice(&[to.get(), self.local.get()]);
        datagram.extend_from_slice(frame);

        for &(peer, addr) in &self.peers {
            if to.is_broadcast() || to == peer {
                self.socket.send_to(&datagram, addr)?;
            }
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Option<Frame> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT))).ok()?;
        let len = match self.socket.recv(&mut self.buf) {
            Ok(len) => len,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return None;
            }
            Err(err) => {
                debug!(node = %self.local, %err, "receive failed");
                return None;
            }
        };
        if len < HEADER_LEN {
            return None;
        }

        let to = NodeId::new(self.buf[0]);
        let from = NodeId::new(self.buf[1]);
        if self.lost() {
            trace!(node = %self.local, %from, "frame lost");
            return None;
        }
        Some(Frame { from: Some(from), to, bytes: self.buf[HEADER_LEN..len].to_vec() })
    }
}
