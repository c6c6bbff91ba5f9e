//! Collaborator seams of the protocol.
//!
//! The state machine only ever talks to two things it does not own:
//!
//! - [`Transport`]: the packet radio (or anything that behaves like one)
//! - [`Application`]: the producer and consumer of payload bytes

use std::time::Duration;

use crate::types::{NodeId, TransportError};

/// Largest packet an RF95-class LoRa transceiver accepts.
pub const DEFAULT_MTU: usize = 251;

/// A packet as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender reported by the link layer, if the transport can tell.
    pub from: Option<NodeId>,
    /// Destination address, possibly [`NodeId::BROADCAST`].
    pub to: NodeId,
    /// Packet contents.
    pub bytes: Vec<u8>,
}

/// Unreliable single-hop packet link with a broadcast address.
///
/// Implementations never retry internally. A failed send is reported once
/// and the protocol's own timers decide what happens next.
///
/// # Example
///
/// ```ignore
/// use meshturn::{Frame, NodeId, Transport, TransportError};
///
/// struct Loopback(Vec<Frame>);
///
/// impl Transport for Loopback {
///     fn send(&mut self, to: NodeId, frame: &[u8]) -> Result<(), TransportError> {
///         self.0.push(Frame { from: None, to, bytes: frame.to_vec() });
///         Ok(())
///     }
///
///     fn receive(&mut self, _timeout: Duration) -> Option<Frame> {
///         self.0.pop()
///     }
/// }
/// ```
pub trait Transport {
    /// Largest frame the transport carries in one packet.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    /// Whether received frames carry the sender's address.
    ///
    /// When false the link embeds the sender at offset 0 of every frame.
    fn reports_sender(&self) -> bool {
        true
    }

    /// Sends one frame to `to`, which may be the broadcast address.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame could not be handed to the
    /// radio.
    fn send(&mut self, to: NodeId, frame: &[u8]) -> Result<(), TransportError>;

    /// Waits up to `timeout` for one frame.
    ///
    /// Returns `None` when the timeout passes without traffic. Must never
    /// block longer than `timeout`.
    fn receive(&mut self, timeout: Duration) -> Option<Frame>;

    /// Blocks until the previous send has left the antenna, bounded by
    /// `timeout`.
    fn await_send_complete(&mut self, _timeout: Duration) {}

    /// Puts the radio back into listening mode.
    fn set_receive_mode(&mut self) {}
}

/// Producer and consumer of the payloads carried in DATA frames.
///
/// `seal` and `open` are the confidentiality hook around the wire: `seal`
/// runs right before a payload is broadcast and `open` right after one is
/// received. Both default to the identity.
pub trait Application {
    /// Payload to broadcast at the start of this node's next turn.
    fn next_payload(&mut self) -> Vec<u8>;

    /// Hands a received payload to the application.
    fn deliver(&mut self, from: NodeId, payload: Vec<u8>);

    /// Transforms a payload before it is broadcast.
    fn seal(&mut self, payload: Vec<u8>) -> Vec<u8> {
        payload
    }

    /// Reverses [`Application::seal`]. Returns `None` for bytes that cannot
    /// be opened; such payloads are acknowledged but never delivered.
    fn open(&mut self, sealed: &[u8]) -> Option<Vec<u8>> {
        Some(sealed.to_vec())
    }
}
