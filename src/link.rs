//! Transmit/acknowledge adapter.
//!
//! [`Link`] turns [`Message`]s into frames and back. It carries no retry or
//! backoff logic: every failure is reported to the caller, whose own timers
//! decide whether to try again.

use std::{collections::BTreeSet, time::Duration};

use tracing::{debug, trace, warn};

use crate::{
    traits::Transport,
    types::{NodeId, TransportError},
    wire::Message,
};

/// A decoded frame from another universe member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Sending node.
    pub from: NodeId,
    /// Destination: the local node or broadcast.
    pub to: NodeId,
    /// Decoded message.
    pub message: Message,
    /// Encoded message exactly as received, without any sender prefix.
    /// This is what an ACK echoes.
    pub raw: Vec<u8>,
}

/// Protocol-level view of a [`Transport`].
#[derive(Debug)]
pub struct Link<T> {
    transport: T,
    local: NodeId,
    universe: BTreeSet<NodeId>,
    send_complete_timeout: Duration,
}

impl<T: Transport> Link<T> {
    /// Wraps `transport` for the node `local`.
    pub fn new(
        transport: T,
        local: NodeId,
        universe: impl IntoIterator<Item = NodeId>,
        send_complete_timeout: Duration,
    ) -> Self {
        Self { transport, local, universe: universe.into_iter().collect(), send_complete_timeout }
    }

    /// Broadcasts `message`. Returns false if the transport refused it.
    pub fn send_broadcast(&mut self, message: &Message) -> bool {
        self.send_to(NodeId::BROADCAST, message)
    }

    /// Sends `message` to `to`. Returns false if the transport refused it.
    ///
    /// A successful send blocks until the radio reports completion and then
    /// switches it back to listening.
    pub fn send_to(&mut self, to: NodeId, message: &Message) -> bool {
        let frame = match self.frame(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(node = %self.local, %to, message = %message, error = %err, "not sent");
                return false;
            }
        };

        trace!(node = %self.local, %to, frame = %hex::encode(&frame), "tx");
        if let Err(err) = self.transport.send(to, &frame) {
            warn!(node = %self.local, %to, message = %message, error = %err, "send failed");
            return false;
        }
        self.transport.await_send_complete(self.send_complete_timeout);
        self.transport.set_receive_mode();
        true
    }

    /// Encodes `message` as it goes on the air, sender prefix included when
    /// the transport cannot report senders.
    pub fn frame(&self, message: &Message) -> Result<Vec<u8>, TransportError> {
        let mut frame = Vec::new();
        if !self.transport.reports_sender() {
            frame.push(self.local.get());
        }
        frame.extend(message.encode());

        let mtu = self.transport.mtu();
        if frame.len() > mtu {
            return Err(TransportError::FrameTooLarge { len: frame.len(), mtu });
        }
        Ok(frame)
    }

    /// Waits up to `timeout` for the next frame meant for this node.
    ///
    /// Returns `None` on timeout. Frames that fail to decode, come from the
    /// local node or from outside the universe, or are addressed to another
    /// node are dropped and also yield `None`.
    pub fn await_message(&mut self, timeout: Duration) -> Option<Inbound> {
        let frame = self.transport.receive(timeout)?;
        trace!(node = %self.local, to = %frame.to, frame = %hex::encode(&frame.bytes), "rx");

        let (from, raw) = match frame.from {
            Some(from) if self.transport.reports_sender() => (from, frame.bytes),
            _ => {
                let (&first, rest) = frame.bytes.split_first()?;
                (NodeId::new(first), rest.to_vec())
            }
        };

        if from == self.local || !self.universe.contains(&from) {
            debug!(node = %self.local, %from, "dropping frame from foreign sender");
            return None;
        }
        if frame.to != self.local && !frame.to.is_broadcast() {
            return None;
        }

        match Message::decode(&raw) {
            Ok(message) => Some(Inbound { from, to: frame.to, message, raw }),
            Err(err) => {
                debug!(node = %self.local, %from, error = %err, "dropping malformed frame");
                None
            }
        }
    }

    /// Underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{testkit::ScriptedTransport, traits::Frame};

    fn link(transport: ScriptedTransport) -> Link<ScriptedTransport> {
        Link::new(transport, NodeId::new(1), [1, 2, 3].map(NodeId::new), Duration::from_secs(1))
    }

    #[test]
    fn test_send_encodes_message() {
        let radio = ScriptedTransport::new();
        let mut link = link(radio.clone());

        assert!(link.send_broadcast(&Message::Data { round: 2, body: vec![0x05, 0x07] }));
        assert!(link.send_to(NodeId::new(2), &Message::Ack(vec![0x00])));

        assert_eq!(
            radio.sent(),
            vec![
                (NodeId::BROADCAST, vec![0x00, 2, 0, 0, 0, 0x05, 0x07]),
                (NodeId::new(2), vec![0x02, 0x00]),
            ]
        );
    }

    #[test]
    fn test_send_prefixes_sender_when_transport_cannot_report_it() {
        let radio = ScriptedTransport::new().without_sender();
        let mut link = link(radio.clone());

        assert!(link.send_broadcast(&Message::JoinRequest { joiner: NodeId::new(1) }));
        assert_eq!(radio.sent(), vec![(NodeId::BROADCAST, vec![1, 0x04, 1])]);

        let bytes = vec![2, 0x00, 1, 0, 0, 0, 9];
        radio.push(Frame { from: None, to: NodeId::BROADCAST, bytes });
        let inbound = link.await_message(Duration::ZERO).unwrap();
        assert_eq!(inbound.from, NodeId::new(2));
        assert_eq!(inbound.message, Message::Data { round: 1, body: vec![9] });
        assert_eq!(inbound.raw, vec![0x00, 1, 0, 0, 0, 9]);
    }

    #[test]
    fn test_send_failure_is_reported_not_retried() {
        let radio = ScriptedTransport::new();
        radio.fail_sends(true);
        let mut link = link(radio.clone());

        assert!(!link.send_broadcast(&Message::Data { round: 0, body: vec![1] }));
        assert!(radio.sent().is_empty());
    }

    #[test]
    fn test_oversized_frame_is_not_sent() {
        let radio = ScriptedTransport::new();
        let mut link = link(radio.clone());

        let oversized = Message::Data { round: 0, body: vec![0; 247] };
        let too_large = TransportError::FrameTooLarge { len: 252, mtu: 251 };
        assert_eq!(link.frame(&oversized), Err(too_large));
        assert!(!link.send_broadcast(&oversized));
        assert!(link.send_broadcast(&Message::Data { round: 0, body: vec![0; 246] }));
        assert_eq!(radio.sent().len(), 1);
    }

    #[rstest]
    #[case::from_self(1, 255, vec![0x00, 0, 0, 0, 0, 1])]
    #[case::from_outside_universe(9, 255, vec![0x00, 0, 0, 0, 0, 1])]
    #[case::addressed_elsewhere(2, 3, vec![0x00, 0, 0, 0, 0, 1])]
    #[case::malformed(2, 255, vec![0x03, 1])]
    #[case::unknown_tag(2, 1, vec![0x42])]
    fn await_message_drops(#[case] from: u8, #[case] to: u8, #[case] bytes: Vec<u8>) {
        let radio = ScriptedTransport::new();
        let mut link = link(radio.clone());
        radio.push(Frame { from: Some(NodeId::new(from)), to: NodeId::new(to), bytes });

        assert_eq!(link.await_message(Duration::ZERO), None);
        assert_eq!(radio.pending(), 0);
    }

    #[test]
    fn test_await_message_times_out() {
        let mut link = link(ScriptedTransport::new());
        assert_eq!(link.await_message(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_await_message_accepts_unicast() {
        let radio = ScriptedTransport::new();
        let mut link = link(radio.clone());
        let bytes = vec![0x02, 0x00];
        radio.push(Frame { from: Some(NodeId::new(3)), to: NodeId::new(1), bytes });

        let inbound = link.await_message(Duration::ZERO).unwrap();
        assert_eq!(inbound.from, NodeId::new(3));
        assert_eq!(inbound.to, NodeId::new(1));
        assert_eq!(inbound.message, Message::Ack(vec![0x00]));
    }
}
