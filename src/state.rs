//! Protocol states and the per-node aggregate.

use std::fmt;

use rand::rngs::StdRng;
use serde::Serialize;

use crate::{
    config::ProtocolConfig,
    link::Inbound,
    membership::MembershipTable,
    time::Deadline,
    types::{NodeId, SessionId},
    wire::Message,
};

/// Every state a node can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Broadcast a JOIN_REQUEST.
    JoinSend,
    /// Wait for a JOIN_ACK naming this node.
    JoinAwaitAck,
    /// No network answered: start a new one.
    CreateNetwork,
    /// Answer a JOIN_REQUEST once the reply jitter has passed.
    JoinSendAck {
        /// The node asking to join.
        joiner: NodeId,
    },
    /// Sole member of a network, listening for joiners.
    Alone,
    /// General listening state.
    Recv,
    /// Acknowledge a DATA or RETRY once the reply jitter has passed.
    AckData {
        /// The token holder.
        to: NodeId,
        /// The frame being acknowledged.
        echo: Vec<u8>,
    },
    /// Acknowledge the TURN naming this node.
    RecvTurn {
        /// The node handing over the token.
        from: NodeId,
        /// The TURN frame being acknowledged.
        echo: Vec<u8>,
    },
    /// Broadcast this turn's payload.
    Send,
    /// Wait for a DATA acknowledgement.
    AwaitAck,
    /// Re-broadcast this turn's payload.
    RetrySend,
    /// Hand the token to the successor.
    SendTurn,
    /// Wait for the successor to acknowledge the TURN.
    AwaitTurnAck {
        /// The node the token was handed to.
        successor: NodeId,
    },
}

impl State {
    /// Short name of the state, without its fields.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinSend => "JoinSend",
            Self::JoinAwaitAck => "JoinAwaitAck",
            Self::CreateNetwork => "CreateNetwork",
            Self::JoinSendAck { .. } => "JoinSendAck",
            Self::Alone => "Alone",
            Self::Recv => "Recv",
            Self::AckData { .. } => "AckData",
            Self::RecvTurn { .. } => "RecvTurn",
            Self::Send => "Send",
            Self::AwaitAck => "AwaitAck",
            Self::RetrySend => "RetrySend",
            Self::SendTurn => "SendTurn",
            Self::AwaitTurnAck { .. } => "AwaitTurnAck",
        }
    }

    /// Returns true while the node holds the token.
    pub const fn is_holding(&self) -> bool {
        matches!(self, Self::Send | Self::AwaitAck | Self::RetrySend | Self::SendTurn)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinSendAck { joiner } => write!(f, "JoinSendAck({joiner})"),
            Self::AckData { to, .. } => write!(f, "AckData({to})"),
            Self::RecvTurn { from, .. } => write!(f, "RecvTurn({from})"),
            Self::AwaitTurnAck { successor } => write!(f, "AwaitTurnAck({successor})"),
            other => f.write_str(other.name()),
        }
    }
}

/// One membership change requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    /// Node whose flag changes.
    pub node: NodeId,
    /// New eligibility.
    pub eligible: bool,
}

/// Result of one handler invocation: the next state plus the membership
/// changes the driver applies before entering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State for the next iteration.
    pub next: State,
    /// Membership changes, applied in order.
    pub marks: Vec<Mark>,
}

impl Transition {
    /// Moves to `next` without touching the membership table.
    pub const fn to(next: State) -> Self {
        Self { next, marks: Vec::new() }
    }

    /// Adds a membership change.
    pub fn mark(mut self, node: NodeId, eligible: bool) -> Self {
        self.marks.push(Mark { node, eligible });
        self
    }

    /// Adds several membership changes.
    pub fn with_marks(mut self, marks: impl IntoIterator<Item = Mark>) -> Self {
        self.marks.extend(marks);
        self
    }
}

/// Protocol timers. Each belongs to exactly one protocol and is re-armed,
/// never shared.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Timers {
    /// End of the current turn.
    pub(crate) turn: Deadline,
    /// Next DATA re-broadcast.
    pub(crate) retry: Deadline,
    /// Next JOIN_REQUEST.
    pub(crate) join_resend: Deadline,
    /// Next TURN re-send.
    pub(crate) turn_ack_retry: Deadline,
    /// Silence limit while listening.
    pub(crate) watchdog: Deadline,
    /// End of the jitter before an acknowledgement.
    pub(crate) reply: Deadline,
    /// Next attempt of a lone node to find a network.
    pub(crate) rescan: Deadline,
}

/// Running counters, exposed for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Turns started by this node.
    pub turns_taken: u64,
    /// Matching DATA acknowledgements received.
    pub data_acks_received: u64,
    /// RETRY broadcasts.
    pub retries_sent: u64,
    /// ACKs sent, for DATA and TURN alike.
    pub acks_sent: u64,
    /// Hand-offs acknowledged by the successor.
    pub turns_handed_off: u64,
    /// Peers marked ineligible.
    pub evictions: u64,
    /// Peers marked eligible.
    pub admissions: u64,
    /// JOIN_ACKs sent.
    pub joins_answered: u64,
    /// Watchdog expiries.
    pub watchdog_fires: u64,
    /// Frames received while busy and discarded.
    pub frames_dropped: u64,
    /// Turns or pending hand-offs abandoned to a newer token.
    pub tokens_yielded: u64,
}

/// Snapshot of a node for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Local address.
    pub node: NodeId,
    /// Current state name.
    pub state: &'static str,
    /// Whether this node currently holds or just handed off the token.
    pub master_node: bool,
    /// Network instance, once joined or created.
    pub session: Option<SessionId>,
    /// Nodes the local table considers eligible.
    pub eligible: Vec<NodeId>,
    /// Counters.
    pub stats: Stats,
}

/// Everything one node knows, owned by its driver.
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) config: ProtocolConfig,
    pub(crate) table: MembershipTable,
    pub(crate) state: State,
    pub(crate) master_node: bool,
    pub(crate) session: Option<SessionId>,
    pub(crate) timers: Timers,
    pub(crate) join_retries: u32,
    pub(crate) turn_ack_retries: u32,
    /// Presumed current token holder, as last observed.
    pub(crate) last_holder: Option<NodeId>,
    /// A frame that arrived while an acknowledgement was pending.
    pub(crate) deferred: Option<Inbound>,
    /// Sealed payload of the current turn.
    pub(crate) outgoing: Vec<u8>,
    /// TURN awaiting acknowledgement.
    pub(crate) handoff: Option<Message>,
    /// Sender and body of the last delivered payload.
    pub(crate) last_delivered: Option<(NodeId, Vec<u8>)>,
    /// Highest token round observed in the current network.
    pub(crate) round: u32,
    /// Round of the last token this node accepted.
    pub(crate) held: u32,
    pub(crate) stats: Stats,
    pub(crate) rng: StdRng,
}

impl NodeState {
    pub(crate) fn new(config: ProtocolConfig, rng: StdRng) -> Self {
        let table = MembershipTable::new(config.universe.iter().copied());
        Self {
            config,
            table,
            state: State::JoinSend,
            master_node: false,
            session: None,
            timers: Timers::default(),
            join_retries: 0,
            turn_ack_retries: 0,
            last_holder: None,
            deferred: None,
            outgoing: Vec::new(),
            handoff: None,
            last_delivered: None,
            round: 0,
            held: 0,
            stats: Stats::default(),
            rng,
        }
    }

    pub(crate) const fn local(&self) -> NodeId {
        self.config.node
    }

    /// Whether a TURN of `round` naming this node hands over a token newer
    /// than any it has held or seen.
    pub(crate) const fn is_fresh(&self, round: u32) -> bool {
        round > self.held && round >= self.round
    }

    pub(crate) fn observe(&mut self, round: u32) {
        self.round = self.round.max(round);
    }

    /// Takes the token of `round`.
    pub(crate) fn accept(&mut self, round: u32) {
        self.held = self.held.max(round);
        self.observe(round);
    }

    /// Round for a token minted or handed on locally, above everything seen.
    pub(crate) fn next_round(&self) -> u32 {
        self.held.max(self.round).saturating_add(1)
    }

    /// Mints a token above every round seen and takes it.
    pub(crate) fn claim(&mut self) {
        let round = self.next_round();
        self.accept(round);
    }

    pub(crate) fn reset_rounds(&mut self) {
        self.round = 0;
        self.held = 0;
    }

    pub(crate) fn status(&self) -> NodeStatus {
        NodeStatus {
            node: self.local(),
            state: self.state.name(),
            master_node: self.master_node,
            session: self.session,
            eligible: self.table.eligible().collect(),
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain(State::Recv, "Recv")]
    #[case::joiner(State::JoinSendAck { joiner: NodeId::new(4) }, "JoinSendAck(4)")]
    #[case::ack(State::AckData { to: NodeId::new(2), echo: vec![0] }, "AckData(2)")]
    #[case::handoff(State::AwaitTurnAck { successor: NodeId::new(3) }, "AwaitTurnAck(3)")]
    fn state_display(#[case] state: State, #[case] expected: &str) {
        assert_eq!(state.to_string(), expected);
    }

    #[test]
    fn test_token_rounds() {
        let config = ProtocolConfig::new(NodeId::new(1), [1, 2, 3].map(NodeId::new));
        let mut node = NodeState::new(config, StdRng::seed_from_u64(1));
        assert!(node.is_fresh(1));
        node.accept(4);
        assert!(!node.is_fresh(4));
        assert!(node.is_fresh(5));
        node.observe(9);
        assert!(!node.is_fresh(8));
        assert_eq!(node.next_round(), 10);
        node.reset_rounds();
        assert_eq!(node.next_round(), 1);
        node.accept(u32::MAX);
        assert_eq!(node.next_round(), u32::MAX);
    }

    #[test]
    fn test_transition_collects_marks() {
        let transition = Transition::to(State::SendTurn)
            .mark(NodeId::new(3), false)
            .with_marks([Mark { node: NodeId::new(1), eligible: true }]);
        assert_eq!(transition.next, State::SendTurn);
        assert_eq!(
            transition.marks,
            vec![
                Mark { node: NodeId::new(3), eligible: false },
                Mark { node: NodeId::new(1), eligible: true },
            ]
        );
    }

    #[test]
    fn test_status_serializes() {
        let config = ProtocolConfig::new(NodeId::new(2), [1, 2].map(NodeId::new));
        let mut node = NodeState::new(config, StdRng::seed_from_u64(7));
        node.table.mark(NodeId::new(2), true);
        node.session = Some(SessionId::new(0x10));

        let json = serde_json::to_value(node.status()).unwrap();
        assert_eq!(json["node"], 2);
        assert_eq!(json["state"], "JoinSend");
        assert_eq!(json["session"], 16);
        assert_eq!(json["eligible"], serde_json::json!([2]));
        assert_eq!(json["stats"]["turns_taken"], 0);
    }
}
