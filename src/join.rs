//! Join protocol.
//!
//! A node that powers up asks to be admitted with a broadcast JOIN_REQUEST.
//! Any listening member answers with a JOIN_ACK enumerating the eligible
//! nodes it knows. When nobody answers within the retry budget the node
//! creates a network of its own and waits in [`State::Alone`].

use rand::Rng;
use tracing::{debug, info};

use crate::{
    driver::Driver,
    state::{Mark, State, Transition},
    time::{Clock, Deadline, Timestamp},
    traits::{Application, Transport},
    types::{NodeId, SessionId},
    wire::Message,
};

impl<T, C, A> Driver<T, C, A>
where
    T: Transport,
    C: Clock,
    A: Application,
{
    pub(crate) fn join_send(&mut self, now: Timestamp) -> Transition {
        let local = self.local();
        self.link.send_broadcast(&Message::JoinRequest { joiner: local });

        let timings = &self.node.config.timings;
        let (interval, spread) = (timings.join_resend_interval, timings.ack_jitter);
        let wait = interval + self.jitter(spread);
        self.node.timers.join_resend = Deadline::after(now, wait);
        debug!(node = %local, attempt = self.node.join_retries + 1, "join requested");
        Transition::to(State::JoinAwaitAck)
    }

    pub(crate) fn join_await_ack(&mut self, now: Timestamp) -> Transition {
        if self.node.timers.join_resend.elapsed(now) {
            if self.node.join_retries >= self.node.config.max_join_retries {
                return Transition::to(State::CreateNetwork);
            }
            self.node.join_retries += 1;
            return Transition::to(State::JoinSend);
        }

        let local = self.local();
        let Some(inbound) = self.listen(self.node.timers.join_resend, now) else {
            return Transition::to(State::JoinAwaitAck);
        };
        let Message::JoinAck { target, session, round, hand_off, members } = inbound.message else {
            return Transition::to(State::JoinAwaitAck);
        };
        if target != local {
            return Transition::to(State::JoinAwaitAck);
        }

        self.node.session = Some(session);
        self.node.join_retries = 0;
        self.node.master_node = false;
        self.node.last_holder = (!hand_off).then_some(inbound.from);
        self.node.reset_rounds();
        self.node.observe(round);
        if hand_off {
            self.node.claim();
        }
        info!(
            node = %local,
            via = %inbound.from,
            %session,
            members = members.len(),
            hand_off,
            round,
            "joined network"
        );

        let next = if hand_off { State::Send } else { State::Recv };
        Transition::to(next)
            .mark(local, true)
            .mark(inbound.from, true)
            .with_marks(members.into_iter().map(|node| Mark { node, eligible: true }))
    }

    pub(crate) fn create_network(&mut self) -> Transition {
        let local = self.local();
        let session = SessionId::new(self.node.rng.gen());
        self.node.session = Some(session);
        self.node.join_retries = 0;
        self.node.master_node = false;
        self.node.last_holder = None;
        self.node.reset_rounds();
        info!(node = %local, %session, "no network answered, created a new one");
        Transition::to(State::Alone).mark(local, true)
    }

    /// Answers `joiner` once the reply jitter has passed.
    ///
    /// The JOIN_ACK is broadcast so that other members learn about the
    /// joiner too. If nobody but the joiner is eligible it also carries the
    /// token: with two nodes, waiting for a regular hand-off would never end.
    pub(crate) fn join_send_ack(&mut self, joiner: NodeId, now: Timestamp) -> Transition {
        if !self.node.timers.reply.elapsed(now) {
            if let Some(inbound) = self.listen(self.node.timers.reply, now) {
                self.defer(inbound);
            }
            return Transition::to(State::JoinSendAck { joiner });
        }

        let local = self.local();
        let Some(session) = self.node.session else {
            return Transition::to(State::Recv);
        };

        let hand_off = !self.node.table.any_eligible_other_than(&[local, joiner]);
        let round = self.node.round;
        let mut members: Vec<NodeId> = self.node.table.eligible().collect();
        members.extend([local, joiner]);
        members.sort_unstable();
        members.dedup();

        let answer = Message::JoinAck { target: joiner, session, round, hand_off, members };
        if self.link.send_broadcast(&answer) {
            self.node.stats.joins_answered += 1;
        }
        info!(node = %local, %joiner, hand_off, "answered join request");

        if hand_off {
            self.node.master_node = false;
            self.node.last_holder = Some(joiner);
            self.node.observe(round.saturating_add(1));
        }
        Transition::to(State::Recv).mark(local, true).mark(joiner, true)
    }
}
