//! Turn-token protocol.
//!
//! Listening, acknowledging, handing the token to the successor and
//! recovering from a holder that went silent. The holder's own send cycle
//! lives in `transmit.rs`.

use tracing::{debug, info, warn};

use crate::{
    driver::Driver,
    link::Inbound,
    state::{Mark, State, Transition},
    time::{Clock, Deadline, Timestamp},
    traits::{Application, Transport},
    types::{NodeId, SessionId},
    wire::Message,
};

/// What a frame heard while handing off says about the pending TURN.
enum Handoff {
    /// Nothing relevant.
    Pending,
    /// The successor took the token.
    Acknowledged,
    /// An outdated TURN named this node; release its sender.
    Outdated,
    /// A newer token is on the air.
    Superseded,
}

impl<T, C, A> Driver<T, C, A>
where
    T: Transport,
    C: Clock,
    A: Application,
{
    /// General listening state.
    pub(crate) fn recv(&mut self, now: Timestamp) -> Transition {
        if self.node.timers.watchdog.elapsed(now) {
            return self.watchdog_expired(now);
        }

        let inbound = match self.node.deferred.take() {
            Some(inbound) => inbound,
            None => match self.listen(self.node.timers.watchdog, now) {
                Some(inbound) => inbound,
                None => return Transition::to(State::Recv),
            },
        };

        let local = self.local();
        let watchdog = self.node.config.timings.watchdog_interval;
        self.node.timers.watchdog = Deadline::after(self.now(), watchdog);
        let readmit = self.readmit(&inbound);
        let from = inbound.from;

        let next = match inbound.message {
            Message::Data { body, .. } => {
                self.node.last_holder = Some(from);
                self.accept_payload(from, body, false);
                State::AckData { to: from, echo: inbound.raw }
            }
            Message::Retry { body, .. } => {
                self.node.last_holder = Some(from);
                self.accept_payload(from, body, true);
                State::AckData { to: from, echo: inbound.raw }
            }
            Message::Turn { target, session, round } => {
                if self.node.session != Some(session) {
                    if target == local {
                        info!(node = %local, %from, %session, "token from another network");
                        return self.rejoin();
                    }
                    debug!(node = %local, %from, %session, "stale turn ignored");
                    return Transition::to(State::Recv);
                }
                if target != local {
                    if round >= self.node.round {
                        self.node.last_holder = Some(target);
                    }
                    self.node.observe(round);
                    State::Recv
                } else if self.node.is_fresh(round) {
                    self.node.accept(round);
                    self.node.last_holder = Some(local);
                    State::RecvTurn { from, echo: inbound.raw }
                } else {
                    debug!(node = %local, %from, round, held = self.node.held, "outdated token");
                    self.acknowledge_only(from, inbound.raw);
                    State::Recv
                }
            }
            Message::JoinRequest { joiner } => {
                if self.node.session.is_some() {
                    State::JoinSendAck { joiner }
                } else {
                    State::Recv
                }
            }
            Message::JoinAck { target, session, round, .. } => {
                if self.node.session == Some(session) && target != local {
                    self.node.observe(round);
                    return Transition::to(State::Recv).with_marks(readmit).mark(target, true);
                }
                State::Recv
            }
            Message::Ack(_) => State::Recv,
        };
        Transition::to(next).with_marks(readmit)
    }

    /// Sole member of a network. Answers joiners and periodically looks for
    /// a network to merge into.
    pub(crate) fn alone(&mut self, now: Timestamp) -> Transition {
        if self.node.timers.rescan.elapsed(now) {
            debug!(node = %self.local(), "still alone, searching for a network");
            return self.rejoin();
        }

        let Some(inbound) = self.listen(self.node.timers.rescan, now) else {
            return Transition::to(State::Alone);
        };
        let local = self.local();
        let from = inbound.from;

        match inbound.message {
            Message::JoinRequest { joiner } => Transition::to(State::JoinSendAck { joiner }),
            Message::Turn { target, session, round }
                if target == local && self.node.session == Some(session) =>
            {
                if !self.node.is_fresh(round) {
                    self.acknowledge_only(from, inbound.raw);
                    return Transition::to(State::Alone).mark(from, true);
                }
                self.node.accept(round);
                self.node.last_holder = Some(local);
                Transition::to(State::RecvTurn { from, echo: inbound.raw }).mark(from, true)
            }
            Message::Data { .. } | Message::Retry { .. } | Message::Turn { .. } => {
                info!(node = %local, %from, "heard another network, rejoining");
                self.rejoin()
            }
            Message::Ack(_) | Message::JoinAck { .. } => Transition::to(State::Alone),
        }
    }

    /// Acknowledges a DATA or RETRY once the reply jitter has passed.
    pub(crate) fn ack_data(&mut self, to: NodeId, echo: Vec<u8>, now: Timestamp) -> Transition {
        if !self.node.timers.reply.elapsed(now) {
            if let Some(inbound) = self.listen(self.node.timers.reply, now) {
                self.defer(inbound);
            }
            return Transition::to(State::AckData { to, echo });
        }

        if self.link.send_to(to, &Message::Ack(echo)) {
            self.node.stats.acks_sent += 1;
        }
        Transition::to(State::Recv)
    }

    /// Releases the sender of an outdated TURN without taking the token.
    pub(crate) fn acknowledge_only(&mut self, to: NodeId, echo: Vec<u8>) {
        if self.link.send_to(to, &Message::Ack(echo)) {
            self.node.stats.acks_sent += 1;
        }
    }

    /// Acknowledges the TURN naming this node and starts the turn.
    pub(crate) fn recv_turn(&mut self, from: NodeId, echo: Vec<u8>) -> Transition {
        if self.link.send_to(from, &Message::Ack(echo)) {
            self.node.stats.acks_sent += 1;
        }
        debug!(node = %self.local(), %from, "token received");
        Transition::to(State::Send)
    }

    /// Hands the token to the next eligible node.
    pub(crate) fn send_turn(&mut self, now: Timestamp) -> Transition {
        let local = self.local();
        let Some(session) = self.node.session else {
            return self.rejoin();
        };
        let Some(successor) = self.node.table.successor(local) else {
            self.node.master_node = false;
            self.node.handoff = None;
            info!(node = %local, "no eligible peers left, waiting alone");
            return Transition::to(State::Alone);
        };

        // A re-offer after an eviction keeps the round of the first offer.
        let round = match &self.node.handoff {
            Some(Message::Turn { round, .. }) => *round,
            _ => self.node.next_round(),
        };
        self.node.observe(round);
        let turn = Message::Turn { target: successor, session, round };
        self.link.send_broadcast(&turn);
        self.node.handoff = Some(turn);
        self.node.turn_ack_retries = 0;
        let interval = self.node.config.timings.turn_ack_retry_interval;
        self.node.timers.turn_ack_retry = Deadline::after(now, interval);
        debug!(node = %local, %successor, round, "token offered");
        Transition::to(State::AwaitTurnAck { successor })
    }

    /// Waits for the successor to acknowledge the token, re-sending the
    /// TURN on every retry interval and evicting the successor once the
    /// budget is spent.
    pub(crate) fn await_turn_ack(&mut self, successor: NodeId, now: Timestamp) -> Transition {
        let local = self.local();
        let waiting = State::AwaitTurnAck { successor };

        if self.node.timers.turn_ack_retry.elapsed(now) {
            if self.node.turn_ack_retries >= self.node.config.max_turn_ack_retries {
                warn!(
                    node = %local,
                    %successor,
                    attempts = self.node.turn_ack_retries + 1,
                    "successor never acknowledged the token"
                );
                return Transition::to(State::SendTurn).mark(successor, false);
            }
            self.node.turn_ack_retries += 1;
            if let Some(turn) = self.node.handoff.clone() {
                self.link.send_broadcast(&turn);
            }
            let interval = self.node.config.timings.turn_ack_retry_interval;
            self.node.timers.turn_ack_retry = Deadline::after(now, interval);
            return Transition::to(waiting);
        }

        let Some(inbound) = self.listen(self.node.timers.turn_ack_retry, now) else {
            return Transition::to(waiting);
        };
        let readmit = self.readmit(&inbound);
        let from = inbound.from;
        let offered = match &self.node.handoff {
            Some(Message::Turn { round, .. }) => *round,
            _ => self.node.held,
        };
        let same_session = |session: &SessionId| self.node.session == Some(*session);

        let outcome = match &inbound.message {
            Message::Ack(echo) if from == successor => {
                if self.node.handoff.as_ref().is_some_and(|turn| turn.encode() == *echo) {
                    Handoff::Acknowledged
                } else {
                    Handoff::Pending
                }
            }
            // The successor is already using or passing on its turn.
            Message::Data { round, .. } | Message::Retry { round, .. } if *round >= offered => {
                if from == successor {
                    Handoff::Acknowledged
                } else if self.node.table.get(from) {
                    Handoff::Superseded
                } else {
                    Handoff::Pending
                }
            }
            Message::Turn { target, session, round } if same_session(session) => {
                if *round > offered && from == successor {
                    Handoff::Acknowledged
                } else if *round > offered {
                    Handoff::Superseded
                } else if *target == local {
                    Handoff::Outdated
                } else {
                    Handoff::Pending
                }
            }
            _ => Handoff::Pending,
        };

        match outcome {
            Handoff::Pending => Transition::to(waiting).with_marks(readmit),
            Handoff::Outdated => {
                debug!(node = %local, %from, offered, "outdated token while handing off");
                self.acknowledge_only(from, inbound.raw);
                Transition::to(waiting).with_marks(readmit)
            }
            Handoff::Acknowledged => {
                self.node.master_node = false;
                self.node.handoff = None;
                self.node.last_holder = Some(successor);
                self.node.deferred = Some(inbound);
                self.node.stats.turns_handed_off += 1;
                info!(node = %local, %successor, "token handed off");
                Transition::to(State::Recv).with_marks(readmit)
            }
            Handoff::Superseded => {
                self.node.master_node = false;
                self.node.handoff = None;
                self.node.deferred = Some(inbound);
                self.node.stats.tokens_yielded += 1;
                info!(node = %local, %from, %successor, "newer token on the air, hand-off dropped");
                Transition::to(State::Recv).with_marks(readmit)
            }
        }
    }

    /// The holder went silent. Presume it dead and either claim the token,
    /// when this node is next in line, or wait for whoever is.
    fn watchdog_expired(&mut self, now: Timestamp) -> Transition {
        let local = self.local();
        self.node.stats.watchdog_fires += 1;

        let presumed = match self.node.last_holder {
            Some(holder) if holder != local => Some(holder),
            _ => self.node.table.eligible().find(|&id| id != local),
        };
        let Some(dead) = presumed else {
            info!(node = %local, "watchdog expired with no peers, claiming the token");
            self.node.claim();
            return Transition::to(State::Send);
        };

        warn!(node = %local, holder = %dead, "watchdog expired, holder presumed dead");
        let evict = Transition::to(State::Recv).mark(dead, false);
        match self.node.table.successor(dead) {
            Some(next) if next != local => {
                self.node.last_holder = Some(next);
                let watchdog = self.node.config.timings.watchdog_interval;
                self.node.timers.watchdog = Deadline::after(now, watchdog);
                debug!(node = %local, %next, "waiting for the next holder");
                evict
            }
            _ => {
                info!(node = %local, "next in line, claiming the token");
                self.node.claim();
                Transition { next: State::Send, marks: evict.marks }
            }
        }
    }

    /// Frames from a universe member we consider gone prove it is back.
    pub(crate) fn readmit(&self, inbound: &Inbound) -> Option<Mark> {
        if self.node.table.get(inbound.from) {
            return None;
        }
        let proves_life = match &inbound.message {
            Message::Data { .. } | Message::Retry { .. } | Message::Ack(_) => true,
            Message::Turn { session, .. } | Message::JoinAck { session, .. } => {
                self.node.session == Some(*session)
            }
            Message::JoinRequest { .. } => false,
        };
        proves_life.then_some(Mark { node: inbound.from, eligible: true })
    }

    /// Leaves the current network and asks to be admitted again.
    pub(crate) fn rejoin(&mut self) -> Transition {
        self.node.join_retries = 0;
        self.node.master_node = false;
        self.node.handoff = None;
        self.node.deferred = None;
        self.node.reset_rounds();
        Transition::to(State::JoinSend)
    }

    fn accept_payload(&mut self, from: NodeId, body: Vec<u8>, retry: bool) {
        let duplicate = retry
            && self
                .node
                .last_delivered
                .as_ref()
                .is_some_and(|(sender, last)| *sender == from && *last == body);
        if duplicate {
            debug!(node = %self.local(), %from, "duplicate retry, not delivered again");
            return;
        }

        match self.app.open(&body) {
            Some(payload) => self.app.deliver(from, payload),
            None => debug!(node = %self.local(), %from, "payload could not be opened"),
        }
        self.node.last_delivered = Some((from, body));
    }
}
