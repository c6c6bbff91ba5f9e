//! The token holder's send cycle.
//!
//! One DATA broadcast per turn, re-broadcast as RETRY until some node
//! echoes it back or the turn runs out. Either way the turn ends with a
//! hand-off.
//!
//! A holder that hears a newer token, or a token of the same round from a
//! lower address, abandons its turn so that at most one turn survives.

use tracing::{debug, info};

use crate::{
    driver::Driver,
    link::Inbound,
    state::{Mark, State, Transition},
    time::{Clock, Deadline, Timestamp},
    traits::{Application, Transport},
    types::NodeId,
    wire::{Message, Tag, echoes_payload},
};

impl<T, C, A> Driver<T, C, A>
where
    T: Transport,
    C: Clock,
    A: Application,
{
    pub(crate) fn send(&mut self, now: Timestamp) -> Transition {
        let payload = self.app.next_payload();
        let body = self.app.seal(payload);

        let timings = &self.node.config.timings;
        self.node.timers.turn = Deadline::after(now, timings.turn_duration);
        self.node.timers.retry = Deadline::after(now, timings.retry_interval);
        self.node.master_node = true;
        self.node.stats.turns_taken += 1;
        self.node.deferred = None;
        self.node.handoff = None;

        let round = self.node.held;
        self.link.send_broadcast(&Message::Data { round, body: body.clone() });
        self.node.outgoing = body;
        info!(node = %self.local(), turn = self.node.stats.turns_taken, round, "turn started");
        Transition::to(State::AwaitAck)
    }

    pub(crate) fn await_ack(&mut self, now: Timestamp) -> Transition {
        let local = self.local();
        if self.node.timers.turn.elapsed(now) {
            debug!(node = %local, "turn elapsed without acknowledgement");
            return Transition::to(State::SendTurn);
        }
        if self.node.timers.retry.elapsed(now) {
            return Transition::to(State::RetrySend);
        }

        let until = self.node.timers.retry.min(self.node.timers.turn);
        let Some(inbound) = self.listen(until, now) else {
            return Transition::to(State::AwaitAck);
        };
        let readmit = self.readmit(&inbound);
        let from = inbound.from;

        match inbound.message {
            Message::Ack(echo) if inbound.to == local => {
                if echoes_payload(&echo, self.node.held, &self.node.outgoing) {
                    self.node.stats.data_acks_received += 1;
                    debug!(node = %local, %from, "payload acknowledged");
                    return Transition::to(State::SendTurn).with_marks(readmit);
                }
                let echoes_data = echo
                    .first()
                    .is_some_and(|&tag| tag == Tag::Data as u8 || tag == Tag::Retry as u8);
                if echoes_data {
                    debug!(
                        node = %local,
                        %from,
                        echo = %hex::encode(&echo),
                        "acknowledgement does not match payload"
                    );
                    return Transition::to(State::RetrySend).with_marks(readmit);
                }
            }
            // Our acknowledgement of this TURN was lost, or its sender is
            // behind; either way it is still waiting for one.
            Message::Turn { target, session, round }
                if target == local && self.node.session == Some(session) =>
            {
                self.node.accept(round);
                self.acknowledge_only(from, inbound.raw);
            }
            Message::Turn { session, round, .. }
                if self.node.session == Some(session) && round > self.node.held =>
            {
                return self.yield_turn(inbound, readmit);
            }
            Message::Data { round, .. } | Message::Retry { round, .. }
                if self.node.table.get(from) && self.outranked(round, from) =>
            {
                return self.yield_turn(inbound, readmit);
            }
            _ => {}
        }
        Transition::to(State::AwaitAck).with_marks(readmit)
    }

    /// Whether another holder's token of `round` beats the local one.
    fn outranked(&self, round: u32, holder: NodeId) -> bool {
        round > self.node.held || (round == self.node.held && holder < self.local())
    }

    /// Gives up the current turn to a competing token.
    fn yield_turn(&mut self, inbound: Inbound, readmit: Option<Mark>) -> Transition {
        info!(
            node = %self.local(),
            other = %inbound.from,
            held = self.node.held,
            "competing token heard, yielding the turn"
        );
        self.node.master_node = false;
        self.node.stats.tokens_yielded += 1;
        self.node.deferred = Some(inbound);
        Transition::to(State::Recv).with_marks(readmit)
    }

    pub(crate) fn retry_send(&mut self, now: Timestamp) -> Transition {
        if self.node.timers.turn.elapsed(now) {
            return Transition::to(State::SendTurn);
        }

        let retry = Message::Retry { round: self.node.held, body: self.node.outgoing.clone() };
        if self.link.send_broadcast(&retry) {
            self.node.stats.retries_sent += 1;
        }
        let interval = self.node.config.timings.retry_interval;
        self.node.timers.retry = Deadline::after(now, interval);
        Transition::to(State::AwaitAck)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::testkit::{Harness, SESSION, node};

    fn holding(payload: &[u8]) -> Harness {
        let mut h = Harness::joined(1, &[1, 2, 3], &[1, 2, 3]);
        h.driver.app.payloads.push_back(payload.to_vec());
        h.force(State::Send);
        h.step();
        assert_eq!(h.driver.state(), &State::AwaitAck);
        h
    }

    #[test]
    fn test_send_broadcasts_payload_and_takes_master() {
        let h = holding(&[0x05, 0x07]);
        assert!(h.driver.is_master());
        assert_eq!(h.driver.stats().turns_taken, 1);
        assert_eq!(h.radio.sent(), vec![(NodeId::BROADCAST, vec![0x00, 0, 0, 0, 0, 0x05, 0x07])]);
    }

    #[test]
    fn test_corrupted_echo_triggers_retry_before_timer() {
        let mut h = holding(&[0x05, 0x07]);
        h.radio.take_sent();

        h.deliver_to(2, 1, &Message::Ack(vec![0x00, 0, 0, 0, 0, 0x05, 0x08]));
        h.step();
        assert_eq!(h.driver.state(), &State::RetrySend);
        assert_eq!(h.driver.stats().data_acks_received, 0);

        h.step();
        assert_eq!(h.driver.state(), &State::AwaitAck);
        let retry = vec![0x01, 0, 0, 0, 0, 0x05, 0x07];
        assert_eq!(h.radio.take_sent(), vec![(NodeId::BROADCAST, retry)]);

        h.deliver_to(2, 1, &Message::Ack(vec![0x01, 0, 0, 0, 0, 0x05, 0x07]));
        h.step();
        assert_eq!(h.driver.state(), &State::SendTurn);
        assert_eq!(h.driver.stats().data_acks_received, 1);
    }

    #[test]
    fn test_matching_echo_ends_turn() {
        let mut h = holding(&[0x05, 0x07]);
        h.deliver_to(3, 1, &Message::Ack(vec![0x00, 0, 0, 0, 0, 0x05, 0x07]));
        h.step();
        assert_eq!(h.driver.state(), &State::SendTurn);

        h.step();
        assert_eq!(h.driver.state(), &State::AwaitTurnAck { successor: node(2) });
        assert!(h.driver.is_master());
    }

    #[test]
    fn test_unrelated_ack_is_ignored() {
        let mut h = holding(&[0x05]);
        let stale_turn = Message::Turn { target: node(1), session: SESSION, round: 0 }.encode();
        h.deliver_to(2, 1, &Message::Ack(stale_turn));
        h.step();
        assert_eq!(h.driver.state(), &State::AwaitAck);
    }

    #[test]
    fn test_retry_timer_rebroadcasts() {
        let mut h = holding(&[0x09]);
        h.advance(h.driver.node.config.timings.retry_interval);
        h.step();
        assert_eq!(h.driver.state(), &State::RetrySend);
        h.step();
        assert_eq!(h.driver.state(), &State::AwaitAck);
        assert_eq!(h.driver.stats().retries_sent, 1);
        assert_eq!(h.radio.sent_tags(), vec![0x00, 0x01]);
    }

    #[test]
    fn test_turn_ends_without_ack_under_total_loss() {
        let mut h = holding(&[0x09]);
        let timings = h.driver.node.config.timings.clone();

        let mut waited = std::time::Duration::ZERO;
        while waited < timings.turn_duration {
            h.advance(timings.retry_interval);
            waited += timings.retry_interval;
            h.step();
            if h.driver.state() == &State::RetrySend {
                h.step();
            }
        }
        assert_eq!(h.driver.state(), &State::SendTurn);
        assert!(h.driver.stats().retries_sent >= 1);
    }

    #[test]
    fn test_duplicate_turn_is_acknowledged_again() {
        let mut h = holding(&[0x09]);
        h.radio.take_sent();
        let turn = Message::Turn { target: node(1), session: SESSION, round: 3 };
        h.deliver(3, &turn);
        h.step();

        assert_eq!(h.driver.state(), &State::AwaitAck);
        assert_eq!(h.radio.sent(), vec![(node(3), Message::Ack(turn.encode()).encode())]);
        assert_eq!(h.driver.node.held, 3);
    }

    #[rstest]
    #[case::newer_round(3, 5, 3, true)]
    #[case::lower_address_same_round(1, 4, 4, true)]
    #[case::higher_address_same_round(3, 4, 4, false)]
    #[case::older_round(1, 3, 4, false)]
    fn holder_meets_competing_data(
        #[case] other: u8,
        #[case] theirs: u32,
        #[case] ours: u32,
        #[case] yields: bool,
    ) {
        let mut h = Harness::joined(2, &[1, 2, 3], &[1, 2, 3]);
        h.driver.node.accept(ours);
        h.driver.app.payloads.push_back(vec![0x09]);
        h.force(State::Send);
        h.step();

        h.deliver(other, &Message::Data { round: theirs, body: vec![0x01] });
        h.step();
        if yields {
            assert_eq!(h.driver.state(), &State::Recv);
            assert!(!h.driver.is_master());
            assert_eq!(h.driver.stats().tokens_yielded, 1);
            // The competing payload is still delivered and acknowledged.
            h.step();
            assert!(matches!(h.driver.state(), State::AckData { to, .. } if *to == node(other)));
        } else {
            assert_eq!(h.driver.state(), &State::AwaitAck);
            assert!(h.driver.is_master());
        }
    }

    #[test]
    fn test_newer_hand_off_elsewhere_ends_turn() {
        let mut h = holding(&[0x09]);
        h.deliver(2, &Message::Turn { target: node(3), session: SESSION, round: 1 });
        h.step();
        assert_eq!(h.driver.state(), &State::Recv);
        assert!(!h.driver.is_master());

        h.step();
        assert_eq!(h.driver.node.last_holder, Some(node(3)));
    }

    #[test]
    fn test_ack_readmits_evicted_peer() {
        let mut h = holding(&[0x05]);
        h.driver.node.table.mark(node(3), false);
        h.deliver_to(3, 1, &Message::Ack(vec![0x00, 0, 0, 0, 0, 0x05]));
        h.step();
        assert!(h.driver.membership().get(node(3)));
        assert_eq!(h.driver.stats().admissions, 1);
    }
}
