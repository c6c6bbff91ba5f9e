//! State machine driver.
//!
//! The [`Driver`] owns one node's state and runs exactly one handler per
//! iteration. Handlers live next to the protocol they implement:
//!
//! - `join.rs`: admission of new nodes
//! - `transmit.rs`: the holder's send and acknowledge cycle
//! - `turn.rs`: listening, token hand-off and failure recovery

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};

use crate::{
    config::ProtocolConfig,
    link::{Inbound, Link},
    membership::MembershipTable,
    state::{Mark, NodeState, NodeStatus, State, Stats, Transition},
    time::{Clock, Deadline, Timestamp},
    traits::{Application, Transport},
    types::{ConfigError, NodeId, SessionId},
};

/// Single-threaded driver for one protocol participant.
///
/// # Type Parameters
///
/// * `T` - The radio, must implement [`Transport`]
/// * `C` - The time source, must implement [`Clock`]
/// * `A` - The payload producer and consumer, must implement [`Application`]
///
/// # Example
///
/// ```ignore
/// use meshturn::{Driver, NodeId, ProtocolConfig, SystemClock};
///
/// let config = ProtocolConfig::new(NodeId::new(1), (1..=4).map(NodeId::new));
/// let mut driver = Driver::new(config, radio, SystemClock::new(), app)?;
///
/// let shutdown = AtomicBool::new(false);
/// driver.run(&shutdown, |driver| println!("{}", driver.state()));
/// ```
#[derive(Debug)]
pub struct Driver<T, C, A> {
    pub(crate) node: NodeState,
    pub(crate) link: Link<T>,
    pub(crate) clock: C,
    pub(crate) app: A,
}

impl<T, C, A> Driver<T, C, A>
where
    T: Transport,
    C: Clock,
    A: Application,
{
    /// Creates a driver seeded from system entropy.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn new(
        config: ProtocolConfig,
        transport: T,
        clock: C,
        app: A,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(config, transport, clock, app, StdRng::from_entropy())
    }

    /// Creates a driver with a reproducible random sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn with_seed(
        config: ProtocolConfig,
        transport: T,
        clock: C,
        app: A,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(config, transport, clock, app, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        config: ProtocolConfig,
        transport: T,
        clock: C,
        app: A,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let link = Link::new(
            transport,
            config.node,
            config.universe.iter().copied(),
            config.timings.send_complete_timeout,
        );
        Ok(Self { node: NodeState::new(config, rng), link, clock, app })
    }

    /// Runs one iteration: one handler, at most one inbound and one outbound
    /// frame.
    pub fn step(&mut self) {
        let now = self.clock.now();
        let transition = match self.node.state.clone() {
            State::JoinSend => self.join_send(now),
            State::JoinAwaitAck => self.join_await_ack(now),
            State::CreateNetwork => self.create_network(),
            State::JoinSendAck { joiner } => self.join_send_ack(joiner, now),
            State::Alone => self.alone(now),
            State::Recv => self.recv(now),
            State::AckData { to, echo } => self.ack_data(to, echo, now),
            State::RecvTurn { from, echo } => self.recv_turn(from, echo),
            State::Send => self.send(now),
            State::AwaitAck => self.await_ack(now),
            State::RetrySend => self.retry_send(now),
            State::SendTurn => self.send_turn(now),
            State::AwaitTurnAck { successor } => self.await_turn_ack(successor, now),
        };
        self.apply(transition);
    }

    /// Steps until `shutdown` is set, calling `observe` after every
    /// iteration.
    ///
    /// The flag is only checked between iterations, so a handler is never
    /// interrupted halfway through a membership update.
    pub fn run(&mut self, shutdown: &AtomicBool, mut observe: impl FnMut(&Self)) {
        info!(node = %self.local(), "protocol loop starting");
        while !shutdown.load(Ordering::Relaxed) {
            self.step();
            observe(self);
        }
        info!(node = %self.local(), state = %self.node.state, "protocol loop stopped");
    }

    /// Current state.
    pub const fn state(&self) -> &State {
        &self.node.state
    }

    /// Whether this node holds the token or awaits its hand-off
    /// acknowledgement.
    pub const fn is_master(&self) -> bool {
        self.node.master_node
    }

    /// Local membership view.
    pub const fn membership(&self) -> &MembershipTable {
        &self.node.table
    }

    /// Network instance, once joined or created.
    pub const fn session(&self) -> Option<SessionId> {
        self.node.session
    }

    /// Running counters.
    pub const fn stats(&self) -> &Stats {
        &self.node.stats
    }

    /// Status snapshot.
    pub fn status(&self) -> NodeStatus {
        self.node.status()
    }

    /// The application.
    pub const fn app(&self) -> &A {
        &self.app
    }

    /// The transport.
    pub const fn transport(&self) -> &T {
        self.link.transport()
    }

    pub(crate) const fn local(&self) -> NodeId {
        self.node.local()
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Receives at most one frame, waiting no longer than `until` and never
    /// longer than the poll interval.
    pub(crate) fn listen(&mut self, until: Deadline, now: Timestamp) -> Option<Inbound> {
        let timeout = until.remaining(now).min(self.node.config.timings.poll_interval);
        self.link.await_message(timeout)
    }

    /// Parks a frame that arrived while an acknowledgement was pending.
    pub(crate) fn defer(&mut self, inbound: Inbound) {
        if self.node.deferred.is_some() {
            self.node.stats.frames_dropped += 1;
            debug!(
                node = %self.local(),
                from = %inbound.from,
                message = %inbound.message,
                "busy, frame dropped"
            );
            return;
        }
        self.node.deferred = Some(inbound);
    }

    pub(crate) fn jitter(&mut self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.node.rng.gen_range(0..=max_ms))
    }

    /// Applies a handler's result and arms the entry timers of a new state.
    fn apply(&mut self, transition: Transition) {
        let local = self.local();
        for Mark { node, eligible } in transition.marks {
            if !self.node.table.mark(node, eligible) || node == local {
                continue;
            }
            if eligible {
                self.node.stats.admissions += 1;
                info!(node = %local, peer = %node, "peer admitted");
            } else {
                self.node.stats.evictions += 1;
                warn!(node = %local, peer = %node, "peer evicted");
            }
        }

        if transition.next == self.node.state {
            return;
        }
        debug!(node = %local, from = %self.node.state, to = %transition.next, "transition");
        self.node.state = transition.next;
        self.enter();
    }

    /// Arms the timers a state relies on from its first iteration.
    pub(crate) fn enter(&mut self) {
        let now = self.now();
        let local = self.local();
        let timings = self.node.config.timings.clone();
        match self.node.state.clone() {
            State::Recv => {
                self.node.timers.watchdog = Deadline::after(now, timings.watchdog_interval);
            }
            State::Alone => {
                let spread = self.jitter(timings.join_resend_interval);
                self.node.timers.rescan = Deadline::after(now, timings.watchdog_interval + spread);
            }
            State::AckData { .. } => {
                let delay = self.jitter(timings.ack_jitter);
                self.node.timers.reply = Deadline::after(now, delay);
            }
            State::JoinSendAck { joiner } => {
                // A lone node has nobody to collide with.
                let crowded = self.node.table.any_eligible_other_than(&[local, joiner]);
                let delay = if crowded { self.jitter(timings.ack_jitter) } else { Duration::ZERO };
                self.node.timers.reply = Deadline::after(now, delay);
            }
            _ => {}
        }
    }
}
