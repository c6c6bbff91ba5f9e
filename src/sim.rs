//! Deterministic multi-node simulation.
//!
//! Every node runs an ordinary [`Driver`] on a [`SimRadio`]. All radios
//! share one lossy broadcast [`Medium`] and all drivers share one
//! [`SimClock`]. [`Simulation::step`] steps each powered node once and then
//! advances the clock by one tick, so a run is fully determined by its seed.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
    time::Duration,
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    config::{ProtocolConfig, Timings},
    driver::Driver,
    state::NodeStatus,
    time::{Clock, Timestamp},
    traits::{Application, Frame, Transport},
    types::{ConfigError, NodeId, TransportError},
};

/// Virtual clock shared by every node of a simulation.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<Timestamp>>);

impl SimClock {
    /// Creates a clock at [`Timestamp::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        self.0.get()
    }
}

/// One transmission on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Time of transmission.
    pub at: Timestamp,
    /// Transmitting node.
    pub from: NodeId,
    /// Destination address.
    pub to: NodeId,
    /// Frame contents.
    pub bytes: Vec<u8>,
}

type DropFilter = Box<dyn FnMut(&Envelope, NodeId) -> bool>;

/// Clamps a loss setting into a usable probability. NaN means no loss.
fn probability(loss: f64) -> f64 {
    if loss.is_nan() { 0.0 } else { loss.clamp(0.0, 1.0) }
}

struct Air {
    clock: SimClock,
    inboxes: BTreeMap<NodeId, VecDeque<Frame>>,
    loss: f64,
    rng: StdRng,
    filter: Option<DropFilter>,
    log: Option<Vec<Envelope>>,
}

/// Shared broadcast medium.
///
/// Every transmission reaches every attached node except the sender, each
/// copy lost independently with the configured probability. A drop filter
/// can additionally discard copies by content and receiver.
#[derive(Clone)]
pub struct Medium(Rc<RefCell<Air>>);

impl fmt::Debug for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let air = self.0.borrow();
        f.debug_struct("Medium")
            .field("attached", &air.inboxes.keys().collect::<Vec<_>>())
            .field("loss", &air.loss)
            .finish_non_exhaustive()
    }
}

impl Medium {
    /// Creates an empty medium.
    pub fn new(clock: SimClock, loss: f64, seed: u64) -> Self {
        Self(Rc::new(RefCell::new(Air {
            clock,
            inboxes: BTreeMap::new(),
            loss: probability(loss),
            rng: StdRng::seed_from_u64(seed),
            filter: None,
            log: None,
        })))
    }

    /// Returns a radio for `node`. The radio hears nothing until the node is
    /// attached.
    pub fn radio(&self, node: NodeId) -> SimRadio {
        SimRadio { medium: self.clone(), node }
    }

    /// Powers a node's radio up with an empty inbox.
    pub fn attach(&self, node: NodeId) {
        self.0.borrow_mut().inboxes.insert(node, VecDeque::new());
    }

    /// Powers a node's radio down, discarding whatever it had not read.
    pub fn detach(&self, node: NodeId) {
        self.0.borrow_mut().inboxes.remove(&node);
    }

    /// Whether `node` is attached.
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.0.borrow().inboxes.contains_key(&node)
    }

    /// Per-copy loss probability.
    pub fn loss(&self) -> f64 {
        self.0.borrow().loss
    }

    /// Changes the per-copy loss probability.
    pub fn set_loss(&self, loss: f64) {
        self.0.borrow_mut().loss = probability(loss);
    }

    /// Installs a filter called for every copy with its receiver. Copies for
    /// which it returns true are dropped.
    pub fn set_drop_filter(&self, filter: impl FnMut(&Envelope, NodeId) -> bool + 'static) {
        self.0.borrow_mut().filter = Some(Box::new(filter));
    }

    /// Starts logging every transmission, discarding any earlier log.
    pub fn record(&self) {
        self.0.borrow_mut().log = Some(Vec::new());
    }

    /// Transmissions logged since [`Medium::record`].
    pub fn frames(&self) -> Vec<Envelope> {
        self.0.borrow().log.clone().unwrap_or_default()
    }

    fn transmit(&self, from: NodeId, to: NodeId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut air = self.0.borrow_mut();
        if !air.inboxes.contains_key(&from) {
            return Err(TransportError::Detached);
        }

        let envelope = Envelope { at: air.clock.now(), from, to, bytes: bytes.to_vec() };
        let Air { inboxes, loss, rng, filter, log, .. } = &mut *air;
        for (&receiver, inbox) in inboxes.iter_mut() {
            if receiver == from {
                continue;
            }
            if filter.as_mut().is_some_and(|reject| reject(&envelope, receiver)) {
                continue;
            }
            if *loss > 0.0 && rng.gen_bool(*loss) {
                continue;
            }
            inbox.push_back(Frame { from: Some(from), to, bytes: envelope.bytes.clone() });
        }
        if let Some(log) = log {
            log.push(envelope);
        }
        Ok(())
    }

    fn pop(&self, node: NodeId) -> Option<Frame> {
        self.0.borrow_mut().inboxes.get_mut(&node)?.pop_front()
    }
}

/// A node's radio on a [`Medium`].
#[derive(Debug, Clone)]
pub struct SimRadio {
    medium: Medium,
    node: NodeId,
}

impl Transport for SimRadio {
    fn send(&mut self, to: NodeId, frame: &[u8]) -> Result<(), TransportError> {
        self.medium.transmit(self.node, to, frame)
    }

    /// Returns immediately: virtual time only moves between ticks.
    fn receive(&mut self, _timeout: Duration) -> Option<Frame> {
        self.medium.pop(self.node)
    }
}

/// Application that broadcasts `[node, seq_lo, seq_hi]` and records what it
/// receives.
#[derive(Debug, Clone, Default)]
pub struct SimApp {
    node: NodeId,
    seq: u16,
    delivered: Vec<(NodeId, Vec<u8>)>,
}

impl SimApp {
    /// Creates the application of `node`.
    pub fn new(node: NodeId) -> Self {
        Self { node, ..Self::default() }
    }

    /// Payloads received so far, with their senders.
    pub fn delivered(&self) -> &[(NodeId, Vec<u8>)] {
        &self.delivered
    }
}

impl Application for SimApp {
    fn next_payload(&mut self) -> Vec<u8> {
        let [lo, hi] = self.seq.to_le_bytes();
        self.seq = self.seq.wrapping_add(1);
        vec![self.node.get(), lo, hi]
    }

    fn deliver(&mut self, from: NodeId, payload: Vec<u8>) {
        self.delivered.push((from, payload));
    }
}

/// Driver type used by [`Simulation`].
pub type SimDriver = Driver<SimRadio, SimClock, SimApp>;

/// A set of nodes sharing a medium and a clock.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use meshturn::{NodeId, Simulation, Timings};
///
/// let mut sim = Simulation::new((1..=3).map(NodeId::new), Timings::default(), 42);
/// for id in 1..=3 {
///     sim.power_on(NodeId::new(id)).unwrap();
/// }
/// sim.run_for(Duration::from_secs(5));
/// assert_eq!(sim.statuses().len(), 3);
/// ```
#[derive(Debug)]
pub struct Simulation {
    universe: Vec<NodeId>,
    timings: Timings,
    clock: SimClock,
    medium: Medium,
    tick: Duration,
    seeds: StdRng,
    nodes: BTreeMap<NodeId, SimDriver>,
}

impl Simulation {
    /// Default virtual time per step.
    pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

    /// Creates a lossless simulation with every node powered off.
    pub fn new(universe: impl IntoIterator<Item = NodeId>, timings: Timings, seed: u64) -> Self {
        let clock = SimClock::new();
        let mut seeds = StdRng::seed_from_u64(seed);
        let medium = Medium::new(clock.clone(), 0.0, seeds.gen());
        Self {
            universe: universe.into_iter().collect(),
            timings,
            clock,
            medium,
            tick: Self::DEFAULT_TICK,
            seeds,
            nodes: BTreeMap::new(),
        }
    }

    /// Sets the per-copy loss probability.
    pub fn with_loss(self, loss: f64) -> Self {
        self.medium.set_loss(loss);
        self
    }

    /// Sets the virtual time per step.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Boots `node` with a fresh driver. A node that is already powered is
    /// rebooted.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `node` is not part of the universe.
    pub fn power_on(&mut self, node: NodeId) -> Result<(), ConfigError> {
        let config = ProtocolConfig::new(node, self.universe.iter().copied())
            .with_timings(self.timings.clone());
        let driver = Driver::with_seed(
            config,
            self.medium.radio(node),
            self.clock.clone(),
            SimApp::new(node),
            self.seeds.gen(),
        )?;
        self.medium.attach(node);
        self.nodes.insert(node, driver);
        Ok(())
    }

    /// Cuts power to `node`. Its state is lost.
    pub fn power_off(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        self.medium.detach(node);
    }

    /// Whether `node` is powered.
    pub fn is_powered(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Steps every powered node once, then advances the clock by one tick.
    pub fn step(&mut self) {
        for driver in self.nodes.values_mut() {
            driver.step();
        }
        self.clock.advance(self.tick);
    }

    /// Steps for `duration` of virtual time.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now() + duration;
        while self.now() < end {
            self.step();
        }
    }

    /// Steps until `done` holds or `limit` of virtual time has passed.
    /// Returns whether `done` held.
    pub fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let end = self.now() + limit;
        while !done(self) {
            if self.now() >= end {
                return false;
            }
            self.step();
        }
        true
    }

    /// Driver of a powered node.
    pub fn driver(&self, node: NodeId) -> Option<&SimDriver> {
        self.nodes.get(&node)
    }

    /// Status of a powered node.
    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&node).map(Driver::status)
    }

    /// Status of every powered node, in id order.
    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.nodes.values().map(Driver::status).collect()
    }

    /// Powered nodes currently flagged as master.
    pub fn masters(&self) -> Vec<NodeId> {
        self.nodes.iter().filter(|(_, driver)| driver.is_master()).map(|(id, _)| *id).collect()
    }

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Virtual time per step.
    pub const fn tick(&self) -> Duration {
        self.tick
    }

    /// The shared medium.
    pub const fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Every node id that may be powered.
    pub fn universe(&self) -> &[NodeId] {
        &self.universe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Message;

    fn ids(raw: &[u8]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn test_medium_broadcasts_to_attached_nodes_only() {
        let medium = Medium::new(SimClock::new(), 0.0, 1);
        for id in [1, 2, 3] {
            medium.attach(NodeId::new(id));
        }
        medium.detach(NodeId::new(3));

        let mut one = medium.radio(NodeId::new(1));
        let mut two = medium.radio(NodeId::new(2));
        let mut three = medium.radio(NodeId::new(3));
        one.send(NodeId::BROADCAST, &[7]).unwrap();

        assert_eq!(one.receive(Duration::ZERO), None);
        assert_eq!(
            two.receive(Duration::ZERO),
            Some(Frame { from: Some(NodeId::new(1)), to: NodeId::BROADCAST, bytes: vec![7] })
        );
        assert_eq!(three.receive(Duration::ZERO), None);
        assert_eq!(three.send(NodeId::BROADCAST, &[1]), Err(TransportError::Detached));
    }

    #[test]
    fn test_drop_filter_and_log() {
        let medium = Medium::new(SimClock::new(), 0.0, 1);
        medium.attach(NodeId::new(1));
        medium.attach(NodeId::new(2));
        medium.record();
        medium.set_drop_filter(|envelope, _| envelope.bytes.first() == Some(&0x02));

        let mut one = medium.radio(NodeId::new(1));
        let mut two = medium.radio(NodeId::new(2));
        one.send(NodeId::new(2), &[0x02, 0x00]).unwrap();
        one.send(NodeId::new(2), &[0x00]).unwrap();

        assert_eq!(two.receive(Duration::ZERO).map(|frame| frame.bytes), Some(vec![0x00]));
        assert_eq!(two.receive(Duration::ZERO), None);
        assert_eq!(medium.frames().len(), 2);
    }

    #[test]
    fn test_loss_setting_is_kept_a_probability() {
        let medium = Medium::new(SimClock::new(), f64::NAN, 1);
        assert_eq!(medium.loss(), 0.0);
        medium.set_loss(f64::INFINITY);
        assert_eq!(medium.loss(), 1.0);
        medium.set_loss(-0.5);
        assert_eq!(medium.loss(), 0.0);
        medium.set_loss(f64::NAN);
        assert_eq!(medium.loss(), 0.0);

        medium.attach(NodeId::new(1));
        medium.attach(NodeId::new(2));
        medium.radio(NodeId::new(1)).send(NodeId::BROADCAST, &[0]).unwrap();
        assert!(medium.radio(NodeId::new(2)).receive(Duration::ZERO).is_some());
    }

    #[test]
    fn test_total_loss_drops_everything() {
        let medium = Medium::new(SimClock::new(), 1.0, 1);
        medium.attach(NodeId::new(1));
        medium.attach(NodeId::new(2));
        medium.radio(NodeId::new(1)).send(NodeId::BROADCAST, &[0]).unwrap();
        assert_eq!(medium.radio(NodeId::new(2)).receive(Duration::ZERO), None);
    }

    #[test]
    fn test_sim_app_payloads_count_up() {
        let mut app = SimApp::new(NodeId::new(4));
        assert_eq!(app.next_payload(), vec![4, 0, 0]);
        assert_eq!(app.next_payload(), vec![4, 1, 0]);
        app.deliver(NodeId::new(2), vec![2, 0, 0]);
        assert_eq!(app.delivered(), &[(NodeId::new(2), vec![2, 0, 0])]);
    }

    #[test]
    fn test_power_on_rejects_foreign_node() {
        let mut sim = Simulation::new(ids(&[1, 2]), Timings::default(), 1);
        assert_eq!(
            sim.power_on(NodeId::new(9)),
            Err(ConfigError::LocalNotInUniverse(NodeId::new(9)))
        );
        assert!(!sim.is_powered(NodeId::new(9)));
    }

    #[test]
    fn test_single_node_creates_network() {
        let mut sim = Simulation::new(ids(&[1, 2]), Timings::default(), 3);
        sim.power_on(NodeId::new(1)).unwrap();
        sim.medium().record();

        let alone = sim.run_until(Duration::from_secs(30), |sim| {
            sim.status(NodeId::new(1)).is_some_and(|status| status.state == "Alone")
        });
        assert!(alone);

        let requests = sim
            .medium()
            .frames()
            .iter()
            .filter(|envelope| {
                Message::decode(&envelope.bytes)
                    == Ok(Message::JoinRequest { joiner: NodeId::new(1) })
            })
            .count();
        assert_eq!(requests, 4);
        assert!(sim.masters().is_empty());
    }

    #[test]
    fn test_power_off_detaches_radio() {
        let mut sim = Simulation::new(ids(&[1, 2]), Timings::default(), 3);
        sim.power_on(NodeId::new(2)).unwrap();
        sim.step();
        sim.power_off(NodeId::new(2));
        assert!(!sim.medium().is_attached(NodeId::new(2)));
        assert!(sim.status(NodeId::new(2)).is_none());
        assert_eq!(sim.now(), Timestamp::ZERO + sim.tick());
    }
}
