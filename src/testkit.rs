//! Single-node test fixtures.

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
    time::Duration,
};

use crate::{
    config::ProtocolConfig,
    driver::Driver,
    sim::SimClock,
    state::State,
    time::{Clock, Timestamp},
    traits::{Application, Frame, Transport},
    types::{NodeId, SessionId, TransportError},
    wire::Message,
};

pub(crate) const SESSION: SessionId = SessionId::new(0x5e55);

pub(crate) const fn node(raw: u8) -> NodeId {
    NodeId::new(raw)
}

#[derive(Debug)]
struct Script {
    inbox: VecDeque<Frame>,
    sent: Vec<(NodeId, Vec<u8>)>,
    fail: bool,
    reports_sender: bool,
}

/// A transport fed and inspected by the test.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedTransport(Rc<RefCell<Script>>);

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(Script {
            inbox: VecDeque::new(),
            sent: Vec::new(),
            fail: false,
            reports_sender: true,
        })))
    }

    pub(crate) fn without_sender(self) -> Self {
        self.0.borrow_mut().reports_sender = false;
        self
    }

    pub(crate) fn push(&self, frame: Frame) {
        self.0.borrow_mut().inbox.push_back(frame);
    }

    pub(crate) fn pending(&self) -> usize {
        self.0.borrow().inbox.len()
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.0.borrow_mut().fail = fail;
    }

    pub(crate) fn sent(&self) -> Vec<(NodeId, Vec<u8>)> {
        self.0.borrow().sent.clone()
    }

    pub(crate) fn take_sent(&self) -> Vec<(NodeId, Vec<u8>)> {
        std::mem::take(&mut self.0.borrow_mut().sent)
    }

    pub(crate) fn sent_tags(&self) -> Vec<u8> {
        self.0.borrow().sent.iter().filter_map(|(_, bytes)| bytes.first().copied()).collect()
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        self.0.borrow().sent.iter().filter_map(|(_, bytes)| Message::decode(bytes).ok()).collect()
    }
}

impl Transport for ScriptedTransport {
    fn reports_sender(&self) -> bool {
        self.0.borrow().reports_sender
    }

    fn send(&mut self, to: NodeId, frame: &[u8]) -> Result<(), TransportError> {
        let mut script = self.0.borrow_mut();
        if script.fail {
            return Err(TransportError::Io("scripted failure".to_string()));
        }
        script.sent.push((to, frame.to_vec()));
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Option<Frame> {
        self.0.borrow_mut().inbox.pop_front()
    }
}

/// Hands out queued payloads, then single-byte ones.
#[derive(Debug, Default)]
pub(crate) struct ScriptedApp {
    pub(crate) payloads: VecDeque<Vec<u8>>,
    pub(crate) delivered: Vec<(NodeId, Vec<u8>)>,
}

impl Application for ScriptedApp {
    fn next_payload(&mut self) -> Vec<u8> {
        self.payloads.pop_front().unwrap_or_else(|| vec![0xAA])
    }

    fn deliver(&mut self, from: NodeId, payload: Vec<u8>) {
        self.delivered.push((from, payload));
    }
}

/// One driver on a scripted radio and a manually advanced clock.
pub(crate) struct Harness {
    pub(crate) driver: Driver<ScriptedTransport, SimClock, ScriptedApp>,
    pub(crate) radio: ScriptedTransport,
    pub(crate) clock: SimClock,
}

impl Harness {
    /// A freshly booted node, about to send its first JOIN_REQUEST.
    pub(crate) fn new(local: u8, universe: &[u8]) -> Self {
        let config = ProtocolConfig::new(node(local), universe.iter().copied().map(node));
        let radio = ScriptedTransport::new();
        let clock = SimClock::new();
        clock.advance(Duration::from_secs(1));
        let driver =
            Driver::with_seed(config, radio.clone(), clock.clone(), ScriptedApp::default(), 7)
                .unwrap();
        Self { driver, radio, clock }
    }

    /// A node that already belongs to [`SESSION`], listening in `Recv`.
    pub(crate) fn joined(local: u8, universe: &[u8], eligible: &[u8]) -> Self {
        let mut harness = Self::new(local, universe);
        for &id in eligible {
            harness.driver.node.table.mark(node(id), true);
        }
        harness.driver.node.session = Some(SESSION);
        harness.force(State::Recv);
        harness
    }

    /// Puts the driver in `state` as if it had just transitioned there.
    pub(crate) fn force(&mut self, state: State) {
        self.driver.node.state = state;
        self.driver.enter();
    }

    pub(crate) fn step(&mut self) {
        self.driver.step();
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Queues a broadcast from `from`.
    pub(crate) fn deliver(&self, from: u8, message: &Message) {
        self.deliver_to(from, NodeId::BROADCAST.get(), message);
    }

    /// Queues a frame from `from` addressed to `to`.
    pub(crate) fn deliver_to(&self, from: u8, to: u8, message: &Message) {
        self.radio.push(Frame { from: Some(node(from)), to: node(to), bytes: message.encode() });
    }
}
