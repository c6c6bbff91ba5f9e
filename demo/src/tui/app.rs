//! TUI application state.

use meshturn::{NodeId, NodeStatus, Simulation};

/// Upper bound on simulation steps per redraw.
const MAX_SPEED: u32 = 256;

/// What one panel shows about a node.
#[derive(Debug, Clone)]
pub struct NodeView {
    /// Radio address.
    pub id: NodeId,
    /// Snapshot of a powered node, `None` while it is off.
    pub status: Option<NodeStatus>,
}

/// Application state for the TUI.
#[derive(Debug)]
pub struct App {
    /// The simulated mesh.
    sim: Simulation,
    /// Simulation steps per redraw.
    speed: u32,
    /// Whether time is frozen.
    paused: bool,
    /// Cached views for rendering.
    views: Vec<NodeView>,
    /// Whether the application should quit.
    should_quit: bool,
}

impl App {
    /// Creates a new application.
    pub fn new(sim: Simulation, speed: u32) -> Self {
        let mut app = Self { sim, speed, paused: false, views: Vec::new(), should_quit: false };
        app.update_views();
        app
    }

    /// Runs one redraw worth of simulation steps, unless paused.
    pub fn advance(&mut self) {
        if !self.paused {
            for _ in 0..self.speed {
                self.sim.step();
            }
        }
        self.update_views();
    }

    /// Refreshes the cached views from the simulation.
    fn update_views(&mut self) {
        self.views = self
            .sim
            .universe()
            .iter()
            .map(|&id| NodeView { id, status: self.sim.status(id) })
            .collect();
    }

    /// Powers the `index`-th node (starting at 1) off, or back on.
    pub fn toggle_power(&mut self, index: usize) {
        let Some(&node) = index.checked_sub(1).and_then(|i| self.sim.universe().get(i)) else {
            return;
        };
        if self.sim.is_powered(node) {
            self.sim.power_off(node);
        } else if self.sim.power_on(node).is_err() {
            return;
        }
        self.update_views();
    }

    /// Freezes or resumes time.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Doubles the simulation steps per redraw.
    pub fn faster(&mut self) {
        self.speed = self.speed.saturating_mul(2).min(MAX_SPEED);
    }

    /// Halves the simulation steps per redraw, down to one.
    pub fn slower(&mut self) {
        self.speed = (self.speed / 2).max(1);
    }

    /// Simulation steps per redraw.
    pub const fn speed(&self) -> u32 {
        self.speed
    }

    /// Returns the cached views.
    pub fn views(&self) -> &[NodeView] {
        &self.views
    }

    /// Returns the simulation.
    pub const fn sim(&self) -> &Simulation {
        &self.sim
    }

    /// Returns whether time is frozen.
    pub const fn paused(&self) -> bool {
        self.paused
    }

    /// Sets the quit flag.
    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Returns whether the application should quit.
    pub const fn should_quit(&self) -> bool {
        self.should_quit
    }
}

#[cfg(test)]
mod tests {
    use meshturn::Timings;

    use super::*;

    fn app() -> App {
        let mut sim = Simulation::new((1..=3).map(NodeId::new), Timings::default(), 5);
        for id in 1..=3 {
            sim.power_on(NodeId::new(id)).unwrap();
        }
        App::new(sim, 2)
    }

    #[test]
    fn test_toggle_power() {
        let mut app = app();
        assert!(app.views()[1].status.is_some());

        app.toggle_power(2);
        assert!(app.views()[1].status.is_none());
        assert!(!app.sim().is_powered(NodeId::new(2)));

        app.toggle_power(2);
        assert!(app.sim().is_powered(NodeId::new(2)));
    }

    #[test]
    fn test_toggle_power_out_of_range() {
        let mut app = app();
        app.toggle_power(0);
        app.toggle_power(4);
        assert_eq!(app.views().iter().filter(|view| view.status.is_some()).count(), 3);
    }

    #[test]
    fn test_pause_freezes_time() {
        let mut app = app();
        app.advance();
        let before = app.sim().now();

        app.toggle_pause();
        app.advance();
        assert_eq!(app.sim().now(), before);

        app.toggle_pause();
        app.advance();
        assert!(app.sim().now() > before);
    }
}
