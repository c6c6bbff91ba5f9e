//! Meshturn demo binary with TUI visualization.
#![allow(unreachable_pub, dead_code, clippy::missing_const_for_fn)]
//!
//! This demo runs a simulated mesh of up to six nodes on a lossy shared
//! medium and shows every node's protocol state in a terminal UI. Nodes can
//! be powered off and on to watch eviction, watchdog recovery and rejoin.

mod config;
mod tui;

use clap::Parser;
use meshturn::{NodeId, Simulation, Timings};

use crate::{config::DemoConfig, tui::App};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = DemoConfig::parse();

    // Build the simulated mesh and power every node
    let universe: Vec<NodeId> = (1..=config.nodes).map(NodeId::new).collect();
    let mut sim = Simulation::new(universe.iter().copied(), Timings::default(), config.seed)
        .with_loss(config.loss)
        .with_tick(config.tick());
    for &node in &universe {
        sim.power_on(node)?;
    }

    // Run TUI
    let app = App::new(sim, config.speed);
    tui::run(app)?;

    Ok(())
}
