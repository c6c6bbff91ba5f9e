//! CLI configuration for the demo binary.

use std::time::Duration;

use clap::Parser;

/// CLI arguments for the demo.
#[derive(Debug, Parser)]
#[command(name = "demo")]
#[command(about = "Simulated meshturn radio mesh in the terminal")]
pub struct DemoConfig {
    /// Number of nodes in the mesh.
    #[arg(short, long, default_value = "4", value_parser = clap::value_parser!(u8).range(2..=6))]
    pub nodes: u8,

    /// Probability that a frame copy is lost on the way to one receiver.
    #[arg(short, long, default_value = "0.05", value_parser = parse_loss)]
    pub loss: f64,

    /// Virtual time per simulation step in milliseconds.
    #[arg(short, long, default_value = "50")]
    pub tick_ms: u64,

    /// Simulation steps per redraw.
    #[arg(short, long, default_value = "4")]
    pub speed: u32,

    /// Seed for every random choice in the simulation.
    #[arg(long, default_value = "1")]
    pub seed: u64,
}

impl DemoConfig {
    /// Returns the simulation tick as a Duration.
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Parses a loss probability, rejecting anything outside `0.0..=1.0`.
fn parse_loss(raw: &str) -> Result<f64, String> {
    let loss: f64 = raw.parse().map_err(|err| format!("{err}"))?;
    if !(0.0..=1.0).contains(&loss) {
        return Err(format!("loss probability {loss} is not between 0 and 1"));
    }
    Ok(loss)
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { nodes: 4, loss: 0.05, tick_ms: 50, speed: 4, seed: 1 }
    }
}
