//! Configuration for the meshturn node binary.
//!
//! Supports loading configuration from TOML files, environment variables,
//! or CLI arguments.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use meshturn::{NodeId, ProtocolConfig, Timings};
use serde::{Deserialize, Serialize};

/// CLI arguments for meshturn-node.
#[derive(Debug, Parser)]
#[command(name = "meshturn-node")]
#[command(about = "Token-passing radio mesh node over emulated UDP links")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "MESHTURN_CONFIG")]
    pub config: Option<String>,

    /// This node's radio address.
    #[arg(long, env = "MESHTURN_NODE")]
    pub node: Option<u8>,

    /// Comma-separated list of every address that may join the mesh.
    #[arg(long, env = "MESHTURN_UNIVERSE", value_delimiter = ',')]
    pub universe: Vec<u8>,

    /// Host the emulated radios listen on.
    #[arg(long, env = "MESHTURN_BIND_HOST")]
    pub bind_host: Option<String>,

    /// Node `n` listens on `base_port + n`.
    #[arg(long, env = "MESHTURN_BASE_PORT")]
    pub base_port: Option<u16>,

    /// Address of the HTTP status server.
    #[arg(long, env = "MESHTURN_STATUS_ADDR")]
    pub status_addr: Option<SocketAddr>,

    /// Probability of dropping a received frame, between 0 and 1.
    #[arg(long, env = "MESHTURN_LOSS")]
    pub loss: Option<f64>,

    /// Directory for received telemetry records.
    #[arg(long, env = "MESHTURN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Configuration for a meshturn node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node's radio address.
    pub node: u8,

    /// Every address that may join the mesh.
    pub universe: Vec<u8>,

    /// Host the emulated radios listen on.
    pub bind_host: String,

    /// Node `n` listens on `base_port + n`.
    pub base_port: u16,

    /// Address of the HTTP status server.
    pub status_addr: SocketAddr,

    /// Probability of dropping a received frame.
    pub loss: f64,

    /// Directory for received telemetry records. Nothing is written when
    /// unset.
    pub data_dir: Option<PathBuf>,

    /// JOIN_REQUEST re-sends before creating a new network.
    pub max_join_retries: u32,

    /// TURN re-sends before the successor is evicted.
    pub max_turn_ack_retries: u32,

    /// Longest time a holder waits for a data acknowledgement.
    pub turn_duration_ms: u64,

    /// Interval between DATA re-broadcasts.
    pub retry_interval_ms: u64,

    /// Interval between JOIN_REQUEST broadcasts.
    pub join_resend_interval_ms: u64,

    /// Interval between TURN re-sends.
    pub turn_ack_retry_interval_ms: u64,

    /// Silence after which the holder is presumed dead.
    pub watchdog_interval_ms: u64,

    /// Upper bound of the delay before acknowledging a broadcast.
    pub ack_jitter_ms: u64,

    /// Longest single blocking receive.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let timings = Timings::default();
        Self {
            node: 1,
            universe: vec![1, 2, 3, 4],
            bind_host: "127.0.0.1".to_string(),
            base_port: 47_000,
            status_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            loss: 0.0,
            data_dir: None,
            max_join_retries: 3,
            max_turn_ack_retries: 3,
            turn_duration_ms: millis(timings.turn_duration),
            retry_interval_ms: millis(timings.retry_interval),
            join_resend_interval_ms: millis(timings.join_resend_interval),
            turn_ack_retry_interval_ms: millis(timings.turn_ack_retry_interval),
            watchdog_interval_ms: millis(timings.watchdog_interval),
            ack_jitter_ms: millis(timings.ack_jitter),
            poll_interval_ms: millis(timings.poll_interval),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load configuration from CLI arguments, optionally overriding a config file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        let mut config =
            if let Some(ref path) = cli.config { Self::from_file(path)? } else { Self::default() };
        config.apply(cli);
        config.protocol()?;

        Ok(config)
    }

    /// CLI args override config file values.
    fn apply(&mut self, cli: Cli) {
        if let Some(node) = cli.node {
            self.node = node;
        }
        if !cli.universe.is_empty() {
            self.universe = cli.universe;
        }
        if let Some(bind_host) = cli.bind_host {
            self.bind_host = bind_host;
        }
        if let Some(base_port) = cli.base_port {
            self.base_port = base_port;
        }
        if let Some(status_addr) = cli.status_addr {
            self.status_addr = status_addr;
        }
        if let Some(loss) = cli.loss {
            self.loss = loss;
        }
        if cli.data_dir.is_some() {
            self.data_dir = cli.data_dir;
        }
    }

    /// Builds and validates the protocol configuration.
    pub fn protocol(&self) -> Result<ProtocolConfig, ConfigError> {
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(ConfigError::Loss(self.loss));
        }

        let timings = Timings {
            turn_duration: Duration::from_millis(self.turn_duration_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            join_resend_interval: Duration::from_millis(self.join_resend_interval_ms),
            turn_ack_retry_interval: Duration::from_millis(self.turn_ack_retry_interval_ms),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms),
            ack_jitter: Duration::from_millis(self.ack_jitter_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..Timings::default()
        };
        let mut protocol = ProtocolConfig::new(
            NodeId::new(self.node),
            self.universe.iter().copied().map(NodeId::new),
        )
        .with_timings(timings);
        protocol.max_join_retries = self.max_join_retries;
        protocol.max_turn_ack_retries = self.max_turn_ack_retries;

        protocol.validate()?;
        Ok(protocol)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse configuration file.
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),

    /// Loss probability outside `0..=1`.
    #[error("loss probability {0} is not between 0 and 1")]
    Loss(f64),

    /// The protocol settings are inconsistent.
    #[error("invalid protocol settings: {0}")]
    Protocol(#[from] meshturn::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("meshturn-node").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node, 1);
        assert_eq!(config.universe, vec![1, 2, 3, 4]);
        assert_eq!(config.status_addr.to_string(), "127.0.0.1:8080");
        assert!(config.data_dir.is_none());
        assert_eq!(config.turn_duration_ms, 8_000);
        assert!(config.protocol().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = Config {
            node: 3,
            universe: vec![1, 3, 5],
            loss: 0.25,
            data_dir: Some(PathBuf::from("/tmp/mesh")),
            watchdog_interval_ms: 40_000,
            ..Config::default()
        };

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("node = 2\nuniverse = [1, 2]\n").unwrap();
        assert_eq!(parsed.node, 2);
        assert_eq!(parsed.universe, vec![1, 2]);
        assert_eq!(parsed.base_port, Config::default().base_port);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.apply(cli(&["--node", "4", "--universe", "2,4,6", "--loss", "0.1"]));
        assert_eq!(config.node, 4);
        assert_eq!(config.universe, vec![2, 4, 6]);
        assert!((config.loss - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.base_port, 47_000);
    }

    #[test]
    fn test_rejects_node_outside_universe() {
        let config = Config { node: 9, ..Config::default() };
        assert!(matches!(config.protocol(), Err(ConfigError::Protocol(_))));
    }

    #[test]
    fn test_rejects_bad_loss() {
        let config = Config { loss: 1.5, ..Config::default() };
        assert!(matches!(config.protocol(), Err(ConfigError::Loss(_))));
    }
}
