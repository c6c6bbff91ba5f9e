//! Protocol configuration.
//!
//! Everything that differs between deployed nodes lives here: the local
//! address, the universe of possible addresses and the timer budgets. The
//! protocol logic itself is identical on every node.

use std::{collections::BTreeSet, time::Duration};

use crate::types::{ConfigError, NodeId};

/// Largest universe a JOIN_ACK frame is allowed to enumerate.
pub const MAX_UNIVERSE: usize = 16;

/// Timer budgets for every protocol.
///
/// Turn duration always dominates the data retry interval so that a turn
/// ends even under total packet loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Longest time a holder waits for a data acknowledgement.
    pub turn_duration: Duration,
    /// Interval between DATA re-broadcasts inside one turn.
    pub retry_interval: Duration,
    /// Interval between JOIN_REQUEST broadcasts.
    pub join_resend_interval: Duration,
    /// Interval between TURN re-sends while awaiting the turn acknowledgement.
    pub turn_ack_retry_interval: Duration,
    /// Silence after which a listening node assumes the holder vanished.
    pub watchdog_interval: Duration,
    /// Upper bound of the random delay before acknowledging a broadcast.
    pub ack_jitter: Duration,
    /// Upper bound for waiting on a transmission to leave the radio.
    pub send_complete_timeout: Duration,
    /// Longest single blocking receive.
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            turn_duration: Duration::from_secs(8),
            retry_interval: Duration::from_secs(2),
            join_resend_interval: Duration::from_secs(3),
            turn_ack_retry_interval: Duration::from_millis(1500),
            watchdog_interval: Duration::from_secs(30),
            ack_jitter: Duration::from_millis(500),
            send_complete_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Configuration for one protocol participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// This node's address.
    pub node: NodeId,
    /// Every address that may ever take part in the network.
    pub universe: Vec<NodeId>,
    /// Timer budgets.
    pub timings: Timings,
    /// JOIN_REQUEST re-sends before creating a new network.
    pub max_join_retries: u32,
    /// TURN re-sends before the successor is evicted.
    pub max_turn_ack_retries: u32,
}

impl ProtocolConfig {
    /// Creates a configuration with default timings.
    pub fn new(node: NodeId, universe: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            node,
            universe: universe.into_iter().collect(),
            timings: Timings::default(),
            max_join_retries: 3,
            max_turn_ack_retries: 3,
        }
    }

    /// Replaces the timings.
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Longest silence a healthy holder can produce: a full turn, every TURN
    /// attempt towards one successor, and the jitter of the last ack.
    pub fn turn_cycle(&self) -> Duration {
        let t = &self.timings;
        t.turn_duration
            + t.turn_ack_retry_interval * (self.max_turn_ack_retries + 1)
            + t.ack_jitter
    }

    /// Checks the configuration before the node enters its main loop.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.universe.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        if self.universe.len() > MAX_UNIVERSE {
            return Err(ConfigError::UniverseTooLarge {
                max: MAX_UNIVERSE,
                got: self.universe.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for &id in &self.universe {
            if id.is_broadcast() {
                return Err(ConfigError::BroadcastInUniverse);
            }
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateNode(id));
            }
        }
        if !seen.contains(&self.node) {
            return Err(ConfigError::LocalNotInUniverse(self.node));
        }

        let t = &self.timings;
        for (name, value) in [
            ("turn_duration", t.turn_duration),
            ("retry_interval", t.retry_interval),
            ("join_resend_interval", t.join_resend_interval),
            ("turn_ack_retry_interval", t.turn_ack_retry_interval),
            ("watchdog_interval", t.watchdog_interval),
            ("poll_interval", t.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if t.retry_interval >= t.turn_duration {
            return Err(ConfigError::RetryExceedsTurn {
                retry_ms: t.retry_interval.as_millis(),
                turn_ms: t.turn_duration.as_millis(),
            });
        }

        let cycle = self.turn_cycle();
        if t.watchdog_interval <= cycle {
            return Err(ConfigError::WatchdogTooShort {
                watchdog_ms: t.watchdog_interval.as_millis(),
                cycle_ms: cycle.as_millis(),
            });
        }

        Ok(())
    }
}
