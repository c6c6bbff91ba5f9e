//! Core types for the meshturn protocol.
//!
//! This module contains node and session identifiers along with the error
//! types shared throughout the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Radio address of a participant.
///
/// Addresses are assigned at provisioning time and never change. The value
/// `0xFF` is reserved for [`NodeId::BROADCAST`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// The send-to-all address.
    pub const BROADCAST: Self = Self(0xFF);

    /// Creates a node id from its raw address byte.
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw address byte.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns true if this is the broadcast address.
    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl From<u8> for NodeId {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            f.write_str("broadcast")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifier of one network instance.
///
/// Drawn at random by the node that creates the network and adopted by
/// every node that joins it. It only disambiguates stale frames from an
/// earlier or parallel network; it is not a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    /// Creates a session id. Zero is reserved and mapped to one.
    pub const fn new(raw: u32) -> Self {
        if raw == 0 {
            Self(1)
        } else {
            Self(raw)
        }
    }

    /// Returns the raw value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Errors detected while validating a node's configuration.
///
/// These are the only fatal errors in the crate: they are reported once at
/// startup and the node never enters its main loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The universe of node ids is empty.
    #[error("node universe is empty")]
    EmptyUniverse,

    /// The universe holds more ids than the join frame can carry.
    #[error("node universe has {got} ids, at most {max} supported")]
    UniverseTooLarge {
        /// Maximum supported universe size.
        max: usize,
        /// Configured universe size.
        got: usize,
    },

    /// The broadcast address was listed as a node.
    #[error("broadcast address cannot be a node id")]
    BroadcastInUniverse,

    /// A node id appears more than once.
    #[error("node {0} listed twice in universe")]
    DuplicateNode(NodeId),

    /// The local node id is not part of the universe.
    #[error("local node {0} is not in the universe")]
    LocalNotInUniverse(NodeId),

    /// A timer was configured with a zero duration.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The retry interval does not fit inside one turn.
    #[error("retry interval ({retry_ms} ms) must be shorter than turn duration ({turn_ms} ms)")]
    RetryExceedsTurn {
        /// Configured retry interval in milliseconds.
        retry_ms: u128,
        /// Configured turn duration in milliseconds.
        turn_ms: u128,
    },

    /// The watchdog could fire while a healthy holder is still busy.
    #[error("watchdog ({watchdog_ms} ms) must exceed one full turn cycle ({cycle_ms} ms)")]
    WatchdogTooShort {
        /// Configured watchdog interval in milliseconds.
        watchdog_ms: u128,
        /// Longest silence a healthy turn can produce, in milliseconds.
        cycle_ms: u128,
    },
}

/// Errors reported by a [`Transport`](crate::Transport).
///
/// The protocol never treats these as fatal: the owning handler's retry
/// timer covers every failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The frame does not fit in one radio packet.
    #[error("frame of {len} bytes exceeds mtu of {mtu}")]
    FrameTooLarge {
        /// Encoded frame length.
        len: usize,
        /// Transport MTU.
        mtu: usize,
    },

    /// The radio is not attached to a medium (powered off, socket closed).
    #[error("radio detached")]
    Detached,

    /// Implementation-specific I/O failure.
    #[error("radio i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(4).to_string(), "4");
        assert_eq!(NodeId::BROADCAST.to_string(), "broadcast");
        assert!(NodeId::from(0xFF).is_broadcast());
    }

    #[test]
    fn test_session_id_never_zero() {
        assert_eq!(SessionId::new(0).get(), 1);
        assert_eq!(SessionId::new(0xdead_beef).to_string(), "deadbeef");
    }

    #[test]
    fn test_node_id_serde_is_transparent() {
        let json = serde_json::to_string(&vec![NodeId::new(1), NodeId::new(6)]).unwrap();
        assert_eq!(json, "[1,6]");
    }

    #[rstest]
    #[case::local(
        ConfigError::LocalNotInUniverse(NodeId::new(9)).to_string(),
        "local node 9 is not in the universe"
    )]
    #[case::zero(
        ConfigError::ZeroDuration("turn_duration").to_string(),
        "turn_duration must be greater than zero"
    )]
    #[case::too_large(
        TransportError::FrameTooLarge { len: 300, mtu: 251 }.to_string(),
        "frame of 300 bytes exceeds mtu of 251"
    )]
    fn error_display(#[case] rendered: String, #[case] expected: &str) {
        assert_eq!(rendered, expected);
    }
}
