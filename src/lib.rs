#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod config;
pub use config::{MAX_UNIVERSE, ProtocolConfig, Timings};

mod driver;
pub use driver::Driver;

mod join;

mod link;
pub use link::{Inbound, Link};

mod membership;
pub use membership::MembershipTable;

pub mod sim;
pub use sim::{Envelope, Medium, SimApp, SimClock, SimDriver, SimRadio, Simulation};

mod state;
pub use state::{Mark, NodeStatus, State, Stats, Transition};

#[cfg(test)]
mod testkit;

mod time;
pub use time::{Clock, Deadline, SystemClock, Timestamp};

mod traits;
pub use traits::{Application, DEFAULT_MTU, Frame, Transport};

mod transmit;

mod turn;

mod types;
pub use types::{ConfigError, NodeId, SessionId, TransportError};

mod wire;
pub use wire::{Message, Tag, WireError, echoes_payload};
