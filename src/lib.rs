pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod device;
pub mod inject;
pub mod neighbor;
pub mod proto;
pub mod sim;
pub mod snmp;
pub mod stack;
pub mod topology;
pub mod traffic;
pub mod types;

#[cfg(test)]
pub mod testutil;

pub use capture::{CaptureEngine, RateLimiter, ReplayManager};
pub use config::Config;
pub use device::{Fleet, SimulatedDevice};
pub use inject::{ErrorKind, ErrorStateManager};
pub use neighbor::NeighborCache;
pub use sim::Simulation;
pub use snmp::{Mib, OidValue, SnmpAgent, TrapSender};
pub use stack::ProtocolStack;
pub use types::*;
