//! `mirror_host`
//!
//! Authoritative side of the mirror:
//! - Fixed timestep world simulation over replicated tables
//! - Row change emission, dependent rows optionally ahead of their entity
//! - TCP feed: handshake, snapshot, then per-tick `Change` frames

pub mod host;
pub mod sim;

pub use host::ReplicaHost;
pub use sim::WorldSim;
