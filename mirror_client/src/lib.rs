//! `mirror_client`
//!
//! Client-side visual mirror:
//! - Row ingress and pending association
//! - Visual registry and drawable ownership
//! - Per-archetype kinematic prediction
//! - Correction policies for predicted visuals and creatures
//! - Feed client for the host's TCP replication stream

pub mod client;
pub mod correction;
pub mod ingress;
pub mod pending;
pub mod predict;
pub mod registry;
pub mod subsystem;
pub mod tween;

pub use client::FeedClient;
pub use subsystem::VisualSubsystem;
