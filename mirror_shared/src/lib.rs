//! `mirror_shared`
//!
//! Shared libraries used by both client and host.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (rows, store, kinematics, net, events).
//! - Traits for abstraction and dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod event;
pub mod kinematics;
pub mod math;
pub mod net;
pub mod render;
pub mod rows;
pub mod store;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::event::*;
    pub use crate::kinematics::{Archetype, OrbitLayout, RotationModel};
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::render::*;
    pub use crate::rows::*;
    pub use crate::store::*;
}
