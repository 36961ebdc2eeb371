//! Correction policies.
//!
//! Two separate rules reconcile a visual with a fresh authoritative position:
//!
//! - Predicted visuals tolerate up to one tick of travel, `(dt · speed)²`
//!   squared distance, and snap beyond that.
//! - Creatures use an absolute distance: far jumps teleport, moving creatures
//!   walk over a short tween, idle ones snap.
//!
//! Corrections run only when an entity row actually changes, never per frame.

use std::f32::consts::PI;

use mirror_shared::{
    config::CorrectionConfig,
    kinematics::{self, Archetype},
    math::Vec2,
    rows::EntityRow,
};

use crate::{
    registry::{Mover, VisualHandle},
    tween::PositionTween,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Kept,
    Snapped,
}

/// Speed-scaled threshold for predicted visuals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectileCorrection;

impl ProjectileCorrection {
    /// One tick of travel, squared.
    pub fn threshold(speed: f32, reference_dt: f32) -> f32 {
        let reach = reference_dt * speed;
        reach * reach
    }

    /// Returns the verdict and the squared error that produced it.
    pub fn check(&self, predicted: Vec2, server: Vec2, speed: f32, reference_dt: f32) -> (Verdict, f32) {
        let error_sq = predicted.distance_sq(server);
        if error_sq > Self::threshold(speed, reference_dt) {
            (Verdict::Snapped, error_sq)
        } else {
            (Verdict::Kept, error_sq)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatureDecision {
    Teleport,
    Tween,
    Snap,
}

/// Absolute-distance policy for creatures.
#[derive(Debug, Clone, Copy)]
pub struct CreatureCorrection {
    pub teleport_distance: f32,
    pub tween_ms: f32,
}

impl CreatureCorrection {
    pub fn decide(&self, rendered: Vec2, server: Vec2, is_moving: bool) -> CreatureDecision {
        let limit = self.teleport_distance * self.teleport_distance;
        if rendered.distance_sq(server) > limit {
            CreatureDecision::Teleport
        } else if is_moving {
            CreatureDecision::Tween
        } else {
            CreatureDecision::Snap
        }
    }
}

impl Default for CreatureCorrection {
    fn default() -> Self {
        Self::from(&CorrectionConfig::default())
    }
}

impl From<&CorrectionConfig> for CreatureCorrection {
    fn from(cfg: &CorrectionConfig) -> Self {
        Self {
            teleport_distance: cfg.creature_teleport_distance,
            tween_ms: cfg.creature_tween_ms as f32,
        }
    }
}

/// Both policies, as injected into the subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectionPolicy {
    pub projectile: ProjectileCorrection,
    pub creature: CreatureCorrection,
}

impl CorrectionPolicy {
    pub fn from_config(cfg: &CorrectionConfig) -> Self {
        Self {
            projectile: ProjectileCorrection,
            creature: CreatureCorrection::from(cfg),
        }
    }
}

/// What a correction did to a handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Kept { error_sq: f32 },
    Snapped { error_sq: f32 },
    Teleported { from: Vec2, to: Vec2 },
    Tweening { from: Vec2, to: Vec2 },
    /// First position after waiting on an unseen entity.
    Placed,
}

impl Correction {
    pub fn moves_drawables(&self) -> bool {
        matches!(
            self,
            Correction::Snapped { .. } | Correction::Teleported { .. } | Correction::Placed
        )
    }
}

/// Travel speed in pixels per second used for the projectile threshold.
pub fn effective_speed(handle: &VisualHandle, archetype: Archetype, tick_dt: f32) -> f32 {
    match archetype {
        Archetype::Linear | Archetype::Homing | Archetype::EasedGrowth => handle.speed,
        Archetype::Gravity => handle.velocity.length(),
        Archetype::Orbit(_) => handle.speed * PI / 180.0 * handle.aux.orbit_radius,
        Archetype::Spiral => kinematics::spiral_speed(handle.speed, handle.aux.ticks * tick_dt),
        Archetype::Stationary => 0.0,
    }
}

/// Reconciles `handle` with an authoritative entity row.
///
/// After a `Kept` verdict the predicted position is untouched; heading,
/// velocity and spiral base are re-anchored to the row either way.
pub fn reconcile(
    handle: &mut VisualHandle,
    entity: &EntityRow,
    policy: &CorrectionPolicy,
    reference_dt: f32,
    tick_dt: f32,
) -> Correction {
    let server = entity.position;
    handle.server = server;
    handle.is_moving = entity.is_moving;
    let heading = entity.direction.normalize();
    if heading != Vec2::ZERO {
        handle.direction = heading;
    }

    let archetype = match handle.mover {
        Mover::Tweened => return reconcile_creature(handle, server, &policy.creature),
        Mover::Predicted(archetype) => archetype,
    };

    let speed = effective_speed(handle, archetype, tick_dt);
    let (verdict, error_sq) = policy
        .projectile
        .check(handle.predicted, server, speed, reference_dt);
    if verdict == Verdict::Snapped {
        handle.predicted = server;
    }

    match archetype {
        Archetype::Gravity => handle.velocity = entity.direction * handle.speed,
        Archetype::Spiral => {
            let elapsed = handle.aux.ticks * tick_dt;
            handle.aux.spiral_base =
                handle.predicted - kinematics::spiral_offset(handle.aux.spiral_phase, elapsed);
        }
        _ => {}
    }

    match verdict {
        Verdict::Kept => Correction::Kept { error_sq },
        Verdict::Snapped => Correction::Snapped { error_sq },
    }
}

fn reconcile_creature(handle: &mut VisualHandle, server: Vec2, policy: &CreatureCorrection) -> Correction {
    let rendered = handle.predicted;
    match policy.decide(rendered, server, handle.is_moving) {
        CreatureDecision::Teleport => {
            handle.predicted = server;
            handle.tween = None;
            Correction::Teleported {
                from: rendered,
                to: server,
            }
        }
        CreatureDecision::Tween => {
            handle.tween = Some(PositionTween::new(rendered, server, policy.tween_ms));
            Correction::Tweening {
                from: rendered,
                to: server,
            }
        }
        CreatureDecision::Snap => {
            handle.predicted = server;
            handle.tween = None;
            Correction::Snapped {
                error_sq: rendered.distance_sq(server),
            }
        }
    }
}
