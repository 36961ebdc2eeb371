//! Kinematic models.
//!
//! Pure step functions for every attack archetype. The host advances rows
//! with these once per tick; the client extrapolates with the same functions
//! once per frame, so between ticks both sides agree on the closed form.
//!
//! Conventions:
//! - `dt` is seconds.
//! - Orbit angular rates are radians per tick; `ticks` may be fractional.
//! - Spin rates are radians per second.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::{math::Vec2, rows::AttackKind};

/// Authoritative tick interval used when no `Config` row is known.
pub const DEFAULT_TICK_DT: f32 = 0.05;

/// Gravity arcs bend their heading by this much per second, per unit speed.
pub const GRAVITY_PER_SPEED: f32 = 4.0;

/// Fraction of the way a homing heading turns toward its target per tick.
pub const HOMING_BLEND_PER_TICK: f32 = 0.1;

/// Spiral radius growth in pixels per second.
pub const SPIRAL_GROWTH: f32 = 40.0;

/// Spiral angular speed in radians per second.
pub const SPIRAL_ANGULAR_SPEED: f32 = 6.0;

/// Growing jets start at this radius and widen to `JET_END_RADIUS`.
pub const JET_START_RADIUS: f32 = 16.0;
pub const JET_END_RADIUS: f32 = 64.0;
pub const JET_START_ALPHA: f32 = 1.0;
pub const JET_END_ALPHA: f32 = 0.35;

/// How an orbiter places itself around its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitLayout {
    /// Evenly spread over the sibling group; radius from owner and own size.
    Distributed,
    /// Keeps its own phase and the distance it had when first seen.
    Captured,
}

/// Kinematic behavior class of a visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    Linear,
    Gravity,
    Orbit(OrbitLayout),
    Spiral,
    Homing,
    EasedGrowth,
    Stationary,
}

impl Archetype {
    pub const ALL: [Archetype; 8] = [
        Archetype::Linear,
        Archetype::Gravity,
        Archetype::Orbit(OrbitLayout::Distributed),
        Archetype::Orbit(OrbitLayout::Captured),
        Archetype::Spiral,
        Archetype::Homing,
        Archetype::EasedGrowth,
        Archetype::Stationary,
    ];

    /// Archetype of a moving attack row.
    pub fn for_projectile(kind: AttackKind) -> Self {
        use AttackKind::*;
        match kind {
            Sword | Wand | Knives | Football | Cards | Volleyball | Joint | ImpBolt
            | AgnaCandleBolt => Archetype::Linear,
            Shield => Archetype::Orbit(OrbitLayout::Distributed),
            EnderScythe => Archetype::Orbit(OrbitLayout::Captured),
            Dumbbell => Archetype::Gravity,
            ChaosBall => Archetype::Spiral,
            EnderBolt | AgnaFireOrb => Archetype::Homing,
            AgnaFlamethrowerJet | AgnaPhase2FlameJet => Archetype::EasedGrowth,
            ThunderHorn | AngelStaff | Garlic | EnderScytheSpawn | VoidZone | AgnaOrbSpawn
            | AgnaGroundFlame => Archetype::Stationary,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Archetype::Linear => "linear",
            Archetype::Gravity => "gravity",
            Archetype::Orbit(OrbitLayout::Distributed) => "orbit",
            Archetype::Orbit(OrbitLayout::Captured) => "orbit_captured",
            Archetype::Spiral => "spiral",
            Archetype::Homing => "homing",
            Archetype::EasedGrowth => "eased_growth",
            Archetype::Stationary => "stationary",
        }
    }

    pub fn is_moving(self) -> bool {
        !matches!(self, Archetype::Stationary)
    }
}

/// How a drawable's rotation is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RotationModel {
    /// Faces along the current heading.
    Heading,
    /// Spins at a fixed rate (radians per second), independent of motion.
    Spin(f32),
    Fixed,
}

impl RotationModel {
    pub fn for_attack(kind: AttackKind) -> Self {
        use AttackKind::*;
        match kind {
            Shield => RotationModel::Spin(2.0 * PI),
            EnderScythe => RotationModel::Spin(4.0 * PI),
            Football | Volleyball => RotationModel::Spin(3.0 * PI),
            Dumbbell => RotationModel::Spin(2.5 * PI),
            Cards => RotationModel::Spin(5.0 * PI),
            _ => match Archetype::for_projectile(kind) {
                Archetype::Stationary => RotationModel::Fixed,
                _ => RotationModel::Heading,
            },
        }
    }

    /// Rotation for a drawable given its heading and accumulated spin.
    pub fn rotation(self, heading: Vec2, spin_angle: f32) -> f32 {
        match self {
            RotationModel::Heading => heading.angle(),
            RotationModel::Spin(_) => spin_angle,
            RotationModel::Fixed => 0.0,
        }
    }

    pub fn spin_rate(self) -> f32 {
        match self {
            RotationModel::Spin(rate) => rate,
            _ => 0.0,
        }
    }
}

/// `p + d * speed * dt`.
pub fn step_linear(position: Vec2, direction: Vec2, speed: f32, dt: f32) -> Vec2 {
    position + direction * (speed * dt)
}

/// Downward acceleration of a gravity arc with the given launch speed.
pub fn gravity_for(speed: f32) -> f32 {
    GRAVITY_PER_SPEED * speed
}

/// Returns the new `(position, velocity)`.
pub fn step_gravity(position: Vec2, velocity: Vec2, gravity: f32, dt: f32) -> (Vec2, Vec2) {
    let velocity = Vec2::new(velocity.x, velocity.y + gravity * dt);
    (position + velocity * dt, velocity)
}

/// Converts an orbit rate in degrees per second into radians per tick.
pub fn orbit_rate_per_tick(degrees_per_sec: f32, tick_dt: f32) -> f32 {
    degrees_per_sec * PI / 180.0 * tick_dt
}

/// `u0·π/180 + 2π·i/T + ω·t`, wrapped into $[0, 2\pi)$.
pub fn orbit_angle(base_degrees: f32, index: usize, total: usize, rate_per_tick: f32, ticks: f32) -> f32 {
    let spread = if total > 0 {
        TAU * index as f32 / total as f32
    } else {
        0.0
    };
    crate::math::wrap_angle(base_degrees * PI / 180.0 + spread + rate_per_tick * ticks)
}

/// Orbit angle for an orbiter that tracks its own phase in radians.
pub fn captured_orbit_angle(phase: f32, rate_per_tick: f32, ticks: f32) -> f32 {
    crate::math::wrap_angle(phase + rate_per_tick * ticks)
}

pub fn orbit_position(center: Vec2, radius: f32, angle: f32) -> Vec2 {
    center + Vec2::from_angle(angle) * radius
}

/// Distance a distributed orbiter keeps from its owner.
pub fn distributed_orbit_radius(owner_radius: f32, radius: f32) -> f32 {
    (owner_radius + radius) * 2.0
}

/// Slot of `me` among its orbit siblings, ordered by `(id_within_burst, attack_id)`.
///
/// Returns `(index, total)`. `me` counts toward `total` even if it is not
/// listed in `siblings`.
pub fn orbit_slot(me: (u32, u32), siblings: impl IntoIterator<Item = (u32, u32)>) -> (usize, usize) {
    let mut index = 0;
    let mut total = 1;
    for sibling in siblings {
        if sibling == me {
            continue;
        }
        total += 1;
        if sibling < me {
            index += 1;
        }
    }
    (index, total)
}

/// Offset from the spiral's linear base after `elapsed` seconds.
pub fn spiral_offset(phase: f32, elapsed: f32) -> Vec2 {
    let radius = SPIRAL_GROWTH * elapsed;
    Vec2::from_angle(phase + SPIRAL_ANGULAR_SPEED * elapsed) * radius
}

/// Upper bound of a spiral's travel speed at `elapsed` seconds.
pub fn spiral_speed(speed: f32, elapsed: f32) -> f32 {
    speed + SPIRAL_GROWTH * (1.0 + SPIRAL_ANGULAR_SPEED * elapsed)
}

/// Homing blend for a step of `dt`, independent of frame rate.
pub fn homing_blend(dt: f32, tick_dt: f32) -> f32 {
    if tick_dt <= 0.0 {
        return HOMING_BLEND_PER_TICK;
    }
    1.0 - (1.0 - HOMING_BLEND_PER_TICK).powf(dt / tick_dt)
}

/// Turns `direction` toward `target` by `blend` and renormalizes.
///
/// A target on top of the projectile leaves the heading unchanged.
pub fn steer(direction: Vec2, position: Vec2, target: Vec2, blend: f32) -> Vec2 {
    let desired = (target - position).normalize();
    if desired == Vec2::ZERO {
        return direction;
    }
    let turned = direction.lerp(desired, blend).normalize();
    if turned == Vec2::ZERO {
        desired
    } else {
        turned
    }
}

/// `1 - (1 - t)²` with `t` clamped to $[0,1]$.
pub fn ease_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

/// Scale and alpha curve of a growing, fading visual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthFade {
    pub start_scale: f32,
    pub end_scale: f32,
    pub start_alpha: f32,
    pub end_alpha: f32,
}

impl GrowthFade {
    pub fn jet() -> Self {
        Self {
            start_scale: 1.0,
            end_scale: JET_END_RADIUS / JET_START_RADIUS,
            start_alpha: JET_START_ALPHA,
            end_alpha: JET_END_ALPHA,
        }
    }

    /// Returns `(scale, alpha)` at `elapsed_ms` into a `lifetime_ms` life.
    pub fn sample(&self, elapsed_ms: f32, lifetime_ms: f32) -> (f32, f32) {
        let t = if lifetime_ms > 0.0 {
            (elapsed_ms / lifetime_ms).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let scale = crate::math::lerp(self.start_scale, self.end_scale, ease_out(t));
        let alpha = crate::math::lerp(self.start_alpha, self.end_alpha, t);
        (scale, alpha)
    }

    /// World radius of a jet at the given point in its life.
    pub fn radius(&self, base_radius: f32, elapsed_ms: f32, lifetime_ms: f32) -> f32 {
        base_radius * self.sample(elapsed_ms, lifetime_ms).0
    }
}
