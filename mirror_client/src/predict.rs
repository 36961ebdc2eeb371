//! Kinematic predictor.
//!
//! Advances every predicted handle once per frame between authoritative
//! ticks, dispatching on the handle's archetype. The step itself is pure
//! given the handle and a `StepEnv`; lookups into the replica happen before
//! the step.

use std::collections::HashMap;

use mirror_shared::{
    kinematics::{self, Archetype, GrowthFade, OrbitLayout},
    math::{wrap_angle, Vec2},
    render::RenderBackend,
    rows::{AttackKind, EntityId, EntityRow, VisualKey},
    store::ReplicaSource,
};

use crate::registry::{Mover, VisualHandle, VisualRegistry};

/// Inputs a step needs besides the handle itself.
#[derive(Debug, Clone, Copy)]
pub struct StepEnv {
    pub tick_dt: f32,
    pub owner: Option<EntityRow>,
    pub target: Option<Vec2>,
    /// `(index, total)` among orbit siblings.
    pub slot: (usize, usize),
}

/// Advances one handle by `dt` seconds.
pub fn step(handle: &mut VisualHandle, archetype: Archetype, env: &StepEnv, dt: f32) {
    let tick_dt = env.tick_dt.max(f32::EPSILON);
    let aux = &mut handle.aux;
    aux.ticks += dt / tick_dt;
    aux.elapsed_ms = aux.ticks * tick_dt * 1000.0;
    aux.spin_angle = wrap_angle(aux.spin_angle + handle.rotation_model.spin_rate() * dt);

    match archetype {
        Archetype::Linear => {
            handle.predicted = kinematics::step_linear(handle.predicted, handle.direction, handle.speed, dt);
        }
        Archetype::Gravity => {
            let gravity = kinematics::gravity_for(handle.speed);
            let (p, v) = kinematics::step_gravity(handle.predicted, handle.velocity, gravity, dt);
            handle.predicted = p;
            handle.velocity = v;
            let heading = v.normalize();
            if heading != Vec2::ZERO {
                handle.direction = heading;
            }
        }
        Archetype::Orbit(layout) => {
            let Some(owner) = env.owner else {
                return finish(handle);
            };
            let rate = kinematics::orbit_rate_per_tick(handle.speed, tick_dt);
            let angle = match layout {
                OrbitLayout::Distributed => {
                    let (index, total) = env.slot;
                    handle.aux.orbit_index = index;
                    handle.aux.orbit_total = total;
                    handle.aux.orbit_radius = kinematics::distributed_orbit_radius(owner.radius, handle.radius);
                    kinematics::orbit_angle(handle.aux.orbit_base_degrees, index, total, rate, handle.aux.ticks)
                }
                OrbitLayout::Captured => {
                    kinematics::captured_orbit_angle(handle.aux.orbit_phase, rate, handle.aux.ticks)
                }
            };
            handle.predicted = kinematics::orbit_position(owner.position, handle.aux.orbit_radius, angle);
            handle.direction = Vec2::new(-angle.sin(), angle.cos());
        }
        Archetype::Spiral => {
            handle.aux.spiral_base =
                kinematics::step_linear(handle.aux.spiral_base, handle.direction, handle.speed, dt);
            let elapsed = handle.aux.ticks * tick_dt;
            handle.predicted = handle.aux.spiral_base + kinematics::spiral_offset(handle.aux.spiral_phase, elapsed);
        }
        Archetype::Homing => {
            if let Some(target) = env.target {
                let blend = kinematics::homing_blend(dt, tick_dt);
                handle.direction = kinematics::steer(handle.direction, handle.predicted, target, blend);
            }
            handle.predicted = kinematics::step_linear(handle.predicted, handle.direction, handle.speed, dt);
        }
        Archetype::EasedGrowth => {
            handle.predicted = kinematics::step_linear(handle.predicted, handle.direction, handle.speed, dt);
            let (scale, alpha) = GrowthFade::jet().sample(handle.aux.elapsed_ms, handle.aux.lifetime_ms);
            handle.aux.scale = scale;
            handle.aux.alpha = alpha;
        }
        Archetype::Stationary => {}
    }
    finish(handle);
}

fn finish(handle: &mut VisualHandle) {
    handle.aux.rotation = handle
        .rotation_model
        .rotation(handle.direction, handle.aux.spin_angle);
}

/// Pushes a handle's transform to the backend.
pub fn push_transform(handle: &VisualHandle, backend: &mut dyn RenderBackend) {
    let res = &handle.resources;
    res.place(backend, handle.predicted, handle.radius);
    backend.set_rotation(res.body, handle.aux.rotation);
    backend.set_scale(res.body, Vec2::new(handle.aux.scale, handle.aux.scale));
    backend.set_alpha(res.body, handle.aux.alpha);
}

/// `(index, total)` for every distributed orbiter, grouped by owner and kind.
pub fn orbit_slots(registry: &VisualRegistry) -> HashMap<VisualKey, (usize, usize)> {
    let mut groups: HashMap<(EntityId, AttackKind), Vec<(VisualKey, (u32, u32))>> = HashMap::new();
    for handle in registry.iter() {
        if handle.archetype() != Some(Archetype::Orbit(OrbitLayout::Distributed)) {
            continue;
        }
        let (Some(owner), Some(kind), VisualKey::Projectile(attack_id)) =
            (handle.owner, handle.kind.attack(), handle.key)
        else {
            continue;
        };
        groups
            .entry((owner, kind))
            .or_default()
            .push((handle.key, (handle.id_within_burst, attack_id)));
    }

    let mut slots = HashMap::new();
    for members in groups.values() {
        for (key, me) in members {
            let slot = kinematics::orbit_slot(*me, members.iter().map(|(_, m)| *m));
            slots.insert(*key, slot);
        }
    }
    slots
}

/// Frame driver for every predicted handle.
#[derive(Debug, Clone, Copy)]
pub struct Predictor {
    enabled: bool,
}

impl Default for Predictor {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Predictor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Steps every predicted handle by `dt` seconds and pushes transforms.
    /// With prediction disabled handles sit at their last authoritative
    /// position.
    pub fn advance(
        &self,
        registry: &mut VisualRegistry,
        source: &dyn ReplicaSource,
        dt: f32,
        tick_dt: f32,
        backend: &mut dyn RenderBackend,
    ) -> usize {
        let slots = orbit_slots(registry);
        let mut stepped = 0;
        for handle in registry.iter_mut() {
            let Mover::Predicted(archetype) = handle.mover else {
                continue;
            };
            if self.enabled {
                let env = StepEnv {
                    tick_dt,
                    owner: handle.owner.and_then(|id| source.find_entity(id)),
                    target: handle
                        .target
                        .and_then(|id| source.find_entity(id))
                        .map(|e| e.position),
                    slot: slots.get(&handle.key).copied().unwrap_or((0, 1)),
                };
                step(handle, archetype, &env, dt);
            } else {
                handle.predicted = handle.server;
            }
            push_transform(handle, backend);
            stepped += 1;
        }
        stepped
    }

    /// Moves creatures along their tweens.
    pub fn advance_tweens(&self, registry: &mut VisualRegistry, delta_ms: f32, backend: &mut dyn RenderBackend) {
        for handle in registry.iter_mut() {
            let Some(tween) = handle.tween.as_mut() else {
                continue;
            };
            handle.predicted = tween.advance(delta_ms);
            if tween.is_done() {
                handle.tween = None;
            }
            handle.resources.place(backend, handle.predicted, handle.radius);
        }
    }
}
