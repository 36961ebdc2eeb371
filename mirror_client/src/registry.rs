//! Visual registry.
//!
//! Owns one `VisualHandle` per live dependent row, plus an index from entity
//! id to handle key. Handles are created only once both the dependent row and
//! its entity are known, and always at the entity's position.

use std::{collections::HashMap, fmt};

use mirror_shared::{
    kinematics::{self, Archetype, OrbitLayout, RotationModel},
    math::Vec2,
    render::{DrawableId, DrawableSpec, Layer, RenderBackend},
    rows::{
        AttackDefinition, AttackKind, DependentRow, EntityId, EntityRow, GemLevel, MonsterType,
        MonsterVariant, VisualKey,
    },
    store::ReplicaSource,
};
use tracing::debug;

use crate::{
    correction::{self, Correction, CorrectionPolicy},
    tween::ExitEffects,
};

/// Why a visual could not be created or updated.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    UnknownAttackType(String),
    UnknownLegacyType(u32),
    MissingDefinition(AttackKind),
    AlreadyLive(VisualKey),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownAttackType(tag) => write!(f, "unknown attack type {tag:?}"),
            RegistryError::UnknownLegacyType(id) => write!(f, "unknown legacy attack id {id}"),
            RegistryError::MissingDefinition(kind) => write!(f, "no AttackData row for {kind}"),
            RegistryError::AlreadyLive(key) => write!(f, "{key} is already live"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Resolves an attack row's kind from its type tag, falling back to the
/// legacy numeric id when the tag is absent.
pub fn resolve_attack_kind(tag: Option<&str>, legacy_id: u32) -> Result<AttackKind, RegistryError> {
    match tag {
        Some(tag) if !tag.is_empty() => {
            AttackKind::from_tag(tag).ok_or_else(|| RegistryError::UnknownAttackType(tag.to_string()))
        }
        _ => AttackKind::from_legacy_id(legacy_id).ok_or(RegistryError::UnknownLegacyType(legacy_id)),
    }
}

/// What a visual depicts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisualKind {
    Pickup(GemLevel),
    Creature {
        bestiary: MonsterType,
        variant: MonsterVariant,
    },
    Projectile(AttackKind),
    AreaAttack(AttackKind),
}

impl VisualKind {
    pub fn attack(self) -> Option<AttackKind> {
        match self {
            VisualKind::Projectile(kind) | VisualKind::AreaAttack(kind) => Some(kind),
            _ => None,
        }
    }
}

/// How a handle's position changes between authoritative updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mover {
    /// Extrapolated every frame by the predictor.
    Predicted(Archetype),
    /// Walks toward each authoritative update.
    Tweened,
}

/// Per-archetype auxiliary state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxState {
    /// Authoritative ticks since spawn, advanced fractionally between ticks.
    pub ticks: f32,
    pub elapsed_ms: f32,
    pub lifetime_ms: f32,
    pub spin_angle: f32,
    pub orbit_index: usize,
    pub orbit_total: usize,
    /// Orbit base phase in degrees, for distributed orbiters.
    pub orbit_base_degrees: f32,
    /// Orbit phase in radians, for captured orbiters.
    pub orbit_phase: f32,
    /// Captured orbit radius. Distributed orbiters recompute theirs.
    pub orbit_radius: f32,
    pub spiral_base: Vec2,
    pub spiral_phase: f32,
    pub scale: f32,
    pub alpha: f32,
    pub rotation: f32,
}

impl Default for AuxState {
    fn default() -> Self {
        Self {
            ticks: 0.0,
            elapsed_ms: 0.0,
            lifetime_ms: 0.0,
            spin_angle: 0.0,
            orbit_index: 0,
            orbit_total: 1,
            orbit_base_degrees: 0.0,
            orbit_phase: 0.0,
            orbit_radius: 0.0,
            spiral_base: Vec2::ZERO,
            spiral_phase: 0.0,
            scale: 1.0,
            alpha: 1.0,
            rotation: 0.0,
        }
    }
}

/// Drawables owned by one handle.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualResources {
    pub body: DrawableId,
    pub shadow: Option<DrawableId>,
    pub hp_bar: Option<DrawableId>,
    pub buff: Option<DrawableId>,
}

impl VisualResources {
    pub fn all(&self) -> Vec<DrawableId> {
        std::iter::once(self.body)
            .chain(self.shadow)
            .chain(self.hp_bar)
            .chain(self.buff)
            .collect()
    }

    /// Moves the body and everything that follows it.
    pub fn place(&self, backend: &mut dyn RenderBackend, position: Vec2, radius: f32) {
        backend.set_position(self.body, position);
        if let Some(shadow) = self.shadow {
            backend.set_position(shadow, position + Vec2::new(0.0, radius * 0.5));
        }
        if let Some(bar) = self.hp_bar {
            backend.set_position(bar, position + Vec2::new(0.0, -(radius + 8.0)));
        }
        if let Some(buff) = self.buff {
            backend.set_position(buff, position);
        }
    }

    pub fn destroy(&self, backend: &mut dyn RenderBackend) {
        for id in self.all() {
            backend.destroy(id);
        }
    }
}

/// Render-side state of one live dependent row.
#[derive(Debug, Clone)]
pub struct VisualHandle {
    pub key: VisualKey,
    pub entity_id: EntityId,
    pub kind: VisualKind,
    pub mover: Mover,
    pub rotation_model: RotationModel,
    pub predicted: Vec2,
    pub server: Vec2,
    pub direction: Vec2,
    /// Velocity of gravity arcs; other archetypes move along `direction`.
    pub velocity: Vec2,
    pub speed: f32,
    pub is_moving: bool,
    pub aux: AuxState,
    pub owner: Option<EntityId>,
    pub target: Option<EntityId>,
    pub id_within_burst: u32,
    pub hp: u32,
    pub max_hp: u32,
    pub radius: f32,
    pub tween: Option<crate::tween::PositionTween>,
    /// Set when the row moved to an entity that has not been seen yet.
    pub awaiting_entity: bool,
    pub resources: VisualResources,
}

impl VisualHandle {
    pub fn archetype(&self) -> Option<Archetype> {
        match self.mover {
            Mover::Predicted(archetype) => Some(archetype),
            Mover::Tweened => None,
        }
    }

    /// Fraction of the hp bar that is filled.
    pub fn hp_fraction(&self) -> f32 {
        if self.max_hp == 0 {
            0.0
        } else {
            (self.hp as f32 / self.max_hp as f32).clamp(0.0, 1.0)
        }
    }

    /// Sets both positions and moves the drawables, cancelling any tween.
    pub fn place_at(&mut self, position: Vec2, backend: &mut dyn RenderBackend) {
        self.predicted = position;
        self.server = position;
        self.tween = None;
        self.resources.place(backend, position, self.radius);
    }

    fn sync_hp_bar(&self, backend: &mut dyn RenderBackend) {
        if let Some(bar) = self.resources.hp_bar {
            backend.set_scale(bar, Vec2::new(self.hp_fraction(), 1.0));
        }
    }
}

#[derive(Default)]
pub struct VisualRegistry {
    handles: HashMap<VisualKey, VisualHandle>,
    by_entity: HashMap<EntityId, VisualKey>,
}

impl VisualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the visual for `row` at `entity`'s position.
    pub fn create(
        &mut self,
        row: &DependentRow,
        entity: &EntityRow,
        source: &dyn ReplicaSource,
        tick_dt: f32,
        backend: &mut dyn RenderBackend,
    ) -> Result<&VisualHandle, RegistryError> {
        let key = row.key();
        if self.handles.contains_key(&key) {
            return Err(RegistryError::AlreadyLive(key));
        }

        let position = entity.position;
        let mut aux = AuxState::default();
        let mut owner = None;
        let mut target = None;
        let mut id_within_burst = 0;
        let mut hp = 0;
        let mut max_hp = 0;
        let mut speed = 0.0;
        let mut rotation_model = RotationModel::Fixed;

        let (kind, mover, radius, resources) = match row {
            DependentRow::Pickup(gem) => {
                let body = backend.create(DrawableSpec::new(Layer::Ground, gem.level.sprite(), position));
                let resources = VisualResources {
                    body,
                    shadow: None,
                    hp_bar: None,
                    buff: None,
                };
                (
                    VisualKind::Pickup(gem.level),
                    Mover::Predicted(Archetype::Stationary),
                    0.0,
                    resources,
                )
            }
            DependentRow::Creature(creature) => {
                hp = creature.hp;
                max_hp = creature.max_hp;
                speed = creature.speed;
                let shadow = backend.create(DrawableSpec::new(Layer::Shadow, "shadow", position));
                let body = backend.create(DrawableSpec::new(
                    Layer::Body,
                    creature.bestiary.sprite(),
                    position,
                ));
                let hp_bar = backend.create(DrawableSpec::new(Layer::Overlay, "hp_bar", position));
                let buff = match creature.variant {
                    MonsterVariant::Shiny => {
                        Some(backend.create(DrawableSpec::new(Layer::Overlay, "shiny_buff", position)))
                    }
                    MonsterVariant::Default => None,
                };
                let resources = VisualResources {
                    body,
                    shadow: Some(shadow),
                    hp_bar: Some(hp_bar),
                    buff,
                };
                (
                    VisualKind::Creature {
                        bestiary: creature.bestiary,
                        variant: creature.variant,
                    },
                    Mover::Tweened,
                    creature.radius,
                    resources,
                )
            }
            DependentRow::Projectile(attack) => {
                let kind = resolve_attack_kind(attack.attack_type.as_deref(), attack.legacy_type_id)?;
                let def = definition(source, kind)?;
                let archetype = Archetype::for_projectile(kind);
                owner = attack.owner_entity_id;
                target = attack.target_entity_id;
                id_within_burst = attack.id_within_burst;
                speed = def.speed;
                rotation_model = RotationModel::for_attack(kind);
                aux.ticks = attack.ticks_elapsed as f32;
                aux.lifetime_ms = def.duration_ms as f32;
                aux.orbit_base_degrees = attack.parameter_u as f32;
                aux.orbit_phase = attack.parameter_f;
                aux.spiral_phase = attack.parameter_f;
                if let (Archetype::Orbit(layout), Some(owner_row)) =
                    (archetype, owner.and_then(|id| source.find_entity(id)))
                {
                    aux.orbit_radius = match layout {
                        OrbitLayout::Captured => position.distance_sq(owner_row.position).sqrt(),
                        OrbitLayout::Distributed => {
                            kinematics::distributed_orbit_radius(owner_row.radius, attack.radius)
                        }
                    };
                }
                if archetype == Archetype::Spiral {
                    let elapsed = aux.ticks * tick_dt;
                    aux.spiral_base = position - kinematics::spiral_offset(aux.spiral_phase, elapsed);
                }
                let mut body_layer = Layer::Body;
                let shadow = if archetype.is_moving() {
                    Some(backend.create(DrawableSpec::new(Layer::Shadow, "shadow", position)))
                } else {
                    body_layer = Layer::Ground;
                    None
                };
                let body = backend.create(DrawableSpec::new(body_layer, kind.sprite(), position));
                let resources = VisualResources {
                    body,
                    shadow,
                    hp_bar: None,
                    buff: None,
                };
                (
                    VisualKind::Projectile(kind),
                    Mover::Predicted(archetype),
                    attack.radius,
                    resources,
                )
            }
            DependentRow::AreaAttack(area) => {
                let kind = resolve_attack_kind(area.attack_type.as_deref(), area.legacy_type_id)?;
                let def = definition(source, kind)?;
                owner = area.owner_entity_id;
                aux.ticks = area.ticks_elapsed as f32;
                aux.lifetime_ms = def.duration_ms as f32;
                aux.scale = area_scale(area.radius, &def);
                let body = backend.create(DrawableSpec::new(Layer::Ground, kind.sprite(), position));
                backend.set_scale(body, Vec2::new(aux.scale, aux.scale));
                let resources = VisualResources {
                    body,
                    shadow: None,
                    hp_bar: None,
                    buff: None,
                };
                (
                    VisualKind::AreaAttack(kind),
                    Mover::Predicted(Archetype::Stationary),
                    area.radius,
                    resources,
                )
            }
        };

        let direction = entity.direction.normalize();
        let handle = VisualHandle {
            key,
            entity_id: entity.entity_id,
            kind,
            mover,
            rotation_model,
            predicted: position,
            server: position,
            direction,
            velocity: entity.direction * speed,
            speed,
            is_moving: entity.is_moving,
            aux,
            owner,
            target,
            id_within_burst,
            hp,
            max_hp,
            radius,
            tween: None,
            awaiting_entity: false,
            resources,
        };
        handle.resources.place(backend, position, radius);
        handle.sync_hp_bar(backend);

        debug!(key = %key, entity = %entity.entity_id, x = position.x, y = position.y, "visual created");
        self.by_entity.insert(entity.entity_id, key);
        Ok(self.handles.entry(key).or_insert(handle))
    }

    /// Applies non-positional field changes from a dependent row update.
    ///
    /// Returns true when the row now points at a different entity; the
    /// handle then waits for that entity's position.
    pub fn update_fields(
        &mut self,
        row: &DependentRow,
        source: &dyn ReplicaSource,
        backend: &mut dyn RenderBackend,
    ) -> Result<bool, RegistryError> {
        let key = row.key();
        let Some(handle) = self.handles.get_mut(&key) else {
            return Ok(false);
        };

        let mut outcome = Ok(());
        match row {
            DependentRow::Pickup(gem) => {
                handle.kind = VisualKind::Pickup(gem.level);
            }
            DependentRow::Creature(creature) => {
                handle.hp = creature.hp;
                handle.max_hp = creature.max_hp;
                handle.radius = creature.radius;
                handle.speed = creature.speed;
                handle.sync_hp_bar(backend);
            }
            DependentRow::Projectile(attack) => {
                handle.radius = attack.radius;
                handle.aux.ticks = attack.ticks_elapsed as f32;
                handle.owner = attack.owner_entity_id;
                handle.target = attack.target_entity_id;
                handle.id_within_burst = attack.id_within_burst;
                handle.aux.orbit_base_degrees = attack.parameter_u as f32;
                handle.aux.orbit_phase = attack.parameter_f;
                outcome = retype(handle, attack.attack_type.as_deref(), attack.legacy_type_id, source);
            }
            DependentRow::AreaAttack(area) => {
                handle.radius = area.radius;
                handle.aux.ticks = area.ticks_elapsed as f32;
                handle.owner = area.owner_entity_id;
                outcome = retype(handle, area.attack_type.as_deref(), area.legacy_type_id, source);
                if let Some(def) = handle.kind.attack().and_then(|k| source.find_attack_definition(k)) {
                    handle.aux.scale = area_scale(area.radius, &def);
                    backend.set_scale(handle.resources.body, Vec2::new(handle.aux.scale, handle.aux.scale));
                }
            }
        }

        let entity = row.entity_id();
        let rebound = entity != handle.entity_id;
        if rebound {
            debug!(key = %key, from = %handle.entity_id, to = %entity, "visual rebound to new entity");
            if self.by_entity.get(&handle.entity_id) == Some(&key) {
                self.by_entity.remove(&handle.entity_id);
            }
            handle.entity_id = entity;
            handle.awaiting_entity = true;
            self.by_entity.insert(entity, key);
        }
        outcome.map(|_| rebound)
    }

    /// Routes an authoritative entity update to the handle bound to it.
    pub fn apply_authoritative(
        &mut self,
        entity: &EntityRow,
        policy: &CorrectionPolicy,
        reference_dt: f32,
        tick_dt: f32,
        backend: &mut dyn RenderBackend,
    ) -> Option<(VisualKey, Correction)> {
        let key = *self.by_entity.get(&entity.entity_id)?;
        let handle = self.handles.get_mut(&key)?;
        if handle.awaiting_entity {
            handle.awaiting_entity = false;
            handle.direction = entity.direction.normalize();
            handle.is_moving = entity.is_moving;
            handle.place_at(entity.position, backend);
            return Some((key, Correction::Placed));
        }
        let outcome = correction::reconcile(handle, entity, policy, reference_dt, tick_dt);
        if outcome.moves_drawables() {
            handle.resources.place(backend, handle.predicted, handle.radius);
        }
        Some((key, outcome))
    }

    /// Puts a live handle at `position` immediately.
    pub fn place(&mut self, key: VisualKey, position: Vec2, backend: &mut dyn RenderBackend) -> bool {
        match self.handles.get_mut(&key) {
            Some(handle) => {
                handle.awaiting_entity = false;
                handle.place_at(position, backend);
                true
            }
            None => false,
        }
    }

    /// Detaches a handle and hands its drawables to the exit effects.
    pub fn remove(&mut self, key: VisualKey, backend: &mut dyn RenderBackend, exits: &mut ExitEffects) -> bool {
        let Some(handle) = self.handles.remove(&key) else {
            return false;
        };
        if self.by_entity.get(&handle.entity_id) == Some(&key) {
            self.by_entity.remove(&handle.entity_id);
        }
        exits.start(key, handle.resources.all(), handle.aux.alpha, backend);
        debug!(key = %key, "visual removed");
        true
    }

    /// Destroys every owned drawable and forgets every handle.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for (_, handle) in self.handles.drain() {
            handle.resources.destroy(backend);
        }
        self.by_entity.clear();
    }

    pub fn get(&self, key: VisualKey) -> Option<&VisualHandle> {
        self.handles.get(&key)
    }

    pub fn get_mut(&mut self, key: VisualKey) -> Option<&mut VisualHandle> {
        self.handles.get_mut(&key)
    }

    pub fn contains(&self, key: VisualKey) -> bool {
        self.handles.contains_key(&key)
    }

    pub fn key_for_entity(&self, entity: EntityId) -> Option<VisualKey> {
        self.by_entity.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisualHandle> {
        self.handles.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut VisualHandle> {
        self.handles.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = VisualKey> + '_ {
        self.handles.keys().copied()
    }
}

fn definition(source: &dyn ReplicaSource, kind: AttackKind) -> Result<AttackDefinition, RegistryError> {
    source
        .find_attack_definition(kind)
        .ok_or(RegistryError::MissingDefinition(kind))
}

fn area_scale(radius: f32, def: &AttackDefinition) -> f32 {
    if def.radius > 0.0 {
        radius / def.radius
    } else {
        1.0
    }
}

/// Re-derives the attack kind after a type change. The old kind stays when
/// the new one cannot be resolved.
fn retype(
    handle: &mut VisualHandle,
    tag: Option<&str>,
    legacy_id: u32,
    source: &dyn ReplicaSource,
) -> Result<(), RegistryError> {
    let Some(current) = handle.kind.attack() else {
        return Ok(());
    };
    let kind = resolve_attack_kind(tag, legacy_id)?;
    if kind == current {
        return Ok(());
    }
    let def = definition(source, kind)?;
    handle.speed = def.speed;
    handle.aux.lifetime_ms = def.duration_ms as f32;
    handle.rotation_model = RotationModel::for_attack(kind);
    match handle.kind {
        VisualKind::Projectile(_) => {
            handle.kind = VisualKind::Projectile(kind);
            handle.mover = Mover::Predicted(Archetype::for_projectile(kind));
            handle.velocity = handle.direction * def.speed;
        }
        _ => {
            handle.kind = VisualKind::AreaAttack(kind);
            handle.rotation_model = RotationModel::Fixed;
        }
    }
    debug!(key = %handle.key, from = %current, to = %kind, "visual retyped");
    Ok(())
}
