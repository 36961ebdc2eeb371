//! Row ingress.
//!
//! Routes replicated row changes into the registry and the pending store.
//! A dependent row becomes a visual only once its entity is known; until
//! then it waits in the pending store, and the entity's arrival drains it.

use mirror_shared::{
    event::VisualEvent,
    render::RenderBackend,
    rows::{DependentRow, EntityRow, Row, VisualKey},
    store::{ReplicaSource, RowChange},
};
use tracing::{debug, warn};

use crate::{correction::Correction, subsystem::VisualSubsystem};

impl<B: RenderBackend> VisualSubsystem<B> {
    pub fn apply_change(&mut self, source: &dyn ReplicaSource, change: &RowChange) {
        match change {
            RowChange::Insert(row) => self.on_insert(source, row),
            RowChange::Update { old, new } => self.on_update(source, old, new),
            RowChange::Delete(row) => self.on_delete(row),
        }
    }

    pub fn on_insert(&mut self, source: &dyn ReplicaSource, row: &Row) {
        match row {
            Row::Entity(entity) => self.on_entity_upsert(source, entity),
            Row::AttackData(def) => debug!(kind = %def.kind, speed = def.speed, "attack definition replicated"),
            Row::Config(cfg) => debug!(tick_rate_ms = cfg.tick_rate_ms, "config replicated"),
            _ => {
                if let Some(dep) = row.as_dependent() {
                    self.on_dependent_upsert(source, dep);
                }
            }
        }
    }

    /// Updates follow the insert path; only the new row matters.
    pub fn on_update(&mut self, source: &dyn ReplicaSource, old: &Row, new: &Row) {
        if old.table() != new.table() || old.key() != new.key() {
            warn!(old = ?old.table(), new = ?new.table(), "update changed row identity");
        }
        self.on_insert(source, new);
    }

    pub fn on_delete(&mut self, row: &Row) {
        match row {
            Row::Entity(entity) => {
                debug!(entity = %entity.entity_id, "entity deleted");
            }
            Row::AttackData(_) | Row::Config(_) => {
                debug!(table = ?row.table(), "definition deleted");
            }
            _ => {
                if let Some(dep) = row.as_dependent() {
                    self.on_dependent_delete(dep.key());
                }
            }
        }
    }

    pub(crate) fn on_dependent_upsert(&mut self, source: &dyn ReplicaSource, row: DependentRow) {
        let key = row.key();
        if self.registry.contains(key) {
            match self.registry.update_fields(&row, source, &mut self.backend) {
                Ok(true) => {
                    if let Some(entity) = source.find_entity(row.entity_id()) {
                        self.registry.place(key, entity.position, &mut self.backend);
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(key = %key, error = %err, "visual update skipped"),
            }
            return;
        }

        match source.find_entity(row.entity_id()) {
            Some(entity) => {
                self.pending.purge_key(key);
                self.spawn(source, &row, &entity);
            }
            None => {
                let entity = row.entity_id();
                if let Some(displaced) = self.pending.stash(row) {
                    debug!(key = %key, entity = %entity, displaced = %displaced.key(), "pending record replaced");
                } else {
                    debug!(key = %key, entity = %entity, "waiting for entity");
                }
            }
        }
    }

    fn on_entity_upsert(&mut self, source: &dyn ReplicaSource, entity: &EntityRow) {
        let bound = self.registry.key_for_entity(entity.entity_id);
        let Some(record) = self.pending.take_for_entity(entity.entity_id) else {
            self.correct(source, entity);
            return;
        };

        let key = record.key();
        if bound.is_some() && bound != Some(key) {
            self.correct(source, entity);
        }
        if self.registry.contains(key) {
            self.registry.place(key, entity.position, &mut self.backend);
        } else {
            self.spawn(source, &record, entity);
        }
    }

    /// Reconciles the visual bound to `entity` with its new row.
    fn correct(&mut self, source: &dyn ReplicaSource, entity: &EntityRow) {
        let tick_dt = self.tick_dt(source);
        let outcome = self.registry.apply_authoritative(
            entity,
            &self.policy,
            tick_dt,
            tick_dt,
            &mut self.backend,
        );
        if let Some((key, correction)) = outcome {
            self.record_correction(key, correction);
        }
    }

    fn on_dependent_delete(&mut self, key: VisualKey) {
        let removed = self.registry.remove(key, &mut self.backend, &mut self.exits);
        let purged = self.pending.purge_key(key).is_some();
        if removed {
            self.events.push(VisualEvent::Despawned { key });
        } else if !purged {
            debug!(key = %key, "delete for unknown visual");
        }
    }

    fn spawn(&mut self, source: &dyn ReplicaSource, row: &DependentRow, entity: &EntityRow) -> bool {
        let tick_dt = self.tick_dt(source);
        match self.registry.create(row, entity, source, tick_dt, &mut self.backend) {
            Ok(handle) => {
                let event = VisualEvent::Spawned {
                    key: handle.key,
                    position: handle.predicted,
                };
                self.events.push(event);
                true
            }
            Err(err) => {
                warn!(key = %row.key(), entity = %entity.entity_id, error = %err, "visual not created");
                false
            }
        }
    }

    fn record_correction(&mut self, key: VisualKey, correction: Correction) {
        let label = self
            .registry
            .get(key)
            .and_then(|h| h.archetype())
            .map(|a| a.name())
            .unwrap_or("creature");
        match correction {
            Correction::Kept { error_sq } => {
                self.drift.entry(label).or_default().record(error_sq, false);
            }
            Correction::Snapped { error_sq } => {
                self.drift.entry(label).or_default().record(error_sq, true);
                self.events.push(VisualEvent::Corrected { key, error_sq });
            }
            Correction::Teleported { from, to } => {
                debug!(key = %key, distance = from.distance_sq(to).sqrt(), "creature teleported");
                self.events.push(VisualEvent::Teleported { key, from, to });
            }
            Correction::Tweening { .. } => {}
            Correction::Placed => {
                debug!(key = %key, "visual placed at its new entity");
            }
        }
    }
}
