//! Pending association store.
//!
//! Holds dependent rows whose `Entity` counterpart has not been observed yet.
//! One record per entity id, last write wins. A key is never pending under
//! two entity ids at once.

use std::collections::HashMap;

use mirror_shared::rows::{DependentRow, EntityId, VisualKey};

#[derive(Default, Debug)]
pub struct PendingStore {
    by_entity: HashMap<EntityId, DependentRow>,
    by_key: HashMap<VisualKey, EntityId>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `row` until its entity shows up.
    ///
    /// Returns whatever record it displaced: the previous record for the
    /// same entity, or a stale record for the same key under another entity.
    pub fn stash(&mut self, row: DependentRow) -> Option<DependentRow> {
        let key = row.key();
        let entity = row.entity_id();

        let stale = match self.by_key.get(&key) {
            Some(prev) if *prev != entity => {
                let prev = *prev;
                self.by_entity.remove(&prev)
            }
            _ => None,
        };

        let replaced = self.by_entity.insert(entity, row);
        if let Some(old) = &replaced {
            if old.key() != key {
                self.by_key.remove(&old.key());
            }
        }
        self.by_key.insert(key, entity);
        replaced.or(stale)
    }

    /// Removes and returns the record waiting on `entity`.
    pub fn take_for_entity(&mut self, entity: EntityId) -> Option<DependentRow> {
        let row = self.by_entity.remove(&entity)?;
        self.by_key.remove(&row.key());
        Some(row)
    }

    /// Drops the record for `key`, wherever it waits.
    pub fn purge_key(&mut self, key: VisualKey) -> Option<DependentRow> {
        let entity = self.by_key.remove(&key)?;
        self.by_entity.remove(&entity)
    }

    pub fn contains_key(&self, key: VisualKey) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn get_by_entity(&self, entity: EntityId) -> Option<&DependentRow> {
        self.by_entity.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = VisualKey> + '_ {
        self.by_key.keys().copied()
    }

    pub fn clear(&mut self) {
        self.by_entity.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_shared::rows::{CreatureRow, GemLevel, MonsterType, MonsterVariant, PickupRow};

    fn gem(id: u32, entity: u32) -> DependentRow {
        DependentRow::Pickup(PickupRow {
            gem_id: id,
            entity_id: EntityId(entity),
            level: GemLevel::Small,
            value: 1,
        })
    }

    fn rat(id: u32, entity: u32, hp: u32) -> DependentRow {
        DependentRow::Creature(CreatureRow {
            monster_id: id,
            entity_id: EntityId(entity),
            bestiary: MonsterType::Rat,
            variant: MonsterVariant::Default,
            hp,
            max_hp: 10,
            radius: 24.0,
            speed: 100.0,
        })
    }

    #[test]
    fn last_write_wins_per_entity() {
        let mut store = PendingStore::new();
        assert!(store.stash(rat(1, 5, 10)).is_none());
        let displaced = store.stash(rat(1, 5, 7));
        assert_eq!(displaced, Some(rat(1, 5, 10)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_for_entity(EntityId(5)), Some(rat(1, 5, 7)));
        assert!(store.is_empty());
        assert!(!store.contains_key(VisualKey::Creature(1)));
    }

    #[test]
    fn replacing_entity_record_drops_old_key() {
        let mut store = PendingStore::new();
        store.stash(gem(1, 5));
        store.stash(gem(2, 5));
        assert!(!store.contains_key(VisualKey::Pickup(1)));
        assert!(store.contains_key(VisualKey::Pickup(2)));
    }

    #[test]
    fn moving_key_to_new_entity_purges_stale_record() {
        let mut store = PendingStore::new();
        store.stash(gem(1, 5));
        let stale = store.stash(gem(1, 6));
        assert_eq!(stale, Some(gem(1, 5)));
        assert!(store.get_by_entity(EntityId(5)).is_none());
        assert!(store.get_by_entity(EntityId(6)).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_key_removes_both_sides() {
        let mut store = PendingStore::new();
        store.stash(gem(3, 9));
        assert_eq!(store.purge_key(VisualKey::Pickup(3)), Some(gem(3, 9)));
        assert!(store.take_for_entity(EntityId(9)).is_none());
        assert!(store.purge_key(VisualKey::Pickup(3)).is_none());
    }
}
