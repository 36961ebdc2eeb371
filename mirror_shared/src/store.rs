//! Replica cache.
//!
//! An in-memory mirror of the replicated tables plus the capability the
//! client consumes: catch-up snapshots, point lookups, and change
//! subscriptions. Subscriptions are disposable handles; dropping one
//! unregisters it, so there is no reference-matching unsubscribe.
//!
//! Everything here is single-threaded. Changes are queued per subscriber and
//! drained by the subscriber on its own schedule, in arrival order.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::rows::{AttackDefinition, AttackKind, ConfigRow, EntityId, EntityRow, Row, TableId, TableMask};

/// A row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowChange {
    Insert(Row),
    Update { old: Row, new: Row },
    Delete(Row),
}

impl RowChange {
    pub fn table(&self) -> TableId {
        match self {
            RowChange::Insert(row) | RowChange::Delete(row) => row.table(),
            RowChange::Update { new, .. } => new.table(),
        }
    }
}

/// Read side of a replicated store.
pub trait ReplicaSource {
    /// All rows currently present in `table`, in key order.
    fn snapshot(&self, table: TableId) -> Vec<Row>;

    /// Point lookup by primary key.
    fn find_by_index(&self, table: TableId, key: u32) -> Option<Row>;

    /// Registers for changes on `tables`. The subscription stays active
    /// until it is dropped or cancelled.
    fn subscribe(&self, tables: TableMask) -> Subscription;

    fn find_entity(&self, id: EntityId) -> Option<EntityRow> {
        match self.find_by_index(TableId::Entity, id.0) {
            Some(Row::Entity(row)) => Some(row),
            _ => None,
        }
    }

    fn find_attack_definition(&self, kind: AttackKind) -> Option<AttackDefinition> {
        match self.find_by_index(TableId::AttackData, kind.legacy_id()) {
            Some(Row::AttackData(row)) => Some(row),
            _ => None,
        }
    }

    fn game_config(&self) -> Option<ConfigRow> {
        match self.find_by_index(TableId::Config, 0) {
            Some(Row::Config(row)) => Some(row),
            _ => None,
        }
    }
}

type ChangeQueue = Rc<RefCell<VecDeque<RowChange>>>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, TableMask, ChangeQueue)>,
}

/// Handle for a change subscription.
pub struct Subscription {
    id: u64,
    tables: TableMask,
    queue: ChangeQueue,
    listeners: Weak<RefCell<Listeners>>,
}

impl Subscription {
    pub fn tables(&self) -> TableMask {
        self.tables
    }

    /// Number of queued, undrained changes.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Pops the oldest queued change.
    pub fn next_change(&self) -> Option<RowChange> {
        self.queue.borrow_mut().pop_front()
    }

    /// Takes all queued changes in arrival order.
    pub fn drain(&self) -> Vec<RowChange> {
        self.queue.borrow_mut().drain(..).collect()
    }

    /// Returns true while the source still delivers to this subscription.
    pub fn is_active(&self) -> bool {
        self.listeners
            .upgrade()
            .map(|l| l.borrow().entries.iter().any(|(id, _, _)| *id == self.id))
            .unwrap_or(false)
    }

    /// Unregisters explicitly. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .borrow_mut()
                .entries
                .retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tables", &self.tables)
            .field("pending", &self.pending())
            .finish()
    }
}

/// In-memory table store.
#[derive(Default)]
pub struct ReplicaCache {
    tables: HashMap<TableId, BTreeMap<u32, Row>>,
    listeners: Rc<RefCell<Listeners>>,
}

impl ReplicaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a change and fans it out to matching subscribers.
    ///
    /// Inserting an existing key overwrites it; updating or deleting a
    /// missing key is still forwarded so subscribers see every notification.
    pub fn apply(&mut self, change: RowChange) {
        let table = change.table();
        match &change {
            RowChange::Insert(row) | RowChange::Update { new: row, .. } => {
                self.tables
                    .entry(table)
                    .or_default()
                    .insert(row.key(), row.clone());
            }
            RowChange::Delete(row) => {
                let removed = self
                    .tables
                    .get_mut(&table)
                    .and_then(|rows| rows.remove(&row.key()));
                if removed.is_none() {
                    trace!(table = ?table, key = row.key(), "delete for missing row");
                }
            }
        }

        let listeners = self.listeners.borrow();
        for (_, mask, queue) in &listeners.entries {
            if mask.contains(table.mask()) {
                queue.borrow_mut().push_back(change.clone());
            }
        }
    }

    /// Inserts rows without notifying subscribers. Used to seed a cache
    /// from a snapshot before anyone subscribes.
    pub fn load_rows(&mut self, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            self.tables
                .entry(row.table())
                .or_default()
                .insert(row.key(), row);
        }
    }

    /// Every row in every table, tables in declaration order.
    pub fn all_rows(&self) -> Vec<Row> {
        TableId::ALL
            .iter()
            .flat_map(|t| self.snapshot(*t))
            .collect()
    }

    pub fn len(&self, table: TableId) -> usize {
        self.tables.get(&table).map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|t| t.is_empty())
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }

    /// Drops every row. Subscribers are kept.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

impl ReplicaSource for ReplicaCache {
    fn snapshot(&self, table: TableId) -> Vec<Row> {
        self.tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn find_by_index(&self, table: TableId, key: u32) -> Option<Row> {
        self.tables.get(&table).and_then(|rows| rows.get(&key)).cloned()
    }

    fn subscribe(&self, tables: TableMask) -> Subscription {
        let queue: ChangeQueue = Rc::default();
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, tables, queue.clone()));
        Subscription {
            id,
            tables,
            queue,
            listeners: Rc::downgrade(&self.listeners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn entity(id: u32, x: f32, y: f32) -> Row {
        Row::Entity(EntityRow::at(EntityId(id), Vec2::new(x, y)))
    }

    #[test]
    fn apply_and_lookup() {
        let mut cache = ReplicaCache::new();
        cache.apply(RowChange::Insert(entity(1, 100.0, 200.0)));
        let found = cache.find_entity(EntityId(1)).unwrap();
        assert_eq!(found.position, Vec2::new(100.0, 200.0));

        cache.apply(RowChange::Delete(entity(1, 100.0, 200.0)));
        assert!(cache.find_entity(EntityId(1)).is_none());
        assert_eq!(cache.len(TableId::Entity), 0);
    }

    #[test]
    fn subscription_filters_by_mask() {
        let mut cache = ReplicaCache::new();
        let sub = cache.subscribe(TableMask::GEMS);
        cache.apply(RowChange::Insert(entity(1, 0.0, 0.0)));
        assert_eq!(sub.pending(), 0);

        let all = cache.subscribe(TableMask::all());
        cache.apply(RowChange::Insert(entity(2, 0.0, 0.0)));
        assert_eq!(all.pending(), 1);
        assert_eq!(sub.pending(), 0);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let mut cache = ReplicaCache::new();
        let sub = cache.subscribe(TableMask::ENTITY);
        assert!(sub.is_active());
        assert_eq!(cache.subscriber_count(), 1);
        sub.cancel();
        assert_eq!(cache.subscriber_count(), 0);
        cache.apply(RowChange::Insert(entity(1, 0.0, 0.0)));
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let mut cache = ReplicaCache::new();
        let sub = cache.subscribe(TableMask::ENTITY);
        cache.apply(RowChange::Insert(entity(1, 0.0, 0.0)));
        cache.apply(RowChange::Update {
            old: entity(1, 0.0, 0.0),
            new: entity(1, 5.0, 0.0),
        });
        let changes = sub.drain();
        assert!(matches!(changes[0], RowChange::Insert(_)));
        assert!(matches!(changes[1], RowChange::Update { .. }));
        assert_eq!(sub.pending(), 0);
    }

    #[test]
    fn load_rows_is_silent() {
        let mut cache = ReplicaCache::new();
        let sub = cache.subscribe(TableMask::all());
        cache.load_rows(vec![entity(3, 1.0, 1.0)]);
        assert_eq!(sub.pending(), 0);
        assert_eq!(cache.snapshot(TableId::Entity).len(), 1);
    }
}
