//! Event and messaging system.
//!
//! This is a small typed event bus. The visual subsystem owns one and
//! publishes lifecycle events on it; audio and UI consumers drain the types
//! they care about once per frame.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::{math::Vec2, rows::VisualKey};

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an event into the queue.
    pub fn push<E: 'static>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Number of queued events of a type.
    pub fn len<E: 'static>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|q| q.downcast_ref::<Vec<E>>())
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

/// Lifecycle events of live visuals.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualEvent {
    Spawned { key: VisualKey, position: Vec2 },
    Despawned { key: VisualKey },
    /// A prediction drifted past its threshold and was snapped.
    Corrected { key: VisualKey, error_sq: f32 },
    /// A creature jumped instead of walking.
    Teleported { key: VisualKey, from: Vec2, to: Vec2 },
}

impl VisualEvent {
    pub fn key(&self) -> VisualKey {
        match self {
            VisualEvent::Spawned { key, .. }
            | VisualEvent::Despawned { key }
            | VisualEvent::Corrected { key, .. }
            | VisualEvent::Teleported { key, .. } => *key,
        }
    }
}

/// Running totals of drained `VisualEvent`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub spawned: u64,
    pub despawned: u64,
    pub corrected: u64,
    pub teleported: u64,
}

impl EventCounts {
    pub fn tally(&mut self, event: &VisualEvent) {
        match event {
            VisualEvent::Spawned { .. } => self.spawned += 1,
            VisualEvent::Despawned { .. } => self.despawned += 1,
            VisualEvent::Corrected { .. } => self.corrected += 1,
            VisualEvent::Teleported { .. } => self.teleported += 1,
        }
    }

    /// Empties the bus's `VisualEvent` queue into the totals.
    pub fn drain_from(&mut self, bus: &mut EventBus) -> Vec<VisualEvent> {
        let events = bus.drain::<VisualEvent>();
        for event in &events {
            self.tally(event);
        }
        events
    }
}
