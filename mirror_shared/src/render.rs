//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! A backend only needs to create drawables and apply transforms to them.

use std::collections::{HashMap, HashSet};

use crate::math::Vec2;

/// Handle to a backend-owned drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub u64);

/// Draw order bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Shadow,
    Ground,
    Body,
    Overlay,
}

/// What to create.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawableSpec {
    pub layer: Layer,
    pub sprite: String,
    pub position: Vec2,
}

impl DrawableSpec {
    pub fn new(layer: Layer, sprite: impl Into<String>, position: Vec2) -> Self {
        Self {
            layer,
            sprite: sprite.into(),
            position,
        }
    }
}

/// A minimal rendering API.
pub trait RenderBackend {
    fn create(&mut self, spec: DrawableSpec) -> DrawableId;
    fn set_position(&mut self, id: DrawableId, position: Vec2);
    fn set_rotation(&mut self, id: DrawableId, radians: f32);
    fn set_scale(&mut self, id: DrawableId, scale: Vec2);
    fn set_alpha(&mut self, id: DrawableId, alpha: f32);
    fn destroy(&mut self, id: DrawableId);
}

/// A no-op renderer useful for headless runs.
#[derive(Default)]
pub struct NullRenderer {
    next_id: u64,
}

impl RenderBackend for NullRenderer {
    fn create(&mut self, _spec: DrawableSpec) -> DrawableId {
        self.next_id += 1;
        DrawableId(self.next_id)
    }
    fn set_position(&mut self, _id: DrawableId, _position: Vec2) {}
    fn set_rotation(&mut self, _id: DrawableId, _radians: f32) {}
    fn set_scale(&mut self, _id: DrawableId, _scale: Vec2) {}
    fn set_alpha(&mut self, _id: DrawableId, _alpha: f32) {}
    fn destroy(&mut self, _id: DrawableId) {}
}

/// One call made against a [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    Create(DrawableId, DrawableSpec),
    Position(DrawableId, Vec2),
    Rotation(DrawableId, f32),
    Scale(DrawableId, Vec2),
    Alpha(DrawableId, f32),
    Destroy(DrawableId),
}

impl RenderCall {
    pub fn target(&self) -> DrawableId {
        match self {
            RenderCall::Create(id, _)
            | RenderCall::Position(id, _)
            | RenderCall::Rotation(id, _)
            | RenderCall::Scale(id, _)
            | RenderCall::Alpha(id, _)
            | RenderCall::Destroy(id) => *id,
        }
    }
}

/// State of one drawable as last set.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawableState {
    pub spec: DrawableSpec,
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    pub alpha: f32,
}

/// Backend that keeps every call and the last known state of each drawable.
#[derive(Default)]
pub struct RecordingRenderer {
    next_id: u64,
    calls: Vec<RenderCall>,
    live: HashMap<DrawableId, DrawableState>,
    destroyed: HashSet<DrawableId>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[RenderCall] {
        &self.calls
    }

    /// Forgets recorded calls; drawable state is kept.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: DrawableId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn was_destroyed(&self, id: DrawableId) -> bool {
        self.destroyed.contains(&id)
    }

    pub fn state(&self, id: DrawableId) -> Option<&DrawableState> {
        self.live.get(&id)
    }

    pub fn position(&self, id: DrawableId) -> Option<Vec2> {
        self.live.get(&id).map(|s| s.position)
    }

    pub fn scale(&self, id: DrawableId) -> Option<Vec2> {
        self.live.get(&id).map(|s| s.scale)
    }

    pub fn alpha(&self, id: DrawableId) -> Option<f32> {
        self.live.get(&id).map(|s| s.alpha)
    }

    /// Recorded calls that touched `id`, in order.
    pub fn calls_for(&self, id: DrawableId) -> Vec<&RenderCall> {
        self.calls.iter().filter(|c| c.target() == id).collect()
    }

    fn touch(&mut self, id: DrawableId, f: impl FnOnce(&mut DrawableState)) {
        if let Some(state) = self.live.get_mut(&id) {
            f(state);
        }
    }
}

impl RenderBackend for RecordingRenderer {
    fn create(&mut self, spec: DrawableSpec) -> DrawableId {
        self.next_id += 1;
        let id = DrawableId(self.next_id);
        self.live.insert(
            id,
            DrawableState {
                position: spec.position,
                spec: spec.clone(),
                rotation: 0.0,
                scale: Vec2::ONE,
                alpha: 1.0,
            },
        );
        self.calls.push(RenderCall::Create(id, spec));
        id
    }

    fn set_position(&mut self, id: DrawableId, position: Vec2) {
        self.calls.push(RenderCall::Position(id, position));
        self.touch(id, |s| s.position = position);
    }

    fn set_rotation(&mut self, id: DrawableId, radians: f32) {
        self.calls.push(RenderCall::Rotation(id, radians));
        self.touch(id, |s| s.rotation = radians);
    }

    fn set_scale(&mut self, id: DrawableId, scale: Vec2) {
        self.calls.push(RenderCall::Scale(id, scale));
        self.touch(id, |s| s.scale = scale);
    }

    fn set_alpha(&mut self, id: DrawableId, alpha: f32) {
        self.calls.push(RenderCall::Alpha(id, alpha));
        self.touch(id, |s| s.alpha = alpha);
    }

    fn destroy(&mut self, id: DrawableId) {
        self.calls.push(RenderCall::Destroy(id));
        if self.live.remove(&id).is_some() {
            self.destroyed.insert(id);
        }
    }
}
