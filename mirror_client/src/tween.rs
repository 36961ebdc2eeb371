//! Tweens and exit effects.
//!
//! Creatures walk toward their latest authoritative position over a short
//! fixed duration instead of being extrapolated. Deleted visuals fade out on
//! a separate list: only their alpha changes, and once the fade finishes the
//! drawables are destroyed.

use mirror_shared::{
    math::Vec2,
    render::{DrawableId, RenderBackend},
    rows::VisualKey,
};

/// Linear move from `from` to `to` over `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionTween {
    from: Vec2,
    to: Vec2,
    elapsed_ms: f32,
    duration_ms: f32,
}

impl PositionTween {
    pub fn new(from: Vec2, to: Vec2, duration_ms: f32) -> Self {
        Self {
            from,
            to,
            elapsed_ms: 0.0,
            duration_ms,
        }
    }

    /// Advances the tween and returns the position to render.
    pub fn advance(&mut self, delta_ms: f32) -> Vec2 {
        self.elapsed_ms += delta_ms;
        self.position()
    }

    pub fn position(&self) -> Vec2 {
        if self.duration_ms <= 0.0 {
            return self.to;
        }
        self.from.lerp(self.to, self.elapsed_ms / self.duration_ms)
    }

    pub fn target(&self) -> Vec2 {
        self.to
    }

    pub fn is_done(&self) -> bool {
        self.elapsed_ms >= self.duration_ms
    }
}

/// A deleted visual's drawables, fading out.
#[derive(Debug, Clone)]
pub struct FadeOut {
    pub key: VisualKey,
    drawables: Vec<DrawableId>,
    start_alpha: f32,
    elapsed_ms: f32,
}

/// Fades in flight.
#[derive(Debug, Default)]
pub struct ExitEffects {
    duration_ms: f32,
    fades: Vec<FadeOut>,
}

impl ExitEffects {
    pub fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms: duration_ms as f32,
            fades: Vec::new(),
        }
    }

    /// Takes ownership of `drawables`. With a zero duration they are
    /// destroyed right away.
    pub fn start(
        &mut self,
        key: VisualKey,
        drawables: Vec<DrawableId>,
        start_alpha: f32,
        backend: &mut dyn RenderBackend,
    ) {
        if self.duration_ms <= 0.0 {
            for id in drawables {
                backend.destroy(id);
            }
            return;
        }
        self.fades.push(FadeOut {
            key,
            drawables,
            start_alpha,
            elapsed_ms: 0.0,
        });
    }

    /// Advances every fade; returns the keys whose drawables were destroyed.
    pub fn advance(&mut self, delta_ms: f32, backend: &mut dyn RenderBackend) -> Vec<VisualKey> {
        let duration = self.duration_ms;
        let mut finished = Vec::new();
        self.fades.retain_mut(|fade| {
            fade.elapsed_ms += delta_ms;
            if fade.elapsed_ms >= duration {
                for id in &fade.drawables {
                    backend.destroy(*id);
                }
                finished.push(fade.key);
                return false;
            }
            let alpha = fade.start_alpha * (1.0 - fade.elapsed_ms / duration);
            for id in &fade.drawables {
                backend.set_alpha(*id, alpha);
            }
            true
        });
        finished
    }

    pub fn contains(&self, key: VisualKey) -> bool {
        self.fades.iter().any(|f| f.key == key)
    }

    /// Drawables still owned by fades.
    pub fn drawables(&self) -> impl Iterator<Item = DrawableId> + '_ {
        self.fades.iter().flat_map(|f| f.drawables.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.fades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fades.is_empty()
    }

    /// Stops every fade and destroys its drawables.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for fade in self.fades.drain(..) {
            for id in fade.drawables {
                backend.destroy(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_shared::render::{DrawableSpec, Layer, RecordingRenderer};

    #[test]
    fn tween_reaches_target() {
        let mut t = PositionTween::new(Vec2::ZERO, Vec2::new(10.0, 0.0), 100.0);
        assert_eq!(t.advance(50.0), Vec2::new(5.0, 0.0));
        assert!(!t.is_done());
        assert_eq!(t.advance(80.0), Vec2::new(10.0, 0.0));
        assert!(t.is_done());
    }

    #[test]
    fn fade_then_destroy() {
        let mut backend = RecordingRenderer::new();
        let id = backend.create(DrawableSpec::new(Layer::Body, "gem_1", Vec2::ZERO));
        let mut exits = ExitEffects::new(200);
        exits.start(VisualKey::Pickup(1), vec![id], 1.0, &mut backend);

        assert!(exits.advance(100.0, &mut backend).is_empty());
        assert!((backend.alpha(id).unwrap() - 0.5).abs() < 1e-5);

        let done = exits.advance(100.0, &mut backend);
        assert_eq!(done, vec![VisualKey::Pickup(1)]);
        assert!(!backend.is_live(id));
        assert!(exits.is_empty());
    }

    #[test]
    fn zero_duration_destroys_immediately() {
        let mut backend = RecordingRenderer::new();
        let id = backend.create(DrawableSpec::new(Layer::Body, "gem_1", Vec2::ZERO));
        let mut exits = ExitEffects::new(0);
        exits.start(VisualKey::Pickup(1), vec![id], 1.0, &mut backend);
        assert!(!backend.is_live(id));
        assert!(exits.is_empty());
    }
}
