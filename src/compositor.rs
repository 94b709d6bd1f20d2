//! Layer compositor with an incremental dirty-index cache.
//!
//! Four targets sized to the viewport: `scratch` isolates one layer's
//! straight color and alpha, `ping`/`pong` alternate as the accumulator, and
//! `cache` holds the composite of layers `[0..=valid_up_to]`.
//!
//! The snapshot is taken right below the edit point (the first dirty layer,
//! or the topmost layer on a full rebuild), so repeated edits of one layer
//! only re-render that layer and everything above it. The final accumulator
//! stays valid between renders and is returned by
//! [`Compositor::color_texture`].
//!
//! Only content dirtiness is tracked: after reordering, adding or removing
//! layers the caller must call [`Compositor::invalidate_cache`].

use crate::backend::{BlendUniforms, FrameUniforms, RenderBackend, TargetId, TextureId};
use crate::error::RenderError;
use crate::layer::{LayerInput, LayerPass};
use crate::layer_stack::LayerStack;
use crate::viewport::{PreviewMode, ViewportFit};

/// Per-frame inputs shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    /// Ambient normal-map override, bound at the reserved texture slot.
    pub normal_map: Option<TextureId>,
    pub use_normal_map: bool,
    pub normal_strength: f32,
    pub normal_scale: f32,
    pub normal_offset: [f32; 2],
    pub preview_mode: PreviewMode,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            normal_map: None,
            use_normal_map: false,
            normal_strength: 1.0,
            normal_scale: 1.0,
            normal_offset: [0.0, 0.0],
            preview_mode: PreviewMode::Single,
        }
    }
}

impl RenderContext {
    /// The normal map only counts as used when a texture is present.
    pub fn normal_map_active(&self) -> bool {
        self.use_normal_map && self.normal_map.is_some()
    }

    pub fn frame_uniforms(&self, fit: ViewportFit) -> FrameUniforms {
        let [sx, sy, sz] = fit.scale;
        FrameUniforms {
            scale: [sx, sy, sz, 0.0],
            normal_offset: self.normal_offset,
            normal_strength: self.normal_strength,
            normal_scale: self.normal_scale,
            preview_mode: self.preview_mode.code(),
            use_normal_map: u32::from(self.normal_map_active()),
            _pad: [0; 2],
        }
    }
}

/// What the last call to [`Compositor::render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Nothing was drawn: the cache already held the result.
    pub cache_hit: bool,
    /// First stack index considered for rendering.
    pub start_index: usize,
    /// Layers that drew and were composited.
    pub layers_rendered: usize,
    /// Enabled layers skipped because they were not ready or failed.
    pub layers_skipped: usize,
}

#[derive(Debug, Clone, Copy)]
struct Targets {
    scratch: TargetId,
    ping: TargetId,
    pong: TargetId,
    cache: TargetId,
}

impl Targets {
    fn allocate(backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<Self, RenderError> {
        let mut created = Vec::with_capacity(4);
        for label in ["compositor-scratch", "compositor-ping", "compositor-pong", "compositor-cache"] {
            match backend.create_target(label, width, height) {
                Ok(target) => created.push(target),
                Err(err) => {
                    for target in created {
                        backend.release_target(target);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            scratch: created[0],
            ping: created[1],
            pong: created[2],
            cache: created[3],
        })
    }

    fn release(self, backend: &mut dyn RenderBackend) {
        for target in [self.scratch, self.ping, self.pong, self.cache] {
            backend.release_target(target);
        }
    }
}

#[derive(Debug, Default)]
pub struct Compositor {
    width: u32,
    height: u32,
    targets: Option<Targets>,
    /// `Some(k)`: layers `[0..=k]` are baked into the cache target.
    valid_up_to: Option<usize>,
    /// Accumulator holding the composite of the whole stack.
    output: Option<TargetId>,
    /// Frame uniforms the cached pixels were rendered with.
    cached_frame: Option<FrameUniforms>,
    last_frame: FrameStats,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate targets for `width`×`height`. Calling it again with the same
    /// size is a no-op.
    pub fn initialize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<(), RenderError> {
        if self.targets.is_some() && (self.width, self.height) == (width, height) {
            return Ok(());
        }
        self.resize(backend, width, height)
    }

    /// Reallocate targets and drop the cache. A degenerate size or an
    /// allocation failure leaves the compositor without targets, which turns
    /// `render` into a no-op.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<(), RenderError> {
        self.invalidate_cache();
        if let Some(targets) = self.targets.take() {
            targets.release(backend);
        }
        self.width = width;
        self.height = height;

        if width == 0 || height == 0 {
            tracing::debug!(width, height, "compositor resized to a degenerate viewport");
            return Err(RenderError::DegenerateSize { width, height });
        }

        match Targets::allocate(backend, width, height) {
            Ok(targets) => {
                tracing::debug!(width, height, backend = backend.name(), "compositor targets allocated");
                self.targets = Some(targets);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(width, height, error = %err, "compositor target allocation failed; rendering disabled");
                Err(err)
            }
        }
    }

    /// Force the next render to rebuild every layer.
    pub fn invalidate_cache(&mut self) {
        self.valid_up_to = None;
        self.output = None;
        self.cached_frame = None;
    }

    pub fn cache_valid_up_to(&self) -> Option<usize> {
        self.valid_up_to
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_initialized(&self) -> bool {
        self.targets.is_some()
    }

    /// Target holding the composed image, once a render has completed.
    pub fn color_texture(&self) -> Option<TargetId> {
        self.targets.and(self.output)
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(targets) = self.targets.take() {
            targets.release(backend);
        }
        self.invalidate_cache();
    }

    /// Compose `stack`. The result is available through
    /// [`Compositor::color_texture`].
    ///
    /// Layer failures are logged and the layer is skipped. Errors are only
    /// returned when the compositor's own targets fail; the cache is
    /// invalidated in that case.
    pub fn render(
        &mut self,
        backend: &mut dyn RenderBackend,
        stack: &mut LayerStack,
        ctx: &RenderContext,
    ) -> Result<FrameStats, RenderError> {
        let Some(targets) = self.targets else {
            self.last_frame = FrameStats::default();
            return Ok(self.last_frame);
        };

        let frame = ctx.frame_uniforms(ViewportFit::compute(self.width, self.height, ctx.preview_mode));
        if self.cached_frame != Some(frame) {
            if self.cached_frame.is_some() {
                tracing::debug!("frame uniforms changed; invalidating compositor cache");
            }
            self.invalidate_cache();
        }

        let first_dirty = stack
            .iter()
            .position(|layer| layer.is_enabled() && layer.is_ready() && layer.is_dirty());

        let start = match first_dirty {
            None if self.output.is_some() => {
                self.last_frame = FrameStats {
                    cache_hit: true,
                    start_index: stack.len(),
                    ..FrameStats::default()
                };
                return Ok(self.last_frame);
            }
            // The snapshot never contains a dirty layer; everything between it
            // and `first` is clean and gets redrawn on top of it.
            Some(first) => match self.valid_up_to {
                Some(valid) if valid < first => valid + 1,
                _ => 0,
            },
            None => 0,
        };
        let snapshot_at = match first_dirty {
            Some(first) if first > 0 => Some(first),
            _ => stack.iter().rposition(|layer| layer.is_enabled()),
        };

        match self.compose(backend, stack, targets, frame, ctx.normal_map, start, snapshot_at) {
            Ok((stats, output)) => {
                self.output = Some(output);
                self.cached_frame = Some(frame);
                self.last_frame = stats;
                tracing::trace!(
                    start = stats.start_index,
                    rendered = stats.layers_rendered,
                    skipped = stats.layers_skipped,
                    valid_up_to = ?self.valid_up_to,
                    "compositor frame"
                );
                Ok(stats)
            }
            Err(err) => {
                tracing::warn!(error = %err, "compositor frame failed");
                self.invalidate_cache();
                Err(err)
            }
        }
    }

    /// Run the ping-pong loop from `start`. Before the layer at
    /// `snapshot_at` the accumulator is copied into the cache target.
    /// Returns the accumulator holding the result.
    fn compose(
        &mut self,
        backend: &mut dyn RenderBackend,
        stack: &mut LayerStack,
        targets: Targets,
        frame: FrameUniforms,
        normal_map: Option<TextureId>,
        start: usize,
        snapshot_at: Option<usize>,
    ) -> Result<(FrameStats, TargetId), RenderError> {
        let mut stats = FrameStats {
            start_index: start,
            ..FrameStats::default()
        };

        self.output = None;
        backend.clear_target(targets.ping)?;
        backend.clear_target(targets.pong)?;
        let (mut current, mut other) = (targets.ping, targets.pong);
        if start > 0 {
            backend.copy_target(targets.cache, current)?;
        } else {
            self.valid_up_to = None;
        }

        let normal_map = (frame.use_normal_map != 0).then_some(normal_map).flatten();

        for (index, layer) in stack.layers_mut().iter_mut().enumerate().skip(start) {
            if index > start && snapshot_at == Some(index) {
                backend.copy_target(current, targets.cache)?;
                self.valid_up_to = Some(index - 1);
            }
            if !layer.is_enabled() {
                continue;
            }
            if !layer.is_ready() {
                stats.layers_skipped += 1;
                continue;
            }

            let result = match layer.input() {
                LayerInput::Geometry => {
                    backend.clear_target(targets.scratch)?;
                    let pass = LayerPass {
                        target: targets.scratch,
                        frame,
                        source: None,
                        normal_map,
                    };
                    layer.render(backend, &pass).map(|()| true)
                }
                LayerInput::Accumulator => {
                    backend.clear_target(other)?;
                    let pass = LayerPass {
                        target: other,
                        frame,
                        source: Some(current),
                        normal_map,
                    };
                    layer.render(backend, &pass).map(|()| false)
                }
            };

            match result {
                Ok(true) => {
                    let uniforms = BlendUniforms {
                        mode: layer.common().blend_mode().id(),
                        opacity: layer.common().opacity(),
                        _pad: [0; 2],
                    };
                    backend.composite(targets.scratch, current, other, uniforms)?;
                    std::mem::swap(&mut current, &mut other);
                    stats.layers_rendered += 1;
                }
                Ok(false) => {
                    std::mem::swap(&mut current, &mut other);
                    stats.layers_rendered += 1;
                }
                Err(err) => {
                    // The accumulator keeps its previous content; the failed
                    // layer is not retried until it changes again.
                    tracing::warn!(index, layer = layer.name(), error = %err, "layer render failed; skipping");
                    stats.layers_skipped += 1;
                }
            }
            layer.common_mut().mark_clean();
        }

        Ok((stats, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::layer::{BaseLayer, Layer};

    fn stack_with_bases(backend: &mut SoftwareBackend, count: usize) -> LayerStack {
        let mut stack = LayerStack::new();
        for _ in 0..count {
            stack.push(Box::new(BaseLayer::new()));
        }
        stack.initialize_all(backend);
        stack
    }

    #[test]
    fn degenerate_size_disables_rendering() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        assert!(matches!(
            compositor.initialize(&mut backend, 0, 0),
            Err(RenderError::DegenerateSize { .. })
        ));
        let mut stack = stack_with_bases(&mut backend, 1);
        let stats = compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");
        assert_eq!(stats, FrameStats::default());
        assert!(stack.get(0).is_some_and(|layer| layer.is_dirty()));
        assert!(compositor.color_texture().is_none());
    }

    #[test]
    fn second_render_is_cache_hit() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 32, 32).expect("init");
        let mut stack = stack_with_bases(&mut backend, 2);
        let ctx = RenderContext::default();

        let first = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert_eq!(first.layers_rendered, 2);
        // Snapshot sits below the topmost layer after a full rebuild.
        assert_eq!(compositor.cache_valid_up_to(), Some(0));

        let second = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert!(second.cache_hit);
        assert_eq!(second.layers_rendered, 0);
    }

    #[test]
    fn dirty_layer_resumes_from_cache() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 32, 32).expect("init");
        let mut stack = stack_with_bases(&mut backend, 3);
        let ctx = RenderContext::default();
        compositor.render(&mut backend, &mut stack, &ctx).expect("render");

        stack.get_mut(2).expect("layer").mark_dirty();
        let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert_eq!(stats.start_index, 2);
        assert_eq!(stats.layers_rendered, 1);
    }

    #[test]
    fn snapshot_moves_to_the_edit_point() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 16, 16).expect("init");
        let mut stack = stack_with_bases(&mut backend, 4);
        let ctx = RenderContext::default();
        compositor.render(&mut backend, &mut stack, &ctx).expect("render");

        // First edit below the snapshot rebuilds and re-anchors it.
        stack.get_mut(1).expect("layer").mark_dirty();
        let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert_eq!(stats.start_index, 0);
        assert_eq!(compositor.cache_valid_up_to(), Some(0));

        stack.get_mut(1).expect("layer").mark_dirty();
        let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert_eq!(stats.start_index, 1);
        assert_eq!(stats.layers_rendered, 3);
    }

    #[test]
    fn preview_mode_change_rebuilds() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 32, 16).expect("init");
        let mut stack = stack_with_bases(&mut backend, 2);
        compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");

        let ctx = RenderContext {
            preview_mode: PreviewMode::Comparison,
            ..RenderContext::default()
        };
        let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert!(!stats.cache_hit);
        assert_eq!(stats.start_index, 0);
        assert_eq!(stats.layers_rendered, 2);
    }

    #[test]
    fn empty_stack_renders_transparent() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 8, 8).expect("init");
        let mut stack = LayerStack::new();
        compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");
        let target = compositor.color_texture().expect("color texture");
        let image = backend.read_target(target).expect("readback");
        assert!(image.pixels().all(|pixel| pixel.0 == [0, 0, 0, 0]));

        let again = compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");
        assert!(again.cache_hit);
    }

    #[test]
    fn unready_layers_are_skipped_and_release_frees_targets() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 16, 16).expect("init");
        assert_eq!(backend.resource_counts().targets, 4);

        let mut stack = LayerStack::new();
        stack.push(Box::new(BaseLayer::new()));
        let stats = compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");
        assert_eq!(stats.layers_skipped, 1);
        assert_eq!(stats.layers_rendered, 0);

        compositor.release(&mut backend);
        assert_eq!(backend.resource_counts().targets, 0);
        assert!(!compositor.is_initialized());
    }

    #[test]
    fn normal_map_flag_requires_a_texture() {
        let ctx = RenderContext {
            use_normal_map: true,
            ..RenderContext::default()
        };
        let frame = ctx.frame_uniforms(ViewportFit::compute(4, 4, PreviewMode::Single));
        assert_eq!(frame.use_normal_map, 0);
        assert_eq!(frame.scale, [1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn disabled_dirty_layer_does_not_trigger_render() {
        let mut backend = SoftwareBackend::new();
        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 16, 16).expect("init");
        let mut stack = stack_with_bases(&mut backend, 2);
        let ctx = RenderContext::default();
        compositor.render(&mut backend, &mut stack, &ctx).expect("render");

        let layer = stack.get_mut(1).expect("layer");
        layer.common_mut().set_enabled(false);
        assert!(layer.is_dirty());
        let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
        assert!(stats.cache_hit);
    }
}
