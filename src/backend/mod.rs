//! Render resource provider.
//!
//! Layers and the compositor never touch a graphics API directly. They are
//! handed a `&mut dyn RenderBackend` and work with opaque slotmap handles, so
//! several compositors can share one backend and tests can run the same code
//! on the CPU rasterizer.
//!
//! Two implementations:
//!   - [`GpuBackend`]: wgpu pipelines compiled from `shaders/wgsl`.
//!   - [`SoftwareBackend`]: CPU rasterizer evaluating the same shading and
//!     blend math, used for headless rendering and deterministic tests.

mod gpu;
mod shading;
mod software;

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use slotmap::new_key_type;

use crate::blend::BlendMode;
use crate::error::RenderError;
use crate::geometry::MeshData;

pub use gpu::GpuBackend;
pub use software::SoftwareBackend;

new_key_type! {
    /// Color render target (RGBA8 on the GPU, f32 on the CPU).
    pub struct TargetId;
    /// Compiled shader program.
    pub struct ProgramId;
    /// Uploaded vertex/index buffers.
    pub struct MeshId;
    /// Sampled texture.
    pub struct TextureId;
}

/// Which shader a program runs. Each layer variant owns one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Base,
    DirectionalLight,
    SpotLight,
    Fresnel,
    Noise,
    Image,
    /// Full-screen pass over the current accumulator.
    ColorAdjust,
}

impl ShaderKind {
    pub fn label(self) -> &'static str {
        match self {
            ShaderKind::Base => "layer-base",
            ShaderKind::DirectionalLight => "layer-directional-light",
            ShaderKind::SpotLight => "layer-spot-light",
            ShaderKind::Fresnel => "layer-fresnel",
            ShaderKind::Noise => "layer-noise",
            ShaderKind::Image => "layer-image",
            ShaderKind::ColorAdjust => "layer-color-adjust",
        }
    }

    /// Full-screen passes draw a generated triangle instead of a mesh and
    /// have no depth attachment.
    pub fn is_fullscreen(self) -> bool {
        matches!(self, ShaderKind::ColorAdjust)
    }
}

/// Program creation request.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub kind: ShaderKind,
}

impl ProgramDesc {
    pub fn for_kind(kind: ShaderKind) -> Self {
        Self {
            label: kind.label(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Uniforms
// ---------------------------------------------------------------------------

/// Shared per-frame uniform. Matches `FrameUniforms` in `layer_common.wgsl`.
/// 48 bytes, three vec4-sized rows.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// xyz = viewport fit scale, w unused.
    pub scale: [f32; 4],
    pub normal_offset: [f32; 2],
    pub normal_strength: f32,
    pub normal_scale: f32,
    pub preview_mode: u32,
    pub use_normal_map: u32,
    pub _pad: [u32; 2],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            scale: [1.0, 1.0, 1.0, 0.0],
            normal_offset: [0.0, 0.0],
            normal_strength: 1.0,
            normal_scale: 1.0,
            preview_mode: 0,
            use_normal_map: 0,
            _pad: [0; 2],
        }
    }
}

/// Matches `BaseUniforms` in base.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BaseUniforms {
    pub color: [f32; 4],
}

/// Matches `LightUniforms` in directional_light.wgsl.
/// `color.w` carries the intensity.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    pub direction: [f32; 4],
    pub color: [f32; 4],
}

/// Matches `SpotUniforms` in spot_light.wgsl. `shape` = (range, blur, _, _).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SpotUniforms {
    pub direction: [f32; 4],
    pub color: [f32; 4],
    pub shape: [f32; 4],
}

/// Matches `FresnelUniforms` in fresnel.wgsl. `shape` = (power, bias, _, _).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FresnelUniforms {
    pub color: [f32; 4],
    pub shape: [f32; 4],
}

/// Matches `NoiseUniforms` in noise.wgsl. `shape.x` = UV scale.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct NoiseUniforms {
    pub color: [f32; 4],
    pub shape: [f32; 4],
}

/// Matches `ImageUniforms` in image.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ImageUniforms {
    pub scale: f32,
    /// Radians.
    pub rotation: f32,
    /// 0 = spherical (mesh UV), 1 = planar (object XY).
    pub mapping: u32,
    pub has_texture: u32,
}

/// Matches `AdjustUniforms` in color_adjust.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AdjustUniforms {
    /// Turns, [-0.5, 0.5].
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub amount: f32,
    pub _pad: [f32; 3],
}

/// Matches `BlendUniforms` in blend.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendUniforms {
    pub mode: u32,
    pub opacity: f32,
    pub _pad: [u32; 2],
}

/// Parameter block for one draw; the variant must match the program kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShaderParams {
    Base(BaseUniforms),
    DirectionalLight(LightUniforms),
    SpotLight(SpotUniforms),
    Fresnel(FresnelUniforms),
    Noise(NoiseUniforms),
    Image(ImageUniforms),
    ColorAdjust(AdjustUniforms),
}

impl ShaderParams {
    pub fn kind(&self) -> ShaderKind {
        match self {
            ShaderParams::Base(_) => ShaderKind::Base,
            ShaderParams::DirectionalLight(_) => ShaderKind::DirectionalLight,
            ShaderParams::SpotLight(_) => ShaderKind::SpotLight,
            ShaderParams::Fresnel(_) => ShaderKind::Fresnel,
            ShaderParams::Noise(_) => ShaderKind::Noise,
            ShaderParams::Image(_) => ShaderKind::Image,
            ShaderParams::ColorAdjust(_) => ShaderKind::ColorAdjust,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ShaderParams::Base(p) => bytemuck::bytes_of(p),
            ShaderParams::DirectionalLight(p) => bytemuck::bytes_of(p),
            ShaderParams::SpotLight(p) => bytemuck::bytes_of(p),
            ShaderParams::Fresnel(p) => bytemuck::bytes_of(p),
            ShaderParams::Noise(p) => bytemuck::bytes_of(p),
            ShaderParams::Image(p) => bytemuck::bytes_of(p),
            ShaderParams::ColorAdjust(p) => bytemuck::bytes_of(p),
        }
    }
}

/// Largest parameter block; the GPU params buffer is sized for it.
pub const MAX_PARAMS_BYTES: u64 = 64;

// ---------------------------------------------------------------------------
// Draw submission
// ---------------------------------------------------------------------------

/// What a draw samples at the layer texture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureSource {
    #[default]
    None,
    Texture(TextureId),
    /// Read another render target (never the draw's own target).
    Target(TargetId),
}

/// One layer draw. Geometry kinds rasterize `mesh` with a fresh depth
/// buffer; full-screen kinds ignore it. Blending is disabled: the draw
/// overwrites covered pixels of `target`.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub target: TargetId,
    pub program: ProgramId,
    pub mesh: Option<MeshId>,
    pub frame: FrameUniforms,
    pub params: ShaderParams,
    pub texture: TextureSource,
    pub normal_map: Option<TextureId>,
}

/// Count of live resources, for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub targets: usize,
    pub programs: usize,
    pub meshes: usize,
    pub textures: usize,
}

/// The injected resource provider.
pub trait RenderBackend {
    /// Short name for logs ("wgpu", "software").
    fn name(&self) -> &'static str;

    /// Largest width or height accepted for targets and textures.
    fn max_dimension(&self) -> u32;

    fn create_target(&mut self, label: &str, width: u32, height: u32) -> Result<TargetId, RenderError>;
    fn release_target(&mut self, target: TargetId);
    fn target_size(&self, target: TargetId) -> Option<(u32, u32)>;

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, RenderError>;
    fn release_program(&mut self, program: ProgramId);

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<MeshId, RenderError>;
    fn release_mesh(&mut self, mesh: MeshId);

    /// Upload tightly packed RGBA8 texels.
    fn create_texture(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureId, RenderError>;
    fn release_texture(&mut self, texture: TextureId);

    /// Decode an image file and upload it.
    fn load_texture(&mut self, path: &Path) -> Result<TextureId, RenderError> {
        let decoded = image::open(path).map_err(|err| RenderError::TextureLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let rgba = decoded.to_rgba8();
        let label = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image");
        self.create_texture(label, rgba.width(), rgba.height(), rgba.as_raw())
    }

    /// Fill a target with transparent black.
    fn clear_target(&mut self, target: TargetId) -> Result<(), RenderError>;

    /// Copy `src` into `dst`; both must have the same size.
    fn copy_target(&mut self, src: TargetId, dst: TargetId) -> Result<(), RenderError>;

    fn draw(&mut self, call: &DrawCall) -> Result<(), RenderError>;

    /// Run the blend program: `out = blend(src over dst)`. `out` must differ
    /// from both inputs.
    fn composite(
        &mut self,
        src: TargetId,
        dst: TargetId,
        out: TargetId,
        uniforms: BlendUniforms,
    ) -> Result<(), RenderError>;

    /// Read a target back as straight-alpha RGBA8, top row first.
    fn read_target(&mut self, target: TargetId) -> Result<RgbaImage, RenderError>;

    fn resource_counts(&self) -> ResourceCounts;
}

/// Pick a backend: wgpu unless `software` is requested or no adapter exists.
pub fn create_backend(software: bool) -> Box<dyn RenderBackend> {
    if software {
        return Box::new(SoftwareBackend::new());
    }
    match pollster::block_on(GpuBackend::new()) {
        Ok(backend) => Box::new(backend),
        Err(err) => {
            tracing::warn!(error = %err, "GPU backend unavailable, falling back to software rasterizer");
            Box::new(SoftwareBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uniforms_is_48_bytes() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 48);
    }

    #[test]
    fn params_blocks_are_vec4_multiples_within_buffer() {
        let sizes = [
            std::mem::size_of::<BaseUniforms>(),
            std::mem::size_of::<LightUniforms>(),
            std::mem::size_of::<SpotUniforms>(),
            std::mem::size_of::<FresnelUniforms>(),
            std::mem::size_of::<NoiseUniforms>(),
            std::mem::size_of::<ImageUniforms>(),
            std::mem::size_of::<AdjustUniforms>(),
            std::mem::size_of::<BlendUniforms>(),
        ];
        for size in sizes {
            assert_eq!(size % 16, 0);
            assert!(size as u64 <= MAX_PARAMS_BYTES);
        }
    }

    #[test]
    fn shader_params_report_their_kind() {
        let params = ShaderParams::Fresnel(FresnelUniforms::zeroed());
        assert_eq!(params.kind(), ShaderKind::Fresnel);
        assert_eq!(params.as_bytes().len(), 32);
    }

    #[test]
    fn only_color_adjust_is_fullscreen() {
        assert!(ShaderKind::ColorAdjust.is_fullscreen());
        assert!(!ShaderKind::Image.is_fullscreen());
    }
}
