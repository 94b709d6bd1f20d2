//! CPU reference backend.
//!
//! Targets are f32 RGBA surfaces. Meshes are rasterized with edge functions
//! and a per-draw depth buffer; fragments are shaded by [`super::shading`],
//! and composites run [`crate::blend::composite`] per pixel. Output matches
//! the wgpu backend up to 8-bit quantization, without needing an adapter.

use image::RgbaImage;
use slotmap::SlotMap;

use super::shading::{self, Fragment, TexelView};
use super::{
    BlendUniforms, DrawCall, MeshId, ProgramDesc, ProgramId, RenderBackend, ResourceCounts,
    ShaderKind, ShaderParams, TargetId, TextureId, TextureSource,
};
use crate::blend::{self, BlendMode};
use crate::error::RenderError;
use crate::geometry::MeshData;

/// Default size limit, matching common GPU `max_texture_dimension_2d`.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Clone, Default)]
struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Surface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    fn view(&self) -> TexelView<'_> {
        TexelView {
            width: self.width,
            height: self.height,
            texels: &self.pixels,
        }
    }
}

/// Operation counters, handy for asserting cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftwareStats {
    pub draws: u64,
    pub composites: u64,
    pub copies: u64,
    pub clears: u64,
}

pub struct SoftwareBackend {
    max_dimension: u32,
    targets: SlotMap<TargetId, Surface>,
    programs: SlotMap<ProgramId, ShaderKind>,
    meshes: SlotMap<MeshId, MeshData>,
    textures: SlotMap<TextureId, Surface>,
    stats: SoftwareStats,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_max_dimension(DEFAULT_MAX_DIMENSION)
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension,
            targets: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            stats: SoftwareStats::default(),
        }
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SoftwareStats::default();
    }

    fn check_size(&self, what: &'static str, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::DegenerateSize { width, height });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(RenderError::allocation(
                what,
                width,
                height,
                format!("exceeds maximum dimension {}", self.max_dimension),
            ));
        }
        Ok(())
    }

    fn draw_mesh(&self, surface: &mut Surface, call: &DrawCall) -> Result<(), RenderError> {
        let mesh_id = call.mesh.ok_or(RenderError::UnknownHandle("mesh"))?;
        let mesh = self
            .meshes
            .get(mesh_id)
            .ok_or(RenderError::UnknownHandle("mesh"))?;
        let layer_texture = self.texture_view(call.texture)?;
        let normal_map = match call.normal_map {
            Some(id) => self
                .textures
                .get(id)
                .map(Surface::view)
                .ok_or(RenderError::UnknownHandle("texture"))?,
            None => shading::flat_normal_texel(),
        };

        rasterize(surface, mesh, call.frame.scale, |fragment| {
            shading::shade_fragment(&call.params, &call.frame, fragment, layer_texture, normal_map)
        });
        Ok(())
    }

    fn draw_fullscreen(&self, surface: &mut Surface, call: &DrawCall) -> Result<(), RenderError> {
        let ShaderParams::ColorAdjust(params) = &call.params else {
            return Ok(());
        };
        let source = self.texture_view(call.texture)?;
        let (width, height) = (surface.width, surface.height);
        for y in 0..height {
            for x in 0..width {
                let uv = [
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                ];
                let index = (y * width + x) as usize;
                surface.pixels[index] = shading::shade_color_adjust(params, source.sample(uv));
            }
        }
        Ok(())
    }

    fn texture_view(&self, source: TextureSource) -> Result<TexelView<'_>, RenderError> {
        match source {
            TextureSource::None => Ok(shading::white_texel()),
            TextureSource::Texture(id) => self
                .textures
                .get(id)
                .map(Surface::view)
                .ok_or(RenderError::UnknownHandle("texture")),
            TextureSource::Target(id) => self
                .targets
                .get(id)
                .map(Surface::view)
                .ok_or(RenderError::UnknownHandle("target")),
        }
    }

    /// Detach a target so it can be written while other targets are read.
    fn take_target(&mut self, id: TargetId) -> Result<Surface, RenderError> {
        self.targets
            .get_mut(id)
            .map(std::mem::take)
            .ok_or(RenderError::UnknownHandle("target"))
    }

    fn restore_target(&mut self, id: TargetId, surface: Surface) {
        if let Some(slot) = self.targets.get_mut(id) {
            *slot = surface;
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_target(&mut self, _label: &str, width: u32, height: u32) -> Result<TargetId, RenderError> {
        self.check_size("render target", width, height)?;
        Ok(self.targets.insert(Surface::new(width, height)))
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(target);
    }

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(target).map(|s| (s.width, s.height))
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, RenderError> {
        Ok(self.programs.insert(desc.kind))
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
    }

    fn create_mesh(&mut self, _label: &str, mesh: &MeshData) -> Result<MeshId, RenderError> {
        Ok(self.meshes.insert(mesh.clone()))
    }

    fn release_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(mesh);
    }

    fn create_texture(
        &mut self,
        _label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureId, RenderError> {
        self.check_size("texture", width, height)?;
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::SizeMismatch(format!(
                "texture data is {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let pixels = rgba
            .chunks_exact(4)
            .map(|px| {
                [
                    px[0] as f32 / 255.0,
                    px[1] as f32 / 255.0,
                    px[2] as f32 / 255.0,
                    px[3] as f32 / 255.0,
                ]
            })
            .collect();
        Ok(self.textures.insert(Surface {
            width,
            height,
            pixels,
        }))
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
    }

    fn clear_target(&mut self, target: TargetId) -> Result<(), RenderError> {
        let surface = self
            .targets
            .get_mut(target)
            .ok_or(RenderError::UnknownHandle("target"))?;
        surface.pixels.fill([0.0; 4]);
        self.stats.clears += 1;
        Ok(())
    }

    fn copy_target(&mut self, src: TargetId, dst: TargetId) -> Result<(), RenderError> {
        if src == dst {
            return Ok(());
        }
        let source = self
            .targets
            .get(src)
            .ok_or(RenderError::UnknownHandle("target"))?;
        let (width, height) = (source.width, source.height);
        let pixels = source.pixels.clone();
        let dest = self
            .targets
            .get_mut(dst)
            .ok_or(RenderError::UnknownHandle("target"))?;
        if (dest.width, dest.height) != (width, height) {
            return Err(RenderError::SizeMismatch(format!(
                "copy {}x{} into {}x{}",
                width, height, dest.width, dest.height
            )));
        }
        dest.pixels = pixels;
        self.stats.copies += 1;
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), RenderError> {
        let kind = *self
            .programs
            .get(call.program)
            .ok_or(RenderError::UnknownHandle("program"))?;
        if call.texture == TextureSource::Target(call.target) {
            return Err(RenderError::SizeMismatch(
                "draw cannot sample its own target".to_owned(),
            ));
        }

        let mut surface = self.take_target(call.target)?;
        let result = if kind.is_fullscreen() {
            self.draw_fullscreen(&mut surface, call)
        } else {
            self.draw_mesh(&mut surface, call)
        };
        self.restore_target(call.target, surface);
        self.stats.draws += 1;
        result
    }

    fn composite(
        &mut self,
        src: TargetId,
        dst: TargetId,
        out: TargetId,
        uniforms: BlendUniforms,
    ) -> Result<(), RenderError> {
        if out == src || out == dst {
            return Err(RenderError::SizeMismatch(
                "composite output must differ from its inputs".to_owned(),
            ));
        }
        let mode = BlendMode::from_id(uniforms.mode).unwrap_or_default();
        let mut output = self.take_target(out)?;
        let result = (|| {
            let source = self.targets.get(src).ok_or(RenderError::UnknownHandle("target"))?;
            let dest = self.targets.get(dst).ok_or(RenderError::UnknownHandle("target"))?;
            if source.pixels.len() != output.pixels.len() || dest.pixels.len() != output.pixels.len() {
                return Err(RenderError::SizeMismatch(
                    "composite targets differ in size".to_owned(),
                ));
            }
            for ((out_px, src_px), dst_px) in output
                .pixels
                .iter_mut()
                .zip(&source.pixels)
                .zip(&dest.pixels)
            {
                *out_px = blend::composite(*src_px, *dst_px, mode, uniforms.opacity);
            }
            Ok(())
        })();
        self.restore_target(out, output);
        self.stats.composites += 1;
        result
    }

    fn read_target(&mut self, target: TargetId) -> Result<RgbaImage, RenderError> {
        let surface = self
            .targets
            .get(target)
            .ok_or(RenderError::UnknownHandle("target"))?;
        let mut bytes = Vec::with_capacity(surface.pixels.len() * 4);
        for px in &surface.pixels {
            for channel in px {
                bytes.push((channel.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
        RgbaImage::from_raw(surface.width, surface.height, bytes)
            .ok_or_else(|| RenderError::Readback("pixel buffer size mismatch".to_owned()))
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            targets: self.targets.len(),
            programs: self.programs.len(),
            meshes: self.meshes.len(),
            textures: self.textures.len(),
        }
    }
}

/// Rasterize an indexed triangle list into `surface`, overwriting covered
/// pixels that pass the depth test (clear 1.0, compare less). Geometry is
/// orthographic: object XY times `scale` is clip XY, depth is `0.5 − 0.5·z`.
fn rasterize(
    surface: &mut Surface,
    mesh: &MeshData,
    scale: [f32; 4],
    mut shade: impl FnMut(&Fragment) -> [f32; 4],
) {
    let width = surface.width as usize;
    let height = surface.height as usize;
    if width == 0 || height == 0 {
        return;
    }
    let mut depth = vec![1.0_f32; width * height];

    let projected: Vec<[f32; 3]> = mesh
        .vertices
        .iter()
        .map(|v| {
            let x = v.position[0] * scale[0];
            let y = v.position[1] * scale[1];
            let z = v.position[2] * scale[2];
            [
                (x + 1.0) * 0.5 * width as f32,
                (1.0 - y) * 0.5 * height as f32,
                0.5 - 0.5 * z,
            ]
        })
        .collect();

    for triangle in mesh.indices.chunks_exact(3) {
        let (i0, i1, i2) = (triangle[0] as usize, triangle[1] as usize, triangle[2] as usize);
        let (Some(p0), Some(p1), Some(p2)) = (projected.get(i0), projected.get(i1), projected.get(i2))
        else {
            continue;
        };
        let area = edge(p0, p1, p2[0], p2[1]);
        if area.abs() < 1e-12 {
            continue;
        }

        let min_x = p0[0].min(p1[0]).min(p2[0]).floor().max(0.0) as usize;
        let max_x = (p0[0].max(p1[0]).max(p2[0]).ceil() as isize).min(width as isize - 1);
        let min_y = p0[1].min(p1[1]).min(p2[1]).floor().max(0.0) as usize;
        let max_y = (p0[1].max(p1[1]).max(p2[1]).ceil() as isize).min(height as isize - 1);
        if max_x < 0 || max_y < 0 {
            continue;
        }

        let (v0, v1, v2) = (&mesh.vertices[i0], &mesh.vertices[i1], &mesh.vertices[i2]);
        for py in min_y..=max_y as usize {
            let cy = py as f32 + 0.5;
            for px in min_x..=max_x as usize {
                let cx = px as f32 + 0.5;
                let w0 = edge(p1, p2, cx, cy) / area;
                let w1 = edge(p2, p0, cx, cy) / area;
                let w2 = edge(p0, p1, cx, cy) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let z = w0 * p0[2] + w1 * p1[2] + w2 * p2[2];
                let index = py * width + px;
                if !(0.0..=1.0).contains(&z) || z >= depth[index] {
                    continue;
                }
                depth[index] = z;

                let fragment = Fragment {
                    position: interp3(v0.position, v1.position, v2.position, w0, w1, w2),
                    normal: interp3(v0.normal, v1.normal, v2.normal, w0, w1, w2),
                    uv: [
                        w0 * v0.uv[0] + w1 * v1.uv[0] + w2 * v2.uv[0],
                        w0 * v0.uv[1] + w1 * v1.uv[1] + w2 * v2.uv[1],
                    ],
                    tangent: interp3(v0.tangent, v1.tangent, v2.tangent, w0, w1, w2),
                };
                surface.pixels[index] = shade(&fragment);
            }
        }
    }
}

fn edge(a: &[f32; 3], b: &[f32; 3], x: f32, y: f32) -> f32 {
    (b[0] - a[0]) * (y - a[1]) - (b[1] - a[1]) * (x - a[0])
}

fn interp3(a: [f32; 3], b: [f32; 3], c: [f32; 3], w0: f32, w1: f32, w2: f32) -> [f32; 3] {
    [
        w0 * a[0] + w1 * b[0] + w2 * c[0],
        w0 * a[1] + w1 * b[1] + w2 * c[1],
        w0 * a[2] + w1 * b[2] + w2 * c[2],
    ]
}
