//! Layers: the polymorphic render units of a matcap stack.
//!
//! Lifecycle: constructed → [`Layer::initialize`] acquires a program and the
//! proxy meshes → dirty → [`Layer::render`] → clean (set by the compositor)
//! → parameter edit → dirty → … → [`Layer::dispose`] releases everything.
//!
//! The compositor and [`crate::layer_stack::LayerStack`] only see the trait.
//! Layers that read the composed result instead of drawing geometry declare
//! it through [`Layer::input`].

mod adjustment;
mod base;
mod fresnel;
mod image;
mod light;
mod noise;

use std::any::Any;
use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::backend::{
    DrawCall, FrameUniforms, MeshId, ProgramDesc, ProgramId, RenderBackend, ShaderKind,
    ShaderParams, TargetId, TextureId, TextureSource,
};
use crate::blend::BlendMode;
use crate::error::RenderError;
use crate::geometry::GeometryEngine;
use crate::viewport::PreviewMode;

pub use adjustment::{AdjustmentLayer, AdjustmentParams};
pub use base::{BaseLayer, BaseParams};
pub use fresnel::{FresnelLayer, FresnelParams};
pub use image::{ImageLayer, ImageParams, MappingMode};
pub use light::{DirectionalLightLayer, DirectionalLightParams, SpotLightLayer, SpotLightParams};
pub use noise::{NoiseLayer, NoiseParams};

/// RGB color in [0, 1], stored as a JSON array.
pub type Rgb = [f32; 3];

/// What a layer reads while rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerInput {
    /// Draws the proxy geometry into an isolated scratch target; the result
    /// is merged with the blend program.
    Geometry,
    /// Reads the current accumulator and writes the next one directly. No
    /// blend step is applied.
    Accumulator,
}

/// Everything a layer needs to issue its draw.
#[derive(Debug, Clone, Copy)]
pub struct LayerPass {
    /// Target the layer writes (scratch for geometry layers, the next
    /// accumulator for accumulator layers).
    pub target: TargetId,
    pub frame: FrameUniforms,
    /// Current accumulator; `Some` only for [`LayerInput::Accumulator`].
    pub source: Option<TargetId>,
    pub normal_map: Option<TextureId>,
}

impl LayerPass {
    pub fn preview_mode(&self) -> PreviewMode {
        PreviewMode::from_code(self.frame.preview_mode)
    }
}

/// State shared by every layer variant.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCommon {
    pub name: String,
    enabled: bool,
    blend_mode: BlendMode,
    opacity: f32,
    dirty: bool,
}

impl LayerCommon {
    pub fn new(name: impl Into<String>, blend_mode: BlendMode) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            blend_mode,
            opacity: 1.0,
            dirty: true,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Toggling visibility also marks the layer dirty. Disabling still needs
    /// a cache invalidation: disabled layers never count as dirty.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.dirty = true;
        }
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        if self.blend_mode != mode {
            self.blend_mode = mode;
            self.dirty = true;
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if self.opacity != opacity {
            self.opacity = opacity;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

pub trait Layer: fmt::Debug {
    /// Persisted type tag, the key into the layer registry.
    fn type_tag(&self) -> &'static str;

    fn common(&self) -> &LayerCommon;
    fn common_mut(&mut self) -> &mut LayerCommon;

    fn input(&self) -> LayerInput {
        LayerInput::Geometry
    }

    /// Acquire program, meshes and textures. Calling it again releases the
    /// previous resources first.
    fn initialize(&mut self, backend: &mut dyn RenderBackend) -> Result<(), RenderError>;

    /// False until `initialize` succeeded; the compositor skips such layers.
    fn is_ready(&self) -> bool;

    /// Issue the layer's draw into `pass.target`. The target is bound and
    /// cleared by the caller.
    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError>;

    fn dispose(&mut self, backend: &mut dyn RenderBackend);

    /// Variant parameters as a JSON object.
    fn params_value(&self) -> Value;

    /// Replace one named parameter. Marks the layer dirty on success.
    fn set_param(&mut self, name: &str, value: Value) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn name(&self) -> &str {
        &self.common().name
    }

    fn is_enabled(&self) -> bool {
        self.common().enabled()
    }

    fn is_dirty(&self) -> bool {
        self.common().is_dirty()
    }

    fn mark_dirty(&mut self) {
        self.common_mut().mark_dirty();
    }
}

/// Serialize a params struct to a JSON object.
pub(crate) fn params_to_value<P: Serialize>(params: &P) -> Value {
    serde_json::to_value(params).unwrap_or(Value::Null)
}

/// Replace one field of a params struct through its serde representation.
/// Unknown names and ill-typed values are rejected and leave `params` as is.
pub(crate) fn patch_params<P>(params: &mut P, name: &str, value: Value) -> Result<()>
where
    P: Serialize + DeserializeOwned,
{
    let mut object = match serde_json::to_value(&*params).context("failed to serialize params")? {
        Value::Object(object) => object,
        other => bail!("params are not an object: {other}"),
    };
    if !object.contains_key(name) {
        let known: Vec<&str> = object.keys().map(String::as_str).collect();
        return Err(anyhow!(
            "unknown parameter '{name}' (expected one of: {})",
            known.join(", ")
        ));
    }
    object.insert(name.to_owned(), value);
    *params = serde_json::from_value(Value::Object(object))
        .with_context(|| format!("invalid value for parameter '{name}'"))?;
    Ok(())
}

/// Program and proxy meshes owned by one layer.
#[derive(Debug, Default)]
pub struct ProxyResources {
    program: Option<ProgramId>,
    single: Option<MeshId>,
    dual: Option<MeshId>,
}

impl ProxyResources {
    /// Compile `kind` and upload both proxy meshes (full-screen kinds need no
    /// mesh). On failure nothing is left allocated.
    pub fn acquire(&mut self, backend: &mut dyn RenderBackend, kind: ShaderKind) -> Result<(), RenderError> {
        self.release(backend);

        let program = backend.create_program(&ProgramDesc::for_kind(kind))?;
        if kind.is_fullscreen() {
            self.program = Some(program);
            return Ok(());
        }

        let single = match backend.create_mesh("proxy-sphere", &GeometryEngine::preview_sphere()) {
            Ok(mesh) => mesh,
            Err(err) => {
                backend.release_program(program);
                return Err(err);
            }
        };
        let dual = match backend.create_mesh("proxy-spheres-dual", &GeometryEngine::comparison_spheres()) {
            Ok(mesh) => mesh,
            Err(err) => {
                backend.release_mesh(single);
                backend.release_program(program);
                return Err(err);
            }
        };

        self.program = Some(program);
        self.single = Some(single);
        self.dual = Some(dual);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn mesh_for(&self, mode: PreviewMode) -> Option<MeshId> {
        match mode {
            PreviewMode::Single => self.single,
            PreviewMode::Comparison => self.dual,
        }
    }

    /// Draw the proxy geometry for the pass's preview mode. Silently skips
    /// when the program is missing.
    pub fn draw(
        &self,
        backend: &mut dyn RenderBackend,
        pass: &LayerPass,
        params: ShaderParams,
        texture: TextureSource,
    ) -> Result<(), RenderError> {
        let Some(program) = self.program else {
            return Ok(());
        };
        backend.draw(&DrawCall {
            target: pass.target,
            program,
            mesh: self.mesh_for(pass.preview_mode()),
            frame: pass.frame,
            params,
            texture,
            normal_map: pass.normal_map,
        })
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(program) = self.program.take() {
            backend.release_program(program);
        }
        if let Some(mesh) = self.single.take() {
            backend.release_mesh(mesh);
        }
        if let Some(mesh) = self.dual.take() {
            backend.release_mesh(mesh);
        }
    }
}
