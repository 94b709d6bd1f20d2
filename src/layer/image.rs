use std::any::Any;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{params_to_value, patch_params, Layer, LayerCommon, LayerPass, ProxyResources};
use crate::backend::{
    ImageUniforms, RenderBackend, ShaderKind, ShaderParams, TextureId, TextureSource,
};
use crate::blend::BlendMode;
use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MappingMode {
    /// Wrap with the sphere's UVs.
    #[default]
    Spherical,
    /// Project along the view axis.
    Planar,
}

impl MappingMode {
    fn code(self) -> u32 {
        match self {
            MappingMode::Spherical => 0,
            MappingMode::Planar => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    /// Empty means no image.
    pub image_path: PathBuf,
    pub mapping_mode: MappingMode,
    pub scale: f32,
    /// Degrees.
    pub rotation: f32,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            image_path: PathBuf::new(),
            mapping_mode: MappingMode::Spherical,
            scale: 1.0,
            rotation: 0.0,
        }
    }
}

/// Decal/texture layer. The image is decoded through the backend and
/// reloaded whenever `image_path` changes.
#[derive(Debug)]
pub struct ImageLayer {
    common: LayerCommon,
    params: ImageParams,
    resources: ProxyResources,
    asset_root: Option<PathBuf>,
    texture: Option<TextureId>,
    loaded_path: Option<PathBuf>,
}

impl ImageLayer {
    pub const TYPE_TAG: &'static str = "ImageLayer";

    pub fn new() -> Self {
        Self::with_params(ImageParams::default())
    }

    pub fn with_params(params: ImageParams) -> Self {
        Self {
            common: LayerCommon::new("Image Layer", BlendMode::Normal),
            params,
            resources: ProxyResources::default(),
            asset_root: None,
            texture: None,
            loaded_path: None,
        }
    }

    pub fn params(&self) -> &ImageParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut ImageParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }

    /// Directory relative `image_path`s resolve against (the project folder).
    pub fn set_asset_root(&mut self, root: impl Into<PathBuf>) {
        self.asset_root = Some(root.into());
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn resolved_path(&self) -> Option<PathBuf> {
        let path = self.params.image_path.as_path();
        if path.as_os_str().is_empty() {
            return None;
        }
        Some(resolve(self.asset_root.as_deref(), path))
    }

    /// Load or drop the texture so it matches `image_path`. A file that fails
    /// to decode leaves the layer drawing nothing; it is not retried until the
    /// path changes.
    fn sync_texture(&mut self, backend: &mut dyn RenderBackend) {
        let wanted = self.resolved_path();
        if wanted == self.loaded_path {
            return;
        }
        if let Some(texture) = self.texture.take() {
            backend.release_texture(texture);
        }
        if let Some(path) = &wanted {
            match backend.load_texture(path) {
                Ok(texture) => {
                    tracing::debug!(path = %path.display(), "loaded image layer texture");
                    self.texture = Some(texture);
                }
                Err(err) => {
                    tracing::warn!(layer = %self.common.name, error = %err, "image layer texture unavailable");
                }
            }
        }
        self.loaded_path = wanted;
    }
}

fn resolve(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

impl Layer for ImageLayer {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn initialize(&mut self, backend: &mut dyn RenderBackend) -> Result<(), RenderError> {
        self.resources.acquire(backend, ShaderKind::Image)?;
        self.loaded_path = None;
        self.sync_texture(backend);
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        self.sync_texture(backend);
        let uniforms = ImageUniforms {
            scale: self.params.scale,
            rotation: self.params.rotation.to_radians(),
            mapping: self.params.mapping_mode.code(),
            has_texture: u32::from(self.texture.is_some()),
        };
        let texture = self
            .texture
            .map(TextureSource::Texture)
            .unwrap_or(TextureSource::None);
        self.resources
            .draw(backend, pass, ShaderParams::Image(uniforms), texture)
    }

    fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        self.resources.release(backend);
        if let Some(texture) = self.texture.take() {
            backend.release_texture(texture);
        }
        self.loaded_path = None;
    }

    fn params_value(&self) -> Value {
        params_to_value(&self.params)
    }

    fn set_param(&mut self, name: &str, value: Value) -> Result<()> {
        patch_params(&mut self.params, name, value)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
