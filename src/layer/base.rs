use std::any::Any;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{params_to_value, patch_params, Layer, LayerCommon, LayerPass, ProxyResources, Rgb};
use crate::backend::{BaseUniforms, RenderBackend, ShaderKind, ShaderParams, TextureSource};
use crate::blend::BlendMode;
use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseParams {
    pub base_color: Rgb,
}

impl Default for BaseParams {
    fn default() -> Self {
        Self {
            base_color: [1.0, 0.0, 0.0],
        }
    }
}

/// Flat, opaque sphere color. Usually the bottom of the stack.
#[derive(Debug)]
pub struct BaseLayer {
    common: LayerCommon,
    params: BaseParams,
    resources: ProxyResources,
}

impl BaseLayer {
    pub const TYPE_TAG: &'static str = "BaseLayer";

    pub fn new() -> Self {
        Self::with_params(BaseParams::default())
    }

    pub fn with_params(params: BaseParams) -> Self {
        Self {
            common: LayerCommon::new("Base Layer", BlendMode::Normal),
            params,
            resources: ProxyResources::default(),
        }
    }

    pub fn params(&self) -> &BaseParams {
        &self.params
    }

    /// Edit parameters; the layer becomes dirty.
    pub fn edit(&mut self, f: impl FnOnce(&mut BaseParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.edit(|p| p.base_color = color);
    }
}

impl Layer for BaseLayer {
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
        self.resources.acquire(backend, ShaderKind::Base)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        let [r, g, b] = self.params.base_color;
        let uniforms = BaseUniforms {
            color: [r, g, b, 1.0],
        };
        self.resources
            .draw(backend, pass, ShaderParams::Base(uniforms), TextureSource::None)
    }

    fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        self.resources.release(backend);
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
