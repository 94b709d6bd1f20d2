use std::any::Any;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{params_to_value, patch_params, Layer, LayerCommon, LayerPass, ProxyResources, Rgb};
use crate::backend::{FresnelUniforms, RenderBackend, ShaderKind, ShaderParams, TextureSource};
use crate::blend::BlendMode;
use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FresnelParams {
    pub color: Rgb,
    pub intensity: f32,
    /// Rim falloff exponent; higher is a thinner rim.
    pub power: f32,
    pub bias: f32,
}

impl Default for FresnelParams {
    fn default() -> Self {
        Self {
            color: [0.0, 1.0, 1.0],
            intensity: 1.0,
            power: 5.0,
            bias: 0.0,
        }
    }
}

/// Rim light: coverage grows toward the silhouette.
#[derive(Debug)]
pub struct FresnelLayer {
    common: LayerCommon,
    params: FresnelParams,
    resources: ProxyResources,
}

impl FresnelLayer {
    pub const TYPE_TAG: &'static str = "FresnelLayer";

    pub fn new() -> Self {
        Self::with_params(FresnelParams::default())
    }

    pub fn with_params(params: FresnelParams) -> Self {
        Self {
            common: LayerCommon::new("Fresnel / Rim", BlendMode::Add),
            params,
            resources: ProxyResources::default(),
        }
    }

    pub fn params(&self) -> &FresnelParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut FresnelParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }
}

impl Layer for FresnelLayer {
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
        self.resources.acquire(backend, ShaderKind::Fresnel)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        let [r, g, b] = self.params.color;
        let uniforms = FresnelUniforms {
            color: [r, g, b, self.params.intensity],
            shape: [self.params.power.max(0.0), self.params.bias, 0.0, 0.0],
        };
        self.resources
            .draw(backend, pass, ShaderParams::Fresnel(uniforms), TextureSource::None)
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
