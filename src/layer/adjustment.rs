use std::any::Any;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    params_to_value, patch_params, Layer, LayerCommon, LayerInput, LayerPass, ProxyResources,
};
use crate::backend::{AdjustUniforms, RenderBackend, ShaderKind, ShaderParams, TextureSource};
use crate::blend::BlendMode;
use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentParams {
    /// Hue rotation in turns, -0.5 to 0.5.
    pub hue: f32,
    /// 0 to 2, 1 is neutral.
    pub saturation: f32,
    /// -1 to 1, 0 is neutral.
    pub brightness: f32,
    /// 0 to 2, 1 is neutral.
    pub contrast: f32,
}

impl Default for AdjustmentParams {
    fn default() -> Self {
        Self {
            hue: 0.0,
            saturation: 1.0,
            brightness: 0.0,
            contrast: 1.0,
        }
    }
}

/// Hue/saturation/brightness/contrast over everything below it. Reads the
/// accumulator directly; layer opacity mixes the adjusted and original
/// colors, and the blend mode is not used.
#[derive(Debug)]
pub struct AdjustmentLayer {
    common: LayerCommon,
    params: AdjustmentParams,
    resources: ProxyResources,
}

impl AdjustmentLayer {
    pub const TYPE_TAG: &'static str = "AdjustmentLayer";

    pub fn new() -> Self {
        Self::with_params(AdjustmentParams::default())
    }

    pub fn with_params(params: AdjustmentParams) -> Self {
        Self {
            common: LayerCommon::new("Color Adjustment", BlendMode::Normal),
            params,
            resources: ProxyResources::default(),
        }
    }

    pub fn params(&self) -> &AdjustmentParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut AdjustmentParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }
}

impl Layer for AdjustmentLayer {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn input(&self) -> LayerInput {
        LayerInput::Accumulator
    }

    fn initialize(&mut self, backend: &mut dyn RenderBackend) -> Result<(), RenderError> {
        self.resources.acquire(backend, ShaderKind::ColorAdjust)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        let Some(source) = pass.source else {
            return Err(RenderError::UnknownHandle("accumulator"));
        };
        let uniforms = AdjustUniforms {
            hue: self.params.hue,
            saturation: self.params.saturation.max(0.0),
            brightness: self.params.brightness,
            contrast: self.params.contrast.max(0.0),
            amount: self.common.opacity(),
            _pad: [0.0; 3],
        };
        self.resources.draw(
            backend,
            pass,
            ShaderParams::ColorAdjust(uniforms),
            TextureSource::Target(source),
        )
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
