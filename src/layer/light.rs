//! Directional and spot lights. Both output the light color with coverage
//! in alpha, so the blend mode (Add by default) decides how they land.

use std::any::Any;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{params_to_value, patch_params, Layer, LayerCommon, LayerPass, ProxyResources, Rgb};
use crate::backend::{
    LightUniforms, RenderBackend, ShaderKind, ShaderParams, SpotUniforms, TextureSource,
};
use crate::blend::BlendMode;
use crate::error::RenderError;

/// Light travelling into the screen, i.e. shining on the visible hemisphere.
const DEFAULT_DIRECTION: [f32; 3] = [0.0, 0.0, 1.0];

/// Stored directions use view space with +Z pointing into the screen; the
/// proxy mesh faces the viewer along +Z, so z flips on the way to the shader.
fn shader_direction([x, y, z]: [f32; 3]) -> [f32; 4] {
    [x, y, -z, 0.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalLightParams {
    /// Direction the light travels, +Z into the screen.
    pub direction: [f32; 3],
    pub color: Rgb,
    pub intensity: f32,
}

impl Default for DirectionalLightParams {
    fn default() -> Self {
        Self {
            direction: DEFAULT_DIRECTION,
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct DirectionalLightLayer {
    common: LayerCommon,
    params: DirectionalLightParams,
    resources: ProxyResources,
}

impl DirectionalLightLayer {
    pub const TYPE_TAG: &'static str = "DirectionalLightLayer";

    pub fn new() -> Self {
        Self::with_params(DirectionalLightParams::default())
    }

    pub fn with_params(params: DirectionalLightParams) -> Self {
        Self {
            common: LayerCommon::new("Directional Light", BlendMode::Add),
            params,
            resources: ProxyResources::default(),
        }
    }

    pub fn params(&self) -> &DirectionalLightParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut DirectionalLightParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }
}

impl Layer for DirectionalLightLayer {
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
        self.resources.acquire(backend, ShaderKind::DirectionalLight)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        let [r, g, b] = self.params.color;
        let uniforms = LightUniforms {
            direction: shader_direction(self.params.direction),
            color: [r, g, b, self.params.intensity],
        };
        self.resources.draw(
            backend,
            pass,
            ShaderParams::DirectionalLight(uniforms),
            TextureSource::None,
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotLightParams {
    /// Same convention as [`DirectionalLightParams::direction`].
    pub direction: [f32; 3],
    pub color: Rgb,
    pub intensity: f32,
    /// Spot size; the cutoff on `dot(n, to_light)` is `1 - range`.
    pub range: f32,
    /// Edge softness.
    pub blur: f32,
}

impl Default for SpotLightParams {
    fn default() -> Self {
        Self {
            direction: DEFAULT_DIRECTION,
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            range: 0.2,
            blur: 0.1,
        }
    }
}

#[derive(Debug)]
pub struct SpotLightLayer {
    common: LayerCommon,
    params: SpotLightParams,
    resources: ProxyResources,
}

impl SpotLightLayer {
    pub const TYPE_TAG: &'static str = "SpotLightLayer";

    pub fn new() -> Self {
        Self::with_params(SpotLightParams::default())
    }

    pub fn with_params(params: SpotLightParams) -> Self {
        Self {
            common: LayerCommon::new("Spot Light", BlendMode::Add),
            params,
            resources: ProxyResources::default(),
        }
    }

    pub fn params(&self) -> &SpotLightParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut SpotLightParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }
}

impl Layer for SpotLightLayer {
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
        self.resources.acquire(backend, ShaderKind::SpotLight)?;
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        let [r, g, b] = self.params.color;
        let uniforms = SpotUniforms {
            direction: shader_direction(self.params.direction),
            color: [r, g, b, self.params.intensity],
            shape: [self.params.range, self.params.blur.max(0.0), 0.0, 0.0],
        };
        self.resources.draw(
            backend,
            pass,
            ShaderParams::SpotLight(uniforms),
            TextureSource::None,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lights_default_to_add() {
        assert_eq!(DirectionalLightLayer::new().common().blend_mode(), BlendMode::Add);
        assert_eq!(SpotLightLayer::new().common().blend_mode(), BlendMode::Add);
    }

    #[test]
    fn set_param_marks_dirty_and_updates_value() {
        let mut light = SpotLightLayer::new();
        light.common_mut().mark_clean();
        light
            .set_param("range", serde_json::json!(0.5))
            .expect("range is a known parameter");
        assert!(light.is_dirty());
        assert_eq!(light.params().range, 0.5);
    }

    #[test]
    fn default_direction_faces_the_viewer_side() {
        assert_eq!(DirectionalLightParams::default().direction, [0.0, 0.0, 1.0]);
        assert_eq!(shader_direction([0.0, 0.0, 1.0]), [0.0, 0.0, -1.0, 0.0]);
        assert_eq!(shader_direction([0.5, -0.25, -1.0]), [0.5, -0.25, 1.0, 0.0]);
    }
}
