use std::any::Any;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{params_to_value, patch_params, Layer, LayerCommon, LayerPass, ProxyResources, Rgb};
use crate::backend::{
    NoiseUniforms, RenderBackend, ShaderKind, ShaderParams, TextureId, TextureSource,
};
use crate::blend::BlendMode;
use crate::error::RenderError;

pub const NOISE_TEXTURE_SIZE: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// UV repeat factor.
    pub scale: f32,
    pub intensity: f32,
    pub seed: u64,
    pub color: Rgb,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            intensity: 1.0,
            seed: 0,
            color: [0.0, 0.0, 0.0],
        }
    }
}

/// Seeded grayscale white noise, RGBA8 with opaque alpha.
pub fn noise_texels(seed: u64, size: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut texels = Vec::with_capacity(size as usize * size as usize * 4);
    for _ in 0..size as usize * size as usize {
        let value: u8 = rng.random();
        texels.extend_from_slice(&[value, value, value, 255]);
    }
    texels
}

/// Grain: noise value times intensity becomes coverage of `color`.
/// Multiply with black darkens the sphere by the noise.
#[derive(Debug)]
pub struct NoiseLayer {
    common: LayerCommon,
    params: NoiseParams,
    resources: ProxyResources,
    texture: Option<TextureId>,
    texture_seed: Option<u64>,
}

impl NoiseLayer {
    pub const TYPE_TAG: &'static str = "NoiseLayer";

    pub fn new() -> Self {
        Self::with_params(NoiseParams::default())
    }

    pub fn with_params(params: NoiseParams) -> Self {
        Self {
            common: LayerCommon::new("Noise", BlendMode::Multiply),
            params,
            resources: ProxyResources::default(),
            texture: None,
            texture_seed: None,
        }
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut NoiseParams)) {
        f(&mut self.params);
        self.common.mark_dirty();
    }

    fn regenerate_texture(&mut self, backend: &mut dyn RenderBackend) -> Result<(), RenderError> {
        if let Some(texture) = self.texture.take() {
            backend.release_texture(texture);
        }
        let texels = noise_texels(self.params.seed, NOISE_TEXTURE_SIZE);
        self.texture = Some(backend.create_texture(
            "noise",
            NOISE_TEXTURE_SIZE,
            NOISE_TEXTURE_SIZE,
            &texels,
        )?);
        self.texture_seed = Some(self.params.seed);
        tracing::debug!(seed = self.params.seed, "generated noise texture");
        Ok(())
    }
}

impl Layer for NoiseLayer {
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
        self.resources.acquire(backend, ShaderKind::Noise)?;
        if let Err(err) = self.regenerate_texture(backend) {
            self.resources.release(backend);
            return Err(err);
        }
        self.common.mark_dirty();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.resources.is_ready() && self.texture.is_some()
    }

    fn render(&mut self, backend: &mut dyn RenderBackend, pass: &LayerPass) -> Result<(), RenderError> {
        if self.texture_seed != Some(self.params.seed) {
            self.regenerate_texture(backend)?;
        }
        let Some(texture) = self.texture else {
            return Ok(());
        };
        let [r, g, b] = self.params.color;
        let uniforms = NoiseUniforms {
            color: [r, g, b, self.params.intensity],
            shape: [self.params.scale, 0.0, 0.0, 0.0],
        };
        self.resources.draw(
            backend,
            pass,
            ShaderParams::Noise(uniforms),
            TextureSource::Texture(texture),
        )
    }

    fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        self.resources.release(backend);
        if let Some(texture) = self.texture.take() {
            backend.release_texture(texture);
        }
        self.texture_seed = None;
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
