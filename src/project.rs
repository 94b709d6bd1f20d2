//! Project documents and the layer type registry.
//!
//! A project is a JSON file `{app_version, layers: [...]}`; each layer is
//! stored as `{type, name, enabled, blend_mode, opacity, params}`. The
//! `type` tag selects a [`LayerRegistration`] from [`REGISTRY`], which builds
//! the concrete variant from its params object.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blend::BlendMode;
use crate::layer::{
    AdjustmentLayer, BaseLayer, DirectionalLightLayer, FresnelLayer, ImageLayer, Layer,
    NoiseLayer, SpotLightLayer,
};
use crate::layer_stack::LayerStack;

pub const APP_VERSION: &str = "3.0";

/// Factory entry for one layer variant.
pub struct LayerRegistration {
    pub type_tag: &'static str,
    /// Older tags accepted on load; saving always writes `type_tag`.
    pub aliases: &'static [&'static str],
    /// Default instance with default params.
    pub create: fn() -> Box<dyn Layer>,
    /// Instance built from a persisted params object.
    pub from_params: fn(Value) -> Result<Box<dyn Layer>>,
}

impl std::fmt::Debug for LayerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistration")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

fn build<P, L>(params: Value, make: fn(P) -> L) -> Result<Box<dyn Layer>>
where
    P: DeserializeOwned,
    L: Layer + 'static,
{
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let params: P = serde_json::from_value(params)?;
    Ok(Box::new(make(params)))
}

/// Every layer variant, in menu order.
pub static REGISTRY: &[LayerRegistration] = &[
    LayerRegistration {
        type_tag: BaseLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(BaseLayer::new()),
        from_params: |params| build(params, BaseLayer::with_params),
    },
    LayerRegistration {
        type_tag: DirectionalLightLayer::TYPE_TAG,
        aliases: &["LightLayer"],
        create: || Box::new(DirectionalLightLayer::new()),
        from_params: |params| build(params, DirectionalLightLayer::with_params),
    },
    LayerRegistration {
        type_tag: SpotLightLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(SpotLightLayer::new()),
        from_params: |params| build(params, SpotLightLayer::with_params),
    },
    LayerRegistration {
        type_tag: FresnelLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(FresnelLayer::new()),
        from_params: |params| build(params, FresnelLayer::with_params),
    },
    LayerRegistration {
        type_tag: NoiseLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(NoiseLayer::new()),
        from_params: |params| build(params, NoiseLayer::with_params),
    },
    LayerRegistration {
        type_tag: ImageLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(ImageLayer::new()),
        from_params: |params| build(params, ImageLayer::with_params),
    },
    LayerRegistration {
        type_tag: AdjustmentLayer::TYPE_TAG,
        aliases: &[],
        create: || Box::new(AdjustmentLayer::new()),
        from_params: |params| build(params, AdjustmentLayer::with_params),
    },
];

pub fn lookup(type_tag: &str) -> Option<&'static LayerRegistration> {
    REGISTRY
        .iter()
        .find(|entry| entry.type_tag == type_tag || entry.aliases.contains(&type_tag))
}

/// Create a default layer by type tag.
pub fn create_layer(type_tag: &str) -> Option<Box<dyn Layer>> {
    lookup(type_tag).map(|entry| (entry.create)())
}

fn default_enabled() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

/// Persisted form of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDocument {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "blendMode", skip_serializing_if = "Option::is_none")]
    pub blend_mode: Option<BlendMode>,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub params: Value,
}

impl LayerDocument {
    pub fn from_layer(layer: &dyn Layer) -> Self {
        let common = layer.common();
        Self {
            type_tag: layer.type_tag().to_owned(),
            name: Some(common.name.clone()),
            enabled: common.enabled(),
            blend_mode: Some(common.blend_mode()),
            opacity: common.opacity(),
            params: layer.params_value(),
        }
    }

    /// Build the layer. `Ok(None)` for an unregistered type tag.
    pub fn to_layer(&self) -> Result<Option<Box<dyn Layer>>> {
        let Some(entry) = lookup(&self.type_tag) else {
            return Ok(None);
        };
        let mut layer = (entry.from_params)(self.params.clone())
            .with_context(|| format!("invalid params for {}", self.type_tag))?;
        let common = layer.common_mut();
        if let Some(name) = &self.name {
            common.name.clone_from(name);
        }
        common.set_enabled(self.enabled);
        if let Some(mode) = self.blend_mode {
            common.set_blend_mode(mode);
        }
        common.set_opacity(self.opacity);
        common.mark_dirty();
        Ok(Some(layer))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default)]
    pub layers: Vec<LayerDocument>,
}

fn default_app_version() -> String {
    APP_VERSION.to_owned()
}

impl Default for ProjectDocument {
    fn default() -> Self {
        Self {
            app_version: default_app_version(),
            layers: Vec::new(),
        }
    }
}

impl ProjectDocument {
    pub fn from_stack(stack: &LayerStack) -> Self {
        Self {
            app_version: default_app_version(),
            layers: stack.iter().map(LayerDocument::from_layer).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(json).context("failed to parse project JSON")?;
        if document.app_version != APP_VERSION {
            tracing::warn!(
                found = %document.app_version,
                expected = APP_VERSION,
                "project was written by a different version"
            );
        }
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize project")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read project {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = self.to_json()?;
        fs::write(path, json).with_context(|| format!("failed to write project {}", path.display()))
    }

    /// Build a layer stack. Unknown layer types are skipped with a warning;
    /// relative image paths resolve against `asset_root`.
    pub fn to_stack(&self, asset_root: Option<&Path>) -> Result<LayerStack> {
        let mut stack = LayerStack::new();
        for (index, document) in self.layers.iter().enumerate() {
            let Some(mut layer) = document
                .to_layer()
                .with_context(|| format!("layer {index}"))?
            else {
                tracing::warn!(index, type_tag = %document.type_tag, "unknown layer type; skipped");
                continue;
            };
            if let (Some(root), Some(image)) =
                (asset_root, layer.as_any_mut().downcast_mut::<ImageLayer>())
            {
                image.set_asset_root(root);
            }
            stack.push(layer);
        }
        Ok(stack)
    }
}

/// Load a project file straight into a stack.
pub fn load_stack(path: &Path) -> Result<LayerStack> {
    let document = ProjectDocument::load(path)?;
    let root = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    document
        .to_stack(root)
        .with_context(|| format!("failed to build layers from {}", path.display()))
}

/// Apply an edit of the form `index.param=value`. The value is parsed as
/// JSON and falls back to a plain string.
pub fn apply_assignment(stack: &mut LayerStack, assignment: &str) -> Result<()> {
    let Some((target, raw_value)) = assignment.split_once('=') else {
        bail!("expected index.param=value, got '{assignment}'");
    };
    let Some((index, param)) = target.split_once('.') else {
        bail!("expected index.param=value, got '{assignment}'");
    };
    let index: usize = index
        .trim()
        .parse()
        .with_context(|| format!("invalid layer index in '{assignment}'"))?;
    let param = param.trim();
    let value = serde_json::from_str(raw_value.trim())
        .unwrap_or_else(|_| Value::String(raw_value.trim().to_owned()));

    let len = stack.len();
    let layer = stack
        .get_mut(index)
        .with_context(|| format!("layer index {index} out of range (stack has {len} layers)"))?;
    match param {
        "enabled" => layer.common_mut().set_enabled(serde_json::from_value(value)?),
        "opacity" => layer.common_mut().set_opacity(serde_json::from_value(value)?),
        "blend_mode" | "blendMode" => layer
            .common_mut()
            .set_blend_mode(serde_json::from_value(value).context("unknown blend mode")?),
        "name" => layer.common_mut().name = serde_json::from_value(value)?,
        _ => layer
            .set_param(param, value)
            .with_context(|| format!("layer {index} ({})", layer.name()))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn registry_tags_are_unique_and_match_instances() {
        for (index, entry) in REGISTRY.iter().enumerate() {
            assert_eq!((entry.create)().type_tag(), entry.type_tag);
            assert!(REGISTRY[index + 1..]
                .iter()
                .all(|other| other.type_tag != entry.type_tag));
        }
        assert_eq!(REGISTRY.len(), 7);
    }

    #[test]
    fn layer_documents_round_trip() {
        for entry in REGISTRY {
            let mut layer = (entry.create)();
            layer.common_mut().set_opacity(0.25);
            layer.common_mut().set_blend_mode(BlendMode::Difference);
            let document = LayerDocument::from_layer(layer.as_ref());
            let json = serde_json::to_string(&document).expect("serialize");
            let parsed: LayerDocument = serde_json::from_str(&json).expect("parse");
            let rebuilt = parsed.to_layer().expect("build").expect("registered");

            assert_eq!(rebuilt.params_value(), layer.params_value());
            assert_eq!(rebuilt.common().blend_mode(), BlendMode::Difference);
            assert_eq!(rebuilt.common().opacity(), 0.25);
            assert_eq!(rebuilt.name(), layer.name());
        }
    }

    #[test]
    fn legacy_keys_and_missing_fields_are_accepted() {
        let document: LayerDocument = serde_json::from_value(json!({
            "type": "FresnelLayer",
            "blendMode": "Screen",
            "params": { "power": 2.0, "preview_mode": 1 }
        }))
        .expect("parse");
        let layer = document.to_layer().expect("build").expect("registered");
        assert_eq!(layer.common().blend_mode(), BlendMode::Screen);
        assert!(layer.is_enabled());
        assert_eq!(layer.params_value()["power"], json!(2.0));
        assert_eq!(layer.name(), "Fresnel / Rim");
    }

    #[test]
    fn unknown_types_are_skipped() {
        let project = ProjectDocument::from_json(
            r#"{"app_version": "3.0", "layers": [
                {"type": "BaseLayer"},
                {"type": "HologramLayer"},
                {"type": "NoiseLayer", "enabled": false}
            ]}"#,
        )
        .expect("parse");
        let stack = project.to_stack(None).expect("stack");
        assert_eq!(stack.len(), 2);
        assert!(!stack.get(1).expect("noise").is_enabled());
    }

    #[test]
    fn legacy_light_layer_tag_loads_as_directional_light() {
        let project = ProjectDocument::from_json(
            r#"{"app_version": "3.0", "layers": [
                {"type": "BaseLayer", "name": "Base Layer", "enabled": true,
                 "blend_mode": "Normal", "opacity": 1.0,
                 "params": {"base_color": [0.2, 0.2, 0.2]}},
                {"type": "LightLayer", "name": "Key", "enabled": true,
                 "blend_mode": "Soft Light", "opacity": 0.8,
                 "params": {"direction": [0.5, -0.5, 1.0], "color": [1.0, 0.9, 0.8], "intensity": 2.0}},
                {"type": "AdjustmentLayer", "name": "Color Adjustment", "enabled": true,
                 "blend_mode": "Normal", "opacity": 1.0,
                 "params": {"type_id": "adjustment", "hue": 0.1, "saturation": 1.2,
                            "brightness": 0.0, "contrast": 1.0}}
            ]}"#,
        )
        .expect("parse");
        let stack = project.to_stack(None).expect("stack");
        assert_eq!(stack.len(), 3);

        let light = stack.get_as::<DirectionalLightLayer>(1).expect("directional light");
        assert_eq!(light.name(), "Key");
        assert_eq!(light.common().blend_mode(), BlendMode::SoftLight);
        assert_eq!(light.params().direction, [0.5, -0.5, 1.0]);
        assert_eq!(light.params().intensity, 2.0);

        let saved = ProjectDocument::from_stack(&stack);
        assert_eq!(saved.layers[1].type_tag, DirectionalLightLayer::TYPE_TAG);
    }

    #[test]
    fn ill_typed_params_are_errors() {
        let project = ProjectDocument::from_json(
            r#"{"layers": [{"type": "BaseLayer", "params": {"base_color": "red"}}]}"#,
        )
        .expect("parse");
        assert!(project.to_stack(None).is_err());
    }

    #[test]
    fn assignments_edit_common_and_params() {
        let mut stack = LayerStack::new();
        stack.push(Box::new(BaseLayer::new()));
        stack.push(Box::new(FresnelLayer::new()));

        apply_assignment(&mut stack, "0.base_color=[0,0,1]").expect("param");
        apply_assignment(&mut stack, "1.blend_mode=Multiply").expect("blend");
        apply_assignment(&mut stack, "1.opacity=0.5").expect("opacity");

        assert_eq!(stack.get(0).expect("base").params_value()["base_color"], json!([0.0, 0.0, 1.0]));
        let fresnel = stack.get(1).expect("fresnel");
        assert_eq!(fresnel.common().blend_mode(), BlendMode::Multiply);
        assert_eq!(fresnel.common().opacity(), 0.5);

        assert!(apply_assignment(&mut stack, "5.power=1").is_err());
        assert!(apply_assignment(&mut stack, "1.nope=1").is_err());
        assert!(apply_assignment(&mut stack, "garbage").is_err());
    }

    #[test]
    fn save_and_load_through_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("demo").join("project.json");
        let mut stack = LayerStack::new();
        stack.push(Box::new(BaseLayer::new()));
        let mut image = ImageLayer::new();
        image.edit(|params| params.image_path = "assets/decal.png".into());
        stack.push(Box::new(image));

        ProjectDocument::from_stack(&stack).save(&path).expect("save");
        let loaded = load_stack(&path).expect("load");
        assert_eq!(loaded.len(), 2);
        let image = loaded.get_as::<ImageLayer>(1).expect("image layer");
        assert_eq!(
            image.resolved_path(),
            Some(dir.path().join("demo").join("assets/decal.png"))
        );
    }
}
