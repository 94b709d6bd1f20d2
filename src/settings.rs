//! Tool settings, loaded from an optional YAML file.
//!
//! ```yaml
//! export_resolution: 2048
//! export_padding: 8
//! preview_mode: comparison
//! output_dir: renders
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::{ExportOptions, DEFAULT_EXPORT_RESOLUTION};
use crate::viewport::PreviewMode;

/// Upper bound for the export padding radius.
pub const MAX_EXPORT_PADDING: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub export_resolution: u32,
    pub export_padding: u32,
    pub preview_mode: PreviewMode,
    /// Where exports without an explicit directory are written.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            export_resolution: DEFAULT_EXPORT_RESOLUTION,
            export_padding: 0,
            preview_mode: PreviewMode::Single,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("invalid settings in {}", path.display()))
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document parses as null, not as an empty mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!("failed to parse yaml at {}: {}", location, error)
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.export_resolution == 0 {
            bail!("export_resolution must be > 0");
        }
        if self.export_padding > MAX_EXPORT_PADDING {
            bail!(
                "export_padding must be at most {MAX_EXPORT_PADDING}, got {}",
                self.export_padding
            );
        }
        Ok(())
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            resolution: self.export_resolution,
            padding: self.export_padding,
            preview_mode: Some(self.preview_mode),
            include_normal_map: true,
        }
    }

    /// Relative output paths land in `output_dir`.
    pub fn resolve_output(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.parent().is_some_and(|parent| !parent.as_os_str().is_empty()) {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }
}
