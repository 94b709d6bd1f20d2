use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by render backends and surfaced through the compositor.
///
/// Allocation and shader failures are recovered locally: the compositor logs
/// them and degrades to a no-op render, a layer with a broken program is
/// skipped. Everything above the library (CLI, project loading) wraps these
/// in `anyhow` with context.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    AdapterUnavailable,

    #[error("failed to request wgpu device: {0}")]
    Device(String),

    #[error("failed to allocate {what} ({width}x{height}): {reason}")]
    ResourceAllocation {
        what: &'static str,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("shader program '{label}' failed to compile: {message}")]
    ShaderCompile { label: String, message: String },

    #[error("degenerate viewport size {width}x{height}")]
    DegenerateSize { width: u32, height: u32 },

    #[error("unknown {0} handle (released or never created)")]
    UnknownHandle(&'static str),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("failed to load texture {path}: {reason}")]
    TextureLoad { path: PathBuf, reason: String },

    #[error("GPU readback failed: {0}")]
    Readback(String),
}

impl RenderError {
    pub fn allocation(what: &'static str, width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::ResourceAllocation {
            what,
            width,
            height,
            reason: reason.into(),
        }
    }

    /// True for failures the compositor treats as "render becomes a no-op".
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            Self::ResourceAllocation { .. } | Self::DegenerateSize { .. }
        )
    }
}
