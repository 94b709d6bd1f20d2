//! Matcap Forge: layered material-capture rendering.
//!
//! A [`LayerStack`] of shaded layers is drawn onto a proxy sphere and merged
//! by the [`Compositor`] through a 12-mode blend shader. Rendering goes
//! through an injected [`RenderBackend`]: wgpu on the GPU, or the software
//! rasterizer for headless use and tests.

pub mod backend;
pub mod blend;
pub mod compositor;
pub mod dilate;
pub mod error;
pub mod export;
pub mod geometry;
pub mod layer;
pub mod layer_stack;
pub mod logging;
pub mod project;
pub mod settings;
pub mod viewport;

pub use backend::{create_backend, GpuBackend, RenderBackend, SoftwareBackend};
pub use blend::BlendMode;
pub use compositor::{Compositor, FrameStats, RenderContext};
pub use error::RenderError;
pub use export::{ExportOptions, ExportPipeline};
pub use geometry::GeometryEngine;
pub use layer::{Layer, LayerCommon, LayerInput, LayerPass};
pub use layer_stack::{LayerStack, StackEvent};
pub use project::{LayerDocument, ProjectDocument};
pub use settings::Settings;
pub use viewport::{PreviewMode, ViewportFit};
