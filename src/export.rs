//! Offscreen high-resolution export.
//!
//! Renders the stack through a temporary [`Compositor`] at the export
//! resolution, reads it back, pads the silhouette edges and encodes the
//! result. The live preview compositor is never touched.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::backend::RenderBackend;
use crate::compositor::{Compositor, RenderContext};
use crate::dilate::pad_edges;
use crate::error::RenderError;
use crate::layer_stack::LayerStack;
use crate::viewport::PreviewMode;

pub const DEFAULT_EXPORT_RESOLUTION: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Width and height of the square output.
    pub resolution: u32,
    /// Dilation radius in pixels.
    pub padding: u32,
    /// Overrides the context's preview mode.
    pub preview_mode: Option<PreviewMode>,
    /// Keep the context's normal-map override.
    pub include_normal_map: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_EXPORT_RESOLUTION,
            padding: 0,
            preview_mode: None,
            include_normal_map: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportPipeline {
    options: ExportOptions,
}

impl ExportPipeline {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    fn export_context(&self, ctx: &RenderContext) -> RenderContext {
        let mut ctx = *ctx;
        if let Some(mode) = self.options.preview_mode {
            ctx.preview_mode = mode;
        }
        if !self.options.include_normal_map {
            ctx.use_normal_map = false;
        }
        ctx
    }

    /// Render, read back and pad. Layers must already be initialized.
    ///
    /// The stack's dirty flags are restored afterwards, so a live preview
    /// compositor still sees pending edits.
    pub fn render_image(
        &self,
        backend: &mut dyn RenderBackend,
        stack: &mut LayerStack,
        ctx: &RenderContext,
    ) -> Result<RgbaImage, RenderError> {
        let resolution = self.options.resolution;
        let ctx = self.export_context(ctx);
        let flags = stack.dirty_flags();

        let mut compositor = Compositor::new();
        let result = Self::render_with(&mut compositor, backend, stack, &ctx, resolution);
        compositor.release(backend);
        stack.restore_dirty_flags(&flags);

        let mut image = result?;
        pad_edges(&mut image, self.options.padding);
        Ok(image)
    }

    fn render_with(
        compositor: &mut Compositor,
        backend: &mut dyn RenderBackend,
        stack: &mut LayerStack,
        ctx: &RenderContext,
        resolution: u32,
    ) -> Result<RgbaImage, RenderError> {
        compositor.initialize(backend, resolution, resolution)?;
        let stats = compositor.render(backend, stack, ctx)?;
        tracing::debug!(
            resolution,
            rendered = stats.layers_rendered,
            skipped = stats.layers_skipped,
            "export frame composed"
        );
        let target = compositor
            .color_texture()
            .ok_or_else(|| RenderError::Readback("compositor produced no image".to_owned()))?;
        backend.read_target(target)
    }

    /// Render and save to `path`. The format follows the extension: PNG
    /// keeps alpha, JPEG is written as RGB.
    pub fn export_to_file(
        &self,
        backend: &mut dyn RenderBackend,
        stack: &mut LayerStack,
        ctx: &RenderContext,
        path: &Path,
    ) -> Result<()> {
        let format = ImageFormat::from_path(path)
            .with_context(|| format!("cannot infer image format from {}", path.display()))?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
            bail!("unsupported export format {format:?} for {} (use .png or .jpg)", path.display());
        }

        let image = self
            .render_image(backend, stack, ctx)
            .context("failed to render export image")?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgba8(image)
                .to_rgb8()
                .save_with_format(path, ImageFormat::Jpeg),
            _ => image.save_with_format(path, ImageFormat::Png),
        }
        .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            resolution = self.options.resolution,
            padding = self.options.padding,
            "matcap exported"
        );
        Ok(())
    }
}
