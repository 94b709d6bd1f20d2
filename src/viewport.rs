//! Aspect fitting for the proxy geometry.
//!
//! The sphere meshes live in a fixed content box (half-extents 1×1 for the
//! single preview, 0.95×0.45 for the side-by-side comparison). The fit keeps
//! that box undistorted and fully visible for any viewport shape.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Preview layout. The integer code is what shaders receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewMode {
    #[default]
    Single,
    Comparison,
}

impl PreviewMode {
    pub fn code(self) -> u32 {
        match self {
            PreviewMode::Single => 0,
            PreviewMode::Comparison => 1,
        }
    }

    pub fn from_code(code: u32) -> Self {
        if code == 1 {
            PreviewMode::Comparison
        } else {
            PreviewMode::Single
        }
    }

    /// Half-width and half-height of the content box in object units.
    pub fn content_half_extents(self) -> (f32, f32) {
        match self {
            PreviewMode::Single => (1.0, 1.0),
            PreviewMode::Comparison => (0.95, 0.45),
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewMode::Single => write!(f, "single"),
            PreviewMode::Comparison => write!(f, "comparison"),
        }
    }
}

impl FromStr for PreviewMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "0" => Ok(PreviewMode::Single),
            "comparison" | "dual" | "1" => Ok(PreviewMode::Comparison),
            other => Err(format!(
                "unknown preview mode '{other}' (expected 'single' or 'comparison')"
            )),
        }
    }
}

/// Per-axis scale applied to object-space positions (`uScale` in shaders).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportFit {
    pub scale: [f32; 3],
}

impl ViewportFit {
    pub fn compute(width: u32, height: u32, mode: PreviewMode) -> Self {
        let screen_aspect = width.max(1) as f32 / height.max(1) as f32;
        let (half_width, half_height) = mode.content_half_extents();
        let content_aspect = half_width / half_height;

        // Wider screen: height is the binding dimension. Otherwise fit by width.
        let zoom = if screen_aspect > content_aspect {
            1.0 / half_height
        } else {
            screen_aspect / half_width
        };

        Self {
            scale: [zoom / screen_aspect, zoom, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn square_single_is_identity() {
        let fit = ViewportFit::compute(512, 512, PreviewMode::Single);
        assert_eq!(fit.scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn wide_single_is_bound_by_height() {
        let fit = ViewportFit::compute(800, 400, PreviewMode::Single);
        assert!(approx(fit.scale[0], 0.5));
        assert!(approx(fit.scale[1], 1.0));
    }

    #[test]
    fn tall_single_is_bound_by_width() {
        let fit = ViewportFit::compute(400, 800, PreviewMode::Single);
        assert!(approx(fit.scale[0], 1.0));
        assert!(approx(fit.scale[1], 0.5));
    }

    #[test]
    fn two_to_one_comparison_fits_by_width() {
        // Screen aspect 2.0 is narrower than the content aspect 0.95/0.45.
        let fit = ViewportFit::compute(1024, 512, PreviewMode::Comparison);
        let zoom = 2.0 / 0.95;
        assert!(approx(fit.scale[1], zoom));
        assert!(approx(fit.scale[0], zoom / 2.0));
        // Content half-width lands exactly on the clip edge.
        assert!(approx(0.95 * fit.scale[0], 1.0));
    }

    #[test]
    fn very_wide_comparison_fits_by_height() {
        let fit = ViewportFit::compute(3000, 1000, PreviewMode::Comparison);
        assert!(approx(fit.scale[1], 1.0 / 0.45));
        assert!(approx(0.45 * fit.scale[1], 1.0));
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        let fit = ViewportFit::compute(0, 0, PreviewMode::Single);
        assert_eq!(fit.scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn preview_mode_parses_and_round_trips_codes() {
        assert_eq!("Comparison".parse::<PreviewMode>(), Ok(PreviewMode::Comparison));
        assert_eq!("single".parse::<PreviewMode>(), Ok(PreviewMode::Single));
        assert!("triple".parse::<PreviewMode>().is_err());
        assert_eq!(PreviewMode::from_code(PreviewMode::Comparison.code()), PreviewMode::Comparison);
    }
}
