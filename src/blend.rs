//! Blend mode algebra for layer compositing.
//!
//! Every mode is evaluated in the blend shader (`shaders/wgsl/blend.wgsl`),
//! never through fixed-function blend state. The functions here are the CPU
//! rendition of that shader; the software backend composites with them and
//! the tests use them as the closed form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Blend modes, in shader id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// mix(d, c, a)
    #[default]
    Normal,
    /// d + c·a
    Add,
    /// d · mix(1, c, a)
    Multiply,
    /// 1 − (1 − d)(1 − c·a)
    Screen,
    /// d − c·a
    Subtract,
    /// max(d, c·a)
    Lighten,
    /// min(d, mix(1, c, a))
    Darken,
    Overlay,
    #[serde(rename = "Soft Light", alias = "SoftLight")]
    SoftLight,
    #[serde(rename = "Hard Light", alias = "HardLight")]
    HardLight,
    #[serde(rename = "Color Dodge", alias = "ColorDodge")]
    ColorDodge,
    Difference,
}

impl BlendMode {
    /// Integer id passed to the blend shader.
    pub fn id(self) -> u32 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Add => 1,
            BlendMode::Multiply => 2,
            BlendMode::Screen => 3,
            BlendMode::Subtract => 4,
            BlendMode::Lighten => 5,
            BlendMode::Darken => 6,
            BlendMode::Overlay => 7,
            BlendMode::SoftLight => 8,
            BlendMode::HardLight => 9,
            BlendMode::ColorDodge => 10,
            BlendMode::Difference => 11,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::all().get(id as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Add => "Add",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Subtract => "Subtract",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::Overlay => "Overlay",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::HardLight => "Hard Light",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::Difference => "Difference",
        }
    }

    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Add,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Subtract,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::Overlay,
            BlendMode::SoftLight,
            BlendMode::HardLight,
            BlendMode::ColorDodge,
            BlendMode::Difference,
        ]
    }

    /// Per-channel result over an opaque destination.
    ///
    /// `d` is the destination channel, `c` the straight source channel and `a`
    /// the effective source alpha (texel alpha × layer opacity).
    pub fn channel(self, d: f32, c: f32, a: f32) -> f32 {
        match self {
            BlendMode::Normal => mix(d, c, a),
            BlendMode::Add => d + c * a,
            BlendMode::Multiply => d * mix(1.0, c, a),
            BlendMode::Screen => 1.0 - (1.0 - d) * (1.0 - c * a),
            BlendMode::Subtract => d - c * a,
            BlendMode::Lighten => d.max(c * a),
            BlendMode::Darken => d.min(mix(1.0, c, a)),
            BlendMode::Overlay => mix(d, overlay(d, c), a),
            BlendMode::SoftLight => mix(d, soft_light(d, c), a),
            BlendMode::HardLight => mix(d, overlay(c, d), a),
            BlendMode::ColorDodge => mix(d, color_dodge(d, c), a),
            BlendMode::Difference => mix(d, (d - c).abs(), a),
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Composite a straight-alpha source pixel over a destination pixel.
///
/// Over an opaque destination the result is exactly [`BlendMode::channel`];
/// over a transparent destination the source shows through unmodified.
pub fn composite(src: [f32; 4], dst: [f32; 4], mode: BlendMode, opacity: f32) -> [f32; 4] {
    let a = (src[3] * opacity).clamp(0.0, 1.0);
    let da = dst[3].clamp(0.0, 1.0);
    let out_a = a + da * (1.0 - a);
    if out_a <= 0.0 {
        return [0.0; 4];
    }

    let mut out = [0.0; 4];
    for channel in 0..3 {
        let blended = mode.channel(dst[channel], src[channel], a);
        let value = (a * (1.0 - da) * src[channel] + da * blended) / out_a;
        out[channel] = value.clamp(0.0, 1.0);
    }
    out[3] = out_a.clamp(0.0, 1.0);
    out
}

fn mix(x: f32, y: f32, t: f32) -> f32 {
    x + (y - x) * t
}

fn overlay(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn soft_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

fn color_dodge(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}
