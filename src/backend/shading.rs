//! CPU evaluation of the layer shaders in `shaders/wgsl`. Kept line-for-line
//! comparable with the WGSL so both backends produce the same image up to
//! 8-bit quantization.

use super::{AdjustUniforms, FrameUniforms, ShaderParams};

type Vec3 = [f32; 3];

/// Interpolated vertex attributes at one pixel.
#[derive(Debug, Clone, Copy)]
pub(super) struct Fragment {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: [f32; 2],
    pub tangent: Vec3,
}

/// Read-only view of RGBA f32 texels with repeat addressing and bilinear
/// filtering, like the wgpu sampler the GPU backend binds.
#[derive(Debug, Clone, Copy)]
pub(super) struct TexelView<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: &'a [[f32; 4]],
}

impl TexelView<'_> {
    fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        let w = self.width.max(1) as i64;
        let h = self.height.max(1) as i64;
        let index = (y.rem_euclid(h) * w + x.rem_euclid(w)) as usize;
        self.texels.get(index).copied().unwrap_or([0.0; 4])
    }

    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = uv[0] * self.width as f32 - 0.5;
        let y = uv[1] * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = lerp4(self.fetch(x0, y0), self.fetch(x0 + 1, y0), fx);
        let bottom = lerp4(self.fetch(x0, y0 + 1), self.fetch(x0 + 1, y0 + 1), fx);
        lerp4(top, bottom, fy)
    }
}

const WHITE: [[f32; 4]; 1] = [[1.0, 1.0, 1.0, 1.0]];
const FLAT_NORMAL: [[f32; 4]; 1] = [[0.5, 0.5, 1.0, 1.0]];

pub(super) fn white_texel() -> TexelView<'static> {
    TexelView {
        width: 1,
        height: 1,
        texels: &WHITE,
    }
}

pub(super) fn flat_normal_texel() -> TexelView<'static> {
    TexelView {
        width: 1,
        height: 1,
        texels: &FLAT_NORMAL,
    }
}

/// Fragment stage for mesh layers.
pub(super) fn shade_fragment(
    params: &ShaderParams,
    frame: &FrameUniforms,
    fragment: &Fragment,
    layer_texture: TexelView<'_>,
    normal_map: TexelView<'_>,
) -> [f32; 4] {
    match params {
        ShaderParams::Base(p) => [p.color[0], p.color[1], p.color[2], 1.0],
        ShaderParams::DirectionalLight(p) => {
            let n = shading_normal(frame, fragment, normal_map);
            let to_light = normalize(neg(xyz(p.direction)));
            let diffuse = dot(n, to_light).max(0.0).min(1.0);
            let color = scale(xyz(p.color), p.color[3]);
            [color[0], color[1], color[2], diffuse]
        }
        ShaderParams::SpotLight(p) => {
            let n = shading_normal(frame, fragment, normal_map);
            let to_light = normalize(neg(xyz(p.direction)));
            let facing = dot(n, to_light);
            let cutoff = 1.0 - p.shape[0];
            let edge = p.shape[1] + 0.0001;
            let spot = smoothstep(cutoff - edge, cutoff + edge, facing);
            let color = scale(xyz(p.color), p.color[3]);
            [color[0], color[1], color[2], spot]
        }
        ShaderParams::Fresnel(p) => {
            let n = shading_normal(frame, fragment, normal_map);
            let facing = n[2].clamp(0.0, 1.0);
            let bias = p.shape[1];
            let rim = bias + (1.0 - bias) * (1.0 - facing).powf(p.shape[0]);
            let color = scale(xyz(p.color), p.color[3]);
            [color[0], color[1], color[2], rim.clamp(0.0, 1.0)]
        }
        ShaderParams::Noise(p) => {
            let uv = [fragment.uv[0] * p.shape[0], fragment.uv[1] * p.shape[0]];
            let value = layer_texture.sample(uv)[0];
            [
                p.color[0],
                p.color[1],
                p.color[2],
                (value * p.color[3]).clamp(0.0, 1.0),
            ]
        }
        ShaderParams::Image(p) => {
            let mut uv = fragment.uv;
            if p.mapping == 1 {
                uv = [
                    fragment.position[0] * 0.5 + 0.5,
                    0.5 - fragment.position[1] * 0.5,
                ];
            }
            let (s, c) = p.rotation.sin_cos();
            let centered = [uv[0] - 0.5, uv[1] - 0.5];
            let rotated = [
                c * centered[0] - s * centered[1],
                s * centered[0] + c * centered[1],
            ];
            let zoom = p.scale.max(0.0001);
            let texel = layer_texture.sample([rotated[0] / zoom + 0.5, rotated[1] / zoom + 0.5]);
            if p.has_texture == 0 {
                [0.0; 4]
            } else {
                texel
            }
        }
        // Full-screen kinds never reach the mesh rasterizer.
        ShaderParams::ColorAdjust(_) => [0.0; 4],
    }
}

/// Fragment stage of the color adjustment pass.
pub(super) fn shade_color_adjust(params: &AdjustUniforms, source: [f32; 4]) -> [f32; 4] {
    let mut hsv = rgb_to_hsv(xyz(source));
    hsv[0] = fract(hsv[0] + params.hue + 1.0);
    hsv[1] = (hsv[1] * params.saturation).clamp(0.0, 1.0);
    let mut rgb = hsv_to_rgb(hsv);
    for channel in rgb.iter_mut() {
        let brightened = *channel + params.brightness;
        *channel = ((brightened - 0.5) * params.contrast + 0.5).clamp(0.0, 1.0);
    }
    let amount = params.amount.clamp(0.0, 1.0);
    [
        mix(source[0], rgb[0], amount),
        mix(source[1], rgb[1], amount),
        mix(source[2], rgb[2], amount),
        source[3],
    ]
}

fn shading_normal(frame: &FrameUniforms, fragment: &Fragment, normal_map: TexelView<'_>) -> Vec3 {
    let n = normalize(fragment.normal);
    let map_uv = [
        fragment.uv[0] * frame.normal_scale + frame.normal_offset[0],
        fragment.uv[1] * frame.normal_scale + frame.normal_offset[1],
    ];
    let texel = normal_map.sample(map_uv);
    let texel = [texel[0] * 2.0 - 1.0, texel[1] * 2.0 - 1.0, texel[2] * 2.0 - 1.0];

    let mut enabled = frame.use_normal_map != 0;
    if frame.preview_mode == 1 && fragment.position[0] < 0.0 {
        enabled = false;
    }
    if !enabled {
        return n;
    }

    let t = normalize(sub(fragment.tangent, scale(n, dot(fragment.tangent, n))));
    let b = cross(n, t);
    let perturbed = normalize(add(add(scale(t, texel[0]), scale(b, texel[1])), scale(n, texel[2])));
    let strength = frame.normal_strength.clamp(0.0, 1.0);
    normalize([
        mix(n[0], perturbed[0], strength),
        mix(n[1], perturbed[1], strength),
        mix(n[2], perturbed[2], strength),
    ])
}

fn rgb_to_hsv(c: Vec3) -> Vec3 {
    let max_c = c[0].max(c[1]).max(c[2]);
    let min_c = c[0].min(c[1]).min(c[2]);
    let delta = max_c - min_c;
    let mut h = 0.0;
    if delta > 0.00001 {
        h = if max_c == c[0] {
            (c[1] - c[2]) / delta
        } else if max_c == c[1] {
            2.0 + (c[2] - c[0]) / delta
        } else {
            4.0 + (c[0] - c[1]) / delta
        };
        h = fract(h / 6.0 + 1.0);
    }
    let s = if max_c > 0.00001 { delta / max_c } else { 0.0 };
    [h, s, max_c]
}

fn hsv_to_rgb(c: Vec3) -> Vec3 {
    let k = [0.0, 2.0 / 3.0, 1.0 / 3.0];
    let mut out = [0.0; 3];
    for channel in 0..3 {
        let p = (fract(c[0] + k[channel]) * 6.0 - 3.0).abs();
        out[channel] = c[2] * mix(1.0, (p - 1.0).clamp(0.0, 1.0), c[1]);
    }
    out
}

pub(super) fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        mix(a[0], b[0], t),
        mix(a[1], b[1], t),
        mix(a[2], b[2], t),
        mix(a[3], b[3], t),
    ]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn mix(x: f32, y: f32, t: f32) -> f32 {
    x + (y - x) * t
}

fn fract(x: f32) -> f32 {
    x - x.floor()
}

fn xyz(v: [f32; 4]) -> Vec3 {
    [v[0], v[1], v[2]]
}

fn neg(v: Vec3) -> Vec3 {
    [-v[0], -v[1], -v[2]]
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: Vec3) -> Vec3 {
    let len = dot(v, v).sqrt();
    if len <= f32::EPSILON {
        v
    } else {
        scale(v, 1.0 / len)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BaseUniforms, LightUniforms};
    use super::*;

    fn front_fragment() -> Fragment {
        Fragment {
            position: [0.0, 0.0, 0.9],
            normal: [0.0, 0.0, 1.0],
            uv: [0.25, 0.5],
            tangent: [-1.0, 0.0, 0.0],
        }
    }

    #[test]
    fn base_is_opaque_flat_color() {
        let params = ShaderParams::Base(BaseUniforms {
            color: [0.2, 0.4, 0.6, 0.0],
        });
        let out = shade_fragment(
            &params,
            &FrameUniforms::default(),
            &front_fragment(),
            white_texel(),
            flat_normal_texel(),
        );
        assert_eq!(out, [0.2, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn head_on_light_has_full_coverage() {
        let params = ShaderParams::DirectionalLight(LightUniforms {
            direction: [0.0, 0.0, -1.0, 0.0],
            color: [1.0, 0.5, 0.25, 2.0],
        });
        let out = shade_fragment(
            &params,
            &FrameUniforms::default(),
            &front_fragment(),
            white_texel(),
            flat_normal_texel(),
        );
        assert_eq!(out, [2.0, 1.0, 0.5, 1.0]);
    }

    #[test]
    fn light_from_behind_has_no_coverage() {
        let params = ShaderParams::DirectionalLight(LightUniforms {
            direction: [0.0, 0.0, 1.0, 0.0],
            color: [1.0, 1.0, 1.0, 1.0],
        });
        let out = shade_fragment(
            &params,
            &FrameUniforms::default(),
            &front_fragment(),
            white_texel(),
            flat_normal_texel(),
        );
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn bilinear_sample_at_texel_center_is_exact() {
        let texels = [
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0, 1.0],
        ];
        let view = TexelView {
            width: 2,
            height: 2,
            texels: &texels,
        };
        assert_eq!(view.sample([0.75, 0.25]), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(view.sample([0.25, 0.75]), [0.0, 0.0, 1.0, 1.0]);
        // Repeat addressing wraps past the edge.
        assert_eq!(view.sample([1.25, 0.25]), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn neutral_adjustment_is_identity() {
        let params = AdjustUniforms {
            hue: 0.0,
            saturation: 1.0,
            brightness: 0.0,
            contrast: 1.0,
            amount: 1.0,
            _pad: [0.0; 3],
        };
        let source = [0.8, 0.3, 0.1, 0.5];
        let out = shade_color_adjust(&params, source);
        for channel in 0..4 {
            assert!((out[channel] - source[channel]).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_saturation_produces_gray() {
        let params = AdjustUniforms {
            hue: 0.0,
            saturation: 0.0,
            brightness: 0.0,
            contrast: 1.0,
            amount: 1.0,
            _pad: [0.0; 3],
        };
        let out = shade_color_adjust(&params, [0.8, 0.3, 0.1, 1.0]);
        assert!((out[0] - out[1]).abs() < 1e-5);
        assert!((out[1] - out[2]).abs() < 1e-5);
    }
}
