use matcap::layer::{BaseLayer, Layer};
use matcap::{BlendMode, Compositor, LayerStack, RenderBackend, RenderContext, SoftwareBackend};

const DST: [f32; 3] = [0.2, 0.5, 0.8];
const SRC: [f32; 3] = [0.9, 0.3, 0.6];
const OPACITY: f32 = 0.6;

fn mix(x: f32, y: f32, t: f32) -> f32 {
    x * (1.0 - t) + y * t
}

fn overlay(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

// W3C compositing soft light.
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
    if base == 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

fn expected(mode: BlendMode, d: f32, c: f32, a: f32) -> f32 {
    let value = match mode {
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
    };
    value.clamp(0.0, 1.0)
}

fn composite_center(mode: BlendMode) -> [u8; 4] {
    let mut backend = SoftwareBackend::new();
    let mut stack = LayerStack::new();

    let mut bottom = BaseLayer::new();
    bottom.set_color(DST);
    stack.push(Box::new(bottom));

    let mut top = BaseLayer::new();
    top.set_color(SRC);
    top.common_mut().set_blend_mode(mode);
    top.common_mut().set_opacity(OPACITY);
    stack.push(Box::new(top));
    assert_eq!(stack.initialize_all(&mut backend), 0);

    let mut compositor = Compositor::new();
    compositor.initialize(&mut backend, 24, 24).expect("initialize");
    compositor
        .render(&mut backend, &mut stack, &RenderContext::default())
        .expect("render");
    let target = compositor.color_texture().expect("composed image");
    let image = backend.read_target(target).expect("readback");
    image.get_pixel(12, 12).0
}

#[test]
fn every_mode_matches_its_closed_form() {
    for &mode in BlendMode::all() {
        let pixel = composite_center(mode);
        assert_eq!(pixel[3], 255, "{mode}: opaque destination keeps alpha 1");
        for channel in 0..3 {
            let want = expected(mode, DST[channel], SRC[channel], OPACITY) * 255.0;
            let got = f32::from(pixel[channel]);
            assert!(
                (got - want).abs() <= 1.0,
                "{mode} channel {channel}: got {got}, expected {want:.2}"
            );
        }
    }
}

#[test]
fn full_opacity_normal_replaces_destination() {
    let pixel = {
        let mut backend = SoftwareBackend::new();
        let mut stack = LayerStack::new();
        let mut bottom = BaseLayer::new();
        bottom.set_color(DST);
        stack.push(Box::new(bottom));
        let mut top = BaseLayer::new();
        top.set_color([0.0, 1.0, 0.0]);
        stack.push(Box::new(top));
        stack.initialize_all(&mut backend);

        let mut compositor = Compositor::new();
        compositor.initialize(&mut backend, 16, 16).expect("initialize");
        compositor
            .render(&mut backend, &mut stack, &RenderContext::default())
            .expect("render");
        let target = compositor.color_texture().expect("composed image");
        backend.read_target(target).expect("readback").get_pixel(8, 8).0
    };
    assert_eq!(pixel, [0, 255, 0, 255]);
}

#[test]
fn uncovered_pixels_stay_transparent() {
    let mut backend = SoftwareBackend::new();
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    stack.initialize_all(&mut backend);

    let mut compositor = Compositor::new();
    compositor.initialize(&mut backend, 16, 16).expect("initialize");
    compositor
        .render(&mut backend, &mut stack, &RenderContext::default())
        .expect("render");
    let target = compositor.color_texture().expect("composed image");
    let image = backend.read_target(target).expect("readback");
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    assert_eq!(image.get_pixel(8, 8).0, [255, 0, 0, 255]);
}
