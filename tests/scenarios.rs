use image::RgbaImage;

use matcap::layer::{
    AdjustmentLayer, BaseLayer, DirectionalLightLayer, FresnelLayer, ImageLayer, Layer,
    NoiseLayer, SpotLightLayer,
};
use matcap::{
    BlendMode, Compositor, LayerStack, PreviewMode, RenderBackend, RenderContext, SoftwareBackend,
};

fn render(stack: &mut LayerStack, width: u32, height: u32, ctx: &RenderContext) -> RgbaImage {
    let mut backend = SoftwareBackend::new();
    stack.initialize_all(&mut backend);
    let mut compositor = Compositor::new();
    compositor.initialize(&mut backend, width, height).expect("initialize");
    compositor.render(&mut backend, stack, ctx).expect("render");
    let target = compositor.color_texture().expect("composed image");
    let image = backend.read_target(target).expect("readback");
    stack.clear(&mut backend);
    compositor.release(&mut backend);
    assert_eq!(backend.resource_counts(), Default::default());
    image
}

#[test]
fn white_base_plus_white_add_light_saturates() {
    let mut stack = LayerStack::new();
    let mut base = BaseLayer::new();
    base.set_color([1.0, 1.0, 1.0]);
    stack.push(Box::new(base));
    let light = DirectionalLightLayer::new();
    assert_eq!(light.common().blend_mode(), BlendMode::Add);
    assert_eq!(light.params().intensity, 1.0);
    assert_eq!(light.params().color, [1.0, 1.0, 1.0]);
    stack.push(Box::new(light));

    let image = render(&mut stack, 64, 64, &RenderContext::default());
    let covered: Vec<_> = image.pixels().filter(|pixel| pixel[3] > 0).collect();
    assert!(covered.len() > 64 * 64 / 2, "sphere should cover most of the frame");
    assert!(covered.iter().all(|pixel| pixel.0 == [255, 255, 255, 255]));
}

#[test]
fn default_light_direction_lights_the_visible_face() {
    let mut stack = LayerStack::new();
    stack.push(Box::new(DirectionalLightLayer::new()));
    let front = render(&mut stack, 32, 32, &RenderContext::default());
    assert!(front.get_pixel(16, 16)[3] > 250, "center {:?}", front.get_pixel(16, 16));

    let mut stack = LayerStack::new();
    let mut back = DirectionalLightLayer::new();
    back.edit(|params| params.direction = [0.0, 0.0, -1.0]);
    stack.push(Box::new(back));
    let behind = render(&mut stack, 32, 32, &RenderContext::default());
    assert_eq!(behind.get_pixel(16, 16)[3], 0);
}

#[test]
fn comparison_mode_draws_two_round_spheres() {
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    let ctx = RenderContext {
        preview_mode: PreviewMode::Comparison,
        ..RenderContext::default()
    };
    let image = render(&mut stack, 64, 32, &ctx);

    assert_eq!(image.get_pixel(15, 16)[3], 255);
    assert_eq!(image.get_pixel(48, 16)[3], 255);
    assert_eq!(image.get_pixel(32, 16)[3], 0);

    let row_width = (0..32).filter(|&x| image.get_pixel(x, 16)[3] > 0).count() as i64;
    let column_height = (0..32).filter(|&y| image.get_pixel(15, y)[3] > 0).count() as i64;
    assert!(
        (row_width - column_height).abs() <= 2,
        "sphere distorted: {row_width}x{column_height}"
    );
}

#[test]
fn adjustment_layer_desaturates_everything_below() {
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    let mut adjustment = AdjustmentLayer::new();
    adjustment.edit(|params| params.saturation = 0.0);
    stack.push(Box::new(adjustment));

    let image = render(&mut stack, 32, 32, &RenderContext::default());
    let [r, g, b, a] = image.get_pixel(16, 16).0;
    assert_eq!(a, 255);
    assert_eq!((r, g), (g, b));
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
}

#[test]
fn adjustment_opacity_zero_is_identity() {
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    let mut adjustment = AdjustmentLayer::new();
    adjustment.edit(|params| params.hue = 0.25);
    adjustment.common_mut().set_opacity(0.0);
    stack.push(Box::new(adjustment));

    let image = render(&mut stack, 32, 32, &RenderContext::default());
    assert_eq!(image.get_pixel(16, 16).0, [255, 0, 0, 255]);
}

#[test]
fn every_variant_renders_in_one_stack() {
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    stack.push(Box::new(DirectionalLightLayer::new()));
    stack.push(Box::new(SpotLightLayer::new()));
    stack.push(Box::new(FresnelLayer::new()));
    stack.push(Box::new(NoiseLayer::new()));
    stack.push(Box::new(ImageLayer::new()));
    stack.push(Box::new(AdjustmentLayer::new()));

    let mut backend = SoftwareBackend::new();
    assert_eq!(stack.initialize_all(&mut backend), 0);
    let mut compositor = Compositor::new();
    compositor.initialize(&mut backend, 32, 32).expect("initialize");
    let stats = compositor
        .render(&mut backend, &mut stack, &RenderContext::default())
        .expect("render");

    assert_eq!(stats.layers_rendered, 7);
    assert_eq!(stats.layers_skipped, 0);
    assert!(stack.dirty_flags().iter().all(|dirty| !dirty));
}

#[test]
fn normal_map_texture_is_bound_for_every_layer() {
    let mut backend = SoftwareBackend::new();
    // Flat normal map: (128, 128, 255) leaves shading unchanged.
    let texels: Vec<u8> = std::iter::repeat([128u8, 128, 255, 255]).take(4).flatten().collect();
    let normal_map = backend
        .create_texture("normal-map", 2, 2, &texels)
        .expect("normal map");

    let mut stack = LayerStack::new();
    let mut base = BaseLayer::new();
    base.set_color([1.0, 1.0, 1.0]);
    stack.push(Box::new(base));
    stack.push(Box::new(DirectionalLightLayer::new()));
    stack.initialize_all(&mut backend);

    let mut compositor = Compositor::new();
    compositor.initialize(&mut backend, 32, 32).expect("initialize");
    let ctx = RenderContext {
        normal_map: Some(normal_map),
        use_normal_map: true,
        ..RenderContext::default()
    };
    let stats = compositor.render(&mut backend, &mut stack, &ctx).expect("render");
    assert_eq!(stats.layers_rendered, 2);
    let target = compositor.color_texture().expect("composed image");
    let image = backend.read_target(target).expect("readback");
    assert_eq!(image.get_pixel(16, 16).0, [255, 255, 255, 255]);

    // Dropping the normal map changes the frame uniforms and forces a rebuild.
    let stats = compositor
        .render(&mut backend, &mut stack, &RenderContext::default())
        .expect("render");
    assert!(!stats.cache_hit);
    assert_eq!(stats.layers_rendered, 2);
}
