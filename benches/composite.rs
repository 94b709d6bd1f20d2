//! Compositor benchmarks on the software backend: cached frame vs full rebuild.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use matcap::layer::{AdjustmentLayer, BaseLayer, DirectionalLightLayer, FresnelLayer, NoiseLayer};
use matcap::{Compositor, LayerStack, RenderContext, SoftwareBackend};

const SIZE: u32 = 128;

fn build_stack(backend: &mut SoftwareBackend) -> LayerStack {
    let mut stack = LayerStack::new();
    stack.push(Box::new(BaseLayer::new()));
    stack.push(Box::new(DirectionalLightLayer::new()));
    stack.push(Box::new(FresnelLayer::new()));
    stack.push(Box::new(NoiseLayer::new()));
    stack.push(Box::new(AdjustmentLayer::new()));
    stack.initialize_all(backend);
    stack
}

fn bench_composite(c: &mut Criterion) {
    let mut backend = SoftwareBackend::new();
    let mut stack = build_stack(&mut backend);
    let mut compositor = Compositor::new();
    compositor
        .initialize(&mut backend, SIZE, SIZE)
        .expect("allocate targets");
    let ctx = RenderContext::default();

    let mut group = c.benchmark_group("composite");
    group.sample_size(30);

    group.bench_function("software_128_cached", |b| {
        compositor
            .render(&mut backend, &mut stack, &ctx)
            .expect("warm render");
        b.iter(|| black_box(compositor.render(&mut backend, &mut stack, &ctx).expect("render")));
    });

    group.bench_function("software_128_top_layer_edit", |b| {
        b.iter(|| {
            if let Some(layer) = stack.get_mut(4) {
                layer.common_mut().mark_dirty();
            }
            black_box(compositor.render(&mut backend, &mut stack, &ctx).expect("render"))
        });
    });

    group.bench_function("software_128_full", |b| {
        b.iter(|| {
            compositor.invalidate_cache();
            black_box(compositor.render(&mut backend, &mut stack, &ctx).expect("render"))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_composite);
criterion_main!(benches);
