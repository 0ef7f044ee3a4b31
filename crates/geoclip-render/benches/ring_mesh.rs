use criterion::{black_box, criterion_group, criterion_main, Criterion};
use geoclip_core::SampleCoord;
use geoclip_render::{frame_draws, RingMeshBuilder};

fn bench_ring_mesh(c: &mut Criterion) {
    c.bench_function("build_ring_mesh_254", |b| {
        let builder = RingMeshBuilder::default();
        b.iter(|| black_box(builder.build().expect("valid mesh")));
    });

    c.bench_function("frame_draws_9_levels", |b| {
        let mesh = RingMeshBuilder::default().build().expect("valid mesh");
        let camera = SampleCoord::new(123, -77);
        b.iter(|| black_box(frame_draws(&mesh, black_box(camera), black_box(9))));
    });
}

criterion_group!(benches, bench_ring_mesh);
criterion_main!(benches);
