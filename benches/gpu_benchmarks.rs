// benches/gpu_benchmarks.rs — GPU rasterization benchmarks.
//
// Each GPU benchmark sits in the same group as its CPU counterpart for
// direct comparison.
//
//   cargo bench --bench gpu_benchmarks
//
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including buffer creation, upload, submit,
// poll, and readback. That is the right metric here: the tracker cannot
// start until the surface is back on the CPU.
//
// The first iterations pay pipeline JIT costs on some drivers, so warm-up
// time is set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use kdeshift::gpu::density::GpuDensityRasterizer;
use kdeshift::gpu::device::GpuDevice;
use kdeshift::{Backend, DensityRasterizer, MeanShift, MeanShiftConfig, Point2};

fn make_points(n: usize) -> Vec<Point2> {
    // Golden-angle spiral: deterministic, fills a disc evenly.
    (0..n)
        .map(|i| {
            let r = (i as f32 / n as f32).sqrt() * 10.0;
            let t = i as f32 * 2.399_963;
            Point2::new(r * t.cos(), r * t.sin())
        })
        .collect()
}

fn bench_rasterize(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("no GPU adapter");
    let kernel = GpuDensityRasterizer::new(&gpu);
    let r = DensityRasterizer::new(256);

    let mut group = c.benchmark_group("rasterize_gpu_vs_cpu");
    group.warm_up_time(Duration::from_secs(2));
    for &n in &[1_000usize, 10_000] {
        let pts = make_points(n);
        group.bench_with_input(BenchmarkId::new("cpu_exact", n), &pts, |b, pts| {
            b.iter(|| r.build(pts, 0.5))
        });
        group.bench_with_input(BenchmarkId::new("gpu", n), &pts, |b, pts| {
            b.iter(|| kernel.build(&gpu, &r, pts, 0.5).expect("gpu rasterize"))
        });
    }
    group.finish();
}

fn bench_cluster(c: &mut Criterion) {
    let mut config = MeanShiftConfig::default();
    config.context.backend = Backend::Gpu;
    let mut ms = MeanShift::new(config).expect("default config is valid");
    ms.set_points(&make_points(10_000)).expect("finite points");
    ms.set_bandwidth(0.5).expect("positive sigma");
    ms.initialize().expect("no GPU adapter");

    let mut group = c.benchmark_group("cluster_gpu");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(3));
    group.bench_function("gpu_10000", |b| b.iter(|| ms.cluster().expect("cluster run")));
    group.finish();
}

criterion_group!(benches, bench_rasterize, bench_cluster);
criterion_main!(benches);
