//! Benchmarks for transport map construction and application.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phasemap::{
    CoordinateConvention, CpuBackend, GridSize, InterpolationOrder, PhaseSpace,
    TransportBackend, TransportMap,
};

fn benchmark_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_build");
    group.sample_size(20);

    for size in [128u32, 512] {
        let grid = GridSize::square(size).unwrap();
        for order in [InterpolationOrder::Linear, InterpolationOrder::Cubic] {
            group.bench_with_input(
                BenchmarkId::new(format!("order_{}", order), size),
                &grid,
                |b, &grid| {
                    b.iter(|| {
                        TransportMap::rotation(
                            grid,
                            order,
                            CoordinateConvention::PixelCentered,
                            black_box(0.01),
                        )
                    })
                },
            );
        }
    }

    group.finish();
}

fn benchmark_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_apply");

    for size in [128u32, 512] {
        let grid = GridSize::square(size).unwrap();
        let map = TransportMap::rotation(
            grid,
            InterpolationOrder::Cubic,
            CoordinateConvention::PixelCentered,
            0.01,
        )
        .unwrap()
        .into_shared();
        let source = PhaseSpace::gaussian(grid, size as f64 / 16.0, size as f64 / 8.0);
        let mut destination = vec![0.0; grid.cells()];

        for (label, parallel) in [("sequential", false), ("parallel", true)] {
            let backend = CpuBackend::new(map.clone(), true).parallel(parallel);
            group.bench_with_input(BenchmarkId::new(label, size), &source, |b, source| {
                b.iter(|| backend.apply(black_box(source.data()), &mut destination))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_build, benchmark_apply);
criterion_main!(benches);
