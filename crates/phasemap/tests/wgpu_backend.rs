//! WebGPU backend against the CPU reference. Requires a GPU.

use std::sync::Arc;

use phasemap::{
    CoordinateConvention, CpuBackend, GridSize, InterpolationOrder, PhaseSpace,
    TransportBackend, TransportMap, WgpuBackend, WgpuContext,
};

fn map(size: u32, order: InterpolationOrder, angle: f64) -> Arc<TransportMap> {
    TransportMap::rotation(
        GridSize::square(size).unwrap(),
        order,
        CoordinateConvention::PixelCentered,
        angle,
    )
    .unwrap()
    .into_shared()
}

fn max_relative_diff(expected: &[f32], actual: &[f32]) -> f32 {
    let scale = expected.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    let diff = expected
        .iter()
        .zip(actual)
        .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
    diff / scale
}

#[tokio::test]
#[ignore] // Requires GPU
async fn test_matches_cpu_backend() {
    let ctx = Arc::new(WgpuContext::new().await.unwrap());
    let source = PhaseSpace::gaussian(GridSize::square(128).unwrap(), 10.0, 20.0);

    for order in InterpolationOrder::ALL {
        for saturate in [false, true] {
            let map = map(128, order, 0.21);
            let cpu = CpuBackend::new(map.clone(), saturate);
            let gpu = WgpuBackend::new(ctx.clone(), map, saturate).unwrap();

            let mut expected = vec![0.0; source.data().len()];
            let mut actual = vec![0.0; source.data().len()];
            cpu.apply(source.data(), &mut expected).unwrap();
            gpu.apply(source.data(), &mut actual).unwrap();

            let diff = max_relative_diff(&expected, &actual);
            assert!(diff <= 1e-6, "order {order} saturate {saturate}: {diff}");
        }
    }
}

#[tokio::test]
#[ignore] // Requires GPU
async fn test_resident_steps_match_host_steps() {
    let ctx = Arc::new(WgpuContext::new().await.unwrap());
    let map = map(64, InterpolationOrder::Cubic, 0.05);
    let initial = PhaseSpace::gaussian(map.grid(), 6.0, 3.0);

    let cpu = CpuBackend::new(map.clone(), true);
    let mut expected = initial.data().to_vec();
    let mut scratch = vec![0.0; expected.len()];
    for _ in 0..20 {
        cpu.apply(&expected, &mut scratch).unwrap();
        std::mem::swap(&mut expected, &mut scratch);
    }

    let mut gpu = WgpuBackend::new(ctx, map, true).unwrap();
    let actual = gpu.run_resident(initial.data(), 20).unwrap();

    let diff = max_relative_diff(&expected, &actual);
    assert!(diff <= 1e-5, "{diff}");
}

#[tokio::test]
#[ignore] // Requires GPU
async fn test_rebinding_map() {
    let ctx = Arc::new(WgpuContext::new().await.unwrap());
    let mut gpu = WgpuBackend::new(ctx, map(16, InterpolationOrder::Linear, 0.4), false).unwrap();
    gpu.set_map(map(32, InterpolationOrder::Nearest, 0.0)).unwrap();

    let source: Vec<f32> = (0..32 * 32).map(|i| i as f32).collect();
    let mut destination = vec![0.0; source.len()];
    gpu.apply(&source, &mut destination).unwrap();
    assert_eq!(destination, source);

    let mut short = vec![0.0; 10];
    assert!(gpu.apply(&source, &mut short).is_err());
}

#[tokio::test]
#[ignore] // Requires GPU
async fn test_concurrent_applies_keep_their_own_source() {
    let ctx = Arc::new(WgpuContext::new().await.unwrap());
    let map = map(48, InterpolationOrder::Cubic, 0.3);
    let gpu = WgpuBackend::new(ctx, map.clone(), true).unwrap();
    let cpu = CpuBackend::new(map.clone(), true);

    let sources: Vec<Vec<f32>> = [(4.0, 9.0), (11.0, 2.5)]
        .iter()
        .map(|&(sq, sp)| PhaseSpace::gaussian(map.grid(), sq, sp).into_vec())
        .collect();
    let expected: Vec<Vec<f32>> = sources
        .iter()
        .map(|source| {
            let mut out = vec![0.0; source.len()];
            cpu.apply(source, &mut out).unwrap();
            out
        })
        .collect();

    std::thread::scope(|scope| {
        for (source, expected) in sources.iter().zip(&expected) {
            let gpu = &gpu;
            scope.spawn(move || {
                let mut actual = vec![0.0; source.len()];
                for _ in 0..50 {
                    gpu.apply(source, &mut actual).unwrap();
                    let diff = max_relative_diff(expected, &actual);
                    assert!(diff <= 1e-6, "{diff}");
                }
            });
        }
    });
}

#[tokio::test]
#[ignore] // Requires GPU
async fn test_download_after_apply_returns_result() {
    let ctx = Arc::new(WgpuContext::new().await.unwrap());
    let gpu = WgpuBackend::new(ctx, map(32, InterpolationOrder::Quadratic, 0.2), true).unwrap();
    let source = PhaseSpace::gaussian(GridSize::square(32).unwrap(), 3.0, 5.0);

    let mut destination = vec![0.0; source.data().len()];
    gpu.apply(source.data(), &mut destination).unwrap();
    assert_eq!(gpu.download().unwrap(), destination);
}
