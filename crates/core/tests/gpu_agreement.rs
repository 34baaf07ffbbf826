#![cfg(feature = "gpu")]
//! GPU and CPU backends must produce the same reconstruction
//!
//! Every test passes without touching the device when no adapter is found.

use laplace_fill_core::{
    create_backend, Channels, CpuBackend, Method, Reconstruction, Sample, SolverConfig,
};

/// Solution drift allowed between backends after a few ticks
const SOLUTION_TOLERANCE: f32 = 1e-3;

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn samples() -> Vec<Sample> {
    vec![
        Sample::new(0.0, 0.0, Channels::new(1.0, 0.0, 0.0, 1.0)),
        Sample::new(0.9, 0.1, Channels::new(0.0, 1.0, 0.0, 1.0)),
        Sample::new(0.3, 0.7, Channels::new(0.0, 0.0, 1.0, 1.0)),
        Sample::new(0.31, 0.7, Channels::new(0.5, 0.5, 0.5, 0.5)),
        Sample::new(0.99, 0.99, Channels::new(0.2, 0.4, 0.6, 0.8)),
    ]
}

#[test]
fn test_gpu_multigrid_matches_cpu() {
    let backend = create_backend(true);
    if !backend.is_gpu_accelerated() {
        return;
    }

    let mut config = SolverConfig::new(32, Method::Multigrid);
    config.multigrid.n_smooth = 2;
    config.multigrid.n_solve = 10;
    config.multigrid.min_size = 4;

    let mut gpu = Reconstruction::with_backend(config, backend).unwrap();
    let mut cpu = Reconstruction::with_backend(config, Box::new(CpuBackend::new())).unwrap();
    gpu.queue_samples(samples());
    cpu.queue_samples(samples());

    for _ in 0..5 {
        let gpu_report = gpu.tick().unwrap();
        let cpu_report = cpu.tick().unwrap();
        assert_eq!(gpu_report.inserted, cpu_report.inserted);
    }
    assert_eq!(gpu.pinned_count(), cpu.pinned_count());

    let expected = cpu.solution().unwrap();
    let actual = gpu.solution().unwrap();
    let mut worst = 0.0_f32;
    for (want, got) in expected.iter().zip(actual.iter()) {
        worst = worst.max((want - got).amax());
    }
    assert!(
        worst <= SOLUTION_TOLERANCE,
        "GPU multigrid drifted {worst} from CPU"
    );

    // Pins survive the device round trip exactly
    assert_eq!(actual[0], Channels::new(1.0, 0.0, 0.0, 1.0));
}
