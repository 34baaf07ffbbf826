//! End-to-end reconstruction scenarios
//!
//! Grid edges are clamped, so a lone pinned value eventually floods the whole
//! grid. Before that it decays smoothly away from the pin.

use laplace_fill_core::{
    Channels, CpuBackend, Method, Reconstruction, RgbaImage, Sample, SampleBrush, SolverConfig,
};
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn reconstruction(config: SolverConfig) -> Reconstruction {
    Reconstruction::with_backend(config, Box::new(CpuBackend::new())).unwrap()
}

#[test]
fn test_single_corner_pin_with_jacobi() {
    let size = 8;
    let mut recon = reconstruction(SolverConfig::new(size, Method::Jacobi));
    recon.queue_samples([Sample::new(0.0, 0.0, Channels::new(1.0, 0.0, 0.0, 0.0))]);
    for _ in 0..500 {
        recon.tick().unwrap();
    }

    let solution = recon.solution().unwrap();
    assert_eq!(solution[0], Channels::new(1.0, 0.0, 0.0, 0.0));

    // Untouched channels stay exactly zero
    assert!(solution.iter().all(|c| c.y == 0.0 && c.z == 0.0 && c.w == 0.0));
    assert!(solution.iter().all(|c| c.x > 0.5 && c.x <= 1.0));

    // Monotonic decay away from the pin, along the edge and the diagonal
    for i in 1..size {
        assert!(solution[i].x < solution[i - 1].x, "row: {i}");
        assert!(solution[i * size].x < solution[(i - 1) * size].x, "column: {i}");
        let diagonal = i * size + i;
        let previous = (i - 1) * size + (i - 1);
        assert!(solution[diagonal].x < solution[previous].x, "diagonal: {i}");
    }

    // Mirror symmetry about the diagonal
    for y in 0..size {
        for x in 0..size {
            let a = solution[y * size + x].x;
            let b = solution[x * size + y].x;
            assert!((a - b).abs() < 1e-5, "({x}, {y}): {a} vs {b}");
        }
    }
}

#[test]
fn test_pinned_values_survive_every_method() {
    let size = 16;
    let pins = [
        Sample::new(0.1, 0.1, Channels::new(1.0, 0.2, 0.3, 1.0)),
        Sample::new(0.9, 0.2, Channels::new(0.0, 0.8, 0.1, 0.5)),
        Sample::new(0.4, 0.7, Channels::new(0.6, 0.6, 0.9, 0.25)),
    ];

    for method in Method::ALL {
        let mut recon = reconstruction(SolverConfig::new(size, method));
        recon.queue_samples(pins);
        for _ in 0..20 {
            recon.tick().unwrap();
        }
        assert_eq!(recon.pinned_count(), pins.len());

        let solution = recon.solution().unwrap().into_owned();
        let constraints = recon.constraints().unwrap().into_owned();
        let mask = recon.constraint_mask().unwrap().into_owned();
        let residual = recon.residual().unwrap().into_owned();
        for (i, pinned) in mask.iter().enumerate() {
            if pinned.x > 0.5 {
                assert_eq!(solution[i], constraints[i], "{method} cell {i}");
                assert_eq!(residual[i], Channels::zeros(), "{method} cell {i}");
            }
        }
        assert!(solution.iter().all(|c| c.iter().all(|v| v.is_finite())));
    }
}

#[test]
fn test_samples_outside_grid_are_discarded() {
    let size = 8;
    let mut recon = reconstruction(SolverConfig::new(size, Method::Sor));
    recon.queue_samples([
        Sample::new(-0.2, 0.5, Channels::repeat(1.0)),
        Sample::new(0.5, 1.0, Channels::repeat(1.0)),
        Sample::new(f32::NAN, 0.5, Channels::repeat(1.0)),
    ]);
    let report = recon.tick().unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(recon.pinned_count(), 0);
    assert_eq!(recon.residual_norm().unwrap(), 0.0);
}

#[test]
fn test_run_until_reports_convergence() {
    let mut recon = reconstruction(SolverConfig::new(16, Method::Multigrid));
    recon.queue_samples([
        Sample::new(0.0, 0.0, Channels::repeat(1.0)),
        Sample::new(0.99, 0.99, Channels::repeat(0.0)),
    ]);
    let summary = recon.run_until(1e-4, 50).unwrap();
    assert!(summary.converged, "{summary:?}");
    assert!(summary.ticks >= 1 && summary.ticks <= 50);
    assert!(summary.residual_norm <= 1e-4);
    assert_eq!(recon.ticks(), summary.ticks);
    assert!(recon.rms_residual().unwrap() <= summary.residual_norm);
}

#[test]
fn test_brush_strokes_reconstruct_image() {
    let size = 32;
    let image = RgbaImage::from_fn(size, size, |x, y| {
        [(x * 8) as u8, (y * 8) as u8, 128, 255]
    });
    let brush = SampleBrush::default();
    let mut rng = StdRng::seed_from_u64(2024);

    let mut recon = reconstruction(SolverConfig::new(size, Method::Multigrid));
    for &(x, y) in &[(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75), (0.5, 0.5)] {
        recon.queue_samples(brush.scatter(&mut rng, Vector2::new(x, y), &image));
    }
    let queued = recon.pending_samples();
    assert!(queued > 0);

    let summary = recon.run_until(1e-3, 20).unwrap();
    assert!(summary.converged, "{summary:?}");
    assert!(recon.pinned_count() <= queued);

    // Blue and alpha are constant on the image, so the fill is too
    let solution = recon.solution().unwrap();
    for c in solution.iter() {
        assert!((c.z - 128.0 / 255.0).abs() < 1e-3);
        assert!((c.w - 1.0).abs() < 1e-3);
    }
}
