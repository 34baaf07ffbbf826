//! Solver Validation Suite
//!
//! Every method must converge to the same discrete harmonic field. A bilinear
//! function `a + bx + cy + dxy` has a zero 5-point Laplacian, so pinning it on
//! the outer ring of the grid fixes the exact interior solution.

use approx::assert_abs_diff_eq;
use laplace_fill_core::{
    CgGuard, Channels, CpuBackend, Method, MultigridParams, Reconstruction, Sample, SolverConfig,
    StepOutcome,
};

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Maximum interior error accepted after convergence
const FIELD_TOLERANCE: f32 = 1e-3;

/// Residual norm accepted after convergence
const RESIDUAL_TOLERANCE: f32 = 1e-3;

/// Distinct affine map per channel so no channel is identically zero
fn spread(v: f32) -> Channels {
    Channels::new(v, 0.5 * v + 0.25, 1.0 - 0.5 * v, 0.75 * v + 0.1)
}

fn bilinear(size: usize, x: usize, y: usize) -> Channels {
    let s = (size - 1) as f32;
    let (u, v) = (x as f32 / s, y as f32 / s);
    spread(0.2 + 0.5 * u + 0.3 * v + 0.4 * u * v)
}

fn centre(size: usize, x: usize, y: usize) -> (f32, f32) {
    (
        (x as f32 + 0.5) / size as f32,
        (y as f32 + 0.5) / size as f32,
    )
}

fn ring_samples(size: usize) -> Vec<Sample> {
    let mut samples = Vec::new();
    for y in 0..size {
        for x in 0..size {
            if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                let (px, py) = centre(size, x, y);
                samples.push(Sample::new(px, py, bilinear(size, x, y)));
            }
        }
    }
    samples
}

fn reconstruction(config: SolverConfig) -> Reconstruction {
    Reconstruction::with_backend(config, Box::new(CpuBackend::new())).unwrap()
}

fn max_error(recon: &Reconstruction) -> f32 {
    let size = recon.size();
    let solution = recon.solution().unwrap();
    let mut worst = 0.0_f32;
    for y in 0..size {
        for x in 0..size {
            let diff = solution[y * size + x] - bilinear(size, x, y);
            worst = worst.max(diff.amax());
        }
    }
    worst
}

fn assert_harmonic_ring(method: Method, ticks: usize) {
    let size = 16;
    let mut recon = reconstruction(SolverConfig::new(size, method));
    recon.queue_samples(ring_samples(size));
    for _ in 0..ticks {
        recon.tick().unwrap();
    }

    let error = max_error(&recon);
    let norm = recon.residual_norm().unwrap();
    assert!(
        error < FIELD_TOLERANCE,
        "{method}: interior error {error} after {ticks} ticks"
    );
    assert!(
        norm < RESIDUAL_TOLERANCE,
        "{method}: residual norm {norm} after {ticks} ticks"
    );
}

#[test]
fn test_jacobi_converges_to_bilinear() {
    assert_harmonic_ring(Method::Jacobi, 1000);
}

#[test]
fn test_sor_converges_to_bilinear() {
    assert_harmonic_ring(Method::Sor, 300);
}

#[test]
fn test_conjugate_gradient_converges_to_bilinear() {
    // 196 free cells
    assert_harmonic_ring(Method::ConjugateGradient, 196);
}

#[test]
fn test_multigrid_converges_to_bilinear() {
    assert_harmonic_ring(Method::Multigrid, 5);
}

#[test]
fn test_conjugate_gradient_terminates_within_free_cell_count() {
    let size = 8;
    let pins = [
        (0, 0, 1.0),
        (7, 7, 0.25),
        (3, 3, 0.8),
        (4, 1, 0.4),
        (2, 6, 0.6),
    ];
    let free_cells = size * size - pins.len();

    let mut recon = reconstruction(SolverConfig::new(size, Method::ConjugateGradient));
    recon.queue_samples(pins.iter().map(|&(x, y, v)| {
        let (px, py) = centre(size, x, y);
        Sample::new(px, py, spread(v))
    }));

    let initial = {
        recon.tick().unwrap();
        recon.residual_norm().unwrap()
    };
    for _ in 1..free_cells {
        recon.tick().unwrap();
    }
    let norm = recon.residual_norm().unwrap();
    assert!(initial > 0.1, "initial residual {initial}");
    assert!(
        norm < 1e-4,
        "residual {norm} after {free_cells} steps (started at {initial})"
    );
}

#[test]
fn test_conjugate_gradient_restarts_after_insertion() {
    let size = 16;
    let mut recon = reconstruction(SolverConfig::new(size, Method::ConjugateGradient));
    recon.queue_samples(ring_samples(size));
    for _ in 0..60 {
        recon.tick().unwrap();
    }
    assert!(recon.residual_norm().unwrap() < RESIDUAL_TOLERANCE);

    // A new pin in the middle makes the old recurrence residual meaningless
    let (px, py) = centre(size, 8, 8);
    recon.queue_samples([Sample::new(px, py, Channels::repeat(2.0))]);
    recon.tick().unwrap();
    assert!(recon.residual_norm().unwrap() > RESIDUAL_TOLERANCE);

    for _ in 0..200 {
        recon.tick().unwrap();
    }
    let norm = recon.residual_norm().unwrap();
    assert!(norm < RESIDUAL_TOLERANCE, "residual {norm} after insertion");

    let solution = recon.solution().unwrap();
    assert_eq!(solution[8 * size + 8], Channels::repeat(2.0));
}

/// Known edge case: a channel with no data has `p·Lp = 0` on every step.
/// The all-channels guard then skips every step; the per-channel guard
/// freezes only that channel.
#[test]
fn test_cg_guard_with_an_empty_channel() {
    let size = 8;
    let samples: Vec<Sample> = [(0, 0, 1.0), (7, 7, 0.2)]
        .iter()
        .map(|&(x, y, v)| {
            let (px, py) = centre(size, x, y);
            Sample::new(px, py, Channels::new(v, v, v, 0.0))
        })
        .collect();

    let mut coarse = SolverConfig::new(size, Method::ConjugateGradient);
    coarse.conjugate_gradient.guard = CgGuard::AllChannels;
    let mut stalled = reconstruction(coarse);
    stalled.queue_samples(samples.clone());
    for _ in 0..20 {
        assert_eq!(stalled.tick().unwrap().outcome, StepOutcome::Skipped);
    }
    let solution = stalled.solution().unwrap();
    let free_touched = solution
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != 0 && i != size * size - 1)
        .any(|(_, c)| *c != Channels::zeros());
    assert!(!free_touched, "skipped steps must not move free cells");

    let mut precise = SolverConfig::new(size, Method::ConjugateGradient);
    precise.conjugate_gradient.guard = CgGuard::PerChannel;
    let mut progressing = reconstruction(precise);
    progressing.queue_samples(samples);
    let before = {
        assert_eq!(progressing.tick().unwrap().outcome, StepOutcome::Updated);
        progressing.residual_norm().unwrap()
    };
    for _ in 0..60 {
        progressing.tick().unwrap();
    }
    let after = progressing.residual_norm().unwrap();
    assert!(after < before * 1e-2, "{before} -> {after}");

    let solution = progressing.solution().unwrap();
    assert!(solution.iter().all(|c| c.w == 0.0));
}

#[test]
fn test_multigrid_beats_sor_per_tick() {
    let size = 64;
    let samples: Vec<Sample> = {
        let mut samples = Vec::new();
        let s = (size - 1) as f32;
        for y in 0..size {
            for x in 0..size {
                if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                    let v = (std::f32::consts::PI * x as f32 / s).sin() * 0.5
                        + 0.5 * y as f32 / s;
                    let (px, py) = centre(size, x, y);
                    samples.push(Sample::new(px, py, spread(v)));
                }
            }
        }
        samples
    };

    let mut mg_config = SolverConfig::new(size, Method::Multigrid);
    mg_config.multigrid = MultigridParams {
        n_smooth: 2,
        omega: 1.0,
        ..MultigridParams::default()
    };
    let mut multigrid = reconstruction(mg_config);
    let mut sor = reconstruction(SolverConfig::new(size, Method::Sor));
    multigrid.queue_samples(samples.clone());
    sor.queue_samples(samples);

    for _ in 0..10 {
        multigrid.tick().unwrap();
        sor.tick().unwrap();
    }
    let mg_norm = multigrid.residual_norm().unwrap();
    let sor_norm = sor.residual_norm().unwrap();
    assert!(
        mg_norm * 100.0 < sor_norm,
        "multigrid {mg_norm} vs sor {sor_norm}"
    );
}

#[test]
fn test_single_level_multigrid_matches_sor_sweeps() {
    let size = 8;
    let mut config = SolverConfig::new(size, Method::Multigrid);
    config.multigrid = MultigridParams {
        n_solve: 3,
        min_size: size,
        omega: 1.5,
        ..MultigridParams::default()
    };
    let mut sor_config = SolverConfig::new(size, Method::Sor);
    sor_config.sor.omega = 1.5;

    let mut multigrid = reconstruction(config);
    let mut sor = reconstruction(sor_config);
    multigrid.queue_samples(ring_samples(size));
    sor.queue_samples(ring_samples(size));

    multigrid.tick().unwrap();
    for _ in 0..3 {
        sor.tick().unwrap();
    }

    let a = multigrid.solution().unwrap();
    let b = sor.solution().unwrap();
    for (a, b) in a.iter().zip(b.iter()) {
        for c in 0..4 {
            assert_abs_diff_eq!(a[c], b[c], epsilon = 1e-6);
        }
    }
}
