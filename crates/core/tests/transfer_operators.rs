//! Multigrid transfer operators, run through the CPU backend
//!
//! Restricting a smooth field and interpolating it back must reproduce it
//! closely; the V-cycle relies on this for its coarse correction.

use laplace_fill_core::{Channels, CpuBackend, FieldBackend, FieldHandle, Kernel};
use std::f32::consts::TAU;

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn smooth_field(size: usize) -> Vec<(usize, Channels)> {
    let n = size as f32;
    (0..size * size)
        .map(|i| {
            let x = ((i % size) as f32 + 0.5) / n;
            let y = ((i / size) as f32 + 0.5) / n;
            let wave = (TAU * x).sin() * (TAU * y).cos();
            (i, Channels::new(wave, 0.5 * wave, 1.0 + wave, x + y))
        })
        .collect()
}

fn load(backend: &mut CpuBackend, size: usize, cells: &[(usize, Channels)]) -> FieldHandle {
    let handle = backend.allocate(size).unwrap();
    backend.write_cells(handle, cells).unwrap();
    handle
}

/// Restrict `fine` by 2×2 averaging, then prolong onto a zero field
fn round_trip(backend: &mut CpuBackend, fine: FieldHandle, size: usize) -> Vec<Channels> {
    let coarse = backend.allocate(size / 2).unwrap();
    let zero = backend.allocate(size).unwrap();
    let mask = backend.allocate(size).unwrap();
    let out = backend.allocate(size).unwrap();

    backend
        .run(Kernel::Restrict { fine, scale: 1.0 }, coarse)
        .unwrap();
    backend
        .run(
            Kernel::ProlongAdd {
                solution: zero,
                correction: coarse,
                mask,
            },
            out,
        )
        .unwrap();
    backend.read(out).unwrap().into_owned()
}

#[test]
fn test_restrict_then_prolong_reproduces_smooth_field() {
    let size = 64;
    let mut backend = CpuBackend::new();
    let cells = smooth_field(size);
    let fine = load(&mut backend, size, &cells);
    let result = round_trip(&mut backend, fine, size);

    let mut interior = 0.0_f32;
    let mut everywhere = 0.0_f32;
    for (i, original) in &cells {
        let error = (result[*i] - original).amax();
        everywhere = everywhere.max(error);
        let (x, y) = (i % size, i / size);
        if x > 0 && y > 0 && x < size - 1 && y < size - 1 {
            interior = interior.max(error);
        }
    }
    // The outermost ring is extrapolated by edge clamping
    assert!(interior < 0.02, "interior error {interior}");
    assert!(everywhere < 0.06, "edge error {everywhere}");
}

#[test]
fn test_round_trip_is_exact_for_constants() {
    let size = 16;
    let mut backend = CpuBackend::new();
    let value = Channels::new(0.3, -1.0, 2.5, 0.0);
    let cells: Vec<(usize, Channels)> = (0..size * size).map(|i| (i, value)).collect();
    let fine = load(&mut backend, size, &cells);

    let result = round_trip(&mut backend, fine, size);
    assert!(result.iter().all(|c| (c - value).amax() < 1e-6));
}

#[test]
fn test_restriction_scale_multiplies_average() {
    let size = 4;
    let mut backend = CpuBackend::new();
    let cells: Vec<(usize, Channels)> = (0..size * size)
        .map(|i| (i, Channels::repeat(i as f32)))
        .collect();
    let fine = load(&mut backend, size, &cells);
    let coarse = backend.allocate(size / 2).unwrap();

    backend
        .run(Kernel::Restrict { fine, scale: 4.0 }, coarse)
        .unwrap();
    let coarse = backend.read(coarse).unwrap();
    // Top-left block holds 0, 1, 4, 5
    assert_eq!(coarse[0], Channels::repeat(10.0));
    // Bottom-right block holds 10, 11, 14, 15
    assert_eq!(coarse[3], Channels::repeat(50.0));
}

#[test]
fn test_pinned_fine_cells_ignore_correction() {
    let size = 8;
    let mut backend = CpuBackend::new();
    let solution = load(&mut backend, size, &[(9, Channels::repeat(0.7))]);
    let mask = load(&mut backend, size, &[(9, Channels::repeat(1.0))]);
    let correction = backend.allocate(size / 2).unwrap();
    backend.fill(correction, Channels::repeat(1.0)).unwrap();
    let out = backend.allocate(size).unwrap();

    backend
        .run(
            Kernel::ProlongAdd {
                solution,
                correction,
                mask,
            },
            out,
        )
        .unwrap();
    let out = backend.read(out).unwrap();
    assert_eq!(out[9], Channels::repeat(0.7));
    assert_eq!(out[0], Channels::repeat(1.0));
}
