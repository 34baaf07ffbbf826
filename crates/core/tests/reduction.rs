//! Pyramid reduction against direct summation

use approx::assert_relative_eq;
use laplace_fill_core::backend::pyramid_dot;
use laplace_fill_core::{Channels, CpuBackend, FieldBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn naive_dot(a: &[Channels], b: &[Channels]) -> Channels {
    // f64 accumulation as the reference
    let mut sum = [0.0_f64; 4];
    for (a, b) in a.iter().zip(b) {
        for c in 0..4 {
            sum[c] += f64::from(a[c]) * f64::from(b[c]);
        }
    }
    Channels::new(sum[0] as f32, sum[1] as f32, sum[2] as f32, sum[3] as f32)
}

fn random_field(rng: &mut StdRng, size: usize) -> Vec<Channels> {
    (0..size * size)
        .map(|_| {
            Channels::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(-10.0..10.0),
            )
        })
        .collect()
}

fn structured_field(size: usize) -> Vec<Channels> {
    (0..size * size)
        .map(|i| {
            let (x, y) = ((i % size) as f32, (i / size) as f32);
            Channels::new(1.0, x, y, (x - y) * 0.5)
        })
        .collect()
}

fn assert_channels_close(actual: Channels, expected: Channels) {
    for c in 0..4 {
        assert_relative_eq!(
            actual[c],
            expected[c],
            epsilon = 1e-3,
            max_relative = 1e-4
        );
    }
}

#[test]
fn test_pyramid_matches_naive_on_random_fields() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for size in [1, 2, 4, 8, 16, 32, 64, 128] {
        let a = random_field(&mut rng, size);
        let b = random_field(&mut rng, size);
        let pyramid = pyramid_dot(&a, &b, size).unwrap();
        assert_channels_close(pyramid, naive_dot(&a, &b));
    }
}

#[test]
fn test_pyramid_matches_naive_on_structured_fields() {
    for size in [2, 8, 32, 256] {
        let a = structured_field(size);
        let b = structured_field(size);
        let pyramid = pyramid_dot(&a, &b, size).unwrap();
        assert_channels_close(pyramid, naive_dot(&a, &b));
    }
}

#[test]
fn test_constant_field_sums_to_cell_count() {
    let size = 64;
    let ones = vec![Channels::repeat(1.0); size * size];
    let dot = pyramid_dot(&ones, &ones, size).unwrap();
    assert_eq!(dot, Channels::repeat((size * size) as f32));
}

#[test]
fn test_backend_dot_matches_naive() {
    let mut rng = StdRng::seed_from_u64(42);
    let size = 32;
    let a_values = random_field(&mut rng, size);
    let b_values = random_field(&mut rng, size);

    let mut backend = CpuBackend::new();
    let a = backend.allocate(size).unwrap();
    let b = backend.allocate(size).unwrap();
    let cells = |values: &[Channels]| -> Vec<(usize, Channels)> {
        values.iter().copied().enumerate().collect()
    };
    backend.write_cells(a, &cells(&a_values)).unwrap();
    backend.write_cells(b, &cells(&b_values)).unwrap();

    assert_channels_close(backend.dot(a, b).unwrap(), naive_dot(&a_values, &b_values));
    assert_channels_close(
        backend.dot(a, a).unwrap(),
        naive_dot(&a_values, &a_values),
    );
}

#[test]
fn test_non_power_of_two_rejected() {
    let field = vec![Channels::zeros(); 36];
    assert!(pyramid_dot(&field, &field, 6).is_err());
}
