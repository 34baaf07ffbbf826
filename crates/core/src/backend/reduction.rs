//! Pyramid reduction for dot products
//!
//! The element-wise product is averaged 2×2 at a time until a single cell is
//! left, then scaled back up by the cell count. The GPU backend runs the same
//! passes on the device, so both backends see the same summation order.

use crate::error::SolverError;
use crate::field::Channels;
use rayon::prelude::*;

/// One halving pass: `out[i] = mean of the 2×2 block` on a grid of side `size / 2`
pub(crate) fn average_pass(input: &[Channels], size: usize) -> Vec<Channels> {
    let half = size / 2;
    let mut out = vec![Channels::zeros(); half * half];
    out.par_chunks_mut(half).enumerate().for_each(|(cy, row)| {
        for (cx, cell) in row.iter_mut().enumerate() {
            let i00 = (2 * cy) * size + 2 * cx;
            let i10 = i00 + size;
            *cell = (input[i00] + input[i00 + 1] + input[i10] + input[i10 + 1]) * 0.25;
        }
    });
    out
}

/// Per-channel `Σ a·b` over two fields of side `size`
///
/// # Errors
///
/// Returns [`SolverError::SizeMismatch`] if the slices do not both hold
/// `size²` cells, or if `size` is not a power of two.
pub fn pyramid_dot(a: &[Channels], b: &[Channels], size: usize) -> Result<Channels, SolverError> {
    let cells = size * size;
    if a.len() != cells || b.len() != cells {
        return Err(SolverError::SizeMismatch {
            expected: cells,
            actual: a.len().min(b.len()),
        });
    }
    if !size.is_power_of_two() {
        return Err(SolverError::SizeMismatch {
            expected: size.next_power_of_two(),
            actual: size,
        });
    }

    let mut level: Vec<Channels> = a
        .par_iter()
        .zip(b.par_iter())
        .map(|(a, b)| a.component_mul(b))
        .collect();
    let mut side = size;
    while side > 1 {
        level = average_pass(&level, side);
        side /= 2;
    }

    Ok(level[0] * cells as f32)
}
