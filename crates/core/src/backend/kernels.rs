//! CPU stencil kernels
//!
//! Each kernel fills an output slice row by row in parallel. Inputs are never
//! written. Grids are square and stored row-major (`y * size + x`).
//!
//! Boundary handling is edge-clamped: a cell on the edge only sees its
//! in-grid neighbours, so its discrete Laplacian is `Σneighbours - n·centre`
//! with `n` in {2, 3, 4}.

use crate::backend::Parity;
use crate::field::Channels;
use rayon::prelude::*;

/// Whether a mask cell marks a pinned cell
#[inline(always)]
pub(crate) fn is_pinned(mask: &Channels) -> bool {
    mask.x > 0.5
}

/// Sum of the in-grid neighbours of `(x, y)` and how many there are
#[inline(always)]
fn neighbour_sum(field: &[Channels], size: usize, x: usize, y: usize) -> (Channels, f32) {
    let idx = y * size + x;
    let mut sum = Channels::zeros();
    let mut count = 0.0;
    if x > 0 {
        sum += field[idx - 1];
        count += 1.0;
    }
    if x + 1 < size {
        sum += field[idx + 1];
        count += 1.0;
    }
    if y > 0 {
        sum += field[idx - size];
        count += 1.0;
    }
    if y + 1 < size {
        sum += field[idx + size];
        count += 1.0;
    }
    (sum, count)
}

/// Damped Jacobi sweep
pub fn jacobi(
    solution: &[Channels],
    mask: &[Channels],
    forcing: &[Channels],
    out: &mut [Channels],
    size: usize,
    weight: f32,
) {
    out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let idx = y * size + x;
            let old = solution[idx];
            if is_pinned(&mask[idx]) {
                *cell = old;
                continue;
            }
            let (sum, count) = neighbour_sum(solution, size, x, y);
            if count == 0.0 {
                *cell = old;
                continue;
            }
            let average = (sum - forcing[idx]) / count;
            *cell = old * (1.0 - weight) + average * weight;
        }
    });
}

/// Over-relaxed update of the cells of one colour
///
/// Cells of the other colour, and pinned cells, are copied unchanged. Because
/// same-coloured cells never neighbour each other the update reads only
/// values that are final for this half-pass.
pub fn red_black(
    solution: &[Channels],
    mask: &[Channels],
    forcing: &[Channels],
    out: &mut [Channels],
    size: usize,
    omega: f32,
    parity: Parity,
) {
    out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let idx = y * size + x;
            let old = solution[idx];
            if !parity.matches(x, y) || is_pinned(&mask[idx]) {
                *cell = old;
                continue;
            }
            let (sum, count) = neighbour_sum(solution, size, x, y);
            if count == 0.0 {
                *cell = old;
                continue;
            }
            let gauss_seidel = (sum - forcing[idx]) / count;
            *cell = old + (gauss_seidel - old) * omega;
        }
    });
}

/// Discrete Laplacian on free cells, pass-through on pinned cells
pub fn laplacian(source: &[Channels], mask: &[Channels], out: &mut [Channels], size: usize) {
    out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let idx = y * size + x;
            if is_pinned(&mask[idx]) {
                *cell = source[idx];
                continue;
            }
            let (sum, count) = neighbour_sum(source, size, x, y);
            *cell = sum - source[idx] * count;
        }
    });
}

/// `f - Δu` on free cells, zero on pinned cells
pub fn residual(
    solution: &[Channels],
    mask: &[Channels],
    forcing: &[Channels],
    out: &mut [Channels],
    size: usize,
) {
    out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let idx = y * size + x;
            if is_pinned(&mask[idx]) {
                *cell = Channels::zeros();
                continue;
            }
            let (sum, count) = neighbour_sum(solution, size, x, y);
            *cell = forcing[idx] - (sum - solution[idx] * count);
        }
    });
}

/// `a + coeff ⊙ b`
pub fn linear_combine(a: &[Channels], b: &[Channels], out: &mut [Channels], coeff: Channels) {
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(cell, (a, b))| *cell = a + coeff.component_mul(b));
}

/// 2×2 block average times `scale`
///
/// `out` has side `coarse_size`; `fine` has side `2 * coarse_size`.
pub fn restrict(fine: &[Channels], out: &mut [Channels], coarse_size: usize, scale: f32) {
    let fine_size = coarse_size * 2;
    out.par_chunks_mut(coarse_size)
        .enumerate()
        .for_each(|(cy, row)| {
            for (cx, cell) in row.iter_mut().enumerate() {
                let i00 = (2 * cy) * fine_size + 2 * cx;
                let i10 = i00 + fine_size;
                let block = fine[i00] + fine[i00 + 1] + fine[i10] + fine[i10 + 1];
                *cell = block * (0.25 * scale);
            }
        });
}

/// Coarse mask: pinned when any of the four fine cells is pinned
pub fn restrict_mask(fine_mask: &[Channels], out: &mut [Channels], coarse_size: usize) {
    let fine_size = coarse_size * 2;
    out.par_chunks_mut(coarse_size)
        .enumerate()
        .for_each(|(cy, row)| {
            for (cx, cell) in row.iter_mut().enumerate() {
                let i00 = (2 * cy) * fine_size + 2 * cx;
                let i10 = i00 + fine_size;
                let any = [i00, i00 + 1, i10, i10 + 1]
                    .iter()
                    .any(|&i| is_pinned(&fine_mask[i]));
                *cell = if any {
                    Channels::repeat(1.0)
                } else {
                    Channels::zeros()
                };
            }
        });
}

/// Coarse pinned value: average of the pinned fine values in the block
pub fn restrict_pinned(
    fine_values: &[Channels],
    fine_mask: &[Channels],
    out: &mut [Channels],
    coarse_size: usize,
) {
    let fine_size = coarse_size * 2;
    out.par_chunks_mut(coarse_size)
        .enumerate()
        .for_each(|(cy, row)| {
            for (cx, cell) in row.iter_mut().enumerate() {
                let i00 = (2 * cy) * fine_size + 2 * cx;
                let i10 = i00 + fine_size;
                let mut total = Channels::zeros();
                let mut weight = 0.0;
                for i in [i00, i00 + 1, i10, i10 + 1] {
                    if is_pinned(&fine_mask[i]) {
                        total += fine_values[i];
                        weight += 1.0;
                    }
                }
                *cell = if weight > 0.0 {
                    total / weight
                } else {
                    Channels::zeros()
                };
            }
        });
}

/// Bilinear sample of a coarse field at the centre of fine cell `(x, y)`
///
/// Coarse cell `i` is centred at fine coordinate `2i + 0.5`; positions
/// outside the outermost coarse centres clamp to the edge.
#[inline(always)]
fn sample_bilinear(coarse: &[Channels], coarse_size: usize, x: usize, y: usize) -> Channels {
    let last = (coarse_size - 1) as f32;
    let u = ((x as f32 + 0.5) * 0.5 - 0.5).clamp(0.0, last);
    let v = ((y as f32 + 0.5) * 0.5 - 0.5).clamp(0.0, last);
    let x0 = u.floor() as usize;
    let y0 = v.floor() as usize;
    let x1 = (x0 + 1).min(coarse_size - 1);
    let y1 = (y0 + 1).min(coarse_size - 1);
    let tx = u - x0 as f32;
    let ty = v - y0 as f32;

    let top = coarse[y0 * coarse_size + x0] * (1.0 - tx) + coarse[y0 * coarse_size + x1] * tx;
    let bottom = coarse[y1 * coarse_size + x0] * (1.0 - tx) + coarse[y1 * coarse_size + x1] * tx;
    top * (1.0 - ty) + bottom * ty
}

/// Add the interpolated coarse correction to the free cells
pub fn prolong_add(
    solution: &[Channels],
    correction: &[Channels],
    mask: &[Channels],
    out: &mut [Channels],
    size: usize,
    coarse_size: usize,
) {
    out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let idx = y * size + x;
            if is_pinned(&mask[idx]) {
                *cell = solution[idx];
                continue;
            }
            *cell = solution[idx] + sample_bilinear(correction, coarse_size, x, y);
        }
    });
}
