//! Mapping samples onto grid cells and pinning them
//!
//! A sample at normalized position `(x, y)` lands in cell
//! `(floor(x·N), floor(y·N))`. Samples outside `[0, 1)²` are dropped.

use crate::backend::FieldBackend;
use crate::error::SolverError;
use crate::field::{cell_offset, Channels, Level};
use nalgebra::Vector2;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// A known value at a normalized position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in `[0, 1)²`, `y` growing downwards
    pub position: Vector2<f32>,
    /// Value to pin
    pub value: Channels,
}

impl Sample {
    /// Create a sample
    pub fn new(x: f32, y: f32, value: Channels) -> Self {
        Self {
            position: Vector2::new(x, y),
            value,
        }
    }
}

/// Row-major index of the cell containing `position`, if it is on the grid
pub fn cell_index(position: &Vector2<f32>, size: usize) -> Option<usize> {
    let scale = size as f32;
    let x = (position.x * scale).floor();
    let y = (position.y * scale).floor();
    if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 || x >= scale || y >= scale {
        return None;
    }
    Some(cell_offset(x as usize, y as usize, size))
}

/// Pin a batch of samples on `grid`
///
/// For each distinct cell the constraint mask is set, the pinned value is
/// recorded and the same value is stamped into the current solution. When a
/// batch hits one cell more than once the last sample wins. Cells already
/// pinned are re-pinned with the new value. Indices of newly pinned cells are
/// added to `pinned`.
///
/// Returns the number of distinct cells written.
///
/// # Errors
///
/// Propagates backend write failures.
pub fn insert_samples(
    backend: &mut dyn FieldBackend,
    grid: &Level,
    samples: &[Sample],
    pinned: &mut FxHashSet<usize>,
) -> Result<usize, SolverError> {
    let size = grid.size();
    let mut cells: FxHashMap<usize, Channels> = FxHashMap::default();
    let mut discarded = 0usize;
    for sample in samples {
        match cell_index(&sample.position, size) {
            Some(index) => {
                cells.insert(index, sample.value);
            }
            None => discarded += 1,
        }
    }
    if discarded > 0 {
        debug!("Discarded {} samples outside the grid", discarded);
    }
    if cells.is_empty() {
        return Ok(0);
    }

    let mut values: Vec<(usize, Channels)> = cells.into_iter().collect();
    values.sort_unstable_by_key(|&(index, _)| index);
    let ones: Vec<(usize, Channels)> = values
        .iter()
        .map(|&(index, _)| (index, Channels::repeat(1.0)))
        .collect();

    backend.write_cells(grid.constraints.mask, &ones)?;
    backend.write_cells(grid.constraints.values, &values)?;
    backend.write_cells(grid.solution.read(), &values)?;

    let before = pinned.len();
    pinned.extend(values.iter().map(|&(index, _)| index));
    trace!(
        "Pinned {} cells ({} new)",
        values.len(),
        pinned.len() - before
    );
    Ok(values.len())
}
