use laplace_fill_core::{Channels, Reconstruction};
use std::slice;

use crate::error::{FfiError, LaplaceFillErrorCode};
use crate::helpers::{handle_ffi_result_error, instance_from_ptr, with_reconstruction};
use crate::instance::LaplaceFillInstance;

/// Which field to copy out for presentation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaplaceFillView {
    /// Current solution.
    Solution = 0,
    /// Pinned values, zero where nothing is pinned.
    Constraints = 1,
    /// 1.0 in every channel where a cell is pinned.
    ConstraintMask = 2,
    /// Residual `f - Δu` as of the last tick.
    Residual = 3,
}

/// Copy one field into a caller buffer as interleaved RGBA floats.
///
/// The buffer must hold at least `size * size * 4` floats (see
/// `laplace_fill_grid_size`). Cells are row-major, top row first.
///
/// # Safety
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - `out_buffer` must point to `buffer_len` writable floats.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_read_field(
    ptr: *const LaplaceFillInstance,
    view: LaplaceFillView,
    out_buffer: *mut f32,
    buffer_len: usize,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out_buffer.is_null() {
            return Err(FfiError::null_pointer("out_buffer"));
        }
        let out = unsafe { slice::from_raw_parts_mut(out_buffer, buffer_len) };

        with_reconstruction(instance, |recon| {
            let field = match view {
                LaplaceFillView::Solution => recon.solution(),
                LaplaceFillView::Constraints => recon.constraints(),
                LaplaceFillView::ConstraintMask => recon.constraint_mask(),
                LaplaceFillView::Residual => recon.residual(),
            }?;
            copy_interleaved(&field, out)
        })?
    })
}

fn copy_interleaved(field: &[Channels], out: &mut [f32]) -> Result<(), FfiError> {
    let required = field.len() * 4;
    if out.len() < required {
        return Err(FfiError::buffer_too_small(required, out.len()));
    }
    for (cell, rgba) in field.iter().zip(out.chunks_exact_mut(4)) {
        rgba.copy_from_slice(cell.as_slice());
    }
    Ok(())
}

/// Grid side length, or 0 if `ptr` is null.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by `laplace_fill_new`.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_grid_size(ptr: *const LaplaceFillInstance) -> usize {
    instance_from_ptr(ptr)
        .and_then(|instance| with_reconstruction(instance, |recon| recon.size()))
        .unwrap_or(0)
}

/// Number of distinct pinned cells, or 0 if `ptr` is null.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by `laplace_fill_new`.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_pinned_count(ptr: *const LaplaceFillInstance) -> usize {
    instance_from_ptr(ptr)
        .and_then(|instance| with_reconstruction(instance, |recon| recon.pinned_count()))
        .unwrap_or(0)
}

/// Whether the instance runs its kernels on a GPU.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by `laplace_fill_new`.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_is_gpu_accelerated(ptr: *const LaplaceFillInstance) -> bool {
    instance_from_ptr(ptr)
        .and_then(|instance| with_reconstruction(instance, |recon| recon.is_gpu_accelerated()))
        .unwrap_or(false)
}

/// Residual norm `sqrt(Σ r²)` over all cells and channels.
///
/// # Safety
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - `out_norm` must point to a writable float.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_residual_norm(
    ptr: *const LaplaceFillInstance,
    out_norm: *mut f32,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if out_norm.is_null() {
            return Err(FfiError::null_pointer("out_norm"));
        }
        let norm = with_reconstruction(instance, Reconstruction::residual_norm)??;
        unsafe {
            *out_norm = norm;
        }
        Ok(())
    })
}

/// Mean frame time of the ticks so far in milliseconds, or 0.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by `laplace_fill_new`.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_mean_tick_ms(ptr: *const LaplaceFillInstance) -> f64 {
    instance_from_ptr(ptr)
        .and_then(|instance| {
            with_reconstruction(instance, |recon| recon.timer().mean_frame_time_ms())
        })
        .unwrap_or(0.0)
}
