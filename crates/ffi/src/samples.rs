use laplace_fill_core::{Channels, Reconstruction, Sample, StepOutcome, TickReport};
use std::slice;

use crate::error::{FfiError, LaplaceFillErrorCode};
use crate::helpers::{handle_ffi_result_error, instance_from_ptr, with_reconstruction};
use crate::instance::LaplaceFillInstance;

/// A known RGBA value at a normalized position.
///
/// `x` and `y` are in `[0, 1)`, `y` growing downwards. Samples outside that
/// range are silently dropped at the next tick.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceFillSample {
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl From<&LaplaceFillSample> for Sample {
    fn from(sample: &LaplaceFillSample) -> Self {
        Sample::new(
            sample.x,
            sample.y,
            Channels::new(sample.r, sample.g, sample.b, sample.a),
        )
    }
}

/// FFI-friendly summary of one tick. Keep this layout stable.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LaplaceFillTickReport {
    /// Tick index, starting at 0 after creation or reconfigure.
    pub tick: u64,
    /// False when the conjugate gradient guard skipped the update.
    pub updated: bool,
    /// Distinct cells pinned at the start of this tick.
    pub inserted: usize,
    /// Wall time of the tick in milliseconds.
    pub elapsed_ms: f64,
}

impl From<TickReport> for LaplaceFillTickReport {
    fn from(report: TickReport) -> Self {
        Self {
            tick: report.tick,
            updated: report.outcome == StepOutcome::Updated,
            inserted: report.inserted,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

/// Queue samples for insertion at the start of the next tick.
///
/// The samples are copied; the caller may free `samples` afterwards.
///
/// # Safety
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - `samples` must point to `count` readable `LaplaceFillSample`s. It may be
///   null only when `count` is 0.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_add_samples(
    ptr: *const LaplaceFillInstance,
    samples: *const LaplaceFillSample,
    count: usize,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if count == 0 {
            return Ok(());
        }
        if samples.is_null() {
            return Err(FfiError::null_pointer("samples"));
        }
        let samples = unsafe { slice::from_raw_parts(samples, count) };
        with_reconstruction(instance, |recon| {
            recon.queue_samples(samples.iter().map(Sample::from));
        })
    })
}

/// Insert queued samples and advance the solver by one step.
///
/// `out_report` may be null if the caller does not need the summary.
///
/// # Safety
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - `out_report`, when non-null, must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_tick(
    ptr: *const LaplaceFillInstance,
    out_report: *mut LaplaceFillTickReport,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        let report = with_reconstruction(instance, Reconstruction::tick)??;
        if !out_report.is_null() {
            unsafe {
                *out_report = report.into();
            }
        }
        Ok(())
    })
}

/// Tick until the residual norm reaches `tolerance` or `max_ticks` pass.
///
/// Writes the number of ticks performed to `out_ticks` and the final
/// residual norm to `out_residual_norm` when those pointers are non-null.
///
/// # Safety
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - Non-null out-pointers must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_run_until(
    ptr: *const LaplaceFillInstance,
    tolerance: f32,
    max_ticks: u64,
    out_ticks: *mut u64,
    out_residual_norm: *mut f32,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(FfiError::invalid_parameter(format!(
                "tolerance must be finite and non-negative, got {tolerance}"
            )));
        }
        let summary =
            with_reconstruction(instance, |recon| recon.run_until(tolerance, max_ticks))??;
        unsafe {
            if !out_ticks.is_null() {
                *out_ticks = summary.ticks;
            }
            if !out_residual_norm.is_null() {
                *out_residual_norm = summary.residual_norm;
            }
        }
        Ok(())
    })
}
