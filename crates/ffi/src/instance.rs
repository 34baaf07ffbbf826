use laplace_fill_core::{
    CgGuard, ConjugateGradientParams, JacobiParams, Method, MultigridParams, Reconstruction,
    SolverConfig, SorParams,
};
use std::ptr;
use std::sync::Mutex;

use crate::error::{FfiError, LaplaceFillErrorCode};
use crate::helpers::{
    handle_ffi_result_error, instance_from_ptr, track_error, track_result, with_reconstruction,
};

/// Iterative method selector.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaplaceFillMethod {
    /// Damped Jacobi.
    Jacobi = 0,
    /// Red-black successive over-relaxation.
    Sor = 1,
    /// Conjugate gradient.
    ConjugateGradient = 2,
    /// Geometric multigrid V-cycle.
    Multigrid = 3,
}

impl From<LaplaceFillMethod> for Method {
    fn from(method: LaplaceFillMethod) -> Self {
        match method {
            LaplaceFillMethod::Jacobi => Method::Jacobi,
            LaplaceFillMethod::Sor => Method::Sor,
            LaplaceFillMethod::ConjugateGradient => Method::ConjugateGradient,
            LaplaceFillMethod::Multigrid => Method::Multigrid,
        }
    }
}

/// C-compatible reconstruction configuration.
///
/// Call `laplace_fill_default_config` to get the library defaults, then
/// override individual fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceFillConfig {
    /// Grid side length; must be a power of two.
    pub size: usize,
    /// Active method.
    pub method: LaplaceFillMethod,
    /// Jacobi damping weight in (0, 1].
    pub jacobi_weight: f32,
    /// SOR relaxation factor in (0, 2).
    pub sor_omega: f32,
    /// Conjugate gradient: freeze channels individually instead of skipping
    /// the whole step when a curvature is zero.
    pub cg_per_channel_guard: bool,
    /// Multigrid sweeps before and after each coarse correction.
    pub multigrid_n_smooth: usize,
    /// Multigrid sweeps on the coarsest level.
    pub multigrid_n_solve: usize,
    /// Smallest multigrid level side.
    pub multigrid_min_size: usize,
    /// Multigrid smoother relaxation factor in (0, 2).
    pub multigrid_omega: f32,
    /// Try the GPU backend first when the library was built with it.
    pub prefer_gpu: bool,
}

impl From<LaplaceFillConfig> for SolverConfig {
    fn from(config: LaplaceFillConfig) -> Self {
        SolverConfig {
            size: config.size,
            method: config.method.into(),
            jacobi: JacobiParams {
                weight: config.jacobi_weight,
            },
            sor: SorParams {
                omega: config.sor_omega,
            },
            conjugate_gradient: ConjugateGradientParams {
                guard: if config.cg_per_channel_guard {
                    CgGuard::PerChannel
                } else {
                    CgGuard::AllChannels
                },
            },
            multigrid: MultigridParams {
                n_smooth: config.multigrid_n_smooth,
                n_solve: config.multigrid_n_solve,
                min_size: config.multigrid_min_size,
                omega: config.multigrid_omega,
            },
            prefer_gpu: config.prefer_gpu,
        }
    }
}

impl Default for LaplaceFillConfig {
    fn default() -> Self {
        let defaults = SolverConfig::default();
        Self {
            size: defaults.size,
            method: LaplaceFillMethod::Sor,
            jacobi_weight: defaults.jacobi.weight,
            sor_omega: defaults.sor.omega,
            cg_per_channel_guard: defaults.conjugate_gradient.guard == CgGuard::PerChannel,
            multigrid_n_smooth: defaults.multigrid.n_smooth,
            multigrid_n_solve: defaults.multigrid.n_solve,
            multigrid_min_size: defaults.multigrid.min_size,
            multigrid_omega: defaults.multigrid.omega,
            prefer_gpu: defaults.prefer_gpu,
        }
    }
}

/// An interactive reconstruction.
///
/// # Thread Safety
/// The reconstruction sits behind a `Mutex`: every call locks it for its
/// whole duration, so the instance may be used from any thread, but calls are
/// serialized. Sample insertion therefore never overlaps a solver step.
pub struct LaplaceFillInstance {
    pub(crate) recon: Mutex<Reconstruction>,
}

impl LaplaceFillInstance {
    /// Validate `config` and build the reconstruction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a rejected configuration and
    /// `AllocationFailed` when field storage cannot be created.
    pub(crate) fn new(config: &LaplaceFillConfig) -> Result<Box<Self>, FfiError> {
        let recon = Reconstruction::new(SolverConfig::from(*config))?;
        Ok(Box::new(Self {
            recon: Mutex::new(recon),
        }))
    }
}

/// Library default configuration (512×512 grid, SOR).
#[no_mangle]
pub extern "C" fn laplace_fill_default_config() -> LaplaceFillConfig {
    LaplaceFillConfig::default()
}

/// Create a new reconstruction and return it via out-parameter.
///
/// Returns
/// - `LaplaceFillErrorCode::Ok` (0): success, `out_instance` holds a valid pointer
/// - `LaplaceFillErrorCode::NullPointer`: `config` or `out_instance` is null
/// - `LaplaceFillErrorCode::InvalidConfig`: the configuration was rejected
/// - `LaplaceFillErrorCode::AllocationFailed`: field storage could not be created
///
/// On failure `out_instance` is set to null; call `laplace_fill_get_last_error()`
/// for a description.
///
/// # Safety
///
/// - `config` must point to a valid `LaplaceFillConfig`.
/// - `out_instance` must be a valid, non-null pointer to writable memory.
/// - The caller owns the returned instance and MUST call `laplace_fill_destroy`
///   exactly once.
///
/// Example (C++)
/// ```cpp
/// LaplaceFillConfig config = laplace_fill_default_config();
/// config.size = 256;
/// config.method = LaplaceFillMethod::Multigrid;
/// LaplaceFillInstance* fill = nullptr;
/// if (laplace_fill_new(&config, &fill) != LaplaceFillErrorCode::Ok) {
///     fprintf(stderr, "%s\n", laplace_fill_get_last_error());
///     return;
/// }
/// // ... use fill ...
/// laplace_fill_destroy(fill);
/// ```
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_new(
    config: *const LaplaceFillConfig,
    out_instance: *mut *mut LaplaceFillInstance,
) -> LaplaceFillErrorCode {
    if out_instance.is_null() {
        return track_error(&FfiError::null_pointer("out_instance"));
    }
    if config.is_null() {
        unsafe {
            *out_instance = ptr::null_mut();
        }
        return track_error(&FfiError::null_pointer("config"));
    }

    let config = unsafe { &*config };
    match track_result(LaplaceFillInstance::new(config)) {
        Ok(instance) => {
            unsafe {
                *out_instance = Box::into_raw(instance);
            }
            LaplaceFillErrorCode::Ok
        }
        Err(code) => {
            unsafe {
                *out_instance = ptr::null_mut();
            }
            code
        }
    }
}

/// Replace the configuration of an existing instance.
///
/// Every pin and the current solution are discarded. On `InvalidConfig` the
/// instance keeps its previous configuration.
///
/// # Safety
///
/// - `ptr` must be a live pointer returned by `laplace_fill_new`.
/// - `config` must point to a valid `LaplaceFillConfig`.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_reconfigure(
    ptr: *const LaplaceFillInstance,
    config: *const LaplaceFillConfig,
) -> LaplaceFillErrorCode {
    handle_ffi_result_error(|| {
        let instance = instance_from_ptr(ptr)?;
        if config.is_null() {
            return Err(FfiError::null_pointer("config"));
        }
        let config = SolverConfig::from(unsafe { *config });
        with_reconstruction(instance, |recon| recon.reconfigure(config))??;
        Ok(())
    })
}

/// Destroy an instance previously created by `laplace_fill_new`.
///
/// Null pointers are ignored.
///
/// # Safety
/// - The pointer MUST have been created by `laplace_fill_new`.
/// - The pointer MUST NOT be used again after this call.
#[no_mangle]
pub unsafe extern "C" fn laplace_fill_destroy(ptr: *mut LaplaceFillInstance) {
    if ptr.is_null() {
        return;
    }

    // SAFETY: the pointer was produced by `Box::into_raw` in `laplace_fill_new`
    // and has not been freed, per the contract above.
    unsafe {
        drop(Box::from_raw(ptr));
    }
}
