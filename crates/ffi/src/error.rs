use laplace_fill_core::SolverError;
use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

/// Status returned by every fallible `laplace_fill_*` call; 0 is success.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaplaceFillErrorCode {
    /// Success.
    Ok = 0,
    /// A required pointer argument was null.
    NullPointer = 1,
    /// A previous call panicked while holding the instance lock.
    LockPoisoned = 2,
    /// The configuration was rejected (grid size or a method parameter).
    InvalidConfig = 3,
    /// An argument other than the configuration was out of range.
    InvalidParameter = 4,
    /// Field storage could not be allocated.
    AllocationFailed = 5,
    /// A kernel, copy or readback failed inside the compute backend.
    BackendFailure = 6,
}

/// A failed call: the code handed to C plus a message for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FfiError {
    pub(crate) code: LaplaceFillErrorCode,
    pub(crate) message: String,
}

impl FfiError {
    fn new(code: LaplaceFillErrorCode, message: String) -> Self {
        Self { code, message }
    }

    pub(crate) fn null_pointer(param: &str) -> Self {
        Self::new(
            LaplaceFillErrorCode::NullPointer,
            format!("Parameter '{param}' cannot be null"),
        )
    }

    pub(crate) fn lock_poisoned() -> Self {
        Self::new(
            LaplaceFillErrorCode::LockPoisoned,
            "Reconstruction lock was poisoned by a panic in another call".to_string(),
        )
    }

    pub(crate) fn invalid_parameter(message: String) -> Self {
        Self::new(LaplaceFillErrorCode::InvalidParameter, message)
    }

    pub(crate) fn buffer_too_small(required: usize, provided: usize) -> Self {
        Self::invalid_parameter(format!(
            "Buffer holds {provided} floats but {required} are required"
        ))
    }
}

impl From<SolverError> for FfiError {
    fn from(error: SolverError) -> Self {
        let code = match error {
            SolverError::InvalidConfig { .. } => LaplaceFillErrorCode::InvalidConfig,
            SolverError::Allocation { .. } => LaplaceFillErrorCode::AllocationFailed,
            SolverError::UnknownField(_)
            | SolverError::SizeMismatch { .. }
            | SolverError::Aliasing { .. }
            | SolverError::Backend(_) => LaplaceFillErrorCode::BackendFailure,
        };
        Self::new(code, error.to_string())
    }
}

/// Last failure seen on a thread. The `CString` lives here so pointers
/// handed out by `laplace_fill_get_last_error` stay valid.
pub(crate) struct LastError {
    pub(crate) message: Option<CString>,
    pub(crate) code: LaplaceFillErrorCode,
}

thread_local! {
    static LAST_ERROR: RefCell<LastError> = const {
        RefCell::new(LastError {
            message: None,
            code: LaplaceFillErrorCode::Ok,
        })
    };
}

pub(crate) fn with_last_error<R>(f: impl FnOnce(&mut LastError) -> R) -> R {
    LAST_ERROR.with_borrow_mut(f)
}

/// Message of the most recent failure on the calling thread, or null.
///
/// The pointer stays valid until the next `laplace_fill_*` call on the same
/// thread. **Do not free it.**
///
/// ```c
/// if (laplace_fill_new(&config, &fill) != Ok) {
///     const char* message = laplace_fill_get_last_error();
///     if (message) fprintf(stderr, "laplace_fill: %s\n", message);
/// }
/// ```
#[no_mangle]
pub extern "C" fn laplace_fill_get_last_error() -> *const c_char {
    with_last_error(|last| last.message.as_ref().map_or(ptr::null(), |m| m.as_ptr()))
}

/// Code of the most recent failure on the calling thread, `Ok` after a
/// successful call.
#[no_mangle]
pub extern "C" fn laplace_fill_get_last_error_code() -> LaplaceFillErrorCode {
    with_last_error(|last| last.code)
}
