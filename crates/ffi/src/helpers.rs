use crate::error::{with_last_error, FfiError, LaplaceFillErrorCode};
use crate::instance::LaplaceFillInstance;
use laplace_fill_core::Reconstruction;
use std::ffi::CString;

/// Store `error` as the thread's last failure and return its code.
pub(crate) fn track_error(error: &FfiError) -> LaplaceFillErrorCode {
    with_last_error(|last| {
        last.message = CString::new(error.message.as_str()).ok();
        last.code = error.code;
    });
    error.code
}

fn clear_last_error() {
    with_last_error(|last| {
        last.message = None;
        last.code = LaplaceFillErrorCode::Ok;
    });
}

/// Record a failure, or clear the last error on success.
pub(crate) fn track_result<T>(result: Result<T, FfiError>) -> Result<T, LaplaceFillErrorCode> {
    match result {
        Ok(value) => {
            clear_last_error();
            Ok(value)
        }
        Err(error) => Err(track_error(&error)),
    }
}

/// Run the body of an entry point and turn its result into a status code.
pub(crate) fn handle_ffi_result_error<F>(f: F) -> LaplaceFillErrorCode
where
    F: FnOnce() -> Result<(), FfiError>,
{
    match track_result(f()) {
        Ok(()) => LaplaceFillErrorCode::Ok,
        Err(code) => code,
    }
}

/// Borrow an instance from a raw pointer handed out by `laplace_fill_new`.
pub(crate) fn instance_from_ptr<'a>(
    ptr: *const LaplaceFillInstance,
) -> Result<&'a LaplaceFillInstance, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::null_pointer("ptr"));
    }
    // SAFETY: non-null pointers must come from `laplace_fill_new` and not yet
    // be destroyed, per the documented contract of every entry point.
    Ok(unsafe { &*ptr })
}

/// Lock the reconstruction and run `f` on it.
pub(crate) fn with_reconstruction<F, T>(instance: &LaplaceFillInstance, f: F) -> Result<T, FfiError>
where
    F: FnOnce(&mut Reconstruction) -> T,
{
    let mut recon = instance
        .recon
        .lock()
        .map_err(|_| FfiError::lock_poisoned())?;
    Ok(f(&mut recon))
}
