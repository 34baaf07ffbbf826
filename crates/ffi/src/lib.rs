//! C ABI for the Laplace fill reconstruction
//!
//! The host owns input and presentation: it feeds samples in, ticks once per
//! frame and copies the fields it wants to display into its own buffers.
//!
//! ```c
//! LaplaceFillConfig config = laplace_fill_default_config();
//! config.size = 256;
//! LaplaceFillInstance* fill = NULL;
//! laplace_fill_new(&config, &fill);
//!
//! LaplaceFillSample sample = { 0.5f, 0.5f, 1.0f, 0.0f, 0.0f, 1.0f };
//! laplace_fill_add_samples(fill, &sample, 1);
//! laplace_fill_tick(fill, NULL);
//!
//! float* pixels = malloc(256 * 256 * 4 * sizeof(float));
//! laplace_fill_read_field(fill, Solution, pixels, 256 * 256 * 4);
//! laplace_fill_destroy(fill);
//! ```
//!
//! Every fallible call returns a `LaplaceFillErrorCode`; the message of the
//! last failure on the calling thread is available from
//! `laplace_fill_get_last_error`.

mod error;
mod helpers;
mod instance;
mod queries;
mod samples;

pub use error::{
    laplace_fill_get_last_error, laplace_fill_get_last_error_code, LaplaceFillErrorCode,
};
pub use instance::{
    laplace_fill_default_config, laplace_fill_destroy, laplace_fill_new, laplace_fill_reconfigure,
    LaplaceFillConfig, LaplaceFillInstance, LaplaceFillMethod,
};
pub use queries::{
    laplace_fill_grid_size, laplace_fill_is_gpu_accelerated, laplace_fill_mean_tick_ms,
    laplace_fill_pinned_count, laplace_fill_read_field, laplace_fill_residual_norm,
    LaplaceFillView,
};
pub use samples::{
    laplace_fill_add_samples, laplace_fill_run_until, laplace_fill_tick, LaplaceFillSample,
    LaplaceFillTickReport,
};
