//! Compute backends for the stencil kernels
//!
//! A [`FieldBackend`] owns field storage and runs [`Kernel`]s over it. The CPU
//! backend is always available; the GPU backend needs the `gpu` feature and a
//! working adapter. Solvers are written once against the trait.
//!
//! Every kernel reads its inputs and writes a separate output field. Asking a
//! kernel to write into one of its inputs is rejected with
//! [`SolverError::Aliasing`].

mod cpu;
mod kernels;
mod reduction;

#[cfg(feature = "gpu")]
mod context;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::CpuBackend;
pub use reduction::pyramid_dot;

#[cfg(feature = "gpu")]
pub use context::{GpuContext, GpuInitResult};
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;

use crate::error::SolverError;
use crate::field::{Channels, FieldHandle};
use std::borrow::Cow;
use tracing::info;
#[cfg(feature = "gpu")]
use tracing::warn;

/// Cell colour for red-black ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// Cells with `(x + y)` even
    Red,
    /// Cells with `(x + y)` odd
    Black,
}

impl Parity {
    /// Whether the cell at `(x, y)` has this colour
    #[inline]
    pub fn matches(self, x: usize, y: usize) -> bool {
        let even = (x + y) % 2 == 0;
        match self {
            Parity::Red => even,
            Parity::Black => !even,
        }
    }

    /// Integer tag used by the GPU uniforms
    pub fn as_u32(self) -> u32 {
        match self {
            Parity::Red => 0,
            Parity::Black => 1,
        }
    }
}

/// A single data-parallel pass over one output field
///
/// Neighbour access is edge-clamped: out-of-grid neighbours are skipped and
/// averages divide by the number of in-grid neighbours. Cells whose mask is
/// set pass their current value through unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// `out = (1-w)·u + w·(Σneighbours - f) / n` on free cells
    Jacobi {
        /// Current solution
        solution: FieldHandle,
        /// Constraint mask
        mask: FieldHandle,
        /// Forcing term
        forcing: FieldHandle,
        /// Blend weight
        weight: f32,
    },
    /// Over-relaxed Gauss-Seidel update of one colour; the other colour is copied
    RedBlack {
        /// Current solution
        solution: FieldHandle,
        /// Constraint mask
        mask: FieldHandle,
        /// Forcing term
        forcing: FieldHandle,
        /// Relaxation factor
        omega: f32,
        /// Colour being updated
        parity: Parity,
    },
    /// `out = Σneighbours - n·centre` on free cells
    Laplacian {
        /// Field to differentiate
        source: FieldHandle,
        /// Constraint mask
        mask: FieldHandle,
    },
    /// `out = f - Δu` on free cells, zero on pinned cells
    Residual {
        /// Current solution
        solution: FieldHandle,
        /// Constraint mask
        mask: FieldHandle,
        /// Forcing term
        forcing: FieldHandle,
    },
    /// `out = a + coeff ⊙ b` on every cell
    LinearCombine {
        /// Base field
        a: FieldHandle,
        /// Scaled field
        b: FieldHandle,
        /// Per-channel coefficient
        coeff: Channels,
    },
    /// 2×2 block average times `scale`, onto a grid of half the side
    Restrict {
        /// Fine-level field
        fine: FieldHandle,
        /// Multiplier applied to the block average
        scale: f32,
    },
    /// Coarse cell is pinned if any of its four fine cells is pinned
    RestrictMask {
        /// Fine-level mask
        fine_mask: FieldHandle,
    },
    /// Mask-weighted average of the pinned values of the four fine cells
    RestrictPinned {
        /// Fine-level pinned values
        fine_values: FieldHandle,
        /// Fine-level mask
        fine_mask: FieldHandle,
    },
    /// `out = u + bilinear(correction)` on free cells of the finer grid
    ProlongAdd {
        /// Fine-level solution
        solution: FieldHandle,
        /// Coarse-level correction (half the side)
        correction: FieldHandle,
        /// Fine-level mask
        mask: FieldHandle,
    },
}

/// How an input's side relates to the output's side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputScale {
    /// Same side as the output
    Same,
    /// Twice the output's side
    Double,
    /// Half the output's side
    Half,
}

impl Kernel {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Jacobi { .. } => "jacobi",
            Kernel::RedBlack { .. } => "red_black",
            Kernel::Laplacian { .. } => "laplacian",
            Kernel::Residual { .. } => "residual",
            Kernel::LinearCombine { .. } => "linear_combine",
            Kernel::Restrict { .. } => "restrict",
            Kernel::RestrictMask { .. } => "restrict_mask",
            Kernel::RestrictPinned { .. } => "restrict_pinned",
            Kernel::ProlongAdd { .. } => "prolong_add",
        }
    }

    /// Input fields with their size relation to the output
    pub(crate) fn inputs(&self) -> Vec<(FieldHandle, InputScale)> {
        use InputScale::{Double, Half, Same};
        match *self {
            Kernel::Jacobi {
                solution,
                mask,
                forcing,
                ..
            }
            | Kernel::RedBlack {
                solution,
                mask,
                forcing,
                ..
            }
            | Kernel::Residual {
                solution,
                mask,
                forcing,
            } => vec![(solution, Same), (mask, Same), (forcing, Same)],
            Kernel::Laplacian { source, mask } => vec![(source, Same), (mask, Same)],
            Kernel::LinearCombine { a, b, .. } => vec![(a, Same), (b, Same)],
            Kernel::Restrict { fine, .. } => vec![(fine, Double)],
            Kernel::RestrictMask { fine_mask } => vec![(fine_mask, Double)],
            Kernel::RestrictPinned {
                fine_values,
                fine_mask,
            } => vec![(fine_values, Double), (fine_mask, Double)],
            Kernel::ProlongAdd {
                solution,
                correction,
                mask,
            } => vec![(solution, Same), (correction, Half), (mask, Same)],
        }
    }

    /// Reject kernels whose output is also an input
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::Aliasing`] when `out` appears among the inputs.
    pub fn check_aliasing(&self, out: FieldHandle) -> Result<(), SolverError> {
        if self.inputs().iter().any(|(input, _)| *input == out) {
            return Err(SolverError::Aliasing {
                kernel: self.name(),
            });
        }
        Ok(())
    }
}

/// Expected side of an input given the output side
pub(crate) fn expected_input_size(out_size: usize, scale: InputScale) -> usize {
    match scale {
        InputScale::Same => out_size,
        InputScale::Double => out_size * 2,
        InputScale::Half => (out_size / 2).max(1),
    }
}

/// Storage and execution of field kernels
///
/// Implementations own every field they hand out. Handles from one backend
/// are meaningless to another.
pub trait FieldBackend: Send {
    /// Allocate a zero-filled field of side `size`
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::Allocation`] when storage cannot be reserved.
    fn allocate(&mut self, size: usize) -> Result<FieldHandle, SolverError>;

    /// Free a field. Unknown handles are ignored.
    fn release(&mut self, field: FieldHandle);

    /// Side length of a live field
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::UnknownField`] for dead handles.
    fn size_of(&self, field: FieldHandle) -> Result<usize, SolverError>;

    /// Set every cell to `value`
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::UnknownField`] for dead handles.
    fn fill(&mut self, field: FieldHandle, value: Channels) -> Result<(), SolverError>;

    /// Overwrite individual cells given as `(row-major index, value)`
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::UnknownField`] for dead handles and
    /// [`SolverError::SizeMismatch`] for indices past the end.
    fn write_cells(
        &mut self,
        field: FieldHandle,
        cells: &[(usize, Channels)],
    ) -> Result<(), SolverError>;

    /// Copy `src` into `dst`
    ///
    /// # Errors
    ///
    /// Fails on dead handles, aliasing, or differing sizes.
    fn copy(&mut self, src: FieldHandle, dst: FieldHandle) -> Result<(), SolverError>;

    /// Read back a field in row-major order
    ///
    /// # Errors
    ///
    /// Fails on dead handles or device readback errors.
    fn read(&self, field: FieldHandle) -> Result<Cow<'_, [Channels]>, SolverError>;

    /// Run `kernel`, writing every cell of `out`
    ///
    /// # Errors
    ///
    /// Fails on dead handles, aliasing between `out` and an input, or input
    /// sizes inconsistent with the kernel.
    fn run(&mut self, kernel: Kernel, out: FieldHandle) -> Result<(), SolverError>;

    /// Per-channel dot product `Σ a·b` via pyramid reduction
    ///
    /// # Errors
    ///
    /// Fails on dead handles, differing sizes, or a side that is not a power of two.
    fn dot(&mut self, a: FieldHandle, b: FieldHandle) -> Result<Channels, SolverError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Whether kernels run on a GPU
    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}

/// Create the best available backend
///
/// With `prefer_gpu` set and the `gpu` feature enabled this tries a GPU
/// adapter first and falls back to the CPU backend on failure.
pub fn create_backend(prefer_gpu: bool) -> Box<dyn FieldBackend> {
    #[cfg(feature = "gpu")]
    {
        if prefer_gpu {
            match GpuContext::request() {
                GpuInitResult::Success(context) => match GpuBackend::new(context) {
                    Ok(backend) => {
                        info!("Using GPU field backend");
                        return Box::new(backend);
                    }
                    Err(e) => warn!("Failed to create GPU backend, falling back to CPU: {e}"),
                },
                GpuInitResult::NoGpuFound => info!("No GPU found, using CPU field backend"),
                GpuInitResult::InitFailed {
                    adapter_name,
                    error,
                } => warn!(
                    "GPU '{}' found but failed to initialize: {}. Falling back to CPU.",
                    adapter_name, error
                ),
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    {
        if prefer_gpu {
            info!("GPU backend requested but the gpu feature is disabled");
        }
    }

    info!("Using CPU field backend ({} threads)", rayon::current_num_threads());
    Box::new(CpuBackend::new())
}
