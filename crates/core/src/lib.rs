//! Laplace Fill Core Library
//!
//! Interactive reconstruction of a 4-channel (RGBA) image from sparse samples.
//! Sampled cells are pinned and every other cell relaxes towards the harmonic
//! interpolant `Δu = 0`, one solver iteration per tick.
//!
//! ## Solvers
//!
//! - Damped Jacobi
//! - Red-black successive over-relaxation
//! - Conjugate gradient on the free-cell Laplacian
//! - Geometric multigrid V-cycle
//!
//! All solvers run through a [`FieldBackend`](backend::FieldBackend): a
//! rayon-parallel CPU backend, or a wgpu compute backend with the `gpu`
//! feature.

// Field storage and compute backends
pub mod backend;
pub mod field;

// Iterative methods
pub mod solver;

// Sample handling and orchestration
pub mod brush;
pub mod constraints;
pub mod reconstruction;

pub mod config;
pub mod error;
pub mod profiler;

// Re-export the main entry points
pub use backend::{create_backend, CpuBackend, FieldBackend, Kernel, Parity};
pub use brush::{ImageSource, RgbaImage, SampleBrush};
pub use config::{
    CgGuard, ConjugateGradientParams, JacobiParams, Method, MultigridParams, SolverConfig,
    SorParams,
};
pub use constraints::{cell_index, insert_samples, Sample};
pub use error::SolverError;
pub use field::{Channels, ConstraintField, FieldHandle, FieldPair, Level};
pub use profiler::{FrameTimer, ProfilerScope};
pub use reconstruction::{Reconstruction, RunSummary, TickReport};
pub use solver::{create_solver, IterativeSolver, StepOutcome};

#[cfg(feature = "gpu")]
pub use backend::GpuBackend;
