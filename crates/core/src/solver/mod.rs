//! Iterative solvers for the constrained Laplace problem
//!
//! All four methods implement [`IterativeSolver`] and step a [`Level`]
//! through a [`FieldBackend`], so they run unchanged on CPU and GPU.
//!
//! | Method | Work per step |
//! |--------|---------------|
//! | Jacobi | one Jacobi pass |
//! | SOR | one red and one black half-pass |
//! | CG | one Laplacian, three dot products, three linear combinations |
//! | Multigrid | one V-cycle |
//!
//! # Example
//!
//! ```rust,ignore
//! use laplace_fill_core::backend::CpuBackend;
//! use laplace_fill_core::solver::create_solver;
//! use laplace_fill_core::{Level, SolverConfig};
//!
//! let mut backend = CpuBackend::new();
//! let config = SolverConfig::default();
//! let mut grid = Level::allocate(&mut backend, config.size)?;
//! let mut solver = create_solver(&config, &mut backend)?;
//! solver.step(&mut backend, &mut grid)?;
//! ```

mod conjugate_gradient;
mod jacobi;
mod multigrid;
mod sor;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

pub use conjugate_gradient::ConjugateGradient;
pub use jacobi::Jacobi;
pub use multigrid::Multigrid;
pub use r#trait::{IterativeSolver, StepOutcome};
pub use sor::SuccessiveOverRelaxation;

use crate::backend::FieldBackend;
use crate::config::{Method, SolverConfig};
use crate::error::SolverError;
use tracing::info;

/// Build the solver selected by `config.method`
///
/// Solvers that need work fields (CG, multigrid) allocate them on `backend`.
///
/// # Errors
///
/// Propagates backend allocation failures.
pub fn create_solver(
    config: &SolverConfig,
    backend: &mut dyn FieldBackend,
) -> Result<Box<dyn IterativeSolver>, SolverError> {
    let solver: Box<dyn IterativeSolver> = match config.method {
        Method::Jacobi => Box::new(Jacobi::new(config.jacobi)),
        Method::Sor => Box::new(SuccessiveOverRelaxation::new(config.sor)),
        Method::ConjugateGradient => Box::new(ConjugateGradient::new(
            config.conjugate_gradient,
            backend,
            config.size,
        )?),
        Method::Multigrid => Box::new(Multigrid::new(config.multigrid, backend, config.size)?),
    };
    info!(
        "Created {} solver for {}x{} grid on {} backend",
        solver.method(),
        config.size,
        config.size,
        backend.name()
    );
    Ok(solver)
}
