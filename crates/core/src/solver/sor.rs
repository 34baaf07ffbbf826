//! Red-black successive over-relaxation

use super::{IterativeSolver, StepOutcome};
use crate::backend::{FieldBackend, Kernel, Parity};
use crate::config::{Method, SorParams};
use crate::error::SolverError;
use crate::field::Level;

/// One full red-black sweep: red half-pass, commit, black half-pass, commit
///
/// The black pass reads the freshly updated red cells, which is what makes
/// this Gauss-Seidel rather than Jacobi.
///
/// # Errors
///
/// Propagates backend failures.
pub(crate) fn red_black_sweep(
    backend: &mut dyn FieldBackend,
    grid: &mut Level,
    omega: f32,
) -> Result<(), SolverError> {
    for parity in [Parity::Red, Parity::Black] {
        backend.run(
            Kernel::RedBlack {
                solution: grid.solution.read(),
                mask: grid.constraints.mask,
                forcing: grid.forcing,
                omega,
                parity,
            },
            grid.solution.write(),
        )?;
        grid.solution.commit();
    }
    Ok(())
}

/// Over-relaxed Gauss-Seidel with red-black ordering
#[derive(Debug, Clone)]
pub struct SuccessiveOverRelaxation {
    params: SorParams,
}

impl SuccessiveOverRelaxation {
    /// Create an SOR solver
    pub fn new(params: SorParams) -> Self {
        Self { params }
    }
}

impl IterativeSolver for SuccessiveOverRelaxation {
    fn method(&self) -> Method {
        Method::Sor
    }

    fn step(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &mut Level,
    ) -> Result<StepOutcome, SolverError> {
        red_black_sweep(backend, grid, self.params.omega)?;
        Ok(StepOutcome::Updated)
    }

    fn release(self: Box<Self>, _backend: &mut dyn FieldBackend) {}
}
