//! Damped Jacobi relaxation

use super::{IterativeSolver, StepOutcome};
use crate::backend::{FieldBackend, Kernel};
use crate::config::{JacobiParams, Method};
use crate::error::SolverError;
use crate::field::Level;

/// Replaces every free cell by a blend of its old value and the
/// neighbour average: `u' = (1-w)·u + w·(Σneighbours - f) / n`
#[derive(Debug, Clone)]
pub struct Jacobi {
    params: JacobiParams,
}

impl Jacobi {
    /// Create a Jacobi solver
    pub fn new(params: JacobiParams) -> Self {
        Self { params }
    }
}

impl IterativeSolver for Jacobi {
    fn method(&self) -> Method {
        Method::Jacobi
    }

    fn step(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &mut Level,
    ) -> Result<StepOutcome, SolverError> {
        backend.run(
            Kernel::Jacobi {
                solution: grid.solution.read(),
                mask: grid.constraints.mask,
                forcing: grid.forcing,
                weight: self.params.weight,
            },
            grid.solution.write(),
        )?;
        grid.solution.commit();
        Ok(StepOutcome::Updated)
    }

    fn release(self: Box<Self>, _backend: &mut dyn FieldBackend) {}
}
