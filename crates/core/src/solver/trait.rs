//! Iterative solver trait definition
//!
//! Every method advances the same [`Level`] one iteration at a time through a
//! [`FieldBackend`]. Methods never read field contents back to the host while
//! stepping, with the exception of the per-channel dot products CG needs.

use crate::backend::FieldBackend;
use crate::config::Method;
use crate::error::SolverError;
use crate::field::Level;

/// What a call to [`IterativeSolver::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The solution was advanced
    Updated,
    /// The step was skipped and the solution left as it was
    Skipped,
}

/// Backend-agnostic interface for the relaxation methods
pub trait IterativeSolver: Send {
    /// Which method this is
    fn method(&self) -> Method;

    /// Perform one iteration on `grid`
    ///
    /// Pinned cells of `grid` keep their pinned value. The solution buffer of
    /// `grid` is committed on return.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    fn step(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &mut Level,
    ) -> Result<StepOutcome, SolverError>;

    /// Notify the solver that new cells were pinned since the last step
    ///
    /// Methods that read the constraints fresh every step ignore this.
    fn constraints_changed(&mut self) {}

    /// Return any fields the solver allocated
    fn release(self: Box<Self>, backend: &mut dyn FieldBackend);
}
