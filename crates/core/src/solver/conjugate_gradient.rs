//! Conjugate gradient on the free-cell Laplacian
//!
//! The operator is the 5-point Laplacian restricted to free cells, which is
//! negative semi-definite. With `r = f - Lx` and `p` the search direction,
//! each step computes
//!
//! ```text
//! a = r·r        b = p·Lp        α = a / b
//! x ← x + α p    r ← r - α Lp    β = (r·r) / a    p ← r + β p
//! ```
//!
//! per channel. Residual and direction are zero on pinned cells and stay so,
//! which keeps the pinned values of `x` fixed.

use super::{IterativeSolver, StepOutcome};
use crate::backend::{FieldBackend, Kernel};
use crate::config::{CgGuard, ConjugateGradientParams, Method};
use crate::error::SolverError;
use crate::field::{Channels, FieldHandle, FieldPair, Level};
use tracing::{debug, trace};

impl CgGuard {
    /// Per-channel step length `a / b`, or `None` if the step must be skipped
    pub fn step_length(self, a: &Channels, b: &Channels) -> Option<Channels> {
        match self {
            CgGuard::AllChannels => {
                let product = b.x * b.y * b.z * b.w;
                if product == 0.0 || product.is_nan() {
                    None
                } else {
                    Some(a.component_div(b))
                }
            }
            CgGuard::PerChannel => {
                if b.iter().all(|&c| c == 0.0 || c.is_nan()) {
                    None
                } else {
                    Some(a.zip_map(b, |a, b| if b == 0.0 || b.is_nan() { 0.0 } else { a / b }))
                }
            }
        }
    }
}

/// Per-channel `new / old`, with zero where `old` is zero
fn direction_ratio(new: &Channels, old: &Channels) -> Channels {
    new.zip_map(old, |n, o| if o == 0.0 { 0.0 } else { n / o })
}

/// Conjugate gradient state
///
/// Residual and direction persist between steps. They are rebuilt from the
/// current solution on the first step and after every constraint change.
#[derive(Debug)]
pub struct ConjugateGradient {
    params: ConjugateGradientParams,
    residual: FieldPair,
    direction: FieldPair,
    curvature: FieldHandle,
    stale: bool,
    residual_dot: Channels,
}

impl ConjugateGradient {
    /// Allocate CG work fields for a grid of side `size`
    ///
    /// # Errors
    ///
    /// Propagates backend allocation failures.
    pub fn new(
        params: ConjugateGradientParams,
        backend: &mut dyn FieldBackend,
        size: usize,
    ) -> Result<Self, SolverError> {
        let residual = FieldPair::allocate(backend, size)?;
        let direction = match FieldPair::allocate(backend, size) {
            Ok(pair) => pair,
            Err(err) => {
                residual.release(backend);
                return Err(err);
            }
        };
        let curvature = match backend.allocate(size) {
            Ok(handle) => handle,
            Err(err) => {
                residual.release(backend);
                direction.release(backend);
                return Err(err);
            }
        };
        Ok(Self {
            params,
            residual,
            direction,
            curvature,
            stale: true,
            residual_dot: Channels::zeros(),
        })
    }

    /// `r·r` from the most recent step
    pub fn residual_dot(&self) -> Channels {
        self.residual_dot
    }

    /// `r = f - Lx`, `p = r`
    fn restart(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &Level,
    ) -> Result<(), SolverError> {
        backend.run(
            Kernel::Residual {
                solution: grid.solution.read(),
                mask: grid.constraints.mask,
                forcing: grid.forcing,
            },
            self.residual.write(),
        )?;
        self.residual.commit();
        backend.copy(self.residual.read(), self.direction.write())?;
        self.direction.commit();
        self.stale = false;
        debug!("Conjugate gradient restarted from current solution");
        Ok(())
    }
}

impl IterativeSolver for ConjugateGradient {
    fn method(&self) -> Method {
        Method::ConjugateGradient
    }

    fn step(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &mut Level,
    ) -> Result<StepOutcome, SolverError> {
        if self.stale {
            self.restart(backend, grid)?;
        }

        let r = self.residual.read();
        let p = self.direction.read();
        let a = backend.dot(r, r)?;
        self.residual_dot = a;

        backend.run(
            Kernel::Laplacian {
                source: p,
                mask: grid.constraints.mask,
            },
            self.curvature,
        )?;
        let b = backend.dot(p, self.curvature)?;

        let Some(alpha) = self.params.guard.step_length(&a, &b) else {
            trace!("Conjugate gradient step skipped, p·Lp = {:?}", b.as_slice());
            return Ok(StepOutcome::Skipped);
        };

        backend.run(
            Kernel::LinearCombine {
                a: grid.solution.read(),
                b: p,
                coeff: alpha,
            },
            grid.solution.write(),
        )?;
        grid.solution.commit();

        backend.run(
            Kernel::LinearCombine {
                a: r,
                b: self.curvature,
                coeff: -alpha,
            },
            self.residual.write(),
        )?;
        self.residual.commit();

        let r_new = self.residual.read();
        let c = backend.dot(r_new, r_new)?;
        let beta = direction_ratio(&c, &a);

        backend.run(
            Kernel::LinearCombine {
                a: r_new,
                b: p,
                coeff: beta,
            },
            self.direction.write(),
        )?;
        self.direction.commit();

        Ok(StepOutcome::Updated)
    }

    fn constraints_changed(&mut self) {
        self.stale = true;
    }

    fn release(self: Box<Self>, backend: &mut dyn FieldBackend) {
        let this = *self;
        this.residual.release(backend);
        this.direction.release(backend);
        backend.release(this.curvature);
    }
}
