//! Geometric multigrid V-cycle
//!
//! Smooth on the fine grid, restrict the residual, solve for a correction on
//! the next coarser grid (recursively), interpolate it back and smooth again.
//! The coarse grids solve the homogeneous correction problem: their pinned
//! cells carry a zero correction.

use super::sor::red_black_sweep;
use super::{IterativeSolver, StepOutcome};
use crate::backend::{FieldBackend, Kernel};
use crate::config::{Method, MultigridParams};
use crate::error::SolverError;
use crate::field::{Channels, Level};
use tracing::debug;

/// Coarse forcing is the block-averaged residual times `(2h / h)²`
const COARSE_FORCING_SCALE: f32 = 4.0;

/// Multigrid solver owning every level below the finest
#[derive(Debug)]
pub struct Multigrid {
    params: MultigridParams,
    coarse: Vec<Level>,
}

impl Multigrid {
    /// Allocate the coarse hierarchy for a finest grid of side `size`
    ///
    /// Levels halve the side while it stays at or above `min_size`. A
    /// hierarchy with no coarse level degenerates to plain red-black sweeps.
    ///
    /// # Errors
    ///
    /// Propagates backend allocation failures; levels already allocated are
    /// released first.
    pub fn new(
        params: MultigridParams,
        backend: &mut dyn FieldBackend,
        size: usize,
    ) -> Result<Self, SolverError> {
        let sizes = params.level_sizes(size);
        let mut coarse = Vec::with_capacity(sizes.len() - 1);
        for &side in &sizes[1..] {
            match Level::allocate(backend, side) {
                Ok(level) => coarse.push(level),
                Err(err) => {
                    for level in coarse {
                        level.release(backend);
                    }
                    return Err(err);
                }
            }
        }
        debug!(
            "Multigrid hierarchy for {}x{}: {} coarse levels down to {}",
            size,
            size,
            coarse.len(),
            sizes.last().copied().unwrap_or(size)
        );
        Ok(Self { params, coarse })
    }

    /// Number of levels including the finest
    pub fn depth(&self) -> usize {
        self.coarse.len() + 1
    }

    /// Coarse levels, next-finest first
    ///
    /// After a step each level holds the restricted mask and pinned values of
    /// the level above it, plus the correction it solved for.
    pub fn levels(&self) -> &[Level] {
        &self.coarse
    }

    fn solve_coarsest(
        &self,
        backend: &mut dyn FieldBackend,
        level: &mut Level,
    ) -> Result<(), SolverError> {
        for _ in 0..self.params.n_solve {
            red_black_sweep(backend, level, self.params.omega)?;
        }
        Ok(())
    }

    fn smooth(&self, backend: &mut dyn FieldBackend, level: &mut Level) -> Result<(), SolverError> {
        for _ in 0..self.params.n_smooth {
            red_black_sweep(backend, level, self.params.omega)?;
        }
        Ok(())
    }

    fn v_cycle(
        &self,
        backend: &mut dyn FieldBackend,
        fine: &mut Level,
        coarser: &mut [Level],
    ) -> Result<(), SolverError> {
        let Some((next, rest)) = coarser.split_first_mut() else {
            return self.solve_coarsest(backend, fine);
        };

        self.smooth(backend, fine)?;

        backend.run(
            Kernel::Residual {
                solution: fine.solution.read(),
                mask: fine.constraints.mask,
                forcing: fine.forcing,
            },
            fine.scratch,
        )?;
        backend.run(
            Kernel::Restrict {
                fine: fine.scratch,
                scale: COARSE_FORCING_SCALE,
            },
            next.forcing,
        )?;
        backend.run(
            Kernel::RestrictMask {
                fine_mask: fine.constraints.mask,
            },
            next.constraints.mask,
        )?;
        backend.run(
            Kernel::RestrictPinned {
                fine_values: fine.constraints.values,
                fine_mask: fine.constraints.mask,
            },
            next.constraints.values,
        )?;
        backend.fill(next.solution.read(), Channels::zeros())?;

        if rest.is_empty() {
            self.solve_coarsest(backend, next)?;
        } else {
            self.v_cycle(backend, next, rest)?;
        }

        backend.run(
            Kernel::ProlongAdd {
                solution: fine.solution.read(),
                correction: next.solution.read(),
                mask: fine.constraints.mask,
            },
            fine.solution.write(),
        )?;
        fine.solution.commit();

        self.smooth(backend, fine)
    }
}

impl IterativeSolver for Multigrid {
    fn method(&self) -> Method {
        Method::Multigrid
    }

    fn step(
        &mut self,
        backend: &mut dyn FieldBackend,
        grid: &mut Level,
    ) -> Result<StepOutcome, SolverError> {
        // The hierarchy is borrowed mutably alongside `self`'s parameters
        let mut coarse = std::mem::take(&mut self.coarse);
        let result = self.v_cycle(backend, grid, &mut coarse);
        self.coarse = coarse;
        result.map(|()| StepOutcome::Updated)
    }

    fn release(self: Box<Self>, backend: &mut dyn FieldBackend) {
        for level in self.coarse {
            level.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::config::SolverConfig;

    #[test]
    fn test_hierarchy_depth() {
        let mut backend = CpuBackend::new();
        let solver = Multigrid::new(MultigridParams::default(), &mut backend, 64).unwrap();
        // 64, 32, 16, 8, 4, 2
        assert_eq!(solver.depth(), 6);

        let params = MultigridParams {
            min_size: 64,
            ..MultigridParams::default()
        };
        let single = Multigrid::new(params, &mut backend, 64).unwrap();
        assert_eq!(single.depth(), 1);
    }

    #[test]
    fn test_hierarchy_follows_config_levels() {
        let mut backend = CpuBackend::new();
        let mut config = SolverConfig::new(64, Method::Multigrid);
        config.multigrid.min_size = 8;
        let solver = Multigrid::new(config.multigrid, &mut backend, config.size).unwrap();

        let sides: Vec<usize> = solver.levels().iter().map(Level::size).collect();
        assert_eq!(sides.as_slice(), &config.multigrid_levels()[1..]);
        assert_eq!(sides, vec![32, 16, 8]);
    }

    #[test]
    fn test_step_restricts_pins_to_coarse_level() {
        let mut backend = CpuBackend::new();
        let mut grid = Level::allocate(&mut backend, 4).unwrap();
        let pins = [
            (0, Channels::repeat(1.0)),
            (1, Channels::repeat(3.0)),
            (15, Channels::new(5.0, 4.0, 3.0, 2.0)),
        ];
        let mask: Vec<_> = pins.iter().map(|&(i, _)| (i, Channels::repeat(1.0))).collect();
        backend.write_cells(grid.constraints.mask, &mask).unwrap();
        backend.write_cells(grid.constraints.values, &pins).unwrap();
        backend.write_cells(grid.solution.read(), &pins).unwrap();

        let params = MultigridParams {
            n_smooth: 1,
            n_solve: 1,
            min_size: 2,
            omega: 1.5,
        };
        let mut solver = Multigrid::new(params, &mut backend, 4).unwrap();
        solver.step(&mut backend, &mut grid).unwrap();

        let coarse = &solver.levels()[0];
        assert_eq!(coarse.size(), 2);
        let coarse_mask = backend.read(coarse.constraints.mask).unwrap().into_owned();
        let coarse_values = backend.read(coarse.constraints.values).unwrap().into_owned();

        assert_eq!(coarse_mask[0], Channels::repeat(1.0));
        assert_eq!(coarse_mask[1], Channels::zeros());
        assert_eq!(coarse_mask[2], Channels::zeros());
        assert_eq!(coarse_mask[3], Channels::repeat(1.0));

        // Block (0,0) averages its two pinned cells only
        approx::assert_relative_eq!(coarse_values[0].x, 2.0);
        assert_eq!(coarse_values[1], Channels::zeros());
        assert_eq!(coarse_values[3], Channels::new(5.0, 4.0, 3.0, 2.0));
    }

    #[test]
    fn test_release_frees_coarse_levels() {
        let mut backend = CpuBackend::new();
        let solver = Multigrid::new(MultigridParams::default(), &mut backend, 16).unwrap();
        assert!(backend.live_fields() > 0);
        Box::new(solver).release(&mut backend);
        assert_eq!(backend.live_fields(), 0);
    }

    #[test]
    fn test_single_level_runs_solve_sweeps() {
        let mut backend = CpuBackend::new();
        let mut grid = Level::allocate(&mut backend, 4).unwrap();
        backend
            .write_cells(grid.constraints.mask, &[(0, Channels::repeat(1.0))])
            .unwrap();
        backend
            .write_cells(grid.solution.read(), &[(0, Channels::repeat(1.0))])
            .unwrap();

        let params = MultigridParams {
            n_smooth: 0,
            n_solve: 200,
            min_size: 4,
            omega: 1.5,
        };
        let mut solver = Multigrid::new(params, &mut backend, 4).unwrap();
        assert_eq!(solver.depth(), 1);
        solver.step(&mut backend, &mut grid).unwrap();

        let u = backend.read(grid.solution.read()).unwrap();
        for cell in u.iter() {
            approx::assert_relative_eq!(cell.x, 1.0, epsilon = 1e-4);
        }
    }
}
