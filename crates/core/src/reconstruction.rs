//! Reconstruction orchestrator
//!
//! [`Reconstruction`] ties a backend, the finest grid level and the active
//! solver together. Samples are queued between ticks and pinned at the start
//! of the next [`tick`](Reconstruction::tick), so the solver always sees a
//! consistent constraint set for the whole step.

use crate::backend::{create_backend, FieldBackend, Kernel};
use crate::config::{Method, SolverConfig};
use crate::constraints::{insert_samples, Sample};
use crate::error::SolverError;
use crate::field::{Channels, Level};
use crate::profiler::{FrameTimer, ProfilerScope};
use crate::solver::{create_solver, IterativeSolver, StepOutcome};
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use tracing::{debug, info};

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Tick index, starting at 0
    pub tick: u64,
    /// Whether the solver advanced
    pub outcome: StepOutcome,
    /// Distinct cells pinned at the start of this tick
    pub inserted: usize,
    /// Wall time of the tick in milliseconds
    pub elapsed_ms: f64,
}

/// Result of [`Reconstruction::run_until`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Ticks performed
    pub ticks: u64,
    /// Residual norm after the last tick
    pub residual_norm: f32,
    /// Whether the tolerance was reached
    pub converged: bool,
}

/// Interactive reconstruction of a 4-channel field from sparse samples
pub struct Reconstruction {
    config: SolverConfig,
    backend: Box<dyn FieldBackend>,
    grid: Level,
    solver: Box<dyn IterativeSolver>,
    pending: Vec<Sample>,
    pinned: FxHashSet<usize>,
    ticks: u64,
    timer: FrameTimer,
}

impl Reconstruction {
    /// Create a reconstruction on the best available backend
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvalidConfig`] before allocating anything if
    /// `config` is invalid, or a backend error if allocation fails.
    pub fn new(config: SolverConfig) -> Result<Self, SolverError> {
        config.validate()?;
        Self::with_backend(config, create_backend(config.prefer_gpu))
    }

    /// Create a reconstruction on a caller-supplied backend
    ///
    /// # Errors
    ///
    /// Same as [`Reconstruction::new`].
    pub fn with_backend(
        config: SolverConfig,
        mut backend: Box<dyn FieldBackend>,
    ) -> Result<Self, SolverError> {
        config.validate()?;
        let grid = Level::allocate(backend.as_mut(), config.size)?;
        let solver = match create_solver(&config, backend.as_mut()) {
            Ok(solver) => solver,
            Err(err) => {
                grid.release(backend.as_mut());
                return Err(err);
            }
        };

        info!(
            "Reconstruction initialized: {}x{} grid, method={}, GPU={}",
            config.size,
            config.size,
            config.method,
            backend.is_gpu_accelerated()
        );

        Ok(Self {
            config,
            backend,
            grid,
            solver,
            pending: Vec::new(),
            pinned: FxHashSet::default(),
            ticks: 0,
            timer: FrameTimer::new(),
        })
    }

    /// Queue samples for insertion at the start of the next tick
    pub fn queue_samples(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.pending.extend(samples);
    }

    /// Number of samples waiting for the next tick
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Insert pending samples, step the solver once and refresh the residual
    ///
    /// # Errors
    ///
    /// Propagates backend failures. Pending samples are consumed even when
    /// the step fails.
    pub fn tick(&mut self) -> Result<TickReport, SolverError> {
        let scope = ProfilerScope::new("tick");

        let inserted = self.flush_samples()?;
        let outcome = self.solver.step(self.backend.as_mut(), &mut self.grid)?;
        self.refresh_residual()?;

        let elapsed_ms = scope.elapsed_ms();
        self.timer.record(elapsed_ms);
        let report = TickReport {
            tick: self.ticks,
            outcome,
            inserted,
            elapsed_ms,
        };
        self.ticks += 1;

        debug!(
            "Tick {}: {:?}, {} cells pinned, {:.3}ms",
            report.tick, report.outcome, report.inserted, report.elapsed_ms
        );
        Ok(report)
    }

    /// Tick until the residual norm drops to `tolerance` or `max_ticks` pass
    ///
    /// At least one tick runs when `max_ticks > 0`, so queued samples are
    /// always pinned before the residual is judged.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn run_until(
        &mut self,
        tolerance: f32,
        max_ticks: u64,
    ) -> Result<RunSummary, SolverError> {
        let mut ticks = 0;
        let mut residual_norm = self.residual_norm()?;
        while ticks < max_ticks {
            self.tick()?;
            ticks += 1;
            residual_norm = self.residual_norm()?;
            if residual_norm <= tolerance {
                break;
            }
        }
        let converged = residual_norm <= tolerance;
        info!(
            "Ran {} ticks, residual norm {:.3e} (converged={})",
            ticks, residual_norm, converged
        );
        Ok(RunSummary {
            ticks,
            residual_norm,
            converged,
        })
    }

    /// Replace the configuration, discarding every pin and the solution
    ///
    /// The backend is kept; all fields are reallocated.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvalidConfig`] if `config` is invalid, or the
    /// backend's error if the new fields cannot be allocated. Either way the
    /// previous configuration, pins and solution are kept.
    pub fn reconfigure(&mut self, config: SolverConfig) -> Result<(), SolverError> {
        config.validate()?;

        let grid = Level::allocate(self.backend.as_mut(), config.size)?;
        let solver = match create_solver(&config, self.backend.as_mut()) {
            Ok(solver) => solver,
            Err(err) => {
                grid.release(self.backend.as_mut());
                return Err(err);
            }
        };

        let old_grid = std::mem::replace(&mut self.grid, grid);
        let old_solver = std::mem::replace(&mut self.solver, solver);
        old_solver.release(self.backend.as_mut());
        old_grid.release(self.backend.as_mut());

        self.config = config;
        self.pending.clear();
        self.pinned.clear();
        self.ticks = 0;
        self.timer.reset();

        info!(
            "Reconfigured: {}x{} grid, method={}",
            config.size, config.size, config.method
        );
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Active method
    pub fn method(&self) -> Method {
        self.solver.method()
    }

    /// Grid side length
    pub fn size(&self) -> usize {
        self.grid.size()
    }

    /// Ticks since construction or the last reconfigure
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Distinct cells pinned so far
    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    /// Whether the backend runs on a GPU
    pub fn is_gpu_accelerated(&self) -> bool {
        self.backend.is_gpu_accelerated()
    }

    /// Tick timings
    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    /// Current solution, row-major
    ///
    /// # Errors
    ///
    /// Propagates backend readback failures.
    pub fn solution(&self) -> Result<Cow<'_, [Channels]>, SolverError> {
        self.backend.read(self.grid.solution.read())
    }

    /// Pinned values (zero where nothing is pinned)
    ///
    /// # Errors
    ///
    /// Propagates backend readback failures.
    pub fn constraints(&self) -> Result<Cow<'_, [Channels]>, SolverError> {
        self.backend.read(self.grid.constraints.values)
    }

    /// Constraint mask (1 where pinned)
    ///
    /// # Errors
    ///
    /// Propagates backend readback failures.
    pub fn constraint_mask(&self) -> Result<Cow<'_, [Channels]>, SolverError> {
        self.backend.read(self.grid.constraints.mask)
    }

    /// Residual `f - Δu` as of the end of the last tick
    ///
    /// # Errors
    ///
    /// Propagates backend readback failures.
    pub fn residual(&self) -> Result<Cow<'_, [Channels]>, SolverError> {
        self.backend.read(self.grid.scratch)
    }

    /// Per-channel squared residual `Σ r²`
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn residual_dot(&mut self) -> Result<Channels, SolverError> {
        let residual = self.grid.scratch;
        self.backend.dot(residual, residual)
    }

    /// `sqrt(Σ r²)` over all cells and channels
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn residual_norm(&mut self) -> Result<f32, SolverError> {
        Ok(self.residual_dot()?.sum().max(0.0).sqrt())
    }

    /// Channel-averaged root-mean-square residual per cell
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn rms_residual(&mut self) -> Result<f32, SolverError> {
        let cells = self.grid.cell_count() as f32;
        let dot = self.residual_dot()?;
        Ok(dot.map(|c| (c.max(0.0) / cells).sqrt()).mean())
    }

    fn flush_samples(&mut self) -> Result<usize, SolverError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let samples = std::mem::take(&mut self.pending);
        let inserted = insert_samples(
            self.backend.as_mut(),
            &self.grid,
            &samples,
            &mut self.pinned,
        )?;
        if inserted > 0 {
            self.solver.constraints_changed();
        }
        Ok(inserted)
    }

    fn refresh_residual(&mut self) -> Result<(), SolverError> {
        self.backend.run(
            Kernel::Residual {
                solution: self.grid.solution.read(),
                mask: self.grid.constraints.mask,
                forcing: self.grid.forcing,
            },
            self.grid.scratch,
        )
    }
}

impl Drop for Reconstruction {
    fn drop(&mut self) {
        debug!(
            "Dropping reconstruction after {} ticks (mean {:.3}ms)",
            self.ticks,
            self.timer.mean_frame_time_ms()
        );
    }
}
