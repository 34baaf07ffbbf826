//! Solver configuration
//!
//! A [`SolverConfig`] selects the grid size, the iterative method and the
//! per-method parameters. It round-trips through serde so hosts can load it
//! from whatever format they already use.

use crate::error::SolverError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Iterative method used to relax the free cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Damped Jacobi
    Jacobi,
    /// Red-black successive over-relaxation
    #[default]
    Sor,
    /// Conjugate gradient on the free-cell Laplacian
    #[serde(rename = "cg")]
    ConjugateGradient,
    /// Geometric multigrid V-cycle
    Multigrid,
}

impl Method {
    /// All methods, in menu order
    pub const ALL: [Method; 4] = [
        Method::Jacobi,
        Method::Sor,
        Method::ConjugateGradient,
        Method::Multigrid,
    ];

    /// Short identifier used by configs and the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Jacobi => "jacobi",
            Method::Sor => "sor",
            Method::ConjugateGradient => "cg",
            Method::Multigrid => "multigrid",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jacobi" => Ok(Method::Jacobi),
            "sor" | "red-black" | "redblack" => Ok(Method::Sor),
            "cg" | "conjugate-gradient" | "conjugate_gradient" => Ok(Method::ConjugateGradient),
            "multigrid" | "mg" => Ok(Method::Multigrid),
            other => Err(SolverError::invalid_config(
                "method",
                format!("unknown method '{other}', expected jacobi, sor, cg or multigrid"),
            )),
        }
    }
}

/// Damped Jacobi parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JacobiParams {
    /// Blend weight `w` in (0, 1]; 1 is plain Jacobi
    pub weight: f32,
}

impl Default for JacobiParams {
    fn default() -> Self {
        Self { weight: 1.0 }
    }
}

/// Red-black SOR parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorParams {
    /// Over-relaxation factor in (0, 2)
    pub omega: f32,
}

impl Default for SorParams {
    fn default() -> Self {
        Self { omega: 1.9 }
    }
}

/// How conjugate gradient reacts to a zero curvature `p·Ap`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgGuard {
    /// Skip the whole step when any channel has zero curvature
    #[default]
    AllChannels,
    /// Freeze only the channels with zero curvature
    PerChannel,
}

/// Conjugate gradient parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjugateGradientParams {
    /// Zero-curvature policy
    pub guard: CgGuard,
}

/// Multigrid V-cycle parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultigridParams {
    /// Red-black sweeps before and after each coarse correction
    pub n_smooth: usize,
    /// Red-black sweeps at the coarsest level
    pub n_solve: usize,
    /// Smallest grid side length in the hierarchy
    pub min_size: usize,
    /// Relaxation factor of the smoother
    pub omega: f32,
}

impl MultigridParams {
    /// Side lengths of the hierarchy below a finest grid of side `size`, finest first
    ///
    /// Halves `size` while the result stays at or above `min_size`.
    pub fn level_sizes(&self, size: usize) -> Vec<usize> {
        let min_size = self.min_size.max(1);
        let mut levels = vec![size];
        let mut side = size;
        while side % 2 == 0 && side / 2 >= min_size {
            side /= 2;
            levels.push(side);
        }
        levels
    }
}

impl Default for MultigridParams {
    fn default() -> Self {
        Self {
            n_smooth: 50,
            n_solve: 20,
            min_size: 2,
            omega: 1.9,
        }
    }
}

/// Complete reconstruction configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Grid side length, a power of two
    pub size: usize,
    /// Active method
    pub method: Method,
    /// Jacobi parameters
    pub jacobi: JacobiParams,
    /// SOR parameters
    pub sor: SorParams,
    /// Conjugate gradient parameters
    pub conjugate_gradient: ConjugateGradientParams,
    /// Multigrid parameters
    pub multigrid: MultigridParams,
    /// Try the GPU backend first (needs the `gpu` feature)
    pub prefer_gpu: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            size: 512,
            method: Method::Sor,
            jacobi: JacobiParams::default(),
            sor: SorParams::default(),
            conjugate_gradient: ConjugateGradientParams::default(),
            multigrid: MultigridParams::default(),
            prefer_gpu: false,
        }
    }
}

impl SolverConfig {
    /// Default parameters for the given size and method
    pub fn new(size: usize, method: Method) -> Self {
        Self {
            size,
            method,
            ..Self::default()
        }
    }

    /// Check every parameter, including those of inactive methods
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvalidConfig`] naming the first bad parameter.
    pub fn validate(&self) -> Result<(), SolverError> {
        if !self.size.is_power_of_two() {
            return Err(SolverError::invalid_config(
                "size",
                format!("must be a power of two, got {}", self.size),
            ));
        }

        let weight = self.jacobi.weight;
        if !weight.is_finite() || weight <= 0.0 || weight > 1.0 {
            return Err(SolverError::invalid_config(
                "jacobi.weight",
                format!("must lie in (0, 1], got {weight}"),
            ));
        }

        check_omega("sor.omega", self.sor.omega)?;
        check_omega("multigrid.omega", self.multigrid.omega)?;

        let mg = &self.multigrid;
        if mg.min_size == 0 {
            return Err(SolverError::invalid_config(
                "multigrid.min_size",
                "must be at least 1",
            ));
        }
        if self.method == Method::Multigrid && self.size < mg.min_size {
            return Err(SolverError::invalid_config(
                "multigrid.min_size",
                format!(
                    "grid size {} is smaller than the coarsest level {}",
                    self.size, mg.min_size
                ),
            ));
        }

        Ok(())
    }

    /// Side lengths of the multigrid hierarchy, finest first
    pub fn multigrid_levels(&self) -> Vec<usize> {
        self.multigrid.level_sizes(self.size)
    }
}

fn check_omega(parameter: &'static str, omega: f32) -> Result<(), SolverError> {
    if !omega.is_finite() || omega <= 0.0 || omega >= 2.0 {
        return Err(SolverError::invalid_config(
            parameter,
            format!("must lie in (0, 2), got {omega}"),
        ));
    }
    Ok(())
}
