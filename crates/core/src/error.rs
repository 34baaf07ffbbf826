//! Error type shared by backends, solvers and the reconstruction orchestrator

use crate::field::FieldHandle;
use std::fmt;

/// Errors raised while configuring or stepping a reconstruction
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// A configuration value is out of range
    InvalidConfig {
        /// Name of the offending parameter (e.g. `"size"`, `"sor.omega"`)
        parameter: &'static str,
        /// What was wrong with it
        message: String,
    },
    /// The backend could not provide storage for a field
    Allocation {
        /// Requested grid side length
        size: usize,
        /// Backend-specific reason
        reason: String,
    },
    /// A handle does not refer to a live field of this backend
    UnknownField(FieldHandle),
    /// Two fields taking part in one operation have incompatible sizes
    SizeMismatch {
        /// Size the operation required
        expected: usize,
        /// Size it was given
        actual: usize,
    },
    /// A kernel was asked to write into one of its own inputs
    Aliasing {
        /// Kernel name
        kernel: &'static str,
    },
    /// Device-level failure reported by an accelerated backend
    Backend(String),
}

impl SolverError {
    /// Shorthand for [`SolverError::InvalidConfig`]
    pub fn invalid_config(parameter: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter,
            message: message.into(),
        }
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { parameter, message } => {
                write!(f, "invalid configuration for '{parameter}': {message}")
            }
            Self::Allocation { size, reason } => {
                write!(f, "failed to allocate {size}x{size} field: {reason}")
            }
            Self::UnknownField(handle) => write!(f, "unknown field handle {}", handle.id()),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "field size mismatch: expected {expected}, got {actual}")
            }
            Self::Aliasing { kernel } => {
                write!(f, "kernel '{kernel}' output aliases one of its inputs")
            }
            Self::Backend(message) => write!(f, "backend failure: {message}"),
        }
    }
}

impl std::error::Error for SolverError {}
