//! Field handles and per-level storage
//!
//! Field contents live inside a [`FieldBackend`]; the solvers only ever hold
//! opaque [`FieldHandle`]s. Every grid level owns the same set of fields:
//! a double-buffered solution, the constraint mask and pinned values, the
//! forcing term and one scratch field.

use crate::backend::FieldBackend;
use crate::error::SolverError;
use nalgebra::Vector4;

/// One scalar per channel (RGBA). Channels never interact.
pub type Channels = Vector4<f32>;

/// Opaque reference to a field owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(u32);

impl FieldHandle {
    /// Wrap a backend-assigned slot id
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Backend-assigned slot id
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Row-major cell index for a grid of side `size`
#[inline]
pub fn cell_offset(x: usize, y: usize, size: usize) -> usize {
    y * size + x
}

/// Two same-sized fields used as read/write buffers
///
/// Kernels read [`read`](Self::read) and write [`write`](Self::write); after
/// the write lands, [`commit`](Self::commit) makes it the new read buffer.
#[derive(Debug)]
pub struct FieldPair {
    slots: [FieldHandle; 2],
    current: usize,
}

impl FieldPair {
    /// Allocate both buffers, zero-filled
    ///
    /// # Errors
    ///
    /// Propagates backend allocation failures. Nothing is leaked on failure.
    pub fn allocate(backend: &mut dyn FieldBackend, size: usize) -> Result<Self, SolverError> {
        let first = backend.allocate(size)?;
        let second = match backend.allocate(size) {
            Ok(handle) => handle,
            Err(err) => {
                backend.release(first);
                return Err(err);
            }
        };
        Ok(Self {
            slots: [first, second],
            current: 0,
        })
    }

    /// Buffer holding the committed values
    #[inline]
    pub fn read(&self) -> FieldHandle {
        self.slots[self.current]
    }

    /// Buffer the next kernel should write into
    #[inline]
    pub fn write(&self) -> FieldHandle {
        self.slots[1 - self.current]
    }

    /// Swap roles after a completed write
    #[inline]
    pub fn commit(&mut self) {
        self.current = 1 - self.current;
    }

    /// Return both buffers to the backend
    pub fn release(self, backend: &mut dyn FieldBackend) {
        for slot in self.slots {
            backend.release(slot);
        }
    }
}

/// Pinned cells of one level
///
/// `mask` holds 1 in every channel of a pinned cell and 0 elsewhere;
/// `values` holds the pinned value where the mask is set.
#[derive(Debug)]
pub struct ConstraintField {
    /// Pinned indicator
    pub mask: FieldHandle,
    /// Pinned values
    pub values: FieldHandle,
}

impl ConstraintField {
    /// Allocate an empty (nothing pinned) constraint field
    ///
    /// # Errors
    ///
    /// Propagates backend allocation failures.
    pub fn allocate(backend: &mut dyn FieldBackend, size: usize) -> Result<Self, SolverError> {
        let mask = backend.allocate(size)?;
        let values = match backend.allocate(size) {
            Ok(handle) => handle,
            Err(err) => {
                backend.release(mask);
                return Err(err);
            }
        };
        Ok(Self { mask, values })
    }

    /// Return both fields to the backend
    pub fn release(self, backend: &mut dyn FieldBackend) {
        backend.release(self.mask);
        backend.release(self.values);
    }
}

/// All fields belonging to one resolution level
#[derive(Debug)]
pub struct Level {
    size: usize,
    /// Current estimate of the solution
    pub solution: FieldPair,
    /// Pinned cells
    pub constraints: ConstraintField,
    /// Right-hand side `f` of `Δu = f`; zero on the finest level
    pub forcing: FieldHandle,
    /// Per-level scratch (residual on the finest level)
    pub scratch: FieldHandle,
}

impl Level {
    /// Allocate a zero-filled level of side `size`
    ///
    /// # Errors
    ///
    /// Propagates backend allocation failures; partially allocated fields
    /// are released before returning.
    pub fn allocate(backend: &mut dyn FieldBackend, size: usize) -> Result<Self, SolverError> {
        let solution = FieldPair::allocate(backend, size)?;
        let constraints = match ConstraintField::allocate(backend, size) {
            Ok(constraints) => constraints,
            Err(err) => {
                solution.release(backend);
                return Err(err);
            }
        };
        let forcing = match backend.allocate(size) {
            Ok(handle) => handle,
            Err(err) => {
                solution.release(backend);
                constraints.release(backend);
                return Err(err);
            }
        };
        let scratch = match backend.allocate(size) {
            Ok(handle) => handle,
            Err(err) => {
                backend.release(forcing);
                solution.release(backend);
                constraints.release(backend);
                return Err(err);
            }
        };

        Ok(Self {
            size,
            solution,
            constraints,
            forcing,
            scratch,
        })
    }

    /// Grid side length
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of cells (`size²`)
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.size * self.size
    }

    /// Return every field to the backend
    pub fn release(self, backend: &mut dyn FieldBackend) {
        self.solution.release(backend);
        self.constraints.release(backend);
        backend.release(self.forcing);
        backend.release(self.scratch);
    }
}
