//! CPU field backend
//!
//! Fields are plain `Vec<Channels>` slots; kernels run on the rayon pool.

use super::kernels;
use super::reduction::pyramid_dot;
use super::{expected_input_size, FieldBackend, Kernel};
use crate::error::SolverError;
use crate::field::{Channels, FieldHandle};
use std::borrow::Cow;
use tracing::trace;

/// Storage for one CPU field
#[derive(Debug, Clone)]
struct FieldData {
    /// Values in row-major order (`y * size + x`)
    data: Vec<Channels>,
    /// Grid side length
    size: usize,
}

/// Rayon-parallel backend
#[derive(Debug, Default)]
pub struct CpuBackend {
    slots: Vec<Option<FieldData>>,
    free: Vec<u32>,
}

impl CpuBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields currently allocated
    pub fn live_fields(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn field(&self, handle: FieldHandle) -> Result<&FieldData, SolverError> {
        self.slots
            .get(handle.id() as usize)
            .and_then(Option::as_ref)
            .ok_or(SolverError::UnknownField(handle))
    }

    fn field_mut(&mut self, handle: FieldHandle) -> Result<&mut FieldData, SolverError> {
        self.slots
            .get_mut(handle.id() as usize)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownField(handle))
    }

    fn input(&self, handle: FieldHandle) -> Result<&[Channels], SolverError> {
        self.field(handle).map(|field| field.data.as_slice())
    }

    fn execute(
        &self,
        kernel: Kernel,
        out: &mut [Channels],
        out_size: usize,
    ) -> Result<(), SolverError> {
        match kernel {
            Kernel::Jacobi {
                solution,
                mask,
                forcing,
                weight,
            } => kernels::jacobi(
                self.input(solution)?,
                self.input(mask)?,
                self.input(forcing)?,
                out,
                out_size,
                weight,
            ),
            Kernel::RedBlack {
                solution,
                mask,
                forcing,
                omega,
                parity,
            } => kernels::red_black(
                self.input(solution)?,
                self.input(mask)?,
                self.input(forcing)?,
                out,
                out_size,
                omega,
                parity,
            ),
            Kernel::Laplacian { source, mask } => {
                kernels::laplacian(self.input(source)?, self.input(mask)?, out, out_size);
            }
            Kernel::Residual {
                solution,
                mask,
                forcing,
            } => kernels::residual(
                self.input(solution)?,
                self.input(mask)?,
                self.input(forcing)?,
                out,
                out_size,
            ),
            Kernel::LinearCombine { a, b, coeff } => {
                kernels::linear_combine(self.input(a)?, self.input(b)?, out, coeff);
            }
            Kernel::Restrict { fine, scale } => {
                kernels::restrict(self.input(fine)?, out, out_size, scale);
            }
            Kernel::RestrictMask { fine_mask } => {
                kernels::restrict_mask(self.input(fine_mask)?, out, out_size);
            }
            Kernel::RestrictPinned {
                fine_values,
                fine_mask,
            } => kernels::restrict_pinned(
                self.input(fine_values)?,
                self.input(fine_mask)?,
                out,
                out_size,
            ),
            Kernel::ProlongAdd {
                solution,
                correction,
                mask,
            } => {
                let coarse_size = self.field(correction)?.size;
                kernels::prolong_add(
                    self.input(solution)?,
                    self.input(correction)?,
                    self.input(mask)?,
                    out,
                    out_size,
                    coarse_size,
                );
            }
        }
        Ok(())
    }
}

impl FieldBackend for CpuBackend {
    fn allocate(&mut self, size: usize) -> Result<FieldHandle, SolverError> {
        let cells = size.checked_mul(size).ok_or_else(|| SolverError::Allocation {
            size,
            reason: "cell count overflows usize".to_string(),
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(cells)
            .map_err(|e| SolverError::Allocation {
                size,
                reason: e.to_string(),
            })?;
        data.resize(cells, Channels::zeros());
        let field = FieldData { data, size };

        let handle = if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(field);
            FieldHandle::new(id)
        } else {
            let id = u32::try_from(self.slots.len()).map_err(|_| SolverError::Allocation {
                size,
                reason: "too many live fields".to_string(),
            })?;
            self.slots.push(Some(field));
            FieldHandle::new(id)
        };
        trace!("Allocated {}x{} field {}", size, size, handle.id());
        Ok(handle)
    }

    fn release(&mut self, field: FieldHandle) {
        if let Some(slot) = self.slots.get_mut(field.id() as usize) {
            if slot.take().is_some() {
                self.free.push(field.id());
            }
        }
    }

    fn size_of(&self, field: FieldHandle) -> Result<usize, SolverError> {
        self.field(field).map(|field| field.size)
    }

    fn fill(&mut self, field: FieldHandle, value: Channels) -> Result<(), SolverError> {
        self.field_mut(field)?.data.fill(value);
        Ok(())
    }

    fn write_cells(
        &mut self,
        field: FieldHandle,
        cells: &[(usize, Channels)],
    ) -> Result<(), SolverError> {
        let target = self.field_mut(field)?;
        let len = target.data.len();
        for &(index, value) in cells {
            let cell = target.data.get_mut(index).ok_or(SolverError::SizeMismatch {
                expected: len,
                actual: index,
            })?;
            *cell = value;
        }
        Ok(())
    }

    fn copy(&mut self, src: FieldHandle, dst: FieldHandle) -> Result<(), SolverError> {
        if src == dst {
            return Err(SolverError::Aliasing { kernel: "copy" });
        }
        let source = self.field(src)?;
        let (size, data) = (source.size, source.data.clone());
        let target = self.field_mut(dst)?;
        if target.size != size {
            return Err(SolverError::SizeMismatch {
                expected: target.size,
                actual: size,
            });
        }
        target.data.copy_from_slice(&data);
        Ok(())
    }

    fn read(&self, field: FieldHandle) -> Result<Cow<'_, [Channels]>, SolverError> {
        self.input(field).map(Cow::Borrowed)
    }

    fn run(&mut self, kernel: Kernel, out: FieldHandle) -> Result<(), SolverError> {
        kernel.check_aliasing(out)?;
        let out_size = self.size_of(out)?;
        for (input, scale) in kernel.inputs() {
            let expected = expected_input_size(out_size, scale);
            let actual = self.size_of(input)?;
            if actual != expected {
                return Err(SolverError::SizeMismatch { expected, actual });
            }
        }

        // Take the output out of its slot so inputs can be borrowed alongside it
        let mut data = std::mem::take(&mut self.field_mut(out)?.data);
        let result = self.execute(kernel, &mut data, out_size);
        self.field_mut(out)?.data = data;
        result
    }

    fn dot(&mut self, a: FieldHandle, b: FieldHandle) -> Result<Channels, SolverError> {
        let size = self.size_of(a)?;
        let other = self.size_of(b)?;
        if size != other {
            return Err(SolverError::SizeMismatch {
                expected: size,
                actual: other,
            });
        }
        pyramid_dot(self.input(a)?, self.input(b)?, size)
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
