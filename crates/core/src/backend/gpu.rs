//! GPU field backend
//!
//! Fields are storage buffers of `vec4<f32>`; kernels are compute pipelines
//! built from `shaders/stencil.wgsl`, one entry point per [`Kernel`]
//! variant. Dot products run the same 2×2 averaging pyramid as the CPU
//! backend on the device and read back a single cell.

use super::context::GpuContext;
use super::{expected_input_size, FieldBackend, Kernel};
use crate::error::SolverError;
use crate::field::{Channels, FieldHandle};
use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Bytes per cell (`vec4<f32>`)
const CELL_BYTES: u64 = 16;

/// Compute workgroup side (matches `@workgroup_size(8, 8)`)
const WORKGROUP: u32 = 8;

const ENTRY_POINTS: [&str; 11] = [
    "jacobi",
    "red_black",
    "laplacian",
    "residual",
    "linear_combine",
    "restrict_average",
    "restrict_mask",
    "restrict_pinned",
    "prolong_add",
    "reduce_product",
    "reduce_average",
];

/// Kernel parameters (must match the WGSL `Params` layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct KernelParams {
    size: u32,
    coarse_size: u32,
    parity: u32,
    _pad: u32,
    scalar: [f32; 4],
    coeff: [f32; 4],
}

impl KernelParams {
    fn new(size: usize) -> Self {
        Self {
            size: size as u32,
            coarse_size: 0,
            parity: 0,
            _pad: 0,
            scalar: [0.0; 4],
            coeff: [0.0; 4],
        }
    }

    fn with_scalar(mut self, value: f32) -> Self {
        self.scalar[0] = value;
        self
    }
}

/// One device field
struct GpuField {
    buffer: wgpu::Buffer,
    size: usize,
}

/// A resolved dispatch: entry point, parameters and up to three inputs
struct Dispatch {
    entry: &'static str,
    params: KernelParams,
    inputs: [Option<FieldHandle>; 3],
}

fn to_bytes(values: &[Channels]) -> Vec<[f32; 4]> {
    values.iter().map(|c| [c.x, c.y, c.z, c.w]).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<Channels> {
    bytemuck::cast_slice::<u8, [f32; 4]>(bytes)
        .iter()
        .map(|c| Channels::new(c[0], c[1], c[2], c[3]))
        .collect()
}

/// wgpu compute backend
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: FxHashMap<&'static str, wgpu::ComputePipeline>,
    dummy: wgpu::Buffer,
    slots: Vec<Option<GpuField>>,
    free: Vec<u32>,
    // Reduction pyramids keyed by finest side; level 0 is the product buffer
    pyramids: FxHashMap<usize, Vec<wgpu::Buffer>>,
}

impl GpuBackend {
    /// Compile the stencil module and build one pipeline per entry point
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::Backend`] if the stencil module or one of its
    /// pipelines fails device validation.
    pub fn new(context: GpuContext) -> Result<Self, SolverError> {
        let max_grid_size = context.max_grid_size();
        let (device, queue, adapter_info) = context.into_parts();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stencil Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/stencil.wgsl"
            ))),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stencil Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stencil Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = ENTRY_POINTS
            .iter()
            .map(|&entry| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                (entry, pipeline)
            })
            .collect();

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(SolverError::Backend(format!(
                "stencil pipelines failed validation: {error}"
            )));
        }

        let dummy = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Unused Input"),
            size: CELL_BYTES,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        info!(
            "GPU field backend ready on {} ({} pipelines, grids up to {}x{})",
            adapter_info.name,
            ENTRY_POINTS.len(),
            max_grid_size,
            max_grid_size
        );

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            bind_group_layout,
            pipelines,
            dummy,
            slots: Vec::new(),
            free: Vec::new(),
            pyramids: FxHashMap::default(),
        })
    }

    /// Adapter the backend runs on
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn field(&self, handle: FieldHandle) -> Result<&GpuField, SolverError> {
        self.slots
            .get(handle.id() as usize)
            .and_then(Option::as_ref)
            .ok_or(SolverError::UnknownField(handle))
    }

    fn create_storage(&self, size: usize, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (size * size) as u64 * CELL_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Record one compute pass writing `out`
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dispatch: &Dispatch,
        inputs: [&wgpu::Buffer; 3],
        out: &wgpu::Buffer,
    ) -> Result<(), SolverError> {
        let pipeline = self.pipelines.get(dispatch.entry).ok_or_else(|| {
            SolverError::Backend(format!("missing pipeline '{}'", dispatch.entry))
        })?;

        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Kernel Params"),
                contents: bytemuck::bytes_of(&dispatch.params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.entry),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: inputs[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: inputs[1].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: inputs[2].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: out.as_entire_binding(),
                },
            ],
        });

        let groups = dispatch.params.size.div_ceil(WORKGROUP);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.entry),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups, groups, 1);
        Ok(())
    }

    fn resolve_inputs(
        &self,
        inputs: [Option<FieldHandle>; 3],
    ) -> Result<[&wgpu::Buffer; 3], SolverError> {
        let mut buffers = [&self.dummy; 3];
        for (slot, input) in buffers.iter_mut().zip(inputs) {
            if let Some(handle) = input {
                *slot = &self.field(handle)?.buffer;
            }
        }
        Ok(buffers)
    }

    fn dispatch_for(&self, kernel: Kernel, out_size: usize) -> Result<Dispatch, SolverError> {
        let params = KernelParams::new(out_size);
        let dispatch = match kernel {
            Kernel::Jacobi {
                solution,
                mask,
                forcing,
                weight,
            } => Dispatch {
                entry: "jacobi",
                params: params.with_scalar(weight),
                inputs: [Some(solution), Some(mask), Some(forcing)],
            },
            Kernel::RedBlack {
                solution,
                mask,
                forcing,
                omega,
                parity,
            } => Dispatch {
                entry: "red_black",
                params: KernelParams {
                    parity: parity.as_u32(),
                    ..params.with_scalar(omega)
                },
                inputs: [Some(solution), Some(mask), Some(forcing)],
            },
            Kernel::Laplacian { source, mask } => Dispatch {
                entry: "laplacian",
                params,
                inputs: [Some(source), Some(mask), None],
            },
            Kernel::Residual {
                solution,
                mask,
                forcing,
            } => Dispatch {
                entry: "residual",
                params,
                inputs: [Some(solution), Some(mask), Some(forcing)],
            },
            Kernel::LinearCombine { a, b, coeff } => Dispatch {
                entry: "linear_combine",
                params: KernelParams {
                    coeff: [coeff.x, coeff.y, coeff.z, coeff.w],
                    ..params
                },
                inputs: [Some(a), Some(b), None],
            },
            Kernel::Restrict { fine, scale } => Dispatch {
                entry: "restrict_average",
                params: params.with_scalar(scale),
                inputs: [Some(fine), None, None],
            },
            Kernel::RestrictMask { fine_mask } => Dispatch {
                entry: "restrict_mask",
                params,
                inputs: [Some(fine_mask), None, None],
            },
            Kernel::RestrictPinned {
                fine_values,
                fine_mask,
            } => Dispatch {
                entry: "restrict_pinned",
                params,
                inputs: [Some(fine_values), Some(fine_mask), None],
            },
            Kernel::ProlongAdd {
                solution,
                correction,
                mask,
            } => Dispatch {
                entry: "prolong_add",
                params: KernelParams {
                    coarse_size: self.field(correction)?.size as u32,
                    ..params
                },
                inputs: [Some(solution), Some(correction), Some(mask)],
            },
        };
        Ok(dispatch)
    }

    /// Make sure a reduction pyramid exists for side `size`
    fn ensure_pyramid(&mut self, size: usize) {
        if self.pyramids.contains_key(&size) {
            return;
        }
        let mut levels = Vec::new();
        let mut side = size;
        loop {
            levels.push(self.create_storage(side, "Reduction Level"));
            if side == 1 {
                break;
            }
            side /= 2;
        }
        debug!("Allocated {}-level reduction pyramid for {}x{}", levels.len(), size, size);
        self.pyramids.insert(size, levels);
    }

    /// Copy `bytes` bytes of `source` to a mappable buffer and read them back
    fn read_buffer(
        &self,
        source: &wgpu::Buffer,
        bytes: u64,
    ) -> Result<Vec<Channels>, SolverError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| SolverError::Backend(format!("readback channel closed: {e}")))?
            .map_err(|e| SolverError::Backend(format!("buffer map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let values = from_bytes(&data);
        drop(data);
        staging.unmap();
        Ok(values)
    }
}

impl FieldBackend for GpuBackend {
    fn allocate(&mut self, size: usize) -> Result<FieldHandle, SolverError> {
        let bytes = (size as u64)
            .checked_mul(size as u64)
            .and_then(|cells| cells.checked_mul(CELL_BYTES))
            .ok_or_else(|| SolverError::Allocation {
                size,
                reason: "field byte size overflows".to_string(),
            })?;
        let limits = self.device.limits();
        if bytes > limits.max_buffer_size
            || bytes > u64::from(limits.max_storage_buffer_binding_size)
        {
            return Err(SolverError::Allocation {
                size,
                reason: format!(
                    "{bytes} bytes exceeds the device storage buffer limit of {}",
                    limits.max_storage_buffer_binding_size
                ),
            });
        }

        // Freshly created wgpu buffers are zero-initialized
        let field = GpuField {
            buffer: self.create_storage(size, "Field"),
            size,
        };
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
        Ok(handle)
    }

    fn release(&mut self, field: FieldHandle) {
        if let Some(slot) = self.slots.get_mut(field.id() as usize) {
            if let Some(field_data) = slot.take() {
                field_data.buffer.destroy();
                self.free.push(field.id());
            }
        }
    }

    fn size_of(&self, field: FieldHandle) -> Result<usize, SolverError> {
        self.field(field).map(|field| field.size)
    }

    fn fill(&mut self, field: FieldHandle, value: Channels) -> Result<(), SolverError> {
        let target = self.field(field)?;
        let data = to_bytes(&vec![value; target.size * target.size]);
        self.queue
            .write_buffer(&target.buffer, 0, bytemuck::cast_slice(&data));
        Ok(())
    }

    fn write_cells(
        &mut self,
        field: FieldHandle,
        cells: &[(usize, Channels)],
    ) -> Result<(), SolverError> {
        let target = self.field(field)?;
        let len = target.size * target.size;
        for &(index, value) in cells {
            if index >= len {
                return Err(SolverError::SizeMismatch {
                    expected: len,
                    actual: index,
                });
            }
            let cell = [value.x, value.y, value.z, value.w];
            self.queue.write_buffer(
                &target.buffer,
                index as u64 * CELL_BYTES,
                bytemuck::cast_slice(&cell),
            );
        }
        Ok(())
    }

    fn copy(&mut self, src: FieldHandle, dst: FieldHandle) -> Result<(), SolverError> {
        if src == dst {
            return Err(SolverError::Aliasing { kernel: "copy" });
        }
        let source = self.field(src)?;
        let target = self.field(dst)?;
        if source.size != target.size {
            return Err(SolverError::SizeMismatch {
                expected: target.size,
                actual: source.size,
            });
        }
        let bytes = (source.size * source.size) as u64 * CELL_BYTES;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Copy Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &target.buffer, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read(&self, field: FieldHandle) -> Result<Cow<'_, [Channels]>, SolverError> {
        let source = self.field(field)?;
        let bytes = (source.size * source.size) as u64 * CELL_BYTES;
        self.read_buffer(&source.buffer, bytes).map(Cow::Owned)
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

        let dispatch = self.dispatch_for(kernel, out_size)?;
        let inputs = self.resolve_inputs(dispatch.inputs)?;
        let target = &self.field(out)?.buffer;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name()),
            });
        self.encode(&mut encoder, &dispatch, inputs, target)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
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
        if !size.is_power_of_two() {
            return Err(SolverError::SizeMismatch {
                expected: size.next_power_of_two(),
                actual: size,
            });
        }

        self.ensure_pyramid(size);
        let levels = self
            .pyramids
            .get(&size)
            .ok_or_else(|| SolverError::Backend("reduction pyramid missing".to_string()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Dot Product Encoder"),
            });
        let product = Dispatch {
            entry: "reduce_product",
            params: KernelParams::new(size),
            inputs: [Some(a), Some(b), None],
        };
        let inputs = self.resolve_inputs(product.inputs)?;
        self.encode(&mut encoder, &product, inputs, &levels[0])?;

        let mut side = size;
        for window in levels.windows(2) {
            side /= 2;
            let average = Dispatch {
                entry: "reduce_average",
                params: KernelParams::new(side),
                inputs: [None; 3],
            };
            self.encode(
                &mut encoder,
                &average,
                [&window[0], &self.dummy, &self.dummy],
                &window[1],
            )?;
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let last = levels
            .last()
            .ok_or_else(|| SolverError::Backend("empty reduction pyramid".to_string()))?;
        let mean = self.read_buffer(last, CELL_BYTES)?;
        let mean = mean
            .first()
            .copied()
            .ok_or_else(|| SolverError::Backend("empty readback".to_string()))?;
        Ok(mean * (size * size) as f32)
    }

    fn name(&self) -> &'static str {
        "gpu"
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}
