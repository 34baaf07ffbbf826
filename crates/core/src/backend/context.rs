//! wgpu device acquisition for the GPU backend

use tracing::{debug, info};

/// Outcome of [`GpuContext::request`]
///
/// A machine without an adapter is normal and falls back quietly; an adapter
/// that refuses to create a device is worth a warning.
#[derive(Debug)]
pub enum GpuInitResult {
    /// Device ready
    Success(GpuContext),
    /// No compatible adapter
    NoGpuFound,
    /// Adapter present, device creation failed
    InitFailed {
        /// Adapter that refused
        adapter_name: String,
        /// wgpu error text
        error: String,
    },
}

/// A compute-capable device and its queue
#[derive(Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
}

fn find_adapter(instance: &wgpu::Instance) -> Option<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

impl GpuContext {
    /// Pick a high-performance adapter and open a device on it
    ///
    /// The device inherits the adapter's own buffer limits so large grids
    /// are not capped by the conservative wgpu defaults.
    pub fn request() -> GpuInitResult {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let Some(adapter) = find_adapter(&instance) else {
            debug!("No GPU adapter available");
            return GpuInitResult::NoGpuFound;
        };
        let adapter_info = adapter.get_info();
        debug!(
            "Adapter {} ({:?}, {:?})",
            adapter_info.name, adapter_info.device_type, adapter_info.backend
        );

        let descriptor = wgpu::DeviceDescriptor {
            label: Some("Laplace Fill Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
        };
        match pollster::block_on(adapter.request_device(&descriptor, None)) {
            Ok((device, queue)) => {
                info!("Opened GPU device on {}", adapter_info.name);
                GpuInitResult::Success(Self {
                    device,
                    queue,
                    adapter_info,
                })
            }
            Err(e) => GpuInitResult::InitFailed {
                adapter_name: adapter_info.name,
                error: e.to_string(),
            },
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Largest power-of-two grid side whose field fits in one storage binding
    pub fn max_grid_size(&self) -> usize {
        let limits = self.device.limits();
        let bytes = limits
            .max_buffer_size
            .min(u64::from(limits.max_storage_buffer_binding_size));
        let mut side = 1usize;
        while ((side * 2) as u64).pow(2) * 16 <= bytes {
            side *= 2;
        }
        side
    }

    pub(crate) fn into_parts(self) -> (wgpu::Device, wgpu::Queue, wgpu::AdapterInfo) {
        (self.device, self.queue, self.adapter_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_reports_a_variant() {
        // Which variant comes back depends on the machine
        match GpuContext::request() {
            GpuInitResult::Success(ctx) => {
                assert!(!ctx.adapter_name().is_empty());
                assert!(ctx.max_grid_size() >= 256);
                assert!(ctx.max_grid_size().is_power_of_two());
            }
            GpuInitResult::NoGpuFound => {}
            GpuInitResult::InitFailed { error, .. } => assert!(!error.is_empty()),
        }
    }
}
