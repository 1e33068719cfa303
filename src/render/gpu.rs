// src/render/gpu.rs - adapter/device acquisition and error scopes
use crate::error::{PipelineError, Result};

/// Device and queue owned by one render pipeline instance. Dropping it
/// releases every GPU resource created from the device.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub async fn acquire() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| PipelineError::resource("no suitable GPU adapter found"))?;
        let adapter_info = adapter.get_info();
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "selected GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("facepaint-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| PipelineError::resource(format!("failed to request wgpu device: {e}")))?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            tracing::error!("uncaptured GPU error: {error}");
        }));

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Runs `build` inside validation and out-of-memory error scopes and
    /// turns anything they catch into a resource error naming `what`.
    pub async fn checked<T>(&self, what: &str, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        let validation = self.device.pop_error_scope().await;
        let out_of_memory = self.device.pop_error_scope().await;
        match validation.or(out_of_memory) {
            Some(error) => Err(PipelineError::resource(format!("{what}: {error}"))),
            None => Ok(value),
        }
    }

    /// Blocking form of [`checked`](Self::checked) for the per-frame path.
    pub fn checked_blocking<T>(&self, what: &str, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        pollster::block_on(self.checked(what, build))
    }
}

pub fn align_to(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_the_copy_alignment() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(640 * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 2560);
    }
}
