// src/render/targets.rs - size-dependent textures and the readback buffer
use crate::error::{PipelineError, Result};
use crate::render::gpu::align_to;
use crate::video::CameraFrame;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;
pub const CONTOUR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Size of the packed contour mask for a frame and scale, never below 1x1.
pub fn mask_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let scale = scale.clamp(0.01, 1.0);
    let scaled = |v: u32| ((v as f32 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Target {
    fn new(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Every texture the passes read or write for one output size. Rebuilt when
/// the camera resolution changes.
pub struct RenderTargets {
    pub width: u32,
    pub height: u32,
    pub mask_width: u32,
    pub mask_height: u32,
    pub camera: Target,
    pub face_mask: Target,
    /// Ping-pong pair for the contour mask and its separable blur.
    pub contour: [Target; 2],
    pub skin: Target,
    pub makeup: Target,
    pub composite: Target,
    pub beard: Target,
    pub output: Target,
    pub readback: wgpu::Buffer,
    pub unpadded_bytes_per_row: u32,
    pub padded_bytes_per_row: u32,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, mask_scale: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::invalid_frame(format!(
                "cannot render a {width}x{height} frame"
            )));
        }
        let full = (width, height);
        let (mask_width, mask_height) = mask_size(width, height, mask_scale);
        let low = (mask_width, mask_height);
        let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;

        let camera = Target::new(
            device,
            "facepaint-camera",
            full,
            COLOR_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let output = Target::new(
            device,
            "facepaint-output",
            full,
            COLOR_FORMAT,
            sampled | wgpu::TextureUsages::COPY_SRC,
        );

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| PipelineError::resource("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row = align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("facepaint-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            width,
            height,
            mask_width,
            mask_height,
            camera,
            face_mask: Target::new(device, "facepaint-face-mask", full, MASK_FORMAT, sampled),
            contour: [
                Target::new(device, "facepaint-contour-a", low, CONTOUR_FORMAT, sampled),
                Target::new(device, "facepaint-contour-b", low, CONTOUR_FORMAT, sampled),
            ],
            skin: Target::new(device, "facepaint-skin", full, COLOR_FORMAT, sampled),
            makeup: Target::new(device, "facepaint-makeup", full, COLOR_FORMAT, sampled),
            composite: Target::new(device, "facepaint-composite", full, COLOR_FORMAT, sampled),
            beard: Target::new(device, "facepaint-beard", full, MASK_FORMAT, sampled),
            output,
            readback,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mask_size(&self) -> (u32, u32) {
        (self.mask_width, self.mask_height)
    }

    pub fn upload_camera(&self, queue: &wgpu::Queue, frame: &CameraFrame) -> Result<()> {
        if (frame.width, frame.height) != self.size() {
            return Err(PipelineError::invalid_frame(format!(
                "frame is {}x{}, targets are {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.camera.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.unpadded_bytes_per_row),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Records a copy of the output texture into the readback buffer.
    pub fn copy_output(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.output.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Maps the readback buffer and strips the row padding. Blocks until the
    /// GPU has finished the copy.
    pub fn read_back(&self, device: &wgpu::Device) -> Result<Vec<u8>> {
        let slice = self.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| PipelineError::readback("failed receiving GPU map callback"))?
            .map_err(|e| PipelineError::readback(format!("GPU buffer mapping failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let row = self.unpadded_bytes_per_row as usize;
        let mut pixels = vec![0_u8; row * self.height as usize];
        for (dst, chunk) in pixels
            .chunks_exact_mut(row)
            .zip(mapped.chunks(self.padded_bytes_per_row as usize))
        {
            dst.copy_from_slice(&chunk[..row]);
        }
        drop(mapped);
        self.readback.unmap();
        Ok(pixels)
    }
}
