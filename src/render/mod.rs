//! GPU compositing. One [`RenderPipeline`] owns a device and runs the pass
//! chain for each prepared frame:
//!
//! 1. face clip mask (face oval mesh, max-blended edge alpha)
//! 2. low-resolution contour/highlight mask, then a separable blur
//! 3. skin and foundation correction
//! 4. makeup pigment, one program per [`EffectKind`], then protected regions
//!    cleared out of the pigment layer
//! 5. contour/relight composite with beard exclusion
//! 6. present, optionally redirected to an intermediate mask

pub mod gpu;
pub mod passes;
pub mod targets;
pub mod uniforms;

use std::ops::Range;

use image::RgbaImage;

use crate::config::RenderConfig;
use crate::error::{PipelineError, Result};
use crate::geometry::{EffectKind, MeshVertex, RegionMesh};
use crate::scheduler::{LandmarkSource, PreparedFrame};
use crate::style::StyleParameters;

use gpu::GpuContext;
use passes::{fullscreen_pass, PassBindGroups, PassBuffers, Programs};
use targets::RenderTargets;
use uniforms::{BlurParams, ContourShapes, DrawParams, FrameGlobals, PresentParams, RelightParams, SkinParams};

/// What the present pass shows. Anything but `Composite` is for tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VisualizationMode {
    #[default]
    Composite,
    ContourMask,
    HighlightMask,
    BeardMask,
    FaceMask,
}

impl VisualizationMode {
    pub fn from_index(index: u32) -> Self {
        match index {
            1 => Self::ContourMask,
            2 => Self::HighlightMask,
            3 => Self::BeardMask,
            4 => Self::FaceMask,
            _ => Self::Composite,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            Self::Composite => 0,
            Self::ContourMask => 1,
            Self::HighlightMask => 2,
            Self::BeardMask => 3,
            Self::FaceMask => 4,
        }
    }
}

/// Per-frame counters returned by [`RenderPipeline::render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub frame_index: u64,
    pub source: Option<LandmarkSource>,
    pub has_face: bool,
    pub makeup_draws: usize,
    pub protected_draws: usize,
    pub contour_segments: u32,
    /// Meshes dropped for lack of vertex or draw-slot capacity.
    pub dropped_meshes: usize,
    /// Regions the geometry builder skipped this frame.
    pub skipped_regions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawProgram {
    Pigment { effect: EffectKind, slot: u32 },
    Protect,
}

#[derive(Debug, Clone, PartialEq)]
struct DrawCall {
    program: DrawProgram,
    vertices: Range<u32>,
}

/// Vertex and draw-slot packing for one frame.
#[derive(Debug, Default)]
struct FrameMeshes {
    vertices: Vec<MeshVertex>,
    face_oval: Option<Range<u32>>,
    draws: Vec<DrawCall>,
    params: Vec<DrawParams>,
    dropped: usize,
}

impl FrameMeshes {
    fn collect(prepared: &PreparedFrame, style: &StyleParameters, vertex_capacity: usize, draw_slots: usize) -> Self {
        let mut frame = Self::default();
        let Some(geometry) = &prepared.geometry else {
            return frame;
        };
        if let Some(oval) = &geometry.face_oval {
            frame.face_oval = frame.push(oval, vertex_capacity);
        }

        let pigment = |frame: &mut Self, mesh: &RegionMesh, effect: EffectKind| {
            let visibility = geometry.visibility.for_side(mesh.kind.side());
            let Some(params) = DrawParams::for_effect(effect, style, visibility) else {
                return;
            };
            if frame.params.len() >= draw_slots {
                frame.dropped += 1;
                return;
            }
            if let Some(vertices) = frame.push(mesh, vertex_capacity) {
                let slot = frame.params.len() as u32;
                frame.params.push(params);
                frame.draws.push(DrawCall {
                    program: DrawProgram::Pigment { effect, slot },
                    vertices,
                });
            }
        };

        for mesh in &geometry.makeup {
            if let Some(effect) = mesh.kind.effect() {
                pigment(&mut frame, mesh, effect);
            }
        }
        if style.sparkle_enabled() {
            for mesh in &geometry.makeup {
                if matches!(mesh.kind.effect(), Some(EffectKind::Eyeshadow | EffectKind::Lips)) {
                    pigment(&mut frame, mesh, EffectKind::Sparkle);
                }
            }
        }
        for mesh in &geometry.protected {
            if let Some(vertices) = frame.push(mesh, vertex_capacity) {
                frame.draws.push(DrawCall {
                    program: DrawProgram::Protect,
                    vertices,
                });
            }
        }
        frame
    }

    fn push(&mut self, mesh: &RegionMesh, capacity: usize) -> Option<Range<u32>> {
        if mesh.vertices.is_empty() {
            return None;
        }
        if self.vertices.len() + mesh.vertices.len() > capacity {
            self.dropped += 1;
            return None;
        }
        let start = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&mesh.vertices);
        Some(start..self.vertices.len() as u32)
    }

    fn pigment_draws(&self) -> usize {
        self.draws
            .iter()
            .filter(|d| matches!(d.program, DrawProgram::Pigment { .. }))
            .count()
    }
}

struct SizedResources {
    targets: RenderTargets,
    bind_groups: PassBindGroups,
}

pub struct RenderPipeline {
    gpu: GpuContext,
    config: RenderConfig,
    programs: Programs,
    buffers: PassBuffers,
    sampler: wgpu::Sampler,
    sized: Option<SizedResources>,
    frame_index: u64,
    /// True once the output texture holds a rendered frame.
    has_output: bool,
}

impl RenderPipeline {
    /// Acquires a device and compiles every program. Targets are created
    /// lazily at the first frame's resolution.
    pub async fn new(config: &RenderConfig) -> Result<Self> {
        let gpu = GpuContext::acquire().await?;
        let programs = gpu.checked("compiling render programs", Programs::new).await?;
        let buffers = gpu
            .checked("allocating pass buffers", |device| {
                PassBuffers::new(device, config.max_makeup_draws, config.mesh_vertex_capacity)
            })
            .await?;
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("facepaint-linear-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        tracing::info!("render pipeline ready");
        Ok(Self {
            gpu,
            config: config.clone(),
            programs,
            buffers,
            sampler,
            sized: None,
            frame_index: 0,
            has_output: false,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.gpu.adapter_info
    }

    /// Current target size, `None` before the first frame.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.sized.as_ref().map(|sized| sized.targets.size())
    }

    fn ensure_size(&mut self, width: u32, height: u32) -> Result<()> {
        if self.size() == Some((width, height)) {
            return Ok(());
        }
        let mask_scale = self.config.mask_scale;
        let targets = self
            .gpu
            .checked_blocking("allocating render targets", |device| {
                RenderTargets::new(device, width, height, mask_scale)
            })??;
        let bind_groups = PassBindGroups::new(
            &self.gpu.device,
            &self.programs,
            &self.buffers,
            &targets,
            &self.sampler,
        );
        tracing::debug!(width, height, mask = ?targets.mask_size(), "render targets resized");
        self.sized = Some(SizedResources { targets, bind_groups });
        self.has_output = false;
        Ok(())
    }

    /// Runs every pass for one frame and leaves the result in the output
    /// texture. Only the bounded GPU submit blocks.
    pub fn render(
        &mut self,
        prepared: &PreparedFrame,
        style: &StyleParameters,
        mode: VisualizationMode,
    ) -> Result<RenderStats> {
        let (width, height) = prepared.frame_size();
        self.ensure_size(width, height)?;
        let sized = self
            .sized
            .as_ref()
            .ok_or_else(|| PipelineError::state("render targets missing after resize"))?;
        let targets = &sized.targets;
        let groups = &sized.bind_groups;
        let queue = &self.gpu.queue;

        targets.upload_camera(queue, &prepared.packet.frame)?;

        let geometry = prepared.geometry.as_ref();
        let face_width_px = geometry.map(|g| g.face_width_px).unwrap_or(0.0);
        let globals = FrameGlobals::new(&self.config, targets.size(), targets.mask_size(), face_width_px);
        let shapes = geometry
            .map(|g| ContourShapes::from_geometry(&g.contour, g.visibility, g.lighting.as_ref()))
            .unwrap_or_else(ContourShapes::empty);
        let blur_radius = (self.config.contour_blur_fraction * face_width_px * self.config.mask_scale).max(0.5);
        let meshes = FrameMeshes::collect(
            prepared,
            style,
            self.buffers.vertex_capacity,
            self.buffers.draw_slots,
        );
        if meshes.dropped > 0 {
            tracing::debug!(dropped = meshes.dropped, "meshes over capacity");
        }

        queue.write_buffer(&self.buffers.globals, 0, bytemuck::bytes_of(&globals));
        queue.write_buffer(&self.buffers.contour, 0, bytemuck::bytes_of(&shapes));
        queue.write_buffer(
            &self.buffers.blur_horizontal,
            0,
            bytemuck::bytes_of(&BlurParams::horizontal(blur_radius)),
        );
        queue.write_buffer(
            &self.buffers.blur_vertical,
            0,
            bytemuck::bytes_of(&BlurParams::vertical(blur_radius)),
        );
        queue.write_buffer(
            &self.buffers.skin,
            0,
            bytemuck::bytes_of(&SkinParams::new(style, face_width_px)),
        );
        queue.write_buffer(
            &self.buffers.relight,
            0,
            bytemuck::bytes_of(&RelightParams::new(style, geometry)),
        );
        queue.write_buffer(
            &self.buffers.present,
            0,
            bytemuck::bytes_of(&PresentParams::new(mode.index())),
        );
        if !meshes.vertices.is_empty() {
            queue.write_buffer(&self.buffers.vertices, 0, bytemuck::cast_slice(&meshes.vertices));
        }
        if !meshes.params.is_empty() {
            let stride = self.buffers.draw_stride as usize;
            let mut bytes = vec![0_u8; stride * meshes.params.len()];
            for (chunk, params) in bytes.chunks_exact_mut(stride).zip(&meshes.params) {
                chunk[..std::mem::size_of::<DrawParams>()].copy_from_slice(bytemuck::bytes_of(params));
            }
            queue.write_buffer(&self.buffers.draws, 0, &bytes);
        }

        let programs = &self.programs;
        let buffers = &self.buffers;
        let commands = self.gpu.checked_blocking("encoding frame", |device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("facepaint-frame-encoder"),
            });

            {
                let mut pass = passes::begin_pass(&mut encoder, "facepaint-face-mask-pass", &[&targets.face_mask.view]);
                if let Some(range) = &meshes.face_oval {
                    pass.set_pipeline(&programs.face_mask);
                    pass.set_bind_group(0, &groups.face_mask, &[]);
                    pass.set_vertex_buffer(0, buffers.vertices.slice(..));
                    pass.draw(range.clone(), 0..1);
                }
            }

            fullscreen_pass(
                &mut encoder,
                "facepaint-contour-pass",
                &[&targets.contour[0].view],
                &programs.contour,
                &groups.contour,
            );
            fullscreen_pass(
                &mut encoder,
                "facepaint-blur-h-pass",
                &[&targets.contour[1].view],
                &programs.blur,
                &groups.blur_horizontal,
            );
            fullscreen_pass(
                &mut encoder,
                "facepaint-blur-v-pass",
                &[&targets.contour[0].view],
                &programs.blur,
                &groups.blur_vertical,
            );
            fullscreen_pass(
                &mut encoder,
                "facepaint-skin-pass",
                &[&targets.skin.view],
                &programs.skin,
                &groups.skin,
            );

            {
                let mut pass = passes::begin_pass(&mut encoder, "facepaint-makeup-pass", &[&targets.makeup.view]);
                pass.set_vertex_buffer(0, buffers.vertices.slice(..));
                for draw in &meshes.draws {
                    match draw.program {
                        DrawProgram::Pigment { effect, slot } => {
                            pass.set_pipeline(programs.makeup.for_effect(effect));
                            pass.set_bind_group(0, &groups.makeup, &[slot * buffers.draw_stride]);
                        }
                        DrawProgram::Protect => {
                            pass.set_pipeline(&programs.makeup.protect);
                            pass.set_bind_group(0, &groups.makeup, &[0]);
                        }
                    }
                    pass.draw(draw.vertices.clone(), 0..1);
                }
            }

            fullscreen_pass(
                &mut encoder,
                "facepaint-relight-pass",
                &[&targets.composite.view, &targets.beard.view],
                &programs.relight,
                &groups.relight,
            );
            fullscreen_pass(
                &mut encoder,
                "facepaint-present-pass",
                &[&targets.output.view],
                &programs.present,
                &groups.present,
            );
            encoder.finish()
        })?;
        self.gpu.queue.submit(Some(commands));

        self.frame_index += 1;
        self.has_output = true;
        Ok(RenderStats {
            frame_index: self.frame_index,
            source: Some(prepared.source),
            has_face: prepared.has_face(),
            makeup_draws: meshes.pigment_draws(),
            protected_draws: meshes.draws.len() - meshes.pigment_draws(),
            contour_segments: shapes.segment_count(),
            dropped_meshes: meshes.dropped,
            skipped_regions: geometry.map(|g| g.skipped.len()).unwrap_or(0),
        })
    }

    /// Copies the last presented frame back to the CPU. Blocks until the GPU
    /// is done; meant for still capture, not the steady-state loop.
    pub fn read_output(&self) -> Result<RgbaImage> {
        let sized = match &self.sized {
            Some(sized) if self.has_output => sized,
            _ => return Err(PipelineError::state("nothing has been rendered yet")),
        };
        let targets = &sized.targets;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("facepaint-readback-encoder"),
            });
        targets.copy_output(&mut encoder);
        self.gpu.queue.submit(Some(encoder.finish()));
        let pixels = targets.read_back(&self.gpu.device)?;
        RgbaImage::from_raw(targets.width, targets.height, pixels)
            .ok_or_else(|| PipelineError::readback("readback size does not match the output"))
    }

    /// The presented frame, for hosts that display it directly.
    pub fn output_texture(&self) -> Option<&wgpu::Texture> {
        self.sized.as_ref().map(|sized| &sized.targets.output.texture)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detector::{canonical_face, FacePose};
    use crate::exchange::FrameExchange;
    use crate::scheduler::FrameScheduler;
    use crate::tracking::FaceTracker;
    use crate::video::CameraFrame;

    fn prepared_with_face() -> PreparedFrame {
        let config = PipelineConfig::default();
        let exchange = FrameExchange::new();
        let mut tracker = FaceTracker::new(&config);
        let frame = CameraFrame::new(320, 240, vec![128; 320 * 240 * 4], 0.0).unwrap();
        let out = tracker.process(Some(canonical_face(&FacePose::default())), 0.0);
        exchange.submit_frame(frame, out.face, tracker.snapshot()).unwrap();
        let mut scheduler = FrameScheduler::new(&config.render);
        scheduler.prepare(exchange.acquire_latest(), 0.0).unwrap()
    }

    #[test]
    fn visualization_index_round_trips() {
        for mode in [
            VisualizationMode::Composite,
            VisualizationMode::ContourMask,
            VisualizationMode::HighlightMask,
            VisualizationMode::BeardMask,
            VisualizationMode::FaceMask,
        ] {
            assert_eq!(VisualizationMode::from_index(mode.index()), mode);
        }
        assert_eq!(VisualizationMode::from_index(99), VisualizationMode::Composite);
    }

    #[test]
    fn frame_meshes_pack_oval_pigment_and_protection() {
        let prepared = prepared_with_face();
        let style = StyleParameters::default();
        let meshes = FrameMeshes::collect(&prepared, &style, 16_384, 24);
        assert!(meshes.face_oval.is_some());
        assert!(meshes.pigment_draws() >= 5, "got {}", meshes.pigment_draws());
        assert!(meshes.draws.iter().any(|d| d.program == DrawProgram::Protect));
        assert_eq!(meshes.dropped, 0);
        for draw in &meshes.draws {
            assert!(draw.vertices.end as usize <= meshes.vertices.len());
        }
    }

    #[test]
    fn disabled_effects_are_not_drawn() {
        let prepared = prepared_with_face();
        let meshes = FrameMeshes::collect(&prepared, &StyleParameters::bare(), 16_384, 24);
        assert_eq!(meshes.pigment_draws(), 0);
        assert!(meshes.face_oval.is_some());
    }

    #[test]
    fn capacity_limits_drop_meshes_instead_of_failing() {
        let prepared = prepared_with_face();
        let style = StyleParameters::evening();
        let meshes = FrameMeshes::collect(&prepared, &style, 16_384, 2);
        assert_eq!(meshes.pigment_draws(), 2);
        assert!(meshes.dropped > 0);

        let tiny = FrameMeshes::collect(&prepared, &style, 3, 24);
        assert!(tiny.face_oval.is_none());
        assert!(tiny.dropped > 0);
    }
}
