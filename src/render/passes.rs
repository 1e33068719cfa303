// src/render/passes.rs - shader programs, uniform buffers, and bind groups
use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use crate::geometry::{EffectKind, MeshVertex};
use crate::render::gpu::align_to;
use crate::render::targets::{RenderTargets, COLOR_FORMAT, CONTOUR_FORMAT, MASK_FORMAT};
use crate::render::uniforms::{
    BlurParams, ContourShapes, DrawParams, FrameGlobals, PresentParams, RelightParams, SkinParams,
};

pub const COMMON_WGSL: &str = include_str!("../../shaders/common.wgsl");
pub const FULLSCREEN_WGSL: &str = include_str!("../../shaders/fullscreen.wgsl");
pub const MESH_WGSL: &str = include_str!("../../shaders/mesh.wgsl");
pub const FACE_MASK_WGSL: &str = include_str!("../../shaders/face_mask.wgsl");
pub const CONTOUR_MASK_WGSL: &str = include_str!("../../shaders/contour_mask.wgsl");
pub const BLUR_WGSL: &str = include_str!("../../shaders/blur.wgsl");
pub const SKIN_WGSL: &str = include_str!("../../shaders/skin.wgsl");
pub const MAKEUP_WGSL: &str = include_str!("../../shaders/makeup.wgsl");
pub const RELIGHT_WGSL: &str = include_str!("../../shaders/relight.wgsl");
pub const PRESENT_WGSL: &str = include_str!("../../shaders/present.wgsl");

/// WGSL has no includes; pass bodies are prefixed with the shared sources.
pub fn fullscreen_source(body: &str) -> String {
    [COMMON_WGSL, FULLSCREEN_WGSL, body].join("\n")
}

pub fn mesh_source(body: &str) -> String {
    [COMMON_WGSL, MESH_WGSL, body].join("\n")
}

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32, 2 => Float32x2];

fn mesh_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &MESH_ATTRIBUTES,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry<T>(binding: u32, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

fn layout(device: &wgpu::Device, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    })
}

fn module(device: &wgpu::Device, label: &str, source: String) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn target(format: wgpu::TextureFormat, blend: Option<wgpu::BlendState>) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

fn pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    bind_group_layout: &wgpu::BindGroupLayout,
    fragment_entry: &str,
    vertex_buffers: &[wgpu::VertexBufferLayout],
    targets: &[Option<wgpu::ColorTargetState>],
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}-layout")),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{label}-pipeline")),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: vertex_buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: fragment_entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

const MAX_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Max,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Max,
    },
};

/// dst * (1 - src alpha): clears pigment under protected regions.
const CLEAR_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// One compiled program per effect kind, plus the destination-clearing
/// program for protected regions.
pub struct MakeupPrograms {
    lips: wgpu::RenderPipeline,
    eyeshadow: wgpu::RenderPipeline,
    blush: wgpu::RenderPipeline,
    liner: wgpu::RenderPipeline,
    sparkle: wgpu::RenderPipeline,
    pub protect: wgpu::RenderPipeline,
}

impl MakeupPrograms {
    pub fn for_effect(&self, effect: EffectKind) -> &wgpu::RenderPipeline {
        match effect {
            EffectKind::Lips => &self.lips,
            EffectKind::Eyeshadow => &self.eyeshadow,
            EffectKind::Blush => &self.blush,
            EffectKind::Liner => &self.liner,
            EffectKind::Sparkle => &self.sparkle,
        }
    }
}

/// Size-independent GPU state: layouts and compiled pipelines.
pub struct Programs {
    pub face_mask_layout: wgpu::BindGroupLayout,
    pub contour_layout: wgpu::BindGroupLayout,
    pub blur_layout: wgpu::BindGroupLayout,
    pub skin_layout: wgpu::BindGroupLayout,
    pub makeup_layout: wgpu::BindGroupLayout,
    pub relight_layout: wgpu::BindGroupLayout,
    pub present_layout: wgpu::BindGroupLayout,
    pub face_mask: wgpu::RenderPipeline,
    pub contour: wgpu::RenderPipeline,
    pub blur: wgpu::RenderPipeline,
    pub skin: wgpu::RenderPipeline,
    pub makeup: MakeupPrograms,
    pub relight: wgpu::RenderPipeline,
    pub present: wgpu::RenderPipeline,
}

impl Programs {
    pub fn new(device: &wgpu::Device) -> Self {
        let face_mask_layout = layout(device, "facepaint-face-mask-bgl", &[uniform_entry::<FrameGlobals>(0, false)]);
        let contour_layout = layout(
            device,
            "facepaint-contour-bgl",
            &[
                uniform_entry::<FrameGlobals>(0, false),
                uniform_entry::<ContourShapes>(1, false),
            ],
        );
        let blur_layout = layout(
            device,
            "facepaint-blur-bgl",
            &[texture_entry(0), sampler_entry(1), uniform_entry::<BlurParams>(2, false)],
        );
        let skin_layout = layout(
            device,
            "facepaint-skin-bgl",
            &[
                uniform_entry::<FrameGlobals>(0, false),
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                uniform_entry::<SkinParams>(4, false),
            ],
        );
        let makeup_layout = layout(
            device,
            "facepaint-makeup-bgl",
            &[
                uniform_entry::<FrameGlobals>(0, false),
                uniform_entry::<DrawParams>(1, true),
            ],
        );
        let relight_layout = layout(
            device,
            "facepaint-relight-bgl",
            &[
                uniform_entry::<FrameGlobals>(0, false),
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                texture_entry(4),
                texture_entry(5),
                uniform_entry::<RelightParams>(6, false),
            ],
        );
        let present_layout = layout(
            device,
            "facepaint-present-bgl",
            &[
                texture_entry(0),
                sampler_entry(1),
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                uniform_entry::<PresentParams>(5, false),
            ],
        );

        let mesh = [mesh_buffer_layout()];

        let face_mask_module = module(device, "facepaint-face-mask", mesh_source(FACE_MASK_WGSL));
        let face_mask = pipeline(
            device,
            "facepaint-face-mask",
            &face_mask_module,
            &face_mask_layout,
            "fs_main",
            &mesh,
            &[target(MASK_FORMAT, Some(MAX_BLEND))],
        );

        let contour_module = module(device, "facepaint-contour", fullscreen_source(CONTOUR_MASK_WGSL));
        let contour = pipeline(
            device,
            "facepaint-contour",
            &contour_module,
            &contour_layout,
            "fs_main",
            &[],
            &[target(CONTOUR_FORMAT, None)],
        );

        let blur_module = module(device, "facepaint-blur", fullscreen_source(BLUR_WGSL));
        let blur = pipeline(
            device,
            "facepaint-blur",
            &blur_module,
            &blur_layout,
            "fs_main",
            &[],
            &[target(CONTOUR_FORMAT, None)],
        );

        let skin_module = module(device, "facepaint-skin", fullscreen_source(SKIN_WGSL));
        let skin = pipeline(
            device,
            "facepaint-skin",
            &skin_module,
            &skin_layout,
            "fs_main",
            &[],
            &[target(COLOR_FORMAT, None)],
        );

        let makeup_module = module(device, "facepaint-makeup", mesh_source(MAKEUP_WGSL));
        let pigment = |entry: &str| {
            pipeline(
                device,
                &format!("facepaint-makeup-{}", entry.trim_start_matches("fs_")),
                &makeup_module,
                &makeup_layout,
                entry,
                &mesh,
                &[target(COLOR_FORMAT, Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING))],
            )
        };
        let makeup = MakeupPrograms {
            lips: pigment("fs_lips"),
            eyeshadow: pigment("fs_eyeshadow"),
            blush: pigment("fs_blush"),
            liner: pigment("fs_liner"),
            sparkle: pigment("fs_sparkle"),
            protect: pipeline(
                device,
                "facepaint-protect",
                &makeup_module,
                &makeup_layout,
                "fs_protect",
                &mesh,
                &[target(COLOR_FORMAT, Some(CLEAR_BLEND))],
            ),
        };

        let relight_module = module(device, "facepaint-relight", fullscreen_source(RELIGHT_WGSL));
        let relight = pipeline(
            device,
            "facepaint-relight",
            &relight_module,
            &relight_layout,
            "fs_main",
            &[],
            &[target(COLOR_FORMAT, None), target(MASK_FORMAT, None)],
        );

        let present_module = module(device, "facepaint-present", fullscreen_source(PRESENT_WGSL));
        let present = pipeline(
            device,
            "facepaint-present",
            &present_module,
            &present_layout,
            "fs_main",
            &[],
            &[target(COLOR_FORMAT, None)],
        );

        Self {
            face_mask_layout,
            contour_layout,
            blur_layout,
            skin_layout,
            makeup_layout,
            relight_layout,
            present_layout,
            face_mask,
            contour,
            blur,
            skin,
            makeup,
            relight,
            present,
        }
    }
}

fn uniform_buffer<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Uniform and vertex buffers, rewritten every frame with `queue.write_buffer`.
pub struct PassBuffers {
    pub globals: wgpu::Buffer,
    pub contour: wgpu::Buffer,
    pub blur_horizontal: wgpu::Buffer,
    pub blur_vertical: wgpu::Buffer,
    pub skin: wgpu::Buffer,
    pub relight: wgpu::Buffer,
    pub present: wgpu::Buffer,
    /// One `DrawParams` slot per makeup draw, `draw_stride` bytes apart.
    pub draws: wgpu::Buffer,
    pub draw_stride: u32,
    pub draw_slots: usize,
    pub vertices: wgpu::Buffer,
    pub vertex_capacity: usize,
}

impl PassBuffers {
    pub fn new(device: &wgpu::Device, draw_slots: usize, vertex_capacity: usize) -> Self {
        let draw_slots = draw_slots.max(1);
        let vertex_capacity = vertex_capacity.max(3);
        let draw_stride = align_to(
            std::mem::size_of::<DrawParams>() as u32,
            device.limits().min_uniform_buffer_offset_alignment,
        );
        Self {
            globals: uniform_buffer(device, "facepaint-globals", &FrameGlobals::zeroed()),
            contour: uniform_buffer(device, "facepaint-contour-shapes", &ContourShapes::empty()),
            blur_horizontal: uniform_buffer(device, "facepaint-blur-h", &BlurParams::horizontal(1.0)),
            blur_vertical: uniform_buffer(device, "facepaint-blur-v", &BlurParams::vertical(1.0)),
            skin: uniform_buffer(device, "facepaint-skin-params", &SkinParams::zeroed()),
            relight: uniform_buffer(device, "facepaint-relight-params", &RelightParams::zeroed()),
            present: uniform_buffer(device, "facepaint-present-params", &PresentParams::new(0)),
            draws: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("facepaint-draw-params"),
                size: u64::from(draw_stride) * draw_slots as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            draw_stride,
            draw_slots,
            vertices: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("facepaint-mesh-vertices"),
                size: (std::mem::size_of::<MeshVertex>() * vertex_capacity) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            vertex_capacity,
        }
    }
}

fn texture(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

fn buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Bind groups tying the programs to one set of render targets.
pub struct PassBindGroups {
    pub face_mask: wgpu::BindGroup,
    pub contour: wgpu::BindGroup,
    /// Reads contour[0], writes contour[1].
    pub blur_horizontal: wgpu::BindGroup,
    /// Reads contour[1], writes contour[0].
    pub blur_vertical: wgpu::BindGroup,
    pub skin: wgpu::BindGroup,
    pub makeup: wgpu::BindGroup,
    pub relight: wgpu::BindGroup,
    pub present: wgpu::BindGroup,
}

impl PassBindGroups {
    pub fn new(
        device: &wgpu::Device,
        programs: &Programs,
        buffers: &PassBuffers,
        targets: &RenderTargets,
        sampler: &wgpu::Sampler,
    ) -> Self {
        let sampler_at = |binding: u32| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::Sampler(sampler),
        };
        let group = |label: &str, layout: &wgpu::BindGroupLayout, entries: &[wgpu::BindGroupEntry]| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries,
            })
        };

        let draw_binding = wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffers.draws,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<DrawParams>() as u64),
            }),
        };

        Self {
            face_mask: group(
                "facepaint-face-mask-bg",
                &programs.face_mask_layout,
                &[buffer(0, &buffers.globals)],
            ),
            contour: group(
                "facepaint-contour-bg",
                &programs.contour_layout,
                &[buffer(0, &buffers.globals), buffer(1, &buffers.contour)],
            ),
            blur_horizontal: group(
                "facepaint-blur-h-bg",
                &programs.blur_layout,
                &[
                    texture(0, &targets.contour[0].view),
                    sampler_at(1),
                    buffer(2, &buffers.blur_horizontal),
                ],
            ),
            blur_vertical: group(
                "facepaint-blur-v-bg",
                &programs.blur_layout,
                &[
                    texture(0, &targets.contour[1].view),
                    sampler_at(1),
                    buffer(2, &buffers.blur_vertical),
                ],
            ),
            skin: group(
                "facepaint-skin-bg",
                &programs.skin_layout,
                &[
                    buffer(0, &buffers.globals),
                    texture(1, &targets.camera.view),
                    sampler_at(2),
                    texture(3, &targets.face_mask.view),
                    buffer(4, &buffers.skin),
                ],
            ),
            makeup: group(
                "facepaint-makeup-bg",
                &programs.makeup_layout,
                &[buffer(0, &buffers.globals), draw_binding],
            ),
            relight: group(
                "facepaint-relight-bg",
                &programs.relight_layout,
                &[
                    buffer(0, &buffers.globals),
                    texture(1, &targets.skin.view),
                    sampler_at(2),
                    texture(3, &targets.makeup.view),
                    texture(4, &targets.contour[0].view),
                    texture(5, &targets.face_mask.view),
                    buffer(6, &buffers.relight),
                ],
            ),
            present: group(
                "facepaint-present-bg",
                &programs.present_layout,
                &[
                    texture(0, &targets.composite.view),
                    sampler_at(1),
                    texture(2, &targets.contour[0].view),
                    texture(3, &targets.face_mask.view),
                    texture(4, &targets.beard.view),
                    buffer(5, &buffers.present),
                ],
            ),
        }
    }
}

/// Begins a pass that clears `views` to transparent and stores the result.
pub fn begin_pass<'a>(
    encoder: &'a mut wgpu::CommandEncoder,
    label: &str,
    views: &[&'a wgpu::TextureView],
) -> wgpu::RenderPass<'a> {
    let attachments: Vec<Option<wgpu::RenderPassColorAttachment<'a>>> = views
        .iter()
        .map(|&view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })
        })
        .collect();
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &attachments,
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    })
}

/// Records a full-screen triangle draw into a fresh pass.
pub fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    views: &[&wgpu::TextureView],
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut pass = begin_pass(encoder, label, views);
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pass_source_has_its_entry_points() {
        for body in [CONTOUR_MASK_WGSL, BLUR_WGSL, SKIN_WGSL, RELIGHT_WGSL, PRESENT_WGSL] {
            let source = fullscreen_source(body);
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
        let makeup = mesh_source(MAKEUP_WGSL);
        for entry in ["fn fs_lips", "fn fs_eyeshadow", "fn fs_blush", "fn fs_liner", "fn fs_sparkle", "fn fs_protect"] {
            assert!(makeup.contains(entry), "missing {entry}");
        }
        assert!(mesh_source(FACE_MASK_WGSL).contains("fn fs_main"));
    }

    #[test]
    fn shared_feather_curve_constants_match_the_cpu_reference() {
        let inner = format!("const FEATHER_INNER_RAMP: f32 = {:.2};", crate::shading::FEATHER_INNER_RAMP);
        let outer = format!("const FEATHER_OUTER_RAMP: f32 = {:.2};", crate::shading::FEATHER_OUTER_RAMP);
        let core = format!("const STRIP_CORE_FRACTION: f32 = {:.2};", crate::shading::STRIP_CORE_FRACTION);
        assert!(COMMON_WGSL.contains(&inner));
        assert!(COMMON_WGSL.contains(&outer));
        assert!(COMMON_WGSL.contains(&core));
    }

    #[test]
    fn mesh_vertex_layout_matches_the_struct() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 20);
        assert_eq!(MESH_ATTRIBUTES[1].offset, 8);
        assert_eq!(MESH_ATTRIBUTES[2].offset, 12);
    }
}
