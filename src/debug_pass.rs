//! Draws the frame's [`DebugLines`](crate::DebugLines) over the tonemapped image.

use crate::debug_draw::LineVertex;
use crate::frame_data::frame_layout_entry;
use crate::gpu::GpuContext;
use crate::post_process::carry_chain;
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::POST_FORMAT;

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/debug_lines.wgsl"),
);

pub struct DebugOverlayStage {
    frame_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl DebugOverlayStage {
    pub fn new(gpu: &GpuContext) -> Self {
        let frame_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Debug Lines Frame Layout"),
                entries: &[frame_layout_entry(0)],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Debug Lines Pipeline Layout"),
                bind_group_layouts: &[&frame_layout],
                push_constant_ranges: &[],
            });
        let module = gpu.shader("Debug Lines Shader", SHADER);
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Debug Lines Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[LineVertex::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: POST_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::LineList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Self {
            frame_layout,
            pipeline,
        }
    }
}

impl RenderStage for DebugOverlayStage {
    fn id(&self) -> StageId {
        StageId::DebugOverlay
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, io: &StageIo) {
        let Some(output) = carry_chain(ctx.encoder, ctx.targets, io) else {
            log::error!("debug overlay has no chain routing; skipping");
            ctx.debug_lines.clear();
            return;
        };
        if ctx.debug_lines.is_empty() {
            return;
        }

        use wgpu::util::DeviceExt;
        let vertices = ctx
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Debug Line Vertices"),
                contents: bytemuck::cast_slice(ctx.debug_lines.vertices()),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let vertex_count = ctx.debug_lines.vertices().len() as u32;
        ctx.debug_lines.clear();

        let frame_group = ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Debug Lines Frame Bind Group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ctx.frame.buffer.as_entire_binding(),
            }],
        });

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Debug Lines Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &frame_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(0..vertex_count, 0..1);
    }
}
