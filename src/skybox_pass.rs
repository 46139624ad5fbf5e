//! Draws the environment cube behind everything the opaque stage left uncovered.

use crate::frame_data::{FrameBuffer, frame_layout_entry};
use crate::gpu::GpuContext;
use crate::ibl::{IblMaps, source_group, source_layout};
use crate::mesh::{Mesh, Vertex3d};
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{DEPTH_FORMAT, HDR_FORMAT, TargetId};

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/skybox.wgsl"),
);

pub struct SkyboxStage {
    frame_layout: wgpu::BindGroupLayout,
    environment_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
    cube: Mesh,
}

impl SkyboxStage {
    pub fn new(gpu: &GpuContext, ibl: &IblMaps) -> Self {
        let frame_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Skybox Frame Layout"),
                entries: &[frame_layout_entry(0)],
            });
        let environment_layout = source_layout(gpu, wgpu::TextureViewDimension::Cube);
        let environment_group =
            source_group(gpu, &environment_layout, &ibl.environment.view, &ibl.sampler);

        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Skybox Pipeline Layout"),
                bind_group_layouts: &[&frame_layout, &environment_layout],
                push_constant_ranges: &[],
            });
        let module = gpu.shader("Skybox Shader", SHADER);
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Skybox Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[Vertex3d::POSITION_LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: HDR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                // Seen from inside.
                primitive: wgpu::PrimitiveState {
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Self {
            frame_layout,
            environment_group,
            pipeline,
            cube: Mesh::cube(gpu),
        }
    }

    fn frame_group(&self, gpu: &GpuContext, frame: &FrameBuffer) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Skybox Frame Bind Group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.buffer.as_entire_binding(),
            }],
        })
    }
}

impl RenderStage for SkyboxStage {
    fn id(&self) -> StageId {
        StageId::Skybox
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let targets = ctx.targets;
        let (Some(hdr), Some(depth)) = (
            targets.view(TargetId::Hdr),
            targets.view(TargetId::DepthPrepass),
        ) else {
            log::error!("skybox skipped: render targets missing");
            return;
        };
        let frame_group = self.frame_group(ctx.gpu, ctx.frame);
        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Skybox Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: hdr,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &frame_group, &[]);
        pass.set_bind_group(1, &self.environment_group, &[]);
        self.cube.draw(&mut pass);
    }
}
