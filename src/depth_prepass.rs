//! Depth-only pass over the opaque queue.

use crate::ecs::Material;
use crate::frame_data::{ObjectArena, frame_layout_entry};
use crate::gpu::GpuContext;
use crate::mesh::Vertex3d;
use crate::pbr_pass::{MaterialBinder, draw_items};
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{DEPTH_FORMAT, TargetId};

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/depth_prepass.wgsl"),
);

/// Whether a draw can discard fragments and therefore needs the alpha-tested pipeline.
pub fn needs_alpha_mask(material: &Material) -> bool {
    material.maps.albedo.is_some() || material.albedo.w < material.opacity_mask_threshold
}

pub struct DepthPrepassStage {
    frame_layout: wgpu::BindGroupLayout,
    materials: MaterialBinder,
    solid: wgpu::RenderPipeline,
    masked: wgpu::RenderPipeline,
}

impl DepthPrepassStage {
    pub fn new(gpu: &GpuContext, objects: &ObjectArena) -> Self {
        let frame_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Depth Prepass Frame Layout"),
                entries: &[frame_layout_entry(0)],
            });
        let materials = MaterialBinder::new(gpu);
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Depth Prepass Pipeline Layout"),
                bind_group_layouts: &[&frame_layout, objects.layout(), materials.layout()],
                push_constant_ranges: &[],
            });
        let module = gpu.shader("Depth Prepass Shader", SHADER);

        let pipeline = |label, vertex_entry, fragment_entry: Option<&str>, layout_buffer| {
            gpu.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some(vertex_entry),
                        buffers: &[layout_buffer],
                        compilation_options: Default::default(),
                    },
                    fragment: fragment_entry.map(|entry| wgpu::FragmentState {
                        module: &module,
                        entry_point: Some(entry),
                        targets: &[],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: Some(wgpu::Face::Back),
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare: wgpu::CompareFunction::Less,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
        };
        let solid = pipeline("Depth Prepass Pipeline", "vs", None, Vertex3d::POSITION_LAYOUT);
        let masked = pipeline(
            "Masked Depth Prepass Pipeline",
            "vs_masked",
            Some("fs_masked"),
            Vertex3d::LAYOUT,
        );

        Self {
            frame_layout,
            materials,
            solid,
            masked,
        }
    }
}

impl RenderStage for DepthPrepassStage {
    fn id(&self) -> StageId {
        StageId::DepthPrePass
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let (view, assets, objects, targets) = (ctx.view, ctx.assets, ctx.objects, ctx.targets);
        let Some(depth) = targets.view(TargetId::DepthPrepass) else {
            log::error!("depth prepass skipped: no depth target");
            return;
        };
        let items = view.opaque();
        let masked: Vec<Option<wgpu::BindGroup>> = items
            .iter()
            .map(|item| {
                needs_alpha_mask(&item.material).then(|| {
                    self.materials
                        .bind_group(ctx.gpu, assets, ctx.defaults, &item.material)
                })
            })
            .collect();
        let frame_group = ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Prepass Frame Bind Group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ctx.frame.buffer.as_entire_binding(),
            }],
        });

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Prepass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &frame_group, &[]);
        draw_items(&mut pass, assets, objects, items, ctx.slots.opaque.start, |pass, i| {
            match &masked[i] {
                Some(group) => {
                    pass.set_pipeline(&self.masked);
                    pass.set_bind_group(2, group, &[]);
                }
                None => pass.set_pipeline(&self.solid),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{MaterialMaps, TextureId};
    use glam::Vec4;

    #[test]
    fn plain_materials_skip_the_mask() {
        assert!(!needs_alpha_mask(&Material::default()));
    }

    #[test]
    fn albedo_maps_and_low_alpha_need_the_mask() {
        let textured = Material::default().maps(MaterialMaps {
            albedo: Some(TextureId(0)),
            ..Default::default()
        });
        assert!(needs_alpha_mask(&textured));

        let faded = Material::default().albedo(Vec4::new(1.0, 1.0, 1.0, 0.2));
        assert!(needs_alpha_mask(&faded));
    }

    #[test]
    fn clip_positions_are_invariant() {
        assert!(SHADER.contains("-> @builtin(position) @invariant vec4<f32>"));
        assert!(SHADER.contains("@builtin(position) @invariant position: vec4<f32>"));
    }
}
