//! Camera-facing billboards for particles and spritesheets.
//!
//! Runs after translucent geometry. Each [`BillboardBatch`] becomes one instanced draw
//! of six vertices per quad, alpha blended over the HDR target and depth tested against
//! the pre-pass without writing. Lit billboards shade against the translucent light list
//! and the irradiance cube with a normal facing the camera.

use crate::frame_data::frame_layout_entry;
use crate::gpu::GpuContext;
use crate::ibl::{IblMaps, source_group, source_layout};
use crate::particles::BillboardInstance;
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{DEPTH_FORMAT, HDR_FORMAT, TargetId};
use crate::scene_view::BillboardBatch;

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/particles.wgsl"),
);

/// Vertices per billboard quad, generated in the vertex shader.
pub const QUAD_VERTICES: u32 = 6;

/// Instance ranges of each batch inside one packed instance buffer.
pub fn batch_ranges(batches: &[BillboardBatch]) -> Vec<std::ops::Range<u32>> {
    let mut start = 0;
    batches
        .iter()
        .map(|batch| {
            let end = start + batch.instances.len() as u32;
            let range = start..end;
            start = end;
            range
        })
        .collect()
}

pub struct ParticleStage {
    light_layout: wgpu::BindGroupLayout,
    sprite_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    irradiance_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
}

impl ParticleStage {
    pub fn new(gpu: &GpuContext, ibl: &IblMaps) -> Self {
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let light_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Particle Frame Layout"),
                entries: &[frame_layout_entry(0), storage(1), storage(2)],
            });
        let sprite_layout = source_layout(gpu, wgpu::TextureViewDimension::D2);
        let irradiance_layout = source_layout(gpu, wgpu::TextureViewDimension::Cube);
        let irradiance_group =
            source_group(gpu, &irradiance_layout, &ibl.irradiance.view, &ibl.sampler);
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Particle Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Particle Pipeline Layout"),
                bind_group_layouts: &[&light_layout, &sprite_layout, &irradiance_layout],
                push_constant_ranges: &[],
            });
        let module = gpu.shader("Particle Shader", SHADER);
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Particle Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[BillboardInstance::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: HDR_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                // Quads always face the camera; winding depends on the view.
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
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
            light_layout,
            sprite_layout,
            sampler,
            irradiance_group,
            pipeline,
        }
    }

    fn light_group(&self, ctx: &FrameContext<'_>) -> wgpu::BindGroup {
        ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Frame Bind Group"),
            layout: &self.light_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ctx.frame.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: ctx.lights.lights.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: ctx.lights.translucent_indices.as_entire_binding(),
                },
            ],
        })
    }
}

impl RenderStage for ParticleStage {
    fn id(&self) -> StageId {
        StageId::Particles
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let (view, assets, targets) = (ctx.view, ctx.assets, ctx.targets);
        let batches = view.billboards();
        if batches.is_empty() {
            return;
        }
        let (Some(hdr), Some(depth)) = (
            targets.view(TargetId::Hdr),
            targets.view(TargetId::DepthPrepass),
        ) else {
            log::error!("particles skipped: render targets missing");
            return;
        };

        let instances: Vec<BillboardInstance> = batches
            .iter()
            .flat_map(|batch| batch.instances.iter().copied())
            .collect();
        let instance_buffer = {
            use wgpu::util::DeviceExt;
            ctx.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Billboard Instances"),
                    contents: bytemuck::cast_slice(&instances),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        };
        let sprite_groups: Vec<wgpu::BindGroup> = batches
            .iter()
            .map(|batch| {
                let texture = batch
                    .texture
                    .and_then(|id| assets.texture(id))
                    .map_or(&ctx.defaults.white.view, |texture| &texture.view);
                source_group(ctx.gpu, &self.sprite_layout, texture, &self.sampler)
            })
            .collect();
        let light_group = self.light_group(ctx);

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Particle Pass"),
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
        pass.set_bind_group(0, &light_group, &[]);
        pass.set_bind_group(2, &self.irradiance_group, &[]);
        pass.set_vertex_buffer(0, instance_buffer.slice(..));
        for (range, group) in batch_ranges(batches).into_iter().zip(&sprite_groups) {
            pass.set_bind_group(1, group, &[]);
            pass.draw(0..QUAD_VERTICES, range);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::WHOLE_TEXTURE;
    use glam::{Vec2, Vec3, Vec4};

    fn batch(count: usize) -> BillboardBatch {
        BillboardBatch {
            texture: None,
            instances: vec![
                BillboardInstance::new(Vec3::ZERO, Vec2::ONE, WHOLE_TEXTURE, Vec4::ONE, 1.0);
                count
            ],
        }
    }

    #[test]
    fn batches_pack_back_to_back() {
        let ranges = batch_ranges(&[batch(3), batch(1), batch(4)]);
        assert_eq!(ranges, vec![0..3, 3..4, 4..8]);
    }

    #[test]
    fn shader_matches_instance_layout() {
        assert_eq!(BillboardInstance::LAYOUT.attributes.len(), 4);
        assert_eq!(BillboardInstance::LAYOUT.attributes[3].offset, 48);
        assert!(SHADER.contains("@location(3) color: vec4<f32>"));
        assert!(SHADER.contains(&format!("array<vec2<f32>, {QUAD_VERTICES}>")));
    }

    #[test]
    fn particles_shade_with_the_tile_light_list() {
        assert!(SHADER.contains("@group(0) @binding(2) var<storage, read> visible_indices"));
        assert!(SHADER.contains("let base = (tile.y * frame.counts.z + tile.x) * MAX_LIGHTS;"));
    }
}
