//! Per-tile light culling on the GPU.
//!
//! One 16×16 workgroup per tile reduces the tile's pre-pass depth to a min/max slab,
//! builds the slab's six planes in world space, and tests every packed light's bounding
//! sphere against them. A second list for translucent surfaces swaps the min-depth plane
//! for the camera near plane, since glass in front of the opaque geometry (or over an
//! empty sky tile) still needs the lights around it. See [`TileGrid::tile_planes`].
//!
//! Each tile owns a `MAX_LIGHTS`-long slice of both index buffers, rewritten in full
//! every frame: surviving indices first, then `-1`.
//!
//! [`TileGrid::tile_planes`]: crate::tiling::TileGrid::tile_planes

use crate::frame_data::frame_layout_entry;
use crate::gpu::GpuContext;
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::TargetId;

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/light_culling.wgsl"),
);

pub struct LightCullingStage {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl LightCullingStage {
    pub fn new(gpu: &GpuContext) -> Self {
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Light Culling Layout"),
                entries: &[
                    frame_layout_entry(0),
                    storage(1, true),
                    storage(2, false),
                    storage(4, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                ],
            });
        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Light Culling Pipeline Layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let module = gpu.shader("Light Culling Shader", SHADER);
        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Light Culling Pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("cs"),
                compilation_options: Default::default(),
                cache: None,
            });

        Self { layout, pipeline }
    }
}

impl RenderStage for LightCullingStage {
    fn id(&self) -> StageId {
        StageId::LightCulling
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let grid = *ctx.lights.grid();
        let Some(depth) = ctx.targets.view(TargetId::DepthPrepass) else {
            log::error!("light culling skipped: no depth target");
            return;
        };
        let group = ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Light Culling Bind Group"),
            layout: &self.layout,
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
                    resource: ctx.lights.visible_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: ctx.lights.translucent_indices.as_entire_binding(),
                },
            ],
        });

        let mut pass = ctx.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Light Culling Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &group, &[]);
        pass.dispatch_workgroups(grid.work_groups_x, grid.work_groups_y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light_buffer::MAX_LIGHTS;
    use crate::tiling::TILE_SIZE;

    #[test]
    fn shader_agrees_with_cpu_constants() {
        assert!(SHADER.contains(&format!("const TILE_SIZE: u32 = {TILE_SIZE}u;")));
        assert!(SHADER.contains(&format!("const MAX_LIGHTS: u32 = {MAX_LIGHTS}u;")));
        assert!(SHADER.contains(&format!("@workgroup_size({TILE_SIZE}, {TILE_SIZE}, 1)")));
        assert!(SHADER.contains(&format!("array<i32, {MAX_LIGHTS}>")));
    }

    #[test]
    fn translucent_list_is_culled_from_the_near_plane() {
        assert!(SHADER.contains("@binding(4) var<storage, read_write> translucent_indices"));
        assert!(SHADER.contains("planes[6] = world_plane(vec4<f32>(0.0, 0.0, 1.0, 0.0));"));
        // the opaque min-depth plane only gates the opaque list
        assert!(SHADER.contains("if (dot(planes[4], center) >= -radius) {"));
        assert!(SHADER.contains("translucent_indices[base + j] = -1;"));
    }
}
