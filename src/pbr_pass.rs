//! Tiled PBR lighting for opaque and translucent geometry.
//!
//! Both stages share one shader and one set of layouts; they differ in their fragment
//! entry point, their color targets and blending.
//!
//! # Bind groups
//!
//! - **Group 0**: frame uniforms, the packed light array and the per-tile light indices
//!   written by the culling stage (the opaque list, or for translucent geometry the list
//!   culled from the camera near plane)
//! - **Group 1**: per-object uniforms, addressed with a dynamic offset into the object arena
//! - **Group 2**: the six material maps and their sampler; absent maps are replaced by the
//!   [`DefaultTextureSet`]
//! - **Group 3**: irradiance, pre-filtered and BRDF maps, bound once at construction
//!
//! # Depth
//!
//! Depth is already resolved by the pre-pass. Both stages test against it with
//! `LessEqual` and never write it, so every opaque pixel is shaded exactly once.

use crate::assets::Assets;
use crate::ecs::Material;
use crate::frame_data::{ObjectArena, frame_layout_entry};
use crate::gpu::GpuContext;
use crate::ibl::IblMaps;
use crate::mesh::Vertex3d;
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{DEPTH_FORMAT, HDR_FORMAT, NORMAL_FORMAT, TargetId};
use crate::scene_view::DrawItem;
use crate::texture::{DefaultTextureSet, MapSlot};

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/pbr.wgsl"),
);

/// Builds the per-draw material bind group (group 2).
pub struct MaterialBinder {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl MaterialBinder {
    pub fn new(gpu: &GpuContext) -> Self {
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..MapSlot::ALL.len() as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: MapSlot::ALL.len() as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Material Layout"),
                entries: &entries,
            });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self { layout, sampler }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(
        &self,
        gpu: &GpuContext,
        assets: &Assets,
        defaults: &DefaultTextureSet,
        material: &Material,
    ) -> wgpu::BindGroup {
        let views: Vec<&wgpu::TextureView> = MapSlot::ALL
            .iter()
            .zip(material.maps.slots())
            .map(|(&slot, id)| defaults.resolve(slot, id.and_then(|id| assets.texture(id))))
            .collect();

        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: views.len() as u32,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });

        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Bind Group"),
            layout: &self.layout,
            entries: &entries,
        })
    }
}

/// Which half of the lighting work a [`LightingStage`] does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightingVariant {
    /// Writes radiance and view-space normals; clears the HDR target.
    Opaque,
    /// Blends over the HDR target, farthest draw first.
    Translucent,
}

pub struct LightingStage {
    variant: LightingVariant,
    light_layout: wgpu::BindGroupLayout,
    materials: MaterialBinder,
    ibl_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
}

impl LightingStage {
    pub fn new(
        gpu: &GpuContext,
        variant: LightingVariant,
        objects: &ObjectArena,
        ibl: &IblMaps,
    ) -> Self {
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
                label: Some("Lighting Frame Layout"),
                entries: &[frame_layout_entry(0), storage(1), storage(2)],
            });
        let materials = MaterialBinder::new(gpu);
        let ibl_layout = IblMaps::layout(gpu);
        let ibl_group = ibl.bind_group(gpu, &ibl_layout);

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Lighting Pipeline Layout"),
                bind_group_layouts: &[
                    &light_layout,
                    objects.layout(),
                    materials.layout(),
                    &ibl_layout,
                ],
                push_constant_ranges: &[],
            });

        let module = gpu.shader("PBR Shader", SHADER);
        let hdr = wgpu::ColorTargetState {
            format: HDR_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        };
        let (entry_point, targets, cull_mode) = match variant {
            LightingVariant::Opaque => {
                let normal = wgpu::ColorTargetState {
                    format: NORMAL_FORMAT,
                    ..hdr.clone()
                };
                ("fs_opaque", vec![Some(hdr), Some(normal)], Some(wgpu::Face::Back))
            }
            LightingVariant::Translucent => {
                let blended = wgpu::ColorTargetState {
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    ..hdr
                };
                ("fs_translucent", vec![Some(blended)], None)
            }
        };

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(match variant {
                    LightingVariant::Opaque => "Opaque Lighting Pipeline",
                    LightingVariant::Translucent => "Translucent Lighting Pipeline",
                }),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[Vertex3d::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(entry_point),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
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
            variant,
            light_layout,
            materials,
            ibl_group,
            pipeline,
        }
    }

    fn light_group(&self, ctx: &FrameContext<'_>) -> wgpu::BindGroup {
        let indices = match self.variant {
            LightingVariant::Opaque => &ctx.lights.visible_indices,
            LightingVariant::Translucent => &ctx.lights.translucent_indices,
        };
        ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lighting Frame Bind Group"),
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
                    resource: indices.as_entire_binding(),
                },
            ],
        })
    }
}

impl RenderStage for LightingStage {
    fn id(&self) -> StageId {
        match self.variant {
            LightingVariant::Opaque => StageId::OpaqueLighting,
            LightingVariant::Translucent => StageId::Translucent,
        }
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let (view, assets, objects, targets) = (ctx.view, ctx.assets, ctx.objects, ctx.targets);
        let (items, first_slot) = match self.variant {
            LightingVariant::Opaque => (view.opaque(), ctx.slots.opaque.start),
            LightingVariant::Translucent => (view.translucent(), ctx.slots.translucent.start),
        };
        // The opaque stage always runs so the HDR target is cleared even for empty scenes.
        if items.is_empty() && self.variant == LightingVariant::Translucent {
            return;
        }
        let (Some(hdr), Some(normal), Some(depth)) = (
            targets.view(TargetId::Hdr),
            targets.hdr_normal(),
            targets.view(TargetId::DepthPrepass),
        ) else {
            log::error!("{:?} lighting skipped: render targets missing", self.variant);
            return;
        };

        let light_group = self.light_group(ctx);
        let material_groups: Vec<wgpu::BindGroup> = items
            .iter()
            .map(|item| {
                self.materials
                    .bind_group(ctx.gpu, assets, ctx.defaults, &item.material)
            })
            .collect();

        let clear = ctx.clear_color;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = match self.variant
        {
            LightingVariant::Opaque => vec![
                Some(wgpu::RenderPassColorAttachment {
                    view: hdr,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                }),
                Some(wgpu::RenderPassColorAttachment {
                    view: normal,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                }),
            ],
            LightingVariant::Translucent => vec![Some(wgpu::RenderPassColorAttachment {
                view: hdr,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
        };

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(match self.variant {
                LightingVariant::Opaque => "Opaque Lighting Pass",
                LightingVariant::Translucent => "Translucent Lighting Pass",
            }),
            color_attachments: &color_attachments,
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
        pass.set_bind_group(3, &self.ibl_group, &[]);
        draw_items(
            &mut pass,
            assets,
            objects,
            items,
            first_slot,
            |pass, i| pass.set_bind_group(2, &material_groups[i], &[]),
        );
    }
}

/// Issues one draw per item, binding its object slot at group 1. Items whose mesh is
/// unknown are skipped.
pub(crate) fn draw_items(
    pass: &mut wgpu::RenderPass<'_>,
    assets: &Assets,
    objects: &ObjectArena,
    items: &[DrawItem],
    first_slot: usize,
    mut per_item: impl FnMut(&mut wgpu::RenderPass<'_>, usize),
) {
    for (i, item) in items.iter().enumerate() {
        let Some(mesh) = assets.mesh(item.mesh) else {
            log::debug!("skipping draw of {:?}: unknown mesh {:?}", item.entity, item.mesh);
            continue;
        };
        if mesh.is_empty() {
            continue;
        }
        pass.set_bind_group(1, objects.bind_group(), &[ObjectArena::offset(first_slot + i)]);
        per_item(pass, i);
        mesh.draw(pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_position_matches_the_prepass() {
        // The pre-pass computes `object.clip_from_model * position` the same way.
        assert!(SHADER.contains("@builtin(position) @invariant position: vec4<f32>"));
        assert!(
            SHADER.contains("out.position = object.clip_from_model * vec4<f32>(in.position, 1.0);")
        );
    }

    #[test]
    fn both_variants_read_indices_at_binding_two() {
        assert!(SHADER.contains("@group(0) @binding(2) var<storage, read> visible_indices"));
        assert!(SHADER.contains("@fragment\nfn fs_translucent"));
    }
}
