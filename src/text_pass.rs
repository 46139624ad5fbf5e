//! Screen-space UI: ortho meshes first, then one quad batch per [`ScreenSpaceText`].
//!
//! Both are positioned in pixels with the origin at the viewport's top-left corner and
//! alpha blended over the chain image.

use crate::assets::{Assets, GlyphTable};
use crate::ecs::ScreenSpaceText;
use crate::frame_data::{ObjectArena, frame_layout_entry};
use crate::gpu::GpuContext;
use crate::mesh::Vertex3d;
use crate::post_process::carry_chain;
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::POST_FORMAT;
use crate::scene_view::SceneView;
use crate::texture::DefaultTextureSet;

const TEXT_SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/text.wgsl"),
);

const ORTHO_SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/ortho.wgsl"),
);

/// Vertex of a glyph quad, in pixels.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlyphVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl GlyphVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<GlyphVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            // uv
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
            // color
            wgpu::VertexAttribute {
                offset: 16,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x4,
            },
        ],
    };
}

/// Lays out `text` with glyphs from `table`, six vertices per visible glyph.
///
/// The atlas is rasterized at `table.size()` and scaled to `text.size`. The first line's
/// baseline sits `text.size` pixels below `text.position`; `'\n'` starts a new line.
/// Characters missing from the atlas advance by half the text size.
pub fn build_text_quads(table: &GlyphTable, text: &ScreenSpaceText) -> Vec<GlyphVertex> {
    let scale = text.size / table.size();
    let color = text.color.to_array();
    let origin_x = text.position.x as f32;
    let mut cursor_x = origin_x;
    let mut baseline = text.position.y as f32 + text.size;
    let mut vertices = Vec::with_capacity(text.text.len() * 6);

    for ch in text.text.chars() {
        if ch == '\n' {
            cursor_x = origin_x;
            baseline += table.line_height() * scale;
            continue;
        }
        let Some(glyph) = table.glyph(ch) else {
            cursor_x += text.size * 0.5;
            continue;
        };

        if glyph.width > 0 && glyph.height > 0 {
            let x0 = cursor_x + glyph.offset_x * scale;
            let x1 = x0 + glyph.width as f32 * scale;
            // offset_y is the glyph bottom's height above the baseline.
            let y1 = baseline - glyph.offset_y * scale;
            let y0 = y1 - glyph.height as f32 * scale;

            let [u, v, w, h] = glyph.uv;
            let corner = |x, y, u, v| GlyphVertex {
                position: [x, y],
                uv: [u, v],
                color,
            };
            vertices.extend_from_slice(&[
                corner(x0, y0, u, v),
                corner(x1, y0, u + w, v),
                corner(x0, y1, u, v + h),
                corner(x1, y0, u + w, v),
                corner(x1, y1, u + w, v + h),
                corner(x0, y1, u, v + h),
            ]);
        }

        cursor_x += glyph.advance * scale;
    }
    vertices
}

pub struct UiTextStage {
    frame_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    ortho_pipeline: wgpu::RenderPipeline,
    text_pipeline: wgpu::RenderPipeline,
}

impl UiTextStage {
    pub fn new(gpu: &GpuContext, objects: &ObjectArena) -> Self {
        let device = &gpu.device;
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("UI Frame Layout"),
            entries: &[frame_layout_entry(0)],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("UI Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("UI Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = |label: &str,
                        module: &wgpu::ShaderModule,
                        layouts: &[&wgpu::BindGroupLayout],
                        buffer: wgpu::VertexBufferLayout<'static>| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: layouts,
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs"),
                    buffers: &[buffer],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: POST_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                // Pixel space flips the winding; draw both sides.
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let ortho_module = gpu.shader("Ortho Shader", ORTHO_SHADER);
        let ortho_pipeline = pipeline(
            "Ortho Pipeline",
            &ortho_module,
            &[&frame_layout, objects.layout(), &texture_layout],
            Vertex3d::LAYOUT,
        );
        let text_module = gpu.shader("Text Shader", TEXT_SHADER);
        let text_pipeline = pipeline(
            "Text Pipeline",
            &text_module,
            &[&frame_layout, &texture_layout],
            GlyphVertex::LAYOUT,
        );

        Self {
            frame_layout,
            texture_layout,
            sampler,
            ortho_pipeline,
            text_pipeline,
        }
    }

    fn texture_group(&self, gpu: &GpuContext, view: &wgpu::TextureView) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("UI Texture Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn ortho_groups(
        &self,
        gpu: &GpuContext,
        view: &SceneView,
        assets: &Assets,
        defaults: &DefaultTextureSet,
    ) -> Vec<wgpu::BindGroup> {
        view.ortho()
            .iter()
            .map(|item| {
                let texture = item
                    .texture
                    .and_then(|id| assets.texture(id))
                    .map_or(&defaults.white.view, |texture| &texture.view);
                self.texture_group(gpu, texture)
            })
            .collect()
    }
}

/// One text's vertex range and its font's bind group.
struct TextBatch {
    range: std::ops::Range<u32>,
    group: wgpu::BindGroup,
}

impl RenderStage for UiTextStage {
    fn id(&self) -> StageId {
        StageId::UiText
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, io: &StageIo) {
        let (view, assets, objects) = (ctx.view, ctx.assets, ctx.objects);
        let Some(output) = carry_chain(ctx.encoder, ctx.targets, io) else {
            log::error!("UI stage has no chain routing; skipping");
            return;
        };
        if view.ortho().is_empty() && view.texts().is_empty() {
            return;
        }

        let ortho_groups = self.ortho_groups(ctx.gpu, view, assets, ctx.defaults);

        let mut vertices = Vec::new();
        let mut batches = Vec::new();
        for text in view.texts() {
            let Some(font) = assets.font(text.font) else {
                log::debug!("text references unknown font {:?}; skipping", text.font);
                continue;
            };
            let start = vertices.len() as u32;
            vertices.extend(build_text_quads(&font.table, text));
            let end = vertices.len() as u32;
            if end > start {
                batches.push(TextBatch {
                    range: start..end,
                    group: self.texture_group(ctx.gpu, &font.view),
                });
            }
        }
        let glyph_buffer = (!vertices.is_empty()).then(|| {
            use wgpu::util::DeviceExt;
            ctx.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Glyph Vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });

        let frame_group = ctx.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("UI Frame Bind Group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ctx.frame.buffer.as_entire_binding(),
            }],
        });

        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("UI Pass"),
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
        pass.set_bind_group(0, &frame_group, &[]);

        if !view.ortho().is_empty() {
            pass.set_pipeline(&self.ortho_pipeline);
            for (i, item) in view.ortho().iter().enumerate() {
                let Some(mesh) = assets.mesh(item.mesh) else {
                    log::debug!("ortho mesh {:?} not found; skipping", item.mesh);
                    continue;
                };
                let slot = ctx.slots.ortho.start + i;
                pass.set_bind_group(1, objects.bind_group(), &[ObjectArena::offset(slot)]);
                pass.set_bind_group(2, &ortho_groups[i], &[]);
                mesh.draw(&mut pass);
            }
        }

        if let Some(buffer) = &glyph_buffer {
            pass.set_pipeline(&self.text_pipeline);
            pass.set_vertex_buffer(0, buffer.slice(..));
            for batch in &batches {
                pass.set_bind_group(1, &batch.group, &[]);
                pass.draw(batch.range.clone(), 0..1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use glam::Vec4;

    use super::*;
    use crate::assets::{FontId, GlyphInfo};

    fn glyph(width: u32, height: u32, offset_y: f32, advance: f32) -> GlyphInfo {
        GlyphInfo {
            uv: [0.25, 0.5, 0.125, 0.25],
            width,
            height,
            offset_x: 1.0,
            offset_y,
            advance,
        }
    }

    fn table() -> GlyphTable {
        let mut glyphs = HashMap::new();
        glyphs.insert('A', glyph(8, 10, 0.0, 10.0));
        glyphs.insert('g', glyph(8, 10, -3.0, 9.0));
        glyphs.insert(' ', glyph(0, 0, 0.0, 5.0));
        GlyphTable::new(glyphs, 16.0, 20.0)
    }

    fn text(s: &str) -> ScreenSpaceText {
        ScreenSpaceText::new(FontId(0), s).at(100, 50)
    }

    #[test]
    fn one_quad_per_visible_glyph() {
        let quads = build_text_quads(&table(), &text("A gA"));
        // the space advances but draws nothing
        assert_eq!(quads.len(), 3 * 6);
    }

    #[test]
    fn glyphs_sit_on_the_baseline() {
        let quads = build_text_quads(&table(), &text("Ag"));
        let baseline = 50.0 + 16.0;

        let a = &quads[0..6];
        assert_eq!(a[0].position, [101.0, baseline - 10.0]);
        assert_eq!(a[4].position, [109.0, baseline]);

        // descender hangs 3 px below, starting after the first advance
        let g = &quads[6..12];
        assert_eq!(g[4].position, [100.0 + 10.0 + 9.0, baseline + 3.0]);
    }

    #[test]
    fn size_scales_the_atlas_metrics() {
        let mut big = text("AA");
        big.size = 32.0;
        let quads = build_text_quads(&table(), &big);
        let width = quads[4].position[0] - quads[0].position[0];
        assert_eq!(width, 16.0);
        // second glyph starts one scaled advance later
        assert_eq!(quads[6].position[0] - quads[0].position[0], 20.0);
    }

    #[test]
    fn uvs_span_the_atlas_cell_and_color_is_carried() {
        let quads = build_text_quads(&table(), &text("A").color(Vec4::new(1.0, 0.0, 0.0, 0.5)));
        assert_eq!(quads[0].uv, [0.25, 0.5]);
        assert_eq!(quads[4].uv, [0.375, 0.75]);
        assert!(quads.iter().all(|v| v.color == [1.0, 0.0, 0.0, 0.5]));
    }

    #[test]
    fn newline_returns_to_the_origin() {
        let quads = build_text_quads(&table(), &text("A\nA"));
        assert_eq!(quads.len(), 12);
        assert_eq!(quads[6].position[0], quads[0].position[0]);
        assert_eq!(quads[6].position[1] - quads[0].position[1], 20.0);
    }

    #[test]
    fn unknown_characters_advance_half_the_size() {
        let quads = build_text_quads(&table(), &text("~A"));
        assert_eq!(quads.len(), 6);
        assert_eq!(quads[0].position[0], 100.0 + 8.0 + 1.0);
    }
}
