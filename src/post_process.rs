//! Full-screen passes: depth linearization, tonemapping and the final gamma curve.
//!
//! Every pass draws one triangle covering the target and reads its inputs with
//! `textureLoad`, so no sampler is involved and depth, float and 16-bit targets can all
//! be fed in directly.
//!
//! Bind groups:
//! - **Group 0**: frame uniforms (near/far, exposure, screen size)
//! - **Group 1**: the pass inputs, in the order given to [`FullscreenPass::new`]
//! - **Group 2+**: pass-specific extras (the SSAO kernel)

use crate::frame_data::{FrameBuffer, frame_layout_entry};
use crate::gpu::GpuContext;
use crate::render_graph::{ChainOutput, FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{LINEAR_DEPTH_FORMAT, POST_FORMAT, RenderTargetSet, TargetId};

/// How a full-screen pass binds one of its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Color,
    Depth,
}

impl InputKind {
    fn sample_type(self) -> wgpu::TextureSampleType {
        match self {
            InputKind::Color => wgpu::TextureSampleType::Float { filterable: false },
            InputKind::Depth => wgpu::TextureSampleType::Depth,
        }
    }
}

/// A full-screen triangle pipeline writing one color target.
pub struct FullscreenPass {
    label: String,
    frame_layout: wgpu::BindGroupLayout,
    input_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl FullscreenPass {
    pub fn new(
        gpu: &GpuContext,
        label: &str,
        source: &str,
        inputs: &[InputKind],
        extra_layouts: &[&wgpu::BindGroupLayout],
        format: wgpu::TextureFormat,
    ) -> Self {
        let frame_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Fullscreen Frame Layout"),
                entries: &[frame_layout_entry(0)],
            });
        let input_entries: Vec<wgpu::BindGroupLayoutEntry> = inputs
            .iter()
            .enumerate()
            .map(|(binding, kind)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: kind.sample_type(),
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        let input_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Fullscreen Input Layout"),
                entries: &input_entries,
            });

        let mut layouts = vec![&frame_layout, &input_layout];
        layouts.extend_from_slice(extra_layouts);
        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let module = gpu.shader(label, source);
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Self {
            label: label.to_string(),
            frame_layout,
            input_layout,
            pipeline,
        }
    }

    pub fn frame_group(&self, gpu: &GpuContext, frame: &FrameBuffer) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fullscreen Frame Bind Group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.buffer.as_entire_binding(),
            }],
        })
    }

    pub fn input_group(&self, gpu: &GpuContext, views: &[&wgpu::TextureView]) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fullscreen Input Bind Group"),
            layout: &self.input_layout,
            entries: &entries,
        })
    }

    /// Records the pass: `groups` are bound from index 0 in order.
    pub fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        groups: &[&wgpu::BindGroup],
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (index, group) in groups.iter().enumerate() {
            pass.set_bind_group(index as u32, *group, &[]);
        }
        pass.draw(0..3, 0..1);
    }
}

/// Copies the chain input into the stage's chain output so an overlay stage can draw on
/// top with `LoadOp::Load`. Returns the output view, or `None` when the stage is not
/// routed between two chain targets.
pub(crate) fn carry_chain<'t>(
    encoder: &mut wgpu::CommandEncoder,
    targets: &'t RenderTargetSet,
    io: &StageIo,
) -> Option<&'t wgpu::TextureView> {
    let input = io.chain_input?;
    let Some(ChainOutput::Target(output)) = io.chain_output else {
        return None;
    };
    let (source, destination) = (targets.texture(input)?, targets.texture(output)?);
    let (width, height) = targets.size();
    encoder.copy_texture_to_texture(
        source.as_image_copy(),
        destination.as_image_copy(),
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    targets.view(output)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostEffect {
    /// Pre-pass depth to view distance in the linear depth target.
    LinearizeDepth,
    /// `1 - exp(-hdr * exposure)`, entering the post chain.
    Tonemap,
    /// The 2.2 curve, from the chain to the surface.
    Gamma,
}

impl PostEffect {
    pub fn stage_id(self) -> StageId {
        match self {
            PostEffect::LinearizeDepth => StageId::LinearizeDepth,
            PostEffect::Tonemap => StageId::Tonemap,
            PostEffect::Gamma => StageId::Gamma,
        }
    }

    pub fn output_format(self, surface: wgpu::TextureFormat) -> wgpu::TextureFormat {
        match self {
            PostEffect::LinearizeDepth => LINEAR_DEPTH_FORMAT,
            PostEffect::Tonemap => POST_FORMAT,
            PostEffect::Gamma => surface,
        }
    }

    fn input(self) -> InputKind {
        match self {
            PostEffect::LinearizeDepth => InputKind::Depth,
            PostEffect::Tonemap | PostEffect::Gamma => InputKind::Color,
        }
    }

    fn source(self) -> &'static str {
        match self {
            PostEffect::LinearizeDepth => concat!(
                include_str!("shaders/common.wgsl"),
                include_str!("shaders/linearize_depth.wgsl"),
            ),
            PostEffect::Tonemap => concat!(
                include_str!("shaders/common.wgsl"),
                include_str!("shaders/tonemap.wgsl"),
            ),
            PostEffect::Gamma => concat!(
                include_str!("shaders/common.wgsl"),
                include_str!("shaders/gamma.wgsl"),
            ),
        }
    }
}

pub struct PostStage {
    effect: PostEffect,
    pass: FullscreenPass,
}

impl PostStage {
    pub fn new(gpu: &GpuContext, effect: PostEffect) -> Self {
        let label = format!("{:?} Pass", effect);
        let pass = FullscreenPass::new(
            gpu,
            &label,
            effect.source(),
            &[effect.input()],
            &[],
            effect.output_format(gpu.config.format),
        );
        Self { effect, pass }
    }
}

impl RenderStage for PostStage {
    fn id(&self) -> StageId {
        self.effect.stage_id()
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, io: &StageIo) {
        let targets = ctx.targets;
        let (input, output) = match self.effect {
            PostEffect::LinearizeDepth => (
                targets.view(TargetId::DepthPrepass),
                targets.view(TargetId::LinearDepth),
            ),
            PostEffect::Tonemap => (
                targets.view(TargetId::Hdr),
                io.output_view(targets, ctx.surface),
            ),
            PostEffect::Gamma => (io.input_view(targets), io.output_view(targets, ctx.surface)),
        };
        let (Some(input), Some(output)) = (input, output) else {
            log::error!("{:?} has no chain routing; skipping", self.effect);
            return;
        };

        let frame_group = self.pass.frame_group(ctx.gpu, ctx.frame);
        let input_group = self.pass.input_group(ctx.gpu, &[input]);
        self.pass
            .draw(ctx.encoder, output, &[&frame_group, &input_group]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_map_to_their_stages() {
        assert_eq!(PostEffect::LinearizeDepth.stage_id(), StageId::LinearizeDepth);
        assert_eq!(PostEffect::Tonemap.stage_id(), StageId::Tonemap);
        assert_eq!(PostEffect::Gamma.stage_id(), StageId::Gamma);
    }

    #[test]
    fn only_gamma_writes_the_surface_format() {
        let surface = wgpu::TextureFormat::Bgra8Unorm;
        assert_eq!(PostEffect::Gamma.output_format(surface), surface);
        assert_eq!(PostEffect::Tonemap.output_format(surface), POST_FORMAT);
        assert_eq!(
            PostEffect::LinearizeDepth.output_format(surface),
            LINEAR_DEPTH_FORMAT
        );
    }

    #[test]
    fn shaders_use_the_documented_curves() {
        assert!(PostEffect::Tonemap.source().contains("exp(-hdr * exposure)"));
        assert!(PostEffect::Gamma.source().contains("1.0 / 2.2"));
        assert!(
            PostEffect::LinearizeDepth
                .source()
                .contains("near * far / (far - depth * (far - near))")
        );
    }
}
