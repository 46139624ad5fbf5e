//! The stage trait and the per-stage routing resolved by the frame plan.

use crate::render_graph::{FrameContext, StageId};
use crate::render_targets::{RenderTargetSet, TargetId};

/// Where a chain stage writes its color output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainOutput {
    Target(TargetId),
    Surface,
}

/// Chain routing of one stage, resolved when the plan is compiled.
///
/// Stages outside the post-process chain have neither an input nor an output here;
/// they address their fixed targets directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageIo {
    pub chain_input: Option<TargetId>,
    pub chain_output: Option<ChainOutput>,
}

impl StageIo {
    pub fn input_view<'a>(&self, targets: &'a RenderTargetSet) -> Option<&'a wgpu::TextureView> {
        self.chain_input.and_then(|id| targets.view(id))
    }

    pub fn output_view<'a>(
        &self,
        targets: &'a RenderTargetSet,
        surface: &'a wgpu::TextureView,
    ) -> Option<&'a wgpu::TextureView> {
        self.chain_output.and_then(|output| match output {
            ChainOutput::Target(id) => targets.view(id),
            ChainOutput::Surface => Some(surface),
        })
    }
}

/// A stage of the frame graph.
///
/// Stages record their commands into `ctx.encoder`. They must only touch the resources
/// [`declare`](crate::render_graph::declare) lists for their id.
///
/// ```ignore
/// impl RenderStage for TonemapStage {
///     fn id(&self) -> StageId {
///         StageId::Tonemap
///     }
///
///     fn execute(&self, ctx: &mut FrameContext, io: &StageIo) {
///         let Some(target) = io.output_view(ctx.targets, ctx.surface) else {
///             return;
///         };
///         // ... begin a render pass on `target`, draw a full-screen triangle
///     }
/// }
/// ```
pub trait RenderStage {
    fn id(&self) -> StageId;

    fn execute(&self, ctx: &mut FrameContext<'_>, io: &StageIo);
}
