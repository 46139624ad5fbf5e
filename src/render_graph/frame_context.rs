use crate::assets::Assets;
use crate::debug_draw::DebugLines;
use crate::frame_data::{FrameBuffer, ObjectArena, ObjectSlots};
use crate::gpu::GpuContext;
use crate::ibl::IblMaps;
use crate::light_buffer::LightBuffers;
use crate::render_targets::RenderTargetSet;
use crate::scene_view::SceneView;
use crate::texture::DefaultTextureSet;

/// Everything a stage can touch while recording one frame.
///
/// Shared resources are plain `&'a` references, so a stage can copy them out
/// (`let targets = ctx.targets;`) and still borrow `ctx.encoder` mutably.
pub struct FrameContext<'a> {
    pub gpu: &'a GpuContext,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub view: &'a SceneView,
    pub assets: &'a Assets,
    pub defaults: &'a DefaultTextureSet,
    pub targets: &'a RenderTargetSet,
    pub lights: &'a LightBuffers,
    pub frame: &'a FrameBuffer,
    pub objects: &'a ObjectArena,
    pub slots: &'a ObjectSlots,
    pub ibl: &'a IblMaps,
    /// Consumed and cleared by the debug overlay stage.
    pub debug_lines: &'a mut DebugLines,
    pub surface: &'a wgpu::TextureView,
    pub clear_color: wgpu::Color,
}
