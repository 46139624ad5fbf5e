//! The first stage of every frame: packs the scene view into GPU buffers.

use crate::frame_data::{
    FrameUniforms, GpuDirectionalLight, MAX_DIRECTIONAL_LIGHTS, object_uniforms, pack_directional,
};
use crate::light_buffer::{GpuLight, MAX_LIGHTS, OverflowLatch, PackReport, pack_lights};
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::scene_view::SceneView;
use crate::tiling::TileGrid;

/// Everything the upload stage writes for one frame, before it reaches the queue.
pub struct PackedFrame {
    pub lights: Box<[GpuLight; MAX_LIGHTS]>,
    pub light_report: PackReport,
    pub directional_dropped: usize,
    pub uniforms: FrameUniforms,
}

impl PackedFrame {
    pub fn new(view: &SceneView, grid: &TileGrid, prefiltered_max_mip: f32) -> Self {
        let mut lights = Box::new([GpuLight::UNUSED; MAX_LIGHTS]);
        let light_report = pack_lights(view.point_lights(), lights.as_mut_slice());

        let mut directional = [GpuDirectionalLight::default(); MAX_DIRECTIONAL_LIGHTS];
        let (directional_kept, directional_dropped) =
            pack_directional(view.directional_lights(), &mut directional);

        let uniforms = FrameUniforms::new(
            view,
            grid,
            light_report.kept,
            directional,
            directional_kept,
            prefiltered_max_mip,
        );
        Self {
            lights,
            light_report,
            directional_dropped,
            uniforms,
        }
    }
}

#[derive(Default)]
pub struct UploadStage {
    point_overflow: OverflowLatch,
    directional_overflow: OverflowLatch,
}

impl UploadStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderStage for UploadStage {
    fn id(&self) -> StageId {
        StageId::Upload
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, _io: &StageIo) {
        let view = ctx.view;
        let packed = PackedFrame::new(view, ctx.lights.grid(), ctx.ibl.max_prefilter_mip());

        if self.point_overflow.observe(packed.light_report.dropped) {
            log::warn!(
                "{} point lights exceed the limit of {MAX_LIGHTS}; dropping {}",
                view.point_lights().len(),
                packed.light_report.dropped
            );
        }
        if self.directional_overflow.observe(packed.directional_dropped) {
            log::warn!(
                "{} directional lights exceed the limit of {MAX_DIRECTIONAL_LIGHTS}; dropping {}",
                view.directional_lights().len(),
                packed.directional_dropped
            );
        }

        ctx.lights.upload(ctx.gpu, &packed.lights);
        ctx.frame.write(ctx.gpu, &packed.uniforms);
        ctx.objects.write(ctx.gpu, &object_uniforms(view));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::ecs::{DirectionalLight, PointLight};
    use crate::mesh::Transform;
    use crate::scene_view::{SceneViewBuilder, Viewport};
    use crate::tiling::TileRounding;
    use glam::Vec3;
    use hecs::World;

    fn view_with(points: usize, directional: usize) -> SceneView {
        let mut world = World::new();
        for i in 0..points {
            world.spawn((
                Transform::from_position(Vec3::new(i as f32, 1.0, 0.0)),
                PointLight::new(Vec3::ONE, 2.0, 4.0),
            ));
        }
        for _ in 0..directional {
            world.spawn((Transform::new(), DirectionalLight::new(Vec3::ONE, 1.0)));
        }
        SceneViewBuilder::new(&Camera::default(), Viewport::full(640, 480)).build(&world)
    }

    fn grid() -> TileGrid {
        TileGrid::new(640, 480, TileRounding::Ceil)
    }

    #[test]
    fn overflowing_lights_are_clamped() {
        let packed = PackedFrame::new(&view_with(MAX_LIGHTS + 50, 0), &grid(), 4.0);
        assert_eq!(packed.light_report.kept, MAX_LIGHTS);
        assert_eq!(packed.light_report.dropped, 50);
        assert_eq!(packed.uniforms.counts[0], MAX_LIGHTS as u32);
        assert!(packed.lights.iter().all(|l| !l.is_unused()));
    }

    #[test]
    fn no_lights_leaves_sentinels() {
        let packed = PackedFrame::new(&view_with(0, 0), &grid(), 4.0);
        assert_eq!(packed.uniforms.counts[0], 0);
        assert!(packed.lights.iter().all(GpuLight::is_unused));
    }

    #[test]
    fn directional_lights_are_capped() {
        let packed = PackedFrame::new(&view_with(0, MAX_DIRECTIONAL_LIGHTS + 2), &grid(), 4.0);
        assert_eq!(packed.uniforms.counts[1], MAX_DIRECTIONAL_LIGHTS as u32);
        assert_eq!(packed.directional_dropped, 2);
    }

    #[test]
    fn overflow_warns_once_per_episode() {
        let stage = UploadStage::new();
        assert!(stage.point_overflow.observe(50));
        assert!(!stage.point_overflow.observe(50));
        assert!(!stage.point_overflow.observe(0));
        assert!(stage.point_overflow.observe(1));
    }

    #[test]
    fn grid_dimensions_reach_the_uniforms() {
        let packed = PackedFrame::new(&view_with(1, 1), &grid(), 4.0);
        assert_eq!(packed.uniforms.counts[2], 40);
        assert_eq!(packed.uniforms.counts[3], 30);
        assert_eq!(packed.uniforms.camera_params[3], 4.0);
    }
}
