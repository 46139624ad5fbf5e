//! The tiled forward renderer: owns every frame resource and the stage graph.
//!
//! ```ignore
//! let mut renderer = TiledForwardRenderer::init(&gpu, &config, DefaultTextureSet::new(&gpu))?;
//! loop {
//!     let viewport = Viewport::full(gpu.width(), gpu.height());
//!     let view = SceneView::for_camera(&world, camera, viewport, time)?;
//!     renderer.render(&gpu, &view, &assets, &mut debug_lines)?;
//! }
//! renderer.deinit();
//! ```

use crate::assets::Assets;
use crate::config::RendererConfig;
use crate::debug_draw::DebugLines;
use crate::debug_pass::DebugOverlayStage;
use crate::depth_prepass::DepthPrepassStage;
use crate::error::Result;
use crate::frame_data::{FrameBuffer, ObjectArena, ObjectSlots};
use crate::gpu::GpuContext;
use crate::ibl::IblMaps;
use crate::light_buffer::{LightBuffers, visible_index_size};
use crate::light_culling::LightCullingStage;
use crate::particle_pass::ParticleStage;
use crate::pbr_pass::{LightingStage, LightingVariant};
use crate::post_process::{PostEffect, PostStage};
use crate::render_graph::{FrameContext, FrameGraph, RenderStage, StageId, standard_stages};
use crate::render_targets::{RenderTargetSet, TargetDesc, describe};
use crate::scene_view::SceneView;
use crate::skybox_pass::SkyboxStage;
use crate::ssao::SsaoStage;
use crate::text_pass::UiTextStage;
use crate::texture::DefaultTextureSet;
use crate::tiling::TileGrid;
use crate::upload::UploadStage;

/// Object slots allocated up front; the arena doubles when a frame needs more.
const INITIAL_OBJECT_CAPACITY: usize = 256;

/// The stages `config` switches on, in execution order.
pub fn stage_plan(config: &RendererConfig) -> Vec<StageId> {
    standard_stages(config.translucency, config.ssao)
}

pub struct TiledForwardRenderer {
    config: RendererConfig,
    defaults: DefaultTextureSet,
    ibl: IblMaps,
    targets: RenderTargetSet,
    lights: LightBuffers,
    frame: FrameBuffer,
    objects: ObjectArena,
    graph: FrameGraph,
}

impl TiledForwardRenderer {
    /// Precomputes image-based lighting from `config.environment_hdr`, allocates the
    /// size-dependent targets for the current surface and builds the stage graph.
    pub fn init(
        gpu: &GpuContext,
        config: &RendererConfig,
        defaults: DefaultTextureSet,
    ) -> Result<Self> {
        let (width, height) = (gpu.width(), gpu.height());
        let ibl = IblMaps::precompute(gpu, &config.environment_hdr)?;
        let sizing = SurfaceSizing::new(config, width, height);
        let targets = RenderTargetSet::new(gpu, sizing.targets)?;
        let lights = LightBuffers::new(gpu, sizing.grid)?;
        let frame = FrameBuffer::new(gpu);
        let objects = ObjectArena::new(gpu, INITIAL_OBJECT_CAPACITY)?;

        let mut builder = FrameGraph::builder();
        for id in stage_plan(config) {
            builder = builder.boxed(build_stage(id, gpu, config, &objects, &ibl));
        }
        let graph = builder.build()?;
        log::info!(
            "renderer ready: {width}x{height}, {} stages",
            graph.plan().stages().len()
        );

        Ok(Self {
            config: config.clone(),
            defaults,
            ibl,
            targets,
            lights,
            frame,
            objects,
            graph,
        })
    }

    /// Rebuilds every size-dependent resource. Zero sizes (a minimized window) are ignored.
    pub fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        // Allocate both before swapping; on failure the previous pair stays in place.
        let sizing = SurfaceSizing::new(&self.config, width, height);
        let targets = RenderTargetSet::new(gpu, sizing.targets)?;
        let lights = LightBuffers::new(gpu, sizing.grid)?;
        self.targets.replace(targets);
        self.lights = lights;
        log::debug!(
            "renderer resized to {width}x{height} ({} KiB per light index list)",
            sizing.index_bytes / 1024
        );
        Ok(())
    }

    /// Records and submits one frame, then presents it.
    ///
    /// `debug_lines` is drained by the overlay stage.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        view: &SceneView,
        assets: &Assets,
        debug_lines: &mut DebugLines,
    ) -> Result<()> {
        let output = gpu.surface.get_current_texture()?;
        let surface = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let slots = ObjectSlots::new(view);
        self.objects.reserve(gpu, slots.total())?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let [r, g, b, a] = self.config.clear_color;
        let mut ctx = FrameContext {
            gpu,
            encoder: &mut encoder,
            view,
            assets,
            defaults: &self.defaults,
            targets: &self.targets,
            lights: &self.lights,
            frame: &self.frame,
            objects: &self.objects,
            slots: &slots,
            ibl: &self.ibl,
            debug_lines,
            surface: &surface,
            clear_color: wgpu::Color { r, g, b, a },
        };
        self.graph.execute(&mut ctx);

        gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn graph(&self) -> &FrameGraph {
        &self.graph
    }

    /// Releases the render targets and the lighting maps.
    pub fn deinit(mut self) {
        self.targets.teardown();
        self.ibl.destroy();
        log::debug!("renderer released");
    }
}

/// Everything whose size follows the surface: the render targets and the tile grid the
/// light index buffers are allocated for.
#[derive(Clone, Debug, PartialEq)]
struct SurfaceSizing {
    targets: Vec<TargetDesc>,
    grid: TileGrid,
    index_bytes: u64,
}

impl SurfaceSizing {
    fn new(config: &RendererConfig, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let grid = tile_grid(config, width, height);
        Self {
            targets: describe(width, height),
            index_bytes: visible_index_size(&grid),
            grid,
        }
    }
}

fn tile_grid(config: &RendererConfig, width: u32, height: u32) -> TileGrid {
    let grid = TileGrid::new(width, height, config.tile_rounding);
    let (x, y) = grid.uncovered();
    if x > 0 || y > 0 {
        log::warn!(
            "{:?} tile rounding leaves {x}x{y} pixels without light culling",
            config.tile_rounding
        );
    }
    grid
}

fn build_stage(
    id: StageId,
    gpu: &GpuContext,
    config: &RendererConfig,
    objects: &ObjectArena,
    ibl: &IblMaps,
) -> Box<dyn RenderStage> {
    match id {
        StageId::Upload => Box::new(UploadStage::new()),
        StageId::DepthPrePass => Box::new(DepthPrepassStage::new(gpu, objects)),
        StageId::LightCulling => Box::new(LightCullingStage::new(gpu)),
        StageId::OpaqueLighting => Box::new(LightingStage::new(
            gpu,
            LightingVariant::Opaque,
            objects,
            ibl,
        )),
        StageId::Skybox => Box::new(SkyboxStage::new(gpu, ibl)),
        StageId::Translucent => Box::new(LightingStage::new(
            gpu,
            LightingVariant::Translucent,
            objects,
            ibl,
        )),
        StageId::Particles => Box::new(ParticleStage::new(gpu, ibl)),
        StageId::LinearizeDepth => Box::new(PostStage::new(gpu, PostEffect::LinearizeDepth)),
        StageId::Tonemap => Box::new(PostStage::new(gpu, PostEffect::Tonemap)),
        StageId::Ssao => Box::new(SsaoStage::new(gpu, config.ssao_seed)),
        StageId::DebugOverlay => Box::new(DebugOverlayStage::new(gpu)),
        StageId::UiText => Box::new(UiTextStage::new(gpu, objects)),
        StageId::Gamma => Box::new(PostStage::new(gpu, PostEffect::Gamma)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::FramePlan;

    #[test]
    fn default_config_runs_translucency_without_ssao() {
        let stages = stage_plan(&RendererConfig::default());
        assert!(stages.contains(&StageId::Translucent));
        assert!(stages.contains(&StageId::Particles));
        assert!(!stages.contains(&StageId::Ssao));
        assert_eq!(stages.first(), Some(&StageId::Upload));
        assert_eq!(stages.last(), Some(&StageId::Gamma));
    }

    #[test]
    fn every_configuration_compiles() {
        for translucency in [false, true] {
            for ssao in [false, true] {
                let config = RendererConfig {
                    translucency,
                    ssao,
                    ..Default::default()
                };
                let plan = FramePlan::for_stages(&stage_plan(&config));
                assert!(plan.is_ok(), "translucency={translucency} ssao={ssao}");
            }
        }
    }

    #[test]
    fn resize_round_trip_keeps_targets_and_index_buffers_in_step() {
        let config = RendererConfig::default();
        let original = SurfaceSizing::new(&config, 1280, 720);
        let bigger = SurfaceSizing::new(&config, 1920, 1080);
        let back = SurfaceSizing::new(&config, 1280, 720);
        assert_eq!(original, back);

        for sizing in [&original, &bigger] {
            let grid = sizing.grid;
            assert!(
                sizing
                    .targets
                    .iter()
                    .all(|d| (d.width, d.height) == (grid.width, grid.height))
            );
            assert_eq!(
                sizing.index_bytes,
                512 * grid.tile_count() as u64 * 4,
                "{}x{}",
                grid.width,
                grid.height
            );
        }
        assert_eq!((bigger.grid.work_groups_x, bigger.grid.work_groups_y), (120, 68));
        assert_eq!((original.grid.work_groups_x, original.grid.work_groups_y), (80, 45));
        assert!(bigger.index_bytes > original.index_bytes);
    }

    #[test]
    fn tiny_surface_still_sizes_every_buffer() {
        let config = RendererConfig {
            tile_rounding: crate::tiling::TileRounding::Legacy,
            ..Default::default()
        };
        let sizing = SurfaceSizing::new(&config, 7, 720);
        assert_eq!(sizing.grid.work_groups_x, 1);
        assert!(sizing.index_bytes > 0);
        assert_eq!(sizing.targets[0].width, 7);
    }

    #[test]
    fn ssao_sits_between_tonemap_and_overlay() {
        let stages = stage_plan(&RendererConfig::default().with_ssao(1));
        let at = |id| stages.iter().position(|s| *s == id).unwrap();
        assert!(at(StageId::Tonemap) < at(StageId::Ssao));
        assert!(at(StageId::Ssao) < at(StageId::DebugOverlay));
    }
}
