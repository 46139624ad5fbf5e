//! # Tessera
//!
//! **A tiled forward+ renderer on wgpu.**
//!
//! Point lights are culled per 16×16 screen tile by a compute pass, then a single
//! forward pass shades every object against only the lights that touch its tile. Ambient
//! light comes from an HDR environment map prefiltered into irradiance and specular maps.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tessera::*;
//!
//! fn main() -> Result<()> {
//!     run(|ctx| {
//!         let sphere = ctx.assets.add_mesh_data(ctx.gpu, &MeshData::sphere(32, 16));
//!         ctx.world.spawn((Transform::new(), MeshRenderer::new(sphere), Material::default()));
//!         ctx.world.spawn((
//!             Transform::from_position(Vec3::new(2.0, 2.0, 2.0)),
//!             PointLight::new(Vec3::ONE, 4.0, 6.0),
//!         ));
//!
//!         move |frame| {
//!             frame.debug.axes(Vec3::ZERO, 1.0);
//!         }
//!     })
//! }
//! ```
//!
//! ## Frame
//!
//! Each frame runs a fixed set of stages (see [`standard_stages`]): object upload, depth
//! prepass, light culling, opaque lighting, skybox, translucent lighting, particle
//! billboards, depth linearization, tonemapping, optional SSAO, debug lines, screen-space
//! text and gamma.
//! The stages are ordered by [`FramePlan`] from the resources each one reads and writes.

mod app;
mod assets;
mod camera;
mod config;
mod debug_draw;
mod debug_pass;
mod depth_prepass;
mod ecs;
mod error;
mod frame_data;
mod gpu;
mod ibl;
mod light_buffer;
mod light_culling;
mod mesh;
mod particle_pass;
mod particles;
mod pbr_pass;
mod post_process;
mod render_graph;
mod render_targets;
mod renderer;
mod scene_view;
mod skybox_pass;
mod ssao;
mod text_pass;
mod texture;
mod tiling;
mod upload;

pub use app::{AppConfig, Frame, SetupContext, run, run_with_config};
pub use assets::{Assets, FontAtlas, FontId, GlyphInfo, GlyphTable};
pub use camera::Camera;
pub use config::RendererConfig;
pub use debug_draw::{DebugLines, LineVertex};
pub use error::{RendererError, Result};
pub use gpu::GpuContext;
pub use ibl::IblMaps;
pub use light_buffer::MAX_LIGHTS;
pub use mesh::{Mesh, MeshData, Transform, Vertex3d};
pub use particles::{
    BillboardInstance, EmitterSettings, Particle, ParticleEmitter, ParticleInit, SheetLayout,
    SpawnSpace, Spritesheet, update_particles,
};
pub use render_graph::{
    ChainOutput, FrameContext, FrameGraph, FrameGraphBuilder, FramePlan, GraphError,
    PlannedStage, RenderStage, ResourceId, StageDecl, StageId, StageIo, standard_stages,
};
pub use render_targets::{RenderTargetSet, TargetDesc, TargetId};
pub use renderer::{TiledForwardRenderer, stage_plan};
pub use scene_view::{BillboardBatch, SceneView, SceneViewBuilder, Viewport};
pub use text_pass::{GlyphVertex, build_text_quads};
pub use texture::{ColorSpace, DefaultTextureSet, Texture};
pub use tiling::{TILE_SIZE, TileGrid, TileRounding, sphere_touches};

// ECS components and type-safe handles
pub use ecs::{
    BlendingMode, DirectionalLight, Material, MaterialMaps, MeshId, MeshRenderer, OrthoMesh,
    PointLight, PostprocessSettings, ScreenSpaceText, ShadingMode, TextureId,
};
pub use hecs::{Entity, World};

// Re-export glam math types for convenience
pub use glam::{EulerRot, IVec2, Mat4, Quat, Vec2, Vec3, Vec4};
