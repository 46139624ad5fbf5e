//! Per-frame snapshot of what to draw.
//!
//! [`SceneViewBuilder`] walks the `hecs` world once and produces an immutable
//! [`SceneView`]: draw queues classified by shading and blending mode, the directional
//! shadow queue, billboard batches, light lists in world iteration order, screen-space
//! text and the viewport. Light caps are applied later by the lighting stages, never here.
//!
//! The directional shadow queue is part of the view for callers that render shadow maps
//! themselves; the built-in stages do not read it.

use glam::{Mat4, Vec3, Vec4};
use hecs::{Entity, World};

use crate::camera::Camera;
use crate::ecs::{
    BlendingMode, DirectionalLight, Material, MeshId, MeshRenderer, OrthoMesh, PointLight,
    PostprocessSettings, ScreenSpaceText, ShadingMode, TextureId,
};
use crate::mesh::Transform;
use crate::particles::{BillboardInstance, ParticleEmitter, Spritesheet};

/// Size of the surface the frame is rendered into, in pixels. Every frame covers the
/// whole surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    /// Maps pixel coordinates (origin top-left, y down) to clip space.
    pub fn clip_from_pixels(&self) -> Mat4 {
        Mat4::orthographic_rh(0.0, self.width as f32, self.height as f32, 0.0, -1.0, 1.0)
    }
}

/// Camera matrices resolved for this frame's aspect ratio.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraData {
    pub position: Vec3,
    pub view_from_world: Mat4,
    pub clip_from_view: Mat4,
    pub clip_from_world: Mat4,
    pub sky_clip_from_world: Mat4,
    pub near: f32,
    pub far: f32,
}

impl CameraData {
    pub fn new(camera: &Camera, aspect: f32) -> Self {
        let clip_from_view = camera.clip_from_view(aspect);
        let view_from_world = camera.view_from_world();
        Self {
            position: camera.position,
            view_from_world,
            clip_from_view,
            clip_from_world: clip_from_view * view_from_world,
            sky_clip_from_world: clip_from_view * camera.rotation_only_view(),
            near: camera.near,
            far: camera.far,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawItem {
    pub entity: Entity,
    pub mesh: MeshId,
    pub world_from_model: Mat4,
    pub material: Material,
    pub shading: ShadingMode,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthoItem {
    pub mesh: MeshId,
    /// Pixel-space transform of the mesh.
    pub pixels_from_model: Mat4,
    pub color: Vec4,
    pub texture: Option<TextureId>,
}

/// Camera-facing quads sharing one texture, farthest first.
#[derive(Clone, Debug, PartialEq)]
pub struct BillboardBatch {
    pub texture: Option<TextureId>,
    pub instances: Vec<BillboardInstance>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLightData {
    /// Direction the light travels, normalized.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLightData {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

/// Immutable input of one frame.
#[derive(Clone, Debug)]
pub struct SceneView {
    camera: CameraData,
    exposure: f32,
    viewport: Viewport,
    time: f32,
    opaque: Vec<DrawItem>,
    translucent: Vec<DrawItem>,
    dir_shadow: Vec<DrawItem>,
    billboards: Vec<BillboardBatch>,
    ortho: Vec<OrthoItem>,
    directional_lights: Vec<DirectionalLightData>,
    point_lights: Vec<PointLightData>,
    texts: Vec<ScreenSpaceText>,
}

impl SceneView {
    /// Builds the view for a camera entity, reading its sibling [`PostprocessSettings`].
    /// Returns `None` when the entity has no [`Camera`].
    pub fn for_camera(
        world: &World,
        camera: Entity,
        viewport: Viewport,
        time: f32,
    ) -> Option<Self> {
        let cam = *world.get::<&Camera>(camera).ok()?;
        let settings = world.get::<&PostprocessSettings>(camera).ok().map(|s| *s);
        Some(
            SceneViewBuilder::new(&cam, viewport)
                .settings(settings)
                .time(time)
                .build(world),
        )
    }

    pub fn camera(&self) -> &CameraData {
        &self.camera
    }

    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Seconds since the app started; drives spritesheet animation.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn opaque(&self) -> &[DrawItem] {
        &self.opaque
    }

    /// Translucent draws, farthest first.
    pub fn translucent(&self) -> &[DrawItem] {
        &self.translucent
    }

    pub fn dir_shadow(&self) -> &[DrawItem] {
        &self.dir_shadow
    }

    /// Particle and spritesheet quads, one batch per entity, farthest batch first.
    pub fn billboards(&self) -> &[BillboardBatch] {
        &self.billboards
    }

    pub fn ortho(&self) -> &[OrthoItem] {
        &self.ortho
    }

    pub fn directional_lights(&self) -> &[DirectionalLightData] {
        &self.directional_lights
    }

    pub fn point_lights(&self) -> &[PointLightData] {
        &self.point_lights
    }

    pub fn texts(&self) -> &[ScreenSpaceText] {
        &self.texts
    }
}

pub struct SceneViewBuilder {
    camera: CameraData,
    viewport: Viewport,
    settings: PostprocessSettings,
    time: f32,
}

impl SceneViewBuilder {
    pub fn new(camera: &Camera, viewport: Viewport) -> Self {
        Self {
            camera: CameraData::new(camera, viewport.aspect()),
            viewport,
            settings: PostprocessSettings::default(),
            time: 0.0,
        }
    }

    pub fn time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    pub fn settings(mut self, settings: Option<PostprocessSettings>) -> Self {
        self.settings = settings.unwrap_or_default();
        self
    }

    fn billboards(&self, world: &World) -> Vec<BillboardBatch> {
        let eye = self.camera.position;
        let distance = |instance: &BillboardInstance| instance.position().distance_squared(eye);
        let mut batches: Vec<(f32, BillboardBatch)> = Vec::new();
        let mut push = |texture, mut instances: Vec<BillboardInstance>| {
            if instances.is_empty() {
                return;
            }
            instances.sort_by(|a, b| distance(b).total_cmp(&distance(a)));
            let farthest = distance(&instances[0]);
            batches.push((farthest, BillboardBatch { texture, instances }));
        };

        for (_, (transform, emitter)) in world.query::<(&Transform, &ParticleEmitter)>().iter() {
            push(emitter.settings.texture, emitter.instances(transform.matrix()));
        }
        for (_, (transform, sheet)) in world.query::<(&Transform, &Spritesheet)>().iter() {
            push(sheet.texture, vec![sheet.instance(transform, self.time)]);
        }

        batches.sort_by(|a, b| b.0.total_cmp(&a.0));
        batches.into_iter().map(|(_, batch)| batch).collect()
    }

    pub fn build(self, world: &World) -> SceneView {
        let directional_lights: Vec<DirectionalLightData> = world
            .query::<(&Transform, &DirectionalLight)>()
            .iter()
            .map(|(_, (transform, light))| DirectionalLightData {
                direction: transform.forward().normalize_or(Vec3::NEG_Y),
                color: light.color,
                intensity: light.intensity,
            })
            .collect();

        let point_lights: Vec<PointLightData> = world
            .query::<(&Transform, &PointLight)>()
            .iter()
            .map(|(_, (transform, light))| PointLightData {
                position: transform.position,
                color: light.color,
                intensity: light.intensity,
                range: light.range,
            })
            .collect();

        let mut opaque = Vec::new();
        let mut translucent = Vec::new();
        let mut dir_shadow = Vec::new();

        for (entity, (transform, renderer, material)) in world
            .query::<(&Transform, &MeshRenderer, Option<&Material>)>()
            .iter()
        {
            if renderer.shading == ShadingMode::None {
                continue;
            }
            let item = DrawItem {
                entity,
                mesh: renderer.mesh,
                world_from_model: transform.matrix(),
                material: material.copied().unwrap_or_default(),
                shading: renderer.shading,
            };
            match renderer.blending {
                BlendingMode::Translucent => translucent.push(item),
                BlendingMode::Opaque => {
                    if renderer.casts_shadow && !directional_lights.is_empty() {
                        dir_shadow.push(item);
                    }
                    opaque.push(item);
                }
            }
        }

        let eye = self.camera.position;
        let distance = |item: &DrawItem| {
            item.world_from_model
                .transform_point3(Vec3::ZERO)
                .distance_squared(eye)
        };
        translucent.sort_by(|a, b| distance(b).total_cmp(&distance(a)));

        let billboards = self.billboards(world);

        let ortho = world
            .query::<(&Transform, &OrthoMesh)>()
            .iter()
            .map(|(_, (transform, ortho))| OrthoItem {
                mesh: ortho.mesh,
                pixels_from_model: transform.matrix(),
                color: ortho.color,
                texture: ortho.texture,
            })
            .collect();

        let texts = world
            .query::<&ScreenSpaceText>()
            .iter()
            .map(|(_, text)| text.clone())
            .collect();

        SceneView {
            camera: self.camera,
            exposure: self.settings.exposure,
            viewport: self.viewport,
            time: self.time,
            opaque,
            translucent,
            dir_shadow,
            billboards,
            ortho,
            directional_lights,
            point_lights,
            texts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FontId;

    const VIEWPORT: Viewport = Viewport {
        width: 1280,
        height: 720,
    };

    fn build(world: &World) -> SceneView {
        SceneViewBuilder::new(&Camera::new(), VIEWPORT).build(world)
    }

    #[test]
    fn empty_world_is_a_valid_view() {
        let view = build(&World::new());
        assert!(view.opaque().is_empty());
        assert!(view.point_lights().is_empty());
        assert!(view.directional_lights().is_empty());
        assert_eq!(view.exposure(), 1.0);
    }

    #[test]
    fn classifies_by_blending_and_shading() {
        let mut world = World::new();
        let mesh = MeshId(0);
        world.spawn((Transform::new(), MeshRenderer::new(mesh)));
        world.spawn((Transform::new(), MeshRenderer::new(mesh).translucent()));
        world.spawn((Transform::new(), MeshRenderer::new(mesh).unlit()));
        world.spawn((Transform::new(), MeshRenderer::new(mesh).hidden()));

        let view = build(&world);
        assert_eq!(view.opaque().len(), 2);
        assert_eq!(view.translucent().len(), 1);
        assert_eq!(view.opaque()[1].shading, ShadingMode::Unlit);
        // no directional light, no shadow queue
        assert!(view.dir_shadow().is_empty());
    }

    #[test]
    fn shadow_queue_needs_a_directional_light() {
        let mut world = World::new();
        world.spawn((Transform::new(), MeshRenderer::new(MeshId(0))));
        world.spawn((Transform::new(), DirectionalLight::new(Vec3::ONE, 2.0)));

        let view = build(&world);
        assert_eq!(view.dir_shadow().len(), 1);
        assert_eq!(view.directional_lights()[0].direction, Vec3::NEG_Z);
    }

    #[test]
    fn lights_keep_iteration_order_without_cap() {
        let mut world = World::new();
        for i in 0..2000 {
            world.spawn((
                Transform::from_position(Vec3::new(i as f32, 0.0, 0.0)),
                PointLight::new(Vec3::ONE, 1.0, 2.0),
            ));
        }

        let view = build(&world);
        assert_eq!(view.point_lights().len(), 2000);
        let expected: Vec<f32> = world
            .query::<(&Transform, &PointLight)>()
            .iter()
            .map(|(_, (t, _))| t.position.x)
            .collect();
        let actual: Vec<f32> = view.point_lights().iter().map(|l| l.position.x).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn translucent_sorted_far_to_near() {
        let mut world = World::new();
        for z in [-2.0, -10.0, -5.0] {
            world.spawn((
                Transform::from_position(Vec3::new(0.0, 0.0, z)),
                MeshRenderer::new(MeshId(0)).translucent(),
            ));
        }
        let view = build(&world);
        let zs: Vec<f32> = view
            .translucent()
            .iter()
            .map(|d| d.world_from_model.w_axis.z)
            .collect();
        assert_eq!(zs, vec![-10.0, -5.0, -2.0]);
    }

    #[test]
    fn camera_entity_supplies_exposure() {
        let mut world = World::new();
        let camera = world.spawn((Camera::new(), PostprocessSettings { exposure: 2.5 }));
        let bare = world.spawn((Camera::new(),));
        let not_a_camera = world.spawn((Transform::new(),));

        let view = SceneView::for_camera(&world, camera, VIEWPORT, 0.0).unwrap();
        assert_eq!(view.exposure(), 2.5);
        let view = SceneView::for_camera(&world, bare, VIEWPORT, 0.0).unwrap();
        assert_eq!(view.exposure(), 1.0);
        assert!(SceneView::for_camera(&world, not_a_camera, VIEWPORT, 0.0).is_none());
    }

    #[test]
    fn collects_texts_and_material_defaults() {
        let mut world = World::new();
        world.spawn((ScreenSpaceText::new(FontId(0), "fps").at(4, 4),));
        world.spawn((Transform::new(), MeshRenderer::new(MeshId(3))));

        let view = build(&world);
        assert_eq!(view.texts().len(), 1);
        assert_eq!(view.opaque()[0].material, Material::default());
    }

    #[test]
    fn pixel_projection_maps_corners() {
        let clip = VIEWPORT.clip_from_pixels();
        let top_left = clip.project_point3(Vec3::new(0.0, 0.0, 0.0));
        let bottom_right = clip.project_point3(Vec3::new(1280.0, 720.0, 0.0));
        assert!((top_left.x + 1.0).abs() < 1e-6 && (top_left.y - 1.0).abs() < 1e-6);
        assert!((bottom_right.x - 1.0).abs() < 1e-6 && (bottom_right.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn billboards_batch_per_entity_and_sort_far_to_near() {
        use crate::particles::{EmitterSettings, ParticleInit};

        let mut world = World::new();
        let mut emitter = ParticleEmitter::new(EmitterSettings {
            initial_burst: 4,
            init: ParticleInit {
                position_jitter: 1.0,
                velocity: Vec3::ZERO,
                velocity_jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        });
        emitter.burst_enabled = false;
        emitter.update(Mat4::IDENTITY, 0.0);
        world.spawn((Transform::from_position(Vec3::new(0.0, 0.0, -2.0)), emitter));
        world.spawn((
            Transform::from_position(Vec3::new(0.0, 0.0, -30.0)),
            Spritesheet::new(None, 4, 4).speed(2.0),
        ));
        // an emitter with nothing alive yet produces no batch
        world.spawn((Transform::new(), ParticleEmitter::new(EmitterSettings::default())));

        let view = SceneViewBuilder::new(&Camera::new(), VIEWPORT)
            .time(1.0)
            .build(&world);
        let batches = view.billboards();
        assert_eq!(batches.len(), 2);
        // the spritesheet is farther away, so it is drawn first
        assert_eq!(batches[0].instances.len(), 1);
        assert_eq!(batches[0].instances[0].uv_rect, [0.5, 0.0, 0.25, 0.25]);
        assert_eq!(batches[1].instances.len(), 4);

        let eye = view.camera().position;
        let distances: Vec<f32> = batches[1]
            .instances
            .iter()
            .map(|i| i.position().distance(eye))
            .collect();
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(view.time(), 1.0);
    }
}
