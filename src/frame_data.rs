//! Per-frame and per-object uniform data.
//!
//! [`FrameUniforms`] is written once per frame and bound by every geometry and post stage.
//! Per-object data lives in an [`ObjectArena`]: one 256-byte slot per draw in a single
//! uniform buffer, selected with a dynamic offset, so every draw in a frame keeps its
//! own matrices until submission.

use std::ops::Range;

use glam::{Mat3, Mat4};

use crate::error::{Result, allocation_scope};
use crate::gpu::GpuContext;
use crate::scene_view::{DirectionalLightData, SceneView};
use crate::tiling::TileGrid;

/// Directional lights shaded per frame. Matches `MAX_DIRECTIONAL_LIGHTS` in `common.wgsl`.
pub const MAX_DIRECTIONAL_LIGHTS: usize = 8;

/// Stride of one object slot; the minimum dynamic uniform offset alignment wgpu guarantees.
pub const OBJECT_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuDirectionalLight {
    /// Direction the light travels, `w` unused.
    pub direction: [f32; 4],
    /// Color premultiplied by intensity.
    pub color: [f32; 4],
}

/// Copies up to [`MAX_DIRECTIONAL_LIGHTS`] lights in list order; returns `(kept, dropped)`.
pub fn pack_directional(
    lights: &[DirectionalLightData],
    out: &mut [GpuDirectionalLight; MAX_DIRECTIONAL_LIGHTS],
) -> (usize, usize) {
    let kept = lights.len().min(MAX_DIRECTIONAL_LIGHTS);
    *out = [GpuDirectionalLight::default(); MAX_DIRECTIONAL_LIGHTS];
    for (slot, light) in out.iter_mut().zip(&lights[..kept]) {
        *slot = GpuDirectionalLight {
            direction: light.direction.extend(0.0).to_array(),
            color: (light.color * light.intensity).extend(1.0).to_array(),
        };
    }
    (kept, lights.len() - kept)
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub clip_from_world: [[f32; 4]; 4],
    pub view_from_world: [[f32; 4]; 4],
    pub clip_from_view: [[f32; 4]; 4],
    pub view_from_clip: [[f32; 4]; 4],
    pub sky_clip_from_world: [[f32; 4]; 4],
    pub clip_from_pixels: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// `[width, height, 1 / width, 1 / height]`
    pub screen_size: [f32; 4],
    /// `[near, far, exposure, prefiltered max mip]`
    pub camera_params: [f32; 4],
    /// `[point light count, directional light count, work groups x, work groups y]`
    pub counts: [u32; 4],
    pub directional: [GpuDirectionalLight; MAX_DIRECTIONAL_LIGHTS],
}

impl FrameUniforms {
    pub fn new(
        view: &SceneView,
        grid: &TileGrid,
        light_count: usize,
        directional: [GpuDirectionalLight; MAX_DIRECTIONAL_LIGHTS],
        directional_count: usize,
        prefiltered_max_mip: f32,
    ) -> Self {
        let camera = view.camera();
        let width = grid.width.max(1) as f32;
        let height = grid.height.max(1) as f32;
        Self {
            clip_from_world: camera.clip_from_world.to_cols_array_2d(),
            view_from_world: camera.view_from_world.to_cols_array_2d(),
            clip_from_view: camera.clip_from_view.to_cols_array_2d(),
            view_from_clip: camera.clip_from_view.inverse().to_cols_array_2d(),
            sky_clip_from_world: camera.sky_clip_from_world.to_cols_array_2d(),
            clip_from_pixels: view.viewport().clip_from_pixels().to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            screen_size: [width, height, 1.0 / width, 1.0 / height],
            camera_params: [camera.near, camera.far, view.exposure(), prefiltered_max_mip],
            counts: [
                light_count as u32,
                directional_count as u32,
                grid.work_groups_x,
                grid.work_groups_y,
            ],
            directional,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniforms {
    pub clip_from_model: [[f32; 4]; 4],
    pub world_from_model: [[f32; 4]; 4],
    /// Inverse-transpose of the upper 3×3, stored as columns of a 4×4.
    pub normal_from_model: [[f32; 4]; 4],
    pub albedo: [f32; 4],
    /// `[emissive r, g, b, roughness]`
    pub emissive_roughness: [f32; 4],
    /// `[metallic, opacity mask threshold, unlit (0 or 1), reserved]`
    pub params: [f32; 4],
    _padding: [f32; 4],
}

impl ObjectUniforms {
    pub fn new(clip_from_world: Mat4, world_from_model: Mat4) -> Self {
        let normal = Mat4::from_mat3(Mat3::from_mat4(world_from_model).inverse().transpose());
        Self {
            clip_from_model: (clip_from_world * world_from_model).to_cols_array_2d(),
            world_from_model: world_from_model.to_cols_array_2d(),
            normal_from_model: normal.to_cols_array_2d(),
            albedo: [1.0; 4],
            emissive_roughness: [0.0, 0.0, 0.0, 1.0],
            params: [1.0, 0.5, 0.0, 0.0],
            _padding: [0.0; 4],
        }
    }
}

/// Where each queue's objects live in the arena for the current frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectSlots {
    pub opaque: Range<usize>,
    pub translucent: Range<usize>,
    pub ortho: Range<usize>,
}

impl ObjectSlots {
    pub fn new(view: &SceneView) -> Self {
        let opaque = 0..view.opaque().len();
        let translucent = opaque.end..opaque.end + view.translucent().len();
        let ortho = translucent.end..translucent.end + view.ortho().len();
        Self {
            opaque,
            translucent,
            ortho,
        }
    }

    pub fn total(&self) -> usize {
        self.ortho.end
    }
}

/// Builds the arena contents for a view, laid out as [`ObjectSlots::new`] describes.
pub fn object_uniforms(view: &SceneView) -> Vec<ObjectUniforms> {
    let clip_from_world = view.camera().clip_from_world;
    let world_items = view.opaque().iter().chain(view.translucent()).map(|item| {
        let m = &item.material;
        let mut uniforms = ObjectUniforms::new(clip_from_world, item.world_from_model);
        uniforms.albedo = m.albedo.to_array();
        uniforms.emissive_roughness = m.emissive.extend(m.roughness).to_array();
        uniforms.params = [
            m.metallic,
            m.opacity_mask_threshold,
            if item.shading == crate::ecs::ShadingMode::Unlit { 1.0 } else { 0.0 },
            0.0,
        ];
        uniforms
    });

    let clip_from_pixels = view.viewport().clip_from_pixels();
    let ortho_items = view.ortho().iter().map(|item| {
        let mut uniforms = ObjectUniforms::new(clip_from_pixels, item.pixels_from_model);
        uniforms.albedo = item.color.to_array();
        uniforms
    });

    world_items.chain(ortho_items).collect()
}

/// A growable uniform buffer of [`ObjectUniforms`] slots bound with dynamic offsets.
pub struct ObjectArena {
    layout: wgpu::BindGroupLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
}

impl ObjectArena {
    pub fn new(gpu: &GpuContext, capacity: usize) -> Result<Self> {
        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Object Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(OBJECT_STRIDE),
                    },
                    count: None,
                }],
            });
        let capacity = capacity.max(1);
        let (buffer, bind_group) = Self::allocate(gpu, &layout, capacity)?;
        Ok(Self {
            layout,
            buffer,
            bind_group,
            capacity,
        })
    }

    fn allocate(
        gpu: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        capacity: usize,
    ) -> Result<(wgpu::Buffer, wgpu::BindGroup)> {
        let buffer = allocation_scope(&gpu.device, "Object Uniforms", || {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Object Uniforms"),
                size: capacity as u64 * OBJECT_STRIDE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Object Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(OBJECT_STRIDE),
                }),
            }],
        });
        Ok((buffer, bind_group))
    }

    /// Grows the buffer to hold at least `count` slots. Must run before the frame's
    /// bind groups are recorded.
    pub fn reserve(&mut self, gpu: &GpuContext, count: usize) -> Result<()> {
        if count <= self.capacity {
            return Ok(());
        }
        let capacity = count.next_power_of_two();
        log::debug!("growing object arena {} -> {capacity}", self.capacity);
        let (buffer, bind_group) = Self::allocate(gpu, &self.layout, capacity)?;
        self.buffer = buffer;
        self.bind_group = bind_group;
        self.capacity = capacity;
        Ok(())
    }

    pub fn write(&self, gpu: &GpuContext, objects: &[ObjectUniforms]) {
        debug_assert!(objects.len() <= self.capacity);
        if !objects.is_empty() {
            gpu.queue
                .write_buffer(&self.buffer, 0, bytemuck::cast_slice(objects));
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Dynamic offset of slot `index`.
    pub fn offset(index: usize) -> u32 {
        (index as u64 * OBJECT_STRIDE) as u32
    }
}

/// The frame uniform buffer. Stages bind it through their own layouts built from
/// [`frame_layout_entry`].
pub struct FrameBuffer {
    pub(crate) buffer: wgpu::Buffer,
}

impl FrameBuffer {
    pub fn new(gpu: &GpuContext) -> Self {
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer }
    }

    pub fn write(&self, gpu: &GpuContext, uniforms: &FrameUniforms) {
        gpu.queue
            .write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[*uniforms]));
    }
}

/// Layout entry for the frame uniform buffer at `binding`, visible to every stage.
pub fn frame_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<FrameUniforms>() as u64),
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::ecs::{Material, MeshId, MeshRenderer, OrthoMesh};
    use crate::mesh::Transform;
    use crate::scene_view::{SceneViewBuilder, Viewport};
    use crate::tiling::TileRounding;
    use glam::{Vec3, Vec4};
    use hecs::World;

    #[test]
    fn uniform_sizes_respect_alignment() {
        assert_eq!(std::mem::size_of::<ObjectUniforms>() as u64, OBJECT_STRIDE);
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuDirectionalLight>(), 32);
        assert_eq!(ObjectArena::offset(3), 768);
    }

    #[test]
    fn directional_lights_truncate_in_order() {
        let lights: Vec<DirectionalLightData> = (0..11)
            .map(|i| DirectionalLightData {
                direction: Vec3::NEG_Y,
                color: Vec3::ONE,
                intensity: i as f32,
            })
            .collect();
        let mut out = [GpuDirectionalLight::default(); MAX_DIRECTIONAL_LIGHTS];
        assert_eq!(pack_directional(&lights, &mut out), (8, 3));
        assert_eq!(out[0].color[0], 0.0);
        assert_eq!(out[7].color[0], 7.0);
        assert_eq!(out[7].direction, [0.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn frame_uniforms_carry_counts_and_grid() {
        let view = SceneViewBuilder::new(&Camera::new(), Viewport::full(1920, 1080))
            .build(&World::new());
        let grid = TileGrid::new(1920, 1080, TileRounding::Ceil);
        let frame = FrameUniforms::new(
            &view,
            &grid,
            12,
            [GpuDirectionalLight::default(); MAX_DIRECTIONAL_LIGHTS],
            1,
            4.0,
        );
        assert_eq!(frame.counts, [12, 1, 120, 68]);
        assert_eq!(frame.camera_params[2], 1.0);
        assert_eq!(frame.camera_params[3], 4.0);
        assert_eq!(frame.screen_size[0], 1920.0);
    }

    #[test]
    fn slots_and_uniforms_follow_queue_order() {
        let mut world = World::new();
        world.spawn((
            Transform::from_position(Vec3::X),
            MeshRenderer::new(MeshId(0)),
            Material::default().roughness(0.25),
        ));
        world.spawn((Transform::new(), MeshRenderer::new(MeshId(0)).translucent()));
        world.spawn((
            Transform::new(),
            OrthoMesh {
                mesh: MeshId(1),
                color: Vec4::new(1.0, 0.0, 0.0, 1.0),
                texture: None,
            },
        ));

        let view = SceneViewBuilder::new(&Camera::new(), Viewport::full(800, 600)).build(&world);
        let slots = ObjectSlots::new(&view);
        assert_eq!(slots.opaque, 0..1);
        assert_eq!(slots.translucent, 1..2);
        assert_eq!(slots.ortho, 2..3);

        let objects = object_uniforms(&view);
        assert_eq!(objects.len(), slots.total());
        assert_eq!(objects[0].emissive_roughness[3], 0.25);
        assert_eq!(objects[0].world_from_model[3][0], 1.0);
        assert_eq!(objects[2].albedo, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Transform::new().scale(Vec3::new(2.0, 1.0, 1.0)).matrix();
        let object = ObjectUniforms::new(Mat4::IDENTITY, model);
        let normal = Mat4::from_cols_array_2d(&object.normal_from_model);
        assert_eq!(normal.transform_vector3(Vec3::X), Vec3::new(0.5, 0.0, 0.0));
    }
}
