//! Shared machinery for rendering into the six faces of a cube map.
//!
//! Every precompute step draws a unit cube once per face with one of [`capture_views`],
//! reading its per-draw matrix and parameters from a dynamically offset uniform buffer.

use std::f32::consts::FRAC_PI_2;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::error::{Result, allocation_scope};
use crate::gpu::GpuContext;
use crate::mesh::{Mesh, Vertex3d};

pub const CUBE_FACES: u32 = 6;

/// Uniform stride of one capture draw.
const CAPTURE_STRIDE: u64 = 256;

/// Face directions and up vectors in wgpu layer order: +X, -X, +Y, -Y, +Z, -Z.
const FACES: [(Vec3, Vec3); CUBE_FACES as usize] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// 90° square projection used for every face.
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_lh(FRAC_PI_2, 1.0, 0.1, 10.0)
}

/// One view per cube face, looking out from the origin.
///
/// The views are left-handed so that screen right and screen down line up with the
/// texel axes of each layer of a wgpu cube texture.
pub fn capture_views() -> [Mat4; CUBE_FACES as usize] {
    FACES.map(|(dir, up)| Mat4::look_to_lh(Vec3::ZERO, dir, up))
}

/// `clip_from_world` for every face.
pub fn capture_matrices() -> [Mat4; CUBE_FACES as usize] {
    let projection = capture_projection();
    capture_views().map(|view| projection * view)
}

/// Size in texels of mip `level` of a `base`-sized face.
pub fn mip_size(base: u32, level: u32) -> u32 {
    (base >> level).max(1)
}

/// Number of mips down to a 1×1 face.
pub fn full_mip_count(base: u32) -> u32 {
    32 - base.max(1).leading_zeros()
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CaptureUniforms {
    pub clip_from_world: [[f32; 4]; 4],
    /// Step-specific parameters (roughness, source size, sample count, source mip).
    pub params: [f32; 4],
}

impl CaptureUniforms {
    pub fn new(clip_from_world: Mat4, params: Vec4) -> Self {
        Self {
            clip_from_world: clip_from_world.to_cols_array_2d(),
            params: params.to_array(),
        }
    }
}

/// One uniform entry per face per mip: entry `mip * 6 + face`.
pub fn capture_schedule(mips: u32, params: impl Fn(u32) -> Vec4) -> Vec<CaptureUniforms> {
    let matrices = capture_matrices();
    (0..mips)
        .flat_map(|mip| {
            let p = params(mip);
            matrices.map(|m| CaptureUniforms::new(m, p))
        })
        .collect()
}

/// A cube texture with one view for sampling and per-face views for rendering.
pub struct CubeMap {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: u32,
    pub mip_levels: u32,
}

impl CubeMap {
    pub fn new(
        gpu: &GpuContext,
        label: &str,
        size: u32,
        mip_levels: u32,
        format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let texture = allocation_scope(&gpu.device, label, || {
            gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: CUBE_FACES,
                },
                mip_level_count: mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Ok(Self {
            texture,
            view,
            size,
            mip_levels,
        })
    }

    /// A single face at a single mip, for use as a color attachment.
    pub fn face_view(&self, face: u32, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Cube Face"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    /// All six faces of a single mip, sampled as a cube.
    pub fn mip_view(&self, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Cube Mip"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            base_mip_level: mip,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }
}

/// Scratch resources for one precompute step: the capture uniforms, their bind group,
/// and the cube drawn into every face. Dropped (and its buffer destroyed) when the
/// step finishes.
pub struct CaptureRig {
    buffer: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    cube: Mesh,
}

impl CaptureRig {
    pub fn new(gpu: &GpuContext, label: &str, schedule: &[CaptureUniforms]) -> Result<Self> {
        let size = CAPTURE_STRIDE * schedule.len().max(1) as u64;
        let buffer = allocation_scope(&gpu.device, label, || {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        for (i, entry) in schedule.iter().enumerate() {
            gpu.queue
                .write_buffer(&buffer, i as u64 * CAPTURE_STRIDE, bytemuck::bytes_of(entry));
        }

        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Capture Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<CaptureUniforms>() as u64,
                        ),
                    },
                    count: None,
                }],
            });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Bind Group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<CaptureUniforms>() as u64),
                }),
            }],
        });

        Ok(Self {
            buffer,
            layout,
            bind_group,
            cube: Mesh::cube(gpu),
        })
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Builds a capture pipeline: the shared cube vertex stage plus `module`'s `fs`.
    pub fn pipeline(
        &self,
        gpu: &GpuContext,
        label: &str,
        module: &wgpu::ShaderModule,
        source_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&self.layout, source_layout],
                push_constant_ranges: &[],
            });
        gpu.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs"),
                    buffers: &[Vertex3d::POSITION_LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                // The camera sits inside the cube.
                primitive: wgpu::PrimitiveState {
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }

    /// Renders all six faces of `mip` of `target`, using schedule entries starting at
    /// `mip * 6`.
    pub fn render_faces(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        source: &wgpu::BindGroup,
        target: &CubeMap,
        mip: u32,
    ) {
        for face in 0..CUBE_FACES {
            let view = target.face_view(face, mip);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Cube Capture Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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
            let entry = (mip * CUBE_FACES + face) as u64;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[(entry * CAPTURE_STRIDE) as u32]);
            pass.set_bind_group(1, source, &[]);
            self.cube.draw(&mut pass);
        }
    }
}

impl Drop for CaptureRig {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direction through texel coordinate (`u`, `v`) of `face`, v pointing down, using
    /// the cube map addressing of wgpu/Vulkan/D3D.
    fn texel_direction(face: usize, u: f32, v: f32) -> Vec3 {
        let s = 2.0 * u - 1.0;
        let t = 2.0 * v - 1.0;
        match face {
            0 => Vec3::new(1.0, -t, -s),
            1 => Vec3::new(-1.0, -t, s),
            2 => Vec3::new(s, 1.0, t),
            3 => Vec3::new(s, -1.0, -t),
            4 => Vec3::new(s, -t, 1.0),
            _ => Vec3::new(-s, -t, -1.0),
        }
    }

    #[test]
    fn each_view_looks_down_its_face() {
        for (view, (dir, _)) in capture_views().iter().zip(FACES) {
            let forward = view.transform_vector3(dir);
            assert!((forward - Vec3::Z).length() < 1e-5, "{dir:?} -> {forward:?}");
        }
    }

    #[test]
    fn screen_axes_match_texel_axes() {
        let matrices = capture_matrices();
        for (face, m) in matrices.iter().enumerate() {
            for (u, v) in [(0.25, 0.25), (0.8, 0.1), (0.5, 0.9)] {
                let dir = texel_direction(face, u, v);
                let ndc = m.project_point3(dir);
                let expected_x = 2.0 * u - 1.0;
                let expected_y = 1.0 - 2.0 * v;
                assert!((ndc.x - expected_x).abs() < 1e-4, "face {face} x");
                assert!((ndc.y - expected_y).abs() < 1e-4, "face {face} y");
            }
        }
    }

    #[test]
    fn mip_sizes_halve_to_one() {
        assert_eq!(mip_size(128, 4), 8);
        assert_eq!(mip_size(4, 5), 1);
        assert_eq!(full_mip_count(512), 10);
        assert_eq!(full_mip_count(1), 1);
    }

    #[test]
    fn schedule_has_one_entry_per_face_and_mip() {
        let schedule = capture_schedule(5, |mip| Vec4::new(mip as f32, 0.0, 0.0, 0.0));
        assert_eq!(schedule.len(), 30);
        assert_eq!(schedule[6 * 3 + 2].params[0], 3.0);
        assert!(std::mem::size_of::<CaptureUniforms>() as u64 <= CAPTURE_STRIDE);
    }
}
