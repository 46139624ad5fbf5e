//! Screen-space ambient occlusion over the post chain.
//!
//! The 16-sample hemisphere kernel and the 4×4 rotation noise come from one seeded
//! generator, so a given [`RendererConfig::ssao_seed`](crate::RendererConfig) always
//! produces the same occlusion pattern. The kernel is uploaded on the stage's first
//! frame and reused for the renderer's lifetime.

use std::cell::OnceCell;

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::gpu::GpuContext;
use crate::post_process::{FullscreenPass, InputKind};
use crate::render_graph::{FrameContext, RenderStage, StageId, StageIo};
use crate::render_targets::{POST_FORMAT, TargetId};

pub const KERNEL_SIZE: usize = 16;
pub const NOISE_SIZE: usize = 16;

const RADIUS: f32 = 0.5;
const BIAS: f32 = 0.025;
const STRENGTH: f32 = 1.0;

const SHADER: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/ssao.wgsl"),
);

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SsaoKernel {
    pub samples: [[f32; 4]; KERNEL_SIZE],
    pub noise: [[f32; 4]; NOISE_SIZE],
    /// `[radius, bias, strength, 0]`
    pub params: [f32; 4],
}

fn lerp(a: f32, b: f32, f: f32) -> f32 {
    a + f * (b - a)
}

impl SsaoKernel {
    pub fn generate(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut samples = [[0.0; 4]; KERNEL_SIZE];
        for (i, slot) in samples.iter_mut().enumerate() {
            let direction = Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(0.01..1.0),
            )
            .normalize_or(Vec3::Z);
            // Concentrate samples near the shaded point.
            let t = i as f32 / KERNEL_SIZE as f32;
            let sample = direction * rng.random_range(0.0..1.0f32) * lerp(0.1, 1.0, t * t);
            *slot = sample.extend(0.0).to_array();
        }

        let mut noise = [[0.0; 4]; NOISE_SIZE];
        for slot in &mut noise {
            let xy = Vec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0))
                .normalize_or(Vec2::X);
            *slot = [xy.x, xy.y, 0.0, 0.0];
        }

        Self {
            samples,
            noise,
            params: [RADIUS, BIAS, STRENGTH, 0.0],
        }
    }
}

pub struct SsaoStage {
    seed: u64,
    pass: FullscreenPass,
    kernel_layout: wgpu::BindGroupLayout,
    kernel: OnceCell<(wgpu::Buffer, wgpu::BindGroup)>,
}

impl SsaoStage {
    pub fn new(gpu: &GpuContext, seed: u64) -> Self {
        let kernel_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("SSAO Kernel Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<SsaoKernel>() as u64,
                        ),
                    },
                    count: None,
                }],
            });
        let pass = FullscreenPass::new(
            gpu,
            "SSAO Pass",
            SHADER,
            &[InputKind::Color, InputKind::Color, InputKind::Color],
            &[&kernel_layout],
            POST_FORMAT,
        );
        Self {
            seed,
            pass,
            kernel_layout,
            kernel: OnceCell::new(),
        }
    }

    fn kernel_group(&self, gpu: &GpuContext) -> &wgpu::BindGroup {
        let (_, group) = self.kernel.get_or_init(|| {
            use wgpu::util::DeviceExt;

            log::debug!("generating SSAO kernel from seed {}", self.seed);
            let buffer = gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("SSAO Kernel"),
                    contents: bytemuck::bytes_of(&SsaoKernel::generate(self.seed)),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("SSAO Kernel Bind Group"),
                layout: &self.kernel_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            (buffer, group)
        });
        group
    }
}

impl RenderStage for SsaoStage {
    fn id(&self) -> StageId {
        StageId::Ssao
    }

    fn execute(&self, ctx: &mut FrameContext<'_>, io: &StageIo) {
        let targets = ctx.targets;
        let (Some(input), Some(output)) =
            (io.input_view(targets), io.output_view(targets, ctx.surface))
        else {
            log::error!("SSAO has no chain routing; skipping");
            return;
        };

        let (Some(depth), Some(normal)) =
            (targets.view(TargetId::LinearDepth), targets.hdr_normal())
        else {
            log::error!("SSAO skipped: depth or normal target missing");
            return;
        };

        let frame_group = self.pass.frame_group(ctx.gpu, ctx.frame);
        let input_group = self.pass.input_group(ctx.gpu, &[input, depth, normal]);
        let kernel_group = self.kernel_group(ctx.gpu);
        self.pass.draw(
            ctx.encoder,
            output,
            &[&frame_group, &input_group, kernel_group],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_kernel() {
        assert_eq!(SsaoKernel::generate(7), SsaoKernel::generate(7));
        assert_ne!(SsaoKernel::generate(7).samples, SsaoKernel::generate(8).samples);
    }

    #[test]
    fn samples_lie_in_the_unit_hemisphere() {
        let kernel = SsaoKernel::generate(0x5EED);
        for sample in kernel.samples {
            let v = Vec3::new(sample[0], sample[1], sample[2]);
            assert!(v.z >= 0.0);
            assert!(v.length() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn later_samples_may_reach_further() {
        // The first sample is scaled by at most 0.1.
        let kernel = SsaoKernel::generate(3);
        let first = Vec3::from_slice(&kernel.samples[0][..3]);
        assert!(first.length() <= 0.1 + 1e-5);
    }

    #[test]
    fn noise_rotates_in_the_tangent_plane() {
        let kernel = SsaoKernel::generate(11);
        for n in kernel.noise {
            assert_eq!(n[2], 0.0);
            assert!((Vec2::new(n[0], n[1]).length() - 1.0).abs() < 1e-4);
        }
        assert_eq!(kernel.params, [RADIUS, BIAS, STRENGTH, 0.0]);
    }

    #[test]
    fn shader_kernel_matches_cpu_layout() {
        assert!(SHADER.contains(&format!("array<vec4<f32>, {KERNEL_SIZE}>")));
        assert!(SHADER.contains(&format!("const KERNEL_SIZE: u32 = {KERNEL_SIZE}u;")));
        assert_eq!(std::mem::size_of::<SsaoKernel>(), (KERNEL_SIZE + NOISE_SIZE + 1) * 16);
    }
}
