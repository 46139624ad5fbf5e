//! Diffuse irradiance convolution of the environment cube.

use glam::Vec4;

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::ibl::capture::{CaptureRig, CubeMap, capture_schedule};
use crate::ibl::{IBL_FORMAT, source_group, source_layout};

pub const IRRADIANCE_SIZE: u32 = 32;

/// Mip of the environment the convolution reads from; a 64² face is plenty for a
/// cosine-weighted integral and keeps the sum free of aliasing.
pub const IRRADIANCE_SOURCE_MIP: u32 = 3;

/// Angular step of the hemisphere walk, in radians.
pub const IRRADIANCE_SAMPLE_DELTA: f32 = 0.025;

const SHADER: &str = concat!(
    include_str!("../shaders/ibl_capture.wgsl"),
    include_str!("../shaders/ibl_irradiance.wgsl"),
);

pub fn build(
    gpu: &GpuContext,
    environment: &CubeMap,
    sampler: &wgpu::Sampler,
) -> Result<CubeMap> {
    let cube = CubeMap::new(gpu, "Irradiance Cube", IRRADIANCE_SIZE, 1, IBL_FORMAT)?;
    let source_mip = IRRADIANCE_SOURCE_MIP.min(environment.mip_levels - 1) as f32;
    let schedule = capture_schedule(1, |_| {
        Vec4::new(0.0, environment.size as f32, IRRADIANCE_SAMPLE_DELTA, source_mip)
    });
    let rig = CaptureRig::new(gpu, "Irradiance Capture Uniforms", &schedule)?;

    let layout = source_layout(gpu, wgpu::TextureViewDimension::Cube);
    let group = source_group(gpu, &layout, &environment.view, sampler);
    let module = gpu.shader("Irradiance Shader", SHADER);
    let pipeline = rig.pipeline(gpu, "Irradiance Pipeline", &module, &layout, IBL_FORMAT);

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Irradiance Encoder"),
        });
    rig.render_faces(&mut encoder, &pipeline, &group, &cube, 0);
    gpu.queue.submit(std::iter::once(encoder.finish()));
    Ok(cube)
}
