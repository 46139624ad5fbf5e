//! Equirectangular HDR → mip-mapped environment cube.

use glam::Vec4;

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::ibl::capture::{CaptureRig, CubeMap, capture_schedule, full_mip_count, mip_size};
use crate::ibl::hdr::HdrImage;
use crate::ibl::{IBL_FORMAT, source_group, source_layout};

pub const ENVIRONMENT_SIZE: u32 = 512;

const EQUIRECT_SHADER: &str = concat!(
    include_str!("../shaders/ibl_capture.wgsl"),
    include_str!("../shaders/ibl_equirect.wgsl"),
);

const DOWNSAMPLE_SHADER: &str = concat!(
    include_str!("../shaders/ibl_capture.wgsl"),
    include_str!("../shaders/ibl_downsample.wgsl"),
);

/// Projects `hdr` onto the six faces of a [`ENVIRONMENT_SIZE`] cube, then fills the mip
/// chain by rendering each level from the one above it.
pub fn build(gpu: &GpuContext, hdr: &HdrImage, sampler: &wgpu::Sampler) -> Result<CubeMap> {
    let mips = full_mip_count(ENVIRONMENT_SIZE);
    let cube = CubeMap::new(gpu, "Environment Cube", ENVIRONMENT_SIZE, mips, IBL_FORMAT)?;

    let schedule = capture_schedule(mips, |mip| {
        Vec4::new(0.0, mip_size(ENVIRONMENT_SIZE, mip) as f32, 0.0, 0.0)
    });
    let rig = CaptureRig::new(gpu, "Environment Capture Uniforms", &schedule)?;
    let layout = source_layout(gpu, wgpu::TextureViewDimension::D2);

    let equirect = hdr.upload(gpu);
    let equirect_view = equirect.create_view(&wgpu::TextureViewDescriptor::default());
    let equirect_group = source_group(gpu, &layout, &equirect_view, sampler);

    let module = gpu.shader("Equirect Shader", EQUIRECT_SHADER);
    let pipeline = rig.pipeline(gpu, "Equirect Pipeline", &module, &layout, IBL_FORMAT);

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Environment Encoder"),
        });
    rig.render_faces(&mut encoder, &pipeline, &equirect_group, &cube, 0);

    let cube_layout = source_layout(gpu, wgpu::TextureViewDimension::Cube);
    let module = gpu.shader("Environment Downsample Shader", DOWNSAMPLE_SHADER);
    let downsample = rig.pipeline(
        gpu,
        "Environment Downsample Pipeline",
        &module,
        &cube_layout,
        IBL_FORMAT,
    );
    for mip in 1..mips {
        let above = cube.mip_view(mip - 1);
        let group = source_group(gpu, &cube_layout, &above, sampler);
        rig.render_faces(&mut encoder, &downsample, &group, &cube, mip);
    }

    gpu.queue.submit(std::iter::once(encoder.finish()));
    equirect.destroy();
    log::debug!("environment cube built with {mips} mips");
    Ok(cube)
}
