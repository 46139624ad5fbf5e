//! Specular pre-filtering: one roughness level per mip.

use glam::Vec4;

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::ibl::capture::{CaptureRig, CaptureUniforms, CubeMap, capture_schedule};
use crate::ibl::{IBL_FORMAT, source_group, source_layout};

pub const PREFILTER_SIZE: u32 = 128;
pub const PREFILTER_MIPS: u32 = 5;
pub const PREFILTER_SAMPLES: u32 = 1024;

const SHADER: &str = concat!(
    include_str!("../shaders/ibl_capture.wgsl"),
    include_str!("../shaders/ibl_prefilter.wgsl"),
);

/// Roughness convolved into `mip`: evenly spaced from 0 at mip 0 to 1 at the last mip.
pub fn roughness_for_mip(mip: u32, mips: u32) -> f32 {
    if mips <= 1 {
        return 0.0;
    }
    mip as f32 / (mips - 1) as f32
}

/// Per face and mip: roughness, source face size, sample count, last source mip.
fn schedule(source_size: u32, source_mips: u32) -> Vec<CaptureUniforms> {
    capture_schedule(PREFILTER_MIPS, |mip| {
        Vec4::new(
            roughness_for_mip(mip, PREFILTER_MIPS),
            source_size as f32,
            PREFILTER_SAMPLES as f32,
            source_mips.saturating_sub(1) as f32,
        )
    })
}

pub fn build(
    gpu: &GpuContext,
    environment: &CubeMap,
    sampler: &wgpu::Sampler,
) -> Result<CubeMap> {
    let cube = CubeMap::new(gpu, "Prefiltered Cube", PREFILTER_SIZE, PREFILTER_MIPS, IBL_FORMAT)?;
    let schedule = schedule(environment.size, environment.mip_levels);
    let rig = CaptureRig::new(gpu, "Prefilter Capture Uniforms", &schedule)?;

    let layout = source_layout(gpu, wgpu::TextureViewDimension::Cube);
    let group = source_group(gpu, &layout, &environment.view, sampler);
    let module = gpu.shader("Prefilter Shader", SHADER);
    let pipeline = rig.pipeline(gpu, "Prefilter Pipeline", &module, &layout, IBL_FORMAT);

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Prefilter Encoder"),
        });
    for mip in 0..PREFILTER_MIPS {
        rig.render_faces(&mut encoder, &pipeline, &group, &cube, mip);
    }
    gpu.queue.submit(std::iter::once(encoder.finish()));
    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibl::capture::mip_size;

    #[test]
    fn roughness_spans_the_mip_chain() {
        let levels: Vec<f32> = (0..PREFILTER_MIPS)
            .map(|m| roughness_for_mip(m, PREFILTER_MIPS))
            .collect();
        assert_eq!(levels, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(roughness_for_mip(0, 1), 0.0);
    }

    #[test]
    fn schedule_carries_roughness_per_mip() {
        let entries = schedule(512, 10);
        assert_eq!(entries.len(), (PREFILTER_MIPS * 6) as usize);
        for (mip, roughness) in [0.0, 0.25, 0.5, 0.75, 1.0].into_iter().enumerate() {
            for face in 0..6 {
                assert_eq!(entries[mip * 6 + face].params, [roughness, 512.0, 1024.0, 9.0]);
            }
        }
        let again = schedule(512, 10);
        assert_eq!(
            bytemuck::cast_slice::<CaptureUniforms, u8>(&entries),
            bytemuck::cast_slice::<CaptureUniforms, u8>(&again)
        );
    }

    #[test]
    fn last_mip_is_eight_texels() {
        assert_eq!(mip_size(PREFILTER_SIZE, PREFILTER_MIPS - 1), 8);
    }
}
