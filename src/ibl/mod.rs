//! Image-based lighting, computed once at startup.
//!
//! [`IblMaps::precompute`] turns an equirectangular HDR into the four maps the lighting
//! stage samples:
//!
//! 1. an environment cube (512² faces, full mip chain), also drawn by the skybox;
//! 2. a diffuse irradiance cube (32² faces);
//! 3. a specular pre-filtered cube (128² base, 5 mips, roughness `mip / 4`);
//! 4. a split-sum BRDF table (512², two channels).
//!
//! Each step renders into the faces of its cube with its own scratch uniforms and
//! pipeline, submits, and releases the scratch before the next step starts. The maps
//! never change afterwards.

mod brdf_lut;
mod capture;
mod environment;
mod hdr;
mod irradiance;
mod prefilter;

use std::path::Path;

pub use brdf_lut::{BRDF_LUT_FORMAT, BRDF_LUT_SIZE};
pub use capture::{CubeMap, capture_matrices, capture_views, full_mip_count, mip_size};
pub use environment::ENVIRONMENT_SIZE;
pub use hdr::HdrImage;
pub use irradiance::IRRADIANCE_SIZE;
pub use prefilter::{PREFILTER_MIPS, PREFILTER_SIZE, roughness_for_mip};

use crate::error::Result;
use crate::gpu::GpuContext;

/// Format of every IBL cube.
pub const IBL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// The precomputed lighting maps plus the samplers they are read with.
pub struct IblMaps {
    pub environment: CubeMap,
    pub irradiance: CubeMap,
    pub prefiltered: CubeMap,
    pub brdf_lut: wgpu::Texture,
    pub brdf_lut_view: wgpu::TextureView,
    /// Trilinear, used for all three cubes.
    pub sampler: wgpu::Sampler,
    /// Bilinear and clamped, for the BRDF table.
    pub lut_sampler: wgpu::Sampler,
}

impl IblMaps {
    /// Loads `hdr_path` and runs every precompute step in order.
    ///
    /// A missing or undecodable file is an error; there is no fallback environment.
    pub fn precompute(gpu: &GpuContext, hdr_path: &Path) -> Result<Self> {
        let max_width = gpu.device.limits().max_texture_dimension_2d;
        let hdr = HdrImage::load(hdr_path, max_width)?;
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("IBL Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let lut_sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("BRDF LUT Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let environment = environment::build(gpu, &hdr, &sampler)?;
        let irradiance = irradiance::build(gpu, &environment, &sampler)?;
        let prefiltered = prefilter::build(gpu, &environment, &sampler)?;
        let brdf_lut = brdf_lut::build(gpu)?;
        let brdf_lut_view = brdf_lut.create_view(&wgpu::TextureViewDescriptor::default());
        log::info!("image-based lighting ready ({})", hdr_path.display());

        Ok(Self {
            environment,
            irradiance,
            prefiltered,
            brdf_lut,
            brdf_lut_view,
            sampler,
            lut_sampler,
        })
    }

    /// Highest mip of the pre-filtered cube, i.e. the mip for roughness 1.
    pub fn max_prefilter_mip(&self) -> f32 {
        (self.prefiltered.mip_levels - 1) as f32
    }

    /// Layout of the lighting stage's IBL group: irradiance, pre-filtered, BRDF table,
    /// cube sampler, table sampler.
    pub fn layout(gpu: &GpuContext) -> wgpu::BindGroupLayout {
        let texture = |binding, view_dimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let sampler = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        gpu.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("IBL Layout"),
                entries: &[
                    texture(0, wgpu::TextureViewDimension::Cube),
                    texture(1, wgpu::TextureViewDimension::Cube),
                    texture(2, wgpu::TextureViewDimension::D2),
                    sampler(3),
                    sampler(4),
                ],
            })
    }

    pub fn bind_group(&self, gpu: &GpuContext, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("IBL Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.irradiance.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.prefiltered.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.brdf_lut_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.lut_sampler),
                },
            ],
        })
    }

    /// Releases the GPU memory of every map.
    pub fn destroy(&self) {
        self.environment.texture.destroy();
        self.irradiance.texture.destroy();
        self.prefiltered.texture.destroy();
        self.brdf_lut.destroy();
    }
}

/// Layout for a sampled source texture of dimension `dimension` plus its sampler.
pub(crate) fn source_layout(
    gpu: &GpuContext,
    dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayout {
    gpu.device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sampled Source Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: dimension,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        })
}

pub(crate) fn source_group(
    gpu: &GpuContext,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Sampled Source"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn map_sizes() {
        assert_eq!(full_mip_count(ENVIRONMENT_SIZE), 10);
        assert_eq!(IRRADIANCE_SIZE, 32);
        assert_eq!(mip_size(PREFILTER_SIZE, PREFILTER_MIPS - 1), 8);
        assert_eq!(BRDF_LUT_SIZE, 512);
    }

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    /// World axes that land on view right, view up and view forward for each face.
    #[test]
    fn capture_faces_have_known_axes() {
        let expected = [
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
            (Vec3::Z, Vec3::Y, Vec3::NEG_X),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::X, Vec3::Z, Vec3::NEG_Y),
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
        ];
        let views = capture_views();
        for (face, (view, (right, up, forward))) in views.iter().zip(expected).enumerate() {
            assert!(close(view.transform_vector3(right), Vec3::X), "face {face} right");
            assert!(close(view.transform_vector3(up), Vec3::Y), "face {face} up");
            assert!(close(view.transform_vector3(forward), Vec3::Z), "face {face} forward");
        }
    }

    #[test]
    fn face_centers_project_to_the_middle_of_the_far_half() {
        let forward = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (m, dir) in capture_matrices().iter().zip(forward) {
            let ndc = m.project_point3(dir);
            assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
        let corner = capture_matrices()[4].project_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!((corner.x - 1.0).abs() < 1e-5 && (corner.y - 1.0).abs() < 1e-5);
    }
}
