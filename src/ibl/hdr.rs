//! Equirectangular HDR loading.

use std::path::Path;

use half::f16;
use image::imageops::FilterType;

use crate::error::{RendererError, Result};
use crate::gpu::GpuContext;

pub const EQUIRECT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Decoded RGBA radiance, stored as half-float bits ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u16>,
}

impl HdrImage {
    /// Converts 32-bit float RGBA into half floats.
    ///
    /// Negative and NaN radiance becomes zero; values beyond the f16 range saturate
    /// instead of turning into infinity.
    pub fn from_rgba32f(width: u32, height: u32, rgba: &[f32]) -> Self {
        let texels = rgba
            .iter()
            .map(|&v| {
                let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, f16::MAX.to_f32()) };
                f16::from_f32(v).to_bits()
            })
            .collect();
        Self {
            width,
            height,
            texels,
        }
    }

    /// Loads `path`, shrinking it to fit `max_width` if needed.
    pub fn load(path: &Path, max_width: u32) -> Result<Self> {
        if !path.exists() {
            return Err(RendererError::EnvironmentMissing(path.to_path_buf()));
        }
        let decode = |source| RendererError::EnvironmentDecode {
            path: path.to_path_buf(),
            source,
        };
        let mut image = image::open(path).map_err(decode)?;
        if image.width() > max_width {
            log::warn!(
                "environment {} is {} texels wide, downscaling to {max_width}",
                path.display(),
                image.width()
            );
            image = image.resize(max_width, max_width / 2, FilterType::Triangle);
        }
        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        log::info!("loaded environment {} ({width}x{height})", path.display());
        Ok(Self::from_rgba32f(width, height, rgba.as_raw()))
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Uploads the image as a sampled 2D texture.
    pub fn upload(&self, gpu: &GpuContext) -> wgpu::Texture {
        use wgpu::util::DeviceExt;

        gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("Equirectangular Environment"),
                size: wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: EQUIRECT_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            self.bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_is_deterministic() {
        let rgba = [0.5, 1.0, 2.0, 1.0, 0.25, 0.125, 8.0, 1.0];
        let a = HdrImage::from_rgba32f(2, 1, &rgba);
        let b = HdrImage::from_rgba32f(2, 1, &rgba);
        assert_eq!(a, b);
        assert_eq!(f16::from_bits(a.texels[2]).to_f32(), 2.0);
        assert_eq!(a.bytes().len(), 16);
    }

    #[test]
    fn out_of_range_radiance_is_clamped() {
        let image = HdrImage::from_rgba32f(1, 1, &[-1.0, f32::NAN, 1.0e9, f32::INFINITY]);
        let values: Vec<f32> = image
            .texels
            .iter()
            .map(|&bits| f16::from_bits(bits).to_f32())
            .collect();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 0.0);
        assert!(values[2].is_finite());
        assert!(values[3].is_finite());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HdrImage::load(Path::new("does/not/exist.hdr"), 8192).unwrap_err();
        assert!(matches!(err, RendererError::EnvironmentMissing(_)));
    }
}
