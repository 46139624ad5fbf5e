//! Material textures and the fallback set used when a map is absent.

use crate::gpu::GpuContext;

/// How the texel values of an image are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    /// Color data (albedo, emissive); decoded from sRGB on sample.
    Srgb,
    /// Non-color data (normals, roughness, metallic, occlusion).
    Linear,
}

impl ColorSpace {
    fn format(self) -> wgpu::TextureFormat {
        match self {
            ColorSpace::Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            ColorSpace::Linear => wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub fn from_rgba(
        gpu: &GpuContext,
        data: &[u8],
        width: u32,
        height: u32,
        color_space: ColorSpace,
        label: &str,
    ) -> Self {
        use wgpu::util::DeviceExt;

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: color_space.format(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
        }
    }

    pub fn from_file(
        gpu: &GpuContext,
        path: &str,
        color_space: ColorSpace,
    ) -> Result<Self, image::ImageError> {
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::from_rgba(gpu, &img, width, height, color_space, path))
    }

    pub fn from_bytes(
        gpu: &GpuContext,
        bytes: &[u8],
        color_space: ColorSpace,
        label: &str,
    ) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::from_rgba(gpu, &img, width, height, color_space, label))
    }

    /// A 1×1 texture of a single texel.
    pub fn solid(gpu: &GpuContext, rgba: [u8; 4], label: &str) -> Self {
        Self::from_rgba(gpu, &rgba, 1, 1, ColorSpace::Linear, label)
    }
}

/// Which fallback stands in for a missing map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    White,
    Black,
    FlatNormal,
}

impl Fallback {
    pub const fn rgba(self) -> [u8; 4] {
        match self {
            Fallback::White => [255, 255, 255, 255],
            Fallback::Black => [0, 0, 0, 255],
            Fallback::FlatNormal => [128, 128, 255, 255],
        }
    }
}

/// What a material slot ends up binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotBinding<T> {
    Map(T),
    Fallback(Fallback),
}

/// A texture slot of the PBR material, in bind order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapSlot {
    Albedo,
    Normal,
    Roughness,
    Metallic,
    Occlusion,
    Emissive,
}

impl MapSlot {
    pub const ALL: [MapSlot; 6] = [
        MapSlot::Albedo,
        MapSlot::Normal,
        MapSlot::Roughness,
        MapSlot::Metallic,
        MapSlot::Occlusion,
        MapSlot::Emissive,
    ];

    /// The texture bound when a material leaves this slot empty. Multiplicative maps
    /// fall back to white, the normal map to an unperturbed normal, emission to black.
    pub const fn fallback(self) -> Fallback {
        match self {
            MapSlot::Albedo | MapSlot::Roughness | MapSlot::Metallic | MapSlot::Occlusion => {
                Fallback::White
            }
            MapSlot::Normal => Fallback::FlatNormal,
            MapSlot::Emissive => Fallback::Black,
        }
    }

    /// The material's own map when it has one, otherwise this slot's fallback.
    pub fn binding<T>(self, map: Option<T>) -> SlotBinding<T> {
        match map {
            Some(map) => SlotBinding::Map(map),
            None => SlotBinding::Fallback(self.fallback()),
        }
    }
}

/// The 1×1 textures bound in place of absent material maps.
///
/// Created once and handed to the renderer at construction.
pub struct DefaultTextureSet {
    pub white: Texture,
    pub black: Texture,
    pub flat_normal: Texture,
}

impl DefaultTextureSet {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            white: Texture::solid(gpu, Fallback::White.rgba(), "Fallback White"),
            black: Texture::solid(gpu, Fallback::Black.rgba(), "Fallback Black"),
            flat_normal: Texture::solid(gpu, Fallback::FlatNormal.rgba(), "Fallback Flat Normal"),
        }
    }

    pub fn get(&self, fallback: Fallback) -> &Texture {
        match fallback {
            Fallback::White => &self.white,
            Fallback::Black => &self.black,
            Fallback::FlatNormal => &self.flat_normal,
        }
    }

    /// The view to bind for `slot`: the material's own map when present, otherwise the fallback.
    pub fn resolve<'a>(&'a self, slot: MapSlot, map: Option<&'a Texture>) -> &'a wgpu::TextureView {
        match slot.binding(map) {
            SlotBinding::Map(texture) => &texture.view,
            SlotBinding::Fallback(fallback) => &self.get(fallback).view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{MaterialMaps, TextureId};

    #[test]
    fn missing_albedo_falls_back_to_white() {
        let maps = MaterialMaps {
            normal: Some(TextureId(7)),
            ..Default::default()
        };
        let bindings: Vec<SlotBinding<TextureId>> = MapSlot::ALL
            .iter()
            .zip(maps.slots())
            .map(|(slot, map)| slot.binding(map))
            .collect();
        assert_eq!(bindings[0], SlotBinding::Fallback(Fallback::White));
        assert_eq!(bindings[1], SlotBinding::Map(TextureId(7)));
        assert_eq!(bindings[5], SlotBinding::Fallback(Fallback::Black));
        assert_eq!(Fallback::White.rgba(), [255, 255, 255, 255]);
    }

    #[test]
    fn unloaded_albedo_binds_like_a_missing_one() {
        let lookup = |_: TextureId| -> Option<&'static str> { None };
        let binding = MapSlot::Albedo.binding(Some(TextureId(3)).and_then(lookup));
        assert_eq!(binding, SlotBinding::Fallback(Fallback::White));
        assert_eq!(MapSlot::Albedo.binding(Some("albedo.png")), SlotBinding::Map("albedo.png"));
    }

    #[test]
    fn every_slot_has_a_deterministic_fallback() {
        let fallbacks: Vec<Fallback> = MapSlot::ALL.iter().map(|s| s.fallback()).collect();
        assert_eq!(
            fallbacks,
            vec![
                Fallback::White,
                Fallback::FlatNormal,
                Fallback::White,
                Fallback::White,
                Fallback::White,
                Fallback::Black,
            ]
        );
    }

    #[test]
    fn flat_normal_decodes_to_positive_z() {
        let [r, g, b, _] = Fallback::FlatNormal.rgba();
        let decode = |c: u8| c as f32 / 255.0 * 2.0 - 1.0;
        assert!(decode(r).abs() < 0.01);
        assert!(decode(g).abs() < 0.01);
        assert_eq!(decode(b), 1.0);
    }
}
