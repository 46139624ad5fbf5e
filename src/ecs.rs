//! ECS components read by the scene view builder.
//!
//! Entities with a [`Transform`](crate::Transform), a [`MeshRenderer`] and a [`Material`]
//! are drawn; [`DirectionalLight`] and [`PointLight`] entities take their direction and
//! position from their `Transform`. A camera entity carries a [`Camera`](crate::Camera)
//! and optionally [`PostprocessSettings`].
//!
//! ```ignore
//! use tessera::*;
//!
//! let mut world = World::new();
//! world.spawn((
//!     Transform::from_position(Vec3::new(0.0, 1.0, -4.0)),
//!     MeshRenderer::new(sphere),
//!     Material::default().albedo(Vec4::new(0.9, 0.2, 0.2, 1.0)).roughness(0.4),
//! ));
//! world.spawn((Transform::from_position(Vec3::Y * 3.0), PointLight::new(Vec3::ONE, 5.0, 8.0)));
//! ```

use glam::{IVec2, Vec3, Vec4};

use crate::assets::FontId;

/// Type-safe handle to a mesh registered in [`Assets`](crate::Assets).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// Type-safe handle to a texture registered in [`Assets`](crate::Assets).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShadingMode {
    /// Not drawn.
    None,
    /// Albedo plus emission, no lighting.
    Unlit,
    #[default]
    Pbr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendingMode {
    #[default]
    Opaque,
    /// Alpha blended after the skybox, sorted back to front.
    Translucent,
}

/// Makes an entity drawable.
#[derive(Clone, Copy, Debug)]
pub struct MeshRenderer {
    pub mesh: MeshId,
    pub shading: ShadingMode,
    pub blending: BlendingMode,
    /// Listed in the directional shadow queue when opaque.
    pub casts_shadow: bool,
}

impl MeshRenderer {
    pub fn new(mesh: MeshId) -> Self {
        Self {
            mesh,
            shading: ShadingMode::Pbr,
            blending: BlendingMode::Opaque,
            casts_shadow: true,
        }
    }

    pub fn unlit(mut self) -> Self {
        self.shading = ShadingMode::Unlit;
        self
    }

    pub fn translucent(mut self) -> Self {
        self.blending = BlendingMode::Translucent;
        self.casts_shadow = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.shading = ShadingMode::None;
        self
    }
}

/// Optional texture maps of a [`Material`]. Absent maps bind a fallback texture.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MaterialMaps {
    pub albedo: Option<TextureId>,
    pub normal: Option<TextureId>,
    pub roughness: Option<TextureId>,
    pub metallic: Option<TextureId>,
    pub occlusion: Option<TextureId>,
    pub emissive: Option<TextureId>,
}

impl MaterialMaps {
    /// The maps in bind order, matching [`MapSlot::ALL`](crate::texture::MapSlot::ALL).
    pub fn slots(&self) -> [Option<TextureId>; 6] {
        [
            self.albedo,
            self.normal,
            self.roughness,
            self.metallic,
            self.occlusion,
            self.emissive,
        ]
    }
}

/// Metallic-roughness PBR parameters. Map samples multiply the scalar factors,
/// except emission, which is added.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub emissive: Vec3,
    pub albedo: Vec4,
    pub roughness: f32,
    pub metallic: f32,
    /// Opaque fragments with albedo alpha below this are discarded.
    pub opacity_mask_threshold: f32,
    pub maps: MaterialMaps,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            emissive: Vec3::ZERO,
            albedo: Vec4::ONE,
            roughness: 1.0,
            metallic: 1.0,
            opacity_mask_threshold: 0.5,
            maps: MaterialMaps::default(),
        }
    }
}

impl Material {
    pub fn albedo(mut self, albedo: Vec4) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn maps(mut self, maps: MaterialMaps) -> Self {
        self.maps = maps;
        self
    }
}

/// Infinitely distant light shining along its transform's forward (-Z) axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionalLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self { color, intensity }
    }
}

/// Omnidirectional light at its transform's position, attenuated to zero at `range`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

impl PointLight {
    pub fn new(color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            color,
            intensity,
            range,
        }
    }
}

/// Per-camera overrides for the post-process chain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostprocessSettings {
    pub exposure: f32,
}

impl Default for PostprocessSettings {
    fn default() -> Self {
        Self { exposure: 1.0 }
    }
}

/// Text drawn in screen pixels by the UI stage, origin at the viewport's top-left.
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenSpaceText {
    pub position: IVec2,
    pub font: FontId,
    pub size: f32,
    pub text: String,
    pub color: Vec4,
}

impl ScreenSpaceText {
    pub fn new(font: FontId, text: impl Into<String>) -> Self {
        Self {
            position: IVec2::ZERO,
            font,
            size: 16.0,
            text: text.into(),
            color: Vec4::ONE,
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = IVec2::new(x, y);
        self
    }

    pub fn color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }
}

/// A mesh drawn in the UI stage with pixel coordinates: the transform's x/y are the
/// top-left corner in pixels, its scale the size in pixels.
#[derive(Clone, Copy, Debug)]
pub struct OrthoMesh {
    pub mesh: MeshId,
    pub color: Vec4,
    pub texture: Option<TextureId>,
}
