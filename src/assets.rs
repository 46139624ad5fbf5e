//! Asset registry: meshes, textures and font atlases behind typed handles.

use std::collections::HashMap;
use std::path::Path;

use fontdue::{Font, FontSettings};

use crate::ecs::{MeshId, TextureId};
use crate::error::{RendererError, Result};
use crate::gpu::GpuContext;
use crate::mesh::{Mesh, MeshData};
use crate::texture::{ColorSpace, Texture};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FontId(pub(crate) usize);

/// Placement of one rasterized glyph inside a [`FontAtlas`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphInfo {
    /// `[x, y, width, height]` in normalized atlas coordinates.
    pub uv: [f32; 4],
    pub width: u32,
    pub height: u32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub advance: f32,
}

/// Glyph metrics and packing, independent of the GPU upload.
pub struct GlyphTable {
    glyphs: HashMap<char, GlyphInfo>,
    size: f32,
    line_height: f32,
}

impl GlyphTable {
    pub fn new(glyphs: HashMap<char, GlyphInfo>, size: f32, line_height: f32) -> Self {
        Self {
            glyphs,
            size,
            line_height,
        }
    }

    pub fn glyph(&self, c: char) -> Option<&GlyphInfo> {
        self.glyphs.get(&c)
    }

    /// The pixel size glyphs were rasterized at.
    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    /// Width in pixels of `text` at the rasterized size.
    pub fn measure(&self, text: &str) -> f32 {
        text.chars()
            .filter_map(|c| self.glyphs.get(&c))
            .map(|g| g.advance)
            .sum()
    }
}

/// Printable ASCII rasterized into one R8 texture.
pub struct FontAtlas {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub table: GlyphTable,
}

impl FontAtlas {
    pub fn new(gpu: &GpuContext, font_data: &[u8], size: f32) -> Result<Self> {
        let font = Font::from_bytes(font_data, FontSettings::default())
            .map_err(|e| RendererError::Font(e.to_string()))?;

        let rasterized: Vec<(char, fontdue::Metrics, Vec<u8>)> = (32u8..=126u8)
            .map(|c| {
                let (metrics, bitmap) = font.rasterize(c as char, size);
                (c as char, metrics, bitmap)
            })
            .collect();

        let sizes: Vec<(u32, u32)> = rasterized
            .iter()
            .map(|(_, m, _)| (m.width as u32, m.height as u32))
            .collect();
        let (atlas_width, atlas_height, origins) = pack_rows(&sizes, 256);

        let mut atlas_data = vec![0u8; (atlas_width * atlas_height) as usize];
        let mut glyphs = HashMap::new();

        for ((c, metrics, bitmap), &(x, y)) in rasterized.iter().zip(&origins) {
            let glyph_w = metrics.width as u32;
            let glyph_h = metrics.height as u32;

            for gy in 0..glyph_h {
                let src = (gy * glyph_w) as usize;
                let dst = ((y + gy) * atlas_width + x) as usize;
                atlas_data[dst..dst + glyph_w as usize]
                    .copy_from_slice(&bitmap[src..src + glyph_w as usize]);
            }

            glyphs.insert(
                *c,
                GlyphInfo {
                    uv: [
                        x as f32 / atlas_width as f32,
                        y as f32 / atlas_height as f32,
                        glyph_w as f32 / atlas_width as f32,
                        glyph_h as f32 / atlas_height as f32,
                    ],
                    width: glyph_w,
                    height: glyph_h,
                    offset_x: metrics.xmin as f32,
                    offset_y: metrics.ymin as f32,
                    advance: metrics.advance_width,
                },
            );
        }

        let extent = wgpu::Extent3d {
            width: atlas_width,
            height: atlas_height,
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Font Atlas"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &atlas_data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(atlas_width),
                rows_per_image: Some(atlas_height),
            },
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let line_height = font
            .horizontal_line_metrics(size)
            .map(|m| m.new_line_size)
            .unwrap_or(size * 1.2);

        Ok(Self {
            texture,
            view,
            table: GlyphTable::new(glyphs, size, line_height),
        })
    }
}

/// Shelf-packs rectangles left to right with one pixel of padding, doubling the smaller
/// atlas side until everything fits. Returns the atlas size and each rectangle's origin.
pub(crate) fn pack_rows(sizes: &[(u32, u32)], start: u32) -> (u32, u32, Vec<(u32, u32)>) {
    const PADDING: u32 = 1;
    let (mut atlas_width, mut atlas_height) = (start, start);

    loop {
        let mut origins = Vec::with_capacity(sizes.len());
        let (mut x, mut y, mut row_height) = (PADDING, PADDING, 0u32);
        let mut fits = true;

        for &(w, h) in sizes {
            if x + w + PADDING > atlas_width {
                x = PADDING;
                y += row_height + PADDING;
                row_height = 0;
            }
            if x + w + PADDING > atlas_width || y + h + PADDING > atlas_height {
                fits = false;
                break;
            }
            origins.push((x, y));
            x += w + PADDING;
            row_height = row_height.max(h);
        }

        if fits {
            return (atlas_width, atlas_height, origins);
        }
        if atlas_width <= atlas_height {
            atlas_width *= 2;
        } else {
            atlas_height *= 2;
        }
    }
}

/// Owns every mesh, texture and font the scene refers to by handle.
#[derive(Default)]
pub struct Assets {
    meshes: Vec<Mesh>,
    textures: Vec<Texture>,
    fonts: Vec<FontAtlas>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_mesh_data(&mut self, gpu: &GpuContext, data: &MeshData) -> MeshId {
        self.add_mesh(data.upload(gpu))
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn load_texture(
        &mut self,
        gpu: &GpuContext,
        path: impl AsRef<Path>,
        color_space: ColorSpace,
    ) -> std::result::Result<TextureId, image::ImageError> {
        let path = path.as_ref().to_string_lossy();
        let texture = Texture::from_file(gpu, &path, color_space)?;
        Ok(self.add_texture(texture))
    }

    pub fn load_font(&mut self, gpu: &GpuContext, path: impl AsRef<Path>, size: f32) -> Result<FontId> {
        let data = std::fs::read(path.as_ref())?;
        self.load_font_bytes(gpu, &data, size)
    }

    pub fn load_font_bytes(&mut self, gpu: &GpuContext, data: &[u8], size: f32) -> Result<FontId> {
        let atlas = FontAtlas::new(gpu, data, size)?;
        self.fonts.push(atlas);
        Ok(FontId(self.fonts.len() - 1))
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn font(&self, id: FontId) -> Option<&FontAtlas> {
        self.fonts.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_keeps_rects_inside_and_disjoint() {
        let sizes: Vec<(u32, u32)> = (0..95).map(|i| (8 + i % 7, 12 + i % 5)).collect();
        let (w, h, origins) = pack_rows(&sizes, 64);
        assert_eq!(origins.len(), sizes.len());

        for (i, (&(x, y), &(sw, sh))) in origins.iter().zip(&sizes).enumerate() {
            assert!(x + sw < w && y + sh < h, "rect {i} out of bounds");
            for (j, (&(ox, oy), &(ow, oh))) in origins.iter().zip(&sizes).enumerate().skip(i + 1) {
                let disjoint = x + sw <= ox || ox + ow <= x || y + sh <= oy || oy + oh <= y;
                assert!(disjoint, "rects {i} and {j} overlap");
            }
        }
    }

    #[test]
    fn packing_grows_the_atlas() {
        let (w, h, _) = pack_rows(&[(100, 100), (100, 100)], 64);
        assert!(w >= 128 && h >= 128);
    }

    #[test]
    fn glyph_table_measures_advances() {
        let glyph = |advance| GlyphInfo {
            uv: [0.0; 4],
            width: 1,
            height: 1,
            offset_x: 0.0,
            offset_y: 0.0,
            advance,
        };
        let table = GlyphTable::new(
            HashMap::from([('a', glyph(7.0)), ('b', glyph(9.0))]),
            16.0,
            20.0,
        );
        assert_eq!(table.measure("abba"), 32.0);
        assert_eq!(table.measure("a?"), 7.0);
    }
}
