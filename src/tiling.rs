//! Screen tiling for compute light culling.
//!
//! The screen is split into square tiles of [`TILE_SIZE`] pixels. The culling stage
//! dispatches one workgroup per tile, and each tile owns a fixed slice of
//! [`MAX_LIGHTS`](crate::light_buffer::MAX_LIGHTS) entries in the visible-light-index buffer.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Edge length of a culling tile in pixels. Matches `TILE_SIZE` in `light_culling.wgsl`.
pub const TILE_SIZE: u32 = 16;

/// How a screen dimension is converted into a workgroup count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileRounding {
    /// `(d + d % TILE_SIZE) / TILE_SIZE`. Undercounts some dimensions (20 px gives one
    /// tile, leaving four columns uncovered); kept for parity with older captures.
    Legacy,
    /// Ceiling division; every pixel belongs to a tile.
    #[default]
    Ceil,
}

impl TileRounding {
    /// Number of tiles along one axis of `dimension` pixels. Never zero, so the index
    /// buffer of a tiny target still has a slice to write.
    pub fn tiles(self, dimension: u32) -> u32 {
        let tiles = match self {
            TileRounding::Legacy => (dimension + dimension % TILE_SIZE) / TILE_SIZE,
            TileRounding::Ceil => dimension.div_ceil(TILE_SIZE),
        };
        tiles.max(1)
    }
}

/// The tile grid covering a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub work_groups_x: u32,
    pub work_groups_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, rounding: TileRounding) -> Self {
        Self {
            width,
            height,
            work_groups_x: rounding.tiles(width),
            work_groups_y: rounding.tiles(height),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.work_groups_x * self.work_groups_y
    }

    /// Row-major index of the tile containing pixel `(x, y)`, if that pixel is covered.
    pub fn tile_index(&self, x: u32, y: u32) -> Option<u32> {
        let tx = x / TILE_SIZE;
        let ty = y / TILE_SIZE;
        (tx < self.work_groups_x && ty < self.work_groups_y).then(|| ty * self.work_groups_x + tx)
    }

    /// Pixels on the right and bottom edges that no tile covers.
    pub fn uncovered(&self) -> (u32, u32) {
        (
            self.width.saturating_sub(self.work_groups_x * TILE_SIZE),
            self.height.saturating_sub(self.work_groups_y * TILE_SIZE),
        )
    }

    /// World-space planes of tile `(tx, ty)` between two depth-buffer values, normals
    /// pointing inward: left, right, bottom, top, near, far.
    ///
    /// Same construction as `light_culling.wgsl`. The opaque list uses the tile's
    /// min/max pre-pass depth; the translucent list uses `0.0` to the max depth.
    pub fn tile_planes(
        &self,
        clip_from_world: Mat4,
        tx: u32,
        ty: u32,
        near_depth: f32,
        far_depth: f32,
    ) -> [Vec4; 6] {
        let inv_w = 1.0 / self.width.max(1) as f32;
        let inv_h = 1.0 / self.height.max(1) as f32;
        let (x0, y0) = ((tx * TILE_SIZE) as f32, (ty * TILE_SIZE) as f32);
        let (x1, y1) = (x0 + TILE_SIZE as f32, y0 + TILE_SIZE as f32);
        let left = x0 * inv_w * 2.0 - 1.0;
        let right = x1 * inv_w * 2.0 - 1.0;
        let top = 1.0 - y0 * inv_h * 2.0;
        let bottom = 1.0 - y1 * inv_h * 2.0;

        let world_from_clip_plane = clip_from_world.transpose();
        let world_plane = |clip: Vec4| {
            let plane = world_from_clip_plane * clip;
            plane / plane.truncate().length()
        };
        [
            world_plane(Vec4::new(1.0, 0.0, 0.0, -left)),
            world_plane(Vec4::new(-1.0, 0.0, 0.0, right)),
            world_plane(Vec4::new(0.0, 1.0, 0.0, -bottom)),
            world_plane(Vec4::new(0.0, -1.0, 0.0, top)),
            world_plane(Vec4::new(0.0, 0.0, 1.0, -near_depth)),
            world_plane(Vec4::new(0.0, 0.0, -1.0, far_depth)),
        ]
    }
}

/// Whether a bounding sphere reaches the inside of every plane.
pub fn sphere_touches(planes: &[Vec4], center: Vec3, radius: f32) -> bool {
    let center = center.extend(1.0);
    planes.iter().all(|plane| plane.dot(center) >= -radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_hd_grid() {
        for rounding in [TileRounding::Legacy, TileRounding::Ceil] {
            let grid = TileGrid::new(1920, 1080, rounding);
            assert_eq!((grid.work_groups_x, grid.work_groups_y), (120, 68));
            assert_eq!(grid.tile_count(), 8160);
        }
    }

    #[test]
    fn legacy_formula_undercounts_non_multiples() {
        assert_eq!(TileRounding::Legacy.tiles(20), 1);
        assert_eq!(TileRounding::Ceil.tiles(20), 2);

        let legacy = TileGrid::new(20, 20, TileRounding::Legacy);
        assert_eq!(legacy.uncovered(), (4, 4));
        assert_eq!(legacy.tile_index(18, 0), None);
    }

    #[test]
    fn ceil_is_the_default_and_covers_every_pixel() {
        assert_eq!(TileRounding::default(), TileRounding::Ceil);
        for d in 1..200 {
            let grid = TileGrid::new(d, d, TileRounding::Ceil);
            assert_eq!(grid.uncovered(), (0, 0), "dimension {d}");
            assert!(grid.tile_index(d - 1, d - 1).is_some());
        }
    }

    #[test]
    fn tiny_targets_still_get_a_tile() {
        let grid = TileGrid::new(7, 720, TileRounding::Legacy);
        assert_eq!((grid.work_groups_x, grid.work_groups_y), (1, 45));
        assert_eq!(TileGrid::new(1, 1, TileRounding::Legacy).tile_count(), 1);
        assert!(crate::light_buffer::visible_index_size(&grid) > 0);
    }

    fn camera_and_grid() -> (Mat4, TileGrid) {
        let camera = crate::camera::Camera::new()
            .at(0.0, 0.0, 0.0)
            .looking_at(0.0, 0.0, -1.0)
            .with_clip(0.1, 100.0);
        let grid = TileGrid::new(1280, 720, TileRounding::Ceil);
        (camera.clip_from_world(1280.0 / 720.0), grid)
    }

    #[test]
    fn light_in_front_of_the_opaque_slab_reaches_translucent_list() {
        let (clip_from_world, grid) = camera_and_grid();
        // wall at z = -20 fills the tile; a glass pane at z = -5 is lit by a light at z = -4
        let wall = clip_from_world.project_point3(Vec3::new(0.0, 0.0, -20.0)).z;
        let (tx, ty) = (640 / TILE_SIZE, 360 / TILE_SIZE);
        let light = Vec3::new(0.0, 0.0, -4.0);

        let opaque = grid.tile_planes(clip_from_world, tx, ty, wall, wall);
        let translucent = grid.tile_planes(clip_from_world, tx, ty, 0.0, wall);
        assert!(!sphere_touches(&opaque, light, 2.0));
        assert!(sphere_touches(&translucent, light, 2.0));

        // a light sitting on the wall belongs to both lists
        assert!(sphere_touches(&opaque, Vec3::new(0.0, 0.0, -19.5), 2.0));
        assert!(sphere_touches(&translucent, Vec3::new(0.0, 0.0, -19.5), 2.0));
    }

    #[test]
    fn sky_tiles_keep_translucent_lights() {
        let (clip_from_world, grid) = camera_and_grid();
        // nothing opaque in the tile: the pre-pass leaves depth at the clear value
        let opaque = grid.tile_planes(clip_from_world, 40, 22, 1.0, 1.0);
        let translucent = grid.tile_planes(clip_from_world, 40, 22, 0.0, 1.0);
        let light = Vec3::new(0.0, 0.0, -10.0);
        assert!(!sphere_touches(&opaque, light, 1.0));
        assert!(sphere_touches(&translucent, light, 1.0));
    }

    #[test]
    fn side_planes_reject_lights_outside_the_tile() {
        let (clip_from_world, grid) = camera_and_grid();
        let planes = grid.tile_planes(clip_from_world, 0, 0, 0.0, 1.0);
        // tile 0 is the top-left corner; a light dead ahead is far from it
        assert!(!sphere_touches(&planes, Vec3::new(0.0, 0.0, -10.0), 0.5));
        assert!(sphere_touches(&planes, Vec3::new(-10.1, 5.6, -10.0), 0.5));
    }

    #[test]
    fn tile_indices_are_row_major() {
        let grid = TileGrid::new(64, 32, TileRounding::Ceil);
        assert_eq!(grid.tile_index(0, 0), Some(0));
        assert_eq!(grid.tile_index(17, 0), Some(1));
        assert_eq!(grid.tile_index(0, 16), Some(4));
        assert_eq!(grid.tile_index(63, 31), Some(7));
    }
}
