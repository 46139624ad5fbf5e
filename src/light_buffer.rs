//! The light buffer pair consumed by culling and shading.
//!
//! - a dense array of [`MAX_LIGHTS`] [`GpuLight`]s, rewritten every frame from the scene
//!   view's point lights, with unused slots marked by `range = -1`
//! - the visible-light-index buffer, `MAX_LIGHTS` `i32` slots per tile, written only by
//!   the culling shader; a tile's list ends at the first `-1`
//! - a second index buffer of the same shape for translucent surfaces, culled from the
//!   camera near plane instead of the tile's minimum opaque depth
//!
//! Lights past `MAX_LIGHTS` are dropped in iteration order: the first ones seen win.

use std::cell::Cell;

use crate::error::{Result, allocation_scope};
use crate::gpu::GpuContext;
use crate::scene_view::PointLightData;
use crate::tiling::TileGrid;

/// Capacity of the light array and of each tile's index list.
/// Matches `MAX_LIGHTS` in `common.wgsl`.
pub const MAX_LIGHTS: usize = 512;

/// Range written into unused light slots.
pub const LIGHT_SENTINEL_RANGE: f32 = -1.0;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub position: [f32; 4],
    pub color: [f32; 4],
    /// `[range, intensity, reserved, reserved]`
    pub range_intensity: [f32; 4],
}

impl GpuLight {
    pub const UNUSED: GpuLight = GpuLight {
        position: [0.0; 4],
        color: [0.0; 4],
        range_intensity: [LIGHT_SENTINEL_RANGE, 0.0, 0.0, 0.0],
    };

    pub fn is_unused(&self) -> bool {
        self.range_intensity[0] < 0.0
    }
}

impl From<&PointLightData> for GpuLight {
    fn from(light: &PointLightData) -> Self {
        Self {
            position: light.position.extend(1.0).to_array(),
            color: light.color.extend(1.0).to_array(),
            range_intensity: [light.range.max(0.0), light.intensity, 0.0, 0.0],
        }
    }
}

/// Result of packing one frame's point lights.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackReport {
    /// `min(active, MAX_LIGHTS)`, the count handed to the culling shader.
    pub kept: usize,
    pub dropped: usize,
}

/// Fills `slots` with the first `slots.len()` lights and sentinels the rest.
pub fn pack_lights(lights: &[PointLightData], slots: &mut [GpuLight]) -> PackReport {
    let kept = lights.len().min(slots.len());
    for (slot, light) in slots.iter_mut().zip(&lights[..kept]) {
        *slot = GpuLight::from(light);
    }
    slots[kept..].fill(GpuLight::UNUSED);
    PackReport {
        kept,
        dropped: lights.len() - kept,
    }
}

/// Fires on the frame an overflow starts and stays quiet until it clears.
#[derive(Debug, Default)]
pub(crate) struct OverflowLatch {
    overflowing: Cell<bool>,
}

impl OverflowLatch {
    /// Returns `true` when a warning should be logged for this frame.
    pub fn observe(&self, dropped: usize) -> bool {
        let was = self.overflowing.replace(dropped > 0);
        dropped > 0 && !was
    }
}

/// Byte size of the visible-light-index buffer for a grid.
pub fn visible_index_size(grid: &TileGrid) -> u64 {
    (MAX_LIGHTS as u64) * grid.tile_count() as u64 * std::mem::size_of::<i32>() as u64
}

pub struct LightBuffers {
    pub(crate) lights: wgpu::Buffer,
    pub(crate) visible_indices: wgpu::Buffer,
    pub(crate) translucent_indices: wgpu::Buffer,
    grid: TileGrid,
}

impl LightBuffers {
    pub fn new(gpu: &GpuContext, grid: TileGrid) -> Result<Self> {
        let lights = allocation_scope(&gpu.device, "Light Buffer", || {
            use wgpu::util::DeviceExt;
            gpu.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Light Buffer"),
                    contents: bytemuck::cast_slice(&[GpuLight::UNUSED; MAX_LIGHTS]),
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                })
        })?;

        let index_buffer = |label: &'static str| {
            allocation_scope(&gpu.device, label, || {
                gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: visible_index_size(&grid),
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
        };
        let visible_indices = index_buffer("Visible Light Indices")?;
        let translucent_indices = index_buffer("Translucent Light Indices")?;

        log::debug!(
            "light buffers for {}x{} tiles ({} KiB of indices per list)",
            grid.work_groups_x,
            grid.work_groups_y,
            visible_index_size(&grid) / 1024
        );

        Ok(Self {
            lights,
            visible_indices,
            translucent_indices,
            grid,
        })
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Writes the whole light array; partial updates never reach the GPU.
    pub fn upload(&self, gpu: &GpuContext, slots: &[GpuLight; MAX_LIGHTS]) {
        gpu.queue
            .write_buffer(&self.lights, 0, bytemuck::cast_slice(slots.as_slice()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::TileRounding;
    use glam::Vec3;

    fn lights(n: usize) -> Vec<PointLightData> {
        (0..n)
            .map(|i| PointLightData {
                position: Vec3::new(i as f32, 0.0, 0.0),
                color: Vec3::ONE,
                intensity: 1.0,
                range: 3.0,
            })
            .collect()
    }

    #[test]
    fn gpu_light_is_three_vec4s() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
    }

    #[test]
    fn no_lights_means_all_sentinels() {
        let mut slots = [GpuLight::UNUSED; MAX_LIGHTS];
        slots[3] = GpuLight::from(&lights(1)[0]);
        let report = pack_lights(&[], &mut slots);
        assert_eq!(report, PackReport { kept: 0, dropped: 0 });
        assert!(slots.iter().all(GpuLight::is_unused));
    }

    #[test]
    fn overflow_keeps_the_first_lights() {
        let input = lights(MAX_LIGHTS + 50);
        let mut slots = [GpuLight::UNUSED; MAX_LIGHTS];
        let report = pack_lights(&input, &mut slots);
        assert_eq!(report.kept, MAX_LIGHTS);
        assert_eq!(report.dropped, 50);
        assert_eq!(slots[0].position[0], 0.0);
        assert_eq!(slots[MAX_LIGHTS - 1].position[0], (MAX_LIGHTS - 1) as f32);
        assert!(!slots.iter().any(GpuLight::is_unused));
    }

    #[test]
    fn partial_fill_sentinels_the_tail() {
        let mut slots = [GpuLight::UNUSED; MAX_LIGHTS];
        pack_lights(&lights(10), &mut slots);
        let report = pack_lights(&lights(4), &mut slots);
        assert_eq!(report.kept, 4);
        assert!(!slots[3].is_unused());
        assert!(slots[4..].iter().all(GpuLight::is_unused));
        assert_eq!(slots[2].range_intensity, [3.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn overflow_warns_once_per_episode() {
        let latch = OverflowLatch::default();
        assert!(latch.observe(50));
        assert!(!latch.observe(50));
        assert!(!latch.observe(0));
        assert!(latch.observe(1));
    }

    #[test]
    fn index_buffer_sized_per_tile() {
        let grid = TileGrid::new(1920, 1080, TileRounding::Ceil);
        assert_eq!(visible_index_size(&grid), 512 * 8160 * 4);
        // fits the default 128 MiB storage binding at 4K
        let grid = TileGrid::new(3840, 2160, TileRounding::Ceil);
        assert!(visible_index_size(&grid) <= 128 << 20);
    }
}
