use glam::{Vec3, Vec4};

/// One end of a debug line, as uploaded to the GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl LineVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<LineVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x4,
            },
        ],
    };
}

/// World-space line segments accumulated by gameplay code during a frame.
///
/// The debug overlay stage uploads everything in one buffer and then clears the list,
/// so each segment is drawn exactly once.
#[derive(Default, Debug)]
pub struct DebugLines {
    vertices: Vec<LineVertex>,
}

impl DebugLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, from: Vec3, to: Vec3, color: Vec4) {
        let color = color.to_array();
        self.vertices.push(LineVertex {
            position: from.to_array(),
            color,
        });
        self.vertices.push(LineVertex {
            position: to.to_array(),
            color,
        });
    }

    /// The twelve edges of an axis-aligned box.
    pub fn aabb(&mut self, min: Vec3, max: Vec3, color: Vec4) {
        let corner = |i: u32| {
            Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        };
        for i in 0..8u32 {
            for bit in [1, 2, 4] {
                if i & bit == 0 {
                    self.line(corner(i), corner(i | bit), color);
                }
            }
        }
    }

    /// Red, green and blue lines along +X, +Y and +Z.
    pub fn axes(&mut self, origin: Vec3, size: f32) {
        self.line(origin, origin + Vec3::X * size, Vec4::new(1.0, 0.0, 0.0, 1.0));
        self.line(origin, origin + Vec3::Y * size, Vec4::new(0.0, 1.0, 0.0, 1.0));
        self.line(origin, origin + Vec3::Z * size, Vec4::new(0.0, 0.0, 1.0, 1.0));
    }

    pub fn vertices(&self) -> &[LineVertex] {
        &self.vertices
    }

    pub fn segment_count(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_has_twelve_unit_edges() {
        let mut lines = DebugLines::new();
        lines.aabb(Vec3::ZERO, Vec3::ONE, Vec4::ONE);
        assert_eq!(lines.segment_count(), 12);
        for pair in lines.vertices().chunks(2) {
            let a = Vec3::from(pair[0].position);
            let b = Vec3::from(pair[1].position);
            assert_eq!(a.distance(b), 1.0);
        }
    }

    #[test]
    fn clear_consumes_everything() {
        let mut lines = DebugLines::new();
        lines.axes(Vec3::ZERO, 2.0);
        assert_eq!(lines.segment_count(), 3);
        lines.clear();
        assert!(lines.is_empty());
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<LineVertex>(), 28);
        assert_eq!(LineVertex::LAYOUT.array_stride, 28);
    }
}
