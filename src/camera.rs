use glam::{Mat4, Vec3};

/// A perspective camera.
///
/// Can be used directly or attached to an entity next to an optional
/// [`PostprocessSettings`](crate::PostprocessSettings). Matrices follow glam's right-handed
/// convention with a `0..1` depth range.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // vertical, radians
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: 60f32.to_radians(),
            near: 0.1,
            far: 300.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        let forward = (Vec3::new(target_x, target_y, target_z) - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.forward = forward;
        }
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Compute the right vector from forward and up.
    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    pub fn view_from_world(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// View matrix with the translation removed, used by the skybox.
    pub fn rotation_only_view(&self) -> Mat4 {
        Mat4::look_to_rh(Vec3::ZERO, self.forward, self.up)
    }

    pub fn clip_from_view(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    pub fn clip_from_world(&self, aspect: f32) -> Mat4 {
        self.clip_from_view(aspect) * self.view_from_world()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_at_normalizes_forward() {
        let camera = Camera::new().at(0.0, 0.0, 0.0).looking_at(0.0, 0.0, -10.0);
        assert!((camera.forward - Vec3::NEG_Z).length() < 1e-6);
        assert!((camera.right() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn near_and_far_map_to_depth_range() {
        let camera = Camera::new().at(0.0, 0.0, 0.0).with_clip(0.5, 50.0);
        let clip = camera.clip_from_world(1.0);

        let near = clip.project_point3(Vec3::new(0.0, 0.0, -0.5));
        let far = clip.project_point3(Vec3::new(0.0, 0.0, -50.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rotation_only_view_ignores_position() {
        let a = Camera::new().at(10.0, -3.0, 2.0);
        let b = Camera::new().at(0.0, 0.0, 0.0);
        assert_eq!(a.rotation_only_view(), b.rotation_only_view());
        assert_ne!(a.view_from_world(), b.view_from_world());
    }
}
