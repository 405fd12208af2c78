use glam::{Mat4, Quat, Vec3};

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Perspective parameters; the projection matrix is always derived from these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn new(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self { fov_y_radians, aspect, near, far }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, self.aspect.max(0.0001), self.near, self.far)
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self { fov_y_radians: std::f32::consts::FRAC_PI_3, aspect: 4.0 / 3.0, near: 0.2, far: 100.0 }
    }
}

/// First-person camera. The world transform is private so its inverse can never go stale.
#[derive(Debug, Clone)]
pub struct Camera {
    transform: Mat4,
    view: Mat4,
    pub projection: Projection,
}

impl Camera {
    pub fn new(transform: Mat4, projection: Projection) -> Self {
        let mut camera = Self { transform: Mat4::IDENTITY, view: Mat4::IDENTITY, projection };
        camera.set_transform(transform);
        camera
    }

    /// Camera at `position` looking at `target` with world +Y as up.
    pub fn looking_at(position: Vec3, target: Vec3, projection: Projection) -> Self {
        let view = Mat4::look_at_rh(position, target, DEFAULT_UP);
        Self { transform: view.inverse(), view, projection }
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Replaces the world transform. A singular or non-finite transform is ignored and the
    /// previous view stays in place.
    pub fn set_transform(&mut self, transform: Mat4) {
        if transform.determinant().abs() <= f32::EPSILON || !transform.is_finite() {
            log::warn!(target: "camera", "ignoring degenerate camera transform");
            return;
        }
        let view = transform.inverse();
        if !view.is_finite() {
            log::warn!(target: "camera", "ignoring camera transform with a non-finite inverse");
            return;
        }
        self.transform = transform;
        self.view = view;
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    pub fn set_position(&mut self, position: Vec3) {
        let mut transform = self.transform;
        transform.w_axis = position.extend(1.0);
        self.set_transform(transform);
    }

    /// Rotates the camera to face `target`. Ignored when `target` is the camera position
    /// or lies straight up/down, since the look-at basis is undefined there.
    pub fn look_at(&mut self, target: Vec3) {
        let position = self.position();
        let forward = target - position;
        if forward.length_squared() < 1e-8 || forward.normalize().cross(DEFAULT_UP).length_squared() < 1e-8 {
            return;
        }
        self.set_transform(Mat4::look_at_rh(position, target, DEFAULT_UP).inverse());
    }

    /// Applies a rotation in camera space, e.g. a roll about the viewing axis.
    pub fn rotate_local(&mut self, rotation: Quat) {
        self.set_transform(self.transform * Mat4::from_quat(rotation));
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view
    }

    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.projection.aspect = width as f32 / height as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_tracks_transform_changes() {
        let mut camera = Camera::new(Mat4::IDENTITY, Projection::default());
        camera.set_position(Vec3::new(3.0, 2.0, -1.0));
        let product = camera.transform() * camera.view_matrix();
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!(camera.view_matrix().transform_point3(Vec3::new(3.0, 2.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn look_at_points_negative_z_at_target() {
        let camera = Camera::looking_at(Vec3::new(0.0, 1.0, 5.0), Vec3::new(0.0, 1.0, 0.0), Projection::default());
        let target_in_view = camera.view_matrix().transform_point3(Vec3::new(0.0, 1.0, 0.0));
        assert!(target_in_view.z < 0.0);
        assert!(target_in_view.x.abs() < 1e-5 && target_in_view.y.abs() < 1e-5);
    }

    #[test]
    fn degenerate_look_at_keeps_previous_orientation() {
        let mut camera = Camera::looking_at(Vec3::ZERO, Vec3::NEG_Z, Projection::default());
        let before = camera.view_matrix();
        camera.look_at(Vec3::new(0.0, 10.0, 0.0));
        assert!(camera.view_matrix().abs_diff_eq(before, 1e-6));
    }

    #[test]
    fn singular_transform_keeps_previous_view() {
        let mut camera = Camera::new(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)), Projection::default());
        let before = camera.view_matrix();
        camera.set_transform(Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0)));
        assert!(camera.view_matrix().is_finite());
        assert!(camera.view_matrix().abs_diff_eq(before, 1e-6));
        assert_eq!(camera.position(), Vec3::new(1.0, 2.0, 3.0));

        camera.set_transform(Mat4::from_translation(Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(camera.view_matrix().abs_diff_eq(before, 1e-6));
    }

    #[test]
    fn projection_is_finite_for_zero_aspect() {
        let projection = Projection::new(1.0, 0.0, 0.1, 10.0);
        assert!(!projection.matrix().to_cols_array().iter().any(|v| !v.is_finite()));
    }
}
