//! View-frustum culling against bounding spheres, performed in normalized device coordinates.
//!
//! The sphere is described by its center and one point on its surface so both can be
//! carried through the projection; the radius is measured after the perspective divide.
//! A projected sphere is not exactly a circle in NDC, so the test errs towards keeping
//! objects rather than dropping them.

use glam::{Mat4, Vec3};

use crate::camera::Camera;
use crate::scene::BoundingSphere;

/// Half-extent of the NDC clip cube on every axis.
pub const CLIP_EXTENT: f32 = 1.0;

/// Points whose clip-space `w` is this close to zero sit on the camera plane.
const W_EPSILON: f32 = 1e-5;

pub fn is_visible(camera: &Camera, center: Vec3, farthest_point: Vec3) -> bool {
    is_visible_with(camera.view_projection(), center, farthest_point)
}

pub fn sphere_visible(camera: &Camera, sphere: &BoundingSphere) -> bool {
    is_visible(camera, sphere.center, sphere.farthest_point)
}

/// Same test as [`is_visible`] with a precomputed `projection * view`, so callers culling
/// many objects build the matrix once.
pub fn is_visible_with(view_projection: Mat4, center: Vec3, farthest_point: Vec3) -> bool {
    let center_clip = view_projection * center.extend(1.0);
    let farthest_clip = view_projection * farthest_point.extend(1.0);
    if center_clip.w.abs() < W_EPSILON || farthest_clip.w.abs() < W_EPSILON {
        return true;
    }
    // For a perspective projection `w` is the view-space depth. A sphere crossing the
    // camera plane surrounds or touches the viewer and would be torn apart by the divide.
    if center_clip.w.abs() <= center.distance(farthest_point) {
        return true;
    }

    let center_ndc = center_clip.truncate() / center_clip.w;
    let farthest_ndc = farthest_clip.truncate() / farthest_clip.w;
    let radius_xy = (farthest_ndc - center_ndc).truncate().length();
    let depth_margin = (farthest_ndc.z - center_ndc.z).abs();

    let outside = |value: f32, margin: f32| value - margin > CLIP_EXTENT || value + margin < -CLIP_EXTENT;
    !(outside(center_ndc.x, radius_xy) || outside(center_ndc.y, radius_xy) || outside(center_ndc.z, depth_margin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;
    use glam::Quat;

    fn reference_camera() -> Camera {
        Camera::new(Mat4::IDENTITY, Projection::new(80f32.to_radians(), 4.0 / 3.0, 0.2, 200.0))
    }

    #[test]
    fn sphere_in_front_of_camera_is_visible() {
        let camera = reference_camera();
        assert!(is_visible(&camera, Vec3::new(0.0, 0.0, -10.0), Vec3::new(0.0, 0.0, -11.0)));
    }

    #[test]
    fn sphere_beyond_far_plane_behind_camera_is_culled() {
        let camera = reference_camera();
        assert!(!is_visible(&camera, Vec3::new(0.0, 0.0, 500.0), Vec3::new(0.0, 0.0, 501.0)));
    }

    #[test]
    fn sphere_far_to_the_side_is_culled() {
        let camera = reference_camera();
        assert!(!is_visible(&camera, Vec3::new(1000.0, 0.0, -10.0), Vec3::new(1001.0, 0.0, -10.0)));
    }

    #[test]
    fn large_sphere_straddling_the_edge_is_kept() {
        let camera = reference_camera();
        // Center projects just outside x = 1, but the radius reaches back inside.
        assert!(is_visible(&camera, Vec3::new(12.0, 0.0, -10.0), Vec3::new(12.0, 6.0, -10.0)));
    }

    #[test]
    fn point_on_camera_plane_fails_open() {
        let camera = reference_camera();
        assert!(is_visible(&camera, Vec3::new(50.0, 0.0, 0.0), Vec3::new(51.0, 0.0, 0.0)));
    }

    #[test]
    fn sphere_around_the_camera_is_kept() {
        let camera = reference_camera();
        assert!(is_visible(&camera, Vec3::new(0.0, 0.0, 1.0), Vec3::new(10.0, 0.0, 1.0)));
        assert!(is_visible(&camera, Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -1.0)));
        assert!(is_visible(&camera, Vec3::new(0.0, 0.0, 0.5), Vec3::new(0.0, 2.0, 0.5)));
    }

    #[test]
    fn sphere_between_camera_and_near_plane_is_culled() {
        let camera = reference_camera();
        assert!(!is_visible(&camera, Vec3::new(0.0, 0.0, -0.1), Vec3::new(0.0, 0.0, -0.15)));
    }

    #[test]
    fn roll_does_not_change_on_axis_outcome() {
        for depth in [-1.0, -10.0, -150.0, -199.0, -260.0] {
            let mut camera = reference_camera();
            let center = Vec3::new(0.0, 0.0, depth);
            let farthest = Vec3::new(0.75, 0.0, depth);
            let expected = is_visible(&camera, center, farthest);
            for step in 1..8 {
                camera.rotate_local(Quat::from_rotation_z(step as f32 * 0.4));
                assert_eq!(is_visible(&camera, center, farthest), expected, "depth {depth} roll step {step}");
            }
        }
    }
}
