use glam::{Mat4, Vec3};

use crate::material::Material;
use crate::mesh::GpuMesh;

/// Bounding sphere stored as a center and one farthest point so it can be carried through
/// a projection exactly; the radius is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub farthest_point: Vec3,
}

impl BoundingSphere {
    pub fn new(center: Vec3, farthest_point: Vec3) -> Self {
        Self { center, farthest_point }
    }

    pub fn from_radius(center: Vec3, radius: f32) -> Self {
        Self { center, farthest_point: center + Vec3::X * radius.max(0.0) }
    }

    /// Center at the arithmetic mean of the positions, farthest point at the position with
    /// the greatest distance from it.
    pub fn from_positions(positions: impl IntoIterator<Item = Vec3> + Clone) -> Option<Self> {
        let mut sum = Vec3::ZERO;
        let mut count = 0usize;
        for p in positions.clone() {
            sum += p;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let center = sum / count as f32;
        let mut farthest_point = center;
        let mut max_distance_sq = 0.0;
        for p in positions {
            let distance_sq = p.distance_squared(center);
            if distance_sq > max_distance_sq {
                max_distance_sq = distance_sq;
                farthest_point = p;
            }
        }
        Some(Self { center, farthest_point })
    }

    pub fn radius(&self) -> f32 {
        self.center.distance(self.farthest_point)
    }

    /// Moves both points into the space of `model`. Exact for rigid transforms and uniform
    /// scale.
    pub fn transformed(&self, model: Mat4) -> Self {
        Self { center: model.transform_point3(self.center), farthest_point: model.transform_point3(self.farthest_point) }
    }
}

/// One drawable piece of an object.
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    pub mesh: &'a GpuMesh,
    pub material: &'a Material,
}

/// Object as the renderer sees it for one frame. Everything is borrowed from the
/// gameplay/asset layer.
#[derive(Debug, Clone)]
pub struct RenderObject<'a> {
    pub transform: Mat4,
    /// World-space bounds.
    pub bounds: BoundingSphere,
    pub surfaces: Vec<Surface<'a>>,
    pub shininess: f32,
    /// Always submitted regardless of culling, e.g. terrain and caves the player stands in.
    pub cull_exempt: bool,
}

impl<'a> RenderObject<'a> {
    pub const DEFAULT_SHININESS: f32 = 16.0;

    /// `local_bounds` is in mesh space and is moved into world space with `transform`.
    pub fn new(transform: Mat4, local_bounds: BoundingSphere) -> Self {
        Self {
            transform,
            bounds: local_bounds.transformed(transform),
            surfaces: Vec::new(),
            shininess: Self::DEFAULT_SHININESS,
            cull_exempt: false,
        }
    }

    pub fn with_surface(mut self, mesh: &'a GpuMesh, material: &'a Material) -> Self {
        self.surfaces.push(Surface { mesh, material });
        self
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess;
        self
    }

    pub fn cull_exempt(mut self) -> Self {
        self.cull_exempt = true;
        self
    }

    pub fn set_transform(&mut self, transform: Mat4, local_bounds: BoundingSphere) {
        self.transform = transform;
        self.bounds = local_bounds.transformed(transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_from_positions_uses_mean_center_and_farthest_vertex() {
        let points = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 4.0, 0.0)];
        let sphere = BoundingSphere::from_positions(points).expect("non-empty");
        assert!(sphere.center.abs_diff_eq(Vec3::new(0.0, 4.0 / 3.0, 0.0), 1e-6));
        assert_eq!(sphere.farthest_point, Vec3::new(0.0, 4.0, 0.0));
        assert!((sphere.radius() - 8.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_from_no_positions_is_none() {
        assert!(BoundingSphere::from_positions(Vec::<Vec3>::new()).is_none());
    }

    #[test]
    fn object_bounds_follow_transform() {
        let local = BoundingSphere::from_radius(Vec3::ZERO, 1.0);
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_y(0.7),
            Vec3::new(5.0, 0.0, -3.0),
        );
        let object = RenderObject::new(transform, local);
        assert!(object.bounds.center.abs_diff_eq(Vec3::new(5.0, 0.0, -3.0), 1e-5));
        assert!((object.bounds.radius() - 2.0).abs() < 1e-5);
        assert!(!object.cull_exempt);
        assert!(object.clone().cull_exempt().cull_exempt);
    }
}
