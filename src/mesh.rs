use anyhow::{bail, Result};
use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::scene::BoundingSphere;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position: position.to_array(), normal: normal.to_array(), uv: uv.to_array() }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x2 },
            ],
        }
    }
}

/// CPU-side triangle list. Asset import lives outside the renderer; these primitives are
/// enough for terrain patches, props and tests.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::X, Vec3::Y),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u_axis, v_axis) in faces {
            // u_axis is chosen so that u × v points along -normal; flip it for CCW winding.
            let u_axis = -u_axis;
            let base = vertices.len() as u32;
            let center = normal * h;
            for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = center + u_axis * (u * h) + v_axis * (v * h);
                let uv = Vec2::new((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5);
                vertices.push(MeshVertex::new(position, normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self { vertices, indices }
    }

    /// Square grid in the XZ plane, centered on the origin, displaced by `height(x, z)`.
    pub fn grid(size: f32, divisions: u32, height: impl Fn(f32, f32) -> f32) -> Self {
        let divisions = divisions.max(1);
        let step = size / divisions as f32;
        let half = size * 0.5;
        let row = divisions + 1;
        let sample = |x: f32, z: f32| Vec3::new(x, height(x, z), z);

        let mut vertices = Vec::with_capacity((row * row) as usize);
        for iz in 0..row {
            for ix in 0..row {
                let x = -half + ix as f32 * step;
                let z = -half + iz as f32 * step;
                let dx = sample(x + step, z) - sample(x - step, z);
                let dz = sample(x, z + step) - sample(x, z - step);
                let normal = dz.cross(dx).normalize_or_zero();
                let normal = if normal.length_squared() > 0.0 { normal } else { Vec3::Y };
                let uv = Vec2::new(ix as f32 / divisions as f32, iz as f32 / divisions as f32);
                vertices.push(MeshVertex::new(sample(x, z), normal, uv));
            }
        }

        let mut indices = Vec::with_capacity((divisions * divisions * 6) as usize);
        for iz in 0..divisions {
            for ix in 0..divisions {
                let i0 = iz * row + ix;
                let i1 = i0 + 1;
                let i2 = i0 + row;
                let i3 = i2 + 1;
                indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
            }
        }
        Self { vertices, indices }
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec3> + Clone + '_ {
        self.vertices.iter().map(|v| Vec3::from_array(v.position))
    }

    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        BoundingSphere::from_positions(self.positions())
    }
}

/// Mesh uploaded to GPU buffers.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, label: &str, mesh: &Mesh) -> Result<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            bail!("Mesh '{label}' has no geometry");
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(Self { vertex_buffer, index_buffer, index_count: mesh.indices.len() as u32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_counter_clockwise_outwards() {
        let cube = Mesh::cube(2.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        for tri in cube.indices.chunks(3) {
            let a = Vec3::from_array(cube.vertices[tri[0] as usize].position);
            let b = Vec3::from_array(cube.vertices[tri[1] as usize].position);
            let c = Vec3::from_array(cube.vertices[tri[2] as usize].position);
            let normal = Vec3::from_array(cube.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
        }
    }

    #[test]
    fn flat_grid_faces_up() {
        let grid = Mesh::grid(10.0, 4, |_, _| 0.0);
        assert_eq!(grid.vertices.len(), 25);
        assert!(grid.vertices.iter().all(|v| (Vec3::from_array(v.normal) - Vec3::Y).length() < 1e-5));
        let tri = &grid.indices[0..3];
        let a = Vec3::from_array(grid.vertices[tri[0] as usize].position);
        let b = Vec3::from_array(grid.vertices[tri[1] as usize].position);
        let c = Vec3::from_array(grid.vertices[tri[2] as usize].position);
        assert!((b - a).cross(c - a).y > 0.0);
    }

    #[test]
    fn cube_bounding_sphere_reaches_a_corner() {
        let sphere = Mesh::cube(2.0).bounding_sphere().expect("cube has vertices");
        assert!(sphere.center.length() < 1e-5);
        assert!((sphere.radius() - 3f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn grid_bounding_sphere_spans_the_terrain() {
        let grid = Mesh::grid(10.0, 4, |_, _| 0.0);
        let sphere = grid.bounding_sphere().expect("grid has vertices");
        assert_eq!(grid.positions().clone().count(), 25);
        assert!(sphere.center.length() < 1e-5);
        assert!((sphere.radius() - 50f32.sqrt()).abs() < 1e-4);
    }
}
