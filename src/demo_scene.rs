//! Procedural scene for the demo binary: rolling terrain, scattered crates and a sun
//! that orbits the origin.

use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::light::Light;
use crate::material::Material;
use crate::mesh::{GpuMesh, Mesh};
use crate::renderer::FrameRenderer;
use crate::scene::{BoundingSphere, RenderObject};

const TERRAIN_SIZE: f32 = 160.0;
const TERRAIN_DIVISIONS: u32 = 96;
const PROP_COUNT: usize = 48;
const PROP_SEED: u64 = 0x0c0f_fee;
const SUN_ORBIT_RADIUS: f32 = 120.0;
const SUN_ORBIT_SPEED: f32 = 0.05;
const SUN_COLOR: Vec3 = Vec3::new(0.95, 0.9, 0.8);

/// Prop shininess values cycled across the scattered crates.
const PROP_SHININESS: [f32; 4] = [16.0, 32.0, 2.0, 64.0];

struct Prop {
    transform: Mat4,
    shininess: f32,
    material: usize,
}

pub struct DemoScene {
    terrain_mesh: GpuMesh,
    terrain_bounds: BoundingSphere,
    terrain_material: Material,
    prop_mesh: GpuMesh,
    prop_bounds: BoundingSphere,
    prop_materials: Vec<Material>,
    props: Vec<Prop>,
    sun: Light,
    sun_angle: f32,
}

pub fn terrain_height(x: f32, z: f32) -> f32 {
    (x * 0.05).sin() * 2.0 + (z * 0.07).cos() * 1.5 + ((x + z) * 0.02).sin() * 3.0
}

fn checkerboard(size: u32, cell: u32, light: [u8; 4], dark: [u8; 4]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if (x / cell + y / cell) % 2 == 0 { light } else { dark };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

impl DemoScene {
    pub fn new(renderer: &FrameRenderer) -> Result<Self> {
        let device = renderer.device();
        let terrain = Mesh::grid(TERRAIN_SIZE, TERRAIN_DIVISIONS, terrain_height);
        let terrain_bounds = terrain.bounding_sphere().context("Terrain mesh has no vertices")?;
        let terrain_mesh = GpuMesh::upload(device, "Terrain Mesh", &terrain)?;
        let terrain_material = renderer.create_material(
            "Terrain Material",
            (64, 64),
            &checkerboard(64, 8, [112, 150, 84, 255], [92, 128, 70, 255]),
            Vec4::ONE,
        )?;

        let cube = Mesh::cube(2.0);
        let prop_bounds = cube.bounding_sphere().context("Cube mesh has no vertices")?;
        let prop_mesh = GpuMesh::upload(device, "Prop Mesh", &cube)?;
        let prop_materials = vec![
            renderer.create_material(
                "Crate Material",
                (32, 32),
                &checkerboard(32, 4, [176, 132, 84, 255], [140, 100, 60, 255]),
                Vec4::ONE,
            )?,
            renderer.create_material(
                "Stone Material",
                (32, 32),
                &checkerboard(32, 16, [150, 150, 156, 255], [120, 120, 128, 255]),
                Vec4::new(0.9, 0.9, 1.0, 1.0),
            )?,
        ];

        let mut rng = StdRng::seed_from_u64(PROP_SEED);
        let half = TERRAIN_SIZE * 0.45;
        let props = (0..PROP_COUNT)
            .map(|index| {
                let x = rng.gen_range(-half..half);
                let z = rng.gen_range(-half..half);
                let scale = rng.gen_range(0.6..2.5);
                let yaw = rng.gen_range(0.0..std::f32::consts::TAU);
                let position = Vec3::new(x, terrain_height(x, z) + scale, z);
                Prop {
                    transform: Mat4::from_scale_rotation_translation(
                        Vec3::splat(scale),
                        Quat::from_rotation_y(yaw),
                        position,
                    ),
                    shininess: PROP_SHININESS[index % PROP_SHININESS.len()],
                    material: index % 2,
                }
            })
            .collect::<Vec<_>>();
        log::info!(target: "renderer", "demo scene: terrain {} vertices, {} props", terrain.positions().count(), props.len());

        let mut scene = Self {
            terrain_mesh,
            terrain_bounds,
            terrain_material,
            prop_mesh,
            prop_bounds,
            prop_materials,
            props,
            sun: Light::new(Vec3::ZERO, SUN_COLOR),
            sun_angle: 0.6,
        };
        scene.update(0.0);
        Ok(scene)
    }

    /// Advances the sun along its orbit.
    pub fn update(&mut self, dt: f32) {
        self.sun_angle = (self.sun_angle + dt * SUN_ORBIT_SPEED) % std::f32::consts::TAU;
        let (sin, cos) = self.sun_angle.sin_cos();
        self.sun.position = Vec3::new(cos * SUN_ORBIT_RADIUS, SUN_ORBIT_RADIUS * 0.8, sin * SUN_ORBIT_RADIUS);
    }

    pub fn sun(&self) -> &Light {
        &self.sun
    }

    pub fn objects(&self) -> Vec<RenderObject<'_>> {
        let mut objects = Vec::with_capacity(self.props.len() + 1);
        objects.push(
            RenderObject::new(Mat4::IDENTITY, self.terrain_bounds)
                .with_surface(&self.terrain_mesh, &self.terrain_material)
                .with_shininess(2.0)
                .cull_exempt(),
        );
        for prop in &self.props {
            objects.push(
                RenderObject::new(prop.transform, self.prop_bounds)
                    .with_surface(&self.prop_mesh, &self.prop_materials[prop.material])
                    .with_shininess(prop.shininess),
            );
        }
        objects
    }
}
