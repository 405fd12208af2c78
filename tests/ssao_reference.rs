use approx::assert_relative_eq;
use glade_renderer::config::SsaoConfig;
use glade_renderer::ssao::{blur_separable, compute_ao, OcclusionField, SsaoKernel, ViewPositionField};
use glam::{Mat4, Vec3};

const SIZE: u32 = 32;
const FOV: f32 = 1.0;

fn projection() -> Mat4 {
    Mat4::perspective_rh_gl(FOV, 1.0, 0.1, 100.0)
}

/// View-space position of pixel `(x, y)` on a plane facing the camera at `depth`.
fn on_plane(x: u32, y: u32, depth: f32) -> Vec3 {
    let half = (FOV * 0.5).tan() * depth;
    let ndc_x = (x as f32 + 0.5) / SIZE as f32 * 2.0 - 1.0;
    let ndc_y = 1.0 - (y as f32 + 0.5) / SIZE as f32 * 2.0;
    Vec3::new(ndc_x * half, ndc_y * half, -depth)
}

fn flat_wall() -> ViewPositionField {
    ViewPositionField::from_fn(SIZE, SIZE, |x, y| Some(on_plane(x, y, 5.0)))
}

/// Left half at depth 5, right half stepped towards the camera.
fn stepped_wall() -> ViewPositionField {
    ViewPositionField::from_fn(SIZE, SIZE, |x, y| {
        Some(if x < SIZE / 2 { on_plane(x, y, 5.0) } else { on_plane(x, y, 4.8) })
    })
}

#[test]
fn occlusion_stays_in_unit_range() {
    let settings = SsaoConfig::default();
    let kernel = SsaoKernel::generate(settings.kernel_size, settings.seed);
    let ao = compute_ao(&stepped_wall(), projection(), &kernel, &settings);
    assert!(ao.values().iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn empty_pixels_are_fully_lit() {
    let settings = SsaoConfig::default();
    let kernel = SsaoKernel::generate(settings.kernel_size, settings.seed);
    let ao = compute_ao(&ViewPositionField::empty(8, 8), projection(), &kernel, &settings);
    assert!(ao.values().iter().all(|v| *v == 1.0));
}

#[test]
fn flat_wall_is_partially_occluded_by_its_own_surface() {
    let settings = SsaoConfig::default();
    let kernel = SsaoKernel::generate(settings.kernel_size, settings.seed);
    let ao = compute_ao(&flat_wall(), projection(), &kernel, &settings);
    let center = ao.get(SIZE / 2, SIZE / 2);
    assert!(center > 0.1 && center < 0.9, "center occlusion {center}");
}

#[test]
fn step_edge_is_darker_than_the_open_wall() {
    let settings = SsaoConfig::default();
    let kernel = SsaoKernel::generate(settings.kernel_size, settings.seed);
    let flat = compute_ao(&flat_wall(), projection(), &kernel, &settings);
    let stepped = compute_ao(&stepped_wall(), projection(), &kernel, &settings);
    let (x, y) = (SIZE / 2 - 1, SIZE / 2);
    assert!(stepped.get(x, y) < flat.get(x, y), "{} vs {}", stepped.get(x, y), flat.get(x, y));
}

#[test]
fn same_seed_reproduces_the_same_image() {
    let settings = SsaoConfig::default();
    let first = compute_ao(&stepped_wall(), projection(), &SsaoKernel::generate(64, 42), &settings);
    let second = compute_ao(&stepped_wall(), projection(), &SsaoKernel::generate(64, 42), &settings);
    assert_eq!(first, second);
}

#[test]
fn blur_keeps_a_constant_field_constant() {
    let field = OcclusionField::filled(9, 7, 0.65);
    let blurred = blur_separable(&field, 2);
    for value in blurred.values() {
        assert_relative_eq!(*value, 0.65, epsilon = 1e-6);
    }
}

#[test]
fn blur_smooths_a_checkerboard() {
    let values = (0..64).map(|i| if (i % 8 + i / 8) % 2 == 0 { 1.0 } else { 0.0 }).collect();
    let field = OcclusionField::from_values(8, 8, values).expect("8x8 values");
    let blurred = blur_separable(&field, 1);
    let max = blurred.values().iter().cloned().fold(f32::MIN, f32::max);
    let min = blurred.values().iter().cloned().fold(f32::MAX, f32::min);
    assert!(max - min < 0.5, "range {min}..{max}");
    assert_eq!(blur_separable(&field, 0), field);
}
