//! Screen-space ambient occlusion: sample kernel generation and a CPU rendition of the
//! occlusion and blur shaders. The WGSL in `assets/shaders/ssao.wgsl` and `assets/shaders/blur.wgsl`
//! follows the same steps; the CPU path is what tests and offline tooling run.

use glam::{Mat4, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SsaoConfig;

pub const MAX_KERNEL_SIZE: usize = 128;

/// View-space `w` at or below this marks a pixel without geometry.
const EMPTY_W: f32 = 0.5;
const CLIP_W_EPSILON: f32 = 1e-5;
const MIN_DEPTH_DELTA: f32 = 1e-4;

/// Hemisphere-free sample offsets in view space, denser near the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SsaoKernel {
    samples: Vec<Vec3>,
}

impl SsaoKernel {
    pub fn generate(size: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::generate_with(&mut rng, size)
    }

    /// Components uniform in [-1, 1], sample `i` of `n` scaled by `0.1 + 0.9 * (i / n)^2`.
    pub fn generate_with(rng: &mut impl Rng, size: u32) -> Self {
        let size = (size as usize).clamp(1, MAX_KERNEL_SIZE);
        let samples = (0..size)
            .map(|i| {
                let v = Vec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                );
                let t = i as f32 / size as f32;
                v * (0.1 + 0.9 * t * t)
            })
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[Vec3] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Padded to the fixed uniform array the shader declares.
    pub(crate) fn to_uniform_array(&self) -> [[f32; 4]; MAX_KERNEL_SIZE] {
        let mut out = [[0.0; 4]; MAX_KERNEL_SIZE];
        for (dst, sample) in out.iter_mut().zip(&self.samples) {
            *dst = sample.extend(0.0).to_array();
        }
        out
    }
}

/// Per-pixel view-space positions as written by the geometry prepass. Row 0 is the top
/// of the screen; `w == 0` means no geometry.
#[derive(Debug, Clone)]
pub struct ViewPositionField {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

impl ViewPositionField {
    pub fn empty(width: u32, height: u32) -> Self {
        Self { width, height, texels: vec![Vec4::ZERO; (width as usize) * (height as usize)] }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Option<Vec3>) -> Self {
        let mut field = Self::empty(width, height);
        for y in 0..height {
            for x in 0..width {
                if let Some(p) = f(x, y) {
                    field.set(x, y, p);
                }
            }
        }
        field
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set(&mut self, x: u32, y: u32, position: Vec3) {
        let idx = self.index(x, y);
        self.texels[idx] = position.extend(1.0);
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(x, y)]
    }

    /// Nearest texel at normalized screen coordinates, `None` outside [0, 1).
    fn sample(&self, uv: glam::Vec2) -> Option<Vec4> {
        if uv.x < 0.0 || uv.y < 0.0 || uv.x >= 1.0 || uv.y >= 1.0 {
            return None;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width.saturating_sub(1));
        let y = ((uv.y * self.height as f32) as u32).min(self.height.saturating_sub(1));
        Some(self.get(x, y))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }
}

/// Single-channel occlusion factors, 1.0 meaning fully lit.
#[derive(Debug, Clone, PartialEq)]
pub struct OcclusionField {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl OcclusionField {
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self { width, height, values: vec![value; (width as usize) * (height as usize)] }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Option<Self> {
        (values.len() == (width as usize) * (height as usize)).then_some(Self { width, height, values })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn clamped(&self, x: i64, y: i64) -> f32 {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Maps a view-space point through `projection` to normalized screen coordinates with
/// the origin at the top-left. `None` when the point is behind the camera.
pub fn project_to_uv(projection: Mat4, view_position: Vec3) -> Option<glam::Vec2> {
    let clip = projection * view_position.extend(1.0);
    if clip.w <= CLIP_W_EPSILON {
        return None;
    }
    let ndc = clip.truncate().truncate() / clip.w;
    Some(glam::Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
}

/// Occlusion factor for one view-space position.
pub fn occlusion_at(
    field: &ViewPositionField,
    position: Vec3,
    projection: Mat4,
    kernel: &SsaoKernel,
    settings: &SsaoConfig,
) -> f32 {
    if kernel.is_empty() {
        return 1.0;
    }
    let mut occlusion = 0.0;
    for sample in kernel.samples() {
        let sample_pos = position + *sample * settings.radius;
        let Some(uv) = project_to_uv(projection, sample_pos) else {
            continue;
        };
        let Some(scene) = field.sample(uv) else {
            continue;
        };
        if scene.w <= EMPTY_W {
            continue;
        }
        if scene.z > sample_pos.z + settings.bias {
            let weight = if settings.range_check {
                smoothstep(0.0, 1.0, settings.radius / (position.z - scene.z).abs().max(MIN_DEPTH_DELTA))
            } else {
                1.0
            };
            occlusion += weight;
        }
    }
    (1.0 - occlusion / kernel.len() as f32).clamp(0.0, 1.0)
}

pub fn compute_ao(
    field: &ViewPositionField,
    projection: Mat4,
    kernel: &SsaoKernel,
    settings: &SsaoConfig,
) -> OcclusionField {
    let settings = &settings.clamped();
    let mut values = Vec::with_capacity((field.width as usize) * (field.height as usize));
    for y in 0..field.height {
        for x in 0..field.width {
            let p = field.get(x, y);
            if p.w <= EMPTY_W {
                values.push(1.0);
            } else {
                values.push(occlusion_at(field, p.truncate(), projection, kernel, settings));
            }
        }
    }
    OcclusionField { width: field.width, height: field.height, values }
}

/// Horizontal then vertical box filter of half-width `radius`, clamp-to-edge addressing.
pub fn blur_separable(field: &OcclusionField, radius: u32) -> OcclusionField {
    let radius = radius.min(SsaoConfig::MAX_BLUR_RADIUS);
    if radius == 0 || field.values.is_empty() {
        return field.clone();
    }
    let r = radius as i64;
    let weight = 1.0 / (2 * r + 1) as f32;
    let mut scratch = OcclusionField::filled(field.width, field.height, 0.0);
    for y in 0..field.height {
        for x in 0..field.width {
            let sum: f32 = (-r..=r).map(|dx| field.clamped(x as i64 + dx, y as i64)).sum();
            scratch.values[(y as usize) * (field.width as usize) + x as usize] = sum * weight;
        }
    }
    let mut out = OcclusionField::filled(field.width, field.height, 0.0);
    for y in 0..field.height {
        for x in 0..field.width {
            let sum: f32 = (-r..=r).map(|dy| scratch.clamped(x as i64, y as i64 + dy)).sum();
            out.values[(y as usize) * (field.width as usize) + x as usize] = sum * weight;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_size_is_clamped_and_scaled() {
        assert_eq!(SsaoKernel::generate(0, 1).len(), 1);
        assert_eq!(SsaoKernel::generate(1000, 1).len(), MAX_KERNEL_SIZE);
        let kernel = SsaoKernel::generate(64, 7);
        for (i, sample) in kernel.samples().iter().enumerate() {
            let t = i as f32 / 64.0;
            let scale = 0.1 + 0.9 * t * t;
            assert!(sample.abs().max_element() <= scale + 1e-6);
        }
    }

    #[test]
    fn same_seed_same_kernel() {
        assert_eq!(SsaoKernel::generate(32, 99), SsaoKernel::generate(32, 99));
        assert_ne!(SsaoKernel::generate(32, 99), SsaoKernel::generate(32, 100));
    }

    #[test]
    fn uniform_array_pads_with_zeros() {
        let kernel = SsaoKernel::generate(4, 3);
        let array = kernel.to_uniform_array();
        assert_eq!(array[3][..3], kernel.samples()[3].to_array());
        assert_eq!(array[4], [0.0; 4]);
    }

    #[test]
    fn projection_maps_center_to_middle_of_screen() {
        let projection = Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0);
        let uv = project_to_uv(projection, Vec3::new(0.0, 0.0, -5.0)).expect("in front");
        assert!((uv - glam::Vec2::splat(0.5)).length() < 1e-6);
        assert!(project_to_uv(projection, Vec3::new(0.0, 0.0, 5.0)).is_none());
    }

    #[test]
    fn smoothstep_saturates() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, f32::INFINITY), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn huge_blur_radius_behaves_like_the_largest_allowed() {
        let values = (0..64).map(|i| (i % 3) as f32 * 0.5).collect();
        let field = OcclusionField::from_values(8, 8, values).expect("8x8 field");
        let huge = blur_separable(&field, u32::MAX);
        let capped = blur_separable(&field, SsaoConfig::MAX_BLUR_RADIUS);
        assert_eq!(huge.values(), capped.values());
    }
}
