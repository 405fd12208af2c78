use anyhow::{Context, Result};
use glam::Mat4;

use crate::scene::{RenderObject, Surface};

/// Per-draw data, one slot per surface, addressed with a dynamic offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct DrawUniform {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub tint: [f32; 4],
    /// x: shininess.
    pub params: [f32; 4],
}

impl DrawUniform {
    pub fn new(object: &RenderObject<'_>, surface: &Surface<'_>) -> Self {
        let normal_matrix = normal_matrix(object.transform);
        Self {
            model: object.transform.to_cols_array_2d(),
            normal_matrix: normal_matrix.to_cols_array_2d(),
            tint: surface.material.tint.to_array(),
            params: [object.shininess, 0.0, 0.0, 0.0],
        }
    }
}

fn normal_matrix(model: Mat4) -> Mat4 {
    if model.determinant().abs() <= f32::EPSILON {
        return Mat4::IDENTITY;
    }
    model.inverse().transpose()
}

const INITIAL_CAPACITY: usize = 64;

/// Growable uniform buffer holding every draw of one pass for one frame. Each pass owns
/// its own so a later `write_buffer` cannot clobber slots another pass still reads.
pub(super) struct DrawUniforms {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
    capacity: usize,
    stride: u64,
    staging: Vec<u8>,
}

impl DrawUniforms {
    pub fn new(device: &wgpu::Device, label: &'static str) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
                },
                count: None,
            }],
        });
        let alignment = device.limits().min_uniform_buffer_offset_alignment.max(1) as u64;
        let size = std::mem::size_of::<DrawUniform>() as u64;
        let stride = size.div_ceil(alignment) * alignment;
        Self { label, layout, buffer: None, bind_group: None, capacity: 0, stride, staging: Vec::new() }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn offset(&self, index: usize) -> u32 {
        (index as u64 * self.stride) as u32
    }

    pub fn bind_group(&self) -> Result<&wgpu::BindGroup> {
        self.bind_group.as_ref().context("Draw uniform bind group missing")
    }

    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, draws: &[DrawUniform]) -> Result<()> {
        if draws.is_empty() {
            return Ok(());
        }
        self.ensure_capacity(device, draws.len());
        let stride = self.stride as usize;
        self.staging.clear();
        self.staging.resize(draws.len() * stride, 0);
        for (i, draw) in draws.iter().enumerate() {
            let bytes = bytemuck::bytes_of(draw);
            self.staging[i * stride..i * stride + bytes.len()].copy_from_slice(bytes);
        }
        let buffer = self.buffer.as_ref().context("Draw uniform buffer missing")?;
        queue.write_buffer(buffer, 0, &self.staging);
        Ok(())
    }

    fn ensure_capacity(&mut self, device: &wgpu::Device, needed: usize) {
        if self.buffer.is_some() && needed <= self.capacity {
            return;
        }
        let mut capacity = self.capacity.max(INITIAL_CAPACITY);
        while capacity < needed {
            capacity *= 2;
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: capacity as u64 * self.stride,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
                }),
            }],
        });
        if self.capacity > 0 {
            log::debug!(target: "renderer", "{} grown to {capacity} draws", self.label);
        }
        self.buffer = Some(buffer);
        self.bind_group = Some(bind_group);
        self.capacity = capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3, Vec4};

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 1.0),
            Quat::IDENTITY,
            Vec3::new(3.0, 0.0, 0.0),
        );
        let n = normal_matrix(model) * Vec4::new(1.0, 1.0, 0.0, 0.0);
        assert!((n.truncate() - Vec3::new(0.5, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn singular_model_falls_back_to_identity() {
        assert_eq!(normal_matrix(Mat4::ZERO), Mat4::IDENTITY);
    }

    #[test]
    fn draw_uniform_is_mat_aligned() {
        assert_eq!(std::mem::size_of::<DrawUniform>(), 160);
    }
}
