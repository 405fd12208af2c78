use anyhow::{Context, Result};

use super::{FramePass, GpuFrame};
use crate::config::SsaoConfig;
use crate::frame::PassKind;
use crate::targets::{RenderTarget, TargetSlot};

struct BlurPipelineResources {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    horizontal_buffer: wgpu::Buffer,
    vertical_buffer: wgpu::Buffer,
}

/// Separable box blur: occlusion -> scratch horizontally, scratch -> occlusion vertically.
pub struct BlurPass {
    radius: u32,
    resources: Option<BlurPipelineResources>,
    /// Keyed by (occlusion id, scratch id).
    bind_groups: Option<((u64, u64), [wgpu::BindGroup; 2])>,
}

pub struct BlurInput<'a> {
    pub occlusion: &'a RenderTarget,
    pub scratch: &'a RenderTarget,
}

impl BlurPass {
    pub fn new(radius: u32) -> Self {
        Self { radius: radius.min(SsaoConfig::MAX_BLUR_RADIUS), resources: None, bind_groups: None }
    }

    pub fn set_radius(&mut self, radius: u32) {
        self.radius = radius.min(SsaoConfig::MAX_BLUR_RADIUS);
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blur Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/blur.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blur Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline =
            super::fullscreen_pipeline(device, "Blur Pipeline", &pipeline_layout, &shader, TargetSlot::Occlusion.format());
        let uniform = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<BlurUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let horizontal_buffer = uniform("Blur Horizontal Uniform");
        let vertical_buffer = uniform("Blur Vertical Uniform");
        self.resources = Some(BlurPipelineResources { pipeline, layout, horizontal_buffer, vertical_buffer });
        self.bind_groups = None;
        Ok(())
    }

    fn ensure_bind_groups(&mut self, device: &wgpu::Device, input: &BlurInput<'_>) -> Result<()> {
        let key = (input.occlusion.id(), input.scratch.id());
        if matches!(self.bind_groups, Some((cached, _)) if cached == key) {
            return Ok(());
        }
        let resources = self.resources.as_ref().context("Blur pipeline resources missing")?;
        let make = |label, buffer: &wgpu::Buffer, source: &RenderTarget| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &resources.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(source.view()) },
                ],
            })
        };
        let horizontal = make("Blur Horizontal BG", &resources.horizontal_buffer, input.occlusion);
        let vertical = make("Blur Vertical BG", &resources.vertical_buffer, input.scratch);
        self.bind_groups = Some((key, [horizontal, vertical]));
        Ok(())
    }
}

impl FramePass for BlurPass {
    type Input<'a> = BlurInput<'a>;
    type Output = ();

    fn kind(&self) -> PassKind {
        PassKind::Blur
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: BlurInput<'_>) -> Result<()> {
        self.ensure_resources(gpu.device)?;
        self.ensure_bind_groups(gpu.device, &input)?;
        let resources = self.resources.as_ref().context("Blur pipeline resources missing")?;
        let (_, bind_groups) = self.bind_groups.as_ref().context("Blur bind groups missing")?;
        let radius = self.radius as i32;
        gpu.queue.write_buffer(
            &resources.horizontal_buffer,
            0,
            bytemuck::bytes_of(&BlurUniform { direction: [1, 0, radius, 0] }),
        );
        gpu.queue.write_buffer(
            &resources.vertical_buffer,
            0,
            bytemuck::bytes_of(&BlurUniform { direction: [0, 1, radius, 0] }),
        );

        let steps = [("Blur Horizontal Pass", input.scratch), ("Blur Vertical Pass", input.occlusion)];
        for ((label, destination), bind_group) in steps.into_iter().zip(bind_groups.iter()) {
            let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: destination.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::WHITE), store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&resources.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BlurUniform {
    direction: [i32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_radius_is_clamped() {
        let mut pass = BlurPass::new(u32::MAX);
        assert_eq!(pass.radius(), SsaoConfig::MAX_BLUR_RADIUS);
        pass.set_radius(3);
        assert_eq!(pass.radius(), 3);
        pass.set_radius(1 << 31);
        assert_eq!(pass.radius() as i32, SsaoConfig::MAX_BLUR_RADIUS as i32);
    }
}
