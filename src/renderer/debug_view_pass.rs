use anyhow::{Context, Result};

use super::{FramePass, GpuFrame};
use crate::config::{DebugViewConfig, ShadowConfig};
use crate::frame::PassKind;
use crate::targets::RenderTarget;

struct DebugViewPipelineResources {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

/// Draws the shadow map's depth into a square in the lower-left corner of the display.
pub struct DebugViewPass {
    target_format: wgpu::TextureFormat,
    config: DebugViewConfig,
    near: f32,
    far: f32,
    resources: Option<DebugViewPipelineResources>,
    bind_group: Option<(u64, wgpu::BindGroup)>,
}

pub struct DebugViewInput<'a> {
    pub target_view: &'a wgpu::TextureView,
    pub target_size: (u32, u32),
    pub shadow: &'a RenderTarget,
}

/// Pixel rectangle of the debug quad: x, y (top-left origin), edge length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadRect {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl QuadRect {
    /// `None` when the target is too small to fit the quad and its margin.
    pub fn place(config: &DebugViewConfig, width: u32, height: u32) -> Option<Self> {
        let margin = config.margin as f32;
        let available = (width.min(height) as f32 - 2.0 * margin).floor();
        let size = (height as f32 * config.scale.clamp(0.0, 1.0)).floor().min(available);
        if size < 1.0 {
            return None;
        }
        Some(Self { x: margin, y: height as f32 - margin - size, size })
    }
}

impl DebugViewPass {
    pub fn new(target_format: wgpu::TextureFormat, config: DebugViewConfig, shadow: &ShadowConfig) -> Self {
        Self {
            target_format,
            config,
            near: shadow.near,
            far: shadow.far,
            resources: None,
            bind_group: None,
        }
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Debug Depth Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/debug_depth.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Debug Depth BGL"),
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
                        // Read as unfilterable float; depth-texture loads are not portable to GL.
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Debug Depth Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline =
            super::fullscreen_pipeline(device, "Debug Depth Pipeline", &pipeline_layout, &shader, self.target_format);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Debug Depth Uniform"),
            size: std::mem::size_of::<DebugViewUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.resources = Some(DebugViewPipelineResources { pipeline, layout, uniform_buffer });
        self.bind_group = None;
        Ok(())
    }
}

impl FramePass for DebugViewPass {
    type Input<'a> = DebugViewInput<'a>;
    /// False when the display target is too small for the quad.
    type Output = bool;

    fn kind(&self) -> PassKind {
        PassKind::DebugShadowView
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: DebugViewInput<'_>) -> Result<bool> {
        let (width, height) = input.target_size;
        let Some(rect) = QuadRect::place(&self.config, width, height) else {
            return Ok(false);
        };
        self.ensure_resources(gpu.device)?;
        let resources = self.resources.as_ref().context("Debug view resources missing")?;
        if !matches!(self.bind_group, Some((id, _)) if id == input.shadow.id()) {
            let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Debug Depth BG"),
                layout: &resources.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: resources.uniform_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(input.shadow.view()),
                    },
                ],
            });
            self.bind_group = Some((input.shadow.id(), bind_group));
        }
        gpu.queue.write_buffer(
            &resources.uniform_buffer,
            0,
            bytemuck::bytes_of(&DebugViewUniform { planes: [self.near, self.far, 0.0, 0.0] }),
        );
        let (_, bind_group) = self.bind_group.as_ref().context("Debug view bind group missing")?;

        let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Debug Shadow View Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: input.target_view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&resources.pipeline);
        pass.set_viewport(rect.x, rect.y, rect.size, rect.size, 0.0, 1.0);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(true)
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DebugViewUniform {
    planes: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_sits_in_lower_left_corner() {
        let rect = QuadRect::place(&DebugViewConfig::default(), 1280, 720).expect("fits");
        assert_eq!(rect, QuadRect { x: 16.0, y: 720.0 - 16.0 - 216.0, size: 216.0 });
    }

    #[test]
    fn tiny_targets_skip_the_quad() {
        assert!(QuadRect::place(&DebugViewConfig::default(), 20, 20).is_none());
    }
}
