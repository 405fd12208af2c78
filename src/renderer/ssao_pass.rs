use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{FramePass, GpuFrame};
use crate::camera::Camera;
use crate::config::SsaoConfig;
use crate::frame::PassKind;
use crate::ssao::{SsaoKernel, MAX_KERNEL_SIZE};
use crate::targets::{RenderTarget, TargetSlot};

struct SsaoPipelineResources {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct SsaoPass {
    config: SsaoConfig,
    rng: StdRng,
    kernel: SsaoKernel,
    resources: Option<SsaoPipelineResources>,
    uniform_buffer: Option<wgpu::Buffer>,
    /// Keyed by the view-position target it samples.
    bind_group: Option<(u64, wgpu::BindGroup)>,
}

pub struct SsaoInput<'a> {
    pub camera: &'a Camera,
    pub view_positions: &'a RenderTarget,
    pub occlusion: &'a RenderTarget,
}

impl SsaoPass {
    pub fn new(config: SsaoConfig) -> Self {
        let config = config.clamped();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let kernel = SsaoKernel::generate_with(&mut rng, config.kernel_size);
        Self { config, rng, kernel, resources: None, uniform_buffer: None, bind_group: None }
    }

    pub fn kernel(&self) -> &SsaoKernel {
        &self.kernel
    }

    pub fn config(&self) -> &SsaoConfig {
        &self.config
    }

    /// Regenerates the kernel when the sample count or seed changed.
    pub fn set_config(&mut self, config: SsaoConfig) {
        let config = config.clamped();
        let regenerate = config.kernel_size != self.config.kernel_size || config.seed != self.config.seed;
        if regenerate {
            self.rng = StdRng::seed_from_u64(config.seed);
            self.kernel = SsaoKernel::generate_with(&mut self.rng, config.kernel_size);
            log::info!(target: "ssao", "regenerated kernel with {} samples", self.kernel.len());
        }
        self.config = config;
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SSAO Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/ssao.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SSAO BGL"),
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
            label: Some("SSAO Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = super::fullscreen_pipeline(
            device,
            "SSAO Pipeline",
            &pipeline_layout,
            &shader,
            TargetSlot::Occlusion.format(),
        );
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SSAO Uniform Buffer"),
            size: std::mem::size_of::<SsaoUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.resources = Some(SsaoPipelineResources { pipeline, layout });
        self.uniform_buffer = Some(uniform_buffer);
        self.bind_group = None;
        Ok(())
    }

    fn ensure_bind_group(&mut self, device: &wgpu::Device, view_positions: &RenderTarget) -> Result<()> {
        if matches!(self.bind_group, Some((id, _)) if id == view_positions.id()) {
            return Ok(());
        }
        let layout = &self.resources.as_ref().context("SSAO pipeline resources missing")?.layout;
        let buffer = self.uniform_buffer.as_ref().context("SSAO uniform buffer missing")?;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SSAO BG"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view_positions.view()),
                },
            ],
        });
        self.bind_group = Some((view_positions.id(), bind_group));
        Ok(())
    }
}

impl FramePass for SsaoPass {
    type Input<'a> = SsaoInput<'a>;
    type Output = ();

    fn kind(&self) -> PassKind {
        PassKind::Ssao
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: SsaoInput<'_>) -> Result<()> {
        self.ensure_resources(gpu.device)?;
        self.ensure_bind_group(gpu.device, input.view_positions)?;

        // Screen mapping only needs x, y and w, which both depth conventions share.
        let uniform = SsaoUniform {
            projection: input.camera.projection_matrix().to_cols_array_2d(),
            kernel: self.kernel.to_uniform_array(),
            params: [
                self.config.radius,
                self.config.bias,
                self.kernel.len().min(MAX_KERNEL_SIZE) as f32,
                if self.config.range_check { 1.0 } else { 0.0 },
            ],
        };
        let buffer = self.uniform_buffer.as_ref().context("SSAO uniform buffer missing")?;
        gpu.queue.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));

        let pipeline = &self.resources.as_ref().context("SSAO pipeline resources missing")?.pipeline;
        let (_, bind_group) = self.bind_group.as_ref().context("SSAO bind group missing")?;
        let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("SSAO Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: input.occlusion.view(),
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::WHITE), store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SsaoUniform {
    projection: [[f32; 4]; 4],
    kernel: [[f32; 4]; MAX_KERNEL_SIZE],
    params: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_kernel_matches_reference_generation() {
        let config = SsaoConfig { kernel_size: 48, seed: 11, ..SsaoConfig::default() };
        let pass = SsaoPass::new(config.clone());
        assert_eq!(pass.kernel(), &SsaoKernel::generate(48, 11));
    }

    #[test]
    fn config_change_regenerates_kernel_only_when_needed() {
        let mut pass = SsaoPass::new(SsaoConfig::default());
        let original = pass.kernel().clone();
        pass.set_config(SsaoConfig { radius: 1.5, ..SsaoConfig::default() });
        assert_eq!(pass.kernel(), &original);
        pass.set_config(SsaoConfig { kernel_size: 16, ..SsaoConfig::default() });
        assert_eq!(pass.kernel().len(), 16);
    }

    #[test]
    fn out_of_range_settings_are_clamped() {
        let mut pass = SsaoPass::new(SsaoConfig { radius: 500.0, ..SsaoConfig::default() });
        assert_eq!(pass.config().radius, SsaoConfig::MAX_RADIUS);
        pass.set_config(SsaoConfig { bias: -1.0, blur_radius: 9000, ..SsaoConfig::default() });
        assert_eq!(pass.config().bias, 0.0);
        assert_eq!(pass.config().blur_radius, SsaoConfig::MAX_BLUR_RADIUS);
    }

    #[test]
    fn uniform_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<SsaoUniform>(), 64 + 128 * 16 + 16);
    }
}
