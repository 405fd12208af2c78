use anyhow::{Context, Result};
use glam::{Mat4, Vec3};

use super::draw_uniforms::{DrawUniform, DrawUniforms};
use super::{FramePass, GpuFrame};
use crate::config::ShadowConfig;
use crate::frame::PassKind;
use crate::light::Light;
use crate::scene::RenderObject;
use crate::targets::{RenderTarget, DEPTH_FORMAT};

/// Squared length of `direction × up` below which the look-at basis is degenerate.
const COLLINEAR_EPSILON: f32 = 1e-6;

struct ShadowPipelineResources {
    pipeline: wgpu::RenderPipeline,
}

pub struct ShadowPass {
    config: ShadowConfig,
    resources: Option<ShadowPipelineResources>,
    uniform_buffer: Option<wgpu::Buffer>,
    frame_bind_group: Option<wgpu::BindGroup>,
    draws: Option<DrawUniforms>,
    draw_staging: Vec<DrawUniform>,
    last_light_view: Option<Mat4>,
}

pub struct ShadowInput<'a> {
    pub light: &'a Light,
    pub objects: &'a [&'a RenderObject<'a>],
    pub target: &'a RenderTarget,
}

#[derive(Debug, Clone, Copy)]
pub struct ShadowOutput {
    pub light_view_proj: Mat4,
    pub surfaces_drawn: usize,
}

impl ShadowPass {
    pub fn new(config: ShadowConfig) -> Self {
        Self {
            config,
            resources: None,
            uniform_buffer: None,
            frame_bind_group: None,
            draws: None,
            draw_staging: Vec::new(),
            last_light_view: None,
        }
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn projection(&self) -> Mat4 {
        let extent = self.config.extent;
        Mat4::orthographic_rh(-extent, extent, -extent, extent, self.config.near, self.config.far)
    }

    /// Light view looking from the light at the scene origin. Keeps the previous view when
    /// the new one is degenerate.
    pub fn update_light_view(&mut self, light_position: Vec3) -> Mat4 {
        let view = match light_view(light_position) {
            Some(view) => view,
            None => {
                log::debug!(target: "shadow", "degenerate light position {light_position}; keeping previous view");
                self.last_light_view.unwrap_or_else(|| fallback_light_view(light_position, &self.config))
            }
        };
        self.last_light_view = Some(view);
        view
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Shadow Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/shadow_depth.wgsl").into()),
        });
        let frame_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Frame BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let draws = DrawUniforms::new(device, "Shadow Draw Uniforms");
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Pipeline Layout"),
            bind_group_layouts: &[&frame_bgl, draws.layout()],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Shadow Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[crate::mesh::MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState { constant: 2, slope_scale: 2.0, clamp: 0.0 },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Uniform Buffer"),
            size: std::mem::size_of::<ShadowUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Frame BG"),
            layout: &frame_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() }],
        });

        self.resources = Some(ShadowPipelineResources { pipeline });
        self.uniform_buffer = Some(uniform_buffer);
        self.frame_bind_group = Some(frame_bind_group);
        self.draws = Some(draws);
        Ok(())
    }
}

impl FramePass for ShadowPass {
    type Input<'a> = ShadowInput<'a>;
    type Output = ShadowOutput;

    fn kind(&self) -> PassKind {
        PassKind::Shadow
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: ShadowInput<'_>) -> Result<ShadowOutput> {
        self.ensure_resources(gpu.device)?;

        let light_view = self.update_light_view(input.light.position);
        let light_view_proj = self.projection() * light_view;
        let uniform_buffer = self.uniform_buffer.as_ref().context("Shadow uniform buffer missing")?;
        gpu.queue.write_buffer(
            uniform_buffer,
            0,
            bytemuck::bytes_of(&ShadowUniform { light_view_proj: light_view_proj.to_cols_array_2d() }),
        );

        // No light-frustum culling: every object casts.
        self.draw_staging.clear();
        for object in input.objects {
            for surface in &object.surfaces {
                self.draw_staging.push(DrawUniform::new(object, surface));
            }
        }
        let draws = self.draws.as_mut().context("Shadow draw uniforms missing")?;
        draws.upload(gpu.device, gpu.queue, &self.draw_staging)?;

        let pipeline = &self.resources.as_ref().context("Shadow pipeline resources missing")?.pipeline;
        let frame_bg = self.frame_bind_group.as_ref().context("Shadow frame bind group missing")?;
        let draws = self.draws.as_ref().context("Shadow draw uniforms missing")?;

        let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: input.target.view(),
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if self.draw_staging.is_empty() {
            return Ok(ShadowOutput { light_view_proj, surfaces_drawn: 0 });
        }
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, frame_bg, &[]);
        let draw_bg = draws.bind_group()?;
        let mut index = 0;
        for object in input.objects {
            for surface in &object.surfaces {
                pass.set_bind_group(1, draw_bg, &[draws.offset(index)]);
                pass.set_vertex_buffer(0, surface.mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(surface.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..surface.mesh.index_count, 0, 0..1);
                index += 1;
            }
        }
        Ok(ShadowOutput { light_view_proj, surfaces_drawn: index })
    }
}

/// `None` when the light sits at the origin or straight above/below it.
pub fn light_view(light_position: Vec3) -> Option<Mat4> {
    let direction = -light_position;
    if !direction.is_finite() || direction.length_squared() <= COLLINEAR_EPSILON {
        return None;
    }
    if direction.normalize().cross(Vec3::Y).length_squared() <= COLLINEAR_EPSILON {
        return None;
    }
    Some(Mat4::look_at_rh(light_position, Vec3::ZERO, Vec3::Y))
}

/// Only used when the very first light position is degenerate.
fn fallback_light_view(light_position: Vec3, config: &ShadowConfig) -> Mat4 {
    let height = 0.5 * (config.near + config.far);
    let eye = if light_position.is_finite() && light_position.y.abs() > f32::EPSILON {
        Vec3::Y * light_position.y.signum() * height
    } else {
        Vec3::Y * height
    };
    Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::NEG_Z)
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowUniform {
    light_view_proj: [[f32; 4]; 4],
}
