use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Vec3;

use super::draw_uniforms::{DrawUniform, DrawUniforms};
use super::{gpu_projection, FramePass, GpuFrame};
use crate::camera::Camera;
use crate::frame::PassKind;
use crate::scene::RenderObject;
use crate::targets::{RenderTarget, TargetSlot, DEPTH_FORMAT};

struct GeometryPipelineResources {
    pipeline: wgpu::RenderPipeline,
}

/// Writes scene color and view-space positions for the occlusion pass.
pub struct GeometryPass {
    material_layout: Arc<wgpu::BindGroupLayout>,
    resources: Option<GeometryPipelineResources>,
    camera_buffer: Option<wgpu::Buffer>,
    camera_bind_group: Option<wgpu::BindGroup>,
    draws: Option<DrawUniforms>,
    draw_staging: Vec<DrawUniform>,
}

pub struct GeometryInput<'a> {
    pub camera: &'a Camera,
    pub clear_color: Vec3,
    pub objects: &'a [&'a RenderObject<'a>],
    pub color: &'a RenderTarget,
    pub view_positions: &'a RenderTarget,
    pub depth: &'a RenderTarget,
}

impl GeometryPass {
    pub fn new(material_layout: Arc<wgpu::BindGroupLayout>) -> Self {
        Self {
            material_layout,
            resources: None,
            camera_buffer: None,
            camera_bind_group: None,
            draws: None,
            draw_staging: Vec::new(),
        }
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Geometry Prepass Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/geometry.wgsl").into()),
        });
        let camera_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Geometry Camera BGL"),
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
        let draws = DrawUniforms::new(device, "Geometry Draw Uniforms");
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Geometry Pipeline Layout"),
            bind_group_layouts: &[&camera_bgl, draws.layout(), self.material_layout.as_ref()],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Geometry Prepass Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[crate::mesh::MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: TargetSlot::PrepassColor.format(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: TargetSlot::ViewPositions.format(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Geometry Camera Buffer"),
            size: std::mem::size_of::<GeometryCameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Geometry Camera BG"),
            layout: &camera_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() }],
        });
        self.resources = Some(GeometryPipelineResources { pipeline });
        self.camera_buffer = Some(camera_buffer);
        self.camera_bind_group = Some(camera_bind_group);
        self.draws = Some(draws);
        Ok(())
    }
}

impl FramePass for GeometryPass {
    type Input<'a> = GeometryInput<'a>;
    /// Surfaces drawn.
    type Output = usize;

    fn kind(&self) -> PassKind {
        PassKind::GeometryPrepass
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: GeometryInput<'_>) -> Result<usize> {
        self.ensure_resources(gpu.device)?;

        let camera_uniform = GeometryCameraUniform {
            view: input.camera.view_matrix().to_cols_array_2d(),
            proj: gpu_projection(input.camera).to_cols_array_2d(),
        };
        let camera_buffer = self.camera_buffer.as_ref().context("Geometry camera buffer missing")?;
        gpu.queue.write_buffer(camera_buffer, 0, bytemuck::bytes_of(&camera_uniform));

        self.draw_staging.clear();
        for object in input.objects {
            for surface in &object.surfaces {
                self.draw_staging.push(DrawUniform::new(object, surface));
            }
        }
        self.draws.as_mut().context("Geometry draw uniforms missing")?.upload(
            gpu.device,
            gpu.queue,
            &self.draw_staging,
        )?;

        let pipeline = &self.resources.as_ref().context("Geometry pipeline resources missing")?.pipeline;
        let camera_bg = self.camera_bind_group.as_ref().context("Geometry camera bind group missing")?;
        let draws = self.draws.as_ref().context("Geometry draw uniforms missing")?;
        let clear = input.clear_color;

        let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Geometry Prepass"),
            color_attachments: &[
                Some(wgpu::RenderPassColorAttachment {
                    view: input.color.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.x as f64,
                            g: clear.y as f64,
                            b: clear.z as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                }),
                Some(wgpu::RenderPassColorAttachment {
                    view: input.view_positions.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT), store: wgpu::StoreOp::Store },
                }),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: input.depth.view(),
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if self.draw_staging.is_empty() {
            return Ok(0);
        }
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, camera_bg, &[]);
        let draw_bg = draws.bind_group()?;
        let mut index = 0;
        for object in input.objects {
            for surface in &object.surfaces {
                pass.set_bind_group(1, draw_bg, &[draws.offset(index)]);
                pass.set_bind_group(2, surface.material.bind_group(), &[]);
                pass.set_vertex_buffer(0, surface.mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(surface.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..surface.mesh.index_count, 0, 0..1);
                index += 1;
            }
        }
        Ok(index)
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GeometryCameraUniform {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
}
