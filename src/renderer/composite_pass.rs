use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Mat4;

use super::draw_uniforms::{DrawUniform, DrawUniforms};
use super::{gpu_projection, FramePass, GpuFrame};
use crate::camera::Camera;
use crate::frame::PassKind;
use crate::light::{Light, LightTerms};
use crate::scene::RenderObject;
use crate::targets::{RenderTarget, DEPTH_FORMAT};

/// Specular strength shared by every material.
pub const MATERIAL_SPECULAR: f32 = 0.2;

struct CompositePipelineResources {
    fill: wgpu::RenderPipeline,
    wireframe: Option<wgpu::RenderPipeline>,
    scene_layout: wgpu::BindGroupLayout,
    shadow_sampler: wgpu::Sampler,
}

/// A texture bound by the composite pass, identified so bind groups can be reused until
/// the texture behind it changes.
#[derive(Clone, Copy)]
pub struct BoundTexture<'a> {
    pub view: &'a wgpu::TextureView,
    pub key: u64,
}

pub struct CompositeInput<'a> {
    pub camera: &'a Camera,
    pub light: &'a Light,
    pub objects: &'a [&'a RenderObject<'a>],
    pub target_view: &'a wgpu::TextureView,
    pub depth: &'a RenderTarget,
    pub shadow: BoundTexture<'a>,
    pub occlusion: BoundTexture<'a>,
    pub light_view_proj: Mat4,
    pub use_shadows: bool,
    pub use_ssao: bool,
    pub wireframe: bool,
}

/// Final lit render into the display target.
pub struct CompositePass {
    target_format: wgpu::TextureFormat,
    wireframe_supported: bool,
    wireframe_warned: bool,
    depth_bias: f32,
    material_layout: Arc<wgpu::BindGroupLayout>,
    resources: Option<CompositePipelineResources>,
    scene_buffer: Option<wgpu::Buffer>,
    scene_bind_group: Option<((u64, u64), wgpu::BindGroup)>,
    draws: Option<DrawUniforms>,
    draw_staging: Vec<DrawUniform>,
}

impl CompositePass {
    pub fn new(
        target_format: wgpu::TextureFormat,
        material_layout: Arc<wgpu::BindGroupLayout>,
        wireframe_supported: bool,
        depth_bias: f32,
    ) -> Self {
        Self {
            target_format,
            wireframe_supported,
            wireframe_warned: false,
            depth_bias,
            material_layout,
            resources: None,
            scene_buffer: None,
            scene_bind_group: None,
            draws: None,
            draw_staging: Vec::new(),
        }
    }

    fn ensure_resources(&mut self, device: &wgpu::Device) -> Result<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/composite.wgsl").into()),
        });
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Scene BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
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
                        sample_type: wgpu::TextureSampleType::Depth,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
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
        let draws = DrawUniforms::new(device, "Composite Draw Uniforms");
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&scene_layout, draws.layout(), self.material_layout.as_ref()],
            push_constant_ranges: &[],
        });
        let build = |label: &str, polygon_mode: wgpu::PolygonMode| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
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
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.target_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    polygon_mode,
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
            })
        };
        let fill = build("Composite Pipeline", wgpu::PolygonMode::Fill);
        let wireframe =
            self.wireframe_supported.then(|| build("Composite Wireframe Pipeline", wgpu::PolygonMode::Line));
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: Some(wgpu::CompareFunction::LessEqual),
            anisotropy_clamp: 1,
            border_color: None,
        });
        let scene_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Scene Buffer"),
            size: std::mem::size_of::<SceneUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.resources = Some(CompositePipelineResources { fill, wireframe, scene_layout, shadow_sampler });
        self.scene_buffer = Some(scene_buffer);
        self.scene_bind_group = None;
        self.draws = Some(draws);
        Ok(())
    }

    /// Keys of the shadow and occlusion textures in the current scene bind group.
    pub fn bound_texture_keys(&self) -> Option<(u64, u64)> {
        self.scene_bind_group.as_ref().map(|(key, _)| *key)
    }

    fn ensure_scene_bind_group(
        &mut self,
        device: &wgpu::Device,
        shadow: BoundTexture<'_>,
        occlusion: BoundTexture<'_>,
    ) -> Result<()> {
        let key = (shadow.key, occlusion.key);
        if matches!(self.scene_bind_group, Some((cached, _)) if cached == key) {
            return Ok(());
        }
        let resources = self.resources.as_ref().context("Composite pipeline resources missing")?;
        let buffer = self.scene_buffer.as_ref().context("Composite scene buffer missing")?;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Scene BG"),
            layout: &resources.scene_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(shadow.view) },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&resources.shadow_sampler),
                },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(occlusion.view) },
            ],
        });
        self.scene_bind_group = Some((key, bind_group));
        Ok(())
    }

    fn pick_pipeline(&mut self, wireframe: bool) -> Result<&wgpu::RenderPipeline> {
        if wireframe && !self.wireframe_supported && !self.wireframe_warned {
            log::warn!(target: "renderer", "wireframe requested but the adapter lacks line polygon mode");
            self.wireframe_warned = true;
        }
        let resources = self.resources.as_ref().context("Composite pipeline resources missing")?;
        Ok(match (&resources.wireframe, wireframe) {
            (Some(line), true) => line,
            _ => &resources.fill,
        })
    }
}

impl FramePass for CompositePass {
    type Input<'a> = CompositeInput<'a>;
    /// Surfaces drawn.
    type Output = usize;

    fn kind(&self) -> PassKind {
        PassKind::Composite
    }

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: CompositeInput<'_>) -> Result<usize> {
        self.ensure_resources(gpu.device)?;
        self.ensure_scene_bind_group(gpu.device, input.shadow, input.occlusion)?;

        let terms = input.light.terms();
        let scene = SceneUniform::new(input.camera, input.light, &terms, input.light_view_proj, [
            if input.use_shadows { 1.0 } else { 0.0 },
            if input.use_ssao { 1.0 } else { 0.0 },
            self.depth_bias,
            MATERIAL_SPECULAR,
        ]);
        let scene_buffer = self.scene_buffer.as_ref().context("Composite scene buffer missing")?;
        gpu.queue.write_buffer(scene_buffer, 0, bytemuck::bytes_of(&scene));

        self.draw_staging.clear();
        for object in input.objects {
            for surface in &object.surfaces {
                self.draw_staging.push(DrawUniform::new(object, surface));
            }
        }
        self.draws.as_mut().context("Composite draw uniforms missing")?.upload(
            gpu.device,
            gpu.queue,
            &self.draw_staging,
        )?;
        let surface_count = self.draw_staging.len();

        let pipeline = self.pick_pipeline(input.wireframe)?.clone();
        let (_, scene_bg) = self.scene_bind_group.as_ref().context("Composite scene bind group missing")?;
        let draws = self.draws.as_ref().context("Composite draw uniforms missing")?;
        let clear = input.light.color;

        let mut pass = gpu.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: input.target_view,
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
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: input.depth.view(),
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if surface_count == 0 {
            return Ok(0);
        }
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, scene_bg, &[]);
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
struct SceneUniform {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    light_view_proj: [[f32; 4]; 4],
    camera_position: [f32; 4],
    light_position: [f32; 4],
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    params: [f32; 4],
}

impl SceneUniform {
    fn new(camera: &Camera, light: &Light, terms: &LightTerms, light_view_proj: Mat4, params: [f32; 4]) -> Self {
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            proj: gpu_projection(camera).to_cols_array_2d(),
            light_view_proj: light_view_proj.to_cols_array_2d(),
            camera_position: camera.position().extend(1.0).to_array(),
            light_position: light.position.extend(1.0).to_array(),
            ambient: terms.ambient.extend(1.0).to_array(),
            diffuse: terms.diffuse.extend(1.0).to_array(),
            specular: terms.specular.extend(1.0).to_array(),
            params,
        }
    }
}
