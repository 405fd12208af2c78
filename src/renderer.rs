//! Frame coordinator: owns every render target and pass, and records one frame's passes
//! into a single command encoder in dependency order.

mod blur_pass;
mod composite_pass;
mod debug_view_pass;
mod draw_uniforms;
mod geometry_pass;
mod gpu_context;
mod shadow_pass;
mod ssao_pass;

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Mat4, Vec4};

use crate::camera::Camera;
use crate::config::{RendererConfig, SsaoConfig};
use crate::culling;
use crate::frame::{Effects, FramePlan, FrameReport, FrameState, OcclusionSource, PassKind, ShadowSource};
use crate::light::Light;
use crate::material::{self, Material};
use crate::scene::RenderObject;
use crate::ssao::SsaoKernel;
use crate::targets::{FrameTargets, GpuTargetFactory, RenderTarget, ResizeOutcome, TargetSlot, DEPTH_FORMAT};

pub use blur_pass::{BlurInput, BlurPass};
pub use composite_pass::{BoundTexture, CompositeInput, CompositePass, MATERIAL_SPECULAR};
pub use debug_view_pass::{DebugViewInput, DebugViewPass, QuadRect};
pub use geometry_pass::{GeometryInput, GeometryPass};
pub use gpu_context::{GpuContext, SurfaceFrame, HEADLESS_FORMAT};
pub use shadow_pass::{light_view, ShadowInput, ShadowOutput, ShadowPass};
pub use ssao_pass::{SsaoInput, SsaoPass};

/// Remaps OpenGL clip depth [-1, 1] to wgpu's [0, 1]. Culling works on the OpenGL
/// projection; everything rasterized goes through this first.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
]);

/// Key used for the built-in 1x1 fallback textures; real targets start at 1.
pub const DEFAULT_TEXTURE_KEY: u64 = 0;

/// Every error class a frame can raise; none of them may reach the device's panicking
/// default handler.
const FRAME_ERROR_FILTERS: [wgpu::ErrorFilter; 3] =
    [wgpu::ErrorFilter::Validation, wgpu::ErrorFilter::OutOfMemory, wgpu::ErrorFilter::Internal];

pub(crate) fn push_error_scopes(device: &wgpu::Device) {
    for filter in FRAME_ERROR_FILTERS {
        device.push_error_scope(filter);
    }
}

/// Pops the scopes pushed by [`push_error_scopes`] and returns whatever they caught.
pub(crate) fn pop_error_scopes(device: &wgpu::Device) -> Vec<wgpu::Error> {
    FRAME_ERROR_FILTERS.iter().filter_map(|_| pollster::block_on(device.pop_error_scope())).collect()
}

pub(crate) fn gpu_projection(camera: &Camera) -> Mat4 {
    OPENGL_TO_WGPU * camera.projection_matrix()
}

/// What a pass needs from the device for one frame.
pub struct GpuFrame<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
}

/// One stage of the frame. Each pass binds its own pipeline inside its own render pass,
/// so nothing it sets is visible to the next.
pub trait FramePass {
    type Input<'a>;
    type Output;

    fn kind(&self) -> PassKind;

    fn run(&mut self, gpu: &mut GpuFrame<'_>, input: Self::Input<'_>) -> Result<Self::Output>;
}

pub(crate) fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState { format, blend: None, write_mask: wgpu::ColorWrites::ALL })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Bound in place of the shadow map and occlusion target when those effects are off.
struct DefaultTextures {
    _shadow: wgpu::Texture,
    shadow_view: wgpu::TextureView,
    _occlusion: wgpu::Texture,
    occlusion_view: wgpu::TextureView,
}

impl DefaultTextures {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let extent = wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 };
        let shadow = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fully Lit Shadow Map"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let shadow_view = shadow.create_view(&wgpu::TextureViewDescriptor::default());
        let occlusion = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Constant Occlusion"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let constant = (OcclusionSource::CONSTANT_FACTOR.clamp(0.0, 1.0) * 255.0).round() as u8;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &occlusion,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[constant],
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(1), rows_per_image: Some(1) },
            extent,
        );
        let occlusion_view = occlusion.create_view(&wgpu::TextureViewDescriptor::default());

        // Depth 1.0 compares as lit for every fragment.
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Default Texture Init") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Fully Lit Shadow Map"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &shadow_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        queue.submit(Some(encoder.finish()));

        Self { _shadow: shadow, shadow_view, _occlusion: occlusion, occlusion_view }
    }
}

/// Owns all render targets and passes; one call to [`FrameRenderer::render_frame`] renders
/// one frame.
pub struct FrameRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    factory: GpuTargetFactory,
    targets: FrameTargets<RenderTarget>,
    material_layout: Arc<wgpu::BindGroupLayout>,
    material_sampler: wgpu::Sampler,
    default_material: Material,
    defaults: DefaultTextures,
    shadow: ShadowPass,
    geometry: GeometryPass,
    ssao: SsaoPass,
    blur: BlurPass,
    composite: CompositePass,
    debug_view: DebugViewPass,
}

impl FrameRenderer {
    pub fn new(ctx: &GpuContext, config: &RendererConfig) -> Result<Self> {
        let size = ctx.size();
        Self::from_parts(
            ctx.device().clone(),
            ctx.queue().clone(),
            ctx.format(),
            (size.width, size.height),
            ctx.wireframe_supported(),
            config,
        )
    }

    pub fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        target_format: wgpu::TextureFormat,
        size: (u32, u32),
        wireframe_supported: bool,
        config: &RendererConfig,
    ) -> Result<Self> {
        let material_layout = Arc::new(material::material_bind_group_layout(&device));
        let material_sampler = material::material_sampler(&device);
        let default_material = Material::from_rgba8(
            &device,
            &queue,
            &material_layout,
            &material_sampler,
            "Default White Material",
            (1, 1),
            &[255, 255, 255, 255],
            Vec4::ONE,
        )?;
        push_error_scopes(&device);
        let defaults = DefaultTextures::new(&device, &queue);
        if let Some(err) = pop_error_scopes(&device).into_iter().next() {
            anyhow::bail!("Failed to create fallback textures: {err}");
        }
        let factory = GpuTargetFactory::new(device.clone());
        let mut targets = FrameTargets::new(size.0, size.1, config.shadow.clamped_resolution());
        targets.ensure(&factory).context("Failed to create core render targets")?;
        log::info!(
            target: "renderer",
            "frame renderer ready at {}x{}, effects {:?}",
            size.0,
            size.1,
            targets.available()
        );

        Ok(Self {
            shadow: ShadowPass::new(config.shadow.clone()),
            geometry: GeometryPass::new(material_layout.clone()),
            ssao: SsaoPass::new(config.ssao.clone()),
            blur: BlurPass::new(config.ssao.blur_radius),
            composite: CompositePass::new(
                target_format,
                material_layout.clone(),
                wireframe_supported,
                config.shadow.depth_bias,
            ),
            debug_view: DebugViewPass::new(target_format, config.debug_view.clone(), &config.shadow),
            device,
            queue,
            factory,
            targets,
            material_layout,
            material_sampler,
            default_material,
            defaults,
        })
    }

    pub fn create_material(
        &self,
        label: &str,
        size: (u32, u32),
        rgba8: &[u8],
        tint: Vec4,
    ) -> Result<Material> {
        Material::from_rgba8(
            &self.device,
            &self.queue,
            &self.material_layout,
            &self.material_sampler,
            label,
            size,
            rgba8,
            tint,
        )
    }

    pub fn default_material(&self) -> &Material {
        &self.default_material
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn available_effects(&self) -> Effects {
        self.targets.available()
    }

    pub fn live_target_count(&self) -> usize {
        self.targets.live_count()
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.targets.size()
    }

    pub fn ssao_kernel(&self) -> &SsaoKernel {
        self.ssao.kernel()
    }

    pub fn set_ssao_config(&mut self, config: SsaoConfig) {
        self.blur.set_radius(config.blur_radius);
        self.ssao.set_config(config);
    }

    /// Shadow and occlusion texture keys the last composite pass sampled.
    /// [`DEFAULT_TEXTURE_KEY`] marks a fallback texture.
    pub fn composite_texture_keys(&self) -> Option<(u64, u64)> {
        self.composite.bound_texture_keys()
    }

    /// Intermediate target for inspection tooling.
    pub fn target_view(&self, slot: TargetSlot) -> Option<&wgpu::TextureView> {
        self.targets.get(slot).map(RenderTarget::view)
    }

    /// Recreates every window-sized target at the new size. Same-size calls do nothing;
    /// a zero size postpones the work until the window is restored.
    pub fn on_resize(&mut self, width: u32, height: u32) -> ResizeOutcome {
        self.targets.resize_outcome(&self.factory, width, height)
    }

    pub fn render_frame(
        &mut self,
        target_view: &wgpu::TextureView,
        camera: &Camera,
        light: &Light,
        objects: &[RenderObject<'_>],
        state: FrameState,
    ) -> Result<FrameReport> {
        if self.targets.is_deferred() {
            return Ok(FrameReport::skipped(FramePlan::build(&state, self.targets.available())));
        }
        if let Err(err) = self.targets.ensure(&self.factory) {
            log::warn!(target: "renderer", "skipping frame: {err}");
            return Ok(FrameReport::skipped(FramePlan::build(&state, self.targets.available())));
        }
        let plan = FramePlan::build(&state, self.targets.available());

        let view_projection = camera.view_projection();
        let all: Vec<&RenderObject<'_>> = objects.iter().collect();
        let visible: Vec<&RenderObject<'_>> = objects
            .iter()
            .filter(|object| {
                object.cull_exempt
                    || !state.frustum_culling_enabled
                    || culling::is_visible_with(view_projection, object.bounds.center, object.bounds.farthest_point)
            })
            .collect();
        let culled = objects.len() - visible.len();

        push_error_scopes(&self.device);
        let recorded = self.record_frame(&plan, target_view, camera, light, &all, &visible, &state);
        let surfaces_drawn = match recorded {
            Ok((commands, surfaces)) => {
                self.queue.submit(Some(commands));
                Ok(surfaces)
            }
            Err(err) => Err(err),
        };
        let errors = pop_error_scopes(&self.device);
        for err in &errors {
            log::error!(target: "renderer", "GPU error during frame: {err}");
        }
        let surfaces_drawn = surfaces_drawn?;

        Ok(FrameReport {
            plan,
            objects_submitted: visible.len(),
            objects_culled: culled,
            surfaces_drawn,
            presented: true,
            gpu_errors: errors.len(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_frame(
        &mut self,
        plan: &FramePlan,
        target_view: &wgpu::TextureView,
        camera: &Camera,
        light: &Light,
        all: &[&RenderObject<'_>],
        visible: &[&RenderObject<'_>],
        state: &FrameState,
    ) -> Result<(wgpu::CommandBuffer, usize)> {
        let mut encoder =
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });
        let mut gpu = GpuFrame { device: &self.device, queue: &self.queue, encoder: &mut encoder };
        let targets = &self.targets;
        let slot = |slot: TargetSlot| targets.get(slot).with_context(|| format!("{} missing", slot.label()));

        let mut light_view_proj = Mat4::IDENTITY;
        let mut surfaces_drawn = 0;
        for &kind in &plan.passes {
            match kind {
                PassKind::Shadow => {
                    let output = self.shadow.run(
                        &mut gpu,
                        ShadowInput { light, objects: all, target: slot(TargetSlot::ShadowMap)? },
                    )?;
                    light_view_proj = output.light_view_proj;
                }
                PassKind::GeometryPrepass => {
                    self.geometry.run(
                        &mut gpu,
                        GeometryInput {
                            camera,
                            clear_color: light.color,
                            objects: visible,
                            color: slot(TargetSlot::PrepassColor)?,
                            view_positions: slot(TargetSlot::ViewPositions)?,
                            depth: slot(TargetSlot::SceneDepth)?,
                        },
                    )?;
                }
                PassKind::Ssao => {
                    self.ssao.run(
                        &mut gpu,
                        SsaoInput {
                            camera,
                            view_positions: slot(TargetSlot::ViewPositions)?,
                            occlusion: slot(TargetSlot::Occlusion)?,
                        },
                    )?;
                }
                PassKind::Blur => {
                    self.blur.run(
                        &mut gpu,
                        BlurInput { occlusion: slot(TargetSlot::Occlusion)?, scratch: slot(TargetSlot::BlurScratch)? },
                    )?;
                }
                PassKind::Composite => {
                    let shadow = match plan.shadow {
                        ShadowSource::Map => {
                            let target = slot(TargetSlot::ShadowMap)?;
                            BoundTexture { view: target.view(), key: target.id() }
                        }
                        ShadowSource::FullyLit => {
                            BoundTexture { view: &self.defaults.shadow_view, key: DEFAULT_TEXTURE_KEY }
                        }
                    };
                    let occlusion = match plan.occlusion {
                        OcclusionSource::Raw | OcclusionSource::Blurred => {
                            let target = slot(TargetSlot::Occlusion)?;
                            BoundTexture { view: target.view(), key: target.id() }
                        }
                        OcclusionSource::Constant => {
                            BoundTexture { view: &self.defaults.occlusion_view, key: DEFAULT_TEXTURE_KEY }
                        }
                    };
                    surfaces_drawn = self.composite.run(
                        &mut gpu,
                        CompositeInput {
                            camera,
                            light,
                            objects: visible,
                            target_view,
                            depth: slot(TargetSlot::SceneDepth)?,
                            shadow,
                            occlusion,
                            light_view_proj,
                            use_shadows: plan.shadow == ShadowSource::Map,
                            use_ssao: plan.occlusion != OcclusionSource::Constant,
                            wireframe: state.wireframe_enabled,
                        },
                    )?;
                }
                PassKind::DebugShadowView => {
                    self.debug_view.run(
                        &mut gpu,
                        DebugViewInput {
                            target_view,
                            target_size: targets.size(),
                            shadow: slot(TargetSlot::ShadowMap)?,
                        },
                    )?;
                }
            }
        }
        drop(gpu);
        Ok((encoder.finish(), surfaces_drawn))
    }
}
