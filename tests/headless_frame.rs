use glade_renderer::camera::{Camera, Projection};
use glade_renderer::config::{RendererConfig, ShadowConfig};
use glade_renderer::frame::{FrameState, OcclusionSource, PassKind};
use glade_renderer::light::Light;
use glade_renderer::mesh::{GpuMesh, Mesh};
use glade_renderer::renderer::{FrameRenderer, GpuContext, DEFAULT_TEXTURE_KEY};
use glade_renderer::scene::RenderObject;
use glade_renderer::targets::{ResizeOutcome, TargetSlot};
use glam::{Mat4, Vec3, Vec4};
use winit::dpi::PhysicalSize;

fn headless_context(width: u32, height: u32) -> Option<GpuContext> {
    match pollster::block_on(GpuContext::headless(width, height)) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {err:?}");
            None
        }
    }
}

fn display_view(ctx: &GpuContext) -> wgpu::TextureView {
    ctx.headless_texture()
        .expect("headless display target")
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn test_config() -> RendererConfig {
    let mut config = RendererConfig::default();
    config.shadow = ShadowConfig { resolution: 512, ..ShadowConfig::default() };
    config.ssao.kernel_size = 16;
    config
}

#[test]
fn frame_runs_every_enabled_pass() {
    let Some(ctx) = headless_context(64, 48) else {
        return;
    };
    let mut renderer = FrameRenderer::new(&ctx, &test_config()).expect("frame renderer");
    let cube = Mesh::cube(2.0);
    let bounds = cube.bounding_sphere().expect("cube bounds");
    let gpu_cube = GpuMesh::upload(ctx.device(), "Test Cube", &cube).expect("upload cube");
    let red = renderer.create_material("Red", (1, 1), &[255, 0, 0, 255], Vec4::ONE).expect("material");
    let gray = renderer.create_material("Gray", (1, 1), &[128, 128, 128, 255], Vec4::ONE).expect("material");

    let objects = vec![
        RenderObject::new(Mat4::from_translation(Vec3::new(0.0, 0.0, -6.0)), bounds).with_surface(&gpu_cube, &red),
        RenderObject::new(Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0)), bounds).with_surface(&gpu_cube, &gray),
        RenderObject::new(
            Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0)) * Mat4::from_scale(Vec3::new(30.0, 0.1, 30.0)),
            bounds,
        )
        .with_surface(&gpu_cube, &gray)
        .cull_exempt(),
    ];
    let camera = Camera::new(Mat4::IDENTITY, Projection::new(1.0, 64.0 / 48.0, 0.2, 100.0));
    let light = Light::new(Vec3::new(60.0, 120.0, 60.0), Vec3::ONE);
    let frame = display_view(&ctx);

    let state = FrameState { debug_shadow_view: true, ..FrameState::default() };
    let report = renderer.render_frame(&frame, &camera, &light, &objects, state).expect("render frame");
    assert!(report.presented);
    assert_eq!(report.gpu_errors, 0);
    assert_eq!(
        report.plan.passes.as_slice(),
        &[
            PassKind::Shadow,
            PassKind::GeometryPrepass,
            PassKind::Ssao,
            PassKind::Blur,
            PassKind::Composite,
            PassKind::DebugShadowView,
        ]
    );
    assert_eq!(report.objects_culled, 1);
    assert_eq!(report.objects_submitted, 2);
    assert_eq!(report.surfaces_drawn, 2);
    assert!(renderer.target_view(TargetSlot::PrepassColor).is_some());
    let (shadow_key, occlusion_key) = renderer.composite_texture_keys().expect("composite ran");
    assert_ne!(shadow_key, DEFAULT_TEXTURE_KEY);
    assert_ne!(occlusion_key, DEFAULT_TEXTURE_KEY);

    let mut no_ssao = FrameState::default();
    no_ssao.set_ssao(false);
    no_ssao.set_frustum_culling(false);
    let report = renderer.render_frame(&frame, &camera, &light, &objects, no_ssao).expect("render frame");
    assert_eq!(report.gpu_errors, 0);
    assert!(!report.plan.runs(PassKind::Ssao));
    assert!(!report.plan.runs(PassKind::GeometryPrepass));
    assert_eq!(report.plan.occlusion, OcclusionSource::Constant);
    assert_eq!(report.objects_culled, 0);
    assert_eq!(report.surfaces_drawn, 3);
    assert_eq!(renderer.composite_texture_keys(), Some((shadow_key, DEFAULT_TEXTURE_KEY)));
}

#[test]
fn debug_shadow_view_alone_records_cleanly() {
    let Some(ctx) = headless_context(256, 256) else {
        return;
    };
    let mut renderer = FrameRenderer::new(&ctx, &test_config()).expect("frame renderer");
    let camera = Camera::new(Mat4::IDENTITY, Projection::default());
    let light = Light::new(Vec3::new(20.0, 80.0, 10.0), Vec3::ONE);
    let state = FrameState { debug_shadow_view: true, ..FrameState::default() };
    for _ in 0..2 {
        let report =
            renderer.render_frame(&display_view(&ctx), &camera, &light, &[], state).expect("frame with debug view");
        assert!(report.plan.runs(PassKind::DebugShadowView));
        assert_eq!(report.gpu_errors, 0);
    }
}

#[test]
fn resize_rebuilds_targets_and_minimize_skips_frames() {
    let Some(mut ctx) = headless_context(32, 32) else {
        return;
    };
    let mut renderer = FrameRenderer::new(&ctx, &test_config()).expect("frame renderer");
    let live = renderer.live_target_count();
    assert_eq!(live, TargetSlot::ALL.len());

    assert_eq!(renderer.on_resize(32, 32), ResizeOutcome::Unchanged);
    assert_eq!(renderer.on_resize(0, 0), ResizeOutcome::Deferred);

    let camera = Camera::new(Mat4::IDENTITY, Projection::default());
    let light = Light::new(Vec3::new(0.0, 100.0, 0.0), Vec3::ONE);
    let frame = display_view(&ctx);
    let report = renderer.render_frame(&frame, &camera, &light, &[], FrameState::default()).expect("skipped frame");
    assert!(!report.presented);

    for size in [48, 64, 48] {
        ctx.resize(PhysicalSize::new(size, size));
        assert_eq!(renderer.on_resize(size, size), ResizeOutcome::Recreated);
        assert_eq!(renderer.live_target_count(), live);
        assert_eq!(renderer.target_size(), (size, size));
    }
    let frame = display_view(&ctx);
    let report = renderer.render_frame(&frame, &camera, &light, &[], FrameState::default()).expect("frame");
    assert!(report.presented);
    assert_eq!(report.surfaces_drawn, 0);
}

#[test]
fn ssao_settings_can_change_between_frames() {
    let Some(ctx) = headless_context(32, 32) else {
        return;
    };
    let config = test_config();
    let mut renderer = FrameRenderer::new(&ctx, &config).expect("frame renderer");
    assert_eq!(renderer.ssao_kernel().len(), 16);

    let mut ssao = config.ssao.clone();
    ssao.kernel_size = 32;
    ssao.blur_radius = 0;
    renderer.set_ssao_config(ssao);
    assert_eq!(renderer.ssao_kernel().len(), 32);

    let camera = Camera::new(Mat4::IDENTITY, Projection::default());
    let light = Light::new(Vec3::new(40.0, 100.0, 0.0), Vec3::ONE);
    let report = renderer
        .render_frame(&display_view(&ctx), &camera, &light, &[], FrameState::default())
        .expect("frame");
    assert!(report.plan.runs(PassKind::Blur));
    assert!(renderer.target_view(TargetSlot::Occlusion).is_some());
}
