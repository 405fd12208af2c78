use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{EulerRot, Mat4, Quat, Vec3};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::camera::{Camera, Projection};
use crate::config::{RendererConfig, RendererConfigOverrides};
use crate::demo_scene::{terrain_height, DemoScene};
use crate::frame::{FrameState, FrameToggle};
use crate::renderer::{FrameRenderer, GpuContext};
use crate::time::Time;

const MOVE_SPEED: f32 = 12.0;
const TURN_SPEED: f32 = 1.6;
const EYE_HEIGHT: f32 = 1.8;
const MAX_PITCH: f32 = 1.45;
const STATS_INTERVAL: f32 = 2.0;

pub const DEFAULT_CONFIG_PATH: &str = "config/renderer.json";

/// Maps function keys to the feature switches they flip.
pub fn toggle_for_key(key: KeyCode) -> Option<FrameToggle> {
    match key {
        KeyCode::F1 => Some(FrameToggle::Shadows),
        KeyCode::F2 => Some(FrameToggle::Ssao),
        KeyCode::F3 => Some(FrameToggle::Blur),
        KeyCode::F4 => Some(FrameToggle::Wireframe),
        KeyCode::F5 => Some(FrameToggle::DebugShadowView),
        KeyCode::F6 => Some(FrameToggle::FrustumCulling),
        _ => None,
    }
}

pub async fn run() -> Result<()> {
    run_with_config(RendererConfig::load_or_default(DEFAULT_CONFIG_PATH), RendererConfigOverrides::default()).await
}

pub async fn run_with_config(mut config: RendererConfig, overrides: RendererConfigOverrides) -> Result<()> {
    if !overrides.is_empty() {
        log::info!(target: "config", "applying CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

/// Walking viewer: position on the terrain plus yaw/pitch.
struct Walker {
    position: Vec3,
    yaw: f32,
    pitch: f32,
}

impl Walker {
    fn update(&mut self, pressed: &HashSet<KeyCode>, dt: f32) {
        let axis = |positive: KeyCode, negative: KeyCode| {
            pressed.contains(&positive) as i32 as f32 - pressed.contains(&negative) as i32 as f32
        };
        self.yaw += axis(KeyCode::ArrowLeft, KeyCode::ArrowRight) * TURN_SPEED * dt;
        self.pitch =
            (self.pitch + axis(KeyCode::ArrowUp, KeyCode::ArrowDown) * TURN_SPEED * dt).clamp(-MAX_PITCH, MAX_PITCH);

        let forward = Quat::from_rotation_y(self.yaw) * Vec3::NEG_Z;
        let right = Quat::from_rotation_y(self.yaw) * Vec3::X;
        let step = forward * axis(KeyCode::KeyW, KeyCode::KeyS) + right * axis(KeyCode::KeyD, KeyCode::KeyA);
        if step.length_squared() > 0.0 {
            self.position += step.normalize() * MOVE_SPEED * dt;
        }
        self.position.y = terrain_height(self.position.x, self.position.z) + EYE_HEIGHT;
    }

    fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0), self.position)
    }
}

struct GraphicsState {
    window: Arc<Window>,
    gpu: GpuContext,
    renderer: FrameRenderer,
    scene: DemoScene,
}

pub struct App {
    config: RendererConfig,
    state: FrameState,
    graphics: Option<GraphicsState>,
    camera: Camera,
    walker: Walker,
    pressed: HashSet<KeyCode>,
    time: Time,
    stats_timer: f32,
    should_close: bool,
}

impl App {
    pub fn new(config: RendererConfig) -> Self {
        let aspect = config.window.width.max(1) as f32 / config.window.height.max(1) as f32;
        let projection = Projection { aspect, ..Projection::default() };
        Self {
            state: config.features,
            config,
            graphics: None,
            camera: Camera::new(Mat4::IDENTITY, projection),
            walker: Walker { position: Vec3::new(0.0, 0.0, 40.0), yaw: 0.0, pitch: -0.1 },
            pressed: HashSet::new(),
            time: Time::new(),
            stats_timer: 0.0,
            should_close: false,
        }
    }

    fn init_graphics(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_cfg = &self.config.window;
        let mut attrs = Window::default_attributes()
            .with_title(window_cfg.title.clone())
            .with_inner_size(PhysicalSize::new(window_cfg.width, window_cfg.height));
        if window_cfg.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(event_loop.create_window(attrs).context("Failed to create window")?);
        let gpu = pollster::block_on(GpuContext::windowed(window.clone(), window_cfg.vsync))?;
        let renderer = FrameRenderer::new(&gpu, &self.config)?;
        let scene = DemoScene::new(&renderer)?;
        let size = gpu.size();
        self.camera.set_aspect_ratio(size.width, size.height);
        self.graphics = Some(GraphicsState { window, gpu, renderer, scene });
        Ok(())
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        match event.state {
            ElementState::Pressed => {
                if !event.repeat {
                    if let Some(toggle) = toggle_for_key(code) {
                        self.state.toggle(toggle);
                    }
                }
                if code == KeyCode::Escape {
                    self.should_close = true;
                }
                self.pressed.insert(code);
            }
            ElementState::Released => {
                self.pressed.remove(&code);
            }
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let Some(graphics) = self.graphics.as_mut() else {
            return;
        };
        graphics.gpu.resize(size);
        let outcome = graphics.renderer.on_resize(size.width, size.height);
        log::debug!(target: "renderer", "resize to {}x{}: {:?}", size.width, size.height, outcome);
        self.camera.set_aspect_ratio(size.width, size.height);
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(graphics) = self.graphics.as_mut() else {
            return Ok(());
        };
        let frame = graphics.gpu.acquire_frame()?;
        let objects = graphics.scene.objects();
        let report =
            graphics.renderer.render_frame(frame.view(), &self.camera, graphics.scene.sun(), &objects, self.state)?;
        if report.presented {
            frame.present();
        }
        if self.stats_timer >= STATS_INTERVAL {
            self.stats_timer = 0.0;
            log::debug!(
                target: "renderer",
                "passes {:?}, submitted {}, culled {}, surfaces {}",
                report.plan.passes,
                report.objects_submitted,
                report.objects_culled,
                report.surfaces_drawn
            );
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.graphics.is_some() {
            return;
        }
        if let Err(err) = self.init_graphics(event_loop) {
            log::error!(target: "renderer", "Renderer initialization error: {err:?}");
            self.should_close = true;
        }
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.resize(*size),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event),
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    log::warn!(target: "renderer", "frame dropped: {err:?}");
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
            return;
        }
        self.time.tick();
        let dt = self.time.delta_seconds();
        self.stats_timer += dt;
        self.walker.update(&self.pressed, dt);
        self.camera.set_transform(self.walker.transform());
        if let Some(graphics) = self.graphics.as_mut() {
            graphics.scene.update(dt);
            graphics.window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_keys_map_to_distinct_toggles() {
        let keys = [KeyCode::F1, KeyCode::F2, KeyCode::F3, KeyCode::F4, KeyCode::F5, KeyCode::F6];
        let toggles: Vec<_> = keys.iter().filter_map(|key| toggle_for_key(*key)).collect();
        assert_eq!(toggles.len(), keys.len());
        for (i, a) in toggles.iter().enumerate() {
            assert!(toggles[i + 1..].iter().all(|b| a != b));
        }
        assert_eq!(toggle_for_key(KeyCode::KeyW), None);
    }

    #[test]
    fn walker_follows_terrain_and_clamps_pitch() {
        let mut walker = Walker { position: Vec3::new(5.0, 100.0, -3.0), yaw: 0.0, pitch: 0.0 };
        let pressed: HashSet<KeyCode> = [KeyCode::ArrowUp].into_iter().collect();
        for _ in 0..100 {
            walker.update(&pressed, 0.1);
        }
        assert_eq!(walker.pitch, MAX_PITCH);
        let expected = terrain_height(walker.position.x, walker.position.z) + EYE_HEIGHT;
        assert!((walker.position.y - expected).abs() < 1e-4);
    }
}
