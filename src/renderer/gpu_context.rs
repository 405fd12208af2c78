use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::window::Window;

const DEFAULT_PRESENT_MODES: [wgpu::PresentMode; 1] = [wgpu::PresentMode::Fifo];
pub const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// The display target of one frame: a swapchain image or the offscreen headless texture.
#[derive(Debug)]
pub struct SurfaceFrame {
    view: wgpu::TextureView,
    surface: Option<wgpu::SurfaceTexture>,
}

impl SurfaceFrame {
    fn new(surface: wgpu::SurfaceTexture) -> Self {
        let view = surface.texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view, surface: Some(surface) }
    }

    fn headless(view: wgpu::TextureView) -> Self {
        Self { view, surface: None }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn present(mut self) {
        if let Some(surface) = self.surface.take() {
            surface.present();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceErrorAction {
    Reconfigure,
    Retry,
    OutOfMemory,
    Unknown,
}

/// Device, queue and display target. Either bound to a window surface or rendering into
/// an offscreen texture.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    config: wgpu::SurfaceConfiguration,
    present_modes: Vec<wgpu::PresentMode>,
    headless_target: Option<wgpu::Texture>,
    wireframe_supported: bool,
    vsync: bool,
}

impl GpuContext {
    pub async fn windowed(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window.clone()).context("Failed to create WGPU surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request WGPU adapter")?;
        let (device, queue, wireframe_supported) = request_device(&adapter, "Device").await?;

        let caps = surface.get_capabilities(&adapter);
        let format = choose_surface_format(&caps.formats)?;
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: select_present_mode(vsync, &caps.present_modes),
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!(target: "renderer", "surface {}x{} {:?}", config.width, config.height, config.format);

        Ok(Self {
            device,
            queue,
            surface: Some(surface),
            config,
            present_modes: caps.present_modes,
            headless_target: None,
            wireframe_supported,
            vsync,
        })
    }

    /// Offscreen context; frames render into a texture that can be copied back.
    pub async fn headless(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("Headless render target requires non-zero dimensions"));
        }
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request headless adapter")?;
        let (device, queue, wireframe_supported) = request_device(&adapter, "Headless Device").await?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: HEADLESS_FORMAT,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        let mut ctx = Self {
            device,
            queue,
            surface: None,
            config,
            present_modes: Vec::new(),
            headless_target: None,
            wireframe_supported,
            vsync: true,
        };
        ctx.recreate_headless_target();
        Ok(ctx)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    pub fn wireframe_supported(&self) -> bool {
        self.wireframe_supported
    }

    pub fn headless_texture(&self) -> Option<&wgpu::Texture> {
        self.headless_target.as_ref()
    }

    pub fn set_vsync(&mut self, enabled: bool) -> Result<()> {
        if self.vsync == enabled {
            return Ok(());
        }
        self.vsync = enabled;
        self.reconfigure_present_mode()
    }

    /// Zero sizes are ignored; the surface keeps its last real size until the window is
    /// restored.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        if let Some(surface) = self.surface.as_ref() {
            surface.configure(&self.device, &self.config);
        } else {
            self.recreate_headless_target();
        }
    }

    pub fn acquire_frame(&mut self) -> Result<SurfaceFrame> {
        if let Some(surface) = self.surface.as_ref() {
            match surface.get_current_texture() {
                Ok(frame) => Ok(SurfaceFrame::new(frame)),
                Err(err) => Err(self.handle_surface_error(&err)),
            }
        } else if let Some(texture) = self.headless_target.as_ref() {
            Ok(SurfaceFrame::headless(texture.create_view(&wgpu::TextureViewDescriptor::default())))
        } else {
            Err(anyhow!("Surface not initialized"))
        }
    }

    pub fn handle_surface_error(&mut self, error: &wgpu::SurfaceError) -> anyhow::Error {
        match surface_error_action(error) {
            SurfaceErrorAction::Reconfigure => {
                self.resize(self.size());
                anyhow!("Surface lost or outdated; reconfigured surface")
            }
            SurfaceErrorAction::Retry => anyhow!("Surface acquisition timed out"),
            SurfaceErrorAction::OutOfMemory => anyhow!("Surface out of memory"),
            SurfaceErrorAction::Unknown => anyhow!("Surface reported an unknown error"),
        }
    }

    fn reconfigure_present_mode(&mut self) -> Result<()> {
        let Some(surface) = self.surface.as_ref() else {
            return Ok(());
        };
        let modes: &[wgpu::PresentMode] =
            if self.present_modes.is_empty() { &DEFAULT_PRESENT_MODES } else { self.present_modes.as_slice() };
        self.config.present_mode = select_present_mode(self.vsync, modes);
        surface.configure(&self.device, &self.config);
        Ok(())
    }

    fn recreate_headless_target(&mut self) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Headless Render Target"),
            size: wgpu::Extent3d { width: self.config.width, height: self.config.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.headless_target = Some(texture);
    }
}

async fn request_device(adapter: &wgpu::Adapter, label: &str) -> Result<(wgpu::Device, wgpu::Queue, bool)> {
    let wireframe_supported = adapter.features().contains(wgpu::Features::POLYGON_MODE_LINE);
    let mut required_features = wgpu::Features::empty();
    if wireframe_supported {
        required_features |= wgpu::Features::POLYGON_MODE_LINE;
    }
    let device_desc = wgpu::DeviceDescriptor {
        label: Some(label),
        required_features,
        required_limits: adapter.limits(),
        experimental_features: wgpu::ExperimentalFeatures::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: wgpu::Trace::default(),
    };
    let (device, queue) = adapter.request_device(&device_desc).await.context("Failed to request WGPU device")?;
    let info = adapter.get_info();
    log::info!(target: "renderer", "using {} ({:?}), wireframe {}", info.name, info.backend, wireframe_supported);
    Ok((device, queue, wireframe_supported))
}

fn select_present_mode(vsync: bool, modes: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::Fifo
    } else {
        modes.iter().copied().find(|mode| *mode != wgpu::PresentMode::Fifo).unwrap_or(wgpu::PresentMode::Fifo)
    }
}

fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| formats.first().copied())
        .context("Surface reports no supported formats")
}

fn surface_error_action(error: &wgpu::SurfaceError) -> SurfaceErrorAction {
    match error {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceErrorAction::Reconfigure,
        wgpu::SurfaceError::Timeout => SurfaceErrorAction::Retry,
        wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::OutOfMemory,
        wgpu::SurfaceError::Other => SurfaceErrorAction::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_mode_respects_vsync_flag() {
        let modes = vec![wgpu::PresentMode::Immediate, wgpu::PresentMode::Fifo];
        assert_eq!(select_present_mode(false, &modes), wgpu::PresentMode::Immediate);
        assert_eq!(select_present_mode(true, &modes), wgpu::PresentMode::Fifo);
        assert_eq!(select_present_mode(false, &[wgpu::PresentMode::Fifo]), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = [wgpu::TextureFormat::Bgra8Unorm, wgpu::TextureFormat::Bgra8UnormSrgb];
        assert_eq!(choose_surface_format(&formats).expect("format"), wgpu::TextureFormat::Bgra8UnormSrgb);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn surface_error_action_matches_variants() {
        assert_eq!(surface_error_action(&wgpu::SurfaceError::Lost), SurfaceErrorAction::Reconfigure);
        assert_eq!(surface_error_action(&wgpu::SurfaceError::Outdated), SurfaceErrorAction::Reconfigure);
        assert_eq!(surface_error_action(&wgpu::SurfaceError::Timeout), SurfaceErrorAction::Retry);
        assert_eq!(surface_error_action(&wgpu::SurfaceError::OutOfMemory), SurfaceErrorAction::OutOfMemory);
        assert_eq!(surface_error_action(&wgpu::SurfaceError::Other), SurfaceErrorAction::Unknown);
    }
}
