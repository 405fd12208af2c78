//! Render-target ownership. Every intermediate texture the frame needs lives in
//! [`FrameTargets`]; passes only borrow views for the duration of a frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::frame::Effects;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSlot {
    SceneDepth,
    /// Unlit scene color from the geometry prepass. No later pass samples it; it is kept
    /// for inspection through `FrameRenderer::target_view`.
    PrepassColor,
    ViewPositions,
    Occlusion,
    BlurScratch,
    ShadowMap,
}

impl TargetSlot {
    pub const ALL: [TargetSlot; 6] = [
        TargetSlot::SceneDepth,
        TargetSlot::PrepassColor,
        TargetSlot::ViewPositions,
        TargetSlot::Occlusion,
        TargetSlot::BlurScratch,
        TargetSlot::ShadowMap,
    ];

    pub fn is_window_sized(self) -> bool {
        !matches!(self, TargetSlot::ShadowMap)
    }

    /// Effect that cannot run without this target. Empty for targets every frame needs.
    pub fn effect(self) -> Effects {
        match self {
            TargetSlot::SceneDepth => Effects::empty(),
            TargetSlot::PrepassColor
            | TargetSlot::ViewPositions
            | TargetSlot::Occlusion
            | TargetSlot::BlurScratch => Effects::SSAO,
            TargetSlot::ShadowMap => Effects::SHADOWS,
        }
    }

    pub fn format(self) -> wgpu::TextureFormat {
        match self {
            TargetSlot::SceneDepth | TargetSlot::ShadowMap => DEPTH_FORMAT,
            TargetSlot::PrepassColor => wgpu::TextureFormat::Rgba8Unorm,
            TargetSlot::ViewPositions => wgpu::TextureFormat::Rgba16Float,
            TargetSlot::Occlusion | TargetSlot::BlurScratch => wgpu::TextureFormat::R16Float,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TargetSlot::SceneDepth => "Scene Depth Target",
            TargetSlot::PrepassColor => "Prepass Color Target",
            TargetSlot::ViewPositions => "View Position Target",
            TargetSlot::Occlusion => "Occlusion Target",
            TargetSlot::BlurScratch => "Blur Scratch Target",
            TargetSlot::ShadowMap => "Shadow Map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub slot: TargetSlot,
    pub width: u32,
    pub height: u32,
}

impl TargetDesc {
    pub fn format(&self) -> wgpu::TextureFormat {
        self.slot.format()
    }
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("{slot:?} target has a zero extent")]
    ZeroExtent { slot: TargetSlot },
    #[error("{slot:?} target of {width}x{height} exceeds the device limit of {limit}")]
    TooLarge { slot: TargetSlot, width: u32, height: u32, limit: u32 },
    #[error("{slot:?} target allocation failed: {message}")]
    Allocation { slot: TargetSlot, message: String },
}

impl TargetError {
    pub fn slot(&self) -> TargetSlot {
        match self {
            TargetError::ZeroExtent { slot }
            | TargetError::TooLarge { slot, .. }
            | TargetError::Allocation { slot, .. } => *slot,
        }
    }
}

/// Creates the backing storage for one target. The GPU factory is the only production
/// implementation; tests substitute one that counts allocations.
pub trait TargetFactory {
    type Target;

    fn create(&self, desc: &TargetDesc) -> Result<Self::Target, TargetError>;
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Texture + default view. Dropping it destroys the texture.
#[derive(Debug)]
pub struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TargetDesc,
    id: u64,
}

impl RenderTarget {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn desc(&self) -> TargetDesc {
        self.desc
    }

    /// Unique per allocation; bind groups built over this target are keyed by it.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

pub struct GpuTargetFactory {
    device: wgpu::Device,
}

impl GpuTargetFactory {
    pub fn new(device: wgpu::Device) -> Self {
        Self { device }
    }
}

impl TargetFactory for GpuTargetFactory {
    type Target = RenderTarget;

    fn create(&self, desc: &TargetDesc) -> Result<RenderTarget, TargetError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(TargetError::ZeroExtent { slot: desc.slot });
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width > limit || desc.height > limit {
            return Err(TargetError::TooLarge { slot: desc.slot, width: desc.width, height: desc.height, limit });
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.slot.label()),
            size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            texture.destroy();
            return Err(TargetError::Allocation { slot: desc.slot, message: err.to_string() });
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(target: "targets", "created {} {}x{} (#{id})", desc.slot.label(), desc.width, desc.height);
        Ok(RenderTarget { texture, view, desc: *desc, id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    /// Zero-sized window; targets are rebuilt once a real size arrives.
    Deferred,
    Recreated,
    /// A target every frame needs could not be created. Frames are skipped and creation
    /// is retried on the next frame or resize.
    Failed,
}

/// All render targets of the frame, created per effect. An effect whose target cannot be
/// created is disabled for the rest of the session and its other targets are released.
pub struct FrameTargets<T> {
    width: u32,
    height: u32,
    shadow_resolution: u32,
    deferred: bool,
    available: Effects,
    slots: HashMap<TargetSlot, T>,
}

impl<T> FrameTargets<T> {
    pub fn new(width: u32, height: u32, shadow_resolution: u32) -> Self {
        Self {
            width,
            height,
            shadow_resolution,
            deferred: width == 0 || height == 0,
            available: Effects::all(),
            slots: HashMap::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn available(&self) -> Effects {
        self.available
    }

    pub fn get(&self, slot: TargetSlot) -> Option<&T> {
        self.slots.get(&slot)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Creates every missing target of the core frame and the still-available effects.
    /// Only a core target failure is returned as an error.
    pub fn ensure<F>(&mut self, factory: &F) -> Result<(), TargetError>
    where
        F: TargetFactory<Target = T>,
    {
        if self.deferred {
            return Ok(());
        }
        for slot in TargetSlot::ALL {
            let effect = slot.effect();
            if !self.available.contains(effect) || self.slots.contains_key(&slot) {
                continue;
            }
            let desc = self.desc_for(slot);
            match factory.create(&desc) {
                Ok(target) => {
                    self.slots.insert(slot, target);
                }
                Err(err) if effect.is_empty() => {
                    log::error!(target: "targets", "{err}");
                    return Err(err);
                }
                Err(err) => {
                    log::warn!(target: "targets", "{err}; disabling {effect:?} for this session");
                    self.disable(effect);
                }
            }
        }
        Ok(())
    }

    /// Drops every window-sized target, then creates them again at the new size. The
    /// shadow map is left alone.
    pub fn resize<F>(&mut self, factory: &F, width: u32, height: u32) -> Result<ResizeOutcome, TargetError>
    where
        F: TargetFactory<Target = T>,
    {
        if width == 0 || height == 0 {
            if !self.deferred {
                log::info!(target: "targets", "window minimized; deferring target recreation");
            }
            self.deferred = true;
            return Ok(ResizeOutcome::Deferred);
        }
        let missing = TargetSlot::ALL
            .iter()
            .any(|slot| self.available.contains(slot.effect()) && !self.slots.contains_key(slot));
        if !self.deferred && !missing && (width, height) == (self.width, self.height) {
            return Ok(ResizeOutcome::Unchanged);
        }
        self.deferred = false;
        if (width, height) != (self.width, self.height) {
            self.slots.retain(|slot, _| !slot.is_window_sized());
            log::info!(target: "targets", "resizing targets {}x{} -> {width}x{height}", self.width, self.height);
        }
        self.width = width;
        self.height = height;
        self.ensure(factory)?;
        Ok(ResizeOutcome::Recreated)
    }

    /// [`FrameTargets::resize`] for callers that only need to know what happened; the
    /// error is logged and reported as [`ResizeOutcome::Failed`].
    pub fn resize_outcome<F>(&mut self, factory: &F, width: u32, height: u32) -> ResizeOutcome
    where
        F: TargetFactory<Target = T>,
    {
        match self.resize(factory, width, height) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!(target: "targets", "resize to {width}x{height} failed: {err}");
                ResizeOutcome::Failed
            }
        }
    }

    pub fn disable(&mut self, effects: Effects) {
        self.available.remove(effects);
        self.slots.retain(|slot, _| !effects.intersects(slot.effect()));
    }

    fn desc_for(&self, slot: TargetSlot) -> TargetDesc {
        if slot.is_window_sized() {
            TargetDesc { slot, width: self.width, height: self.height }
        } else {
            TargetDesc { slot, width: self.shadow_resolution, height: self.shadow_resolution }
        }
    }
}
