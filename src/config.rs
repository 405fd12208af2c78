use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::frame::FrameState;

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

/// Single directional shadow map. The light looks from its position at the scene origin
/// through an orthographic box of `±extent` between `near` and `far`.
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "ShadowConfig::default_resolution")]
    pub resolution: u32,
    #[serde(default = "ShadowConfig::default_extent")]
    pub extent: f32,
    #[serde(default = "ShadowConfig::default_near")]
    pub near: f32,
    #[serde(default = "ShadowConfig::default_far")]
    pub far: f32,
    #[serde(default = "ShadowConfig::default_depth_bias")]
    pub depth_bias: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SsaoConfig {
    #[serde(default = "SsaoConfig::default_kernel_size")]
    pub kernel_size: u32,
    /// View-space sampling radius.
    #[serde(default = "SsaoConfig::default_radius")]
    pub radius: f32,
    #[serde(default = "SsaoConfig::default_bias")]
    pub bias: f32,
    #[serde(default = "SsaoConfig::default_range_check")]
    pub range_check: bool,
    #[serde(default = "SsaoConfig::default_seed")]
    pub seed: u64,
    /// Half-width in pixels of each blur direction.
    #[serde(default = "SsaoConfig::default_blur_radius")]
    pub blur_radius: u32,
}

/// Corner quad showing the raw shadow depth.
#[derive(Debug, Clone, Deserialize)]
pub struct DebugViewConfig {
    /// Quad edge length as a fraction of the window height.
    #[serde(default = "DebugViewConfig::default_scale")]
    pub scale: f32,
    #[serde(default = "DebugViewConfig::default_margin")]
    pub margin: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RendererConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub ssao: SsaoConfig,
    #[serde(default)]
    pub debug_view: DebugViewConfig,
    #[serde(default)]
    pub features: FrameState,
}

#[derive(Debug, Clone, Default)]
pub struct RendererConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub ssao: Option<bool>,
    pub shadows: Option<bool>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Glade".to_string(), width: 1280, height: 720, vsync: true, fullscreen: false }
    }
}

impl ShadowConfig {
    pub const MIN_RESOLUTION: u32 = 256;
    pub const MAX_RESOLUTION: u32 = 8192;

    const fn default_resolution() -> u32 {
        4096
    }

    const fn default_extent() -> f32 {
        100.0
    }

    const fn default_near() -> f32 {
        50.0
    }

    const fn default_far() -> f32 {
        400.0
    }

    const fn default_depth_bias() -> f32 {
        0.0015
    }

    pub fn clamped_resolution(&self) -> u32 {
        self.resolution.clamp(Self::MIN_RESOLUTION, Self::MAX_RESOLUTION)
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: Self::default_resolution(),
            extent: Self::default_extent(),
            near: Self::default_near(),
            far: Self::default_far(),
            depth_bias: Self::default_depth_bias(),
        }
    }
}

impl SsaoConfig {
    pub const MAX_BLUR_RADIUS: u32 = 16;
    pub const MIN_RADIUS: f32 = 0.01;
    pub const MAX_RADIUS: f32 = 16.0;
    pub const MAX_BIAS: f32 = 1.0;

    /// Copy with every numeric setting inside the range the passes accept. Non-finite
    /// values fall back to their defaults.
    pub fn clamped(&self) -> Self {
        let finite_or = |value: f32, fallback: f32| if value.is_finite() { value } else { fallback };
        Self {
            radius: finite_or(self.radius, Self::default_radius()).clamp(Self::MIN_RADIUS, Self::MAX_RADIUS),
            bias: finite_or(self.bias, Self::default_bias()).clamp(0.0, Self::MAX_BIAS),
            blur_radius: self.blur_radius.min(Self::MAX_BLUR_RADIUS),
            ..self.clone()
        }
    }

    const fn default_kernel_size() -> u32 {
        64
    }

    const fn default_radius() -> f32 {
        0.5
    }

    const fn default_bias() -> f32 {
        0.025
    }

    const fn default_range_check() -> bool {
        true
    }

    const fn default_seed() -> u64 {
        0x5eed_a0
    }

    const fn default_blur_radius() -> u32 {
        2
    }
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            kernel_size: Self::default_kernel_size(),
            radius: Self::default_radius(),
            bias: Self::default_bias(),
            range_check: Self::default_range_check(),
            seed: Self::default_seed(),
            blur_radius: Self::default_blur_radius(),
        }
    }
}

impl DebugViewConfig {
    const fn default_scale() -> f32 {
        0.3
    }

    const fn default_margin() -> u32 {
        16
    }
}

impl Default for DebugViewConfig {
    fn default() -> Self {
        Self { scale: Self::default_scale(), margin: Self::default_margin() }
    }
}

impl RendererConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!(target: "config", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RendererConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(ssao) = overrides.ssao {
            self.features.set_ssao(ssao);
        }
        if let Some(shadows) = overrides.shadows {
            self.features.set_shadows(shadows);
        }
    }
}

impl RendererConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.ssao.is_some() {
            fields.push("ssao");
        }
        if self.shadows.is_some() {
            fields.push("shadows");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_touch_only_given_fields() {
        let mut cfg = RendererConfig::default();
        let overrides = RendererConfigOverrides { width: Some(640), ssao: Some(false), ..Default::default() };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert!(!cfg.features.ssao_enabled);
        assert!(cfg.features.shadows_enabled);
        assert_eq!(overrides.applied_fields(), vec!["width", "ssao"]);
    }

    #[test]
    fn ssao_settings_are_clamped() {
        let cfg = SsaoConfig { radius: 1e9, bias: -3.0, blur_radius: u32::MAX, ..SsaoConfig::default() }.clamped();
        assert_eq!(cfg.radius, SsaoConfig::MAX_RADIUS);
        assert_eq!(cfg.bias, 0.0);
        assert_eq!(cfg.blur_radius, SsaoConfig::MAX_BLUR_RADIUS);

        let cfg = SsaoConfig { radius: f32::NAN, bias: f32::INFINITY, ..SsaoConfig::default() }.clamped();
        assert_eq!(cfg.radius, SsaoConfig::default().radius);
        assert_eq!(cfg.bias, SsaoConfig::default().bias);

        let defaults = SsaoConfig::default();
        let cfg = defaults.clamped();
        assert_eq!((cfg.radius, cfg.bias, cfg.blur_radius), (defaults.radius, defaults.bias, defaults.blur_radius));
    }

    #[test]
    fn shadow_resolution_is_clamped() {
        let cfg = ShadowConfig { resolution: 16, ..ShadowConfig::default() };
        assert_eq!(cfg.clamped_resolution(), ShadowConfig::MIN_RESOLUTION);
        assert_eq!(ShadowConfig::default().clamped_resolution(), 4096);
    }
}
