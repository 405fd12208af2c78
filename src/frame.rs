//! Per-frame configuration and the fixed pass ordering derived from it.

use bitflags::bitflags;
use serde::Deserialize;
use smallvec::SmallVec;

/// Feature switches for one frame. Read once when the frame starts; input handling
/// mutates it between frames through the setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FrameState {
    #[serde(default = "FrameState::default_on")]
    pub shadows_enabled: bool,
    #[serde(default = "FrameState::default_on")]
    pub ssao_enabled: bool,
    #[serde(default = "FrameState::default_on")]
    pub blur_enabled: bool,
    #[serde(default)]
    pub wireframe_enabled: bool,
    #[serde(default)]
    pub debug_shadow_view: bool,
    #[serde(default = "FrameState::default_on")]
    pub frustum_culling_enabled: bool,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            shadows_enabled: true,
            ssao_enabled: true,
            blur_enabled: true,
            wireframe_enabled: false,
            debug_shadow_view: false,
            frustum_culling_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameToggle {
    Shadows,
    Ssao,
    Blur,
    Wireframe,
    DebugShadowView,
    FrustumCulling,
}

impl FrameToggle {
    pub fn label(self) -> &'static str {
        match self {
            FrameToggle::Shadows => "shadows",
            FrameToggle::Ssao => "ssao",
            FrameToggle::Blur => "ssao blur",
            FrameToggle::Wireframe => "wireframe",
            FrameToggle::DebugShadowView => "debug shadow view",
            FrameToggle::FrustumCulling => "view frustum culling",
        }
    }
}

impl FrameState {
    const fn default_on() -> bool {
        true
    }

    pub fn set_shadows(&mut self, enabled: bool) {
        self.shadows_enabled = enabled;
    }

    pub fn set_ssao(&mut self, enabled: bool) {
        self.ssao_enabled = enabled;
    }

    pub fn set_blur(&mut self, enabled: bool) {
        self.blur_enabled = enabled;
    }

    pub fn set_wireframe(&mut self, enabled: bool) {
        self.wireframe_enabled = enabled;
    }

    pub fn set_debug_shadow_view(&mut self, enabled: bool) {
        self.debug_shadow_view = enabled;
    }

    pub fn set_frustum_culling(&mut self, enabled: bool) {
        self.frustum_culling_enabled = enabled;
    }

    pub fn get(&self, toggle: FrameToggle) -> bool {
        match toggle {
            FrameToggle::Shadows => self.shadows_enabled,
            FrameToggle::Ssao => self.ssao_enabled,
            FrameToggle::Blur => self.blur_enabled,
            FrameToggle::Wireframe => self.wireframe_enabled,
            FrameToggle::DebugShadowView => self.debug_shadow_view,
            FrameToggle::FrustumCulling => self.frustum_culling_enabled,
        }
    }

    /// Flips one switch and returns its new value.
    pub fn toggle(&mut self, toggle: FrameToggle) -> bool {
        let enabled = !self.get(toggle);
        match toggle {
            FrameToggle::Shadows => self.set_shadows(enabled),
            FrameToggle::Ssao => self.set_ssao(enabled),
            FrameToggle::Blur => self.set_blur(enabled),
            FrameToggle::Wireframe => self.set_wireframe(enabled),
            FrameToggle::DebugShadowView => self.set_debug_shadow_view(enabled),
            FrameToggle::FrustumCulling => self.set_frustum_culling(enabled),
        }
        log::info!(target: "renderer", "{} {}", toggle.label(), if enabled { "enabled" } else { "disabled" });
        enabled
    }
}

bitflags! {
    /// Optional effects whose GPU resources exist. An effect is removed for the rest of the
    /// session when one of its render targets cannot be created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Effects: u8 {
        const SHADOWS = 0b01;
        const SSAO = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Shadow,
    GeometryPrepass,
    Ssao,
    Blur,
    Composite,
    DebugShadowView,
}

/// What the composite pass binds for shadowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowSource {
    Map,
    FullyLit,
}

/// What the composite pass binds for ambient occlusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcclusionSource {
    Raw,
    Blurred,
    /// A constant factor of 1.0, used whenever SSAO did not run this frame.
    Constant,
}

impl OcclusionSource {
    pub const CONSTANT_FACTOR: f32 = 1.0;
}

/// Ordered list of passes for one frame. Every entry depends on the ones before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    pub passes: SmallVec<[PassKind; 6]>,
    pub shadow: ShadowSource,
    pub occlusion: OcclusionSource,
}

impl FramePlan {
    pub fn build(state: &FrameState, available: Effects) -> Self {
        let mut passes = SmallVec::new();

        let shadows = state.shadows_enabled && available.contains(Effects::SHADOWS);
        if shadows {
            passes.push(PassKind::Shadow);
        }

        let ssao = state.ssao_enabled && available.contains(Effects::SSAO);
        let occlusion = if ssao {
            passes.push(PassKind::GeometryPrepass);
            passes.push(PassKind::Ssao);
            if state.blur_enabled {
                passes.push(PassKind::Blur);
                OcclusionSource::Blurred
            } else {
                OcclusionSource::Raw
            }
        } else {
            OcclusionSource::Constant
        };

        passes.push(PassKind::Composite);

        if state.debug_shadow_view && shadows {
            passes.push(PassKind::DebugShadowView);
        }

        Self { passes, shadow: if shadows { ShadowSource::Map } else { ShadowSource::FullyLit }, occlusion }
    }

    pub fn runs(&self, kind: PassKind) -> bool {
        self.passes.contains(&kind)
    }
}

/// Summary of what one `render_frame` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub plan: FramePlan,
    pub objects_submitted: usize,
    pub objects_culled: usize,
    pub surfaces_drawn: usize,
    /// False when the frame was skipped because the window has no area.
    pub presented: bool,
    /// Device errors captured while recording and submitting; they are logged, not raised.
    pub gpu_errors: usize,
}

impl FrameReport {
    pub fn skipped(plan: FramePlan) -> Self {
        Self { plan, objects_submitted: 0, objects_culled: 0, surfaces_drawn: 0, presented: false, gpu_errors: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_plan_runs_every_pass_in_dependency_order() {
        let state = FrameState { debug_shadow_view: true, ..FrameState::default() };
        let plan = FramePlan::build(&state, Effects::all());
        assert_eq!(
            plan.passes.as_slice(),
            &[
                PassKind::Shadow,
                PassKind::GeometryPrepass,
                PassKind::Ssao,
                PassKind::Blur,
                PassKind::Composite,
                PassKind::DebugShadowView
            ]
        );
        assert_eq!(plan.shadow, ShadowSource::Map);
        assert_eq!(plan.occlusion, OcclusionSource::Blurred);
    }

    #[test]
    fn disabled_ssao_skips_prepass_and_uses_constant_occlusion() {
        let state = FrameState { ssao_enabled: false, ..FrameState::default() };
        let plan = FramePlan::build(&state, Effects::all());
        assert!(!plan.runs(PassKind::GeometryPrepass));
        assert!(!plan.runs(PassKind::Ssao));
        assert!(!plan.runs(PassKind::Blur));
        assert!(plan.runs(PassKind::Composite));
        assert_eq!(plan.occlusion, OcclusionSource::Constant);
    }

    #[test]
    fn unblurred_ssao_binds_raw_occlusion() {
        let state = FrameState { blur_enabled: false, ..FrameState::default() };
        let plan = FramePlan::build(&state, Effects::all());
        assert!(plan.runs(PassKind::Ssao));
        assert!(!plan.runs(PassKind::Blur));
        assert_eq!(plan.occlusion, OcclusionSource::Raw);
    }

    #[test]
    fn unavailable_effects_are_skipped_even_when_requested() {
        let plan = FramePlan::build(&FrameState { debug_shadow_view: true, ..FrameState::default() }, Effects::empty());
        assert_eq!(plan.passes.as_slice(), &[PassKind::Composite]);
        assert_eq!(plan.shadow, ShadowSource::FullyLit);
        assert_eq!(plan.occlusion, OcclusionSource::Constant);
    }

    #[test]
    fn toggle_flips_and_reports_new_value() {
        let mut state = FrameState::default();
        assert!(state.toggle(FrameToggle::Wireframe));
        assert!(state.wireframe_enabled);
        assert!(!state.toggle(FrameToggle::Wireframe));
        assert!(!state.toggle(FrameToggle::Shadows));
        assert!(!state.shadows_enabled);
    }
}
