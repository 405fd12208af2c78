pub mod app;
pub mod camera;
pub mod cli;
pub mod config;
pub mod culling;
pub mod demo_scene;
pub mod frame;
pub mod light;
pub mod material;
pub mod mesh;
pub mod renderer;
pub mod scene;
pub mod ssao;
pub mod targets;
pub mod time;

pub use app::{run, run_with_config, App};
pub use camera::{Camera, Projection};
pub use config::RendererConfig;
pub use frame::{FramePlan, FrameReport, FrameState, FrameToggle, PassKind};
pub use light::Light;
pub use renderer::{FrameRenderer, GpuContext};
pub use scene::{BoundingSphere, RenderObject};
