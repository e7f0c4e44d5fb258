//! Lucent Renderer: clustered forward lighting with a shared shadow/cookie atlas, cascaded
//! directional shadows and a frame graph that merges compatible passes.
//!
//! The renderer is backend agnostic; everything GPU-side goes through [`GraphicsDevice`].

pub mod config;
pub mod device;
pub mod error;
pub mod forward;
pub mod graph;
pub mod lighting;
pub mod math;
pub mod renderer;
pub mod shadows;

pub use config::{ConfigError, ForwardConfig, LightEncoding, LightingConfig, LucentConfig};
pub use device::headless::HeadlessDevice;
pub use device::{DeviceCaps, GraphicsDevice};
pub use error::{RenderError, Result};
pub use forward::ForwardRenderer;
pub use graph::{FrameGraph, PassHook, PassKind, RenderPass};
pub use lighting::{ClusterUniforms, LightsBuffer, WorldClusters};
pub use renderer::{FrameObserver, FrameStats, Renderer};
pub use shadows::{
    LightTextureAtlas, ShadowMap, ShadowMapCache, ShadowRendererDirectional, ShadowRendererLocal,
};
