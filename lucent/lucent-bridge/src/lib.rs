//! Lucent bridge: implements `GraphicsDevice` on wgpu and `render_api::RenderBackend` on top of
//! lucent-renderer.

mod pipelines;
mod plugin;
mod wgpu_device;
mod window_backend;

pub use plugin::{LucentPlugin, DEFAULT_FRAME_FORMAT};
pub use wgpu_device::{WgpuDevice, FRAME_DEPTH_FORMAT};
pub use window_backend::LucentWindowBackend;
