//! Trait for render backends. The host uses this to upload geometry and render frames uniformly.

use crate::handles::MeshHandle;
use crate::scene::Scene;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Geometry handed to the backend once; referenced afterwards by the returned [`MeshHandle`].
#[derive(Clone, Debug)]
pub struct MeshUpload {
    /// Interleaved position + normal, 6 f32 per vertex.
    pub vertex_data: Vec<u8>,
    /// u32 indices.
    pub index_data: Vec<u8>,
}

/// Render backend driven by the host.
pub trait RenderBackend: Send {
    /// Upload geometry; the handle stays valid until the backend is dropped.
    fn upload_mesh(&mut self, mesh: &MeshUpload) -> Result<MeshHandle, String>;

    /// Render one frame. The backend writes per-frame visibility back into the scene's lights.
    /// Submits work internally; the caller does not need to submit command buffers.
    fn render_frame(&mut self, scene: &mut Scene, viewport_size: (u32, u32)) -> Result<(), String>;
}

/// Extension for backends that can present to a window. The host passes raw handles (e.g. from winit);
/// the backend owns the surface and performs get_current_texture + present internally.
pub trait RenderBackendWindow: RenderBackend + Send {
    /// Render one frame and present to the window identified by the given raw handles.
    fn render_frame_to_window(
        &mut self,
        scene: &mut Scene,
        viewport_size: (u32, u32),
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String>;
}
