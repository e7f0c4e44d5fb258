//! Lucent plugin: implements RenderBackend for the host.

use lucent_renderer::{FrameObserver, GraphicsDevice, LucentConfig, Renderer};
use render_api::{MeshHandle, MeshUpload, RenderBackend, Scene};

use crate::wgpu_device::WgpuDevice;

/// Back buffer format used when rendering offscreen.
pub const DEFAULT_FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Lucent plugin: owns the wgpu device/queue (through [`WgpuDevice`]) and the renderer.
pub struct LucentPlugin {
    renderer: Renderer<WgpuDevice>,
    frame_format: wgpu::TextureFormat,
}

impl LucentPlugin {
    /// Create with wgpu device and queue (default config).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, LucentConfig::default(), DEFAULT_FRAME_FORMAT)
    }

    pub fn new_with_config(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: LucentConfig,
        frame_format: wgpu::TextureFormat,
    ) -> Result<Self, String> {
        let renderer = Renderer::new(WgpuDevice::new(device, queue), config).map_err(|e| e.to_string())?;
        Ok(Self { renderer, frame_format })
    }

    pub fn device(&self) -> &wgpu::Device {
        self.renderer.device().device()
    }

    pub fn queue(&self) -> &wgpu::Queue {
        self.renderer.device().queue()
    }

    pub fn renderer(&self) -> &Renderer<WgpuDevice> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<WgpuDevice> {
        &mut self.renderer
    }

    pub fn frame_format(&self) -> wgpu::TextureFormat {
        self.frame_format
    }

    /// Render one frame with camera callbacks delivered to `observer`.
    pub fn render_frame_with(
        &mut self,
        scene: &mut Scene,
        viewport_size: (u32, u32),
        observer: &mut dyn FrameObserver,
    ) -> Result<(), String> {
        self.render_frame_impl(scene, viewport_size, observer, None)
    }

    /// Render one frame and copy it into `swapchain` before submitting.
    pub fn render_frame_to_texture(
        &mut self,
        scene: &mut Scene,
        viewport_size: (u32, u32),
        swapchain: &wgpu::Texture,
    ) -> Result<(), String> {
        self.render_frame_impl(scene, viewport_size, &mut (), Some(swapchain))
    }

    fn render_frame_impl(
        &mut self,
        scene: &mut Scene,
        viewport_size: (u32, u32),
        observer: &mut dyn FrameObserver,
        swapchain: Option<&wgpu::Texture>,
    ) -> Result<(), String> {
        let (width, height) = viewport_size;
        self.renderer.device_mut().resize_frame(width, height, self.frame_format);
        let mut result = self.renderer.render(scene, observer);
        if let (true, Some(texture)) = (result.is_ok(), swapchain) {
            result = self.renderer.device_mut().copy_frame_to(texture);
        }
        self.renderer.device_mut().submit();
        result.map_err(|e| e.to_string())
    }
}

impl RenderBackend for LucentPlugin {
    fn upload_mesh(&mut self, mesh: &MeshUpload) -> Result<MeshHandle, String> {
        self.renderer
            .device_mut()
            .create_mesh(&mesh.vertex_data, &mesh.index_data)
            .map_err(|e| e.to_string())
    }

    fn render_frame(&mut self, scene: &mut Scene, viewport_size: (u32, u32)) -> Result<(), String> {
        self.render_frame_impl(scene, viewport_size, &mut (), None)
    }
}

impl Drop for LucentPlugin {
    fn drop(&mut self) {
        self.renderer.destroy();
    }
}
