//! Window-capable backend: created from a window, implements RenderBackendWindow.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use render_api::{MeshHandle, MeshUpload, RenderBackend, RenderBackendWindow, Scene};
use wgpu::SurfaceTargetUnsafe;

use crate::plugin::LucentPlugin;
use lucent_renderer::LucentConfig;

/// Backend that owns the wgpu Instance and a [`LucentPlugin`]; can present to a window.
///
/// The surface is recreated each frame from the raw handles the host passes to
/// `render_frame_to_window`. Frames are rendered offscreen in the surface format and copied
/// into the swapchain texture.
pub struct LucentWindowBackend {
    instance: wgpu::Instance,
    plugin: LucentPlugin,
}

impl LucentWindowBackend {
    /// Create a window-capable backend. The window is only used to get raw handles and an
    /// initial surface for adapter selection; the host must keep it alive.
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        config: LucentConfig,
    ) -> Result<Box<dyn RenderBackendWindow>, String> {
        let (raw_window, raw_display) = {
            let wh = window.window_handle().map_err(|e| e.to_string())?;
            let dh = window.display_handle().map_err(|e| e.to_string())?;
            (wh.as_raw(), dh.as_raw())
        };
        let backend = pollster::block_on(Self::from_raw_handles_async(raw_window, raw_display, config))?;
        Ok(Box::new(backend))
    }

    async fn from_raw_handles_async(
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
        config: LucentConfig,
    ) -> Result<Self, String> {
        let instance = wgpu::Instance::default();
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No adapter")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| e.to_string())?;
        let caps = surface.get_capabilities(&adapter);
        if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            return Err("Surface does not support copy destination usage".to_string());
        }
        let format = caps.formats.first().copied().unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        log::info!("Lucent window backend: {:?}, surface format {:?}", adapter.get_info().backend, format);
        let plugin = LucentPlugin::new_with_config(device, queue, config, format)?;
        drop(surface);
        Ok(Self { instance, plugin })
    }

    fn surface_config(format: wgpu::TextureFormat, width: u32, height: u32) -> wgpu::SurfaceConfiguration {
        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        }
    }
}

impl RenderBackend for LucentWindowBackend {
    fn upload_mesh(&mut self, mesh: &MeshUpload) -> Result<MeshHandle, String> {
        self.plugin.upload_mesh(mesh)
    }

    fn render_frame(&mut self, scene: &mut Scene, viewport_size: (u32, u32)) -> Result<(), String> {
        self.plugin.render_frame(scene, viewport_size)
    }
}

impl RenderBackendWindow for LucentWindowBackend {
    fn render_frame_to_window(
        &mut self,
        scene: &mut Scene,
        viewport_size: (u32, u32),
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String> {
        let target = SurfaceTargetUnsafe::RawHandle { raw_window_handle, raw_display_handle };
        let surface = unsafe { self.instance.create_surface_unsafe(target).map_err(|e| e.to_string())? };
        let (width, height) = viewport_size;
        let config = Self::surface_config(self.plugin.frame_format(), width.max(1), height.max(1));
        surface.configure(self.plugin.device(), &config);

        let frame = match surface.get_current_texture() {
            Ok(f) => f,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                surface.configure(self.plugin.device(), &config);
                surface.get_current_texture().map_err(|e| e.to_string())?
            }
            Err(wgpu::SurfaceError::Timeout) => return Err("Surface get_current_texture timeout".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        self.plugin.render_frame_to_texture(scene, (config.width, config.height), &frame.texture)?;
        frame.present();
        Ok(())
    }
}
