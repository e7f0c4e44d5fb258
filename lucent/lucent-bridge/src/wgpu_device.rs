//! [`GraphicsDevice`] on wgpu.
//!
//! wgpu render passes borrow their encoder, while the renderer opens and closes passes through
//! separate calls. Commands are therefore recorded between `begin_pass` and `end_pass` and
//! replayed into a single wgpu render pass when it closes. Uniform writes go to a per-pass arena
//! bound with dynamic offsets.

use std::collections::HashMap;
use std::num::NonZeroU64;

use glam::Vec4;
use lucent_renderer::device::{
    ClearRequest, DeviceCaps, GraphicsDevice, PassDescriptor, PipelineState, ProgramDescriptor, ProgramHandle,
    RenderTargetDescriptor, TextureDescriptor, TextureDimension, TextureSlot, UniformSlot,
};
use lucent_renderer::{RenderError, Result};
use render_api::{CullMode, MeshHandle, RenderTargetHandle, StencilState, TextureHandle};
use wgpu::util::DeviceExt;

use crate::pipelines::{
    binding_sizes, uniform_binding, wgpu_format, GpuProgram, PipelineKey, PipelineKind, Pipelines, CLEAR_BINDING,
    UNIFORM_BINDINGS,
};

/// Depth format of the back buffer.
pub const FRAME_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct GpuTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct GpuMesh {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

/// Offscreen back buffer rendered into when a pass targets `None`.
struct FrameTarget {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    size: (u32, u32),
}

#[derive(Clone, Copy)]
enum AttachmentRef {
    Texture { texture: TextureHandle, layer: u32 },
    FrameColor,
    FrameDepth,
}

#[derive(Clone, Copy)]
struct TargetInfo {
    color: Option<AttachmentRef>,
    depth: Option<AttachmentRef>,
    color_format: Option<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    size: (u32, u32),
}

/// Uniform data of one pass; every write appends an aligned copy.
struct UniformArena {
    data: Vec<u8>,
    align: usize,
    sizes: [u64; UNIFORM_BINDINGS],
    offsets: [u32; UNIFORM_BINDINGS],
}

impl UniformArena {
    fn new(align: usize) -> Self {
        Self { data: Vec::new(), align: align.max(1), sizes: binding_sizes(), offsets: [0; UNIFORM_BINDINGS] }
    }

    fn push(&mut self, binding: usize, bytes: &[u8]) {
        let offset = self.data.len().div_ceil(self.align) * self.align;
        let size = self.sizes[binding] as usize;
        self.data.resize(offset + size, 0);
        let n = bytes.len().min(size);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        self.offsets[binding] = offset as u32;
    }

    /// Contents padded so that every binding window is in bounds.
    fn finish(mut self) -> Vec<u8> {
        let max = self.sizes.iter().copied().max().unwrap_or(0) as usize;
        let len = self.data.len() + max;
        self.data.resize(len.div_ceil(self.align) * self.align, 0);
        self.data
    }
}

enum PassOp {
    Viewport(Vec4),
    Scissor(Vec4),
    Clear { key: PipelineKey, offsets: [u32; UNIFORM_BINDINGS] },
    Draw { key: PipelineKey, mesh: MeshHandle, instances: u32, offsets: [u32; UNIFORM_BINDINGS] },
    Blit { key: PipelineKey, source: TextureHandle, layer: u32, offsets: [u32; UNIFORM_BINDINGS] },
    PushMarker(String),
    PopMarker,
}

struct OpenPass {
    desc: PassDescriptor,
    target: TargetInfo,
    arena: UniformArena,
    ops: Vec<PassOp>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    pipelines: Pipelines,
    textures: HashMap<TextureHandle, GpuTexture>,
    targets: HashMap<RenderTargetHandle, RenderTargetDescriptor>,
    meshes: HashMap<MeshHandle, GpuMesh>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    program_keys: HashMap<ProgramDescriptor, ProgramHandle>,
    pending: Vec<ProgramHandle>,
    /// Last data written per uniform binding; seeds every new pass.
    uniforms: [Option<Vec<u8>>; UNIFORM_BINDINGS],
    bound_textures: HashMap<TextureSlot, Option<TextureHandle>>,
    program: Option<ProgramHandle>,
    state: PipelineState,
    cull: CullMode,
    frame: Option<FrameTarget>,
    scene_color: Option<wgpu::Texture>,
    scene_depth: Option<wgpu::Texture>,
    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<OpenPass>,
    warned_stencil: bool,
    next_id: u64,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let limits = device.limits();
        let caps = DeviceCaps {
            float_textures: true,
            depth_texture_sampling: true,
            float_linear_filtering: device.features().contains(wgpu::Features::FLOAT32_FILTERABLE),
            half_float_linear_filtering: true,
            max_texture_size: limits.max_texture_dimension_2d,
        };
        let pipelines = Pipelines::new(&device);
        Self {
            device,
            queue,
            caps,
            pipelines,
            textures: HashMap::new(),
            targets: HashMap::new(),
            meshes: HashMap::new(),
            programs: HashMap::new(),
            program_keys: HashMap::new(),
            pending: Vec::new(),
            uniforms: Default::default(),
            bound_textures: HashMap::new(),
            program: None,
            state: PipelineState::default(),
            cull: CullMode::Back,
            frame: None,
            scene_color: None,
            scene_depth: None,
            encoder: None,
            pass: None,
            warned_stencil: false,
            next_id: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Offscreen back buffer color texture, once [`WgpuDevice::resize_frame`] has run.
    pub fn frame_texture(&self) -> Option<&wgpu::Texture> {
        self.frame.as_ref().map(|f| &f.color)
    }

    /// Scene color copied by the last grab, if any.
    pub fn scene_color_texture(&self) -> Option<&wgpu::Texture> {
        self.scene_color.as_ref()
    }

    pub fn scene_depth_texture(&self) -> Option<&wgpu::Texture> {
        self.scene_depth.as_ref()
    }

    pub fn bound_texture(&self, slot: TextureSlot) -> Option<TextureHandle> {
        self.bound_textures.get(&slot).copied().flatten()
    }

    /// (Re)create the back buffer if its size or format changed.
    pub fn resize_frame(&mut self, width: u32, height: u32, format: wgpu::TextureFormat) {
        let size = (width.max(1), height.max(1));
        if self.frame.as_ref().is_some_and(|f| f.size == size && f.format == format) {
            return;
        }
        let extent = wgpu::Extent3d { width: size.0, height: size.1, depth_or_array_layers: 1 };
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lucent_frame_color"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lucent_frame_depth"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(FrameTarget { color, color_view, depth, depth_view, format, size });
    }

    /// Encoder shared by every pass of the frame.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lucent_frame") })
        })
    }

    /// Copy the back buffer into `destination` (a swapchain texture of the same format and size).
    pub fn copy_frame_to(&mut self, destination: &wgpu::Texture) -> Result<()> {
        let frame = self.frame.as_ref().ok_or_else(|| RenderError::Backend("no back buffer".to_string()))?;
        if frame.format != destination.format() {
            return Err(RenderError::Backend(format!(
                "back buffer format {:?} does not match {:?}",
                frame.format,
                destination.format()
            )));
        }
        let size = destination.size();
        let extent = wgpu::Extent3d {
            width: size.width.min(frame.size.0),
            height: size.height.min(frame.size.1),
            depth_or_array_layers: 1,
        };
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lucent_frame") })
        });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &frame.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: destination,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        Ok(())
    }

    /// Submit everything recorded since the last submit.
    pub fn submit(&mut self) {
        if self.pass.is_some() {
            log::warn!("Submitting with an open pass; closing it");
            self.end_pass();
        }
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn next_handle(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn target_info(&self, target: Option<RenderTargetHandle>) -> Result<TargetInfo> {
        let Some(handle) = target else {
            let frame = self.frame.as_ref().ok_or_else(|| RenderError::Backend("no back buffer".to_string()))?;
            return Ok(TargetInfo {
                color: Some(AttachmentRef::FrameColor),
                depth: Some(AttachmentRef::FrameDepth),
                color_format: Some(frame.format),
                depth_format: Some(FRAME_DEPTH_FORMAT),
                size: frame.size,
            });
        };
        let desc = self
            .targets
            .get(&handle)
            .ok_or_else(|| RenderError::MissingResource(format!("render target {}", handle.0)))?;
        let mut info = TargetInfo { color: None, depth: None, color_format: None, depth_format: None, size: (1, 1) };
        for (attachment, is_depth) in [(desc.color, false), (desc.depth, true)] {
            let Some(attachment) = attachment else { continue };
            let texture = self
                .textures
                .get(&attachment.texture)
                .ok_or_else(|| RenderError::MissingResource(format!("texture {}", attachment.texture.0)))?;
            let r = AttachmentRef::Texture { texture: attachment.texture, layer: attachment.face };
            let format = Some(wgpu_format(texture.desc.format));
            if is_depth {
                info.depth = Some(r);
                info.depth_format = format;
            } else {
                info.color = Some(r);
                info.color_format = format;
            }
            info.size = (texture.desc.width, texture.desc.height);
        }
        Ok(info)
    }

    fn attachment_view(&self, attachment: AttachmentRef) -> Option<wgpu::TextureView> {
        let AttachmentRef::Texture { texture, layer } = attachment else { return None };
        self.layer_view(texture, layer)
    }

    /// 2D view of one array layer (cube face) of a texture.
    fn layer_view(&self, texture: TextureHandle, layer: u32) -> Option<wgpu::TextureView> {
        let gpu = self.textures.get(&texture)?;
        Some(gpu.texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        }))
    }

    fn pipeline_key(&self, kind: PipelineKind, target: &TargetInfo) -> PipelineKey {
        PipelineKey {
            kind,
            color_format: target.color_format,
            depth_format: target.depth_format,
            blend: self.state.blend,
            depth: self.state.depth,
            depth_bias: self.state.depth_bias.map(|(c, s)| (c.to_bits(), s.to_bits())),
            cull: self.cull,
        }
    }

    /// Pixel rectangle of a normalized (bottom-left origin) viewport.
    fn pixel_rect(rect: Vec4, size: (u32, u32)) -> (f32, f32, f32, f32) {
        let (w, h) = (size.0 as f32, size.1 as f32);
        let x = (rect.x * w).clamp(0.0, w);
        let y = ((1.0 - rect.y - rect.w) * h).clamp(0.0, h);
        let width = (rect.z * w).min(w - x).max(1.0);
        let height = (rect.w * h).min(h - y).max(1.0);
        (x, y, width, height)
    }

    fn encode_pass(&mut self, pass: OpenPass) -> Result<()> {
        let OpenPass { desc, target, arena, ops } = pass;

        let mut usable = HashMap::new();
        for op in &ops {
            let key = match op {
                PassOp::Clear { key, .. } | PassOp::Draw { key, .. } | PassOp::Blit { key, .. } => *key,
                _ => continue,
            };
            usable.entry(key).or_insert_with(|| self.pipelines.ensure(&self.device, &key, &self.programs));
        }

        let contents = arena.finish();
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent_pass_uniforms"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let sizes = binding_sizes();
        let entries: Vec<wgpu::BindGroupEntry> = (0..UNIFORM_BINDINGS)
            .map(|binding| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniforms,
                    offset: 0,
                    size: NonZeroU64::new(sizes[binding]),
                }),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lucent_pass_uniforms"),
            layout: &self.pipelines.uniform_layout,
            entries: &entries,
        });

        let source_groups: Vec<Option<wgpu::BindGroup>> = ops
            .iter()
            .map(|op| {
                let PassOp::Blit { source, layer, .. } = op else { return None };
                let view = self.layer_view(*source, *layer)?;
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("lucent_blit_source"),
                    layout: &self.pipelines.source_layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) }],
                }))
            })
            .collect();

        let color_view = target.color.and_then(|a| self.attachment_view(a));
        let depth_view = target.depth.and_then(|a| self.attachment_view(a));
        let frame = self.frame.as_ref();
        let color_view = match target.color {
            Some(AttachmentRef::FrameColor) => frame.map(|f| &f.color_view),
            Some(_) => color_view.as_ref(),
            None => None,
        };
        let depth_view = match target.depth {
            Some(AttachmentRef::FrameDepth) => frame.map(|f| &f.depth_view),
            Some(_) => depth_view.as_ref(),
            None => None,
        };

        let c = desc.color.clear_value;
        let color_attachment = color_view.map(|view| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: if desc.color.clear {
                    wgpu::LoadOp::Clear(wgpu::Color { r: c.x as f64, g: c.y as f64, b: c.z as f64, a: c.w as f64 })
                } else {
                    wgpu::LoadOp::Load
                },
                store: if desc.color.store { wgpu::StoreOp::Store } else { wgpu::StoreOp::Discard },
            },
        });
        let ds = desc.depth_stencil;
        let depth_attachment = depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if ds.clear_depth { wgpu::LoadOp::Clear(ds.clear_depth_value) } else { wgpu::LoadOp::Load },
                store: if ds.store_depth { wgpu::StoreOp::Store } else { wgpu::StoreOp::Discard },
            }),
            stencil_ops: None,
        });

        let colors: Vec<_> = color_attachment.into_iter().map(Some).collect();
        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lucent_frame") })
        });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(desc.label.as_str()),
                color_attachments: &colors,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for (op, source_group) in ops.iter().zip(&source_groups) {
                match op {
                    PassOp::Viewport(rect) => {
                        let (x, y, w, h) = Self::pixel_rect(*rect, target.size);
                        rp.set_viewport(x, y, w, h, 0.0, 1.0);
                    }
                    PassOp::Scissor(rect) => {
                        let (x, y, w, h) = Self::pixel_rect(*rect, target.size);
                        rp.set_scissor_rect(x as u32, y as u32, w as u32, h as u32);
                    }
                    PassOp::Clear { key, offsets } => {
                        let Some(pipeline) = self.pipelines.get(key) else { continue };
                        rp.set_pipeline(pipeline);
                        rp.set_bind_group(0, &uniform_group, offsets);
                        rp.draw(0..3, 0..1);
                    }
                    PassOp::Draw { key, mesh, instances, offsets } => {
                        let (Some(pipeline), Some(mesh)) = (self.pipelines.get(key), self.meshes.get(mesh)) else {
                            continue;
                        };
                        rp.set_pipeline(pipeline);
                        rp.set_bind_group(0, &uniform_group, offsets);
                        rp.set_vertex_buffer(0, mesh.vertex.slice(..));
                        rp.set_index_buffer(mesh.index.slice(..), wgpu::IndexFormat::Uint32);
                        rp.draw_indexed(0..mesh.index_count, 0, 0..(*instances).max(1));
                    }
                    PassOp::Blit { key, offsets, .. } => {
                        let (Some(pipeline), Some(group)) = (self.pipelines.get(key), source_group) else { continue };
                        rp.set_pipeline(pipeline);
                        rp.set_bind_group(0, &uniform_group, offsets);
                        rp.set_bind_group(1, group, &[]);
                        rp.draw(0..3, 0..1);
                    }
                    PassOp::PushMarker(label) => rp.push_debug_group(label),
                    PassOp::PopMarker => rp.pop_debug_group(),
                }
            }
        }
        self.encoder = Some(encoder);

        let skipped = usable.values().filter(|ok| !**ok).count();
        if skipped > 0 {
            log::warn!("Pass '{}': {} pipeline(s) unavailable, their draws were skipped", desc.label, skipped);
        }
        Ok(())
    }

    fn record(&mut self, op: PassOp) {
        match self.pass.as_mut() {
            Some(pass) => pass.ops.push(op),
            None => log::warn!("Device command outside a render pass ignored"),
        }
    }
}

/// Copy `source` into a scene map, recreating the map when its size or format changed.
fn copy_to_scene_texture(
    device: &wgpu::Device,
    encoder: &mut Option<wgpu::CommandEncoder>,
    slot: &mut Option<wgpu::Texture>,
    source: &wgpu::Texture,
    label: &str,
) {
    let size = source.size();
    let format = source.format();
    if slot.as_ref().map_or(true, |t| t.size() != size || t.format() != format) {
        *slot = Some(device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        }));
    }
    let Some(destination) = slot.as_ref() else { return };
    let encoder = encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lucent_frame") })
    });
    encoder.copy_texture_to_texture(
        wgpu::ImageCopyTexture {
            texture: source,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyTexture {
            texture: destination,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::Extent3d { depth_or_array_layers: 1, ..size },
    );
}

impl GraphicsDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.width.max(desc.height) > self.caps.max_texture_size {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' of {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.render_attachment {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        }
        let layers = match desc.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        };
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label.as_str()),
            size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: layers },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ResourceCreationFailed(format!("texture '{}': {}", desc.label, err)));
        }
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, GpuTexture { texture, desc: desc.clone() });
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<()> {
        let gpu = self
            .textures
            .get(&texture)
            .ok_or_else(|| RenderError::MissingResource(format!("texture {}", texture.0)))?;
        let expected = gpu.desc.byte_size();
        if data.len() != expected {
            return Err(RenderError::Upload(format!(
                "texture '{}' expects {} bytes, got {}",
                gpu.desc.label,
                expected,
                data.len()
            )));
        }
        let bytes_per_row = gpu.desc.width * gpu.desc.format.bytes_per_texel() as u32;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(bytes_per_row), rows_per_image: Some(gpu.desc.height) },
            gpu.texture.size(),
        );
        Ok(())
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> Result<RenderTargetHandle> {
        for attachment in desc.color.iter().chain(desc.depth.iter()) {
            let texture = self
                .textures
                .get(&attachment.texture)
                .ok_or_else(|| RenderError::MissingResource(format!("texture {}", attachment.texture.0)))?;
            if !texture.desc.render_attachment {
                return Err(RenderError::ResourceCreationFailed(format!(
                    "render target '{}': texture '{}' is not renderable",
                    desc.label, texture.desc.label
                )));
            }
        }
        let handle = RenderTargetHandle(self.next_handle());
        self.targets.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target);
    }

    fn create_mesh(&mut self, vertex_data: &[u8], index_data: &[u8]) -> Result<MeshHandle> {
        if vertex_data.is_empty() || index_data.is_empty() || index_data.len() % 4 != 0 {
            return Err(RenderError::Upload(format!(
                "mesh with {} vertex bytes and {} index bytes",
                vertex_data.len(),
                index_data.len()
            )));
        }
        let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent_mesh_vertex"),
            contents: vertex_data,
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent_mesh_index"),
            contents: index_data,
            usage: wgpu::BufferUsages::INDEX,
        });
        let handle = MeshHandle(self.next_handle());
        self.meshes.insert(handle, GpuMesh { vertex, index, index_count: (index_data.len() / 4) as u32 });
        Ok(handle)
    }

    fn request_program(&mut self, desc: &ProgramDescriptor) -> ProgramHandle {
        if let Some(handle) = self.program_keys.get(desc) {
            return *handle;
        }
        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(handle, GpuProgram::resolve(desc));
        self.program_keys.insert(desc.clone(), handle);
        self.pending.push(handle);
        handle
    }

    fn end_shader_batch(&mut self) {
        for handle in std::mem::take(&mut self.pending) {
            if let Some(program) = self.programs.get_mut(&handle) {
                self.pipelines.link(&self.device, program);
            }
        }
    }

    fn program_failed(&self, program: ProgramHandle) -> bool {
        self.programs.get(&program).map_or(true, |p| p.failed)
    }

    fn write_uniforms(&mut self, slot: UniformSlot, data: &[u8]) {
        let binding = uniform_binding(slot);
        if let Some(pass) = self.pass.as_mut() {
            pass.arena.push(binding, data);
        }
        self.uniforms[binding] = Some(data.to_vec());
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<TextureHandle>) {
        self.bound_textures.insert(slot, texture);
    }

    fn begin_pass(&mut self, desc: &PassDescriptor) -> Result<()> {
        if self.pass.is_some() {
            return Err(RenderError::Backend(format!("pass '{}' begun inside another pass", desc.label)));
        }
        let target = self.target_info(desc.target)?;
        let align = self.device.limits().min_uniform_buffer_offset_alignment as usize;
        let mut arena = UniformArena::new(align);
        for (binding, data) in self.uniforms.iter().enumerate() {
            arena.push(binding, data.as_deref().unwrap_or(&[]));
        }
        self.pass = Some(OpenPass { desc: desc.clone(), target, arena, ops: Vec::new() });
        Ok(())
    }

    fn end_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            log::warn!("end_pass without an open pass");
            return;
        };
        if let Err(err) = self.encode_pass(pass) {
            log::error!("Failed to encode render pass: {}", err);
        }
    }

    fn set_viewport(&mut self, rect: Vec4) {
        self.record(PassOp::Viewport(rect));
    }

    fn set_scissor(&mut self, rect: Vec4) {
        self.record(PassOp::Scissor(rect));
    }

    fn clear(&mut self, request: &ClearRequest) {
        let Some(pass) = self.pass.as_mut() else { return };
        let color = request.color.is_some() && pass.target.color_format.is_some();
        let depth = request.depth.is_some() && pass.target.depth_format.is_some();
        if !color && !depth {
            return;
        }
        let block: [f32; 8] = {
            let c = request.color.unwrap_or(Vec4::ZERO);
            [c.x, c.y, c.z, c.w, request.depth.unwrap_or(1.0), 0.0, 0.0, 0.0]
        };
        pass.arena.push(CLEAR_BINDING, bytemuck::cast_slice(&block));
        let offsets = pass.arena.offsets;
        let target = pass.target;
        let key = PipelineKey {
            blend: render_api::BlendMode::Opaque,
            cull: CullMode::None,
            depth_bias: None,
            ..self.pipeline_key(PipelineKind::Clear { color, depth }, &target)
        };
        self.record(PassOp::Clear { key, offsets });
    }

    fn set_program(&mut self, program: ProgramHandle) -> bool {
        if self.program_failed(program) {
            return false;
        }
        self.program = Some(program);
        true
    }

    fn set_pipeline_state(&mut self, state: &PipelineState) {
        self.state = *state;
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.cull = mode;
    }

    fn set_stencil_state(&mut self, front: Option<StencilState>, back: Option<StencilState>) {
        if (front.is_some() || back.is_some()) && !self.warned_stencil {
            self.warned_stencil = true;
            log::warn!("Stencil state is not supported by the wgpu back buffer format; ignoring it");
        }
    }

    fn draw(&mut self, mesh: MeshHandle, instances: u32) {
        let (Some(program), Some(pass)) = (self.program, self.pass.as_ref()) else { return };
        let key = self.pipeline_key(PipelineKind::Program(program), &pass.target);
        let offsets = pass.arena.offsets;
        self.record(PassOp::Draw { key, mesh, instances, offsets });
    }

    fn blit(&mut self, source: TextureHandle) {
        let (Some(program), Some(pass)) = (self.program, self.pass.as_ref()) else { return };
        let layer = self.programs.get(&program).map_or(0, |p| p.source_layer);
        let key = PipelineKey {
            cull: CullMode::None,
            ..self.pipeline_key(PipelineKind::Program(program), &pass.target)
        };
        let offsets = pass.arena.offsets;
        self.record(PassOp::Blit { key, source, layer, offsets });
    }

    fn grab_scene(&mut self, target: Option<RenderTargetHandle>, color: bool, depth: bool) {
        let info = match self.target_info(target) {
            Ok(info) => info,
            Err(err) => {
                log::error!("Scene grab failed: {}", err);
                return;
            }
        };
        for (wanted, attachment, is_depth) in [(color, info.color, false), (depth, info.depth, true)] {
            if !wanted {
                continue;
            }
            let source = match attachment {
                Some(AttachmentRef::FrameColor) => self.frame.as_ref().map(|f| &f.color),
                Some(AttachmentRef::FrameDepth) => self.frame.as_ref().map(|f| &f.depth),
                Some(AttachmentRef::Texture { texture, .. }) => self.textures.get(&texture).map(|t| &t.texture),
                None => None,
            };
            let Some(source) = source else { continue };
            let (slot, label) = if is_depth {
                (&mut self.scene_depth, "lucent_scene_depth")
            } else {
                (&mut self.scene_color, "lucent_scene_color")
            };
            copy_to_scene_texture(&self.device, &mut self.encoder, slot, source, label);
        }
    }

    fn push_marker(&mut self, label: &str) {
        if self.pass.is_some() {
            self.record(PassOp::PushMarker(label.to_string()));
        } else {
            self.encoder().push_debug_group(label);
        }
    }

    fn pop_marker(&mut self) {
        if self.pass.is_some() {
            self.record(PassOp::PopMarker);
        } else {
            self.encoder().pop_debug_group();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_aligns_every_write() {
        let mut arena = UniformArena::new(256);
        arena.push(1, &[1u8; 128]);
        arena.push(2, &[2u8; 32]);
        arena.push(1, &[3u8; 128]);
        assert_eq!(arena.offsets[1], 512);
        assert_eq!(arena.offsets[2], 256);
        let data = arena.finish();
        assert_eq!(data.len() % 256, 0);
        assert!(data.len() >= 512 + binding_sizes().iter().copied().max().unwrap_or(0) as usize);
        assert_eq!(data[512], 3);
    }

    #[test]
    fn viewport_origin_is_bottom_left() {
        let (x, y, w, h) = WgpuDevice::pixel_rect(Vec4::new(0.0, 0.0, 0.5, 0.25), (800, 400));
        assert_eq!((x, y, w, h), (0.0, 300.0, 400.0, 100.0));
        let full = WgpuDevice::pixel_rect(Vec4::new(0.0, 0.0, 1.0, 1.0), (800, 400));
        assert_eq!(full, (0.0, 0.0, 800.0, 400.0));
    }
}
