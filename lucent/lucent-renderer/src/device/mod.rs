//! Graphics device abstraction used by the renderer core.
//!
//! The renderer never talks to a graphics API directly: resources, uploads, passes, state and
//! draws all go through [`GraphicsDevice`]. `lucent-bridge` implements it on wgpu; the
//! [`headless::HeadlessDevice`] records commands in memory.

pub mod headless;

use glam::Vec4;
use render_api::{
    BlendMode, CompareFunc, CullMode, DepthState, MeshHandle, RenderTargetHandle, StencilState, TextureHandle,
};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub filter: FilterMode,
    /// Depth comparison on sampling (hardware PCF).
    pub compare: Option<CompareFunc>,
    /// Texture can be rendered into.
    pub render_attachment: bool,
}

impl TextureDescriptor {
    /// A CPU-written data texture sampled with nearest filtering.
    pub fn data(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            dimension: TextureDimension::D2,
            filter: FilterMode::Nearest,
            compare: None,
            render_attachment: false,
        }
    }

    pub fn byte_size(&self) -> usize {
        let faces = match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        };
        self.width as usize * self.height as usize * self.format.bytes_per_texel() * faces
    }
}

/// One attachment of a render target; `face` selects a cube face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureHandle,
    pub face: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: String,
    pub color: Option<Attachment>,
    pub depth: Option<Attachment>,
}

/// Capabilities queried once at renderer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// RGBA32F textures can be sampled (light buffer float tier).
    pub float_textures: bool,
    /// Depth textures can be sampled with comparison.
    pub depth_texture_sampling: bool,
    pub float_linear_filtering: bool,
    pub half_float_linear_filtering: bool,
    pub max_texture_size: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            float_textures: true,
            depth_texture_sampling: true,
            float_linear_filtering: false,
            half_float_linear_filtering: true,
            max_texture_size: 8192,
        }
    }
}

/// Typed uniform blocks, bound by slot rather than looked up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    View,
    Mesh,
    Material,
    Cluster,
    ForwardLights,
    /// Shadow-camera parameters while rendering shadow maps.
    ShadowPass,
}

/// Fixed texture binding points consumed by the shading stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    LightsU8,
    LightsF32,
    Clusters,
    ShadowAtlas,
    CookieAtlas,
    /// Cascaded map of the n-th shadowed directional light.
    DirectionalShadow(u8),
    /// 2D map of the n-th shadowed local (spot) light, non-clustered path.
    LocalShadow(u8),
    /// Cube map of the n-th shadowed omni light, non-clustered path.
    LocalShadowCube(u8),
}

/// Which pipeline family a program belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderPass {
    Forward,
    Shadow,
    /// Full-screen copy used by the cookie pass.
    Blit,
    /// Separable blur of variance shadow maps.
    VsmBlur,
}

impl ShaderPass {
    pub fn name(self) -> &'static str {
        match self {
            ShaderPass::Forward => "forward",
            ShaderPass::Shadow => "shadow",
            ShaderPass::Blit => "blit",
            ShaderPass::VsmBlur => "vsm_blur",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u64);

/// Request for a shader program variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramDescriptor {
    pub pass: ShaderPass,
    /// Shader chunk name (material shader).
    pub shader: String,
    /// Variant key; identical keys resolve to the same program.
    pub variant: String,
    pub defines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorOps {
    pub clear: bool,
    pub clear_value: Vec4,
    pub store: bool,
}

impl Default for ColorOps {
    fn default() -> Self {
        Self { clear: false, clear_value: Vec4::new(0.0, 0.0, 0.0, 1.0), store: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilOps {
    pub clear_depth: bool,
    pub clear_depth_value: f32,
    pub store_depth: bool,
    pub clear_stencil: bool,
    pub clear_stencil_value: u32,
    pub store_stencil: bool,
}

impl Default for DepthStencilOps {
    fn default() -> Self {
        Self {
            clear_depth: false,
            clear_depth_value: 1.0,
            store_depth: false,
            clear_stencil: false,
            clear_stencil_value: 0,
            store_stencil: false,
        }
    }
}

/// Arguments of [`GraphicsDevice::begin_pass`].
#[derive(Debug, Clone, PartialEq)]
pub struct PassDescriptor {
    pub label: String,
    /// `None` is the back buffer.
    pub target: Option<RenderTargetHandle>,
    pub color: ColorOps,
    pub depth_stencil: DepthStencilOps,
}

/// Clear of the current viewport region inside an open pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRequest {
    pub color: Option<Vec4>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

/// Blend, depth and bias state set when the material changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineState {
    pub blend: BlendMode,
    pub depth: DepthState,
    /// (constant, slope) depth bias.
    pub depth_bias: Option<(f32, f32)>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self { blend: BlendMode::Opaque, depth: DepthState::default(), depth_bias: None }
    }
}

/// GPU command and resource interface consumed by the renderer.
///
/// Calls are issued on a single thread in frame order. Viewports and scissors are normalized
/// (x, y, w, h) rectangles relative to the bound target.
pub trait GraphicsDevice {
    fn capabilities(&self) -> DeviceCaps;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// Replace the full contents of a data texture.
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<()>;

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> Result<RenderTargetHandle>;
    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    fn create_mesh(&mut self, vertex_data: &[u8], index_data: &[u8]) -> Result<MeshHandle>;

    /// Queue a program variant for compilation; linking may be deferred to [`end_shader_batch`].
    ///
    /// [`end_shader_batch`]: GraphicsDevice::end_shader_batch
    fn request_program(&mut self, desc: &ProgramDescriptor) -> ProgramHandle;
    /// Finish compiling/linking every program requested since the last batch.
    fn end_shader_batch(&mut self);
    fn program_failed(&self, program: ProgramHandle) -> bool;

    fn write_uniforms(&mut self, slot: UniformSlot, data: &[u8]);
    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<TextureHandle>);

    fn begin_pass(&mut self, desc: &PassDescriptor) -> Result<()>;
    fn end_pass(&mut self);
    fn set_viewport(&mut self, rect: Vec4);
    fn set_scissor(&mut self, rect: Vec4);
    fn clear(&mut self, request: &ClearRequest);

    /// Bind a program; returns false if it cannot be used.
    fn set_program(&mut self, program: ProgramHandle) -> bool;
    fn set_pipeline_state(&mut self, state: &PipelineState);
    fn set_cull_mode(&mut self, mode: CullMode);
    fn set_stencil_state(&mut self, front: Option<StencilState>, back: Option<StencilState>);
    /// Draw a mesh; `instances` of 0 or 1 issues a single non-instanced draw.
    fn draw(&mut self, mesh: MeshHandle, instances: u32);
    /// Copy `source` into the current viewport with the bound program.
    fn blit(&mut self, source: TextureHandle);
    /// Copy the current target's color and/or depth into the scene maps.
    fn grab_scene(&mut self, target: Option<RenderTargetHandle>, color: bool, depth: bool);

    fn push_marker(&mut self, label: &str);
    fn pop_marker(&mut self);
}
