//! Shader modules, bind group layouts and the render pipeline cache of the wgpu device.

use std::collections::HashMap;
use std::num::NonZeroU64;

use lucent_renderer::device::{ProgramDescriptor, ProgramHandle, ShaderPass, TextureFormat, UniformSlot};
use lucent_renderer::forward::{ForwardLightUniforms, MaterialUniforms, MeshUniforms, ViewUniforms};
use lucent_renderer::lighting::ClusterUniforms;
use lucent_renderer::shadows::ShadowPassUniforms;
use render_api::{BlendMode, CompareFunc, CullMode, DepthState};

const FORWARD_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/forward.wgsl"));
const SHADOW_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shadow.wgsl"));
const BLIT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/blit.wgsl"));

/// Uniform bindings of group 0: one per [`UniformSlot`] plus the internal clear block.
pub const UNIFORM_BINDINGS: usize = 7;
pub const CLEAR_BINDING: usize = 6;

/// Bytes of the clear block: color + depth.
const CLEAR_SIZE: u64 = 32;

pub fn uniform_binding(slot: UniformSlot) -> usize {
    match slot {
        UniformSlot::View => 0,
        UniformSlot::Mesh => 1,
        UniformSlot::Material => 2,
        UniformSlot::Cluster => 3,
        UniformSlot::ForwardLights => 4,
        UniformSlot::ShadowPass => 5,
    }
}

/// Bound size of each group 0 binding.
pub fn binding_sizes() -> [u64; UNIFORM_BINDINGS] {
    [
        std::mem::size_of::<ViewUniforms>() as u64,
        std::mem::size_of::<MeshUniforms>() as u64,
        std::mem::size_of::<MaterialUniforms>() as u64,
        std::mem::size_of::<ClusterUniforms>() as u64,
        std::mem::size_of::<ForwardLightUniforms>() as u64,
        std::mem::size_of::<ShadowPassUniforms>() as u64,
        CLEAR_SIZE,
    ]
}

pub fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn compare(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn blend(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Opaque => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState { color: add, alpha: add })
        }
    }
}

fn cull_face(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
    }
}

/// Which WGSL module and entry points a program uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    Forward,
    Shadow,
    Blit,
}

impl ShaderSource {
    fn code(self) -> &'static str {
        match self {
            ShaderSource::Forward => FORWARD_SHADER,
            ShaderSource::Shadow => SHADOW_SHADER,
            ShaderSource::Blit => BLIT_SHADER,
        }
    }
}

/// A resolved program request.
#[derive(Debug, Clone)]
pub struct GpuProgram {
    pub desc: ProgramDescriptor,
    pub source: Option<ShaderSource>,
    pub vertex_entry: &'static str,
    pub fragment_entry: &'static str,
    /// Array layer sampled by cube-face blits.
    pub source_layer: u32,
    pub linked: bool,
    pub failed: bool,
}

impl GpuProgram {
    /// Map a request onto the shaders this backend ships. Unknown material shaders fail to link.
    pub fn resolve(desc: &ProgramDescriptor) -> Self {
        let cube = desc.defines.iter().any(|d| d == "CUBEMAP");
        let (source, vertex_entry, fragment_entry) = match desc.pass {
            ShaderPass::Forward if desc.shader == "standard" => (Some(ShaderSource::Forward), "vs_main", "fs_main"),
            ShaderPass::Forward => (None, "", ""),
            ShaderPass::Shadow => (Some(ShaderSource::Shadow), "vs_main", "fs_moments"),
            ShaderPass::Blit => (Some(ShaderSource::Blit), "vs_fullscreen", "fs_blit"),
            ShaderPass::VsmBlur if desc.defines.iter().any(|d| d == "BLUR_HORIZONTAL") => {
                (Some(ShaderSource::Blit), "vs_fullscreen", "fs_blur_h")
            }
            ShaderPass::VsmBlur => (Some(ShaderSource::Blit), "vs_fullscreen", "fs_blur_v"),
        };
        let source_layer = if cube {
            desc.variant.rsplit('_').next().and_then(|face| face.parse().ok()).unwrap_or(0)
        } else {
            0
        };
        Self { desc: desc.clone(), source, vertex_entry, fragment_entry, source_layer, linked: false, failed: false }
    }

    fn samples_source(&self) -> bool {
        matches!(self.desc.pass, ShaderPass::Blit | ShaderPass::VsmBlur)
    }

    fn uses_mesh_vertices(&self) -> bool {
        matches!(self.desc.pass, ShaderPass::Forward | ShaderPass::Shadow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Program(ProgramHandle),
    /// Full-viewport quad writing the clear block.
    Clear { color: bool, depth: bool },
}

/// Everything a wgpu render pipeline is specialized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub kind: PipelineKind,
    pub color_format: Option<wgpu::TextureFormat>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub blend: BlendMode,
    pub depth: DepthState,
    /// (constant, slope) as raw bits.
    pub depth_bias: Option<(u32, u32)>,
    pub cull: CullMode,
}

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

pub struct Pipelines {
    modules: HashMap<ShaderSource, wgpu::ShaderModule>,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub source_layout: wgpu::BindGroupLayout,
    geometry_layout: wgpu::PipelineLayout,
    blit_layout: wgpu::PipelineLayout,
    cache: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
}

impl Pipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let sizes = binding_sizes();
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..UNIFORM_BINDINGS)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(sizes[binding]),
                },
                count: None,
            })
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent_uniforms_layout"),
            entries: &entries,
        });
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent_blit_source_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let geometry_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lucent_geometry_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });
        let blit_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lucent_blit_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout, &source_layout],
            push_constant_ranges: &[],
        });
        Self {
            modules: HashMap::new(),
            uniform_layout,
            source_layout,
            geometry_layout,
            blit_layout,
            cache: HashMap::new(),
        }
    }

    /// Compile the module of `program`. Validation errors mark the program failed.
    pub fn link(&mut self, device: &wgpu::Device, program: &mut GpuProgram) {
        program.linked = true;
        let Some(source) = program.source else {
            log::error!("No shader '{}' for pass {:?}", program.desc.shader, program.desc.pass);
            program.failed = true;
            return;
        };
        if self.modules.contains_key(&source) {
            return;
        }
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.desc.pass.name()),
            source: wgpu::ShaderSource::Wgsl(source.code().into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            log::error!("Shader module {:?} failed to compile: {}", source, err);
            program.failed = true;
            return;
        }
        self.modules.insert(source, module);
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.cache.get(key).and_then(Option::as_ref)
    }

    /// Build the pipeline for `key` if it is not cached yet. Returns false if it cannot be used.
    pub fn ensure(&mut self, device: &wgpu::Device, key: &PipelineKey, programs: &HashMap<ProgramHandle, GpuProgram>) -> bool {
        if let Some(cached) = self.cache.get(key) {
            return cached.is_some();
        }
        let pipeline = self.create(device, key, programs);
        let ok = pipeline.is_some();
        self.cache.insert(*key, pipeline);
        ok
    }

    fn create(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
        programs: &HashMap<ProgramHandle, GpuProgram>,
    ) -> Option<wgpu::RenderPipeline> {
        let (source, vertex_entry, mut fragment_entry, layout, mesh_vertices, label) = match key.kind {
            PipelineKind::Program(handle) => {
                let program = programs.get(&handle)?;
                let layout = if program.samples_source() { &self.blit_layout } else { &self.geometry_layout };
                (
                    program.source?,
                    program.vertex_entry,
                    program.fragment_entry,
                    layout,
                    program.uses_mesh_vertices(),
                    program.desc.variant.as_str(),
                )
            }
            PipelineKind::Clear { .. } => (ShaderSource::Blit, "vs_clear", "fs_clear", &self.geometry_layout, false, "clear"),
        };
        let module = self.modules.get(&source)?;
        if source == ShaderSource::Shadow && key.color_format.is_none() {
            fragment_entry = "fs_depth";
        }

        let write_color = !matches!(key.kind, PipelineKind::Clear { color: false, .. });
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_format
            .map(|format| wgpu::ColorTargetState {
                format,
                blend: blend(key.blend),
                write_mask: if write_color { wgpu::ColorWrites::ALL } else { wgpu::ColorWrites::empty() },
            })
            .into_iter()
            .map(Some)
            .collect();

        let depth_stencil = key.depth_format.map(|format| {
            let (depth_write_enabled, depth_compare) = match key.kind {
                PipelineKind::Clear { depth, .. } => (depth, wgpu::CompareFunction::Always),
                PipelineKind::Program(_) => (
                    key.depth.write,
                    if key.depth.test { compare(key.depth.func) } else { wgpu::CompareFunction::Always },
                ),
            };
            let (constant, slope_scale) = key
                .depth_bias
                .map_or((0, 0.0), |(c, s)| (f32::from_bits(c) as i32, f32::from_bits(s)));
            wgpu::DepthStencilState {
                format,
                depth_write_enabled,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState { constant, slope_scale, clamp: 0.0 },
            }
        });

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: 24,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &MESH_ATTRIBUTES,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if mesh_vertices { &vertex_buffers } else { &[] };
        let fragment = (key.color_format.is_some() || source == ShaderSource::Shadow).then(|| wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            targets: &targets,
            compilation_options: Default::default(),
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some(vertex_entry),
                buffers,
                compilation_options: Default::default(),
            },
            fragment,
            primitive: wgpu::PrimitiveState { cull_mode: cull_face(key.cull), ..wgpu::PrimitiveState::default() },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            log::error!("Pipeline '{}' failed to build: {}", label, err);
            return None;
        }
        Some(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pass: ShaderPass, shader: &str, variant: &str, defines: &[&str]) -> ProgramDescriptor {
        ProgramDescriptor {
            pass,
            shader: shader.to_string(),
            variant: variant.to_string(),
            defines: defines.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn unknown_material_shader_has_no_source() {
        let program = GpuProgram::resolve(&request(ShaderPass::Forward, "toon", "forward_0_0", &[]));
        assert!(program.source.is_none());
        let program = GpuProgram::resolve(&request(ShaderPass::Forward, "standard", "forward_0_0", &[]));
        assert_eq!(program.source, Some(ShaderSource::Forward));
    }

    #[test]
    fn cube_blits_sample_their_face() {
        let program = GpuProgram::resolve(&request(ShaderPass::Blit, "blit", "blit_cube_4", &["CUBEMAP"]));
        assert_eq!(program.source_layer, 4);
        let program = GpuProgram::resolve(&request(ShaderPass::Blit, "blit", "blit_2d", &[]));
        assert_eq!(program.source_layer, 0);
    }

    #[test]
    fn blur_direction_follows_defines() {
        let h = GpuProgram::resolve(&request(ShaderPass::VsmBlur, "vsm_blur", "h", &["BLUR_HORIZONTAL"]));
        let v = GpuProgram::resolve(&request(ShaderPass::VsmBlur, "vsm_blur", "v", &["BLUR_VERTICAL"]));
        assert_eq!((h.fragment_entry, v.fragment_entry), ("fs_blur_h", "fs_blur_v"));
    }

    #[test]
    fn uniform_slots_map_to_distinct_bindings() {
        let slots = [
            UniformSlot::View,
            UniformSlot::Mesh,
            UniformSlot::Material,
            UniformSlot::Cluster,
            UniformSlot::ForwardLights,
            UniformSlot::ShadowPass,
        ];
        let mut bindings: Vec<usize> = slots.iter().map(|s| uniform_binding(*s)).collect();
        bindings.sort_unstable();
        bindings.dedup();
        assert_eq!(bindings.len(), slots.len());
        assert!(bindings.iter().all(|b| *b != CLEAR_BINDING));
    }
}
