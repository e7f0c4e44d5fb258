//! In-memory device: keeps texture contents on the CPU and records every command.
//! Used for tests, tools and headless runs without a GPU.

use std::collections::{HashMap, HashSet};

use glam::Vec4;
use render_api::{CullMode, MeshHandle, RenderTargetHandle, StencilState, TextureHandle};

use super::{
    ClearRequest, DeviceCaps, GraphicsDevice, PassDescriptor, PipelineState, ProgramDescriptor, ProgramHandle,
    RenderTargetDescriptor, ShaderPass, TextureDescriptor, TextureSlot, UniformSlot,
};
use crate::error::{RenderError, Result};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    BeginPass(PassDescriptor),
    EndPass,
    Viewport(Vec4),
    Scissor(Vec4),
    Clear(ClearRequest),
    SetProgram(ProgramHandle),
    PipelineState(PipelineState),
    CullMode(CullMode),
    Stencil(Option<StencilState>, Option<StencilState>),
    Uniforms(UniformSlot),
    BindTexture(TextureSlot, Option<TextureHandle>),
    Draw { mesh: MeshHandle, instances: u32 },
    Blit(TextureHandle),
    GrabScene { target: Option<RenderTargetHandle>, color: bool, depth: bool },
    Marker(String),
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

struct HeadlessProgram {
    desc: ProgramDescriptor,
    linked: bool,
    failed: bool,
}

#[derive(Default)]
pub struct HeadlessDevice {
    caps: DeviceCaps,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    targets: HashMap<RenderTargetHandle, RenderTargetDescriptor>,
    meshes: HashSet<MeshHandle>,
    programs: HashMap<ProgramHandle, HeadlessProgram>,
    program_keys: HashMap<(ShaderPass, String, String), ProgramHandle>,
    failing_shaders: HashSet<String>,
    uniforms: HashMap<UniformSlot, Vec<u8>>,
    commands: Vec<DeviceCommand>,
    texture_budget: Option<usize>,
    render_target_budget: Option<usize>,
    next_id: u64,
    pass_open: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self { caps, ..Self::default() }
    }

    /// Programs built from this shader chunk fail to link.
    pub fn fail_shader(&mut self, shader: impl Into<String>) {
        self.failing_shaders.insert(shader.into());
    }

    /// Limit the number of live textures; creation beyond it fails.
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    /// Limit the number of live render targets; creation beyond it fails.
    pub fn set_render_target_budget(&mut self, budget: Option<usize>) {
        self.render_target_budget = budget;
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.data.as_slice())
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    pub fn render_target_desc(&self, target: RenderTargetHandle) -> Option<&RenderTargetDescriptor> {
        self.targets.get(&target)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_render_target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn last_uniforms(&self, slot: UniformSlot) -> Option<&[u8]> {
        self.uniforms.get(&slot).map(|u| u.as_slice())
    }

    pub fn program_desc(&self, program: ProgramHandle) -> Option<&ProgramDescriptor> {
        self.programs.get(&program).map(|p| &p.desc)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Labels of all passes begun so far, in order.
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::BeginPass(p) => Some(p.label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, DeviceCommand::Draw { .. })).count()
    }

    fn next_handle(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::ResourceCreationFailed(format!("{}: zero sized texture", desc.label)));
        }
        if let Some(budget) = self.texture_budget {
            if self.textures.len() >= budget {
                return Err(RenderError::ResourceCreationFailed(format!("{}: texture budget exhausted", desc.label)));
            }
        }
        let handle = TextureHandle(self.next_handle());
        let data = vec![0u8; desc.byte_size()];
        self.textures.insert(handle, HeadlessTexture { desc: desc.clone(), data });
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<()> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::MissingResource(format!("texture {:?}", texture)))?;
        if data.len() != tex.data.len() {
            return Err(RenderError::Upload(format!(
                "{}: expected {} bytes, got {}",
                tex.desc.label,
                tex.data.len(),
                data.len()
            )));
        }
        tex.data.copy_from_slice(data);
        Ok(())
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> Result<RenderTargetHandle> {
        for attachment in desc.color.iter().chain(desc.depth.iter()) {
            if !self.textures.contains_key(&attachment.texture) {
                return Err(RenderError::MissingResource(format!("{}: attachment {:?}", desc.label, attachment)));
            }
        }
        if let Some(budget) = self.render_target_budget {
            if self.targets.len() >= budget {
                return Err(RenderError::ResourceCreationFailed(format!("{}: render target budget exhausted", desc.label)));
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
        if vertex_data.is_empty() || index_data.is_empty() {
            return Err(RenderError::ResourceCreationFailed("empty mesh".to_string()));
        }
        let handle = MeshHandle(self.next_handle());
        self.meshes.insert(handle);
        Ok(handle)
    }

    fn request_program(&mut self, desc: &ProgramDescriptor) -> ProgramHandle {
        let key = (desc.pass, desc.shader.clone(), desc.variant.clone());
        if let Some(&handle) = self.program_keys.get(&key) {
            return handle;
        }
        let handle = ProgramHandle(self.next_handle());
        let failed = self.failing_shaders.contains(&desc.shader);
        self.programs.insert(handle, HeadlessProgram { desc: desc.clone(), linked: false, failed });
        self.program_keys.insert(key, handle);
        handle
    }

    fn end_shader_batch(&mut self) {
        for program in self.programs.values_mut() {
            program.linked = true;
        }
    }

    fn program_failed(&self, program: ProgramHandle) -> bool {
        self.programs.get(&program).map_or(true, |p| p.failed)
    }

    fn write_uniforms(&mut self, slot: UniformSlot, data: &[u8]) {
        self.uniforms.insert(slot, data.to_vec());
        self.commands.push(DeviceCommand::Uniforms(slot));
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<TextureHandle>) {
        self.commands.push(DeviceCommand::BindTexture(slot, texture));
    }

    fn begin_pass(&mut self, desc: &PassDescriptor) -> Result<()> {
        if let Some(target) = desc.target {
            if !self.targets.contains_key(&target) {
                return Err(RenderError::MissingResource(format!("{}: target {:?}", desc.label, target)));
            }
        }
        self.pass_open = true;
        self.commands.push(DeviceCommand::BeginPass(desc.clone()));
        Ok(())
    }

    fn end_pass(&mut self) {
        self.pass_open = false;
        self.commands.push(DeviceCommand::EndPass);
    }

    fn set_viewport(&mut self, rect: Vec4) {
        self.commands.push(DeviceCommand::Viewport(rect));
    }

    fn set_scissor(&mut self, rect: Vec4) {
        self.commands.push(DeviceCommand::Scissor(rect));
    }

    fn clear(&mut self, request: &ClearRequest) {
        self.commands.push(DeviceCommand::Clear(*request));
    }

    fn set_program(&mut self, program: ProgramHandle) -> bool {
        self.commands.push(DeviceCommand::SetProgram(program));
        self.programs.get(&program).map_or(false, |p| p.linked && !p.failed)
    }

    fn set_pipeline_state(&mut self, state: &PipelineState) {
        self.commands.push(DeviceCommand::PipelineState(*state));
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.commands.push(DeviceCommand::CullMode(mode));
    }

    fn set_stencil_state(&mut self, front: Option<StencilState>, back: Option<StencilState>) {
        self.commands.push(DeviceCommand::Stencil(front, back));
    }

    fn draw(&mut self, mesh: MeshHandle, instances: u32) {
        self.commands.push(DeviceCommand::Draw { mesh, instances });
    }

    fn blit(&mut self, source: TextureHandle) {
        self.commands.push(DeviceCommand::Blit(source));
    }

    fn grab_scene(&mut self, target: Option<RenderTargetHandle>, color: bool, depth: bool) {
        self.commands.push(DeviceCommand::GrabScene { target, color, depth });
    }

    fn push_marker(&mut self, label: &str) {
        self.commands.push(DeviceCommand::Marker(label.to_string()));
    }

    fn pop_marker(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TextureFormat;

    #[test]
    fn write_texture_checks_size() {
        let mut device = HeadlessDevice::new();
        let tex = device
            .create_texture(&TextureDescriptor::data("t", 4, 2, TextureFormat::Rgba8Unorm))
            .unwrap();
        assert!(device.write_texture(tex, &[0u8; 32]).is_ok());
        assert!(matches!(device.write_texture(tex, &[0u8; 8]), Err(RenderError::Upload(_))));
    }

    #[test]
    fn budget_makes_creation_fail() {
        let mut device = HeadlessDevice::new();
        device.set_texture_budget(Some(0));
        let err = device.create_texture(&TextureDescriptor::data("t", 1, 1, TextureFormat::R8Unorm));
        assert!(matches!(err, Err(RenderError::ResourceCreationFailed(_))));
    }

    #[test]
    fn identical_variants_share_a_program() {
        let mut device = HeadlessDevice::new();
        let desc = ProgramDescriptor {
            pass: ShaderPass::Forward,
            shader: "standard".into(),
            variant: "forward_0_0".into(),
            defines: vec![],
        };
        let a = device.request_program(&desc);
        let b = device.request_program(&desc);
        assert_eq!(a, b);
        assert!(!device.set_program(a), "not linked before the batch ends");
        device.end_shader_batch();
        assert!(device.set_program(a));
    }
}
