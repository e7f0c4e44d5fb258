//! Two-phase draw submission.
//!
//! Phase one resolves a program per draw and records where the material and light mask change,
//! then ends the shader batch so every variant links together. Phase two walks the prepared list
//! and only touches device state at those change points.

use std::collections::HashMap;

use render_api::{Camera, CullMode, MaterialId, Scene};

use super::{ForwardLightContext, MaterialUniforms, MeshUniforms};
use crate::device::{GraphicsDevice, PipelineState, ProgramDescriptor, ProgramHandle, ShaderPass, UniformSlot};
use crate::renderer::FrameStats;

/// One entry of the prepared draw list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedDraw {
    /// Index into `Scene::mesh_instances`.
    pub instance: usize,
    /// `None` for command draws.
    pub program: Option<ProgramHandle>,
    pub material_changed: bool,
    pub light_mask_changed: bool,
}

#[derive(Default)]
pub struct ForwardRenderer {
    /// Variants already requested, per material.
    programs: HashMap<(MaterialId, String), ProgramHandle>,
}

impl ForwardRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_program_count(&self) -> usize {
        self.programs.len()
    }

    /// Drop cached variants, e.g. after the light setup changed.
    pub fn clear_program_cache(&mut self) {
        self.programs.clear();
    }

    pub fn variant_key(pass: ShaderPass, shader_defs: u32, light_hash: u64) -> String {
        format!("{}_{}_{}", pass.name(), shader_defs, light_hash)
    }

    /// Phase one: resolve programs and mark state changes.
    pub fn prepare_materials(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &Scene,
        draws: &[usize],
        light_hash: u64,
    ) -> Vec<PreparedDraw> {
        let mut prepared = Vec::with_capacity(draws.len());
        let mut prev_material: Option<MaterialId> = None;
        let mut prev_mask: Option<u32> = None;
        for &instance in draws {
            let mi = &scene.mesh_instances[instance];
            if mi.command.is_some() {
                prepared.push(PreparedDraw { instance, program: None, material_changed: false, light_mask_changed: false });
                continue;
            }
            let material_changed = prev_material != Some(mi.material);
            let light_mask_changed = prev_mask != Some(mi.mask);
            prev_material = Some(mi.material);
            prev_mask = Some(mi.mask);

            let variant = Self::variant_key(ShaderPass::Forward, mi.shader_defs, light_hash);
            let shader = scene.material(mi.material).map_or("standard", |m| m.shader.as_str());
            let program = *self.programs.entry((mi.material, variant.clone())).or_insert_with(|| {
                device.request_program(&ProgramDescriptor {
                    pass: ShaderPass::Forward,
                    shader: shader.to_string(),
                    variant,
                    defines: Vec::new(),
                })
            });
            prepared.push(PreparedDraw { instance, program: Some(program), material_changed, light_mask_changed });
        }
        device.end_shader_batch();
        prepared
    }

    /// Phase two: bind state at change points and draw. `lights` is set in non-clustered mode.
    pub fn render_forward_internal(
        &self,
        device: &mut dyn GraphicsDevice,
        scene: &Scene,
        prepared: &[PreparedDraw],
        camera: &Camera,
        lights: Option<&ForwardLightContext<'_>>,
        stats: &mut FrameStats,
    ) {
        let mut skip_material = false;
        // Mask of the last light block actually written; draws skipped after a failed program don't count.
        let mut bound_mask: Option<u32> = None;
        for draw in prepared {
            let mi = &scene.mesh_instances[draw.instance];
            if let Some(command) = &mi.command {
                device.push_marker(&command.label);
                device.pop_marker();
                continue;
            }
            let Some(program) = draw.program else { continue };
            let material = scene.material(mi.material);

            if draw.material_changed {
                stats.material_switches += 1;
                skip_material = !device.set_program(program);
                if skip_material {
                    log::error!("Failed to set shader for material {:?}, skipping its draws", mi.material);
                    continue;
                }
                if let Some(m) = material {
                    let depth_bias =
                        (m.depth_bias != 0.0 || m.slope_depth_bias != 0.0).then_some((m.depth_bias, m.slope_depth_bias));
                    device.set_pipeline_state(&PipelineState { blend: m.blend, depth: m.depth, depth_bias });
                    device.set_stencil_state(m.stencil_front, m.stencil_back);
                    device.write_uniforms(UniformSlot::Material, bytemuck::bytes_of(&MaterialUniforms::new(m)));
                } else {
                    device.set_pipeline_state(&PipelineState::default());
                }
            } else if skip_material {
                continue;
            }

            if draw.light_mask_changed || bound_mask != Some(mi.mask) {
                if let Some(ctx) = lights {
                    let (uniforms, textures) = ctx.uniforms(mi.mask);
                    device.write_uniforms(UniformSlot::ForwardLights, bytemuck::bytes_of(&uniforms));
                    for (slot, texture) in textures {
                        device.bind_texture(slot, texture);
                    }
                    bound_mask = Some(mi.mask);
                }
            }

            let cull = if camera.cull_faces { material.map_or(CullMode::Back, |m| m.cull) } else { CullMode::None };
            device.set_cull_mode(cull);
            device.write_uniforms(UniformSlot::Mesh, bytemuck::bytes_of(&MeshUniforms::new(&mi.world)));
            device.draw(mi.mesh, mi.instance_count);
            stats.draw_calls += 1;
        }
    }

    /// Both phases for one render action.
    #[allow(clippy::too_many_arguments)]
    pub fn render_forward(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &Scene,
        draws: &[usize],
        camera: &Camera,
        light_hash: u64,
        lights: Option<&ForwardLightContext<'_>>,
        stats: &mut FrameStats,
    ) {
        let prepared = self.prepare_materials(device, scene, draws, light_hash);
        self.render_forward_internal(device, scene, &prepared, camera, lights, stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{DeviceCommand, HeadlessDevice};
    use crate::forward::{MAX_DIRECTIONAL_LIGHTS, MAX_LOCAL_LIGHTS};
    use glam::Mat4;
    use render_api::{Aabb, CameraId, GammaCorrection, Light, LightId, LightMask, Material, MeshHandle, MeshInstance};

    fn scene() -> Scene {
        let mut scene = Scene::default();
        let mut broken = Material::new(MaterialId(1), "broken");
        broken.shader = "broken".to_string();
        scene.materials = vec![Material::new(MaterialId(0), "lit"), broken];
        let draw = |mesh, material| MeshInstance::new(MeshHandle(mesh), MaterialId(material), Mat4::IDENTITY, Aabb::default());
        scene.mesh_instances = vec![
            draw(1, 0),
            draw(2, 0),
            draw(3, 1),
            MeshInstance::command("debug lines"),
            draw(4, 1),
            draw(5, 0),
        ];
        scene.mesh_instances[5].instance_count = 16;
        scene
    }

    #[test]
    fn state_changes_are_marked_once_per_run() {
        let mut device = HeadlessDevice::new();
        let scene = scene();
        let mut forward = ForwardRenderer::new();
        let prepared = forward.prepare_materials(&mut device, &scene, &[0, 1, 2, 4, 5], 0);
        let changes: Vec<bool> = prepared.iter().map(|p| p.material_changed).collect();
        assert_eq!(changes, vec![true, false, true, false, true]);
        assert!(prepared[0].light_mask_changed && !prepared[1].light_mask_changed);
        assert_eq!(forward.cached_program_count(), 2);
        assert_eq!(prepared[0].program, prepared[4].program);
    }

    #[test]
    fn failed_material_is_skipped_until_next_material() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("broken");
        let scene = scene();
        let camera = Camera::new(CameraId(1), "main");
        let mut forward = ForwardRenderer::new();
        let mut stats = FrameStats::default();
        forward.render_forward(&mut device, &scene, &[0, 1, 2, 3, 4, 5], &camera, 0, None, &mut stats);

        let draws: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Draw { mesh, instances } => Some((mesh.0, *instances)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(1, 0), (2, 0), (5, 16)]);
        assert!(device.commands().contains(&DeviceCommand::Marker("debug lines".to_string())));
        assert_eq!(stats.draw_calls, 3);
        assert_eq!(stats.material_switches, 3);
    }

    #[test]
    fn lights_are_rewritten_after_a_skipped_material() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("broken");
        let mut scene = scene();
        scene.mesh_instances[0].mask = LightMask::AFFECT_DYNAMIC.bits();
        scene.mesh_instances[2].mask = LightMask::BAKE.bits();
        scene.mesh_instances[5].mask = LightMask::BAKE.bits();

        let mut sun = Light::directional(LightId(1));
        sun.visible_this_frame = true;
        let lights = vec![sun];
        let (dir, local, maps) = Default::default();
        let ctx = ForwardLightContext {
            lights: &lights,
            layer_lights: &[0],
            camera: CameraId(1),
            gamma: GammaCorrection::None,
            directional_shadows: &dir,
            local_shadows: &local,
            shadow_maps: &maps,
            max_directional: MAX_DIRECTIONAL_LIGHTS,
            max_local: MAX_LOCAL_LIGHTS,
        };
        let camera = Camera::new(CameraId(1), "main");
        let mut forward = ForwardRenderer::new();
        forward.render_forward(&mut device, &scene, &[0, 2, 5], &camera, 0, Some(&ctx), &mut FrameStats::default());

        let sequence: Vec<String> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Uniforms(UniformSlot::ForwardLights) => Some("lights".to_string()),
                DeviceCommand::Draw { mesh, .. } => Some(format!("draw{}", mesh.0)),
                _ => None,
            })
            .collect();
        assert_eq!(sequence, vec!["lights", "draw1", "lights", "draw5"]);
    }

    #[test]
    fn camera_without_face_culling_disables_culling() {
        let mut device = HeadlessDevice::new();
        let scene = scene();
        let mut camera = Camera::new(CameraId(1), "main");
        camera.cull_faces = false;
        let mut forward = ForwardRenderer::new();
        forward.render_forward(&mut device, &scene, &[0], &camera, 0, None, &mut FrameStats::default());
        assert!(device.commands().contains(&DeviceCommand::CullMode(CullMode::None)));
    }
}
