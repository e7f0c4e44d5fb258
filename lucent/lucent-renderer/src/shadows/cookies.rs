//! Copies light cookies into their cookie atlas slots.

use std::collections::HashMap;

use render_api::{Light, LightKind};

use super::LightTextureAtlas;
use crate::device::{ColorOps, DepthStencilOps, GraphicsDevice, PipelineState, ProgramDescriptor, ProgramHandle, ShaderPass};
use crate::graph::{PassKind, RenderPass};

#[derive(Default)]
pub struct CookieRenderer {
    programs: HashMap<&'static str, ProgramHandle>,
}

const BLIT_VARIANTS: [&str; 7] =
    ["blit_2d", "blit_cube_0", "blit_cube_1", "blit_cube_2", "blit_cube_3", "blit_cube_4", "blit_cube_5"];

impl CookieRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices of lights whose cookie is copied this frame.
    pub fn cookie_lights(lights: &[Light], atlas: &LightTextureAtlas) -> Vec<usize> {
        lights
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                l.enabled && l.visible_this_frame && l.cookie.is_some() && atlas.viewport(l.id).is_some()
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// The cookie pass. It is virtual when there is no atlas or nothing to copy.
    pub fn prepare_pass(lights: &[Light], atlas: &LightTextureAtlas) -> RenderPass {
        match atlas.cookie_atlas() {
            Some(cookie_atlas) if !Self::cookie_lights(lights, atlas).is_empty() => RenderPass::new(
                "ClusteredCookies",
                PassKind::ClusteredCookies,
                Some(cookie_atlas.render_target),
            )
            .with_ops(ColorOps::default(), DepthStencilOps::default()),
            _ => RenderPass::virtual_pass("ClusteredCookies", PassKind::ClusteredCookies),
        }
    }

    fn program(&mut self, device: &mut dyn GraphicsDevice, variant: &'static str) -> ProgramHandle {
        *self.programs.entry(variant).or_insert_with(|| {
            device.request_program(&ProgramDescriptor {
                pass: ShaderPass::Blit,
                shader: "blit".to_string(),
                variant: variant.to_string(),
                defines: if variant == "blit_2d" { Vec::new() } else { vec!["CUBEMAP".to_string()] },
            })
        })
    }

    /// Blit every cookie into its slot; omni cookies are cube maps unwrapped into six faces.
    /// Returns the number of blits issued.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice, lights: &[Light], atlas: &LightTextureAtlas) -> usize {
        let mut blits = Vec::new();
        for index in Self::cookie_lights(lights, atlas) {
            let light = &lights[index];
            let Some(cookie) = &light.cookie else { continue };
            match light.kind {
                LightKind::Omni => {
                    for face in 0..6 {
                        if let Some(viewport) = atlas.face_viewport(light, face) {
                            let program = self.program(device, BLIT_VARIANTS[face + 1]);
                            blits.push((program, viewport, cookie.texture));
                        }
                    }
                }
                LightKind::Spot { .. } => {
                    if let Some(viewport) = atlas.face_viewport(light, 0) {
                        let program = self.program(device, BLIT_VARIANTS[0]);
                        blits.push((program, viewport, cookie.texture));
                    }
                }
                LightKind::Directional { .. } => {}
            }
        }
        device.end_shader_batch();

        let mut state = PipelineState::default();
        state.depth.test = false;
        state.depth.write = false;
        device.set_pipeline_state(&state);

        let mut issued = 0;
        for (program, viewport, texture) in blits {
            if !device.set_program(program) {
                log::error!("Failed to use cookie blit program");
                continue;
            }
            device.set_viewport(viewport);
            device.set_scissor(viewport);
            device.blit(texture);
            issued += 1;
        }
        issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LightingConfig;
    use crate::device::headless::{DeviceCommand, HeadlessDevice};
    use crate::device::{TextureDescriptor, TextureFormat};
    use glam::Vec3;
    use render_api::{Cookie, CookieChannel, LightId};

    fn cookie_config() -> LightingConfig {
        LightingConfig { cookies_enabled: true, ..LightingConfig::default() }
    }

    fn with_cookie(mut light: Light, device: &mut HeadlessDevice) -> Light {
        let texture = device.create_texture(&TextureDescriptor::data("cookie", 8, 8, TextureFormat::Rgba8Unorm)).unwrap();
        light.cookie = Some(Cookie { texture, intensity: 1.0, channel: CookieChannel::Rgb });
        light.visible_this_frame = true;
        light
    }

    #[test]
    fn spot_and_omni_cookies_are_blitted() {
        let mut device = HeadlessDevice::new();
        let spot = with_cookie(Light::spot(LightId(1), Vec3::ZERO, 5.0, 10.0, 20.0), &mut device);
        let omni = with_cookie(Light::omni(LightId(2), Vec3::ONE, 5.0), &mut device);
        let lights = vec![spot, omni];
        let mut atlas = LightTextureAtlas::new();
        atlas.update(&mut device, &lights, &cookie_config()).unwrap();

        let pass = CookieRenderer::prepare_pass(&lights, &atlas);
        assert!(pass.real);

        let mut renderer = CookieRenderer::new();
        assert_eq!(renderer.render(&mut device, &lights, &atlas), 7);
        let blits = device.commands().iter().filter(|c| matches!(c, DeviceCommand::Blit(_))).count();
        assert_eq!(blits, 7);
    }

    #[test]
    fn pass_is_virtual_without_cookies() {
        let mut device = HeadlessDevice::new();
        let mut plain = Light::spot(LightId(1), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(256);
        plain.visible_this_frame = true;
        let mut atlas = LightTextureAtlas::new();
        atlas.update(&mut device, std::slice::from_ref(&plain), &cookie_config()).unwrap();
        assert!(!CookieRenderer::prepare_pass(&[plain], &atlas).real);
    }
}
