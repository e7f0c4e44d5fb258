//! Shared shadow and cookie atlases for local lights in clustered mode.
//!
//! The atlas is split into an n×n grid of square slots, n = ceil(sqrt(lights needing a slot)).
//! A light keeps its slot between frames while the grid size stays the same. Omni lights split
//! their slot into a 3×2 grid of cube faces.

use std::collections::HashMap;

use glam::Vec4;
use render_api::{Light, LightId, LightKind, RenderTargetHandle, ShadowType, TextureHandle};

use super::shadow_map::ShadowMap;
use crate::config::LightingConfig;
use crate::device::{Attachment, GraphicsDevice, RenderTargetDescriptor, TextureDescriptor, TextureFormat};
use crate::error::Result;

const CUBE_SLOT_OFFSETS: [(f32, f32); 6] = [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0), (2.0, 0.0), (2.0, 1.0)];

/// Cookie atlas texture with the target it is rendered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieAtlas {
    pub texture: TextureHandle,
    pub render_target: RenderTargetHandle,
    pub resolution: u32,
}

#[derive(Default)]
pub struct LightTextureAtlas {
    shadow_atlas: Option<ShadowMap>,
    cookie_atlas: Option<CookieAtlas>,
    grid_size: u32,
    slots: HashMap<LightId, u32>,
    shadow_edge_pixels: u32,
}

impl LightTextureAtlas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow_atlas(&self) -> Option<&ShadowMap> {
        self.shadow_atlas.as_ref()
    }

    pub fn cookie_atlas(&self) -> Option<&CookieAtlas> {
        self.cookie_atlas.as_ref()
    }

    pub fn shadow_atlas_resolution(&self) -> u32 {
        self.shadow_atlas.as_ref().map_or(0, |m| m.key.resolution)
    }

    pub fn shadow_edge_pixels(&self) -> u32 {
        self.shadow_edge_pixels
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Normalized (x, y, size, size) slot of a light, if it has one.
    pub fn viewport(&self, light: LightId) -> Option<Vec4> {
        let slot = *self.slots.get(&light)?;
        let size = 1.0 / self.grid_size as f32;
        let (col, row) = (slot % self.grid_size, slot / self.grid_size);
        Some(Vec4::new(col as f32 * size, row as f32 * size, size, size))
    }

    /// Viewport of one shadow face inside the light's slot. Spot lights use the full slot.
    pub fn face_viewport(&self, light: &Light, face: usize) -> Option<Vec4> {
        let slot = self.viewport(light.id)?;
        match light.kind {
            LightKind::Omni => {
                let small = slot.z / 3.0;
                let (ox, oy) = CUBE_SLOT_OFFSETS[face.min(5)];
                Some(Vec4::new(slot.x + ox * small, slot.y + oy * small, small, small))
            }
            _ => Some(slot),
        }
    }

    fn needs_slot(light: &Light, config: &LightingConfig) -> bool {
        let local = !light.kind.is_directional();
        let shadow = config.shadows_enabled && light.cast_shadows;
        let cookie = config.cookies_enabled && light.cookie.is_some();
        light.enabled && local && light.visible_this_frame && (shadow || cookie)
    }

    /// Resize the atlas textures if the configuration changed and assign slots to this frame's lights.
    pub fn update(&mut self, device: &mut dyn GraphicsDevice, lights: &[Light], config: &LightingConfig) -> Result<()> {
        self.shadow_edge_pixels = config.shadow_edge_pixels;
        self.update_textures(device, config)?;

        let wanted: Vec<LightId> = lights.iter().filter(|l| Self::needs_slot(l, config)).map(|l| l.id).collect();
        let grid_size = (wanted.len() as f64).sqrt().ceil().max(1.0) as u32;
        if grid_size != self.grid_size {
            self.slots.clear();
            self.grid_size = grid_size;
        }
        self.slots.retain(|id, _| wanted.contains(id));

        let capacity = grid_size * grid_size;
        let mut used = vec![false; capacity as usize];
        for &slot in self.slots.values() {
            used[slot as usize] = true;
        }
        let mut free = (0..capacity).filter(|s| !used[*s as usize]);
        for id in wanted {
            if self.slots.contains_key(&id) {
                continue;
            }
            match free.next() {
                Some(slot) => {
                    self.slots.insert(id, slot);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn update_textures(&mut self, device: &mut dyn GraphicsDevice, config: &LightingConfig) -> Result<()> {
        let shadow_type: ShadowType = config.shadow_type;
        let shadow_res = config.shadow_atlas_resolution;
        let stale = self
            .shadow_atlas
            .as_ref()
            .is_some_and(|m| m.key.resolution != shadow_res || m.key.shadow_type != shadow_type);
        if stale || (!config.shadows_enabled && self.shadow_atlas.is_some()) {
            if let Some(old) = self.shadow_atlas.take() {
                old.destroy(device);
            }
        }
        if config.shadows_enabled && self.shadow_atlas.is_none() {
            self.shadow_atlas = Some(ShadowMap::create_atlas(device, shadow_res, shadow_type)?);
        }

        let cookie_res = config.cookie_atlas_resolution;
        let stale = self.cookie_atlas.is_some_and(|c| c.resolution != cookie_res);
        if stale || (!config.cookies_enabled && self.cookie_atlas.is_some()) {
            if let Some(old) = self.cookie_atlas.take() {
                device.destroy_render_target(old.render_target);
                device.destroy_texture(old.texture);
            }
        }
        if config.cookies_enabled && self.cookie_atlas.is_none() {
            let desc = TextureDescriptor {
                render_attachment: true,
                ..TextureDescriptor::data("cookie_atlas", cookie_res, cookie_res, TextureFormat::Rgba8Unorm)
            };
            let texture = device.create_texture(&desc)?;
            let render_target = device.create_render_target(&RenderTargetDescriptor {
                label: "cookie_atlas_target".to_string(),
                color: Some(Attachment { texture, face: 0 }),
                depth: None,
            })?;
            self.cookie_atlas = Some(CookieAtlas { texture, render_target, resolution: cookie_res });
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(map) = self.shadow_atlas.take() {
            map.destroy(device);
        }
        if let Some(cookie) = self.cookie_atlas.take() {
            device.destroy_render_target(cookie.render_target);
            device.destroy_texture(cookie.texture);
        }
        self.slots.clear();
        self.grid_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use glam::Vec3;

    fn caster(id: u64) -> Light {
        let mut light = Light::spot(LightId(id), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(512);
        light.visible_this_frame = true;
        light
    }

    #[test]
    fn grid_grows_with_light_count() {
        let mut device = HeadlessDevice::new();
        let mut atlas = LightTextureAtlas::new();
        let config = LightingConfig::default();
        let lights: Vec<Light> = (1..=5).map(caster).collect();
        atlas.update(&mut device, &lights, &config).unwrap();
        assert_eq!(atlas.grid_size(), 3);
        assert_eq!(atlas.viewport(LightId(1)), Some(Vec4::new(0.0, 0.0, 1.0 / 3.0, 1.0 / 3.0)));
        assert!(atlas.shadow_atlas().is_some());
        assert!(atlas.cookie_atlas().is_none());
    }

    #[test]
    fn slots_are_stable_while_grid_size_holds() {
        let mut device = HeadlessDevice::new();
        let mut atlas = LightTextureAtlas::new();
        let config = LightingConfig::default();
        let lights: Vec<Light> = (1..=4).map(caster).collect();
        atlas.update(&mut device, &lights, &config).unwrap();
        let before = atlas.viewport(LightId(4));
        // light 2 leaves, light 9 arrives: grid stays 2x2
        let next = vec![caster(1), caster(3), caster(4), caster(9)];
        atlas.update(&mut device, &next, &config).unwrap();
        assert_eq!(atlas.viewport(LightId(4)), before);
        assert!(atlas.viewport(LightId(2)).is_none());
        assert!(atlas.viewport(LightId(9)).is_some());
    }

    #[test]
    fn lights_without_shadow_or_cookie_get_no_slot() {
        let mut device = HeadlessDevice::new();
        let mut atlas = LightTextureAtlas::new();
        let mut plain = Light::omni(LightId(1), Vec3::ZERO, 2.0);
        plain.visible_this_frame = true;
        atlas.update(&mut device, &[plain], &LightingConfig::default()).unwrap();
        assert!(atlas.viewport(LightId(1)).is_none());
    }

    #[test]
    fn omni_faces_form_three_by_two_grid() {
        let mut device = HeadlessDevice::new();
        let mut atlas = LightTextureAtlas::new();
        let mut omni = Light::omni(LightId(1), Vec3::ZERO, 2.0).with_shadows(256);
        omni.visible_this_frame = true;
        atlas.update(&mut device, std::slice::from_ref(&omni), &LightingConfig::default()).unwrap();
        let third = 1.0 / 3.0;
        assert_eq!(atlas.face_viewport(&omni, 0), Some(Vec4::new(0.0, 0.0, third, third)));
        assert_eq!(atlas.face_viewport(&omni, 3), Some(Vec4::new(third, third, third, third)));
        assert_eq!(atlas.face_viewport(&omni, 4).map(|v| v.x), Some(2.0 * third));
    }
}
