//! Shadow map textures with their render targets, and the pool that recycles them.

use std::collections::HashMap;

use render_api::{CompareFunc, Light, LightId, LightKind, RenderTargetHandle, ShadowType, TextureHandle};

use crate::device::{
    Attachment, DeviceCaps, FilterMode, GraphicsDevice, RenderTargetDescriptor, TextureDescriptor, TextureDimension,
    TextureFormat,
};
use crate::error::Result;

/// Pool key: maps are interchangeable when shape, algorithm and size match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowMapKey {
    pub cube: bool,
    pub shadow_type: ShadowType,
    pub resolution: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowMap {
    pub key: ShadowMapKey,
    pub texture: TextureHandle,
    pub format: TextureFormat,
    /// Depth buffer used while rendering color-encoded maps.
    pub depth_texture: Option<TextureHandle>,
    /// One target per face: 1 for 2D maps, 6 for cube maps.
    pub render_targets: Vec<RenderTargetHandle>,
}

impl ShadowMap {
    pub fn format(caps: &DeviceCaps, shadow_type: ShadowType) -> TextureFormat {
        match shadow_type {
            ShadowType::Vsm32 => TextureFormat::Rgba32Float,
            ShadowType::Vsm16 => TextureFormat::Rgba16Float,
            ShadowType::Vsm8 => TextureFormat::Rgba8Unorm,
            ShadowType::Pcf1 | ShadowType::Pcf3 | ShadowType::Pcf5 if caps.depth_texture_sampling => {
                TextureFormat::Depth32Float
            }
            ShadowType::Pcf1 | ShadowType::Pcf3 | ShadowType::Pcf5 => TextureFormat::Rgba8Unorm,
        }
    }

    pub fn filtering(caps: &DeviceCaps, shadow_type: ShadowType) -> FilterMode {
        let linear = match shadow_type {
            ShadowType::Vsm32 => caps.float_linear_filtering,
            ShadowType::Vsm16 => caps.half_float_linear_filtering,
            ShadowType::Vsm8 => true,
            ShadowType::Pcf1 | ShadowType::Pcf3 | ShadowType::Pcf5 => caps.depth_texture_sampling,
        };
        if linear {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }

    pub fn key_for(light: &Light) -> ShadowMapKey {
        ShadowMapKey {
            cube: matches!(light.kind, LightKind::Omni),
            shadow_type: light.shadow.shadow_type,
            resolution: light.shadow.resolution.max(1),
        }
    }

    pub fn create(device: &mut dyn GraphicsDevice, light: &Light) -> Result<Self> {
        Self::create_with_key(device, Self::key_for(light))
    }

    /// A 2D map shared by all local lights in clustered mode.
    pub fn create_atlas(device: &mut dyn GraphicsDevice, resolution: u32, shadow_type: ShadowType) -> Result<Self> {
        Self::create_with_key(device, ShadowMapKey { cube: false, shadow_type, resolution })
    }

    fn create_with_key(device: &mut dyn GraphicsDevice, key: ShadowMapKey) -> Result<Self> {
        let caps = device.capabilities();
        let format = Self::format(&caps, key.shadow_type);
        let dimension = if key.cube { TextureDimension::Cube } else { TextureDimension::D2 };
        let desc = TextureDescriptor {
            label: format!("shadow_map_{}", if key.cube { "cube" } else { "2d" }),
            width: key.resolution,
            height: key.resolution,
            format,
            dimension,
            filter: Self::filtering(&caps, key.shadow_type),
            compare: format.is_depth().then_some(CompareFunc::Less),
            render_attachment: true,
        };
        let texture = device.create_texture(&desc)?;

        let depth_texture = if format.is_depth() {
            None
        } else {
            let depth_desc = TextureDescriptor {
                label: "shadow_map_depth".to_string(),
                format: TextureFormat::Depth32Float,
                filter: FilterMode::Nearest,
                compare: None,
                ..desc.clone()
            };
            match device.create_texture(&depth_desc) {
                Ok(t) => Some(t),
                Err(e) => {
                    device.destroy_texture(texture);
                    return Err(e);
                }
            }
        };

        let faces = if key.cube { 6 } else { 1 };
        let mut render_targets = Vec::with_capacity(faces);
        for face in 0..faces as u32 {
            let (color, depth) = match depth_texture {
                None => (None, Some(Attachment { texture, face })),
                Some(depth) => (Some(Attachment { texture, face }), Some(Attachment { texture: depth, face })),
            };
            let rt = RenderTargetDescriptor { label: format!("shadow_target_{face}"), color, depth };
            match device.create_render_target(&rt) {
                Ok(handle) => render_targets.push(handle),
                Err(e) => {
                    Self { key, texture, format, depth_texture, render_targets }.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(Self { key, texture, format, depth_texture, render_targets })
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        for rt in self.render_targets {
            device.destroy_render_target(rt);
        }
        if let Some(depth) = self.depth_texture {
            device.destroy_texture(depth);
        }
        device.destroy_texture(self.texture);
    }
}

/// Pool of unused shadow maps, keyed by [`ShadowMapKey`].
#[derive(Default)]
pub struct ShadowMapCache {
    cache: HashMap<ShadowMapKey, Vec<ShadowMap>>,
}

impl ShadowMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(light: &Light) -> ShadowMapKey {
        ShadowMap::key_for(light)
    }

    /// A pooled map matching the light, or a new one.
    pub fn get(&mut self, device: &mut dyn GraphicsDevice, light: &Light) -> Result<ShadowMap> {
        let key = Self::key(light);
        if let Some(map) = self.cache.get_mut(&key).and_then(|maps| maps.pop()) {
            return Ok(map);
        }
        ShadowMap::create(device, light)
    }

    /// Return a map to the pool.
    pub fn add(&mut self, map: ShadowMap) {
        self.cache.entry(map.key).or_default().push(map);
    }

    pub fn pooled(&self) -> usize {
        self.cache.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, maps) in self.cache.drain() {
            for map in maps {
                map.destroy(device);
            }
        }
    }
}

/// Maps owned by individual lights (non-clustered local lights and directional lights).
#[derive(Default)]
pub struct LightShadowMaps {
    cache: ShadowMapCache,
    assigned: HashMap<LightId, ShadowMap>,
}

impl LightShadowMaps {
    pub fn cache_mut(&mut self) -> &mut ShadowMapCache {
        &mut self.cache
    }

    pub fn get(&self, light: LightId) -> Option<&ShadowMap> {
        self.assigned.get(&light)
    }

    pub fn contains(&self, light: LightId) -> bool {
        self.assigned.contains_key(&light)
    }

    /// Make sure `light` owns a map matching its current settings.
    pub fn ensure(&mut self, device: &mut dyn GraphicsDevice, light: &Light) -> Result<&ShadowMap> {
        let key = ShadowMapCache::key(light);
        if let Some(existing) = self.assigned.remove(&light.id) {
            if existing.key == key {
                return Ok(self.assigned.entry(light.id).or_insert(existing));
            }
            self.cache.add(existing);
        }
        let map = self.cache.get(device, light)?;
        Ok(self.assigned.entry(light.id).or_insert(map))
    }

    /// Return maps of lights for which `keep` is false to the pool.
    pub fn release_unused(&mut self, keep: impl Fn(LightId) -> bool) {
        let released: Vec<LightId> = self.assigned.keys().copied().filter(|id| !keep(*id)).collect();
        for id in released {
            if let Some(map) = self.assigned.remove(&id) {
                self.cache.add(map);
            }
        }
    }

    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, map) in self.assigned.drain() {
            map.destroy(device);
        }
        self.cache.clear(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use glam::Vec3;

    #[test]
    fn format_follows_algorithm_and_caps() {
        let caps = DeviceCaps::default();
        assert_eq!(ShadowMap::format(&caps, ShadowType::Vsm32), TextureFormat::Rgba32Float);
        assert_eq!(ShadowMap::format(&caps, ShadowType::Vsm16), TextureFormat::Rgba16Float);
        assert_eq!(ShadowMap::format(&caps, ShadowType::Pcf3), TextureFormat::Depth32Float);
        let no_depth = DeviceCaps { depth_texture_sampling: false, ..caps };
        assert_eq!(ShadowMap::format(&no_depth, ShadowType::Pcf3), TextureFormat::Rgba8Unorm);
        assert_eq!(ShadowMap::filtering(&no_depth, ShadowType::Pcf3), FilterMode::Nearest);
        assert_eq!(ShadowMap::filtering(&caps, ShadowType::Vsm32), FilterMode::Nearest);
        assert_eq!(ShadowMap::filtering(&caps, ShadowType::Vsm16), FilterMode::Linear);
    }

    #[test]
    fn omni_maps_are_cubes_with_six_targets() {
        let mut device = HeadlessDevice::new();
        let light = Light::omni(LightId(1), Vec3::ZERO, 5.0).with_shadows(256);
        let map = ShadowMap::create(&mut device, &light).unwrap();
        assert!(map.key.cube);
        assert_eq!(map.render_targets.len(), 6);
        let desc = device.texture_desc(map.texture).unwrap();
        assert_eq!(desc.dimension, TextureDimension::Cube);
        assert_eq!(desc.compare, Some(CompareFunc::Less));
    }

    #[test]
    fn color_maps_get_a_depth_buffer() {
        let mut device = HeadlessDevice::new();
        let mut light = Light::spot(LightId(1), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(128);
        light.shadow.shadow_type = ShadowType::Vsm16;
        let map = ShadowMap::create(&mut device, &light).unwrap();
        assert!(map.depth_texture.is_some());
        let rt = device.render_target_desc(map.render_targets[0]).unwrap();
        assert!(rt.color.is_some() && rt.depth.is_some());
    }

    #[test]
    fn failed_target_creation_releases_the_map() {
        let mut device = HeadlessDevice::new();
        device.set_render_target_budget(Some(3));
        let omni = Light::omni(LightId(1), Vec3::ZERO, 5.0).with_shadows(256);
        assert!(ShadowMap::create(&mut device, &omni).is_err());
        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(device.live_render_target_count(), 0);

        device.set_render_target_budget(Some(0));
        let mut spot = Light::spot(LightId(2), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(128);
        spot.shadow.shadow_type = ShadowType::Vsm16;
        assert!(ShadowMap::create(&mut device, &spot).is_err());
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn cache_reuses_matching_maps() {
        let mut device = HeadlessDevice::new();
        let mut cache = ShadowMapCache::new();
        let light = Light::spot(LightId(1), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(512);
        let map = cache.get(&mut device, &light).unwrap();
        let texture = map.texture;
        cache.add(map);
        assert_eq!(cache.pooled(), 1);
        let other_size = light.clone().with_shadows(1024);
        let fresh = cache.get(&mut device, &other_size).unwrap();
        assert_ne!(fresh.texture, texture);
        let again = cache.get(&mut device, &light).unwrap();
        assert_eq!(again.texture, texture);
        assert_eq!(cache.pooled(), 0);
    }

    #[test]
    fn resolution_change_swaps_assigned_map() {
        let mut device = HeadlessDevice::new();
        let mut maps = LightShadowMaps::default();
        let light = Light::spot(LightId(7), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(512);
        let first = maps.ensure(&mut device, &light).unwrap().texture;
        assert_eq!(maps.ensure(&mut device, &light).unwrap().texture, first);
        let bigger = light.clone().with_shadows(2048);
        assert_ne!(maps.ensure(&mut device, &bigger).unwrap().texture, first);
        assert_eq!(maps.cache_mut().pooled(), 1);
        maps.release_unused(|_| false);
        assert!(!maps.contains(LightId(7)));
    }
}
