//! Per-draw light uniforms for the non-clustered path.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use render_api::{CameraId, FalloffMode, GammaCorrection, Light, LightKind, TextureHandle};

use super::{MAX_DIRECTIONAL_LIGHTS, MAX_LOCAL_LIGHTS, MAX_SHADOWED_DIRECTIONAL_LIGHTS, MAX_SHADOWED_LOCAL_LIGHTS};
use crate::device::TextureSlot;
use crate::shadows::directional::MAX_CASCADES;
use crate::shadows::{LightShadowMaps, ShadowRendererDirectional, ShadowRendererLocal};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// xyz = direction, w = shadow slot or -1
    pub direction: [f32; 4],
    /// rgb = linear color, a = shadow intensity
    pub color: [f32; 4],
    /// (bias, normal bias, cascade count, map resolution)
    pub shadow_params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLocalLight {
    pub position_range: [f32; 4],
    /// rgb = linear color, a = falloff (0 linear, 1 inverse squared)
    pub color: [f32; 4],
    /// xyz = spot direction, w = shadow slot or -1
    pub direction: [f32; 4],
    /// (cos inner, cos outer, is spot, shadow intensity)
    pub cone: [f32; 4],
    /// (bias, normal bias, is omni shadow, map resolution)
    pub shadow_params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ForwardLightUniforms {
    pub directional: [GpuDirectionalLight; MAX_DIRECTIONAL_LIGHTS],
    pub local: [GpuLocalLight; MAX_LOCAL_LIGHTS],
    /// Cascade matrices of the shadowed directional lights, `MAX_CASCADES` per light.
    pub cascade_matrices: [[[f32; 4]; 4]; MAX_SHADOWED_DIRECTIONAL_LIGHTS * MAX_CASCADES],
    pub cascade_splits: [[f32; 4]; MAX_SHADOWED_DIRECTIONAL_LIGHTS],
    pub local_shadow_matrices: [[[f32; 4]; 4]; MAX_SHADOWED_LOCAL_LIGHTS],
    /// (directional, local, shadowed directional, shadowed local)
    pub counts: [u32; 4],
}

impl Default for ForwardLightUniforms {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Hash of the lights a layer passes to its draws; part of the shader variant key.
pub fn light_hash(lights: &[Light], indices: &[usize]) -> u64 {
    if indices.is_empty() {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    for light in indices.iter().filter_map(|&i| lights.get(i)) {
        let kind: u8 = match light.kind {
            LightKind::Directional { .. } => 0,
            LightKind::Omni => 1,
            LightKind::Spot { .. } => 2,
        };
        (kind, light.cast_shadows, light.shadow.shadow_type, light.shape, light.falloff, light.cookie.is_some())
            .hash(&mut hasher);
    }
    hasher.finish()
}

/// Everything needed to fill [`ForwardLightUniforms`] for one render action.
pub struct ForwardLightContext<'a> {
    pub lights: &'a [Light],
    /// Indices into `lights` of the lights of the rendered layer.
    pub layer_lights: &'a [usize],
    pub camera: CameraId,
    pub gamma: GammaCorrection,
    pub directional_shadows: &'a ShadowRendererDirectional,
    pub local_shadows: &'a ShadowRendererLocal,
    pub shadow_maps: &'a LightShadowMaps,
    pub max_directional: usize,
    pub max_local: usize,
}

impl ForwardLightContext<'_> {
    /// Uniforms and shadow textures for draws with `mask`. Lights past the limits are dropped.
    /// A mask of 0 means "no mask", as in culling, and accepts every light.
    pub fn uniforms(&self, mask: u32) -> (ForwardLightUniforms, Vec<(TextureSlot, Option<TextureHandle>)>) {
        let mask = if mask == 0 { u32::MAX } else { mask };
        let mut u = ForwardLightUniforms::default();
        let mut textures = Vec::new();
        let max_directional = self.max_directional.min(MAX_DIRECTIONAL_LIGHTS);
        let max_local = self.max_local.min(MAX_LOCAL_LIGHTS);
        let (mut dir_count, mut local_count, mut dir_shadows, mut local_shadows) = (0usize, 0usize, 0usize, 0usize);

        for light in self.layer_lights.iter().filter_map(|&i| self.lights.get(i)) {
            if !light.enabled || !light.visible_this_frame || light.mask.bits() & mask == 0 {
                continue;
            }
            let color = light.final_color(self.gamma);
            match light.kind {
                LightKind::Directional { .. } => {
                    if dir_count == max_directional {
                        continue;
                    }
                    let gpu = &mut u.directional[dir_count];
                    gpu.direction = light.direction().extend(-1.0).to_array();
                    gpu.color = color.extend(0.0).to_array();
                    let shadow = self.directional_shadows.render_data(light.id, self.camera);
                    let map = self.shadow_maps.get(light.id);
                    if let (true, Some(data), Some(map)) = (light.cast_shadows, shadow, map) {
                        if dir_shadows < MAX_SHADOWED_DIRECTIONAL_LIGHTS {
                            gpu.direction[3] = dir_shadows as f32;
                            gpu.color[3] = light.shadow.intensity;
                            gpu.shadow_params = [
                                light.shadow.bias,
                                light.shadow.normal_bias,
                                data.cascade_count as f32,
                                map.key.resolution as f32,
                            ];
                            for (c, view) in data.views.iter().enumerate() {
                                u.cascade_matrices[dir_shadows * MAX_CASCADES + c] = view.shadow_matrix.to_cols_array_2d();
                            }
                            u.cascade_splits[dir_shadows] = data.split_distances;
                            textures.push((TextureSlot::DirectionalShadow(dir_shadows as u8), Some(map.texture)));
                            dir_shadows += 1;
                        }
                    }
                    dir_count += 1;
                }
                LightKind::Omni | LightKind::Spot { .. } => {
                    if local_count == max_local {
                        continue;
                    }
                    let gpu = &mut u.local[local_count];
                    gpu.position_range = light.position.extend(light.range).to_array();
                    let falloff = match light.falloff {
                        FalloffMode::Linear => 0.0,
                        FalloffMode::InverseSquared => 1.0,
                    };
                    gpu.color = color.extend(falloff).to_array();
                    gpu.direction = light.direction().extend(-1.0).to_array();
                    gpu.cone = match light.kind {
                        LightKind::Spot { inner_cone_angle, outer_cone_angle } => [
                            inner_cone_angle.to_radians().cos(),
                            outer_cone_angle.to_radians().cos(),
                            1.0,
                            0.0,
                        ],
                        _ => [0.0, 0.0, 0.0, 0.0],
                    };
                    let shadow = self.local_shadows.render_data(light.id).filter(|d| !d.clustered);
                    let map = self.shadow_maps.get(light.id);
                    if let (true, Some(data), Some(map)) = (light.cast_shadows, shadow, map) {
                        if local_shadows < MAX_SHADOWED_LOCAL_LIGHTS {
                            let omni = light.kind.is_omni();
                            gpu.direction[3] = local_shadows as f32;
                            gpu.cone[3] = light.shadow.intensity;
                            gpu.shadow_params = [
                                light.shadow.bias,
                                light.shadow.normal_bias,
                                if omni { 1.0 } else { 0.0 },
                                map.key.resolution as f32,
                            ];
                            if let Some(view) = data.views.first() {
                                u.local_shadow_matrices[local_shadows] = view.shadow_matrix.to_cols_array_2d();
                            }
                            let slot = if omni {
                                TextureSlot::LocalShadowCube(local_shadows as u8)
                            } else {
                                TextureSlot::LocalShadow(local_shadows as u8)
                            };
                            textures.push((slot, Some(map.texture)));
                            local_shadows += 1;
                        }
                    }
                    local_count += 1;
                }
            }
        }

        u.counts = [dir_count as u32, local_count as u32, dir_shadows as u32, local_shadows as u32];
        (u, textures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use render_api::{LightId, LightMask};

    fn context<'a>(
        lights: &'a [Light],
        layer_lights: &'a [usize],
        dir: &'a ShadowRendererDirectional,
        local: &'a ShadowRendererLocal,
        maps: &'a LightShadowMaps,
    ) -> ForwardLightContext<'a> {
        ForwardLightContext {
            lights,
            layer_lights,
            camera: CameraId(1),
            gamma: GammaCorrection::None,
            directional_shadows: dir,
            local_shadows: local,
            shadow_maps: maps,
            max_directional: MAX_DIRECTIONAL_LIGHTS,
            max_local: MAX_LOCAL_LIGHTS,
        }
    }

    #[test]
    fn excess_local_lights_are_dropped() {
        let lights: Vec<Light> = (0..12)
            .map(|i| {
                let mut l = Light::omni(LightId(i), Vec3::splat(i as f32), 3.0);
                l.visible_this_frame = true;
                l
            })
            .collect();
        let indices: Vec<usize> = (0..lights.len()).collect();
        let (dir, local, maps) = Default::default();
        let (u, textures) = context(&lights, &indices, &dir, &local, &maps).uniforms(LightMask::AFFECT_DYNAMIC.bits());
        assert_eq!(u.counts, [0, 8, 0, 0]);
        assert_eq!(u.local[7].position_range, [7.0, 7.0, 7.0, 3.0]);
        assert!(textures.is_empty());
    }

    #[test]
    fn mask_and_visibility_filter_lights() {
        let mut sun = Light::directional(LightId(1));
        sun.visible_this_frame = true;
        let mut baked = Light::omni(LightId(2), Vec3::ZERO, 1.0);
        baked.visible_this_frame = true;
        baked.mask = LightMask::BAKE;
        let hidden = Light::omni(LightId(3), Vec3::ZERO, 1.0);
        let lights = vec![sun, baked, hidden];
        let (dir, local, maps) = Default::default();
        let (u, _) = context(&lights, &[0, 1, 2], &dir, &local, &maps).uniforms(LightMask::AFFECT_DYNAMIC.bits());
        assert_eq!(u.counts, [1, 0, 0, 0]);
        assert_eq!(u.directional[0].direction[3], -1.0);
    }

    #[test]
    fn unmasked_draws_receive_every_light() {
        let mut sun = Light::directional(LightId(1));
        sun.visible_this_frame = true;
        let mut baked = Light::omni(LightId(2), Vec3::ZERO, 1.0);
        baked.visible_this_frame = true;
        baked.mask = LightMask::BAKE;
        let lights = vec![sun, baked];
        let (dir, local, maps) = Default::default();
        let (u, _) = context(&lights, &[0, 1], &dir, &local, &maps).uniforms(0);
        assert_eq!(u.counts, [1, 1, 0, 0]);
    }

    #[test]
    fn light_hash_depends_on_light_setup() {
        let a = Light::omni(LightId(1), Vec3::ZERO, 1.0);
        let b = a.clone().with_shadows(256);
        assert_eq!(light_hash(&[a.clone()], &[]), 0);
        assert_ne!(light_hash(&[a.clone()], &[0]), light_hash(&[b], &[0]));
        assert_eq!(light_hash(&[a.clone()], &[0]), light_hash(&[a], &[0]));
    }

    #[test]
    fn uniform_block_layout_is_tight() {
        assert_eq!(std::mem::size_of::<GpuLocalLight>(), 80);
        assert_eq!(
            std::mem::size_of::<ForwardLightUniforms>(),
            4 * 48 + 8 * 80 + 8 * 64 + 2 * 16 + 4 * 64 + 16
        );
    }
}
