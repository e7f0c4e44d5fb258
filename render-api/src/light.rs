//! Light data extracted from the host scene each frame.
//!
//! The host owns lights; the renderer reads them and writes back the two transient fields
//! (`visible_this_frame` and the `ThisFrame` → `None` shadow update transition).

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::handles::TextureHandle;
use crate::scene::Aabb;

/// Stable host-side identifier of a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LightId(pub u64);

bitflags::bitflags! {
    /// Which kinds of geometry a light affects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightMask: u32 {
        const AFFECT_DYNAMIC = 1 << 0;
        const AFFECT_LIGHTMAPPED = 1 << 1;
        const BAKE = 1 << 2;
    }
}

/// Per-kind parameters. Matching on this is exhaustive everywhere in the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum LightKind {
    Directional {
        /// Number of shadow cascades (1..=4).
        cascades: u32,
        /// 0 = linear split distribution, 1 = logarithmic.
        cascade_distribution: f32,
        /// Distance from the camera beyond which no shadows are rendered.
        shadow_distance: f32,
    },
    Omni,
    Spot {
        /// Inner cone angle in degrees (full intensity inside).
        inner_cone_angle: f32,
        /// Outer cone angle in degrees (zero intensity outside).
        outer_cone_angle: f32,
    },
}

impl LightKind {
    pub fn is_directional(&self) -> bool {
        matches!(self, LightKind::Directional { .. })
    }

    pub fn is_spot(&self) -> bool {
        matches!(self, LightKind::Spot { .. })
    }

    pub fn is_omni(&self) -> bool {
        matches!(self, LightKind::Omni)
    }
}

/// Emitter shape. Non-punctual shapes are area lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LightShape {
    #[default]
    Punctual,
    Rect,
    Disk,
    Sphere,
}

impl LightShape {
    /// Numeric code written into the light flags texel (0..=3).
    pub fn code(self) -> u8 {
        match self {
            LightShape::Punctual => 0,
            LightShape::Rect => 1,
            LightShape::Disk => 2,
            LightShape::Sphere => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FalloffMode {
    #[default]
    Linear,
    InverseSquared,
}

/// Shadow filtering algorithm. Determines the shadow map pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowType {
    Pcf1,
    #[default]
    Pcf3,
    Pcf5,
    Vsm8,
    Vsm16,
    Vsm32,
}

impl ShadowType {
    pub fn is_vsm(self) -> bool {
        matches!(self, ShadowType::Vsm8 | ShadowType::Vsm16 | ShadowType::Vsm32)
    }
}

/// How often a light's shadow map is re-rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowUpdate {
    /// Never re-render; the previous contents stay valid.
    None,
    /// Render once, then switch to `None`.
    ThisFrame,
    #[default]
    Realtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSettings {
    pub shadow_type: ShadowType,
    /// Shadow map edge length in texels.
    pub resolution: u32,
    pub bias: f32,
    pub normal_bias: f32,
    /// 0..1, how dark the shadowed region is.
    pub intensity: f32,
    pub update_mode: ShadowUpdate,
    /// Optional per-face (omni), per-cascade (directional) overrides of `update_mode`.
    pub update_overrides: Option<Vec<ShadowUpdate>>,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            shadow_type: ShadowType::default(),
            resolution: 1024,
            bias: 0.05,
            normal_bias: 0.0,
            intensity: 1.0,
            update_mode: ShadowUpdate::Realtime,
            update_overrides: None,
        }
    }
}

impl ShadowSettings {
    /// Effective update mode for one face or cascade.
    pub fn face_update(&self, face: usize) -> ShadowUpdate {
        self.update_overrides
            .as_ref()
            .and_then(|o| o.get(face).copied())
            .unwrap_or(self.update_mode)
    }
}

/// Texture channel(s) a cookie is sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CookieChannel {
    R,
    G,
    B,
    #[default]
    A,
    Rgb,
}

impl CookieChannel {
    /// Per-channel selection mask (r, g, b, a) for single channel cookies.
    pub fn mask(self) -> [bool; 4] {
        match self {
            CookieChannel::R => [true, false, false, false],
            CookieChannel::G => [false, true, false, false],
            CookieChannel::B => [false, false, true, false],
            CookieChannel::A => [false, false, false, true],
            CookieChannel::Rgb => [true, true, true, false],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub texture: TextureHandle,
    pub intensity: f32,
    pub channel: CookieChannel,
}

/// Color space used when reading light colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GammaCorrection {
    /// Colors are used as authored.
    None,
    /// Colors are converted to linear space (gamma 2.2) before use.
    #[default]
    Srgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub id: LightId,
    pub kind: LightKind,
    pub enabled: bool,
    /// World-space position.
    pub position: Vec3,
    /// World-space orientation. The light shines along its local -Y axis.
    pub rotation: Quat,
    /// Authored (gamma space) color.
    pub color: Vec3,
    pub intensity: f32,
    /// Attenuation end distance.
    pub range: f32,
    pub falloff: FalloffMode,
    pub shape: LightShape,
    /// Area light half-extent along the local X axis (world scale).
    pub area_half_width: f32,
    /// Area light half-extent along the local Z axis (world scale).
    pub area_half_height: f32,
    pub mask: LightMask,
    pub cast_shadows: bool,
    pub shadow: ShadowSettings,
    pub cookie: Option<Cookie>,
    /// Written by the renderer during culling.
    pub visible_this_frame: bool,
}

impl Light {
    fn base(id: LightId, kind: LightKind) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            falloff: FalloffMode::default(),
            shape: LightShape::default(),
            area_half_width: 0.5,
            area_half_height: 0.5,
            mask: LightMask::AFFECT_DYNAMIC,
            cast_shadows: false,
            shadow: ShadowSettings::default(),
            cookie: None,
            visible_this_frame: false,
        }
    }

    pub fn directional(id: LightId) -> Self {
        Self::base(
            id,
            LightKind::Directional { cascades: 1, cascade_distribution: 0.5, shadow_distance: 40.0 },
        )
    }

    pub fn omni(id: LightId, position: Vec3, range: f32) -> Self {
        Self { position, range, ..Self::base(id, LightKind::Omni) }
    }

    pub fn spot(id: LightId, position: Vec3, range: f32, inner_cone_angle: f32, outer_cone_angle: f32) -> Self {
        Self {
            position,
            range,
            ..Self::base(id, LightKind::Spot { inner_cone_angle, outer_cone_angle })
        }
    }

    /// Orient the light so it shines along `direction`.
    pub fn looking_along(mut self, direction: Vec3) -> Self {
        self.rotation = Quat::from_rotation_arc(Vec3::NEG_Y, direction.normalize_or_zero());
        self
    }

    pub fn with_shadows(mut self, resolution: u32) -> Self {
        self.cast_shadows = true;
        self.shadow.resolution = resolution;
        self
    }

    /// World-space direction the light shines along.
    pub fn direction(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Y
    }

    /// Color scaled by intensity, in the requested color space.
    pub fn final_color(&self, gamma: GammaCorrection) -> Vec3 {
        let c = match gamma {
            GammaCorrection::None => self.color,
            GammaCorrection::Srgb => self.color.powf(2.2),
        };
        c * self.intensity
    }

    pub fn is_area(&self) -> bool {
        self.shape != LightShape::Punctual
    }

    /// Number of shadow map faces: 6 for omni, cascade count for directional, 1 for spot.
    pub fn shadow_face_count(&self) -> usize {
        match self.kind {
            LightKind::Omni => 6,
            LightKind::Directional { cascades, .. } => cascades.clamp(1, 4) as usize,
            LightKind::Spot { .. } => 1,
        }
    }

    /// Outer cone angle for spot lights, 90° otherwise.
    pub fn outer_cone_angle(&self) -> f32 {
        match self.kind {
            LightKind::Spot { outer_cone_angle, .. } => outer_cone_angle,
            _ => 90.0,
        }
    }

    /// World-space axis-aligned box enclosing the lit volume. Directional lights are unbounded.
    pub fn bounding_box(&self) -> Aabb {
        match self.kind {
            LightKind::Spot { outer_cone_angle, .. } => {
                let r = self.range;
                let spread = (outer_cone_angle.to_radians().sin() * r).abs();
                // local box along -Y: x,z in [-spread, spread], y in [-r, 0]
                let local = Aabb::new(Vec3::new(-spread, -r, -spread), Vec3::new(spread, 0.0, spread));
                local.transformed(self.rotation, self.position)
            }
            LightKind::Omni | LightKind::Directional { .. } => {
                Aabb::from_center_half_extents(self.position, Vec3::splat(self.range))
            }
        }
    }

    /// World-space bounding sphere (center, radius) of the lit volume.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        match self.kind {
            LightKind::Spot { outer_cone_angle, .. } => {
                let size = self.range;
                let angle = outer_cone_angle.to_radians();
                let dir = self.direction();
                if outer_cone_angle > 45.0 {
                    (self.position + dir * (size * angle.cos()), size * angle.sin())
                } else {
                    let radius = size / (2.0 * angle.cos());
                    (self.position + dir * radius, radius)
                }
            }
            _ => (self.position, self.range),
        }
    }

    /// Area light axis vectors (world space half-width and half-height).
    pub fn area_axes(&self) -> (Vec3, Vec3) {
        (
            self.rotation * Vec3::X * self.area_half_width,
            self.rotation * Vec3::Z * self.area_half_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_box_contains_apex_and_tip() {
        let light = Light::spot(LightId(1), Vec3::new(1.0, 2.0, 3.0), 5.0, 10.0, 20.0)
            .looking_along(Vec3::X);
        let b = light.bounding_box();
        assert!(b.contains_point(light.position));
        assert!(b.contains_point(light.position + Vec3::X * 4.99));
        assert!(b.max.x >= 5.99);
    }

    #[test]
    fn linear_color_uses_gamma() {
        let mut light = Light::omni(LightId(1), Vec3::ZERO, 1.0);
        light.color = Vec3::splat(0.5);
        light.intensity = 2.0;
        let lin = light.final_color(GammaCorrection::Srgb);
        assert!((lin.x - 0.5f32.powf(2.2) * 2.0).abs() < 1e-6);
        assert_eq!(light.final_color(GammaCorrection::None), Vec3::ONE);
    }

    #[test]
    fn face_update_prefers_override() {
        let mut s = ShadowSettings::default();
        s.update_overrides = Some(vec![ShadowUpdate::None]);
        assert_eq!(s.face_update(0), ShadowUpdate::None);
        assert_eq!(s.face_update(3), ShadowUpdate::Realtime);
    }
}
