//! Per-light parameters packed into textures, one row per light index (row 0 reserved).
//!
//! Two precision tiers share the same 8-bit flags/color/cone/bias/cookie texels:
//! - `Float`: the 8-bit texture only holds those, positions, directions, matrices and area axes
//!   go to an `Rgba32Float` texture as raw floats.
//! - `Rgba8`: everything is quantized into the single 8-bit texture.

use glam::{Mat4, Vec3, Vec4};
use render_api::{GammaCorrection, Light, LightKind, LightMask, TextureHandle};

use super::float_packing::{
    bytes_to_float, bytes_to_float_range, float_to_bytes, float_to_bytes_range, float_to_mantissa_exponent,
    mantissa_exponent_to_float,
};
use crate::config::LightEncoding;
use crate::device::{GraphicsDevice, TextureDescriptor, TextureFormat};
use crate::error::Result;
use crate::math::viewport_matrix;
use crate::shadows::ShadowCamera;

/// Texel columns of the 8-bit light texture (4 bytes each).
pub mod texel8 {
    pub const FLAGS: usize = 0;
    pub const COLOR_A: usize = 1;
    pub const COLOR_B: usize = 2;
    pub const SPOT_ANGLES: usize = 3;
    pub const SHADOW_BIAS: usize = 4;
    pub const COOKIE_A: usize = 5;
    pub const COOKIE_B: usize = 6;
    /// Width of the 8-bit texture in the float tier.
    pub const COUNT_ALWAYS_8BIT: usize = 7;

    pub const POSITION_X: usize = 7;
    pub const POSITION_Y: usize = 8;
    pub const POSITION_Z: usize = 9;
    pub const RANGE: usize = 10;
    pub const SPOT_DIRECTION_X: usize = 11;
    pub const SPOT_DIRECTION_Y: usize = 12;
    pub const SPOT_DIRECTION_Z: usize = 13;
    pub const PROJ_MAT_00: usize = 14;
    pub const ATLAS_VIEWPORT_A: usize = 14;
    pub const ATLAS_VIEWPORT_B: usize = 15;
    pub const PROJ_MAT_33: usize = 29;
    pub const AREA_DATA_WIDTH_X: usize = 30;
    pub const AREA_DATA_WIDTH_Y: usize = 31;
    pub const AREA_DATA_WIDTH_Z: usize = 32;
    pub const AREA_DATA_HEIGHT_X: usize = 33;
    pub const AREA_DATA_HEIGHT_Y: usize = 34;
    pub const AREA_DATA_HEIGHT_Z: usize = 35;
    pub const COUNT: usize = 36;
    pub const COUNT_NO_AREA: usize = 30;
}

/// Texel columns of the float light texture (4 floats each).
pub mod texel_f32 {
    pub const POSITION_RANGE: usize = 0;
    pub const SPOT_DIRECTION: usize = 1;
    pub const PROJ_MAT_0: usize = 2;
    pub const ATLAS_VIEWPORT: usize = 2;
    pub const PROJ_MAT_1: usize = 3;
    pub const PROJ_MAT_2: usize = 4;
    pub const PROJ_MAT_3: usize = 5;
    pub const AREA_DATA_WIDTH: usize = 6;
    pub const AREA_DATA_HEIGHT: usize = 7;
    pub const COUNT: usize = 8;
}

const SPOT_ANGLE_EPSILON: f32 = 0.000001;
const SHADOW_BIAS_RANGE: (f32, f32) = (-1.0, 20.0);
const NORMAL_BIAS_RANGE: (f32, f32) = (0.0, 1.0);
const MATRIX_RANGE: (f32, f32) = (-2.0, 2.0);

/// Encoded light parameters plus the scales the shader needs to decode them.
pub struct LightsBuffer {
    encoding: LightEncoding,
    max_lights: usize,
    pub cookies_enabled: bool,
    pub shadows_enabled: bool,
    pub area_lights_enabled: bool,

    bounds_min: Vec3,
    bounds_delta: Vec3,
    max_attenuation: f32,
    inv_max_attenuation: f32,
    inv_max_color_value: f32,

    width8: usize,
    data8: Vec<u8>,
    data_f32: Vec<f32>,
    texture8: Option<TextureHandle>,
    texture_f32: Option<TextureHandle>,
}

impl LightsBuffer {
    pub fn new(encoding: LightEncoding, max_lights: usize, area_lights_enabled: bool) -> Self {
        let mut buffer = Self {
            encoding,
            max_lights,
            cookies_enabled: false,
            shadows_enabled: false,
            area_lights_enabled,
            bounds_min: Vec3::ZERO,
            bounds_delta: Vec3::ONE,
            max_attenuation: 1.0,
            inv_max_attenuation: 1.0,
            inv_max_color_value: 1.0,
            width8: 0,
            data8: Vec::new(),
            data_f32: Vec::new(),
            texture8: None,
            texture_f32: None,
        };
        buffer.allocate_cpu();
        buffer
    }

    fn allocate_cpu(&mut self) {
        self.width8 = match self.encoding {
            LightEncoding::Float => texel8::COUNT_ALWAYS_8BIT,
            LightEncoding::Rgba8 if self.area_lights_enabled => texel8::COUNT,
            LightEncoding::Rgba8 => texel8::COUNT_NO_AREA,
        };
        self.data8 = vec![0; self.width8 * 4 * self.max_lights];
        self.data_f32 = match self.encoding {
            LightEncoding::Float => vec![0.0; texel_f32::COUNT * 4 * self.max_lights],
            LightEncoding::Rgba8 => Vec::new(),
        };
    }

    pub fn encoding(&self) -> LightEncoding {
        self.encoding
    }

    pub fn max_lights(&self) -> usize {
        self.max_lights
    }

    /// Texel width of the 8-bit texture.
    pub fn width8(&self) -> usize {
        self.width8
    }

    /// Changing the area flag changes the 8-bit row width; GPU textures are recreated on the next upload.
    pub fn set_area_lights_enabled(&mut self, device: &mut dyn GraphicsDevice, enabled: bool) {
        if enabled != self.area_lights_enabled {
            self.area_lights_enabled = enabled;
            self.destroy(device);
            self.allocate_cpu();
        }
    }

    pub fn set_bounds(&mut self, min: Vec3, delta: Vec3) {
        self.bounds_min = min;
        self.bounds_delta = delta;
    }

    pub fn set_compression_ranges(&mut self, max_attenuation: f32, max_color_value: f32) {
        self.max_attenuation = max_attenuation;
        self.inv_max_attenuation = if max_attenuation > 0.0 { 1.0 / max_attenuation } else { 0.0 };
        self.inv_max_color_value = if max_color_value > 0.0 { 1.0 / max_color_value } else { 0.0 };
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bounds_min, self.bounds_delta)
    }

    pub fn inv_max_attenuation(&self) -> f32 {
        self.inv_max_attenuation
    }

    pub fn inv_max_color_value(&self) -> f32 {
        self.inv_max_color_value
    }

    pub fn data8(&self) -> &[u8] {
        &self.data8
    }

    pub fn data_f32(&self) -> &[f32] {
        &self.data_f32
    }

    pub fn texture8(&self) -> Option<TextureHandle> {
        self.texture8
    }

    pub fn texture_f32(&self) -> Option<TextureHandle> {
        self.texture_f32
    }

    fn row8(&mut self, index: usize) -> &mut [u8] {
        let stride = self.width8 * 4;
        &mut self.data8[index * stride..(index + 1) * stride]
    }

    fn row_f32(&mut self, index: usize) -> &mut [f32] {
        let stride = texel_f32::COUNT * 4;
        &mut self.data_f32[index * stride..(index + 1) * stride]
    }

    /// Encode `light` into row `index`. `atlas_viewport` is the light's normalized slot in the shadow
    /// and cookie atlases; without a slot the light can neither cast shadows nor use a cookie.
    pub fn add_light_data(&mut self, light: &Light, index: usize, gamma: GammaCorrection, atlas_viewport: Option<Vec4>) {
        if index == 0 || index >= self.max_lights {
            return;
        }
        let is_spot = light.kind.is_spot();
        let has_slot = atlas_viewport.is_some();
        let is_cookie = self.cookies_enabled && light.cookie.is_some() && has_slot;
        let is_area = self.area_lights_enabled && light.is_area();
        let cast_shadows = self.shadows_enabled && light.cast_shadows && has_slot;

        // spot lights project through a matrix, omni lights only need their slot
        let projection = match (&light.kind, atlas_viewport) {
            (LightKind::Spot { .. }, Some(rect)) if cast_shadows || is_cookie => {
                Some(viewport_matrix(rect) * ShadowCamera::spot(light).view_projection())
            }
            _ => None,
        };
        let omni_viewport = match (&light.kind, atlas_viewport) {
            (LightKind::Omni, Some(rect)) if cast_shadows || is_cookie => Some(rect),
            _ => None,
        };

        let inv_color = self.inv_max_color_value;
        let color = light.final_color(gamma) * inv_color;
        let row = self.row8(index);
        row.fill(0);

        let f = texel8::FLAGS * 4;
        row[f] = if is_spot { 255 } else { 0 };
        row[f + 1] = light.shape.code() * 64;
        row[f + 2] = match light.falloff {
            render_api::FalloffMode::Linear => 0,
            render_api::FalloffMode::InverseSquared => 255,
        };
        row[f + 3] = if cast_shadows { (light.shadow.intensity.clamp(0.0, 1.0) * 255.0) as u8 } else { 0 };

        let c = texel8::COLOR_A * 4;
        float_to_bytes(color.x, &mut row[c..c + 2]);
        float_to_bytes(color.y, &mut row[c + 2..c + 4]);
        float_to_bytes(color.z, &mut row[c + 4..c + 6]);
        row[c + 6] = if is_cookie { 255 } else { 0 };
        let dynamic = light.mask.contains(LightMask::AFFECT_DYNAMIC);
        let lightmapped = light.mask.contains(LightMask::AFFECT_LIGHTMAPPED);
        row[c + 7] = match (dynamic, lightmapped) {
            (true, true) => 127,
            (false, true) => 255,
            _ => 0,
        };

        if let LightKind::Spot { inner_cone_angle, outer_cone_angle } = light.kind {
            let s = texel8::SPOT_ANGLES * 4;
            let inner = inner_cone_angle.to_radians().cos() * (0.5 - SPOT_ANGLE_EPSILON) + 0.5;
            let outer = outer_cone_angle.to_radians().cos() * (0.5 - SPOT_ANGLE_EPSILON) + 0.5;
            float_to_bytes(inner, &mut row[s..s + 2]);
            float_to_bytes(outer, &mut row[s + 2..s + 4]);
        }

        if cast_shadows {
            let b = texel8::SHADOW_BIAS * 4;
            float_to_bytes_range(light.shadow.bias, SHADOW_BIAS_RANGE.0, SHADOW_BIAS_RANGE.1, &mut row[b..b + 2]);
            float_to_bytes_range(light.shadow.normal_bias, NORMAL_BIAS_RANGE.0, NORMAL_BIAS_RANGE.1, &mut row[b + 2..b + 4]);
        }

        if is_cookie {
            if let Some(cookie) = &light.cookie {
                let k = texel8::COOKIE_A * 4;
                row[k] = (cookie.intensity.clamp(0.0, 1.0) * 255.0).floor() as u8;
                let is_rgb = cookie.channel == render_api::CookieChannel::Rgb;
                row[k + 1] = if is_rgb { 255 } else { 0 };
                if !is_rgb {
                    let m = texel8::COOKIE_B * 4;
                    for (i, selected) in cookie.channel.mask().iter().enumerate() {
                        row[m + i] = if *selected { 255 } else { 0 };
                    }
                }
            }
        }

        let area_axes = if is_area { Some(light.area_axes()) } else { None };
        match self.encoding {
            LightEncoding::Float => self.add_float_data(light, index, projection, omni_viewport, area_axes),
            LightEncoding::Rgba8 => self.add_8bit_data(light, index, projection, omni_viewport, area_axes),
        }
    }

    fn add_float_data(
        &mut self,
        light: &Light,
        index: usize,
        projection: Option<Mat4>,
        omni_viewport: Option<Vec4>,
        area_axes: Option<(Vec3, Vec3)>,
    ) {
        let direction = light.direction();
        let row = self.row_f32(index);
        row.fill(0.0);
        let p = texel_f32::POSITION_RANGE * 4;
        row[p..p + 3].copy_from_slice(&light.position.to_array());
        row[p + 3] = light.range;
        if light.kind.is_spot() {
            let d = texel_f32::SPOT_DIRECTION * 4;
            row[d..d + 3].copy_from_slice(&direction.to_array());
        }
        if let Some(m) = projection {
            let start = texel_f32::PROJ_MAT_0 * 4;
            row[start..start + 16].copy_from_slice(&m.to_cols_array());
        }
        if let Some(vp) = omni_viewport {
            let a = texel_f32::ATLAS_VIEWPORT * 4;
            row[a] = vp.x;
            row[a + 1] = vp.y;
            row[a + 2] = vp.z / 3.0;
        }
        if let Some((width, height)) = area_axes {
            let w = texel_f32::AREA_DATA_WIDTH * 4;
            row[w..w + 3].copy_from_slice(&width.to_array());
            let h = texel_f32::AREA_DATA_HEIGHT * 4;
            row[h..h + 3].copy_from_slice(&height.to_array());
        }
    }

    fn add_8bit_data(
        &mut self,
        light: &Light,
        index: usize,
        projection: Option<Mat4>,
        omni_viewport: Option<Vec4>,
        area_axes: Option<(Vec3, Vec3)>,
    ) {
        let norm_pos = (light.position - self.bounds_min) / self.bounds_delta;
        let range = light.range * self.inv_max_attenuation;
        let max_atten = self.max_attenuation;
        let direction = light.direction();
        let is_spot = light.kind.is_spot();
        let row = self.row8(index);

        for (axis, texel) in [texel8::POSITION_X, texel8::POSITION_Y, texel8::POSITION_Z].into_iter().enumerate() {
            float_to_bytes(norm_pos[axis], &mut row[texel * 4..texel * 4 + 4]);
        }
        float_to_bytes(range, &mut row[texel8::RANGE * 4..texel8::RANGE * 4 + 4]);

        if is_spot {
            let texels = [texel8::SPOT_DIRECTION_X, texel8::SPOT_DIRECTION_Y, texel8::SPOT_DIRECTION_Z];
            for (axis, texel) in texels.into_iter().enumerate() {
                float_to_bytes_range(direction[axis], -1.0, 1.0, &mut row[texel * 4..texel * 4 + 4]);
            }
        }

        if let Some(m) = projection {
            let values = m.to_cols_array();
            for (i, v) in values.iter().enumerate() {
                let start = (texel8::PROJ_MAT_00 + i) * 4;
                let out = &mut row[start..start + 4];
                if i < 12 {
                    float_to_bytes_range(*v, MATRIX_RANGE.0, MATRIX_RANGE.1, out);
                } else {
                    float_to_mantissa_exponent(*v, out);
                }
            }
        }

        if let Some(vp) = omni_viewport {
            let a = texel8::ATLAS_VIEWPORT_A * 4;
            float_to_bytes(vp.x, &mut row[a..a + 2]);
            float_to_bytes(vp.y, &mut row[a + 2..a + 4]);
            let b = texel8::ATLAS_VIEWPORT_B * 4;
            float_to_bytes(vp.z / 3.0, &mut row[b..b + 2]);
        }

        if let Some((width, height)) = area_axes {
            let components = [width.x, width.y, width.z, height.x, height.y, height.z];
            for (i, v) in components.iter().enumerate() {
                let start = (texel8::AREA_DATA_WIDTH_X + i) * 4;
                float_to_bytes_range(*v, -max_atten, max_atten, &mut row[start..start + 4]);
            }
        }
    }

    /// Upload both CPU arrays, creating the textures on first use.
    pub fn upload_textures(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        let height = self.max_lights as u32;
        if self.texture8.is_none() {
            let desc = TextureDescriptor::data("lights_8bit", self.width8 as u32, height, TextureFormat::Rgba8Unorm);
            self.texture8 = Some(device.create_texture(&desc)?);
        }
        if self.encoding == LightEncoding::Float && self.texture_f32.is_none() {
            let desc = TextureDescriptor::data("lights_float", texel_f32::COUNT as u32, height, TextureFormat::Rgba32Float);
            self.texture_f32 = Some(device.create_texture(&desc)?);
        }
        if let Some(tex) = self.texture8 {
            device.write_texture(tex, &self.data8)?;
        }
        if let Some(tex) = self.texture_f32 {
            device.write_texture(tex, bytemuck::cast_slice(&self.data_f32))?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(tex) = self.texture8.take() {
            device.destroy_texture(tex);
        }
        if let Some(tex) = self.texture_f32.take() {
            device.destroy_texture(tex);
        }
    }

    fn texel_bytes(&self, index: usize, texel: usize, len: usize) -> &[u8] {
        let start = index * self.width8 * 4 + texel * 4;
        &self.data8[start..start + len]
    }

    /// Decoded world position of row `index` (8-bit tier).
    pub fn decode_position(&self, index: usize) -> Vec3 {
        let axis = |texel: usize| bytes_to_float(self.texel_bytes(index, texel, 4));
        let norm = Vec3::new(axis(texel8::POSITION_X), axis(texel8::POSITION_Y), axis(texel8::POSITION_Z));
        self.bounds_min + norm * self.bounds_delta
    }

    pub fn decode_range(&self, index: usize) -> f32 {
        bytes_to_float(self.texel_bytes(index, texel8::RANGE, 4)) * self.max_attenuation
    }

    pub fn decode_spot_direction(&self, index: usize) -> Vec3 {
        let axis = |texel: usize| bytes_to_float_range(self.texel_bytes(index, texel, 4), -1.0, 1.0);
        Vec3::new(
            axis(texel8::SPOT_DIRECTION_X),
            axis(texel8::SPOT_DIRECTION_Y),
            axis(texel8::SPOT_DIRECTION_Z),
        )
    }

    /// Linear color scaled back by the compression limit.
    pub fn decode_color(&self, index: usize) -> Vec3 {
        let bytes = self.texel_bytes(index, texel8::COLOR_A, 6);
        let scale = if self.inv_max_color_value > 0.0 { 1.0 / self.inv_max_color_value } else { 0.0 };
        Vec3::new(bytes_to_float(&bytes[0..2]), bytes_to_float(&bytes[2..4]), bytes_to_float(&bytes[4..6])) * scale
    }

    /// (cos inner, cos outer) of a spot row.
    pub fn decode_spot_cosines(&self, index: usize) -> (f32, f32) {
        let bytes = self.texel_bytes(index, texel8::SPOT_ANGLES, 4);
        let decode = |b: &[u8]| (bytes_to_float(b) - 0.5) / (0.5 - SPOT_ANGLE_EPSILON);
        (decode(&bytes[0..2]), decode(&bytes[2..4]))
    }

    pub fn decode_projection(&self, index: usize) -> Mat4 {
        let mut values = [0.0f32; 16];
        for (i, v) in values.iter_mut().enumerate() {
            let bytes = self.texel_bytes(index, texel8::PROJ_MAT_00 + i, 4);
            *v = if i < 12 {
                bytes_to_float_range(bytes, MATRIX_RANGE.0, MATRIX_RANGE.1)
            } else {
                mantissa_exponent_to_float(bytes)
            };
        }
        Mat4::from_cols_array(&values)
    }

    /// (flags texel bytes) of a row: is-spot, shape, falloff, shadow intensity.
    pub fn flags(&self, index: usize) -> [u8; 4] {
        let b = self.texel_bytes(index, texel8::FLAGS, 4);
        [b[0], b[1], b[2], b[3]]
    }

    pub fn light_mask_byte(&self, index: usize) -> u8 {
        self.texel_bytes(index, texel8::COLOR_B, 4)[3]
    }

    pub fn cookie_flag(&self, index: usize) -> u8 {
        self.texel_bytes(index, texel8::COLOR_B, 4)[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use approx::assert_abs_diff_eq;
    use render_api::{LightId, LightShape};

    fn buffer8() -> LightsBuffer {
        let mut b = LightsBuffer::new(LightEncoding::Rgba8, 8, false);
        b.set_bounds(Vec3::new(-10.0, -10.0, -10.0), Vec3::splat(20.0));
        b.set_compression_ranges(10.0 + 1e-6, 4.0 + 1e-6);
        b.shadows_enabled = true;
        b
    }

    #[test]
    fn row_width_follows_area_flag() {
        assert_eq!(LightsBuffer::new(LightEncoding::Rgba8, 4, true).width8(), 36);
        assert_eq!(LightsBuffer::new(LightEncoding::Rgba8, 4, false).width8(), 30);
        assert_eq!(LightsBuffer::new(LightEncoding::Float, 4, true).width8(), 7);
        assert_eq!(LightsBuffer::new(LightEncoding::Float, 4, true).data_f32().len(), 4 * 8 * 4);
    }

    #[test]
    fn position_and_range_round_trip() {
        let mut b = buffer8();
        let light = Light::omni(LightId(1), Vec3::new(3.25, -7.5, 9.0), 6.0);
        b.add_light_data(&light, 1, GammaCorrection::None, None);
        let p = b.decode_position(1);
        assert_abs_diff_eq!(p.x, 3.25, epsilon = 1e-5);
        assert_abs_diff_eq!(p.y, -7.5, epsilon = 1e-5);
        assert_abs_diff_eq!(p.z, 9.0, epsilon = 1e-5);
        assert_abs_diff_eq!(b.decode_range(1), 6.0, epsilon = 1e-5);
        assert_eq!(b.flags(1)[0], 0);
    }

    #[test]
    fn color_uses_two_bytes_per_channel() {
        let mut b = buffer8();
        let mut light = Light::omni(LightId(1), Vec3::ZERO, 1.0);
        light.color = Vec3::new(1.0, 0.5, 0.25);
        light.intensity = 2.0;
        b.add_light_data(&light, 2, GammaCorrection::None, None);
        let c = b.decode_color(2);
        assert_abs_diff_eq!(c.x, 2.0, epsilon = 4.0 / 65025.0);
        assert_abs_diff_eq!(c.y, 1.0, epsilon = 4.0 / 65025.0);
        assert_abs_diff_eq!(c.z, 0.5, epsilon = 4.0 / 65025.0);
    }

    #[test]
    fn spot_flags_cones_and_direction() {
        let mut b = buffer8();
        let mut light = Light::spot(LightId(1), Vec3::ZERO, 5.0, 20.0, 30.0).looking_along(Vec3::new(1.0, -1.0, 0.0));
        light.shape = LightShape::Disk;
        light.falloff = render_api::FalloffMode::InverseSquared;
        light.mask = LightMask::AFFECT_DYNAMIC | LightMask::AFFECT_LIGHTMAPPED;
        b.add_light_data(&light, 3, GammaCorrection::Srgb, None);
        assert_eq!(b.flags(3), [255, 128, 255, 0]);
        assert_eq!(b.light_mask_byte(3), 127);
        let (inner, outer) = b.decode_spot_cosines(3);
        assert_abs_diff_eq!(inner, 20f32.to_radians().cos(), epsilon = 1e-4);
        assert_abs_diff_eq!(outer, 30f32.to_radians().cos(), epsilon = 1e-4);
        let d = b.decode_spot_direction(3);
        assert_abs_diff_eq!(d.x, light.direction().x, epsilon = 1e-6);
        assert_abs_diff_eq!(d.y, light.direction().y, epsilon = 1e-6);
    }

    #[test]
    fn lightmapped_only_mask_byte() {
        let mut b = buffer8();
        let mut light = Light::omni(LightId(1), Vec3::ZERO, 1.0);
        light.mask = LightMask::AFFECT_LIGHTMAPPED;
        b.add_light_data(&light, 1, GammaCorrection::None, None);
        assert_eq!(b.light_mask_byte(1), 255);
    }

    #[test]
    fn shadow_caster_without_slot_is_unshadowed() {
        let mut b = buffer8();
        let light = Light::spot(LightId(1), Vec3::ZERO, 5.0, 10.0, 20.0).with_shadows(512);
        b.add_light_data(&light, 1, GammaCorrection::None, None);
        assert_eq!(b.flags(1)[3], 0);
        b.add_light_data(&light, 1, GammaCorrection::None, Some(Vec4::new(0.0, 0.0, 0.5, 0.5)));
        assert_eq!(b.flags(1)[3], 255);
    }

    #[test]
    fn spot_matrix_round_trips() {
        let mut b = buffer8();
        let light = Light::spot(LightId(1), Vec3::new(1.0, 4.0, 0.0), 8.0, 10.0, 25.0)
            .looking_along(Vec3::NEG_Y)
            .with_shadows(512);
        let rect = Vec4::new(0.5, 0.0, 0.5, 0.5);
        b.add_light_data(&light, 1, GammaCorrection::None, Some(rect));
        let expected = viewport_matrix(rect) * ShadowCamera::spot(&light).view_projection();
        let decoded = b.decode_projection(1);
        for (e, d) in expected.to_cols_array().iter().zip(decoded.to_cols_array().iter()) {
            assert!((e - d).abs() <= 1e-4 * e.abs().max(1.0), "{e} vs {d}");
        }
    }

    #[test]
    fn float_tier_stores_raw_values() {
        let mut b = LightsBuffer::new(LightEncoding::Float, 4, true);
        let mut light = Light::omni(LightId(1), Vec3::new(1.5, 2.5, -3.5), 7.0);
        light.shape = LightShape::Rect;
        b.add_light_data(&light, 1, GammaCorrection::None, None);
        let row = &b.data_f32()[texel_f32::COUNT * 4..texel_f32::COUNT * 8];
        assert_eq!(&row[0..4], &[1.5, 2.5, -3.5, 7.0]);
        let (w, _) = light.area_axes();
        assert_eq!(row[texel_f32::AREA_DATA_WIDTH * 4], w.x);
    }

    #[test]
    fn upload_creates_textures_of_row_width() {
        let mut device = HeadlessDevice::new();
        let mut b = LightsBuffer::new(LightEncoding::Float, 16, false);
        b.upload_textures(&mut device).unwrap();
        let desc8 = device.texture_desc(b.texture8().unwrap()).unwrap();
        assert_eq!((desc8.width, desc8.height), (7, 16));
        let desc_f = device.texture_desc(b.texture_f32().unwrap()).unwrap();
        assert_eq!((desc_f.width, desc_f.format), (8, TextureFormat::Rgba32Float));
    }

    #[test]
    fn index_zero_is_reserved() {
        let mut b = buffer8();
        let light = Light::omni(LightId(1), Vec3::ONE, 3.0);
        b.add_light_data(&light, 0, GammaCorrection::None, None);
        assert!(b.data8().iter().all(|&v| v == 0));
    }
}
