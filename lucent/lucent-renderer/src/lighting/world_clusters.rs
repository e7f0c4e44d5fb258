//! World-space light grid: every cell lists (as 8-bit light indices) the lights whose box overlaps it.

use glam::{UVec3, Vec3, Vec4};
use render_api::{GammaCorrection, Light, LightMask, TextureHandle};

use super::lights_buffer::LightsBuffer;
use super::ClusterUniforms;
use crate::config::{LightEncoding, LightingConfig};
use crate::device::{GraphicsDevice, TextureDescriptor, TextureFormat};
use crate::error::Result;
use crate::shadows::LightTextureAtlas;

const COMPRESSION_EPSILON: f32 = 0.000001;
const MIN_BOUNDS_DELTA: f32 = 0.0001;

/// A light taking part in clustering this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterLight {
    /// Index into the frame's light list.
    pub light: usize,
    pub min: Vec3,
    pub max: Vec3,
}

pub struct WorldClusters {
    cells: UVec3,
    max_cell_light_count: u32,
    /// Pooled across frames; entry `i` has light-buffer index `i + 1`.
    lights: Vec<ClusterLight>,

    bounds_min: Vec3,
    bounds_max: Vec3,
    bounds_delta: Vec3,
    max_attenuation: f32,
    max_color_value: f32,

    counts: Vec<u32>,
    clusters: Vec<u8>,
    texture: Option<TextureHandle>,
    texture_width: u32,
    texture_height: u32,

    lights_buffer: LightsBuffer,
    dirty: bool,
    warned_light_overflow: bool,
    warned_cell_overflow: bool,
}

impl WorldClusters {
    pub fn new(encoding: LightEncoding, config: &LightingConfig) -> Self {
        let mut lights_buffer =
            LightsBuffer::new(encoding, config.max_lights as usize, config.area_lights_enabled);
        lights_buffer.cookies_enabled = config.cookies_enabled;
        lights_buffer.shadows_enabled = config.shadows_enabled;
        let mut clusters = Self {
            cells: UVec3::from_array(config.cells).max(UVec3::ONE),
            max_cell_light_count: config.max_lights_per_cell.max(1),
            lights: Vec::new(),
            bounds_min: Vec3::ZERO,
            bounds_max: Vec3::ONE,
            bounds_delta: Vec3::ONE,
            max_attenuation: 0.0,
            max_color_value: 0.0,
            counts: Vec::new(),
            clusters: Vec::new(),
            texture: None,
            texture_width: 0,
            texture_height: 0,
            lights_buffer,
            dirty: true,
            warned_light_overflow: false,
            warned_cell_overflow: false,
        };
        clusters.update_cells();
        clusters
    }

    pub fn cells(&self) -> UVec3 {
        self.cells
    }

    pub fn max_cell_light_count(&self) -> u32 {
        self.max_cell_light_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn lights_buffer(&self) -> &LightsBuffer {
        &self.lights_buffer
    }

    pub fn cluster_texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn texture_size(&self) -> (u32, u32) {
        (self.texture_width, self.texture_height)
    }

    /// Number of lights placed in the grid this frame.
    pub fn used_light_count(&self) -> usize {
        self.lights.len()
    }

    pub fn cluster_lights(&self) -> &[ClusterLight] {
        &self.lights
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bounds_min, self.bounds_max)
    }

    pub fn compression_limits(&self) -> (f32, f32) {
        (self.max_attenuation, self.max_color_value)
    }

    /// Raw cluster texture contents, `max_cell_light_count` bytes per cell.
    pub fn cluster_data(&self) -> &[u8] {
        &self.clusters
    }

    pub fn cell_index(&self, x: u32, y: u32, z: u32) -> usize {
        (x + self.cells.x * (z + y * self.cells.z)) as usize
    }

    /// Light indices registered in one cell.
    pub fn cell_lights(&self, x: u32, y: u32, z: u32) -> &[u8] {
        let cell = self.cell_index(x, y, z);
        let start = cell * self.max_cell_light_count as usize;
        &self.clusters[start..start + self.counts[cell] as usize]
    }

    /// Apply grid parameters; the cluster texture is only rebuilt if the grid actually changed.
    pub fn update_params(&mut self, config: &LightingConfig, device: &mut dyn GraphicsDevice) {
        let cells = UVec3::from_array(config.cells).max(UVec3::ONE);
        if cells != self.cells {
            self.cells = cells;
            self.dirty = true;
        }
        let max_per_cell = config.max_lights_per_cell.max(1);
        if max_per_cell != self.max_cell_light_count {
            self.max_cell_light_count = max_per_cell;
            self.dirty = true;
        }
        self.lights_buffer.cookies_enabled = config.cookies_enabled;
        self.lights_buffer.shadows_enabled = config.shadows_enabled;
        self.lights_buffer.set_area_lights_enabled(device, config.area_lights_enabled);
        if self.dirty {
            self.update_cells();
        }
    }

    fn update_cells(&mut self) {
        let num_cells = self.cells.x as usize * self.cells.y as usize * self.cells.z as usize;
        let per_cell = self.max_cell_light_count as usize;
        let total = num_cells * per_cell;
        let mut width = (total as f64).sqrt().ceil() as usize;
        width = width.div_ceil(per_cell) * per_cell;
        let height = total.div_ceil(width);
        self.texture_width = width as u32;
        self.texture_height = height as u32;
        self.counts = vec![0; num_cells];
        self.clusters = vec![0; width * height];
    }

    fn allocate_texture(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        if let Some(old) = self.texture.take() {
            device.destroy_texture(old);
        }
        let desc = TextureDescriptor::data("cluster_lights", self.texture_width, self.texture_height, TextureFormat::R8Unorm);
        self.texture = Some(device.create_texture(&desc)?);
        Ok(())
    }

    /// Gather the lights that take part in clustering. Index 0 is reserved, so at most
    /// `max_lights - 1` lights are kept.
    pub fn collect_lights(&mut self, lights: &[Light]) {
        let max_lights = self.lights_buffer.max_lights();
        self.lights.clear();
        for (i, light) in lights.iter().enumerate() {
            let runtime_light = light.mask.intersects(LightMask::AFFECT_DYNAMIC | LightMask::AFFECT_LIGHTMAPPED);
            let zero_angle_spot = light.kind.is_spot() && light.outer_cone_angle() == 0.0;
            if !light.enabled
                || light.kind.is_directional()
                || !light.visible_this_frame
                || light.intensity <= 0.0
                || !runtime_light
                || zero_angle_spot
            {
                continue;
            }
            if self.lights.len() + 1 < max_lights {
                let aabb = light.bounding_box();
                self.lights.push(ClusterLight { light: i, min: aabb.min, max: aabb.max });
            } else if !self.warned_light_overflow {
                self.warned_light_overflow = true;
                log::warn!("Clustered lighting: more than {} lights in the frame, ignoring some.", max_lights - 1);
            }
        }
    }

    pub fn evaluate_bounds(&mut self) {
        if let Some(first) = self.lights.first() {
            let (mut min, mut max) = (first.min, first.max);
            for l in &self.lights[1..] {
                min = min.min(l.min);
                max = max.max(l.max);
            }
            self.bounds_min = min;
            self.bounds_max = max;
        } else {
            self.bounds_min = Vec3::ZERO;
            self.bounds_max = Vec3::ONE;
        }
        self.bounds_delta = (self.bounds_max - self.bounds_min).max(Vec3::splat(MIN_BOUNDS_DELTA));
        self.lights_buffer.set_bounds(self.bounds_min, self.bounds_delta);
    }

    pub fn evaluate_compression_limits(&mut self, lights: &[Light], gamma: GammaCorrection) {
        let mut max_attenuation = 0.0f32;
        let mut max_color_value = 0.0f32;
        for cl in &self.lights {
            let light = &lights[cl.light];
            max_attenuation = max_attenuation.max(light.range);
            max_color_value = max_color_value.max(light.final_color(gamma).max_element());
        }
        self.max_attenuation = max_attenuation + COMPRESSION_EPSILON;
        self.max_color_value = max_color_value + COMPRESSION_EPSILON;
        self.lights_buffer.set_compression_ranges(self.max_attenuation, self.max_color_value);
    }

    /// Inclusive cell range covered by a box, each axis clamped to the grid.
    pub fn cell_range(&self, min: Vec3, max: Vec3) -> (UVec3, UVec3) {
        let scale = self.cells.as_vec3() / self.bounds_delta;
        let limit = self.cells - UVec3::ONE;
        let start = ((min - self.bounds_min) * scale).floor();
        let end = ((max - self.bounds_min) * scale).ceil() - Vec3::ONE;
        let start = start.max(Vec3::ZERO).as_uvec3().min(limit);
        let end = end.max(Vec3::ZERO).as_uvec3().min(limit).max(start);
        (start, end)
    }

    /// Encode every collected light and register it in each cell its box overlaps.
    pub fn update_clusters(&mut self, lights: &[Light], gamma: GammaCorrection, atlas: &LightTextureAtlas) {
        self.counts.fill(0);
        self.clusters.fill(0);
        let per_cell = self.max_cell_light_count as usize;
        let mut overflow = false;

        for i in 0..self.lights.len() {
            let cl = self.lights[i];
            let index = i + 1;
            let light = &lights[cl.light];
            self.lights_buffer.add_light_data(light, index, gamma, atlas.viewport(light.id));

            let (start, end) = self.cell_range(cl.min, cl.max);
            for y in start.y..=end.y {
                for z in start.z..=end.z {
                    for x in start.x..=end.x {
                        let cell = self.cell_index(x, y, z);
                        let count = self.counts[cell] as usize;
                        if count < per_cell {
                            self.clusters[cell * per_cell + count] = index as u8;
                            self.counts[cell] += 1;
                        } else {
                            overflow = true;
                        }
                    }
                }
            }
        }

        if overflow && !self.warned_cell_overflow {
            self.warned_cell_overflow = true;
            log::warn!("Clustered lighting: more than {} lights in a cell, ignoring some.", per_cell);
        }
    }

    /// Per-frame driver: rebuild the grid, encode lights and upload both the cluster and light textures.
    pub fn update(
        &mut self,
        lights: &[Light],
        gamma: GammaCorrection,
        atlas: &LightTextureAtlas,
        device: &mut dyn GraphicsDevice,
    ) -> Result<ClusterUniforms> {
        if self.dirty || self.texture.is_none() {
            self.allocate_texture(device)?;
            self.dirty = false;
        }
        self.collect_lights(lights);
        self.evaluate_bounds();
        self.evaluate_compression_limits(lights, gamma);
        self.update_clusters(lights, gamma, atlas);

        if let Some(texture) = self.texture {
            device.write_texture(texture, &self.clusters)?;
        }
        self.lights_buffer.upload_textures(device)?;
        log::trace!(
            "clusters updated: {} lights, bounds {:?}..{:?}",
            self.lights.len(),
            self.bounds_min,
            self.bounds_max
        );
        Ok(self.uniforms())
    }

    pub fn uniforms(&self) -> ClusterUniforms {
        let cells = self.cells.as_vec3();
        let lb = &self.lights_buffer;
        let light_rows = lb.max_lights().max(1) as f32;
        ClusterUniforms {
            bounds_min: self.bounds_min.extend(0.0).to_array(),
            bounds_delta: self.bounds_delta.extend(0.0).to_array(),
            cells_count_by_bounds_size: (cells / self.bounds_delta).extend(0.0).to_array(),
            cells_dot: [1.0, cells.x * cells.z, cells.x, self.max_cell_light_count as f32],
            cells_max: (cells - Vec3::ONE).extend(0.0).to_array(),
            texture_size: Vec4::new(
                self.texture_width as f32,
                1.0 / self.texture_width.max(1) as f32,
                1.0 / self.texture_height.max(1) as f32,
                0.0,
            )
            .to_array(),
            compression_limits: [self.max_attenuation, self.max_color_value, lb.inv_max_attenuation(), lb.inv_max_color_value()],
            lights_texture_inv_size: [
                1.0 / lb.width8() as f32,
                1.0 / light_rows,
                1.0 / super::lights_buffer::texel_f32::COUNT as f32,
                1.0 / light_rows,
            ],
            flags: [
                lb.shadows_enabled as u32,
                lb.cookies_enabled as u32,
                lb.area_lights_enabled as u32,
                match lb.encoding() {
                    LightEncoding::Float => 0,
                    LightEncoding::Rgba8 => 1,
                },
            ],
        }
    }

    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(texture) = self.texture.take() {
            device.destroy_texture(texture);
        }
        self.lights_buffer.destroy(device);
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use approx::assert_abs_diff_eq;
    use render_api::LightId;

    fn config(cells: [u32; 3], per_cell: u32, max_lights: u32) -> LightingConfig {
        LightingConfig { cells, max_lights_per_cell: per_cell, max_lights, ..LightingConfig::default() }
    }

    fn visible_omni(id: u64, pos: Vec3, range: f32) -> Light {
        let mut light = Light::omni(LightId(id), pos, range);
        light.visible_this_frame = true;
        light
    }

    #[test]
    fn texture_width_is_multiple_of_cell_capacity() {
        let clusters = WorldClusters::new(LightEncoding::Rgba8, &config([10, 3, 10], 12, 255));
        let (w, h) = clusters.texture_size();
        assert_eq!(w % 12, 0);
        assert!(w as usize * h as usize >= 300 * 12);
        assert_eq!(w, 60);
    }

    #[test]
    fn bounds_are_union_of_light_boxes() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([4, 4, 4], 4, 255));
        let lights = vec![visible_omni(1, Vec3::ZERO, 1.0), visible_omni(2, Vec3::new(5.0, 2.0, -3.0), 2.0)];
        clusters.collect_lights(&lights);
        clusters.evaluate_bounds();
        let (min, max) = clusters.bounds();
        assert_eq!(min, Vec3::new(-1.0, -1.0, -5.0));
        assert_eq!(max, Vec3::new(7.0, 4.0, 1.0));
    }

    #[test]
    fn empty_frame_uses_unit_bounds() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([4, 4, 4], 4, 255));
        clusters.collect_lights(&[]);
        clusters.evaluate_bounds();
        assert_eq!(clusters.bounds(), (Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn collect_skips_ineligible_lights() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([4, 4, 4], 4, 255));
        let mut dark = visible_omni(1, Vec3::ZERO, 1.0);
        dark.intensity = 0.0;
        let mut hidden = visible_omni(2, Vec3::ZERO, 1.0);
        hidden.visible_this_frame = false;
        let mut bake_only = visible_omni(3, Vec3::ZERO, 1.0);
        bake_only.mask = LightMask::BAKE;
        let mut zero_spot = Light::spot(LightId(4), Vec3::ZERO, 1.0, 0.0, 0.0);
        zero_spot.visible_this_frame = true;
        let mut sun = Light::directional(LightId(5));
        sun.visible_this_frame = true;
        let kept = visible_omni(6, Vec3::ZERO, 1.0);
        clusters.collect_lights(&[dark, hidden, bake_only, zero_spot, sun, kept]);
        assert_eq!(clusters.used_light_count(), 1);
        assert_eq!(clusters.cluster_lights()[0].light, 5);
    }

    #[test]
    fn compression_limits_include_epsilon() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([2, 2, 2], 4, 255));
        let mut a = visible_omni(1, Vec3::ZERO, 3.0);
        a.color = Vec3::new(0.5, 1.0, 0.25);
        a.intensity = 3.0;
        let b = visible_omni(2, Vec3::ONE, 7.0);
        let lights = vec![a, b];
        clusters.collect_lights(&lights);
        clusters.evaluate_compression_limits(&lights, GammaCorrection::None);
        let (atten, color) = clusters.compression_limits();
        assert_abs_diff_eq!(atten, 7.0 + 1e-6, epsilon = 1e-6);
        assert_abs_diff_eq!(color, 3.0 + 1e-6, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_box_lands_in_one_cell() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([4, 4, 4], 4, 255));
        clusters.bounds_min = Vec3::ZERO;
        clusters.bounds_delta = Vec3::splat(4.0);
        let p = Vec3::new(2.0, 0.5, 3.99);
        let (start, end) = clusters.cell_range(p, p);
        assert_eq!(start, UVec3::new(2, 0, 3));
        assert_eq!(end, start);
    }

    #[test]
    fn box_covers_expected_cells() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([4, 4, 4], 4, 255));
        clusters.bounds_min = Vec3::ZERO;
        clusters.bounds_delta = Vec3::splat(4.0);
        let (start, end) = clusters.cell_range(Vec3::new(0.5, 1.0, -3.0), Vec3::new(2.0, 1.5, 9.0));
        assert_eq!(start, UVec3::new(0, 1, 0));
        assert_eq!(end, UVec3::new(1, 1, 3));
    }

    #[test]
    fn lights_register_in_overlapped_cells_up_to_cap() {
        let mut device = HeadlessDevice::new();
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([2, 1, 1], 2, 255));
        let lights: Vec<Light> = (0..3).map(|i| visible_omni(i, Vec3::ZERO, 1.0)).collect();
        clusters.update(&lights, GammaCorrection::Srgb, &LightTextureAtlas::default(), &mut device).unwrap();
        assert_eq!(clusters.cell_lights(0, 0, 0), &[1, 2]);
        assert_eq!(clusters.cell_lights(1, 0, 0), &[1, 2]);
        let tex = clusters.cluster_texture().unwrap();
        assert_eq!(&device.texture_data(tex).unwrap()[..4], &[1, 2, 1, 2]);
    }

    #[test]
    fn update_params_only_dirties_on_change() {
        let mut device = HeadlessDevice::new();
        let cfg = config([4, 2, 4], 8, 64);
        let mut clusters = WorldClusters::new(LightEncoding::Float, &cfg);
        clusters.update(&[], GammaCorrection::Srgb, &LightTextureAtlas::default(), &mut device).unwrap();
        assert!(!clusters.is_dirty());
        clusters.update_params(&cfg, &mut device);
        clusters.update_params(&cfg, &mut device);
        assert!(!clusters.is_dirty());
        let mut changed = cfg.clone();
        changed.max_lights_per_cell = 6;
        clusters.update_params(&changed, &mut device);
        assert!(clusters.is_dirty());
        assert_eq!(clusters.texture_size().0 % 6, 0);
    }

    #[test]
    fn light_overflow_drops_high_indices() {
        let mut clusters = WorldClusters::new(LightEncoding::Rgba8, &config([1, 1, 1], 4, 4));
        let lights: Vec<Light> = (0..10).map(|i| visible_omni(i, Vec3::ZERO, 1.0)).collect();
        clusters.collect_lights(&lights);
        assert_eq!(clusters.used_light_count(), 3);
        assert_eq!(clusters.cluster_lights()[2].light, 2);
    }
}
