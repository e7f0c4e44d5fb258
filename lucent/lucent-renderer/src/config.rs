//! Lucent configuration: clustered lighting grid, shadow atlas, light encoding, color space.

use std::path::Path;

use render_api::{GammaCorrection, ShadowType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Precision tier of the light parameter textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightEncoding {
    /// 8-bit flags texture + RGBA32F texture for positions, directions and matrices.
    Float,
    /// Everything quantized into a single 8-bit texture.
    Rgba8,
}

/// Upper bound on each axis of the cluster grid.
pub const MAX_CELLS_PER_AXIS: u32 = 255;

/// Clustered lighting parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Use the world-space light grid. When false, lights are passed as per-draw uniforms.
    pub clustered: bool,
    /// Grid resolution (x, y, z).
    pub cells: [u32; 3],
    pub max_lights_per_cell: u32,
    /// Capacity of the light buffer, including the reserved index 0. At most 255 (8-bit indices).
    pub max_lights: u32,
    pub shadows_enabled: bool,
    pub cookies_enabled: bool,
    pub area_lights_enabled: bool,
    pub shadow_atlas_resolution: u32,
    pub cookie_atlas_resolution: u32,
    /// Shadow type of the shared local-light atlas.
    pub shadow_type: ShadowType,
    /// Extra texels sampled around an atlas tile by the shadow filter.
    pub shadow_edge_pixels: u32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            clustered: true,
            cells: [10, 3, 10],
            max_lights_per_cell: 12,
            max_lights: 255,
            shadows_enabled: true,
            cookies_enabled: false,
            area_lights_enabled: false,
            shadow_atlas_resolution: 2048,
            cookie_atlas_resolution: 2048,
            shadow_type: ShadowType::Pcf3,
            shadow_edge_pixels: 3,
        }
    }
}

/// Limits of the non-clustered (per-draw uniform) light path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub max_directional_lights: usize,
    pub max_local_lights: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            max_directional_lights: crate::forward::MAX_DIRECTIONAL_LIGHTS,
            max_local_lights: crate::forward::MAX_LOCAL_LIGHTS,
        }
    }
}

/// Lucent renderer configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LucentConfig {
    pub lighting: LightingConfig,
    pub forward: ForwardConfig,
    pub gamma: GammaCorrection,
    /// Forces a light encoding tier; `None` picks from device capabilities.
    pub light_encoding: Option<LightEncoding>,
}

impl LucentConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.lighting;
        if l.cells.iter().any(|&c| c == 0 || c > MAX_CELLS_PER_AXIS) {
            return Err(ConfigError::Invalid(format!(
                "cells must be in 1..={}, got {:?}",
                MAX_CELLS_PER_AXIS, l.cells
            )));
        }
        if l.max_lights_per_cell == 0 {
            return Err(ConfigError::Invalid("max_lights_per_cell must be > 0".to_string()));
        }
        let texels = l.cells.iter().try_fold(l.max_lights_per_cell, |acc, &c| acc.checked_mul(c));
        if texels.is_none() {
            return Err(ConfigError::Invalid(format!(
                "cells {:?} with {} lights per cell overflow the cluster texture",
                l.cells, l.max_lights_per_cell
            )));
        }
        if !(2..=255).contains(&l.max_lights) {
            return Err(ConfigError::Invalid(format!("max_lights must be in 2..=255, got {}", l.max_lights)));
        }
        if l.shadow_atlas_resolution == 0 || l.cookie_atlas_resolution == 0 {
            return Err(ConfigError::Invalid("atlas resolutions must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = LucentConfig::from_toml_str(
            r#"
            light_encoding = "Rgba8"
            [lighting]
            cells = [4, 4, 4]
            clustered = false
            "#,
        )
        .unwrap();
        assert_eq!(config.lighting.cells, [4, 4, 4]);
        assert!(!config.lighting.clustered);
        assert_eq!(config.lighting.max_lights, 255);
        assert_eq!(config.light_encoding, Some(LightEncoding::Rgba8));
    }

    #[test]
    fn rejects_zero_cells() {
        let err = LucentConfig::from_toml_str("[lighting]\ncells = [0, 1, 1]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_oversized_grids() {
        let err = LucentConfig::from_toml_str("[lighting]\ncells = [65536, 65536, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut config = LucentConfig::default();
        config.lighting.cells = [255, 255, 255];
        config.lighting.max_lights_per_cell = 1024;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.lighting.max_lights_per_cell = 12;
        assert!(config.validate().is_ok());
    }
}
