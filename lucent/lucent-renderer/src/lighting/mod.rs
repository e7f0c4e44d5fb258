//! Clustered lighting: light grid, light parameter textures and the packing they rely on.

pub mod float_packing;
pub mod lights_buffer;
pub mod world_clusters;

pub use lights_buffer::LightsBuffer;
pub use world_clusters::{ClusterLight, WorldClusters};

use bytemuck::{Pod, Zeroable};

/// Uniform block read by the shader's cluster lookup. All members are vec4-aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ClusterUniforms {
    pub bounds_min: [f32; 4],
    pub bounds_delta: [f32; 4],
    /// cells / bounds_delta
    pub cells_count_by_bounds_size: [f32; 4],
    /// (1, cx*cz, cx, max lights per cell): dot with a cell coordinate gives the cell index.
    pub cells_dot: [f32; 4],
    pub cells_max: [f32; 4],
    /// (width, 1/width, 1/height, 0) of the cluster texture.
    pub texture_size: [f32; 4],
    /// (max attenuation, max color value, their inverses).
    pub compression_limits: [f32; 4],
    /// Inverse sizes of the 8-bit and float light textures.
    pub lights_texture_inv_size: [f32; 4],
    /// (shadows, cookies, area lights, 8-bit encoding)
    pub flags: [u32; 4],
}
