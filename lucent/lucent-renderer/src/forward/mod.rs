//! Forward geometry pass: per-draw uniform blocks, non-clustered light selection and the
//! two-phase draw loop.

mod draw;
mod lights;

pub use draw::{ForwardRenderer, PreparedDraw};
pub use lights::{light_hash, ForwardLightContext, ForwardLightUniforms, GpuDirectionalLight, GpuLocalLight};

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};
use render_api::{Camera, Material};

/// Directional lights passed per draw in non-clustered mode.
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
/// Of which this many can have shadows.
pub const MAX_SHADOWED_DIRECTIONAL_LIGHTS: usize = 2;
/// Omni and spot lights passed per draw in non-clustered mode.
pub const MAX_LOCAL_LIGHTS: usize = 8;
pub const MAX_SHADOWED_LOCAL_LIGHTS: usize = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshUniforms {
    pub world: [[f32; 4]; 4],
    /// Inverse transpose of the world matrix, padded to 4x4.
    pub normal: [[f32; 4]; 4],
}

impl MeshUniforms {
    pub fn new(world: &Mat4) -> Self {
        let normal = Mat3::from_mat4(*world).inverse().transpose();
        Self { world: world.to_cols_array_2d(), normal: Mat4::from_mat3(normal).to_cols_array_2d() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    /// xyz = camera position
    pub camera_position: [f32; 4],
    /// (near, far, 0, 0)
    pub clip: [f32; 4],
}

impl ViewUniforms {
    pub fn new(camera: &Camera) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            clip: [camera.near_clip, camera.far_clip, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialUniforms {
    pub base_color: [f32; 4],
    /// (alpha test, 0, 0, 0)
    pub params: [f32; 4],
}

impl MaterialUniforms {
    pub fn new(material: &Material) -> Self {
        Self { base_color: material.base_color.to_array(), params: [material.alpha_test, 0.0, 0.0, 0.0] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use render_api::CameraId;

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let u = MeshUniforms::new(&world);
        assert_eq!(u.normal[0][0], 0.5);
        assert_eq!(u.normal[3][3], 1.0);
    }

    #[test]
    fn view_uniforms_match_camera() {
        let mut camera = Camera::new(CameraId(1), "main");
        camera.position = Vec3::new(0.0, 2.0, 5.0);
        let u = ViewUniforms::new(&camera);
        assert_eq!(u.camera_position, [0.0, 2.0, 5.0, 1.0]);
        assert_eq!(u.view_projection, camera.view_projection().to_cols_array_2d());
    }
}
