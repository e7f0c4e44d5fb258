//! Shadow rendering: shadow cameras, caster culling and the per-face draw loop shared by the
//! directional (cascaded) and local (spot/omni) renderers.

pub mod atlas;
pub mod cookies;
pub mod directional;
pub mod local;
pub mod shadow_map;

pub use atlas::{CookieAtlas, LightTextureAtlas};
pub use cookies::CookieRenderer;
pub use directional::{DirectionalShadowData, ShadowRendererDirectional};
pub use local::{LocalShadowData, ShadowRendererLocal};
pub use shadow_map::{LightShadowMaps, ShadowMap, ShadowMapCache, ShadowMapKey};

use std::f32::consts::FRAC_PI_2;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};
use render_api::{CullMode, Light, LightKind, Scene, ShadowType, ShadowUpdate};

use crate::device::{
    ClearRequest, ColorOps, DepthStencilOps, GraphicsDevice, PipelineState, ProgramDescriptor, ShaderPass, UniformSlot,
};
use crate::forward::MeshUniforms;
use crate::math::{viewport_matrix, Frustum};
use crate::renderer::FrameStats;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowProjection {
    /// Field of view in degrees, square aspect.
    Perspective { fov: f32 },
    Orthographic { half_size: f32 },
}

/// Camera a shadow face or cascade is rendered from. Looks along its local -Z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCamera {
    pub position: Vec3,
    pub rotation: Quat,
    pub projection: ShadowProjection,
    pub near: f32,
    pub far: f32,
}

/// Rotation turning a light orientation (shining along -Y) into a camera one (looking along -Z).
pub fn light_camera_rotation(light_rotation: Quat) -> Quat {
    light_rotation * Quat::from_rotation_x(-FRAC_PI_2)
}

const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

impl ShadowCamera {
    pub fn spot(light: &Light) -> Self {
        Self {
            position: light.position,
            rotation: light_camera_rotation(light.rotation),
            projection: ShadowProjection::Perspective { fov: light.outer_cone_angle() * 2.0 },
            near: light.range / 1000.0,
            far: light.range,
        }
    }

    pub fn omni_face(light: &Light, face: usize, fov: f32) -> Self {
        let (dir, up) = CUBE_FACES[face.min(5)];
        let view = Mat4::look_to_rh(Vec3::ZERO, dir, up);
        Self {
            position: light.position,
            rotation: Quat::from_mat4(&view.inverse()),
            projection: ShadowProjection::Perspective { fov },
            near: light.range / 1000.0,
            far: light.range,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            ShadowProjection::Perspective { fov } => Mat4::perspective_rh(fov.to_radians(), 1.0, self.near, self.far),
            ShadowProjection::Orthographic { half_size } => {
                Mat4::orthographic_rh(-half_size, half_size, -half_size, half_size, self.near, self.far)
            }
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// World to shadow-map texture coordinates inside `viewport`.
    pub fn shadow_matrix(&self, viewport: Vec4) -> Mat4 {
        viewport_matrix(viewport) * self.view_projection()
    }
}

/// One face (local lights) or cascade (directional lights) of a light's shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowView {
    pub face: usize,
    pub camera: ShadowCamera,
    /// Normalized rectangle inside the target map.
    pub viewport: Vec4,
    pub shadow_matrix: Mat4,
    /// Indices of visible shadow casters in `Scene::mesh_instances`.
    pub casters: Vec<usize>,
    /// False when the face keeps last frame's contents.
    pub render: bool,
}

impl ShadowView {
    pub fn new(face: usize, camera: ShadowCamera, viewport: Vec4) -> Self {
        Self { face, camera, viewport, shadow_matrix: camera.shadow_matrix(viewport), casters: Vec::new(), render: true }
    }
}

/// Uniforms bound while rendering a shadow face.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadowPassUniforms {
    pub view_projection: [[f32; 4]; 4],
    /// Light position and range, used by distance-based (omni/spot) shadows.
    pub light_position_range: [f32; 4],
    /// (bias, normal bias, vsm, omni)
    pub params: [f32; 4],
}

/// Light needs a shadow update this frame. A `ThisFrame` update is consumed.
pub fn needs_shadow_rendering(light: &mut Light) -> bool {
    let needs = light.enabled
        && light.cast_shadows
        && light.shadow.update_mode != ShadowUpdate::None
        && light.visible_this_frame;
    if light.shadow.update_mode == ShadowUpdate::ThisFrame {
        light.shadow.update_mode = ShadowUpdate::None;
    }
    needs
}

/// Face or cascade is re-rendered this frame. A `ThisFrame` override is consumed.
pub fn consume_face_update(light: &mut Light, face: usize) -> bool {
    let Some(mode) = light.shadow.update_overrides.as_mut().and_then(|o| o.get_mut(face)) else {
        return true;
    };
    match *mode {
        ShadowUpdate::None => false,
        ShadowUpdate::ThisFrame => {
            *mode = ShadowUpdate::None;
            true
        }
        ShadowUpdate::Realtime => true,
    }
}

/// Shadow casters among `candidates` visible from `frustum`. Instances with `cull = false` are
/// always kept.
pub fn cull_shadow_casters(scene: &Scene, candidates: &[usize], frustum: &Frustum) -> Vec<usize> {
    candidates
        .iter()
        .copied()
        .filter(|&i| {
            let mi = &scene.mesh_instances[i];
            mi.cast_shadow && mi.command.is_none() && (!mi.cull || frustum.intersects_aabb(&mi.aabb))
        })
        .collect()
}

/// Pass load/store ops of a shadow map target.
pub fn shadow_pass_ops(map: &ShadowMap, clear: bool) -> (ColorOps, DepthStencilOps) {
    let depth = DepthStencilOps {
        clear_depth: clear,
        clear_depth_value: 1.0,
        store_depth: map.format.is_depth(),
        ..DepthStencilOps::default()
    };
    let color = if map.format.is_depth() {
        ColorOps { clear: false, store: false, ..ColorOps::default() }
    } else {
        ColorOps { clear, clear_value: Vec4::ONE, store: true }
    };
    (color, depth)
}

fn kind_name(kind: &LightKind) -> &'static str {
    match kind {
        LightKind::Directional { .. } => "directional",
        LightKind::Omni => "omni",
        LightKind::Spot { .. } => "spot",
    }
}

/// Draw the casters of one shadow view into the current pass.
#[allow(clippy::too_many_arguments)]
pub(crate) fn render_shadow_view(
    device: &mut dyn GraphicsDevice,
    scene: &Scene,
    light: &Light,
    view: &ShadowView,
    shadow_type: ShadowType,
    color_target: bool,
    clear: bool,
    stats: &mut FrameStats,
) {
    device.set_viewport(view.viewport);
    device.set_scissor(view.viewport);
    if clear {
        device.clear(&ClearRequest { color: color_target.then_some(Vec4::ONE), depth: Some(1.0), stencil: None });
    }

    let uniforms = ShadowPassUniforms {
        view_projection: view.camera.view_projection().to_cols_array_2d(),
        light_position_range: light.position.extend(light.range).to_array(),
        params: [
            light.shadow.bias,
            light.shadow.normal_bias,
            if shadow_type.is_vsm() { 1.0 } else { 0.0 },
            if light.kind.is_omni() { 1.0 } else { 0.0 },
        ],
    };
    device.write_uniforms(UniformSlot::ShadowPass, bytemuck::bytes_of(&uniforms));

    let programs: Vec<_> = view
        .casters
        .iter()
        .map(|&i| {
            let mi = &scene.mesh_instances[i];
            let shader = scene.material(mi.material).map_or("standard", |m| m.shader.as_str());
            device.request_program(&ProgramDescriptor {
                pass: ShaderPass::Shadow,
                shader: shader.to_string(),
                variant: format!("shadow_{}_{:?}_{}_{}", shader, shadow_type, kind_name(&light.kind), mi.shader_defs),
                defines: vec![format!("SHADOW_{:?}", shadow_type).to_uppercase()],
            })
        })
        .collect();
    device.end_shader_batch();

    device.set_pipeline_state(&PipelineState::default());
    for (&i, program) in view.casters.iter().zip(programs) {
        let mi = &scene.mesh_instances[i];
        if !device.set_program(program) {
            log::error!("Failed to use shadow program for mesh {:?}", mi.mesh);
            continue;
        }
        let cull = scene.material(mi.material).map_or(CullMode::Back, |m| m.cull);
        device.set_cull_mode(cull);
        device.write_uniforms(UniformSlot::Mesh, bytemuck::bytes_of(&MeshUniforms::new(&mi.world)));
        device.draw(mi.mesh, mi.instance_count);
        stats.shadow_draw_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use render_api::{Aabb, LightId, MaterialId, MeshHandle, MeshInstance};

    #[test]
    fn spot_camera_looks_along_light() {
        let light = Light::spot(LightId(1), Vec3::new(0.0, 5.0, 0.0), 10.0, 10.0, 30.0).looking_along(Vec3::X);
        let cam = ShadowCamera::spot(&light);
        let f = cam.forward();
        assert_abs_diff_eq!(f.x, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(cam.near, 0.01, epsilon = 1e-7);
        assert_eq!(cam.projection, ShadowProjection::Perspective { fov: 60.0 });
    }

    #[test]
    fn omni_faces_cover_all_axes() {
        let light = Light::omni(LightId(1), Vec3::ZERO, 4.0);
        for (face, (dir, _)) in CUBE_FACES.iter().enumerate() {
            let cam = ShadowCamera::omni_face(&light, face, 90.0);
            assert!(cam.forward().abs_diff_eq(*dir, 1e-5), "face {face}");
        }
    }

    #[test]
    fn this_frame_updates_are_consumed() {
        let mut light = Light::spot(LightId(1), Vec3::ZERO, 1.0, 10.0, 20.0).with_shadows(256);
        light.visible_this_frame = true;
        light.shadow.update_mode = ShadowUpdate::ThisFrame;
        assert!(needs_shadow_rendering(&mut light));
        assert_eq!(light.shadow.update_mode, ShadowUpdate::None);
        assert!(!needs_shadow_rendering(&mut light));

        light.shadow.update_overrides = Some(vec![ShadowUpdate::ThisFrame, ShadowUpdate::None]);
        assert!(consume_face_update(&mut light, 0));
        assert!(!consume_face_update(&mut light, 0));
        assert!(!consume_face_update(&mut light, 1));
        assert!(consume_face_update(&mut light, 2));
    }

    #[test]
    fn caster_culling_respects_cull_flag() {
        let mut scene = Scene::default();
        let far_away = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 500.0), Vec3::ONE);
        let mut a = MeshInstance::new(MeshHandle(1), MaterialId(0), Mat4::IDENTITY, far_away);
        let mut b = a.clone();
        b.cull = false;
        let mut c = a.clone();
        c.aabb = Aabb::from_center_half_extents(Vec3::new(0.0, -5.0, 0.0), Vec3::ONE);
        a.cast_shadow = true;
        scene.mesh_instances = vec![a, b, c];
        let light = Light::spot(LightId(1), Vec3::ZERO, 10.0, 10.0, 40.0).looking_along(Vec3::NEG_Y);
        let frustum = ShadowCamera::spot(&light).frustum();
        assert_eq!(cull_shadow_casters(&scene, &[0, 1, 2], &frustum), vec![1, 2]);
    }
}
