//! Per-frame scene data: cameras, materials, mesh instances, layers and render actions.
//! The host fills a [`Scene`] each frame and hands it to the backend.

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::handles::{MeshHandle, RenderTargetHandle};
use crate::light::{Light, LightId};

/// World-space axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self { min: center - half_extents, max: center + half_extents }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Grow to enclose `other`.
    pub fn add(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box enclosing this box after rotation and translation.
    pub fn transformed(&self, rotation: Quat, translation: Vec3) -> Aabb {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for c in self.corners() {
            let p = rotation * c + translation;
            min = min.min(p);
            max = max.max(p);
        }
        Aabb { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Vertical field of view in degrees.
    Perspective { fov: f32 },
    /// Half of the vertical view size in world units.
    Orthographic { ortho_height: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub enabled: bool,
    pub position: Vec3,
    /// Orientation; the camera looks along its local -Z axis.
    pub rotation: Quat,
    pub projection: Projection,
    pub aspect_ratio: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub clear_color: Vec4,
    pub clear_depth: f32,
    pub clear_stencil: u32,
    /// When false, back-face culling is disabled for everything this camera renders.
    pub cull_faces: bool,
    /// When false, mesh instances are not tested against the view frustum.
    pub frustum_culling: bool,
    pub culling_mask: u32,
    /// Normalized viewport rectangle (x, y, w, h).
    pub rect: Vec4,
    /// Request a copy of the scene color when the depth layer is reached.
    pub render_scene_color_map: bool,
    /// Request a copy of the scene depth when the depth layer is reached.
    pub render_scene_depth_map: bool,
}

impl Camera {
    pub fn new(id: CameraId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective { fov: 45.0 },
            aspect_ratio: 16.0 / 9.0,
            near_clip: 0.1,
            far_clip: 1000.0,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            clear_depth: 1.0,
            clear_stencil: 0,
            cull_faces: true,
            frustum_culling: true,
            culling_mask: u32::MAX,
            rect: Vec4::new(0.0, 0.0, 1.0, 1.0),
            render_scene_color_map: false,
            render_scene_depth_map: false,
        }
    }

    /// Point the camera at `target` from its current position.
    pub fn look_at(mut self, target: Vec3) -> Self {
        let forward = (target - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, forward);
        }
        self
    }

    /// True when the viewport covers the whole render target, so clears can be done by the pass.
    pub fn full_size_clear_rect(&self) -> bool {
        self.rect == Vec4::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.world_matrix().inverse()
    }

    /// Right-handed projection with a 0..1 depth range.
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov } => {
                Mat4::perspective_rh(fov.to_radians(), self.aspect_ratio, self.near_clip, self.far_clip)
            }
            Projection::Orthographic { ortho_height } => {
                let w = ortho_height * self.aspect_ratio;
                Mat4::orthographic_rh(-w, w, -ortho_height, ortho_height, self.near_clip, self.far_clip)
            }
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// The 8 corners of the view volume between `near` and `far`, in camera (local) space.
    /// Near plane corners first.
    pub fn frustum_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let (near_h, far_h) = match self.projection {
            Projection::Perspective { fov } => {
                let t = (fov.to_radians() * 0.5).tan();
                (t * near, t * far)
            }
            Projection::Orthographic { ortho_height } => (ortho_height, ortho_height),
        };
        let (near_w, far_w) = (near_h * self.aspect_ratio, far_h * self.aspect_ratio);
        [
            Vec3::new(near_w, -near_h, -near),
            Vec3::new(near_w, near_h, -near),
            Vec3::new(-near_w, near_h, -near),
            Vec3::new(-near_w, -near_h, -near),
            Vec3::new(far_w, -far_h, -far),
            Vec3::new(far_w, far_h, -far),
            Vec3::new(-far_w, far_h, -far),
            Vec3::new(-far_w, -far_h, -far),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: CompareFunc,
}

impl Default for DepthState {
    fn default() -> Self {
        Self { test: true, write: true, func: CompareFunc::LessEqual }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub func: CompareFunc,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub blend: BlendMode,
    pub depth: DepthState,
    pub cull: CullMode,
    pub stencil_front: Option<StencilState>,
    pub stencil_back: Option<StencilState>,
    pub depth_bias: f32,
    pub slope_depth_bias: f32,
    pub alpha_test: f32,
    /// Shader chunk name used to build program variants.
    pub shader: String,
    /// Base color factor passed to the material uniform block.
    pub base_color: Vec4,
}

impl Material {
    pub fn new(id: MaterialId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            blend: BlendMode::Opaque,
            depth: DepthState::default(),
            cull: CullMode::Back,
            stencil_front: None,
            stencil_back: None,
            depth_bias: 0.0,
            slope_depth_bias: 0.0,
            alpha_test: 0.0,
            shader: "standard".to_string(),
            base_color: Vec4::ONE,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.blend != BlendMode::Opaque
    }
}

/// A debug marker or other non-geometry command scheduled in the draw list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCommand {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshHandle,
    pub material: MaterialId,
    pub world: Mat4,
    /// World-space bounds.
    pub aabb: Aabb,
    pub visible: bool,
    pub cast_shadow: bool,
    /// When false, frustum culling is skipped for this instance.
    pub cull: bool,
    /// Layer/light mask. 0 means "no mask".
    pub mask: u32,
    pub is_static: bool,
    /// Bit set of object-level shader defines (skinning, instancing, ...).
    pub shader_defs: u32,
    /// Instance count for instanced draws; 0 or 1 means a single draw.
    pub instance_count: u32,
    /// When set, this draw call is a command and not geometry.
    pub command: Option<DrawCommand>,
}

impl MeshInstance {
    pub fn new(mesh: MeshHandle, material: MaterialId, world: Mat4, aabb: Aabb) -> Self {
        Self {
            mesh,
            material,
            world,
            aabb,
            visible: true,
            cast_shadow: true,
            cull: true,
            mask: 1,
            is_static: false,
            shader_defs: 0,
            instance_count: 0,
            command: None,
        }
    }

    pub fn command(label: impl Into<String>) -> Self {
        Self {
            command: Some(DrawCommand { label: label.into() }),
            cast_shadow: false,
            ..Self::new(MeshHandle(0), MaterialId(0), Mat4::IDENTITY, Aabb::default())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayerKind {
    #[default]
    Standard,
    /// Marks the point at which scene color/depth grabs happen.
    Depth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub enabled: bool,
    /// Indices into [`Scene::mesh_instances`].
    pub mesh_instances: Vec<usize>,
    /// Lights affecting this layer.
    pub lights: Vec<LightId>,
}

impl Layer {
    pub fn new(id: LayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: LayerKind::Standard,
            enabled: true,
            mesh_instances: Vec::new(),
            lights: Vec::new(),
        }
    }
}

/// One camera rendering one layer into one target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderAction {
    /// Index into [`LayerComposition::layers`].
    pub layer: usize,
    pub camera: CameraId,
    /// `None` renders into the back buffer.
    pub render_target: Option<RenderTargetHandle>,
    pub clear_color: bool,
    pub clear_depth: bool,
    pub clear_stencil: bool,
    /// First action in the frame using this camera.
    pub first_camera_use: bool,
    /// Last action in the frame using this camera.
    pub last_camera_use: bool,
    pub trigger_postprocess: bool,
}

impl RenderAction {
    pub fn new(layer: usize, camera: CameraId) -> Self {
        Self {
            layer,
            camera,
            render_target: None,
            clear_color: false,
            clear_depth: false,
            clear_stencil: false,
            first_camera_use: false,
            last_camera_use: false,
            trigger_postprocess: false,
        }
    }

    pub fn with_target(mut self, target: Option<RenderTargetHandle>) -> Self {
        self.render_target = target;
        self
    }

    pub fn clearing(mut self) -> Self {
        self.clear_color = true;
        self.clear_depth = true;
        self.clear_stencil = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerComposition {
    pub layers: Vec<Layer>,
    pub render_actions: Vec<RenderAction>,
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub lights: Vec<Light>,
    pub mesh_instances: Vec<MeshInstance>,
    pub cameras: Vec<Camera>,
    pub materials: Vec<Material>,
    pub composition: LayerComposition,
}

impl Scene {
    pub fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.iter().find(|m| m.id == id)
    }

    pub fn light_index(&self, id: LightId) -> Option<usize> {
        self.lights.iter().position(|l| l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_union_and_overlap() {
        let mut a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(!a.overlaps(&b));
        a.add(&b);
        assert_eq!(a.min, Vec3::ZERO);
        assert_eq!(a.max, Vec3::splat(3.0));
        assert!(a.contains_aabb(&b));
    }

    #[test]
    fn frustum_corners_scale_with_distance() {
        let cam = Camera::new(CameraId(0), "main");
        let c = cam.frustum_corners(1.0, 2.0);
        assert!((c[4].y.abs() - 2.0 * c[0].y.abs()).abs() < 1e-5);
        assert_eq!(c[0].z, -1.0);
        assert_eq!(c[7].z, -2.0);
    }
}
