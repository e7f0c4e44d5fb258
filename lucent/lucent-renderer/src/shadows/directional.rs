//! Cascaded shadows for directional lights.
//!
//! Each camera sees its own set of cascades, so render data is kept per (light, camera). All
//! cascades of a light share one 2D map, tiled by [`ShadowRendererDirectional::cascade_viewport`].

use std::collections::HashMap;

use glam::{Vec3, Vec4};
use render_api::{Camera, CameraId, Light, LightId, LightKind, Scene};

use super::{
    consume_face_update, cull_shadow_casters, light_camera_rotation, needs_shadow_rendering, shadow_pass_ops,
    LightShadowMaps, ShadowCamera, ShadowProjection, ShadowView,
};
use crate::graph::{FrameGraph, PassHook, PassKind, RenderPass};
use crate::math::lerp;
use crate::renderer::FrameStats;

pub const MAX_CASCADES: usize = 4;

/// Depth extent of the camera used to find casters; anything along the light ray may cast.
const CULL_DEPTH: f32 = 100_000.0;

/// Margin kept in front of the nearest and behind the farthest caster.
const DEPTH_MARGIN: f32 = 0.1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectionalShadowData {
    /// Far distance of each cascade from the camera; unused entries hold the shadow far distance.
    pub split_distances: [f32; MAX_CASCADES],
    pub views: Vec<ShadowView>,
    pub cascade_count: usize,
}

#[derive(Default)]
pub struct ShadowRendererDirectional {
    render_data: HashMap<(LightId, CameraId), DirectionalShadowData>,
}

impl ShadowRendererDirectional {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_data(&self, light: LightId, camera: CameraId) -> Option<&DirectionalShadowData> {
        self.render_data.get(&(light, camera))
    }

    pub fn begin_frame(&mut self) {
        self.render_data.clear();
    }

    /// Far distance of each cascade: linear and logarithmic splits blended by `distribution`.
    pub fn generate_split_distances(cascades: usize, distribution: f32, near: f32, far: f32) -> [f32; MAX_CASCADES] {
        let count = cascades.clamp(1, MAX_CASCADES);
        let mut splits = [far; MAX_CASCADES];
        let near = near.max(f32::EPSILON);
        for i in 1..count {
            let fraction = i as f32 / count as f32;
            let linear = near + (far - near) * fraction;
            let log = near * (far / near).powf(fraction);
            splits[i - 1] = lerp(linear, log, distribution);
        }
        splits
    }

    /// Tile of cascade `index` in a map holding `count` cascades.
    pub fn cascade_viewport(count: usize, index: usize) -> Vec4 {
        if count <= 1 {
            return Vec4::new(0.0, 0.0, 1.0, 1.0);
        }
        match index {
            0 => Vec4::new(0.0, 0.0, 0.5, 0.5),
            1 => Vec4::new(0.0, 0.5, 0.5, 0.5),
            2 => Vec4::new(0.5, 0.0, 0.5, 0.5),
            _ => Vec4::new(0.5, 0.5, 0.5, 0.5),
        }
    }

    /// Fit one shadow camera per cascade around the slices of `camera`'s frustum and cull casters.
    pub fn cull(&mut self, light: &Light, scene: &Scene, candidates: &[usize], camera: &Camera) {
        let LightKind::Directional { cascades, cascade_distribution, shadow_distance } = light.kind else {
            return;
        };
        let count = (cascades as usize).clamp(1, MAX_CASCADES);
        let near = camera.near_clip;
        let far = camera.far_clip.min(shadow_distance);
        let split_distances = Self::generate_split_distances(count, cascade_distribution, near, far);

        let rotation = light_camera_rotation(light.rotation);
        let (right, up, back) = (rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z);
        let resolution = light.shadow.resolution.max(1) as f32;
        let camera_world = camera.world_matrix();

        let mut views = Vec::with_capacity(count);
        for cascade in 0..count {
            let slice_near = if cascade == 0 { near } else { split_distances[cascade - 1] };
            let slice_far = split_distances[cascade];
            let corners = camera.frustum_corners(slice_near, slice_far).map(|c| camera_world.transform_point3(c));
            let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
            let radius = corners.iter().map(|c| c.distance(center)).fold(0.0f32, f32::max).max(1e-4);

            // snap to shadow texels so the cascade does not shimmer while the camera moves
            let size_ratio = 0.25 * resolution / radius;
            let x = (center.dot(up) * size_ratio).ceil() / size_ratio;
            let y = (center.dot(right) * size_ratio).ceil() / size_ratio;
            let snapped = up * x + right * y + back * center.dot(back);

            let culling_camera = ShadowCamera {
                position: snapped,
                rotation,
                projection: ShadowProjection::Orthographic { half_size: radius },
                near: -CULL_DEPTH,
                far: CULL_DEPTH,
            };
            let casters = cull_shadow_casters(scene, candidates, &culling_camera.frustum());

            let view_matrix = culling_camera.view_matrix();
            let mut min_z = f32::MAX;
            let mut max_z = f32::MIN;
            for &i in &casters {
                for corner in scene.mesh_instances[i].aabb.corners() {
                    let z = view_matrix.transform_point3(corner).z;
                    min_z = min_z.min(z);
                    max_z = max_z.max(z);
                }
            }
            if min_z > max_z {
                min_z = -radius;
                max_z = radius;
            }

            let shadow_camera = ShadowCamera {
                position: snapped + back * (max_z + DEPTH_MARGIN),
                near: 0.01,
                far: (max_z - min_z) + 2.0 * DEPTH_MARGIN,
                ..culling_camera
            };
            let mut view = ShadowView::new(cascade, shadow_camera, Self::cascade_viewport(count, cascade));
            view.casters = casters;
            views.push(view);
        }

        self.render_data
            .insert((light.id, camera.id), DirectionalShadowData { split_distances, views, cascade_count: count });
    }

    /// One pass per shadow-casting directional light in `indices` that needs rendering for `camera`.
    pub fn build_frame_graph(
        &mut self,
        graph: &mut FrameGraph,
        lights: &mut [Light],
        indices: &[usize],
        camera: CameraId,
        maps: &LightShadowMaps,
        stats: &mut FrameStats,
    ) {
        for &index in indices {
            let Some(light) = lights.get_mut(index) else { continue };
            let Some(data) = self.render_data.get_mut(&(light.id, camera)) else { continue };
            let Some(map) = maps.get(light.id) else { continue };
            if !needs_shadow_rendering(light) {
                continue;
            }

            let mut skipped = false;
            for view in &mut data.views {
                view.render = consume_face_update(light, view.face);
                skipped |= !view.render;
            }
            if data.views.iter().all(|v| !v.render) {
                continue;
            }

            let (color, depth) = shadow_pass_ops(map, !skipped);
            let mut pass = RenderPass::new(
                format!("DirectionalShadow{}", light.id.0),
                PassKind::DirectionalShadow { light: light.id, camera, clear_per_cascade: skipped },
                map.render_targets.first().copied(),
            )
            .with_ops(color, depth);
            if light.shadow.shadow_type.is_vsm() {
                pass.after = Some(PassHook::VsmBlur { light: light.id, camera: Some(camera) });
            }
            graph.add_render_pass(pass);
            stats.shadow_map_updates += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use approx::assert_abs_diff_eq;
    use glam::Mat4;
    use render_api::{Aabb, MaterialId, MeshHandle, MeshInstance, ShadowType, ShadowUpdate};

    fn sun(cascades: u32) -> Light {
        let mut light = Light::directional(LightId(1)).looking_along(Vec3::new(0.3, -1.0, 0.2)).with_shadows(1024);
        light.kind = LightKind::Directional { cascades, cascade_distribution: 0.5, shadow_distance: 60.0 };
        light.visible_this_frame = true;
        light
    }

    fn scene_with_box() -> Scene {
        let mut scene = Scene::default();
        let aabb = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        scene.mesh_instances.push(MeshInstance::new(MeshHandle(1), MaterialId(0), Mat4::IDENTITY, aabb));
        scene
    }

    #[test]
    fn split_distances_are_monotone_and_end_at_far() {
        let splits = ShadowRendererDirectional::generate_split_distances(4, 0.5, 0.1, 60.0);
        for pair in splits.windows(2) {
            assert!(pair[0] < pair[1] || pair[1] == 60.0);
        }
        assert_eq!(splits[3], 60.0);

        let linear = ShadowRendererDirectional::generate_split_distances(2, 0.0, 0.0, 10.0);
        assert_abs_diff_eq!(linear[0], 5.0, epsilon = 1e-4);
        assert_eq!(linear[1..], [10.0; 3]);
    }

    #[test]
    fn cascade_tiles() {
        assert_eq!(ShadowRendererDirectional::cascade_viewport(1, 0), Vec4::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(ShadowRendererDirectional::cascade_viewport(2, 1), Vec4::new(0.0, 0.5, 0.5, 0.5));
        assert_eq!(ShadowRendererDirectional::cascade_viewport(4, 3), Vec4::new(0.5, 0.5, 0.5, 0.5));
    }

    #[test]
    fn far_distance_limited_by_shadow_distance() {
        let mut renderer = ShadowRendererDirectional::new();
        let light = sun(3);
        let camera = Camera::new(CameraId(1), "main");
        renderer.cull(&light, &scene_with_box(), &[0], &camera);
        let data = renderer.render_data(light.id, camera.id).unwrap();
        assert_eq!(data.cascade_count, 3);
        assert_eq!(data.split_distances[2], 60.0);
        assert_eq!(data.views.len(), 3);
    }

    #[test]
    fn cascade_camera_encloses_casters() {
        let mut renderer = ShadowRendererDirectional::new();
        let light = sun(1);
        let camera = Camera::new(CameraId(1), "main");
        let scene = scene_with_box();
        renderer.cull(&light, &scene, &[0], &camera);
        let view = &renderer.render_data(light.id, camera.id).unwrap().views[0];
        assert_eq!(view.casters, vec![0]);
        let vm = view.camera.view_matrix();
        for corner in scene.mesh_instances[0].aabb.corners() {
            let depth = -vm.transform_point3(corner).z;
            assert!(depth >= view.camera.near && depth <= view.camera.far, "depth {depth}");
        }
    }

    #[test]
    fn empty_casters_span_bounding_sphere() {
        let mut renderer = ShadowRendererDirectional::new();
        let light = sun(1);
        let camera = Camera::new(CameraId(1), "main");
        renderer.cull(&light, &Scene::default(), &[], &camera);
        let view = &renderer.render_data(light.id, camera.id).unwrap().views[0];
        let ShadowProjection::Orthographic { half_size } = view.camera.projection else {
            panic!("cascade camera must be orthographic");
        };
        assert_abs_diff_eq!(view.camera.far, 2.0 * half_size + 0.2, epsilon = 1e-2);
    }

    #[test]
    fn skipped_cascade_switches_to_per_cascade_clears() {
        let mut device = HeadlessDevice::new();
        let mut maps = LightShadowMaps::default();
        let mut light = sun(2);
        light.shadow.shadow_type = ShadowType::Vsm16;
        light.shadow.update_overrides = Some(vec![ShadowUpdate::None, ShadowUpdate::Realtime]);
        maps.ensure(&mut device, &light).unwrap();
        let camera = Camera::new(CameraId(1), "main");
        let mut renderer = ShadowRendererDirectional::new();
        renderer.cull(&light, &scene_with_box(), &[0], &camera);

        let mut graph = FrameGraph::new();
        let mut stats = FrameStats::default();
        let mut lights = vec![light];
        renderer.build_frame_graph(&mut graph, &mut lights, &[0], camera.id, &maps, &mut stats);
        assert_eq!(graph.len(), 1);
        let pass = &graph.passes()[0];
        assert_eq!(
            pass.kind,
            PassKind::DirectionalShadow { light: LightId(1), camera: CameraId(1), clear_per_cascade: true }
        );
        assert!(!pass.clears_anything());
        assert_eq!(pass.after, Some(PassHook::VsmBlur { light: LightId(1), camera: Some(CameraId(1)) }));
        let views = &renderer.render_data(LightId(1), CameraId(1)).unwrap().views;
        assert!(!views[0].render && views[1].render);
    }

    #[test]
    fn no_pass_when_update_mode_is_none() {
        let mut device = HeadlessDevice::new();
        let mut maps = LightShadowMaps::default();
        let mut light = sun(1);
        light.shadow.update_mode = ShadowUpdate::None;
        maps.ensure(&mut device, &light).unwrap();
        let camera = Camera::new(CameraId(1), "main");
        let mut renderer = ShadowRendererDirectional::new();
        renderer.cull(&light, &scene_with_box(), &[0], &camera);
        let mut graph = FrameGraph::new();
        let mut lights = vec![light];
        renderer.build_frame_graph(&mut graph, &mut lights, &[0], camera.id, &maps, &mut FrameStats::default());
        assert!(graph.is_empty());
    }
}
