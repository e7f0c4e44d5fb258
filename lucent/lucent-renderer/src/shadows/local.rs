//! Spot and omni light shadows: one perspective face for spots, six cube faces for omnis.
//!
//! In clustered mode every face goes to the light's slot of the shared atlas and all of them are
//! rendered by a single pass; otherwise each light owns a map and every face gets its own pass.

use std::collections::HashMap;

use glam::Vec4;
use render_api::{Light, LightId, LightKind, Scene};

use super::{
    consume_face_update, cull_shadow_casters, needs_shadow_rendering, shadow_pass_ops, LightShadowMaps,
    LightTextureAtlas, ShadowCamera, ShadowView,
};
use crate::graph::{FrameGraph, PassHook, PassKind, RenderPass};
use crate::math::scale_bias_matrix;
use crate::renderer::FrameStats;

/// Faces of one local light for the current frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalShadowData {
    pub views: Vec<ShadowView>,
    /// Faces are placed in the shared atlas.
    pub clustered: bool,
}

#[derive(Default)]
pub struct ShadowRendererLocal {
    render_data: HashMap<LightId, LocalShadowData>,
}

impl ShadowRendererLocal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Omni face field of view in degrees. In the atlas the faces are widened so the shadow filter
    /// can sample `edge_pixels` texels beyond the tile without seams.
    pub fn omni_fov(atlas_resolution: u32, slot_size: f32, edge_pixels: u32) -> f32 {
        let tile_size = atlas_resolution as f32 * slot_size / 3.0;
        let texel_size = 2.0 / tile_size;
        let filter_size = texel_size * edge_pixels as f32;
        (1.0 + filter_size).atan().to_degrees() * 2.0
    }

    pub fn render_data(&self, light: LightId) -> Option<&LocalShadowData> {
        self.render_data.get(&light)
    }

    pub fn begin_frame(&mut self) {
        self.render_data.clear();
    }

    /// Set up the shadow cameras of `light` and cull its casters. `atlas` is given in clustered mode.
    pub fn cull(&mut self, light: &Light, scene: &Scene, candidates: &[usize], atlas: Option<&LightTextureAtlas>) {
        let mut data = LocalShadowData { views: Vec::new(), clustered: atlas.is_some() };
        match light.kind {
            LightKind::Spot { .. } => {
                let camera = ShadowCamera::spot(light);
                let viewport = match atlas {
                    Some(a) => match a.face_viewport(light, 0) {
                        Some(v) => v,
                        None => return,
                    },
                    None => Vec4::new(0.0, 0.0, 1.0, 1.0),
                };
                data.views.push(ShadowView::new(0, camera, viewport));
            }
            LightKind::Omni => {
                let fov = match atlas {
                    Some(a) => match a.viewport(light.id) {
                        Some(slot) => Self::omni_fov(a.shadow_atlas_resolution(), slot.z, a.shadow_edge_pixels()),
                        None => return,
                    },
                    None => 90.0,
                };
                for face in 0..6 {
                    let camera = ShadowCamera::omni_face(light, face, fov);
                    let mut view = match atlas.and_then(|a| a.face_viewport(light, face)) {
                        Some(v) => ShadowView::new(face, camera, v),
                        None => ShadowView::new(face, camera, Vec4::new(0.0, 0.0, 1.0, 1.0)),
                    };
                    if atlas.is_none() {
                        // cube faces are sampled by direction
                        view.shadow_matrix = scale_bias_matrix() * camera.view_projection();
                    }
                    data.views.push(view);
                }
            }
            LightKind::Directional { .. } => return,
        }
        for view in &mut data.views {
            view.casters = cull_shadow_casters(scene, candidates, &view.camera.frustum());
        }
        self.render_data.insert(light.id, data);
    }

    /// Work list of the shared atlas pass: every face of every culled light that needs rendering.
    fn clustered_jobs(&mut self, lights: &mut [Light], stats: &mut FrameStats) -> Vec<(LightId, usize)> {
        let mut jobs = Vec::new();
        for light in lights.iter_mut() {
            let Some(data) = self.render_data.get_mut(&light.id) else { continue };
            if !data.clustered || !needs_shadow_rendering(light) {
                for view in &mut data.views {
                    view.render = false;
                }
                continue;
            }
            for view in &mut data.views {
                view.render = consume_face_update(light, view.face);
                if view.render {
                    jobs.push((light.id, view.face));
                    stats.shadow_map_updates += 1;
                }
            }
        }
        jobs
    }

    /// The single atlas pass of clustered mode. Its `after` hook updates the light clusters, so the
    /// pass exists even without shadow work; it only opens a device pass when something renders.
    pub fn prepare_clustered_render_pass(
        &mut self,
        lights: &mut [Light],
        atlas: &LightTextureAtlas,
        stats: &mut FrameStats,
    ) -> RenderPass {
        let jobs = self.clustered_jobs(lights, stats);
        let mut pass = match atlas.shadow_atlas() {
            Some(map) if !jobs.is_empty() => {
                let (color, depth) = shadow_pass_ops(map, false);
                RenderPass::new("ClusteredLocalShadows", PassKind::ClusteredLocalShadows { jobs }, map.render_targets.first().copied())
                    .with_ops(color, depth)
            }
            _ => RenderPass::virtual_pass("ClusteredLocalShadows", PassKind::ClusteredLocalShadows { jobs: Vec::new() }),
        };
        pass.after = Some(PassHook::UpdateClusters);
        pass
    }

    /// One pass per face of every local light that owns a map and needs rendering.
    pub fn build_non_clustered_render_passes(
        &mut self,
        graph: &mut FrameGraph,
        lights: &mut [Light],
        maps: &LightShadowMaps,
        stats: &mut FrameStats,
    ) {
        for light in lights.iter_mut() {
            let Some(data) = self.render_data.get_mut(&light.id) else { continue };
            let Some(map) = maps.get(light.id) else { continue };
            if data.clustered || !needs_shadow_rendering(light) {
                for view in &mut data.views {
                    view.render = false;
                }
                continue;
            }
            let blur = light.kind.is_spot() && light.shadow.shadow_type.is_vsm();
            for view in &mut data.views {
                view.render = consume_face_update(light, view.face);
                if !view.render {
                    continue;
                }
                let target = map.render_targets.get(view.face).or(map.render_targets.first()).copied();
                let (color, depth) = shadow_pass_ops(map, true);
                let mut pass = RenderPass::new(
                    format!("LocalShadow{}_{}", light.id.0, view.face),
                    PassKind::LocalShadowFace { light: light.id, face: view.face },
                    target,
                )
                .with_ops(color, depth);
                if blur {
                    pass.after = Some(PassHook::VsmBlur { light: light.id, camera: None });
                }
                graph.add_render_pass(pass);
                stats.shadow_map_updates += 1;
            }
        }
    }
}
