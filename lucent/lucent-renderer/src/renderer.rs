//! Frame orchestration: visibility, shadow setup, frame graph assembly and execution.

use std::collections::HashMap;

use render_api::{
    Camera, CameraId, Layer, LayerKind, Light, LightId, RenderAction, RenderTargetHandle, Scene, TextureHandle,
};

use crate::config::{LightEncoding, LucentConfig};
use crate::device::{
    ClearRequest, ColorOps, DepthStencilOps, GraphicsDevice, PassDescriptor, ProgramDescriptor, ProgramHandle,
    ShaderPass, TextureSlot, UniformSlot,
};
use crate::error::{RenderError, Result};
use crate::forward::{light_hash, ForwardLightContext, ForwardRenderer, ViewUniforms};
use crate::graph::{FrameGraph, PassHook, PassKind, RenderPass};
use crate::lighting::{ClusterUniforms, WorldClusters};
use crate::math::Frustum;
use crate::shadows::{
    render_shadow_view, CookieRenderer, LightShadowMaps, LightTextureAtlas, ShadowRendererDirectional,
    ShadowRendererLocal,
};

/// Counters of the last rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Device render passes begun, including blur passes.
    pub passes: usize,
    pub draw_calls: usize,
    pub shadow_draw_calls: usize,
    pub material_switches: usize,
    /// Shadow faces, cascade sets and atlas faces scheduled for rendering.
    pub shadow_map_updates: usize,
    pub clustered_lights: usize,
    /// Mesh instances rejected by visibility, mask or frustum tests.
    pub culled_instances: usize,
}

/// Host callbacks run around camera rendering. All methods default to no-ops.
pub trait FrameObserver {
    fn on_pre_render(&mut self, _camera: &Camera) {}
    fn on_post_render(&mut self, _camera: &Camera) {}
    fn on_postprocess(&mut self, _camera: &Camera, _target: Option<RenderTargetHandle>, _device: &mut dyn GraphicsDevice) {}
}

impl FrameObserver for () {}

pub struct Renderer<D: GraphicsDevice> {
    device: D,
    config: LucentConfig,
    encoding: LightEncoding,
    clusters: WorldClusters,
    atlas: LightTextureAtlas,
    shadow_maps: LightShadowMaps,
    local_shadows: ShadowRendererLocal,
    directional_shadows: ShadowRendererDirectional,
    cookies: CookieRenderer,
    forward: ForwardRenderer,
    graph: FrameGraph,
    /// Culled mesh instance indices, per render action.
    visible: Vec<Vec<usize>>,
    /// Shadow-casting directional lights rendered by each camera.
    camera_dir_shadow_lights: HashMap<CameraId, Vec<usize>>,
    cluster_uniforms: ClusterUniforms,
    stats: FrameStats,
}

impl<D: GraphicsDevice> Renderer<D> {
    pub fn new(device: D, config: LucentConfig) -> Result<Self> {
        config.validate().map_err(|e| RenderError::InvalidConfig(e.to_string()))?;
        let caps = device.capabilities();
        let encoding = config.light_encoding.unwrap_or(if caps.float_textures {
            LightEncoding::Float
        } else {
            LightEncoding::Rgba8
        });
        log::info!(
            "Lucent renderer: {:?} light encoding, clustered lighting {}",
            encoding,
            if config.lighting.clustered { "on" } else { "off" }
        );
        Ok(Self {
            device,
            clusters: WorldClusters::new(encoding, &config.lighting),
            config,
            encoding,
            atlas: LightTextureAtlas::new(),
            shadow_maps: LightShadowMaps::default(),
            local_shadows: ShadowRendererLocal::new(),
            directional_shadows: ShadowRendererDirectional::new(),
            cookies: CookieRenderer::new(),
            forward: ForwardRenderer::new(),
            graph: FrameGraph::new(),
            visible: Vec::new(),
            camera_dir_shadow_lights: HashMap::new(),
            cluster_uniforms: ClusterUniforms::default(),
            stats: FrameStats::default(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &LucentConfig {
        &self.config
    }

    /// Replace the configuration. The light encoding chosen at creation stays in effect, and the
    /// light buffer capacity cannot change after creation.
    pub fn set_config(&mut self, config: LucentConfig) -> Result<()> {
        config.validate().map_err(|e| RenderError::InvalidConfig(e.to_string()))?;
        if config.lighting.max_lights != self.config.lighting.max_lights {
            return Err(RenderError::InvalidConfig(format!(
                "max_lights is fixed at creation ({}), got {}",
                self.config.lighting.max_lights, config.lighting.max_lights
            )));
        }
        if config.light_encoding.is_some_and(|e| e != self.encoding) {
            log::warn!("Light encoding is fixed at creation, keeping {:?}", self.encoding);
        }
        if config.lighting.clustered != self.config.lighting.clustered {
            self.forward.clear_program_cache();
        }
        self.config = config;
        Ok(())
    }

    pub fn light_encoding(&self) -> LightEncoding {
        self.encoding
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn clusters(&self) -> &WorldClusters {
        &self.clusters
    }

    pub fn cluster_uniforms(&self) -> &ClusterUniforms {
        &self.cluster_uniforms
    }

    pub fn atlas(&self) -> &LightTextureAtlas {
        &self.atlas
    }

    pub fn shadow_maps(&self) -> &LightShadowMaps {
        &self.shadow_maps
    }

    pub fn local_shadows(&self) -> &ShadowRendererLocal {
        &self.local_shadows
    }

    pub fn directional_shadows(&self) -> &ShadowRendererDirectional {
        &self.directional_shadows
    }

    /// Passes built by [`Renderer::build_frame_graph`]; empty once executed.
    pub fn frame_graph(&self) -> &FrameGraph {
        &self.graph
    }

    /// Mesh instances of render action `action` that survived culling this frame.
    pub fn visible_instances(&self, action: usize) -> &[usize] {
        self.visible.get(action).map_or(&[], Vec::as_slice)
    }

    /// Camera of an action whose layer and camera are both enabled.
    fn action_camera<'s>(scene: &'s Scene, action: &RenderAction) -> Option<&'s Camera> {
        let layer = scene.composition.layers.get(action.layer)?;
        let camera = scene.camera(action.camera)?;
        (layer.enabled && camera.enabled).then_some(camera)
    }

    fn cull_instances(scene: &Scene, layer: &Layer, camera: &Camera) -> (Vec<usize>, usize) {
        let frustum = Frustum::from_view_projection(&camera.view_projection());
        let mut visible = Vec::with_capacity(layer.mesh_instances.len());
        let mut culled = 0;
        for &i in &layer.mesh_instances {
            let Some(mi) = scene.mesh_instances.get(i) else { continue };
            if mi.command.is_some() {
                visible.push(i);
                continue;
            }
            let mask_passes = mi.mask == 0 || mi.mask & camera.culling_mask != 0;
            let in_view = !camera.frustum_culling || !mi.cull || frustum.intersects_aabb(&mi.aabb);
            if mi.visible && mask_passes && in_view {
                visible.push(i);
            } else {
                culled += 1;
            }
        }
        (visible, culled)
    }

    fn cull_lights(lights: &mut [Light], camera: &Camera) {
        let frustum = Frustum::from_view_projection(&camera.view_projection());
        for light in lights.iter_mut() {
            if light.enabled && !light.visible_this_frame && !light.kind.is_directional() {
                let (center, radius) = light.bounding_sphere();
                light.visible_this_frame = frustum.contains_sphere(center, radius);
            }
        }
    }

    /// Per-frame culling and shadow setup. Writes light visibility back into `scene`.
    pub fn update(&mut self, scene: &mut Scene) -> Result<()> {
        self.stats = FrameStats::default();
        self.directional_shadows.begin_frame();
        self.local_shadows.begin_frame();
        let clustered = self.config.lighting.clustered;
        if clustered {
            self.clusters.update_params(&self.config.lighting, &mut self.device);
        }

        for light in &mut scene.lights {
            light.visible_this_frame = light.enabled && light.kind.is_directional();
        }

        self.visible.clear();
        self.camera_dir_shadow_lights.clear();
        for action in &scene.composition.render_actions {
            let Some(camera) = Self::action_camera(scene, action) else {
                self.visible.push(Vec::new());
                continue;
            };
            let layer = &scene.composition.layers[action.layer];
            let (visible, culled) = Self::cull_instances(scene, layer, camera);
            self.visible.push(visible);
            self.stats.culled_instances += culled;

            let dir_lights = self.camera_dir_shadow_lights.entry(camera.id).or_default();
            for id in &layer.lights {
                let Some(index) = scene.light_index(*id) else { continue };
                let light = &scene.lights[index];
                if light.enabled && light.cast_shadows && light.kind.is_directional() && !dir_lights.contains(&index) {
                    dir_lights.push(index);
                }
            }
        }
        for action in &scene.composition.render_actions {
            if let Some(camera) = Self::action_camera(scene, action) {
                let camera = camera.clone();
                Self::cull_lights(&mut scene.lights, &camera);
            }
        }

        if !clustered {
            // a light that never had a map gets one rendered even when out of view
            for light in &mut scene.lights {
                if light.enabled
                    && light.cast_shadows
                    && !light.visible_this_frame
                    && !light.kind.is_directional()
                    && !self.shadow_maps.contains(light.id)
                {
                    light.visible_this_frame = true;
                }
            }
        }

        self.allocate_shadow_maps(scene)?;
        if clustered {
            self.atlas.update(&mut self.device, &scene.lights, &self.config.lighting)?;
        }

        let casters: Vec<usize> = scene
            .mesh_instances
            .iter()
            .enumerate()
            .filter(|(_, mi)| mi.visible && mi.cast_shadow && mi.command.is_none())
            .map(|(i, _)| i)
            .collect();

        for light in &scene.lights {
            if !light.enabled || !light.cast_shadows || !light.visible_this_frame || light.kind.is_directional() {
                continue;
            }
            if clustered {
                if self.config.lighting.shadows_enabled {
                    self.local_shadows.cull(light, scene, &casters, Some(&self.atlas));
                }
            } else if self.shadow_maps.contains(light.id) {
                self.local_shadows.cull(light, scene, &casters, None);
            }
        }

        for (camera_id, indices) in &self.camera_dir_shadow_lights {
            let Some(camera) = scene.camera(*camera_id) else { continue };
            for &index in indices {
                self.directional_shadows.cull(&scene.lights[index], scene, &casters, camera);
            }
        }
        Ok(())
    }

    /// Give every light rendering into its own map a matching one; pool the rest.
    fn allocate_shadow_maps(&mut self, scene: &Scene) -> Result<()> {
        let clustered = self.config.lighting.clustered;
        let mut wanted: Vec<LightId> = Vec::new();
        for light in &scene.lights {
            let own_map = light.kind.is_directional() || (!clustered && light.visible_this_frame);
            if light.enabled && light.cast_shadows && own_map {
                self.shadow_maps.ensure(&mut self.device, light)?;
                wanted.push(light.id);
            }
        }
        self.shadow_maps.release_unused(|id| wanted.contains(&id));
        Ok(())
    }

    /// Assemble this frame's passes from the scene's render actions and compile them.
    pub fn build_frame_graph(&mut self, scene: &mut Scene) {
        self.graph.reset();

        if self.config.lighting.clustered {
            let cookies = if self.config.lighting.cookies_enabled {
                CookieRenderer::prepare_pass(&scene.lights, &self.atlas)
            } else {
                RenderPass::virtual_pass("ClusteredCookies", PassKind::ClusteredCookies)
            };
            self.graph.add_render_pass(cookies);
            let shadows = self.local_shadows.prepare_clustered_render_pass(&mut scene.lights, &self.atlas, &mut self.stats);
            self.graph.add_render_pass(shadows);
        } else {
            self.local_shadows.build_non_clustered_render_passes(
                &mut self.graph,
                &mut scene.lights,
                &self.shadow_maps,
                &mut self.stats,
            );
        }

        let actions = scene.composition.render_actions.clone();
        let enabled: Vec<bool> = actions.iter().map(|a| Self::action_camera(scene, a).is_some()).collect();
        let depth_layer: Vec<bool> = actions
            .iter()
            .map(|a| scene.composition.layers.get(a.layer).is_some_and(|l| l.kind == LayerKind::Depth))
            .collect();
        let needs_dir_shadows = |a: &RenderAction, map: &HashMap<CameraId, Vec<usize>>| {
            a.first_camera_use && map.get(&a.camera).is_some_and(|l| !l.is_empty())
        };

        let mut start = 0;
        let mut new_start = true;
        let mut target = None;
        for i in 0..actions.len() {
            if !enabled[i] {
                continue;
            }
            let action = &actions[i];
            let Some(camera) = scene.camera(action.camera).cloned() else { continue };
            let is_depth = depth_layer[i];
            let grabs = camera.render_scene_color_map || camera.render_scene_depth_map;
            let is_grab = is_depth && grabs;

            // directional shadows are rendered right before the first use of the camera
            if action.first_camera_use {
                if let Some(indices) = self.camera_dir_shadow_lights.get(&camera.id) {
                    self.directional_shadows.build_frame_graph(
                        &mut self.graph,
                        &mut scene.lights,
                        indices,
                        camera.id,
                        &self.shadow_maps,
                        &mut self.stats,
                    );
                }
            }

            if new_start {
                new_start = false;
                start = i;
                target = action.render_target;
            }

            let next_index = (i + 1..actions.len()).find(|&n| enabled[n]);
            let next = next_index.map(|n| &actions[n]);
            let next_is_grab = next_index.is_some_and(|n| depth_layer[n] && grabs);
            let next_needs_dir_shadows = next.is_some_and(|n| needs_dir_shadows(n, &self.camera_dir_shadow_lights));
            let target_changes = next.map_or(true, |n| n.render_target != target);

            if target_changes || next_needs_dir_shadows || next_is_grab || is_grab {
                let depth_only = is_depth && start == i;
                if !depth_only {
                    self.add_main_render_pass(scene, &actions, target, start, i);
                }
                if is_grab {
                    self.graph.add_render_pass(RenderPass::scene_grab(
                        format!("SceneGrab{i}"),
                        i,
                        action.render_target,
                        camera.render_scene_color_map,
                        camera.render_scene_depth_map,
                    ));
                }
                if action.trigger_postprocess {
                    self.graph.add_render_pass(RenderPass::virtual_pass(
                        format!("Postprocess{i}"),
                        PassKind::Postprocess { action: i },
                    ));
                }
                new_start = true;
            }
        }

        self.graph.compile();
        log::debug!("frame graph built: {} passes, {} real", self.graph.len(), self.graph.passes().iter().filter(|p| p.real).count());
    }

    fn add_main_render_pass(
        &mut self,
        scene: &Scene,
        actions: &[RenderAction],
        target: Option<RenderTargetHandle>,
        start: usize,
        end: usize,
    ) {
        let first = &actions[start];
        let last = &actions[end];
        let mut pass = RenderPass::new(format!("Main{start}-{end}"), PassKind::Main { start, end }, target);
        if let Some(camera) = scene.camera(first.camera) {
            if camera.full_size_clear_rect() {
                pass.set_clears(
                    first.clear_color.then_some(camera.clear_color),
                    first.clear_depth.then_some(camera.clear_depth),
                    first.clear_stencil.then_some(camera.clear_stencil),
                );
            }
        }
        if first.first_camera_use {
            pass.before = Some(PassHook::CameraPreRender(first.camera));
        }
        if last.last_camera_use {
            pass.after = Some(PassHook::CameraPostRender(last.camera));
        }
        self.graph.add_render_pass(pass);
    }

    /// Run the compiled frame graph and reset it.
    pub fn execute(&mut self, scene: &Scene, observer: &mut dyn FrameObserver) -> Result<()> {
        let passes = self.graph.take_passes();
        for pass in &passes {
            if let Some(hook) = pass.before {
                self.run_hook(hook, scene, observer)?;
            }
            if pass.real && !pass.skip_start {
                self.device.begin_pass(&pass.descriptor())?;
                self.stats.passes += 1;
            }
            self.execute_pass(pass, scene, observer);
            if pass.real && !pass.skip_end {
                self.device.end_pass();
            }
            if let Some(hook) = pass.after {
                self.run_hook(hook, scene, observer)?;
            }
        }
        Ok(())
    }

    /// Cull, build and execute one frame.
    pub fn render(&mut self, scene: &mut Scene, observer: &mut dyn FrameObserver) -> Result<()> {
        self.update(scene)?;
        self.build_frame_graph(scene);
        self.execute(scene, observer)?;
        log::trace!("frame stats: {:?}", self.stats);
        Ok(())
    }

    fn run_hook(&mut self, hook: PassHook, scene: &Scene, observer: &mut dyn FrameObserver) -> Result<()> {
        match hook {
            PassHook::UpdateClusters => self.update_clusters(scene)?,
            PassHook::CameraPreRender(id) => {
                if let Some(camera) = scene.camera(id) {
                    observer.on_pre_render(camera);
                }
            }
            PassHook::CameraPostRender(id) => {
                if let Some(camera) = scene.camera(id) {
                    observer.on_post_render(camera);
                }
            }
            PassHook::VsmBlur { light, .. } => self.blur_vsm(scene, light)?,
        }
        Ok(())
    }

    fn update_clusters(&mut self, scene: &Scene) -> Result<()> {
        self.cluster_uniforms = self.clusters.update(&scene.lights, self.config.gamma, &self.atlas, &mut self.device)?;
        self.stats.clustered_lights = self.clusters.used_light_count();
        self.device.write_uniforms(UniformSlot::Cluster, bytemuck::bytes_of(&self.cluster_uniforms));
        let lights_buffer = self.clusters.lights_buffer();
        self.device.bind_texture(TextureSlot::LightsU8, lights_buffer.texture8());
        self.device.bind_texture(TextureSlot::LightsF32, lights_buffer.texture_f32());
        self.device.bind_texture(TextureSlot::Clusters, self.clusters.cluster_texture());
        self.device.bind_texture(TextureSlot::ShadowAtlas, self.atlas.shadow_atlas().map(|m| m.texture));
        self.device.bind_texture(TextureSlot::CookieAtlas, self.atlas.cookie_atlas().map(|c| c.texture));
        Ok(())
    }

    /// Separable blur of a variance shadow map through a pooled map of the same kind.
    fn blur_vsm(&mut self, scene: &Scene, light_id: LightId) -> Result<()> {
        let Some(light) = scene.lights.iter().find(|l| l.id == light_id) else { return Ok(()) };
        let Some(map) = self.shadow_maps.get(light_id) else { return Ok(()) };
        let (source, target) = (map.texture, map.render_targets.first().copied());
        let shadow_type = map.key.shadow_type;

        let temp = self.shadow_maps.cache_mut().get(&mut self.device, light)?;
        let [horizontal, vertical] = ["horizontal", "vertical"].map(|direction| {
            self.device.request_program(&ProgramDescriptor {
                pass: ShaderPass::VsmBlur,
                shader: "vsm_blur".to_string(),
                variant: format!("vsm_blur_{direction}_{shadow_type:?}"),
                defines: vec![format!("BLUR_{}", direction.to_uppercase())],
            })
        });
        self.device.end_shader_batch();

        let result = self
            .blur_pass(temp.render_targets.first().copied(), source, horizontal)
            .and_then(|_| self.blur_pass(target, temp.texture, vertical));
        self.shadow_maps.cache_mut().add(temp);
        result
    }

    fn blur_pass(&mut self, target: Option<RenderTargetHandle>, source: TextureHandle, program: ProgramHandle) -> Result<()> {
        self.device.begin_pass(&PassDescriptor {
            label: "VsmBlur".to_string(),
            target,
            color: ColorOps { clear: false, store: true, ..ColorOps::default() },
            depth_stencil: DepthStencilOps::default(),
        })?;
        self.stats.passes += 1;
        self.device.set_viewport(glam::Vec4::new(0.0, 0.0, 1.0, 1.0));
        if self.device.set_program(program) {
            self.device.blit(source);
        } else {
            log::error!("Failed to use VSM blur program");
        }
        self.device.end_pass();
        Ok(())
    }

    fn execute_pass(&mut self, pass: &RenderPass, scene: &Scene, observer: &mut dyn FrameObserver) {
        match &pass.kind {
            PassKind::ClusteredCookies => {
                if pass.real {
                    self.cookies.render(&mut self.device, &scene.lights, &self.atlas);
                }
            }
            PassKind::ClusteredLocalShadows { jobs } => {
                let Some(map) = self.atlas.shadow_atlas() else { return };
                let color_target = !map.format.is_depth();
                for (light_id, face) in jobs {
                    let Some(light) = scene.lights.iter().find(|l| l.id == *light_id) else { continue };
                    let Some(data) = self.local_shadows.render_data(*light_id) else { continue };
                    let Some(view) = data.views.iter().find(|v| v.face == *face) else { continue };
                    render_shadow_view(
                        &mut self.device,
                        scene,
                        light,
                        view,
                        map.key.shadow_type,
                        color_target,
                        true,
                        &mut self.stats,
                    );
                }
            }
            PassKind::LocalShadowFace { light: light_id, face } => {
                let Some(light) = scene.lights.iter().find(|l| l.id == *light_id) else { return };
                let Some(map) = self.shadow_maps.get(*light_id) else { return };
                let Some(data) = self.local_shadows.render_data(*light_id) else { return };
                let Some(view) = data.views.iter().find(|v| v.face == *face) else { return };
                render_shadow_view(
                    &mut self.device,
                    scene,
                    light,
                    view,
                    map.key.shadow_type,
                    !map.format.is_depth(),
                    false,
                    &mut self.stats,
                );
            }
            PassKind::DirectionalShadow { light: light_id, camera, clear_per_cascade } => {
                let Some(light) = scene.lights.iter().find(|l| l.id == *light_id) else { return };
                let Some(map) = self.shadow_maps.get(*light_id) else { return };
                let Some(data) = self.directional_shadows.render_data(*light_id, *camera) else { return };
                for view in data.views.iter().filter(|v| v.render) {
                    render_shadow_view(
                        &mut self.device,
                        scene,
                        light,
                        view,
                        map.key.shadow_type,
                        !map.format.is_depth(),
                        *clear_per_cascade,
                        &mut self.stats,
                    );
                }
            }
            PassKind::Main { start, end } => self.render_main(scene, *start, *end, observer),
            PassKind::SceneGrab { color, depth, .. } => {
                self.device.grab_scene(pass.target, *color, *depth);
            }
            PassKind::Postprocess { action } => {
                let Some(action) = scene.composition.render_actions.get(*action) else { return };
                if let Some(camera) = scene.camera(action.camera) {
                    observer.on_postprocess(camera, action.render_target, &mut self.device);
                }
            }
        }
    }

    /// Render actions `start..=end` into the open pass.
    fn render_main(&mut self, scene: &Scene, start: usize, end: usize, observer: &mut dyn FrameObserver) {
        let clustered = self.config.lighting.clustered;
        for index in start..=end {
            let Some(action) = scene.composition.render_actions.get(index) else { continue };
            let Some(camera) = Self::action_camera(scene, action) else { continue };
            if index != start && action.first_camera_use {
                observer.on_pre_render(camera);
            }

            self.device.set_viewport(camera.rect);
            self.device.set_scissor(camera.rect);
            let folded = index == start && camera.full_size_clear_rect();
            if !folded && (action.clear_color || action.clear_depth || action.clear_stencil) {
                self.device.clear(&ClearRequest {
                    color: action.clear_color.then_some(camera.clear_color),
                    depth: action.clear_depth.then_some(camera.clear_depth),
                    stencil: action.clear_stencil.then_some(camera.clear_stencil),
                });
            }
            self.device.write_uniforms(UniformSlot::View, bytemuck::bytes_of(&ViewUniforms::new(camera)));

            let draws = self.visible.get(index).map_or(&[][..], Vec::as_slice);
            if clustered {
                self.forward.render_forward(&mut self.device, scene, draws, camera, 0, None, &mut self.stats);
            } else {
                let layer = &scene.composition.layers[action.layer];
                let layer_lights: Vec<usize> = layer.lights.iter().filter_map(|id| scene.light_index(*id)).collect();
                let hash = light_hash(&scene.lights, &layer_lights);
                let context = ForwardLightContext {
                    lights: &scene.lights,
                    layer_lights: &layer_lights,
                    camera: camera.id,
                    gamma: self.config.gamma,
                    directional_shadows: &self.directional_shadows,
                    local_shadows: &self.local_shadows,
                    shadow_maps: &self.shadow_maps,
                    max_directional: self.config.forward.max_directional_lights,
                    max_local: self.config.forward.max_local_lights,
                };
                self.forward.render_forward(&mut self.device, scene, draws, camera, hash, Some(&context), &mut self.stats);
            }

            if index != end && action.last_camera_use {
                observer.on_post_render(camera);
            }
        }
    }

    /// Release every GPU resource owned by the renderer.
    pub fn destroy(&mut self) {
        self.clusters.destroy(&mut self.device);
        self.atlas.destroy(&mut self.device);
        self.shadow_maps.destroy(&mut self.device);
        self.graph.reset();
    }
}
