//! End-to-end frames on the headless device.

use glam::{Mat4, Vec3};
use lucent_renderer::device::headless::DeviceCommand;
use lucent_renderer::{HeadlessDevice, LightingConfig, LucentConfig, PassKind, RenderError, Renderer};
use render_api::{
    Aabb, Camera, CameraId, Layer, LayerId, LayerKind, Light, LightId, Material, MaterialId, MeshHandle,
    MeshInstance, RenderAction, Scene,
};

const CAMERA: CameraId = CameraId(1);

fn floor() -> MeshInstance {
    let aabb = Aabb::new(Vec3::new(-10.0, -1.0, -20.0), Vec3::new(10.0, 0.0, 0.0));
    MeshInstance::new(MeshHandle(1), MaterialId(0), Mat4::IDENTITY, aabb)
}

/// One camera at the origin looking down -Z, one layer holding every light and instance.
fn scene(lights: Vec<Light>, mesh_instances: Vec<MeshInstance>) -> Scene {
    let mut layer = Layer::new(LayerId(0), "world");
    layer.lights = lights.iter().map(|l| l.id).collect();
    layer.mesh_instances = (0..mesh_instances.len()).collect();
    let mut action = RenderAction::new(0, CAMERA).clearing();
    action.first_camera_use = true;
    action.last_camera_use = true;

    let mut scene = Scene {
        lights,
        mesh_instances,
        cameras: vec![Camera::new(CAMERA, "main")],
        materials: vec![Material::new(MaterialId(0), "lit")],
        ..Scene::default()
    };
    scene.composition.layers.push(layer);
    scene.composition.render_actions.push(action);
    scene
}

fn renderer(config: LucentConfig) -> Renderer<HeadlessDevice> {
    Renderer::new(HeadlessDevice::new(), config).unwrap()
}

fn shadowed_spot() -> Light {
    Light::spot(LightId(2), Vec3::new(0.0, 5.0, -10.0), 10.0, 20.0, 30.0)
        .looking_along(Vec3::NEG_Y)
        .with_shadows(512)
}

fn is_shadow_pass(kind: &PassKind) -> bool {
    matches!(
        kind,
        PassKind::ClusteredLocalShadows { .. } | PassKind::LocalShadowFace { .. } | PassKind::DirectionalShadow { .. }
    )
}

#[test]
fn zero_lights_leave_the_cluster_texture_empty() {
    let mut renderer = renderer(LucentConfig::default());
    let mut scene = scene(Vec::new(), vec![floor()]);
    renderer.render(&mut scene, &mut ()).unwrap();

    let texture = renderer.clusters().cluster_texture().unwrap();
    let data = renderer.device().texture_data(texture).unwrap();
    assert!(!data.is_empty());
    assert!(data.iter().all(|&b| b == 0));
    assert_eq!(renderer.stats().clustered_lights, 0);
    assert_eq!(renderer.stats().draw_calls, 1);
}

#[test]
fn shadowed_spot_gets_one_shadow_pass_before_the_main_pass() {
    let mut renderer = renderer(LucentConfig::default());
    let lights = vec![Light::directional(LightId(1)), shadowed_spot()];
    let mut scene = scene(lights, vec![floor()]);
    renderer.update(&mut scene).unwrap();
    renderer.build_frame_graph(&mut scene);

    let passes = renderer.frame_graph().passes();
    let first_main = passes.iter().position(|p| matches!(p.kind, PassKind::Main { .. })).unwrap();
    let shadow_passes: Vec<_> = passes[..first_main].iter().filter(|p| p.real && is_shadow_pass(&p.kind)).collect();
    assert_eq!(shadow_passes.len(), 1);
    assert!(passes[first_main..].iter().all(|p| !is_shadow_pass(&p.kind)));

    let atlas_target = renderer.atlas().shadow_atlas().unwrap().render_targets[0];
    assert_eq!(shadow_passes[0].target, Some(atlas_target));
    match &shadow_passes[0].kind {
        PassKind::ClusteredLocalShadows { jobs } => assert_eq!(jobs, &vec![(LightId(2), 0)]),
        other => panic!("unexpected shadow pass {other:?}"),
    }

    renderer.execute(&scene, &mut ()).unwrap();
    let labels = renderer.device().pass_labels();
    assert_eq!(labels, vec!["ClusteredLocalShadows".to_string(), "Main0-0".to_string()]);
    assert!(renderer.stats().shadow_draw_calls >= 1);
}

#[test]
fn depth_grab_keeps_the_main_pass_depth() {
    let mut renderer = renderer(LucentConfig::default());
    let mut scene = scene(Vec::new(), vec![floor()]);
    scene.cameras[0].render_scene_depth_map = true;
    scene.composition.render_actions[0].last_camera_use = false;
    let mut depth = Layer::new(LayerId(1), "depth");
    depth.kind = LayerKind::Depth;
    scene.composition.layers.push(depth);
    let mut grab = RenderAction::new(1, CAMERA);
    grab.last_camera_use = true;
    scene.composition.render_actions.push(grab);

    renderer.update(&mut scene).unwrap();
    renderer.build_frame_graph(&mut scene);
    let passes = renderer.frame_graph().passes();
    let main = passes.iter().position(|p| matches!(p.kind, PassKind::Main { .. })).unwrap();
    let grab = passes.iter().position(|p| matches!(p.kind, PassKind::SceneGrab { .. })).unwrap();
    assert!(main < grab);
    assert!(passes[main].depth_stencil_ops.store_depth);
    assert_eq!(passes[grab].kind, PassKind::SceneGrab { action: 1, color: false, depth: true });

    renderer.execute(&scene, &mut ()).unwrap();
    assert!(renderer
        .device()
        .commands()
        .contains(&DeviceCommand::GrabScene { target: None, color: false, depth: true }));
}

#[test]
fn light_capacity_cannot_change_after_creation() {
    let mut renderer = renderer(LucentConfig::default());
    let mut config = LucentConfig::default();
    config.lighting.max_lights = 64;
    let err = renderer.set_config(config.clone()).unwrap_err();
    assert!(matches!(err, RenderError::InvalidConfig(_)));
    assert_eq!(renderer.config().lighting.max_lights, 255);
    assert_eq!(renderer.clusters().lights_buffer().max_lights(), 255);

    config.lighting.max_lights = 255;
    config.lighting.cells = [4, 4, 4];
    renderer.set_config(config).unwrap();
    assert_eq!(renderer.config().lighting.cells, [4, 4, 4]);
}

#[test]
fn non_clustered_spot_renders_into_its_own_map() {
    let config = LucentConfig {
        lighting: LightingConfig { clustered: false, ..LightingConfig::default() },
        ..LucentConfig::default()
    };
    let mut renderer = renderer(config);
    let lights = vec![Light::directional(LightId(1)), shadowed_spot()];
    let mut scene = scene(lights, vec![floor()]);
    renderer.update(&mut scene).unwrap();
    renderer.build_frame_graph(&mut scene);

    let passes = renderer.frame_graph().passes();
    let shadow_passes: Vec<_> = passes.iter().filter(|p| is_shadow_pass(&p.kind)).collect();
    assert_eq!(shadow_passes.len(), 1);
    assert_eq!(shadow_passes[0].name, "LocalShadow2_0");
    let map = renderer.shadow_maps().get(LightId(2)).unwrap();
    assert_eq!(shadow_passes[0].target, Some(map.render_targets[0]));
    assert!(matches!(passes.last().map(|p| &p.kind), Some(PassKind::Main { .. })));
}

#[test]
fn lights_past_the_buffer_capacity_are_dropped() {
    let mut renderer = renderer(LucentConfig::default());
    let lights: Vec<Light> = (0..300u64)
        .map(|i| {
            let x = (i % 20) as f32 * 0.5 - 5.0;
            let z = -20.0 - (i / 20) as f32;
            Light::omni(LightId(i + 1), Vec3::new(x, 0.0, z), 1.5)
        })
        .collect();
    let mut scene = scene(lights, vec![floor()]);
    renderer.render(&mut scene, &mut ()).unwrap();

    let clusters = renderer.clusters();
    assert_eq!(clusters.used_light_count(), 254);
    assert!(clusters.cluster_lights().iter().all(|c| c.light < 254));
    assert!(clusters.cluster_data().iter().all(|&index| index < 255));
    let rows = clusters.lights_buffer().max_lights();
    assert_eq!(rows, 255);
}

#[test]
fn disabled_frustum_culling_keeps_every_mask_passing_instance() {
    let mut renderer = renderer(LucentConfig::default());
    let mut behind = floor();
    behind.aabb = Aabb::new(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 7.0));
    let mut masked_out = floor();
    masked_out.mask = 1 << 4;
    let mut hidden = floor();
    hidden.visible = false;
    let mut unmasked = behind.clone();
    unmasked.mask = 0;
    let mut scene = scene(Vec::new(), vec![floor(), behind, masked_out, hidden, unmasked]);
    scene.cameras[0].frustum_culling = false;
    scene.cameras[0].culling_mask = 1;

    renderer.update(&mut scene).unwrap();
    assert_eq!(renderer.visible_instances(0), &[0, 1, 4]);
    assert_eq!(renderer.stats().culled_instances, 2);

    scene.cameras[0].frustum_culling = true;
    renderer.update(&mut scene).unwrap();
    assert_eq!(renderer.visible_instances(0), &[0]);
}

#[test]
fn actions_on_one_target_share_a_pass() {
    let mut renderer = renderer(LucentConfig::default());
    let mut scene = scene(Vec::new(), vec![floor()]);
    scene.composition.layers.push(Layer::new(LayerId(1), "ui"));
    scene.composition.render_actions[0].last_camera_use = false;
    let mut second = RenderAction::new(1, CAMERA);
    second.last_camera_use = true;
    scene.composition.render_actions.push(second);

    renderer.render(&mut scene, &mut ()).unwrap();
    assert_eq!(renderer.device().pass_labels(), vec!["Main0-1".to_string()]);
    assert_eq!(renderer.stats().passes, 1);
}

#[test]
fn directional_shadows_split_the_main_pass() {
    let mut renderer = renderer(LucentConfig::default());
    let mut scene = scene(Vec::new(), vec![floor()]);

    let sun = Light::directional(LightId(7)).looking_along(Vec3::new(0.3, -1.0, 0.2)).with_shadows(512);
    scene.lights.push(sun);
    let second_camera = CameraId(2);
    scene.cameras.push(Camera::new(second_camera, "overlay"));
    let mut lit = Layer::new(LayerId(1), "lit");
    lit.mesh_instances = vec![0];
    lit.lights = vec![LightId(7)];
    scene.composition.layers.push(lit);
    let mut action = RenderAction::new(1, second_camera);
    action.first_camera_use = true;
    action.last_camera_use = true;
    scene.composition.render_actions.push(action);

    renderer.update(&mut scene).unwrap();
    renderer.build_frame_graph(&mut scene);
    let kinds: Vec<_> = renderer.frame_graph().passes().iter().map(|p| p.name.clone()).collect();
    let main0 = kinds.iter().position(|n| n == "Main0-0").unwrap();
    let shadow = kinds.iter().position(|n| n == "DirectionalShadow7").unwrap();
    let main1 = kinds.iter().position(|n| n == "Main1-1").unwrap();
    assert!(main0 < shadow && shadow < main1);
}

#[test]
fn observer_sees_camera_events_and_postprocess() {
    #[derive(Default)]
    struct Events(Vec<String>);
    impl lucent_renderer::FrameObserver for Events {
        fn on_pre_render(&mut self, camera: &Camera) {
            self.0.push(format!("pre {}", camera.name));
        }
        fn on_post_render(&mut self, camera: &Camera) {
            self.0.push(format!("post {}", camera.name));
        }
        fn on_postprocess(
            &mut self,
            camera: &Camera,
            _target: Option<render_api::RenderTargetHandle>,
            device: &mut dyn lucent_renderer::GraphicsDevice,
        ) {
            device.push_marker("postprocess");
            device.pop_marker();
            self.0.push(format!("postprocess {}", camera.name));
        }
    }

    let mut renderer = renderer(LucentConfig::default());
    let mut scene = scene(Vec::new(), vec![floor(), MeshInstance::command("gizmos")]);
    scene.composition.render_actions[0].trigger_postprocess = true;
    let mut events = Events::default();
    renderer.render(&mut scene, &mut events).unwrap();

    assert_eq!(events.0, vec!["pre main", "post main", "postprocess main"]);
    let markers: Vec<_> = renderer
        .device()
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::Marker(m) => Some(m.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(markers, vec!["gizmos", "postprocess"]);
}
