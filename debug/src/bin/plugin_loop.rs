//! Host loop: drive LucentPlugin through render_api::RenderBackend (upload_mesh + render_frame)
//! on a headless wgpu device.
//!
//! `RUST_LOG=debug cargo run -p debug --bin plugin_loop` shows frame graph and shadow allocation logs.

use glam::{Mat4, Vec3, Vec4};
use lucent_bridge::LucentPlugin;
use render_api::{
    Aabb, Camera, CameraId, Layer, LayerId, Light, LightId, Material, MaterialId, MeshInstance, MeshUpload,
    RenderAction, RenderBackend, Scene,
};

const FRAMES: usize = 3;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (device, queue) = pollster::block_on(request_device())?;
    let mut plugin = LucentPlugin::new(device, queue)?;

    // A unit quad in the XZ plane (pos + normal, 6 f32 per vertex = 24 bytes).
    let vertices: [f32; 24] = [
        -0.5, 0.0, -0.5, 0.0, 1.0, 0.0, //
        0.5, 0.0, -0.5, 0.0, 1.0, 0.0, //
        0.5, 0.0, 0.5, 0.0, 1.0, 0.0, //
        -0.5, 0.0, 0.5, 0.0, 1.0, 0.0,
    ];
    let indices: [u32; 6] = [0, 2, 1, 0, 3, 2];
    let quad = plugin.upload_mesh(&MeshUpload {
        vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
        index_data: bytemuck::cast_slice(&indices).to_vec(),
    })?;

    let mut scene = build_scene(quad);
    for frame in 0..FRAMES {
        plugin.render_frame(&mut scene, (800, 600))?;
        let stats = plugin.renderer().stats();
        log::info!(
            "frame {}: {} passes, {} draws, {} shadow draws, {} clustered lights",
            frame,
            stats.passes,
            stats.draw_calls,
            stats.shadow_draw_calls,
            stats.clustered_lights
        );
    }
    println!("Lucent plugin_loop: {} frames OK", FRAMES);
    Ok(())
}

fn build_scene(quad: render_api::MeshHandle) -> Scene {
    let floor_world = Mat4::from_scale(Vec3::new(20.0, 1.0, 20.0));
    let floor_aabb = Aabb::new(Vec3::new(-10.0, -0.01, -10.0), Vec3::new(10.0, 0.01, 10.0));
    let floor = MeshInstance::new(quad, MaterialId(0), floor_world, floor_aabb);
    let pillar_world = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::new(2.0, 1.0, 2.0));
    let pillar_aabb = Aabb::new(Vec3::new(-1.0, 0.99, -1.0), Vec3::new(1.0, 1.01, 1.0));
    let pillar = MeshInstance::new(quad, MaterialId(1), pillar_world, pillar_aabb);

    let lights = vec![
        Light::directional(LightId(1)).looking_along(Vec3::new(-0.3, -1.0, -0.2)).with_shadows(1024),
        Light::spot(LightId(2), Vec3::new(2.0, 4.0, 2.0), 12.0, 20.0, 35.0)
            .looking_along(Vec3::new(-0.3, -1.0, -0.3))
            .with_shadows(512),
        Light::omni(LightId(3), Vec3::new(-3.0, 1.5, 1.0), 6.0).with_shadows(256),
        Light::omni(LightId(4), Vec3::new(3.0, 0.5, -2.0), 4.0),
    ];

    let mut camera = Camera::new(CameraId(1), "main");
    camera.position = Vec3::new(0.0, 6.0, 10.0);
    camera.aspect_ratio = 800.0 / 600.0;
    camera.clear_color = Vec4::new(0.05, 0.05, 0.08, 1.0);
    let camera = camera.look_at(Vec3::ZERO);

    let mut pillar_material = Material::new(MaterialId(1), "pillar");
    pillar_material.base_color = Vec4::new(0.8, 0.3, 0.2, 1.0);

    let mut layer = Layer::new(LayerId(0), "world");
    layer.lights = lights.iter().map(|l| l.id).collect();
    layer.mesh_instances = vec![0, 1];
    let mut action = RenderAction::new(0, camera.id).clearing();
    action.first_camera_use = true;
    action.last_camera_use = true;

    let mut scene = Scene {
        lights,
        mesh_instances: vec![floor, pillar],
        cameras: vec![camera],
        materials: vec![Material::new(MaterialId(0), "floor"), pillar_material],
        ..Scene::default()
    };
    scene.composition.layers.push(layer);
    scene.composition.render_actions.push(action);
    scene
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| e.to_string())
}
