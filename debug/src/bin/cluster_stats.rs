//! Cluster statistics on the headless device: scatter omni and spot lights over a grid, run one
//! frame and print cell occupancy and light buffer usage.
//!
//! Usage: `cluster_stats [config.toml] [light count]`

use glam::{Mat4, Vec3};
use lucent_renderer::{HeadlessDevice, LucentConfig, Renderer};
use render_api::{
    Aabb, Camera, CameraId, Layer, LayerId, Light, LightId, Material, MaterialId, MeshHandle, MeshInstance,
    RenderAction, Scene,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => LucentConfig::load(&path)?,
        None => LucentConfig::default(),
    };
    let light_count: u64 = match args.next() {
        Some(n) => n.parse()?,
        None => 300,
    };

    let mut renderer = Renderer::new(HeadlessDevice::new(), config)?;
    let mut scene = build_scene(light_count);
    renderer.render(&mut scene, &mut ())?;

    let clusters = renderer.clusters();
    let cells = clusters.cells();
    let mut histogram = vec![0usize; clusters.max_cell_light_count() as usize + 1];
    for z in 0..cells.z {
        for y in 0..cells.y {
            for x in 0..cells.x {
                let count = clusters.cell_lights(x, y, z).len().min(histogram.len() - 1);
                histogram[count] += 1;
            }
        }
    }
    let (min, max) = clusters.bounds();
    let (max_attenuation, max_color) = clusters.compression_limits();

    println!("encoding:          {:?}", renderer.light_encoding());
    println!("lights in scene:   {}", scene.lights.len());
    println!("lights clustered:  {}", clusters.used_light_count());
    println!("buffer capacity:   {}", clusters.lights_buffer().max_lights() - 1);
    println!("cells:             {} x {} x {}", cells.x, cells.y, cells.z);
    println!("bounds:            {:?} .. {:?}", min, max);
    println!("compression:       attenuation {:.3}, color {:.3}", max_attenuation, max_color);
    println!("cluster texture:   {:?}", clusters.texture_size());
    println!("cell occupancy:");
    for (count, cells) in histogram.iter().enumerate().filter(|(_, c)| **c > 0) {
        println!("  {:>3} lights: {} cells", count, cells);
    }
    println!("frame stats:       {:?}", renderer.stats());
    Ok(())
}

fn build_scene(light_count: u64) -> Scene {
    let lights: Vec<Light> = (0..light_count)
        .map(|i| {
            let x = (i % 20) as f32 * 1.5 - 15.0;
            let z = -5.0 - (i / 20) as f32 * 1.5;
            let position = Vec3::new(x, 1.0 + (i % 3) as f32, z);
            let id = LightId(i + 1);
            if i % 4 == 0 {
                Light::spot(id, position, 4.0, 15.0, 30.0).looking_along(Vec3::NEG_Y)
            } else {
                Light::omni(id, position, 2.5)
            }
        })
        .collect();

    let floor_aabb = Aabb::new(Vec3::new(-20.0, -1.0, -40.0), Vec3::new(20.0, 0.0, 0.0));
    let floor = MeshInstance::new(MeshHandle(1), MaterialId(0), Mat4::IDENTITY, floor_aabb);

    let mut camera = Camera::new(CameraId(1), "main");
    camera.position = Vec3::new(0.0, 8.0, 10.0);
    let camera = camera.look_at(Vec3::new(0.0, 0.0, -20.0));

    let mut layer = Layer::new(LayerId(0), "world");
    layer.lights = lights.iter().map(|l| l.id).collect();
    layer.mesh_instances = vec![0];
    let mut action = RenderAction::new(0, camera.id).clearing();
    action.first_camera_use = true;
    action.last_camera_use = true;

    let mut scene = Scene {
        lights,
        mesh_instances: vec![floor],
        cameras: vec![camera],
        materials: vec![Material::new(MaterialId(0), "floor")],
        ..Scene::default()
    };
    scene.composition.layers.push(layer);
    scene.composition.render_actions.push(action);
    scene
}
