//! Rendering sandbox: a grid of PBR spheres on a ground plane, lit by a sun and a swarm
//! of wandering point lights, with a spark fountain off to one side.
//!
//! ```text
//! cargo run --release -- [renderer.json]
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera::*;

const LIGHT_COUNT: usize = 384;
const LIGHT_SEED: u64 = 0x7E55;
const FONT_PATH: &str = "assets/fonts/sandbox.ttf";
const GRID: i32 = 7;

/// Moves a point light on a small ellipse around its spawn point.
struct Wander {
    origin: Vec3,
    radius: f32,
    speed: f32,
    phase: f32,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let renderer = match std::env::args().nth(1) {
        Some(path) => match RendererConfig::from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{path}: {err}");
                std::process::exit(1);
            }
        },
        None => RendererConfig::default(),
    };
    let config = AppConfig::new()
        .title("Tessera Sandbox")
        .size(1280, 720)
        .renderer(renderer);

    let result = run_with_config(config, |ctx| {
        spawn_scene(ctx);
        spawn_lights(ctx.world);

        let fps_text = match ctx.assets.load_font(ctx.gpu, FONT_PATH, 32.0) {
            Ok(font) => Some(ctx.world.spawn((ScreenSpaceText::new(font, "").at(12, 8),))),
            Err(err) => {
                log::warn!("no FPS counter: {err}");
                None
            }
        };

        move |frame| {
            for (_, (transform, wander)) in frame.world.query_mut::<(&mut Transform, &Wander)>() {
                let angle = wander.phase + frame.time * wander.speed;
                transform.position = wander.origin
                    + Vec3::new(angle.cos(), 0.0, angle.sin() * 0.6) * wander.radius;
            }

            if let Some(entity) = fps_text {
                if let Ok(mut text) = frame.world.get::<&mut ScreenSpaceText>(entity) {
                    text.text = format!("{:.0} fps  {LIGHT_COUNT} lights", frame.fps());
                }
            }

            frame.debug.axes(Vec3::new(-9.0, 0.01, -9.0), 1.0);
        }
    });

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn spawn_scene(ctx: &mut SetupContext) {
    let sphere = ctx.assets.add_mesh_data(ctx.gpu, &MeshData::sphere(48, 24));
    let plane = ctx.assets.add_mesh_data(ctx.gpu, &MeshData::plane(40.0));
    let cube = ctx.assets.add_mesh_data(ctx.gpu, &MeshData::cube());

    let camera = ctx.world.spawn((
        Camera::new().at(0.0, 6.0, 16.0).looking_at(0.0, 0.5, 0.0),
        PostprocessSettings { exposure: 1.2 },
    ));
    ctx.camera(camera);

    ctx.world.spawn((
        Transform::new(),
        MeshRenderer::new(plane),
        Material::default().albedo(Vec4::new(0.5, 0.5, 0.52, 1.0)).roughness(0.8).metallic(0.0),
    ));

    // roughness along x, metalness along z
    for ix in 0..GRID {
        for iz in 0..GRID {
            let roughness = (ix as f32 / (GRID - 1) as f32).max(0.05);
            let metallic = iz as f32 / (GRID - 1) as f32;
            ctx.world.spawn((
                Transform::from_position(Vec3::new(
                    (ix - GRID / 2) as f32 * 2.2,
                    1.0,
                    (iz - GRID / 2) as f32 * 2.2,
                )),
                MeshRenderer::new(sphere),
                Material::default()
                    .albedo(Vec4::new(0.9, 0.35, 0.2, 1.0))
                    .roughness(roughness)
                    .metallic(metallic),
            ));
        }
    }

    ctx.world.spawn((
        Transform::from_position(Vec3::new(0.0, 3.5, 0.0)).uniform_scale(1.5),
        MeshRenderer::new(cube).translucent(),
        Material::default()
            .albedo(Vec4::new(0.3, 0.6, 1.0, 0.35))
            .roughness(0.1)
            .metallic(0.0),
    ));

    // a small fountain of sparks beside the grid
    ctx.world.spawn((
        Transform::from_position(Vec3::new(9.5, 0.2, 0.0)),
        ParticleEmitter::new(EmitterSettings {
            max_particles: 400,
            initial_burst: 40,
            burst_interval: (0.1, 0.3),
            burst_size: (4, 10),
            init: ParticleInit {
                lifetime: (1.5, 2.5),
                velocity: Vec3::new(0.0, 4.0, 0.0),
                velocity_jitter: 1.0,
                acceleration: Vec3::new(0.0, -4.0, 0.0),
                position_jitter: 0.1,
                size: Vec2::splat(0.15),
            },
            color: Vec4::new(1.0, 0.7, 0.3, 0.8),
            lit: false,
            ..Default::default()
        }),
    ));

    ctx.world.spawn((
        Transform::new().rotation(Quat::from_euler(EulerRot::YXZ, 0.6, -0.9, 0.0)),
        DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), 2.0),
    ));
}

/// Point lights scattered over the sphere grid, each on its own orbit.
fn spawn_lights(world: &mut World) {
    let mut rng = StdRng::seed_from_u64(LIGHT_SEED);
    for _ in 0..LIGHT_COUNT {
        let origin = Vec3::new(
            rng.random_range(-9.0..9.0),
            rng.random_range(0.3..2.5),
            rng.random_range(-9.0..9.0),
        );
        let color = Vec3::new(
            rng.random_range(0.2..1.0),
            rng.random_range(0.2..1.0),
            rng.random_range(0.2..1.0),
        );
        world.spawn((
            Transform::from_position(origin),
            PointLight::new(color, rng.random_range(2.0..6.0), rng.random_range(1.5..3.5)),
            Wander {
                origin,
                radius: rng.random_range(0.5..2.0),
                speed: rng.random_range(0.2..1.0),
                phase: rng.random_range(0.0..std::f32::consts::TAU),
            },
        ));
    }
}
