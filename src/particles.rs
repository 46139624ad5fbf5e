//! Billboard particles and animated spritesheets.
//!
//! A [`ParticleEmitter`] owns its particles and simulates them on the CPU in
//! [`update_particles`], which the app runner calls once per frame before the scene view
//! is built. A [`Spritesheet`] is a single camera-facing quad that cycles through the
//! cells of a texture grid. Both are drawn by the particle stage after translucent
//! geometry, as [`BillboardInstance`]s lit by the translucent light list.
//!
//! ```ignore
//! world.spawn((
//!     Transform::from_position(Vec3::new(0.0, 0.5, 0.0)),
//!     ParticleEmitter::new(EmitterSettings {
//!         color: Vec4::new(1.0, 0.6, 0.2, 0.8),
//!         ..Default::default()
//!     }),
//! ));
//! ```

use glam::{Mat4, Vec2, Vec3, Vec4};
use hecs::World;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ecs::TextureId;
use crate::mesh::Transform;

/// Where particle positions live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpawnSpace {
    /// Relative to the emitter; particles follow it when it moves.
    Local,
    /// Spawned at the emitter's position and left behind when it moves.
    #[default]
    World,
}

/// A grid of animation frames packed into one texture, read row by row from the top left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SheetLayout {
    pub columns: u32,
    pub rows: u32,
    pub start_frame: f32,
    /// Frames per second.
    pub speed: f32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            columns: 4,
            rows: 4,
            start_frame: 0.0,
            speed: 1.0,
        }
    }
}

impl SheetLayout {
    pub fn frame_count(&self) -> u32 {
        self.columns.max(1) * self.rows.max(1)
    }

    /// UV rectangle `[u, v, width, height]` of the frame shown `elapsed` seconds in.
    pub fn uv_rect(&self, elapsed: f32) -> Vec4 {
        let (columns, rows) = (self.columns.max(1), self.rows.max(1));
        let frame = (self.start_frame + elapsed * self.speed).floor().max(0.0) as u32;
        let frame = frame % self.frame_count();
        let (w, h) = (1.0 / columns as f32, 1.0 / rows as f32);
        Vec4::new((frame % columns) as f32 * w, (frame / columns) as f32 * h, w, h)
    }
}

/// Full texture, no animation.
pub const WHOLE_TEXTURE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

/// How new particles start out. Ranges are inclusive `(min, max)` pairs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleInit {
    pub lifetime: (f32, f32),
    pub velocity: Vec3,
    /// Each velocity component is offset by up to this much either way.
    pub velocity_jitter: f32,
    pub acceleration: Vec3,
    /// Spawn offset from the emitter, per component, either way.
    pub position_jitter: f32,
    pub size: Vec2,
}

impl Default for ParticleInit {
    fn default() -> Self {
        Self {
            lifetime: (1.0, 3.0),
            velocity: Vec3::Y,
            velocity_jitter: 0.5,
            acceleration: Vec3::ZERO,
            position_jitter: 0.1,
            size: Vec2::splat(0.25),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmitterSettings {
    pub max_particles: usize,
    /// Emitted on the first update.
    pub initial_burst: usize,
    /// Seconds between bursts.
    pub burst_interval: (f32, f32),
    pub burst_size: (usize, usize),
    pub spawn_space: SpawnSpace,
    pub init: ParticleInit,
    pub color: Vec4,
    pub texture: Option<TextureId>,
    /// Animates each particle over its age when set.
    pub sheet: Option<SheetLayout>,
    /// Unlit particles show `color * texture` as is.
    pub lit: bool,
    pub seed: u64,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            max_particles: 1000,
            initial_burst: 10,
            burst_interval: (1.0, 2.0),
            burst_size: (1, 5),
            spawn_space: SpawnSpace::World,
            init: ParticleInit::default(),
            color: Vec4::ONE,
            texture: None,
            sheet: None,
            lit: true,
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub size: Vec2,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub age: f32,
    pub lifetime: f32,
}

/// Component that spawns and simulates particles around its entity's [`Transform`].
#[derive(Clone, Debug)]
pub struct ParticleEmitter {
    pub settings: EmitterSettings,
    pub burst_enabled: bool,
    particles: Vec<Particle>,
    pending: usize,
    /// Negative until the first burst is scheduled.
    next_burst: f32,
    rng: StdRng,
}

impl ParticleEmitter {
    pub fn new(settings: EmitterSettings) -> Self {
        Self {
            burst_enabled: true,
            particles: Vec::with_capacity(settings.max_particles),
            pending: settings.initial_burst,
            next_burst: -1.0,
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
        }
    }

    /// Queues `count` particles for the next update.
    pub fn emit(&mut self, count: usize) {
        self.pending += count;
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// One simulation step: spawn what is pending, run the burst timer, age and expire
    /// particles, then integrate the survivors.
    pub fn update(&mut self, world_from_emitter: Mat4, dt: f32) {
        let free = self.settings.max_particles.saturating_sub(self.particles.len());
        if self.pending > free {
            log::debug!(
                "emitter full ({} particles); dropping {}",
                self.settings.max_particles,
                self.pending - free
            );
        }
        let spawn = std::mem::take(&mut self.pending).min(free);
        let origin = match self.settings.spawn_space {
            SpawnSpace::Local => Vec3::ZERO,
            SpawnSpace::World => world_from_emitter.transform_point3(Vec3::ZERO),
        };
        for _ in 0..spawn {
            let particle = self.spawn(origin);
            self.particles.push(particle);
        }

        if self.burst_enabled {
            if self.next_burst < 0.0 {
                let (lo, hi) = ordered(self.settings.burst_interval);
                self.next_burst = self.rng.random_range(lo..=hi);
                let (lo, hi) = ordered(self.settings.burst_size);
                let burst = self.rng.random_range(lo..=hi);
                self.emit(burst);
            } else {
                self.next_burst -= dt;
            }
        }

        for particle in &mut self.particles {
            particle.age += dt;
        }
        self.particles.retain(|p| p.age <= p.lifetime);

        for particle in &mut self.particles {
            particle.velocity += particle.acceleration * dt;
            particle.position += particle.velocity * dt;
        }
    }

    fn spawn(&mut self, origin: Vec3) -> Particle {
        let init = self.settings.init;
        let mut jitter = |amount: f32| {
            if amount > 0.0 {
                Vec3::new(
                    self.rng.random_range(-amount..=amount),
                    self.rng.random_range(-amount..=amount),
                    self.rng.random_range(-amount..=amount),
                )
            } else {
                Vec3::ZERO
            }
        };
        let position = origin + jitter(init.position_jitter);
        let velocity = init.velocity + jitter(init.velocity_jitter);
        let (lo, hi) = ordered(init.lifetime);
        Particle {
            position,
            size: init.size,
            velocity,
            acceleration: init.acceleration,
            age: 0.0,
            lifetime: self.rng.random_range(lo..=hi),
        }
    }

    /// Camera-facing quads for every live particle.
    pub fn instances(&self, world_from_emitter: Mat4) -> Vec<BillboardInstance> {
        let lit = if self.settings.lit { 1.0 } else { 0.0 };
        self.particles
            .iter()
            .map(|p| {
                let center = match self.settings.spawn_space {
                    SpawnSpace::Local => world_from_emitter.transform_point3(p.position),
                    SpawnSpace::World => p.position,
                };
                let uv = self
                    .settings
                    .sheet
                    .map_or(WHOLE_TEXTURE, |sheet| sheet.uv_rect(p.age));
                BillboardInstance::new(center, p.size, uv, self.settings.color, lit)
            })
            .collect()
    }
}

fn ordered<T: PartialOrd>((a, b): (T, T)) -> (T, T) {
    if b < a { (b, a) } else { (a, b) }
}

/// Component drawing one animated camera-facing quad at its entity's position, sized by
/// the transform's x and y scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spritesheet {
    pub texture: Option<TextureId>,
    pub layout: SheetLayout,
    pub color: Vec4,
    pub lit: bool,
}

impl Spritesheet {
    pub fn new(texture: Option<TextureId>, columns: u32, rows: u32) -> Self {
        Self {
            texture,
            layout: SheetLayout {
                columns,
                rows,
                ..Default::default()
            },
            color: Vec4::ONE,
            lit: false,
        }
    }

    pub fn speed(mut self, frames_per_second: f32) -> Self {
        self.layout.speed = frames_per_second;
        self
    }

    pub fn start_frame(mut self, frame: f32) -> Self {
        self.layout.start_frame = frame;
        self
    }

    /// Starts on a random frame so neighbouring sheets do not animate in lockstep.
    pub fn random_start(mut self, rng: &mut impl Rng) -> Self {
        self.layout.start_frame = rng.random_range(0..self.layout.frame_count()) as f32;
        self
    }

    pub fn color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn lit(mut self) -> Self {
        self.lit = true;
        self
    }

    pub fn instance(&self, transform: &Transform, time: f32) -> BillboardInstance {
        BillboardInstance::new(
            transform.position,
            transform.scale.truncate(),
            self.layout.uv_rect(time),
            self.color,
            if self.lit { 1.0 } else { 0.0 },
        )
    }
}

/// Per-instance vertex data of the particle stage.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BillboardInstance {
    /// World-space center; `w` is 1 for lit billboards, 0 for unlit.
    pub center: [f32; 4],
    /// `[width, height, unused, unused]` in world units.
    pub size: [f32; 4],
    /// `[u, v, width, height]`
    pub uv_rect: [f32; 4],
    pub color: [f32; 4],
}

impl BillboardInstance {
    pub fn new(center: Vec3, size: Vec2, uv_rect: Vec4, color: Vec4, lit: f32) -> Self {
        Self {
            center: center.extend(lit).to_array(),
            size: [size.x, size.y, 0.0, 0.0],
            uv_rect: uv_rect.to_array(),
            color: color.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.center[0], self.center[1], self.center[2])
    }

    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x4,
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x4,
    ];

    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<BillboardInstance>() as u64,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &Self::ATTRIBUTES,
    };
}

/// Advances every emitter in `world` by `dt` seconds.
pub fn update_particles(world: &mut World, dt: f32) {
    for (_, (transform, emitter)) in world.query_mut::<(&Transform, &mut ParticleEmitter)>() {
        emitter.update(transform.matrix(), dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(settings: EmitterSettings) -> ParticleEmitter {
        let mut emitter = ParticleEmitter::new(settings);
        emitter.burst_enabled = false;
        emitter
    }

    #[test]
    fn initial_burst_spawns_on_first_update() {
        let mut emitter = quiet(EmitterSettings::default());
        assert_eq!(emitter.pending(), 10);
        emitter.update(Mat4::IDENTITY, 0.0);
        assert_eq!(emitter.particles().len(), 10);
        assert_eq!(emitter.pending(), 0);
    }

    #[test]
    fn spawning_is_clamped_to_free_capacity() {
        let mut emitter = quiet(EmitterSettings {
            max_particles: 8,
            initial_burst: 5,
            ..Default::default()
        });
        emitter.update(Mat4::IDENTITY, 0.0);
        emitter.emit(20);
        emitter.update(Mat4::IDENTITY, 0.0);
        assert_eq!(emitter.particles().len(), 8);
        // the overflow is dropped, not carried over
        assert_eq!(emitter.pending(), 0);
    }

    #[test]
    fn particles_expire_after_their_lifetime() {
        let mut emitter = quiet(EmitterSettings {
            init: ParticleInit {
                lifetime: (1.0, 1.0),
                ..Default::default()
            },
            ..Default::default()
        });
        emitter.update(Mat4::IDENTITY, 0.5);
        assert_eq!(emitter.particles().len(), 10);
        emitter.update(Mat4::IDENTITY, 0.5);
        assert_eq!(emitter.particles().len(), 10);
        emitter.update(Mat4::IDENTITY, 0.25);
        assert!(emitter.particles().is_empty());
    }

    #[test]
    fn bursts_follow_the_timer() {
        let mut emitter = ParticleEmitter::new(EmitterSettings {
            initial_burst: 0,
            burst_interval: (1.0, 1.0),
            burst_size: (3, 3),
            ..Default::default()
        });
        emitter.update(Mat4::IDENTITY, 0.25);
        // first burst is queued for the next step
        assert_eq!(emitter.pending(), 3);
        emitter.update(Mat4::IDENTITY, 0.25);
        assert_eq!(emitter.particles().len(), 3);
        for _ in 0..4 {
            emitter.update(Mat4::IDENTITY, 0.25);
            assert_eq!(emitter.pending(), 0);
        }
        emitter.update(Mat4::IDENTITY, 0.25);
        assert_eq!(emitter.pending(), 3);
    }

    #[test]
    fn motion_integrates_acceleration() {
        let mut emitter = quiet(EmitterSettings {
            initial_burst: 1,
            init: ParticleInit {
                lifetime: (10.0, 10.0),
                velocity: Vec3::X,
                velocity_jitter: 0.0,
                acceleration: Vec3::new(0.0, -2.0, 0.0),
                position_jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        });
        emitter.update(Mat4::IDENTITY, 0.0);
        emitter.update(Mat4::IDENTITY, 0.5);
        let p = emitter.particles()[0];
        assert_eq!(p.velocity, Vec3::new(1.0, -1.0, 0.0));
        assert_eq!(p.position, Vec3::new(0.5, -0.5, 0.0));
    }

    #[test]
    fn spawn_space_decides_who_moves_the_particles() {
        let settings = EmitterSettings {
            initial_burst: 1,
            init: ParticleInit {
                velocity: Vec3::ZERO,
                velocity_jitter: 0.0,
                position_jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let at = |x: f32| Mat4::from_translation(Vec3::new(x, 0.0, 0.0));

        let mut world_space = quiet(settings);
        world_space.update(at(2.0), 0.0);
        assert_eq!(world_space.instances(at(5.0))[0].position(), Vec3::new(2.0, 0.0, 0.0));

        let mut local = quiet(EmitterSettings {
            spawn_space: SpawnSpace::Local,
            ..settings
        });
        local.update(at(2.0), 0.0);
        assert_eq!(local.instances(at(5.0))[0].position(), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn same_seed_same_particles() {
        let run = || {
            let mut emitter = ParticleEmitter::new(EmitterSettings {
                seed: 42,
                ..Default::default()
            });
            for _ in 0..30 {
                emitter.update(Mat4::IDENTITY, 0.1);
            }
            emitter.particles().to_vec()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn sheet_frames_walk_rows_and_wrap() {
        let sheet = SheetLayout {
            columns: 4,
            rows: 2,
            start_frame: 0.0,
            speed: 2.0,
        };
        assert_eq!(sheet.uv_rect(0.0), Vec4::new(0.0, 0.0, 0.25, 0.5));
        assert_eq!(sheet.uv_rect(0.5), Vec4::new(0.25, 0.0, 0.25, 0.5));
        // frame 5: second row, second column
        assert_eq!(sheet.uv_rect(2.5), Vec4::new(0.25, 0.5, 0.25, 0.5));
        // eight frames, so frame 8 is frame 0 again
        assert_eq!(sheet.uv_rect(4.0), sheet.uv_rect(0.0));
    }

    #[test]
    fn spritesheet_uses_transform_scale_and_time() {
        let sheet = Spritesheet::new(None, 2, 2).speed(1.0).start_frame(1.0);
        let transform = Transform::from_position(Vec3::Y).scale(Vec3::new(2.0, 3.0, 1.0));
        let instance = sheet.instance(&transform, 1.0);
        assert_eq!(instance.position(), Vec3::Y);
        assert_eq!(instance.size, [2.0, 3.0, 0.0, 0.0]);
        // start 1 + 1 s = frame 2: second row, first column
        assert_eq!(instance.uv_rect, [0.0, 0.5, 0.5, 0.5]);
        assert_eq!(instance.center[3], 0.0);
    }

    #[test]
    fn world_update_reaches_every_emitter() {
        let mut world = World::new();
        let a = world.spawn((Transform::new(), ParticleEmitter::new(EmitterSettings::default())));
        let b = world.spawn((
            Transform::new(),
            ParticleEmitter::new(EmitterSettings {
                initial_burst: 3,
                ..Default::default()
            }),
        ));
        update_particles(&mut world, 0.016);
        assert_eq!(world.get::<&ParticleEmitter>(a).unwrap().particles().len(), 10);
        assert_eq!(world.get::<&ParticleEmitter>(b).unwrap().particles().len(), 3);
        assert_eq!(std::mem::size_of::<BillboardInstance>(), 64);
    }
}
