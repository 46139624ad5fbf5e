use std::sync::Arc;
use std::time::Instant;

use hecs::{Entity, World};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::assets::Assets;
use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::debug_draw::DebugLines;
use crate::error::{RendererError, Result};
use crate::gpu::GpuContext;
use crate::particles::update_particles;
use crate::renderer::TiledForwardRenderer;
use crate::scene_view::{SceneView, Viewport};
use crate::texture::DefaultTextureSet;

/// Context provided during app setup.
pub struct SetupContext<'a> {
    pub gpu: &'a GpuContext,
    pub assets: &'a mut Assets,
    pub world: &'a mut World,
    camera: &'a mut Option<Entity>,
}

impl SetupContext<'_> {
    /// Makes `entity` the camera the scene is rendered from. It must carry a [`Camera`].
    pub fn camera(&mut self, entity: Entity) -> &mut Self {
        *self.camera = Some(entity);
        self
    }
}

/// Context provided each frame, before the scene is rendered.
pub struct Frame<'a> {
    pub gpu: &'a GpuContext,
    pub assets: &'a Assets,
    pub world: &'a mut World,
    /// Lines drawn over this frame only.
    pub debug: &'a mut DebugLines,
    pub camera: Entity,
    /// Total elapsed time in seconds.
    pub time: f32,
    /// Delta time since last frame in seconds.
    pub dt: f32,
}

impl Frame<'_> {
    pub fn fps(&self) -> f32 {
        if self.dt > 0.0 { 1.0 / self.dt } else { 0.0 }
    }

    pub fn width(&self) -> u32 {
        self.gpu.width()
    }

    pub fn height(&self) -> u32 {
        self.gpu.height()
    }
}

/// Window and renderer configuration.
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Tessera".to_string(),
            width: 1280,
            height: 720,
            renderer: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }
}

/// Run a Tessera application with the default configuration.
pub fn run<S, F>(setup: S) -> Result<()>
where
    S: FnOnce(&mut SetupContext) -> F + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    run_with_config(AppConfig::default(), setup)
}

/// Opens a window, builds the renderer and calls `frame` once per redraw.
///
/// `setup` runs once the GPU is ready and returns the per-frame closure. When it does
/// not pick a camera entity, one with a default [`Camera`] is spawned.
///
/// # Example
/// ```ignore
/// tessera::run_with_config(AppConfig::new().title("Lights"), |ctx| {
///     let sphere = ctx.assets.add_mesh_data(ctx.gpu, &MeshData::sphere(32, 16));
///     ctx.world.spawn((Transform::new(), MeshRenderer::new(sphere), Material::default()));
///
///     move |frame| {
///         frame.debug.axes(Vec3::ZERO, 1.0);
///     }
/// })?;
/// ```
pub fn run_with_config<S, F>(config: AppConfig, setup: S) -> Result<()>
where
    S: FnOnce(&mut SetupContext) -> F + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = TesseraApp {
        state: AppState::Pending {
            config,
            setup: Some(Box::new(move |ctx| {
                Box::new(setup(ctx)) as Box<dyn FnMut(&mut Frame)>
            })),
        },
        error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

type SetupFn = Box<dyn FnOnce(&mut SetupContext) -> Box<dyn FnMut(&mut Frame)>>;

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    renderer: TiledForwardRenderer,
    assets: Assets,
    world: World,
    debug_lines: DebugLines,
    camera: Entity,
    frame_fn: Box<dyn FnMut(&mut Frame)>,
    start_time: Instant,
    last_frame: Instant,
}

enum AppState {
    Pending {
        config: AppConfig,
        setup: Option<SetupFn>,
    },
    Running(Box<Running>),
    Exited,
}

struct TesseraApp {
    state: AppState,
    error: Option<RendererError>,
}

impl TesseraApp {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RendererError) {
        log::error!("{err}");
        self.error = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let AppState::Running(running) = std::mem::replace(&mut self.state, AppState::Exited) {
            running.renderer.deinit();
        }
        event_loop.exit();
    }
}

fn start(event_loop: &ActiveEventLoop, config: &AppConfig, setup: SetupFn) -> Result<Running> {
    let window_attrs = WindowAttributes::default()
        .with_title(&config.title)
        .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
    let window = Arc::new(event_loop.create_window(window_attrs)?);

    let gpu = GpuContext::new(window.clone())?;
    let renderer = TiledForwardRenderer::init(&gpu, &config.renderer, DefaultTextureSet::new(&gpu))?;
    let mut assets = Assets::new();
    let mut world = World::new();

    let mut camera = None;
    let frame_fn = setup(&mut SetupContext {
        gpu: &gpu,
        assets: &mut assets,
        world: &mut world,
        camera: &mut camera,
    });
    let camera = camera.unwrap_or_else(|| world.spawn((Camera::new(),)));

    Ok(Running {
        window,
        gpu,
        renderer,
        assets,
        world,
        debug_lines: DebugLines::new(),
        camera,
        frame_fn,
        start_time: Instant::now(),
        last_frame: Instant::now(),
    })
}

impl Running {
    fn redraw(&mut self) -> Result<()> {
        let now = Instant::now();
        let time = self.start_time.elapsed().as_secs_f32();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        (self.frame_fn)(&mut Frame {
            gpu: &self.gpu,
            assets: &self.assets,
            world: &mut self.world,
            debug: &mut self.debug_lines,
            camera: self.camera,
            time,
            dt,
        });

        update_particles(&mut self.world, dt);

        let viewport = Viewport::full(self.gpu.width(), self.gpu.height());
        let Some(view) = SceneView::for_camera(&self.world, self.camera, viewport, time) else {
            log::warn!("camera entity {:?} has no Camera; nothing to render", self.camera);
            return Ok(());
        };

        match self
            .renderer
            .render(&self.gpu, &view, &self.assets, &mut self.debug_lines)
        {
            Err(RendererError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                log::debug!("surface lost or outdated; reconfiguring");
                self.gpu.reconfigure();
                Ok(())
            }
            Err(RendererError::Surface(wgpu::SurfaceError::Timeout)) => {
                log::warn!("surface acquire timed out; skipping frame");
                Ok(())
            }
            other => other,
        }
    }
}

impl ApplicationHandler for TesseraApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Pending { config, setup } = &mut self.state else {
            return;
        };
        let Some(setup) = setup.take() else {
            return;
        };
        match start(event_loop, config, setup) {
            Ok(running) => self.state = AppState::Running(Box::new(running)),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let AppState::Running(running) = &mut self.state else {
            return;
        };

        let result = match event {
            WindowEvent::CloseRequested => {
                self.shutdown(event_loop);
                return;
            }
            WindowEvent::Resized(size) => {
                running.gpu.resize(size.width, size.height);
                running
                    .renderer
                    .resize(&running.gpu, size.width, size.height)
            }
            WindowEvent::RedrawRequested => {
                let result = running.redraw();
                running.window.request_redraw();
                result
            }
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.fail(event_loop, err);
        }
    }
}
