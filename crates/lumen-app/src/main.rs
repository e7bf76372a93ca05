// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::init_tracing;
use lumen_platform::{
    winit::{
        application::ApplicationHandler,
        dpi::PhysicalSize,
        event::WindowEvent,
        event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
        window::{Window, WindowId},
    },
    PlatformWindow, ResizeSignal, ResizeWatcher,
};
use lumen_render::{
    BackendKind, DecodedImage, FrameStatus, GfxContext, GfxInit, Mesh, NoneContext, RenderSize,
    ShaderSource,
};
use lumen_render_vk::VulkanContext;
use tracing::{error, info};

mod assets;
mod config;
mod scene;

use config::{AppCfg, CliOverrides, Settings};
use scene::SceneResources;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend: none | vulkan
    #[arg(long)]
    backend: Option<String>,
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Image file for the scene texture
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Directory with precompiled `<name>.spv` shaders
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    #[arg(long)]
    no_validation: bool,
}

enum Backend {
    None(NoneContext),
    Vulkan(Box<VulkanContext>),
}

impl Backend {
    fn init(kind: BackendKind, host: &PlatformWindow, init: &GfxInit<'_>) -> Result<Self> {
        Ok(match kind {
            BackendKind::None => Backend::None(NoneContext::init(host, init)?),
            BackendKind::Vulkan => Backend::Vulkan(Box::new(VulkanContext::init(host, init)?)),
        })
    }

    fn ctx(&mut self) -> &mut dyn GfxContext {
        match self {
            Backend::None(ctx) => ctx,
            Backend::Vulkan(ctx) => ctx.as_mut(),
        }
    }
}

struct App {
    settings: Settings,
    mesh: Mesh,
    texture: DecodedImage,
    shaders: Box<dyn ShaderSource>,

    scene: Option<SceneResources>,
    // backend is declared first so it drops before the window
    backend: Option<Backend>,
    window: Option<PlatformWindow>,

    resize: ResizeSignal,
    watcher: ResizeWatcher,
    minimized: bool,
    fatal: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal.get_or_insert(err);
        self.scene = None;
        self.backend = None;
        event_loop.exit();
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.settings.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.settings.window.width,
                self.settings.window.height,
            ));
        let window = PlatformWindow::new(event_loop.create_window(attrs).context("create_window")?);

        let init = GfxInit {
            app_name: &self.settings.window.title,
            validation: self.settings.validation,
            shaders: self.shaders.as_ref(),
            mesh: &self.mesh,
            texture: &self.texture,
        };
        let mut backend = Backend::init(self.settings.backend, &window, &init)
            .with_context(|| format!("init {} backend", self.settings.backend))?;
        info!("backend = {}", self.settings.backend);
        let scene = SceneResources::upload(backend.ctx(), &self.mesh, &self.texture)?;

        window.window().request_redraw();
        self.window = Some(window);
        self.backend = Some(backend);
        self.scene = Some(scene);
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        match backend.ctx().update()? {
            FrameStatus::Presented => self.frames = self.frames.saturating_add(1),
            FrameStatus::Minimized => self.minimized = true,
            FrameStatus::Recreated | FrameStatus::Idle => {}
        }
        Ok(())
    }

    /// Forward the newest framebuffer size, if one arrived since the last
    /// poll.
    fn sync_resize(&mut self) -> Result<()> {
        match self.watcher.poll(&self.resize) {
            Some(size) => self.apply_resize(size),
            None => Ok(()),
        }
    }

    fn apply_resize(&mut self, size: RenderSize) -> Result<()> {
        self.minimized = size.is_zero();
        info!(
            "framebuffer {}x{} (minimized={})",
            size.width, size.height, self.minimized
        );
        if let Some(backend) = self.backend.as_mut() {
            backend.ctx().resize_framebuffer(size)?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.open(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.resize.notify(RenderSize::new(size.width, size.height));
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.sync_resize() {
                    self.fail(event_loop, e.context("resize"));
                    return;
                }
                if self.minimized {
                    return;
                }
                if let Err(e) = self.draw() {
                    self.fail(event_loop, e.context("render"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.sync_resize() {
            self.fail(event_loop, e.context("resize"));
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if self.minimized {
            self.frames = 0;
            return;
        }
        if let Some(w) = &self.window {
            w.window().request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut backend) = self.backend.take() {
            if let Some(scene) = self.scene.take() {
                scene.release(backend.ctx());
            }
            backend.ctx().cleanup();
        }
        self.window = None;
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = AppCfg::load(&args.config);
    let settings = Settings::resolve(
        cfg,
        CliOverrides {
            backend: args.backend,
            texture: args.texture,
            shader_dir: args.shader_dir,
            no_validation: args.no_validation,
        },
    )?;
    info!(
        "backend={} validation={}",
        settings.backend, settings.validation
    );

    let texture = assets::load_texture(settings.texture.as_deref())?;
    let shaders = assets::shader_source(settings.shader_dir.as_deref());

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        settings,
        mesh: Mesh::stacked_quads(),
        texture,
        shaders,
        scene: None,
        backend: None,
        window: None,
        resize: ResizeSignal::new(),
        watcher: ResizeWatcher::default(),
        minimized: false,
        fatal: None,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
