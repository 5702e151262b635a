// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod overlay;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::{init_tracing, FpsCounter};
use lumen_render::{FrameStatus, RenderSize, Renderer};
use lumen_render_vk::VkRenderer;
use tracing::{error, info, warn};

use lumen_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg};
use overlay::FrameMarker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Override [render].frames_in_flight
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Disable vsync regardless of the config
    #[arg(long)]
    no_vsync: bool,
}

struct App {
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    focused: bool,
    fps: FpsCounter,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            window: None,
            renderer: None,
            render_size: RenderSize {
                width: 1,
                height: 1,
            },
            exiting: false,
            paused: false,
            focused: true,
            fps: FpsCounter::new(Instant::now()),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(self.cfg.window.attributes())
            .map_err(|e| anyhow::anyhow!("create_window: {e}"))?;
        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let settings = self.cfg.render.to_settings(&self.cfg.window.title);
        let mut renderer = VkRenderer::new(&window, &window, self.render_size, &settings)
            .context("vk init failed")?;
        if self.cfg.render.frame_marker {
            renderer
                .add_overlay(Box::new(FrameMarker::new(settings.frames_in_flight)))
                .context("attaching frame marker")?;
        }

        info!(
            "vsync cfg = {} ({:?}), frames in flight = {}",
            settings.vsync, settings.vsync_mode, settings.frames_in_flight
        );
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer first: its surface refers to the window.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn request_redraw(&self) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            self.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_empty();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                let resized = match &mut self.renderer {
                    Some(r) => r.resize(self.render_size),
                    None => Ok(()),
                };
                if let Err(e) = resized {
                    self.fail(event_loop, e.context("resize"));
                    return;
                }
                if !self.paused {
                    self.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.render_size.is_empty();
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);
                    // Unfocused windows are held to vsync.
                    let vsync = !focused || self.cfg.render.vsync;
                    if let Some(r) = &mut self.renderer {
                        r.set_vsync(vsync);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(FrameStatus::Presented) => self.fps.frame(),
                    Ok(FrameStatus::SwapchainRebuilt) => self.request_redraw(),
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        let now = Instant::now();
        if self.paused {
            // window-size=0 or occluded → sleep
            event_loop.set_control_flow(ControlFlow::Wait);
            self.fps.reset(now);
            return;
        }

        if self.cfg.render.vsync || !self.focused {
            // presentation paces the loop
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
        }
        self.request_redraw();

        if let Some(fps) = self.fps.poll(now) {
            info!("fps ~ {}", fps);
        }
    }
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(n) = args.frames_in_flight {
        if n == 0 {
            warn!("--frames-in-flight 0 is clamped to 1");
        }
        cfg.render.frames_in_flight = n.max(1);
    }
    if args.no_vsync {
        cfg.render.vsync = false;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
