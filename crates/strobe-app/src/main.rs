// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use strobe_core::init_tracing;
use strobe_platform::window_attributes;
use strobe_render::{RenderSettings, RenderSize, Renderer};
use strobe_render_vk::{StopSignal, VkRenderer};
use tracing::{error, info};

use strobe_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "strobe.toml")]
    config: PathBuf,
    /// Stop after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
    /// Enable VK_LAYER_KHRONOS_validation
    #[arg(long)]
    validation: bool,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

struct App {
    cfg: AppCfg,
    settings: RenderSettings,
    max_frames: Option<u64>,

    // Renderer before window: it must be dropped while the window still exists.
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    fatal: Option<anyhow::Error>,
    stop: StopSignal,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop
            .create_window(window_attributes(&w.title, w.width, w.height))
            .context("create_window")?;

        let size = window.inner_size();
        let render_size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let renderer = VkRenderer::new(&window, &window, render_size, &self.settings)?;
        info!(
            "window {}x{}, validation={}",
            render_size.width, render_size.height, self.settings.validation
        );

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Stops the loop; the first error wins and is reported by `main`.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        if self.fatal.is_none() {
            self.fatal = Some(e);
        }
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.stop.stop();
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.stop.is_stopped() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
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

            WindowEvent::RedrawRequested => {
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                let drawn = renderer.frame_number();
                if frame_budget_spent(self.max_frames, drawn) {
                    info!("drew {drawn} frames, exiting");
                    self.stop.stop();
                }
                if self.stop.is_stopped() {
                    self.shutdown(event_loop);
                    return;
                }
                if let Err(e) = renderer.render() {
                    self.fail(event_loop, e);
                    return;
                }
                self.frames = self.frames.saturating_add(1);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.stop.is_stopped() {
            return;
        }
        // FIFO present paces the loop; just keep asking for frames.
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Checked before every frame, so a budget of 0 draws nothing.
fn frame_budget_spent(max_frames: Option<u64>, drawn: u64) -> bool {
    max_frames.is_some_and(|max| drawn >= max)
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    let mut settings = cfg.render.settings();
    settings.validation |= args.validation;

    let event_loop: EventLoop<()> = EventLoop::new().context("event loop")?;
    let mut app = App {
        cfg,
        settings,
        max_frames: args.frames,
        renderer: None,
        window: None,
        fatal: None,
        stop: StopSignal::default(),
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app).context("event loop")?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = Args::try_parse_from(["strobe"]).unwrap();
        assert_eq!(args.config, PathBuf::from("strobe.toml"));
        assert_eq!(args.frames, None);
        assert!(!args.validation);
        assert_eq!(args.log, "info");
    }

    #[test]
    fn zero_frame_budget_is_spent_before_the_first_frame() {
        assert!(frame_budget_spent(Some(0), 0));
        assert!(!frame_budget_spent(Some(3), 2));
        assert!(frame_budget_spent(Some(3), 3));
        assert!(!frame_budget_spent(None, u64::MAX));
    }

    #[test]
    fn cli_overrides() {
        let args = Args::try_parse_from([
            "strobe",
            "--config",
            "alt.toml",
            "--frames",
            "300",
            "--validation",
            "--log",
            "strobe_render_vk=trace",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("alt.toml"));
        assert_eq!(args.frames, Some(300));
        assert!(args.validation);
        assert_eq!(args.log, "strobe_render_vk=trace");
    }
}
