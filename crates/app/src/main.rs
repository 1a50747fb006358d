//! Renderer host.
//!
//! Runs the demo scene through the frame orchestrator, either on the
//! headless device (no GPU needed; the journal is checked for sync misuse at
//! exit) or in a window on Vulkan.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use renderer_core::Settings;
use renderer_frame::{FrameOrchestrator, Scene};
use renderer_platform::{Surface, Window};
use renderer_rhi::Device;
use renderer_rhi::headless::HeadlessDevice;
use renderer_rhi::vulkan::{Instance, VulkanDevice, VulkanSwapchain, select_physical_device};

use demo::{StatsOverlay, ToneMap, Work};

/// Frames drawn by `--headless` when `--frames` is not given.
const DEFAULT_HEADLESS_FRAMES: u64 = 240;

/// Headless swapchain image count, matching a typical triple-buffered surface.
const HEADLESS_IMAGES: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "renderer", version, about = "Frame orchestration demo")]
struct Args {
    /// Settings file (TOML). Defaults apply to every missing field.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run on the simulated device instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable the Vulkan validation layers
    #[arg(long)]
    validation: bool,
}

fn main() -> Result<()> {
    renderer_core::init_logging();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if args.validation {
        settings.validation = true;
    }

    if args.headless {
        run_headless(settings, args.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES))
    } else {
        run_windowed(settings, args.frames)
    }
}

// =============================================================================
// Headless
// =============================================================================

fn run_headless(settings: Settings, frames: u64) -> Result<()> {
    info!("Starting headless run of {} frame(s)", frames);
    let device = HeadlessDevice::immediate();
    let swapchain = Box::new(device.create_swapchain(
        HEADLESS_IMAGES,
        (settings.resolution[0], settings.resolution[1]),
    ));

    let mut orchestrator = FrameOrchestrator::new(
        Arc::new(device.clone()),
        swapchain,
        settings,
        Box::new(ToneMap { work: Work::Full }),
        Box::new(StatsOverlay::new(Work::Full)),
    )?;
    let mut scene = orchestrator.create_scene()?;
    demo::populate(&mut scene, Work::Full)?;
    orchestrator.register_update(demo::orbit_lamp);

    let summary = orchestrator.run(&mut scene, frames)?;
    orchestrator.wait_idle()?;

    let violations = device.violations()?;
    if !violations.is_empty() {
        for violation in &violations {
            error!("Sync violation: {}", violation);
        }
        bail!("{} synchronization violation(s)", violations.len());
    }
    info!(
        "Headless run finished: {} presented, {} skipped",
        summary.presented, summary.skipped
    );
    Ok(())
}

// =============================================================================
// Windowed
// =============================================================================

/// Everything created once the window exists. Field order is drop order:
/// the orchestrator idles the device before the scene's shadow maps go, and
/// the surface and instance outlive everything built on them.
struct Gpu {
    orchestrator: FrameOrchestrator,
    scene: Scene,
    _surface: Surface,
    _instance: Instance,
    window: Window,
}

impl Gpu {
    fn new(event_loop: &ActiveEventLoop, settings: &Settings) -> Result<Self> {
        let window = Window::new(event_loop, settings.resolution, "Frame orchestration demo")?;
        let extensions = window.required_extensions()?;
        let instance = Instance::new("renderer", settings.validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Using GPU '{}' ({})",
            physical.device_name(),
            physical.device_type_name()
        );
        let device = VulkanDevice::new(&instance, &physical)?;
        let (width, height) = window.size();
        let swapchain = VulkanSwapchain::new(&instance, &device, surface.handle(), width, height)?;

        let device: Arc<dyn Device> = device;
        let mut orchestrator = FrameOrchestrator::new(
            device,
            Box::new(swapchain),
            settings.clone(),
            Box::new(ToneMap {
                work: Work::SyncOnly,
            }),
            Box::new(StatsOverlay::new(Work::SyncOnly)),
        )?;
        // Blur dispatches need the bloom pipeline, which a host supplies
        orchestrator.bloom_mut().set_passes(0);

        let mut scene = orchestrator.create_scene()?;
        demo::populate(&mut scene, Work::SyncOnly)?;
        orchestrator.register_update(demo::orbit_lamp);

        Ok(Self {
            orchestrator,
            scene,
            _surface: surface,
            _instance: instance,
            window,
        })
    }
}

struct App {
    settings: Settings,
    frame_limit: Option<u64>,
    gpu: Option<Gpu>,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(settings: Settings, frame_limit: Option<u64>) -> Self {
        Self {
            settings,
            frame_limit,
            gpu: None,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match Gpu::new(event_loop, &self.settings) {
            Ok(gpu) => {
                info!("Initialization complete, entering main loop");
                self.gpu = Some(gpu);
            }
            Err(e) => self.fail(event_loop, e.context("initializing the GPU")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if gpu.window.resize(size.width, size.height) {
                    gpu.orchestrator
                        .resize(&mut gpu.scene, size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                    PhysicalKey::Code(KeyCode::BracketRight) => {
                        let sigma = gpu.orchestrator.bloom().kernel().sigma + 0.5;
                        if let Err(e) = gpu.orchestrator.bloom().set_sigma(sigma) {
                            warn!("{}", e);
                        }
                    }
                    PhysicalKey::Code(KeyCode::BracketLeft) => {
                        let sigma = (gpu.orchestrator.bloom().kernel().sigma - 0.5).max(0.5);
                        if let Err(e) = gpu.orchestrator.bloom().set_sigma(sigma) {
                            warn!("{}", e);
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                if gpu.window.is_minimized() {
                    return;
                }
                match gpu.orchestrator.draw_frame(&mut gpu.scene) {
                    Ok(report) => {
                        if let Some(fps) = report.fps {
                            gpu.window
                                .inner()
                                .set_title(&format!("Frame orchestration demo - {fps} fps"));
                        }
                        if self
                            .frame_limit
                            .is_some_and(|limit| gpu.orchestrator.frame() >= limit)
                        {
                            info!("Frame limit reached");
                            event_loop.exit();
                        }
                    }
                    Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("drawing a frame")),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = self.gpu.as_mut()
            && let Err(e) = gpu.orchestrator.wait_idle()
        {
            error!("Failed to idle the device on exit: {}", e);
        }
    }
}

fn run_windowed(settings: Settings, frame_limit: Option<u64>) -> Result<()> {
    info!("Starting windowed run");
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(settings, frame_limit);
    event_loop.run_app(&mut app)?;

    // Tear down in field order before reporting
    app.gpu = None;
    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["renderer", "--headless", "--frames", "12"]).unwrap();
        assert!(args.headless);
        assert_eq!(args.frames, Some(12));
        assert!(args.config.is_none());
        assert!(!args.validation);
    }

    #[test]
    fn test_headless_run() {
        let settings = Settings {
            worker_threads: 2,
            resolution: [320, 180],
            ..Settings::default()
        };
        run_headless(settings, 8).unwrap();
    }
}
