//! The frame loop.
//!
//! [`FrameOrchestrator::draw_frame`] produces one frame:
//!
//! 1. Run the update hooks, once per frame number.
//! 2. Wait on the fence of the slot about to be reused, then acquire a
//!    swapchain image. An out-of-date surface skips the frame.
//! 3. Dispatch the shadow jobs and the particle job to the pool.
//! 4. Record the render pass on this thread, join the jobs and submit the
//!    render, post-process and overlay passes with their semaphore chain.
//! 5. Present, then advance the frame counter.
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_core::Settings;
//! use renderer_frame::{
//!     DrawContext, FrameOrchestrator, FrameResult, Overlay, PostProcessor, PostprocessContext,
//! };
//! use renderer_rhi::headless::HeadlessDevice;
//!
//! struct ToneMap;
//! impl PostProcessor for ToneMap {
//!     fn draw_compute(&mut self, ctx: &mut PostprocessContext<'_>) -> FrameResult<()> {
//!         ctx.command_buffer.dispatch(80, 45, 1);
//!         Ok(())
//!     }
//! }
//!
//! struct NoOverlay;
//! impl Overlay for NoOverlay {
//!     fn draw(&mut self, _ctx: &mut DrawContext<'_>) -> FrameResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> FrameResult<()> {
//! let device = HeadlessDevice::immediate();
//! let swapchain = Box::new(device.create_swapchain(3, (1280, 720)));
//! let mut orchestrator = FrameOrchestrator::new(
//!     Arc::new(device),
//!     swapchain,
//!     Settings::default(),
//!     Box::new(ToneMap),
//!     Box::new(NoOverlay),
//! )?;
//! let mut scene = orchestrator.create_scene()?;
//! orchestrator.run(&mut scene, 10)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use renderer_core::{FpsCounter, FrameLimiter, Settings, Timer};
use renderer_rhi::{
    Access, CommandBuffer, Device, ImageLayout, PipelineStage, SurfaceStatus, Swapchain,
};
use tracing::{debug, error, info, warn};

use crate::blur::BloomBlur;
use crate::drawable::{Animated, DrawContext, Overlay, PostProcessor, PostprocessContext};
use crate::error::{FrameError, FrameResult};
use crate::frame_slot::FrameSlot;
use crate::frame_sync::SyncState;
use crate::light_manager::LightManager;
use crate::particle::ParticleJob;
use crate::scene::Scene;
use crate::shadow::{DepthBias, ShadowFrame, dispatch_shadow_jobs, signal_without_shadows};
use crate::thread_pool::{JobHandle, ThreadPool, join_all};

/// Passed to update hooks before each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInfo {
    pub frame: u64,
    pub slot: usize,
    /// Time since the previous frame's hooks ran.
    pub delta: Duration,
    /// Seconds since the orchestrator was created.
    pub elapsed: f32,
}

/// Outcome of one [`FrameOrchestrator::draw_frame`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image_index: Option<u32>,
    /// Least optimal surface status reported by acquire or present.
    pub surface: SurfaceStatus,
    pub presented: bool,
    pub shadow_jobs: usize,
    /// Set when an FPS window closed on this frame.
    pub fps: Option<u32>,
}

/// Totals of a [`FrameOrchestrator::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub presented: u64,
    /// Frames skipped because the surface was out of date.
    pub skipped: u64,
    pub suboptimal: u64,
}

pub type UpdateHook = Box<dyn FnMut(&mut Scene, &FrameInfo) + Send>;
pub type ResetHook = Box<dyn FnMut(&mut Scene, u32, u32) + Send>;

pub struct FrameOrchestrator {
    device: Arc<dyn Device>,
    swapchain: Box<dyn Swapchain>,
    settings: Settings,
    pool: ThreadPool,
    slots: Vec<FrameSlot>,
    bloom: BloomBlur,
    post_processor: Box<dyn PostProcessor>,
    overlay: Box<dyn Overlay>,
    update_hooks: Vec<UpdateHook>,
    reset_hooks: Vec<ResetHook>,
    /// Animation update dispatched last frame, joined before drawables.
    pending_animation: Option<JobHandle<()>>,
    frame: u64,
    /// Frame whose update hooks already ran; a skipped frame is retried
    /// under the same number without running them again.
    updated_frame: Option<u64>,
    timer: Timer,
    fps: FpsCounter,
    limiter: FrameLimiter,
}

impl FrameOrchestrator {
    pub fn new(
        device: Arc<dyn Device>,
        swapchain: Box<dyn Swapchain>,
        settings: Settings,
        post_processor: Box<dyn PostProcessor>,
        overlay: Box<dyn Overlay>,
    ) -> FrameResult<Self> {
        settings
            .validate()
            .map_err(|e| FrameError::Config(e.to_string()))?;

        let pool = ThreadPool::new(settings.resolved_worker_threads())?;
        let slots = (0..settings.frames_in_flight)
            .map(|index| FrameSlot::new(device.as_ref(), index))
            .collect::<FrameResult<Vec<_>>>()?;
        let bloom = BloomBlur::new(device.as_ref(), &settings, swapchain.extent())?;

        info!(
            "Frame orchestrator ready on '{}': {} frame(s) in flight, {} worker(s), {} swapchain image(s)",
            device.name(),
            slots.len(),
            pool.threads(),
            swapchain.image_count()
        );

        Ok(Self {
            device,
            swapchain,
            settings,
            pool,
            slots,
            bloom,
            post_processor,
            overlay,
            update_hooks: Vec::new(),
            reset_hooks: Vec::new(),
            pending_animation: None,
            frame: 0,
            updated_frame: None,
            timer: Timer::new(),
            fps: FpsCounter::new(),
            limiter: FrameLimiter::new(),
        })
    }

    /// An empty scene whose light manager matches this orchestrator's slots.
    pub fn create_scene(&self) -> FrameResult<Scene> {
        Ok(Scene::new(LightManager::new(
            Arc::clone(&self.device),
            &self.settings,
        )?))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of frames started so far, and the number of the next one.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next frame records into.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame % self.slots.len() as u64) as usize
    }

    pub fn slot_state(&self, slot: usize) -> Option<SyncState> {
        self.slots.get(slot).map(|s| s.sync().state())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn bloom(&self) -> &BloomBlur {
        &self.bloom
    }

    pub fn bloom_mut(&mut self) -> &mut BloomBlur {
        &mut self.bloom
    }

    pub fn swapchain(&self) -> &dyn Swapchain {
        self.swapchain.as_ref()
    }

    pub fn swapchain_mut(&mut self) -> &mut dyn Swapchain {
        self.swapchain.as_mut()
    }

    /// Frames presented in the last complete one second window.
    pub fn fps(&self) -> u32 {
        self.fps.fps()
    }

    /// Changes the frame rate cap. Zero removes it.
    pub fn set_desired_fps(&mut self, desired_fps: u32) {
        self.settings.desired_fps = desired_fps;
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Runs `hook` at the start of every frame, before the fence wait. A
    /// frame skipped on an out-of-date surface keeps its number, and the
    /// hooks do not run again when it is retried.
    pub fn register_update(&mut self, hook: impl FnMut(&mut Scene, &FrameInfo) + Send + 'static) {
        self.update_hooks.push(Box::new(hook));
    }

    /// Runs `hook` on every [`resize`](Self::resize).
    pub fn register_reset(&mut self, hook: impl FnMut(&mut Scene, u32, u32) + Send + 'static) {
        self.reset_hooks.push(Box::new(hook));
    }

    /// Forwards a surface size change to the reset hooks. The swapchain
    /// itself is not recreated.
    pub fn resize(&mut self, scene: &mut Scene, width: u32, height: u32) {
        info!("Resize to {}x{}", width, height);
        for hook in &mut self.reset_hooks {
            hook(scene, width, height);
        }
    }

    // =========================================================================
    // Frame loop
    // =========================================================================

    /// Produces one frame.
    ///
    /// # Errors
    ///
    /// Every error is fatal for the loop: a fence timeout (GPU hang), a
    /// rejected submission, a panicked job or a frame step out of order.
    /// A frame that fails after its fence wait leaves the slot recording
    /// with the fence unsignaled, so every later call fails with
    /// [`FrameError::InvalidState`]; drop the orchestrator instead.
    /// Out-of-date and suboptimal surfaces are not errors; they show up in
    /// the returned [`FrameReport`].
    pub fn draw_frame(&mut self, scene: &mut Scene) -> FrameResult<FrameReport> {
        if scene.lights().frames_in_flight() != self.slots.len() {
            return Err(FrameError::Config(format!(
                "scene lights have {} slot(s), orchestrator has {}",
                scene.lights().frames_in_flight(),
                self.slots.len()
            )));
        }

        let frame = self.frame;
        let slot = self.current_slot();
        let next_slot = (slot + 1) % self.slots.len();

        let retry = self.updated_frame == Some(frame);
        let info = FrameInfo {
            frame,
            slot,
            delta: if retry { Duration::ZERO } else { self.timer.tick() },
            elapsed: self.timer.elapsed_secs(),
        };
        if !retry {
            for hook in &mut self.update_hooks {
                hook(scene, &info);
            }
            self.updated_frame = Some(frame);
        }

        let timeout = self.settings.fence_timeout_ns();
        let device = Arc::clone(&self.device);
        let frame_slot = &mut self.slots[slot];
        frame_slot.sync.begin_frame(timeout)?;

        let acquired = frame_slot.sync.acquire(self.swapchain.as_mut(), timeout)?;
        let Some(image_index) = acquired.index else {
            warn!(frame, "Swapchain out of date on acquire, skipping frame");
            frame_slot.sync.abandon_frame(device.as_ref())?;
            return Ok(FrameReport {
                frame,
                slot,
                image_index: None,
                surface: SurfaceStatus::OutOfDate,
                presented: false,
                shadow_jobs: 0,
                fps: None,
            });
        };
        if acquired.status == SurfaceStatus::Suboptimal {
            warn!(frame, "Swapchain suboptimal on acquire");
        }

        // Fan out: shadow passes and particle simulation on the pool
        let shadow_jobs = scene.lights_mut().shadow_jobs(slot)?;
        let shadow_job_count = shadow_jobs.len();
        let shadow_handles = if shadow_jobs.is_empty() {
            signal_without_shadows(device.as_ref(), frame_slot.sync.shadow_done().as_ref(), frame)?;
            Vec::new()
        } else {
            let shared = Arc::new(ShadowFrame {
                device: Arc::clone(&device),
                casters: scene.shadow_casters(),
                shadow_done: Arc::clone(frame_slot.sync.shadow_done()),
                frame,
                slot,
                depth_bias: DepthBias {
                    constant: self.settings.depth_bias_constant,
                    slope: self.settings.depth_bias_slope,
                },
            });
            dispatch_shadow_jobs(&self.pool, shadow_jobs, shared)
        };

        let particle_job = ParticleJob {
            device: Arc::clone(&device),
            systems: scene.particle_systems().iter().cloned().collect(),
            particle_done: Arc::clone(frame_slot.sync.particle_done()),
            command_buffer: frame_slot.take_particles()?,
            frame,
            slot,
            elapsed: info.elapsed,
        };
        let particle_handle = self.pool.spawn(format!("particles {frame}"), move || particle_job.run());

        // Main pass on this thread while the jobs record
        let extent = self.swapchain.extent();
        let render_result = {
            let mut ctx = DrawContext {
                slot,
                frame,
                extent,
                command_buffer: frame_slot.render.as_mut(),
            };
            record_render(
                &mut ctx,
                scene,
                &self.pool,
                &mut self.pending_animation,
                next_slot,
                info.elapsed,
            )
        };

        // Join before submitting; every lent command buffer comes back even
        // if something failed
        let mut first_error = render_result.err();
        match join_all(shadow_handles) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok(outcome) => scene.lights_mut().restore(slot, outcome),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        match particle_handle.join().and_then(|result| result) {
            Ok(cb) => frame_slot.particles = Some(cb),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            error!(frame, "Frame recording failed: {}", e);
            return Err(e);
        }

        frame_slot
            .sync
            .submit_render(device.as_ref(), frame_slot.render.as_ref(), frame)?;

        record_postprocess(
            frame_slot.postprocess.as_mut(),
            &self.bloom,
            self.post_processor.as_mut(),
            self.swapchain.as_ref(),
            slot,
            frame,
            image_index,
        )?;
        frame_slot
            .sync
            .submit_postprocess(device.as_ref(), frame_slot.postprocess.as_ref())?;

        record_overlay(
            frame_slot.gui.as_mut(),
            self.overlay.as_mut(),
            self.swapchain.as_ref(),
            slot,
            frame,
            image_index,
        )?;
        frame_slot
            .sync
            .submit_overlay(device.as_ref(), frame_slot.gui.as_ref())?;

        let present_status = frame_slot.sync.present(self.swapchain.as_mut())?;
        if present_status.needs_recreate() {
            warn!(frame, ?present_status, "Swapchain needs recreation after present");
        }

        self.frame += 1;
        let fps = self.fps.frame();
        if let Some(fps) = fps {
            debug!("{} fps", fps);
        }
        self.limiter.pace(self.settings.desired_fps);

        Ok(FrameReport {
            frame,
            slot,
            image_index: Some(image_index),
            surface: worst_status(acquired.status, present_status),
            presented: true,
            shadow_jobs: shadow_job_count,
            fps,
        })
    }

    /// Draws `frames` frames, stopping at the first error.
    pub fn run(&mut self, scene: &mut Scene, frames: u64) -> FrameResult<RunSummary> {
        let mut summary = RunSummary::default();
        for _ in 0..frames {
            let report = self.draw_frame(scene)?;
            if report.presented {
                summary.presented += 1;
            } else {
                summary.skipped += 1;
            }
            if report.surface == SurfaceStatus::Suboptimal {
                summary.suboptimal += 1;
            }
        }
        info!(
            "Ran {} frame(s): {} presented, {} skipped, {} suboptimal",
            frames, summary.presented, summary.skipped, summary.suboptimal
        );
        Ok(summary)
    }

    /// Joins the outstanding animation job and waits for the GPU.
    pub fn wait_idle(&mut self) -> FrameResult<()> {
        if let Some(handle) = self.pending_animation.take() {
            handle.join()?;
        }
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            error!("Failed to idle before teardown: {}", e);
        }
        debug!("Frame orchestrator dropped after {} frame(s)", self.frame);
    }
}

impl std::fmt::Debug for FrameOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameOrchestrator")
            .field("frame", &self.frame)
            .field("slots", &self.slots)
            .field("pool", &self.pool)
            .finish()
    }
}

fn worst_status(a: SurfaceStatus, b: SurfaceStatus) -> SurfaceStatus {
    let rank = |s: SurfaceStatus| match s {
        SurfaceStatus::Optimal => 0,
        SurfaceStatus::Suboptimal => 1,
        SurfaceStatus::OutOfDate => 2,
    };
    if rank(b) > rank(a) { b } else { a }
}

fn update_animations(animations: &[Arc<dyn Animated>], slot: usize, elapsed: f32) {
    for animated in animations {
        animated.update_animation(slot, elapsed);
    }
}

/// Updates every animation for `slot` on the pool.
fn spawn_animation(
    pool: &ThreadPool,
    animations: &[Arc<dyn Animated>],
    slot: usize,
    elapsed: f32,
) -> JobHandle<()> {
    let animations = animations.to_vec();
    pool.spawn(format!("animation slot {slot}"), move || {
        update_animations(&animations, slot, elapsed)
    })
}

/// Scene pass: lights, drawables, particles, skybox.
fn record_render(
    ctx: &mut DrawContext<'_>,
    scene: &Scene,
    pool: &ThreadPool,
    pending_animation: &mut Option<JobHandle<()>>,
    next_slot: usize,
    elapsed: f32,
) -> FrameResult<()> {
    ctx.command_buffer.begin()?;
    ctx.command_buffer.begin_label(&format!("render {}", ctx.frame));

    scene.lights().bind(ctx.slot)?;
    if scene.lights().shadow_pass_count() > 0 {
        // Shadow jobs leave their maps in DepthReadOnly; this makes their
        // depth writes visible to sampling
        ctx.command_buffer.memory_barrier(
            PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS,
            Access::DEPTH_ATTACHMENT_WRITE,
            PipelineStage::FRAGMENT_SHADER,
            Access::SHADER_READ,
        );
    }

    if let Some(handle) = pending_animation.take() {
        handle.join()?;
    }
    let single_slot = next_slot == ctx.slot;
    if single_slot {
        // The next slot is this one; its only idle window is between the
        // fence wait and this frame's submission
        update_animations(scene.animations(), ctx.slot, elapsed);
    }
    for drawable in scene.drawables() {
        drawable.draw(ctx);
    }
    if !single_slot && !scene.animations().is_empty() {
        *pending_animation = Some(spawn_animation(pool, scene.animations(), next_slot, elapsed));
    }

    for system in scene.particle_systems() {
        system.draw_graphic(ctx);
    }
    if let Some(skybox) = scene.skybox() {
        skybox.draw(ctx);
    }

    ctx.command_buffer.end_label();
    ctx.command_buffer.end()?;
    Ok(())
}

/// Bloom, then tone mapping into the acquired image.
fn record_postprocess(
    cb: &mut dyn CommandBuffer,
    bloom: &BloomBlur,
    post_processor: &mut dyn PostProcessor,
    swapchain: &dyn Swapchain,
    slot: usize,
    frame: u64,
    image_index: u32,
) -> FrameResult<()> {
    cb.begin()?;
    cb.begin_label(&format!("postprocess {frame}"));
    bloom.record(cb, slot)?;
    cb.transition_swapchain_image(swapchain, image_index, ImageLayout::Undefined, ImageLayout::General)?;
    post_processor.draw_compute(&mut PostprocessContext {
        slot,
        frame,
        image_index,
        swapchain,
        command_buffer: &mut *cb,
    })?;
    cb.end_label();
    cb.end()?;
    Ok(())
}

/// Debug UI over the final image, leaving it ready to present.
fn record_overlay(
    cb: &mut dyn CommandBuffer,
    overlay: &mut dyn Overlay,
    swapchain: &dyn Swapchain,
    slot: usize,
    frame: u64,
    image_index: u32,
) -> FrameResult<()> {
    cb.begin()?;
    cb.begin_label(&format!("gui {frame}"));
    overlay.draw(&mut DrawContext {
        slot,
        frame,
        extent: swapchain.extent(),
        command_buffer: &mut *cb,
    })?;
    cb.transition_swapchain_image(swapchain, image_index, ImageLayout::General, ImageLayout::PresentSrc)?;
    cb.end_label();
    cb.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        use SurfaceStatus::*;
        assert_eq!(worst_status(Optimal, Optimal), Optimal);
        assert_eq!(worst_status(Suboptimal, Optimal), Suboptimal);
        assert_eq!(worst_status(Optimal, OutOfDate), OutOfDate);
        assert_eq!(worst_status(OutOfDate, Suboptimal), OutOfDate);
    }

    #[test]
    fn test_orchestrator_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameOrchestrator>();
    }
}
