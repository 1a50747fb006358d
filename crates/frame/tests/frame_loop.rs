//! Whole frames on the headless device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glam::Vec3;
use renderer_core::Settings;
use renderer_frame::{
    Animated, ComputeContext, DrawContext, Drawable, FrameError, FrameOrchestrator, FrameResult,
    Overlay, ParticleSystem, PostProcessor, PostprocessContext, Scene, ShadowContext, SyncState,
};
use renderer_rhi::headless::{Command, HeadlessDevice, HeadlessSwapchain, Lane, SubmitRecord};
use renderer_rhi::{ImageLayout, PipelineStage, RhiError, SurfaceStatus};
use renderer_scene::{DirectionalLight, PointLight};

// =============================================================================
// Scene fixtures
// =============================================================================

#[derive(Default)]
struct Cube {
    draws: AtomicUsize,
    shadow_draws: AtomicUsize,
}

impl Drawable for Cube {
    fn name(&self) -> &str {
        "cube"
    }

    fn draw(&self, ctx: &mut DrawContext<'_>) {
        self.draws.fetch_add(1, Ordering::Relaxed);
        ctx.command_buffer.draw(36, 1);
    }

    fn draw_shadow(&self, ctx: &mut ShadowContext<'_>) {
        self.shadow_draws.fetch_add(1, Ordering::Relaxed);
        ctx.command_buffer.draw(36, 1);
    }
}

struct Sparks;

impl ParticleSystem for Sparks {
    fn draw_compute(&self, ctx: &mut ComputeContext<'_>) {
        ctx.command_buffer.dispatch(16, 1, 1);
    }

    fn draw_graphic(&self, ctx: &mut DrawContext<'_>) {
        ctx.command_buffer.draw(1024, 1);
    }
}

#[derive(Default)]
struct Spinner {
    slots: Mutex<Vec<usize>>,
}

impl Animated for Spinner {
    fn update_animation(&self, slot: usize, _elapsed: f32) {
        self.slots.lock().unwrap().push(slot);
    }
}

/// Shadow caster that panics in its first shadow pass.
#[derive(Default)]
struct Fragile {
    panicked: AtomicBool,
}

impl Drawable for Fragile {
    fn name(&self) -> &str {
        "fragile"
    }

    fn draw(&self, ctx: &mut DrawContext<'_>) {
        ctx.command_buffer.draw(3, 1);
    }

    fn draw_shadow(&self, _ctx: &mut ShadowContext<'_>) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("shadow draw failed");
        }
    }
}

/// Records the order of animation updates and main pass draws.
#[derive(Default)]
struct Puppet {
    log: Mutex<Vec<(&'static str, usize)>>,
}

impl Animated for Puppet {
    fn update_animation(&self, slot: usize, _elapsed: f32) {
        self.log.lock().unwrap().push(("update", slot));
    }
}

impl Drawable for Puppet {
    fn name(&self) -> &str {
        "puppet"
    }

    fn draw(&self, ctx: &mut DrawContext<'_>) {
        self.log.lock().unwrap().push(("draw", ctx.slot));
    }
}

struct ToneMap;

impl PostProcessor for ToneMap {
    fn draw_compute(&mut self, ctx: &mut PostprocessContext<'_>) -> FrameResult<()> {
        let (width, height) = ctx.swapchain.extent();
        ctx.command_buffer
            .dispatch(width.div_ceil(16), height.div_ceil(16), 1);
        Ok(())
    }
}

struct Hud;

impl Overlay for Hud {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> FrameResult<()> {
        ctx.command_buffer.draw(6, 1);
        Ok(())
    }
}

fn settings() -> Settings {
    Settings {
        worker_threads: 4,
        ..Settings::default()
    }
}

fn orchestrator(device: &HeadlessDevice, settings: Settings) -> FrameOrchestrator {
    let swapchain = Box::new(device.create_swapchain(3, (320, 240)));
    FrameOrchestrator::new(
        Arc::new(device.clone()),
        swapchain,
        settings,
        Box::new(ToneMap),
        Box::new(Hud),
    )
    .unwrap()
}

fn sun() -> DirectionalLight {
    DirectionalLight::new(Vec3::new(-1.0, -1.0, -0.5), Vec3::ONE, 2.0)
}

fn lamp() -> PointLight {
    PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.8, 0.6), 5.0, 10.0)
}

fn headless_swapchain(orchestrator: &mut FrameOrchestrator) -> &mut HeadlessSwapchain {
    orchestrator
        .swapchain_mut()
        .as_any_mut()
        .downcast_mut::<HeadlessSwapchain>()
        .unwrap()
}

fn position(submissions: &[SubmitRecord], buffer: &str) -> usize {
    submissions
        .iter()
        .position(|s| s.has_buffer(buffer))
        .unwrap_or_else(|| panic!("no submission of '{buffer}'"))
}

fn assert_clean(device: &HeadlessDevice) {
    assert_eq!(device.violations().unwrap(), Vec::<String>::new());
    assert_eq!(device.pending_submissions().unwrap(), 0);
}

// =============================================================================
// Submission chain
// =============================================================================

#[test]
fn test_frame_submission_chain() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();
    scene.add_drawable(Arc::new(Cube::default()));

    let report = orchestrator.draw_frame(&mut scene).unwrap();
    assert!(report.presented);
    assert_eq!(report.frame, 0);
    assert_eq!(report.slot, 0);
    assert_eq!(report.image_index, Some(0));
    assert_eq!(report.surface, SurfaceStatus::Optimal);
    assert_eq!(report.shadow_jobs, 1);

    let submissions = device.submissions().unwrap();
    let shadow = position(&submissions, "shadow dir0[0]");
    let particles = position(&submissions, "particles[0]");
    let render = position(&submissions, "render[0]");
    let postprocess = position(&submissions, "postprocess[0]");
    let gui = position(&submissions, "gui[0]");
    let present = submissions
        .iter()
        .position(|s| s.lane == Lane::Present)
        .unwrap();
    assert!(shadow < render && particles < render);
    assert!(render < postprocess && postprocess < gui && gui < present);

    let shadow = &submissions[shadow];
    assert_eq!(shadow.lane, Lane::Graphics);
    assert_eq!(shadow.signals("shadow_done[0]").unwrap().value, Some(1));

    let particles = &submissions[particles];
    assert_eq!(particles.lane, Lane::Compute);
    assert_eq!(particles.signals("particle_done[0]").unwrap().value, Some(1));

    let render = &submissions[render];
    assert_eq!(render.lane, Lane::Graphics);
    let wait = render.waits_on("shadow_done[0]").unwrap();
    assert_eq!(wait.value, Some(1));
    assert_eq!(wait.stage, PipelineStage::FRAGMENT_SHADER);
    let wait = render.waits_on("particle_done[0]").unwrap();
    assert_eq!(wait.value, Some(1));
    assert_eq!(wait.stage, PipelineStage::VERTEX_INPUT);
    assert!(render.signals("postprocessing_done[0]").is_some());
    assert_eq!(render.fence, None);

    let postprocess = &submissions[postprocess];
    assert_eq!(postprocess.lane, Lane::Compute);
    assert!(postprocess.waits_on("image_available[0]").is_some());
    assert!(postprocess.waits_on("postprocessing_done[0]").is_some());
    assert!(postprocess.signals("gui_done[0]").is_some());

    let gui = &submissions[gui];
    assert_eq!(gui.lane, Lane::Graphics);
    assert!(gui.waits_on("gui_done[0]").is_some());
    assert!(gui.signals("render_finished[0]").is_some());
    assert_eq!(gui.fence.as_deref(), Some("in_flight[0]"));

    assert!(submissions[present].waits_on("render_finished[0]").is_some());
    assert_eq!(orchestrator.slot_state(0), Some(SyncState::InFlight));
    assert_eq!(orchestrator.frame(), 1);
    assert_clean(&device);
}

#[test]
fn test_render_waits_on_frame_value() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();

    orchestrator.run(&mut scene, 5).unwrap();

    let renders: Vec<_> = device
        .submissions()
        .unwrap()
        .into_iter()
        .filter(|s| s.has_buffer("render[0]") || s.has_buffer("render[1]"))
        .collect();
    assert_eq!(renders.len(), 5);
    for (frame, render) in renders.iter().enumerate() {
        let slot = frame % 2;
        let value = Some(frame as u64 + 1);
        assert_eq!(render.waits_on(&format!("shadow_done[{slot}]")).unwrap().value, value);
        assert_eq!(render.waits_on(&format!("particle_done[{slot}]")).unwrap().value, value);
    }
    assert_eq!(device.timeline_value("shadow_done[0]").unwrap(), Some(5));
    assert_eq!(device.timeline_value("particle_done[1]").unwrap(), Some(4));
    assert_clean(&device);
}

#[test]
fn test_no_lights_still_signals_shadow_done() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.add_drawable(Arc::new(Cube::default()));

    let report = orchestrator.draw_frame(&mut scene).unwrap();
    assert_eq!(report.shadow_jobs, 0);
    assert!(report.presented);

    let submissions = device.submissions().unwrap();
    let signal = submissions
        .iter()
        .find(|s| s.signals("shadow_done[0]").is_some())
        .unwrap();
    assert_eq!(signal.lane, Lane::Graphics);
    assert!(signal.command_buffers.is_empty());
    assert_eq!(device.timeline_value("shadow_done[0]").unwrap(), Some(1));

    // No shadow maps to sample, so no barrier in the render pass
    let render = &submissions[position(&submissions, "render[0]")];
    assert!(!render.command_buffers[0]
        .commands
        .iter()
        .any(|c| matches!(c, Command::MemoryBarrier { .. })));
    assert_clean(&device);
}

#[test]
fn test_shadow_jobs_signal_once() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();
    scene.lights_mut().add_point(lamp()).unwrap();
    let cube = Arc::new(Cube::default());
    scene.add_drawable(cube.clone());

    let report = orchestrator.draw_frame(&mut scene).unwrap();
    assert_eq!(report.shadow_jobs, 8);
    assert_eq!(cube.shadow_draws.load(Ordering::Relaxed), 8);
    assert_eq!(cube.draws.load(Ordering::Relaxed), 1);

    let submissions = device.submissions().unwrap();
    let shadow_submits: Vec<_> = submissions
        .iter()
        .filter(|s| s.command_buffers.iter().any(|b| b.label.starts_with("shadow ")))
        .collect();
    assert_eq!(shadow_submits.len(), 8);
    let signals: Vec<_> = submissions
        .iter()
        .filter(|s| s.signals("shadow_done[0]").is_some())
        .collect();
    assert_eq!(signals.len(), 1);
    // The signaling submission is queued behind every other shadow pass
    let last_shadow = submissions
        .iter()
        .rposition(|s| s.command_buffers.iter().any(|b| b.label.starts_with("shadow ")))
        .unwrap();
    assert!(submissions[last_shadow].signals("shadow_done[0]").is_some());

    for face in ["+X", "-X", "+Y", "-Y", "+Z", "-Z"] {
        position(&submissions, &format!("shadow point0 {face}[0]"));
    }

    // Maps are written by the jobs and only read here
    let render = &submissions[position(&submissions, "render[0]")];
    assert!(render.command_buffers[0].commands.iter().any(|c| matches!(
        c,
        Command::MemoryBarrier { dst_stage, .. } if *dst_stage == PipelineStage::FRAGMENT_SHADER
    )));
    assert_clean(&device);
}

#[test]
fn test_shadow_targets_keep_contents_after_first_use() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();

    orchestrator.run(&mut scene, 3).unwrap();

    let first_transition = |record: &SubmitRecord| {
        record.command_buffers[0]
            .commands
            .iter()
            .find_map(|c| match c {
                Command::TransitionDepth { from, .. } => Some(*from),
                _ => None,
            })
            .unwrap()
    };
    let shadows: Vec<_> = device
        .submissions()
        .unwrap()
        .into_iter()
        .filter(|s| s.has_buffer("shadow dir0[0]"))
        .collect();
    assert_eq!(shadows.len(), 2);
    assert_eq!(first_transition(&shadows[0]), ImageLayout::Undefined);
    assert_eq!(first_transition(&shadows[1]), ImageLayout::DepthReadOnly);
    assert_eq!(scene.lights().pass_times(0).len(), 1);
}

// =============================================================================
// Post-processing and overlay
// =============================================================================

#[test]
fn test_postprocess_runs_bloom_then_tone_map() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(
        &device,
        Settings {
            bloom_passes: 2,
            ..settings()
        },
    );
    let mut scene = orchestrator.create_scene().unwrap();
    orchestrator.draw_frame(&mut scene).unwrap();

    let submissions = device.submissions().unwrap();
    let commands = &submissions[position(&submissions, "postprocess[0]")].command_buffers[0].commands;
    let dispatches: Vec<_> = commands
        .iter()
        .filter(|c| matches!(c, Command::Dispatch { .. }))
        .collect();
    // Two H/V pairs, then the tone map
    assert_eq!(dispatches.len(), 5);
    assert_eq!(dispatches[4], &Command::Dispatch { x: 20, y: 15, z: 1 });

    let transition = commands
        .iter()
        .position(|c| {
            *c == Command::TransitionSwapchain {
                image_index: 0,
                from: ImageLayout::Undefined,
                to: ImageLayout::General,
            }
        })
        .unwrap();
    let tone_map = commands
        .iter()
        .rposition(|c| matches!(c, Command::Dispatch { .. }))
        .unwrap();
    assert!(transition < tone_map);

    let gui = &submissions[position(&submissions, "gui[0]")].command_buffers[0].commands;
    assert_eq!(
        gui.iter().rev().nth(1),
        Some(&Command::TransitionSwapchain {
            image_index: 0,
            from: ImageLayout::General,
            to: ImageLayout::PresentSrc,
        })
    );
}

#[test]
fn test_blur_weights_follow_slot_rotation() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();

    orchestrator.run(&mut scene, 4).unwrap();
    assert_eq!(orchestrator.bloom().cache().rewrite_count(0), 1);
    assert_eq!(orchestrator.bloom().cache().rewrite_count(1), 1);

    assert!(orchestrator.bloom().set_kernel_size(9).unwrap());
    orchestrator.draw_frame(&mut scene).unwrap();
    assert_eq!(orchestrator.bloom().cache().rewrite_count(0), 2);
    assert!(orchestrator.bloom().cache().is_dirty(1));
    orchestrator.draw_frame(&mut scene).unwrap();
    assert_eq!(orchestrator.bloom().cache().rewrite_count(1), 2);
}

// =============================================================================
// Lights
// =============================================================================

#[test]
fn test_light_change_reaches_each_slot_once() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();

    orchestrator.run(&mut scene, 2).unwrap();
    let cache = scene.lights().cache();
    assert_eq!((cache.rewrite_count(0), cache.rewrite_count(1)), (1, 1));

    // Slot 1's frame is still in flight when the change lands
    assert!(scene.lights().set_directional_color(0, Vec3::X));
    orchestrator.draw_frame(&mut scene).unwrap();
    let cache = scene.lights().cache();
    assert_eq!(cache.rewrite_count(0), 2);
    assert!(cache.is_dirty(1));

    orchestrator.draw_frame(&mut scene).unwrap();
    let cache = scene.lights().cache();
    assert_eq!(cache.rewrite_count(1), 2);

    // Unchanged parameters never rewrite again
    assert!(!scene.lights().set_directional_color(0, Vec3::X));
    orchestrator.run(&mut scene, 4).unwrap();
    let cache = scene.lights().cache();
    assert_eq!((cache.rewrite_count(0), cache.rewrite_count(1)), (2, 2));
    assert_clean(&device);
}

#[test]
fn test_update_hooks_drive_the_scene() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_point(lamp()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    orchestrator.register_update(move |scene: &mut Scene, info| {
        hook_seen.lock().unwrap().push((info.frame, info.slot));
        let x = info.frame as f32;
        scene.lights().set_point_position(0, Vec3::new(x, 2.0, 0.0));
    });

    orchestrator.run(&mut scene, 3).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(0, 0), (1, 1), (2, 0)]);
    assert_eq!(scene.lights().lights().point[0].position, Vec3::new(2.0, 2.0, 0.0));
}

#[test]
fn test_resize_calls_reset_hooks() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let hook_sizes = Arc::clone(&sizes);
    orchestrator.register_reset(move |_scene: &mut Scene, width, height| {
        hook_sizes.lock().unwrap().push((width, height));
    });
    orchestrator.resize(&mut scene, 800, 600);
    assert_eq!(*sizes.lock().unwrap(), vec![(800, 600)]);
}

// =============================================================================
// Animation and particles
// =============================================================================

#[test]
fn test_animation_updates_next_slot() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    let spinner = Arc::new(Spinner::default());
    scene.add_animation(spinner.clone());

    orchestrator.run(&mut scene, 3).unwrap();
    orchestrator.wait_idle().unwrap();
    assert_eq!(*spinner.slots.lock().unwrap(), vec![1, 0, 1]);
}

#[test]
fn test_single_slot_updates_animation_before_drawing() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator_with_slots(&device, 1);
    let mut scene = orchestrator.create_scene().unwrap();
    let puppet = Arc::new(Puppet::default());
    scene.add_animation(puppet.clone());
    scene.add_drawable(puppet.clone());

    orchestrator.run(&mut scene, 3).unwrap();
    orchestrator.wait_idle().unwrap();
    let expected: Vec<_> = (0..3).flat_map(|_| [("update", 0), ("draw", 0)]).collect();
    assert_eq!(*puppet.log.lock().unwrap(), expected);
    assert_clean(&device);
}

#[test]
fn test_particles_simulate_then_draw() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.add_particle_system(Arc::new(Sparks));

    orchestrator.run(&mut scene, 2).unwrap();
    let submissions = device.submissions().unwrap();
    let particles = &submissions[position(&submissions, "particles[1]")];
    assert!(particles.command_buffers[0]
        .commands
        .contains(&Command::Dispatch { x: 16, y: 1, z: 1 }));
    let render = &submissions[position(&submissions, "render[1]")];
    assert!(render.command_buffers[0].commands.contains(&Command::Draw {
        vertex_count: 1024,
        instance_count: 1,
    }));
    assert_clean(&device);
}

// =============================================================================
// Surface status
// =============================================================================

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    headless_swapchain(&mut orchestrator).push_acquire_status(SurfaceStatus::OutOfDate);
    let updates = Arc::new(Mutex::new(Vec::new()));
    let hook_updates = Arc::clone(&updates);
    orchestrator.register_update(move |_scene: &mut Scene, info| {
        hook_updates.lock().unwrap().push(info.frame);
    });

    let report = orchestrator.draw_frame(&mut scene).unwrap();
    assert!(!report.presented);
    assert_eq!(report.image_index, None);
    assert_eq!(report.surface, SurfaceStatus::OutOfDate);
    assert_eq!(orchestrator.frame(), 0);
    assert_eq!(orchestrator.slot_state(0), Some(SyncState::Idle));

    // The slot's fence was signaled again, so the retry does not block
    let report = orchestrator.draw_frame(&mut scene).unwrap();
    assert!(report.presented);
    assert_eq!(report.frame, 0);
    // Hooks ran once for frame 0 despite the retry
    orchestrator.draw_frame(&mut scene).unwrap();
    assert_eq!(*updates.lock().unwrap(), vec![0, 1]);
    assert_clean(&device);
}

#[test]
fn test_suboptimal_is_reported_not_fatal() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    headless_swapchain(&mut orchestrator).push_present_status(SurfaceStatus::Suboptimal);
    headless_swapchain(&mut orchestrator).push_acquire_status(SurfaceStatus::Optimal);
    headless_swapchain(&mut orchestrator).push_acquire_status(SurfaceStatus::OutOfDate);

    let summary = orchestrator.run(&mut scene, 3).unwrap();
    assert_eq!(summary.presented, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.suboptimal, 1);
}

// =============================================================================
// Frames in flight
// =============================================================================

#[test]
fn test_cpu_stays_within_frames_in_flight() {
    let device = HeadlessDevice::manual();
    let mut orchestrator = orchestrator(
        &device,
        Settings {
            fence_timeout_ms: Some(20),
            ..settings()
        },
    );
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();

    // Nothing executes, yet two frames can be recorded
    orchestrator.draw_frame(&mut scene).unwrap();
    orchestrator.draw_frame(&mut scene).unwrap();
    assert!(device.pending_submissions().unwrap() > 0);

    let err = orchestrator.draw_frame(&mut scene).unwrap_err();
    assert!(err.is_gpu_hang());
    assert!(matches!(
        err,
        FrameError::Rhi(RhiError::FenceTimeout { ref label, .. }) if label == "in_flight[0]"
    ));
    assert_eq!(orchestrator.frame(), 2);

    // Once the GPU catches up the loop continues
    device.run_pending().unwrap();
    orchestrator.draw_frame(&mut scene).unwrap();
    device.run_pending().unwrap();
    assert_clean(&device);
}

#[test]
fn test_failed_frame_leaves_its_slot_unusable() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let mut scene = orchestrator.create_scene().unwrap();
    scene.lights_mut().add_directional(sun()).unwrap();
    scene.add_drawable(Arc::new(Fragile::default()));

    let err = orchestrator.draw_frame(&mut scene).unwrap_err();
    assert!(matches!(err, FrameError::JobPanicked(ref job) if job == "shadow dir0"));
    assert_eq!(orchestrator.slot_state(0), Some(SyncState::Recording));
    assert_eq!(orchestrator.frame(), 0);
    let submissions = device.submissions().unwrap();
    assert!(!submissions.iter().any(|s| s.has_buffer("render[0]")));
    assert!(!submissions.iter().any(|s| s.lane == Lane::Present));

    // Errors are fatal: the slot is never retired, so no frame runs on it again
    for _ in 0..2 {
        assert!(matches!(
            orchestrator.draw_frame(&mut scene),
            Err(FrameError::InvalidState {
                slot: 0,
                expected: SyncState::InFlight,
                found: SyncState::Recording,
            })
        ));
    }
}

#[test]
fn test_mismatched_scene_is_rejected() {
    let device = HeadlessDevice::immediate();
    let mut orchestrator = orchestrator(&device, settings());
    let other = orchestrator_with_slots(&device, 3);
    let mut scene = other.create_scene().unwrap();
    assert!(matches!(
        orchestrator.draw_frame(&mut scene),
        Err(FrameError::Config(_))
    ));
}

fn orchestrator_with_slots(device: &HeadlessDevice, frames_in_flight: usize) -> FrameOrchestrator {
    orchestrator(
        device,
        Settings {
            frames_in_flight,
            ..settings()
        },
    )
}

#[test]
fn test_invalid_settings_rejected() {
    let device = HeadlessDevice::immediate();
    let result = FrameOrchestrator::new(
        Arc::new(device.clone()),
        Box::new(device.create_swapchain(2, (64, 64))),
        Settings {
            frames_in_flight: 0,
            ..settings()
        },
        Box::new(ToneMap),
        Box::new(Hud),
    );
    assert!(matches!(result, Err(FrameError::Config(_))));
}
