//! Demo scene content.
//!
//! Stand-ins for the mesh, particle and UI collaborators a full renderer
//! would plug in. They record plausible amounts of work so the frame loop
//! and its synchronization can be watched end to end.

use std::sync::{Arc, Mutex};

use glam::Vec3;
use renderer_frame::{
    Animated, ComputeContext, DrawContext, Drawable, FrameInfo, FrameResult, Overlay,
    ParticleSystem, PostProcessor, PostprocessContext, Scene, ShadowContext, Skybox,
};
use renderer_scene::{DirectionalLight, PointLight, SceneBounds};
use tracing::{debug, info};

/// What the demo objects put into their command buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Work {
    /// Draws and dispatches, for the headless device.
    Full,
    /// Labels, depth passes and barriers only. Used on Vulkan, where the
    /// pipelines these draws would need are not part of the demo.
    SyncOnly,
}

struct Prop {
    name: &'static str,
    vertices: u32,
    shadow: bool,
    work: Work,
}

impl Drawable for Prop {
    fn name(&self) -> &str {
        self.name
    }

    fn draw(&self, ctx: &mut DrawContext<'_>) {
        if self.work == Work::Full {
            ctx.command_buffer.draw(self.vertices, 1);
        }
    }

    fn draw_shadow(&self, ctx: &mut ShadowContext<'_>) {
        if self.work == Work::Full {
            ctx.command_buffer.draw(self.vertices, 1);
        }
    }

    fn casts_shadow(&self) -> bool {
        self.shadow
    }
}

struct Embers {
    count: u32,
    work: Work,
}

impl ParticleSystem for Embers {
    fn draw_compute(&self, ctx: &mut ComputeContext<'_>) {
        if self.work == Work::Full {
            ctx.command_buffer.dispatch(self.count.div_ceil(256), 1, 1);
        }
    }

    fn draw_graphic(&self, ctx: &mut DrawContext<'_>) {
        if self.work == Work::Full {
            ctx.command_buffer.draw(self.count, 1);
        }
    }
}

/// Spins at a fixed rate; one angle per frame slot.
struct Turntable {
    radians_per_sec: f32,
    angles: Mutex<Vec<f32>>,
}

impl Animated for Turntable {
    fn update_animation(&self, slot: usize, elapsed: f32) {
        if let Ok(mut angles) = self.angles.lock()
            && let Some(angle) = angles.get_mut(slot)
        {
            *angle = (elapsed * self.radians_per_sec) % std::f32::consts::TAU;
        }
    }
}

struct SkyDome {
    work: Work,
}

impl Skybox for SkyDome {
    fn draw(&self, ctx: &mut DrawContext<'_>) {
        if self.work == Work::Full {
            ctx.command_buffer.draw(36, 1);
        }
    }
}

/// Fills `scene` with a sun, an orbiting lamp, a few props, embers and a sky.
pub fn populate(scene: &mut Scene, work: Work) -> FrameResult<()> {
    let lights = scene.lights_mut();
    lights.set_scene_bounds(SceneBounds {
        center: Vec3::ZERO,
        radius: 12.0,
    });
    lights.add_directional(DirectionalLight::new(
        Vec3::new(-0.4, -1.0, -0.3),
        Vec3::new(1.0, 0.95, 0.85),
        3.0,
    ))?;
    lights.add_point(PointLight::new(
        Vec3::new(4.0, 2.0, 0.0),
        Vec3::new(1.0, 0.6, 0.3),
        8.0,
        10.0,
    ))?;

    for (name, vertices, shadow) in [
        ("ground", 6, false),
        ("crate", 36, true),
        ("pillar", 360, true),
        ("statue", 12_000, true),
    ] {
        scene.add_drawable(Arc::new(Prop {
            name,
            vertices,
            shadow,
            work,
        }));
    }
    scene.add_particle_system(Arc::new(Embers { count: 4096, work }));
    scene.add_animation(Arc::new(Turntable {
        radians_per_sec: 0.5,
        angles: Mutex::new(vec![0.0; scene.lights().frames_in_flight()]),
    }));
    scene.set_skybox(Some(Arc::new(SkyDome { work })));

    info!(
        "Demo scene: {} drawable(s), {} shadow pass(es) per frame",
        scene.drawables().len(),
        scene.lights().shadow_pass_count()
    );
    Ok(())
}

/// Update hook moving the lamp on a circle around the scene center.
pub fn orbit_lamp(scene: &mut Scene, info: &FrameInfo) {
    let angle = info.elapsed * 0.8;
    scene
        .lights()
        .set_point_position(0, Vec3::new(4.0 * angle.cos(), 2.0, 4.0 * angle.sin()));
}

/// Full-screen tone map into the swapchain image.
pub struct ToneMap {
    pub work: Work,
}

impl PostProcessor for ToneMap {
    fn draw_compute(&mut self, ctx: &mut PostprocessContext<'_>) -> FrameResult<()> {
        if self.work == Work::Full {
            let (width, height) = ctx.swapchain.extent();
            ctx.command_buffer
                .dispatch(width.div_ceil(16), height.div_ceil(16), 1);
        }
        Ok(())
    }
}

/// Frame statistics panel.
pub struct StatsOverlay {
    pub work: Work,
    frames: u64,
}

impl StatsOverlay {
    pub fn new(work: Work) -> Self {
        Self {
            work,
            frames: 0,
        }
    }
}

impl Overlay for StatsOverlay {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> FrameResult<()> {
        self.frames += 1;
        if self.frames % 600 == 0 {
            debug!(frame = ctx.frame, "overlay drew {} frame(s)", self.frames);
        }
        if self.work == Work::Full {
            // Background quad plus one per text line
            ctx.command_buffer.draw(6, 4);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_core::Settings;
    use renderer_frame::FrameOrchestrator;
    use renderer_rhi::headless::HeadlessDevice;

    #[test]
    fn test_demo_scene_runs_clean() {
        let device = HeadlessDevice::immediate();
        let swapchain = Box::new(device.create_swapchain(3, (640, 360)));
        let mut orchestrator = FrameOrchestrator::new(
            Arc::new(device.clone()),
            swapchain,
            Settings {
                worker_threads: 2,
                ..Settings::default()
            },
            Box::new(ToneMap { work: Work::Full }),
            Box::new(StatsOverlay::new(Work::Full)),
        )
        .unwrap();
        let mut scene = orchestrator.create_scene().unwrap();
        populate(&mut scene, Work::Full).unwrap();
        orchestrator.register_update(orbit_lamp);

        let summary = orchestrator.run(&mut scene, 6).unwrap();
        assert_eq!(summary.presented, 6);
        orchestrator.wait_idle().unwrap();
        assert!(device.violations().unwrap().is_empty());
        assert_eq!(scene.lights().shadow_pass_count(), 7);
    }
}
