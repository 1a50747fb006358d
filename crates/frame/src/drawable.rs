//! Traits the frame loop draws through.
//!
//! Pipelines, meshes and descriptor layouts live behind these traits. The
//! orchestrator only decides when each hook runs and which command buffer it
//! records into.
//!
//! Drawables, particle systems and animations are shared with pool workers,
//! so they are `Send + Sync` and take `&self`; anything they mutate per
//! frame (timers, per-slot uniforms) uses interior mutability.

use glam::Mat4;
use renderer_rhi::{CommandBuffer, Swapchain};
use renderer_scene::CubeFace;

use crate::error::FrameResult;
use crate::shadow::LightKind;

/// Recording state handed to graphics hooks.
pub struct DrawContext<'a> {
    pub slot: usize,
    pub frame: u64,
    /// Render target size in pixels.
    pub extent: (u32, u32),
    pub command_buffer: &'a mut dyn CommandBuffer,
}

/// One shadow pass: a directional light or one face of a point light.
pub struct ShadowContext<'a> {
    pub light: LightKind,
    /// Position of the light in its kind's list.
    pub light_index: usize,
    /// Set for point lights only.
    pub face: Option<CubeFace>,
    pub slot: usize,
    pub view_projection: Mat4,
    pub command_buffer: &'a mut dyn CommandBuffer,
}

/// Compute recording state for the particle job.
pub struct ComputeContext<'a> {
    pub slot: usize,
    pub frame: u64,
    /// Seconds since the orchestrator started.
    pub elapsed: f32,
    pub command_buffer: &'a mut dyn CommandBuffer,
}

/// Post-processing state. The acquired swapchain image is in `General`
/// layout when the post-processor runs.
pub struct PostprocessContext<'a> {
    pub slot: usize,
    pub frame: u64,
    pub image_index: u32,
    pub swapchain: &'a dyn Swapchain,
    pub command_buffer: &'a mut dyn CommandBuffer,
}

pub trait Drawable: Send + Sync {
    fn name(&self) -> &str;

    /// Records the main pass draw.
    fn draw(&self, ctx: &mut DrawContext<'_>);

    /// Records a depth-only draw for one shadow pass. Called from pool
    /// workers, possibly for several passes at once.
    fn draw_shadow(&self, _ctx: &mut ShadowContext<'_>) {}

    fn casts_shadow(&self) -> bool {
        true
    }
}

pub trait ParticleSystem: Send + Sync {
    /// Records the simulation step on the compute queue.
    fn draw_compute(&self, ctx: &mut ComputeContext<'_>);

    /// Records the draw of the simulated particles in the main pass.
    fn draw_graphic(&self, ctx: &mut DrawContext<'_>);
}

/// Per-slot animation state, updated on a pool worker.
///
/// `update_animation` for slot `s` runs while the frame recorded for the
/// previous slot may still be on the GPU, so implementations stage their
/// results on the host and upload them when `s` is next drawn.
pub trait Animated: Send + Sync {
    fn update_animation(&self, slot: usize, elapsed: f32);
}

/// Tone mapping and other full-screen compute work after bloom.
pub trait PostProcessor: Send {
    fn draw_compute(&mut self, ctx: &mut PostprocessContext<'_>) -> FrameResult<()>;
}

/// Debug UI drawn on top of the post-processed image.
pub trait Overlay: Send {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> FrameResult<()>;
}

pub trait Skybox: Send + Sync {
    fn draw(&self, ctx: &mut DrawContext<'_>);
}
