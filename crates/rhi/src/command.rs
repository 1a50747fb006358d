//! Command buffer recording interface.
//!
//! A [`CommandBuffer`] is owned by exactly one recorder at a time. It is
//! `Send` so a pool worker can record it and hand it back, but never shared.

use std::any::Any;
use std::fmt::Debug;

use crate::device::DepthTarget;
use crate::error::RhiResult;
use crate::swapchain::Swapchain;
use crate::types::{Access, ImageLayout, PipelineStage, QueueKind};

pub trait CommandBuffer: Send + Debug {
    /// Queue this buffer was allocated for.
    fn queue(&self) -> QueueKind;

    fn label(&self) -> &str;

    /// Resets the buffer and starts a one-time-submit recording.
    fn begin(&mut self) -> RhiResult<()>;

    fn end(&mut self) -> RhiResult<()>;

    // =========================================================================
    // Debug labels
    // =========================================================================

    fn begin_label(&mut self, name: &str);

    fn end_label(&mut self);

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Global memory barrier.
    fn memory_barrier(
        &mut self,
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    );

    /// Layout transition of a depth target.
    fn transition_depth(&mut self, target: &dyn DepthTarget, from: ImageLayout, to: ImageLayout);

    /// Layout transition of a swapchain image.
    fn transition_swapchain_image(
        &mut self,
        swapchain: &dyn Swapchain,
        image_index: u32,
        from: ImageLayout,
        to: ImageLayout,
    ) -> RhiResult<()>;

    // =========================================================================
    // Depth passes
    // =========================================================================

    /// Starts depth-only rendering into `target`, clearing to `clear_depth`.
    fn begin_depth_pass(&mut self, target: &dyn DepthTarget, clear_depth: f32);

    fn set_depth_bias(&mut self, constant: f32, slope: f32);

    fn end_depth_pass(&mut self);

    // =========================================================================
    // Work
    // =========================================================================

    fn draw(&mut self, vertex_count: u32, instance_count: u32);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
