//! Particle simulation job.
//!
//! Runs on a pool worker next to the shadow jobs. It records one compute
//! command buffer for all particle systems and signals the slot's
//! `particle_done` timeline, which the render pass waits on before reading
//! particle vertices.

use std::sync::Arc;

use renderer_rhi::{Access, CommandBuffer, Device, PipelineStage, QueueKind, Semaphore, SubmitInfo};
use tracing::trace;

use crate::drawable::{ComputeContext, ParticleSystem};
use crate::error::FrameResult;
use crate::frame_sync::timeline_value;

pub struct ParticleJob {
    pub device: Arc<dyn Device>,
    pub systems: Arc<[Arc<dyn ParticleSystem>]>,
    pub particle_done: Arc<dyn Semaphore>,
    pub command_buffer: Box<dyn CommandBuffer>,
    pub frame: u64,
    pub slot: usize,
    pub elapsed: f32,
}

impl ParticleJob {
    /// Records and submits the simulation step, returning the command
    /// buffer to its slot.
    ///
    /// The submission happens even with no particle systems, because the
    /// render pass waits on the signal unconditionally.
    pub fn run(self) -> FrameResult<Box<dyn CommandBuffer>> {
        let Self {
            device,
            systems,
            particle_done,
            mut command_buffer,
            frame,
            slot,
            elapsed,
        } = self;

        let cb = command_buffer.as_mut();
        cb.begin()?;
        cb.begin_label(&format!("particles {frame}"));
        // Previous simulation step's writes become visible to this one
        cb.memory_barrier(
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_WRITE,
            PipelineStage::COMPUTE_SHADER,
            Access::SHADER_READ,
        );
        let mut ctx = ComputeContext {
            slot,
            frame,
            elapsed,
            command_buffer: &mut *cb,
        };
        for system in systems.iter() {
            system.draw_compute(&mut ctx);
        }
        cb.end_label();
        cb.end()?;

        device.submit(
            QueueKind::Compute,
            &SubmitInfo::default()
                .command_buffer(command_buffer.as_ref())
                .signal_value(particle_done.as_ref(), timeline_value(frame)),
        )?;
        trace!(frame, systems = systems.len(), "particle job submitted");
        Ok(command_buffer)
    }
}
