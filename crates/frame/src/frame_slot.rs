//! Per-frame-in-flight resources.

use std::fmt;

use renderer_rhi::{CommandBuffer, Device, QueueKind};
use tracing::debug;

use crate::error::{FrameError, FrameResult};
use crate::frame_sync::FrameSync;

/// Command buffers and sync objects of one slot. Shadow pass buffers are
/// owned by the lights instead, per slot.
pub struct FrameSlot {
    pub(crate) sync: FrameSync,
    pub(crate) render: Box<dyn CommandBuffer>,
    pub(crate) postprocess: Box<dyn CommandBuffer>,
    pub(crate) gui: Box<dyn CommandBuffer>,
    /// Lent to the particle job while it runs.
    pub(crate) particles: Option<Box<dyn CommandBuffer>>,
}

impl FrameSlot {
    pub fn new(device: &dyn Device, index: usize) -> FrameResult<Self> {
        let slot = Self {
            sync: FrameSync::new(device, index)?,
            render: device.create_command_buffer(QueueKind::Graphics, &format!("render[{index}]"))?,
            postprocess: device
                .create_command_buffer(QueueKind::Compute, &format!("postprocess[{index}]"))?,
            gui: device.create_command_buffer(QueueKind::Graphics, &format!("gui[{index}]"))?,
            particles: Some(particles_buffer(device, index)?),
        };
        debug!("Frame slot {} created", index);
        Ok(slot)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.sync.slot()
    }

    #[inline]
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Takes the particle command buffer for this frame's job.
    pub(crate) fn take_particles(&mut self) -> FrameResult<Box<dyn CommandBuffer>> {
        self.particles
            .take()
            .ok_or_else(|| FrameError::BufferLent(format!("particles[{}]", self.index())))
    }
}

fn particles_buffer(device: &dyn Device, index: usize) -> FrameResult<Box<dyn CommandBuffer>> {
    Ok(device.create_command_buffer(QueueKind::Compute, &format!("particles[{index}]"))?)
}

impl fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("sync", &self.sync)
            .field("particles_lent", &self.particles.is_none())
            .finish()
    }
}
