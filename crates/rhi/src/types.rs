//! Plain data shared by every backend: queues, stages, layouts and the
//! submission description.

use std::fmt;

use crate::command::CommandBuffer;
use crate::sync::{Fence, Semaphore};

/// Hardware queue a command buffer is recorded for and submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Graphics => f.write_str("graphics"),
            QueueKind::Compute => f.write_str("compute"),
        }
    }
}

bitflags::bitflags! {
    /// Pipeline stages a wait applies to or a barrier covers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const EARLY_FRAGMENT_TESTS = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const LATE_FRAGMENT_TESTS = 1 << 5;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        const COMPUTE_SHADER = 1 << 7;
        const TRANSFER = 1 << 8;
        const BOTTOM_OF_PIPE = 1 << 9;
        const ALL_COMMANDS = 1 << 10;
    }
}

bitflags::bitflags! {
    /// Memory access kinds for barriers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const DEPTH_ATTACHMENT_READ = 1 << 2;
        const DEPTH_ATTACHMENT_WRITE = 1 << 3;
        const COLOR_ATTACHMENT_WRITE = 1 << 4;
        const VERTEX_ATTRIBUTE_READ = 1 << 5;
        const TRANSFER_WRITE = 1 << 6;
    }
}

/// Image layouts the frame loop moves its targets through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    DepthAttachment,
    DepthReadOnly,
    General,
    PresentSrc,
}

/// Binary semaphores are consumed by a single wait; timeline semaphores carry
/// a monotonically increasing counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    Binary,
    Timeline,
}

/// State of the presentation surface as reported by acquire and present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceStatus {
    Optimal,
    /// Presentable, but no longer matches the surface exactly.
    Suboptimal,
    /// Not presentable; nothing was acquired or presented.
    OutOfDate,
}

impl SurfaceStatus {
    /// True when the swapchain would need recreating.
    pub fn needs_recreate(self) -> bool {
        self != SurfaceStatus::Optimal
    }
}

/// Result of [`Swapchain::acquire_next_image`](crate::swapchain::Swapchain::acquire_next_image).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    /// `None` when the surface is out of date.
    pub index: Option<u32>,
    pub status: SurfaceStatus,
}

/// Description of a depth-only render target.
#[derive(Clone, Debug)]
pub struct DepthTargetDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// Description of a host-visible buffer.
#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
}

/// One semaphore wait in a submission.
#[derive(Clone, Copy)]
pub struct SemaphoreWait<'a> {
    pub semaphore: &'a dyn Semaphore,
    /// Timeline value to wait for; ignored for binary semaphores.
    pub value: Option<u64>,
    /// First stage that touches the guarded data.
    pub stage: PipelineStage,
}

/// One semaphore signal in a submission.
#[derive(Clone, Copy)]
pub struct SemaphoreSignal<'a> {
    pub semaphore: &'a dyn Semaphore,
    /// Timeline value to signal; ignored for binary semaphores.
    pub value: Option<u64>,
}

/// A single queue submission, built like the `vk::*Info` builders.
///
/// ```
/// use renderer_rhi::SubmitInfo;
///
/// let info = SubmitInfo::default();
/// assert!(info.command_buffers.is_empty());
/// ```
#[derive(Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: Vec<&'a dyn CommandBuffer>,
    pub waits: Vec<SemaphoreWait<'a>>,
    pub signals: Vec<SemaphoreSignal<'a>>,
    pub fence: Option<&'a dyn Fence>,
}

impl<'a> SubmitInfo<'a> {
    pub fn command_buffer(mut self, command_buffer: &'a dyn CommandBuffer) -> Self {
        self.command_buffers.push(command_buffer);
        self
    }

    /// Waits on a binary semaphore.
    pub fn wait(mut self, semaphore: &'a dyn Semaphore, stage: PipelineStage) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore,
            value: None,
            stage,
        });
        self
    }

    /// Waits until a timeline semaphore reaches `value`.
    pub fn wait_value(
        mut self,
        semaphore: &'a dyn Semaphore,
        value: u64,
        stage: PipelineStage,
    ) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore,
            value: Some(value),
            stage,
        });
        self
    }

    /// Signals a binary semaphore.
    pub fn signal(mut self, semaphore: &'a dyn Semaphore) -> Self {
        self.signals.push(SemaphoreSignal {
            semaphore,
            value: None,
        });
        self
    }

    /// Sets a timeline semaphore to `value`.
    pub fn signal_value(mut self, semaphore: &'a dyn Semaphore, value: u64) -> Self {
        self.signals.push(SemaphoreSignal {
            semaphore,
            value: Some(value),
        });
        self
    }

    pub fn fence(mut self, fence: &'a dyn Fence) -> Self {
        self.fence = Some(fence);
        self
    }

    /// Submissions with no command buffers still order semaphores and fences.
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }
}
