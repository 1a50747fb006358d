//! Device interface shared by the Vulkan and headless backends.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::command::CommandBuffer;
use crate::error::RhiResult;
use crate::sync::{Fence, Semaphore};
use crate::types::{BufferDesc, DepthTargetDesc, QueueKind, SemaphoreKind, SubmitInfo};

/// Logical GPU device: object factory plus queue submission.
///
/// Implementations are shared as `Arc<dyn Device>` between the control
/// thread and recording workers. `submit` may be called concurrently; each
/// backend serializes calls per queue internally.
pub trait Device: Send + Sync + Debug {
    /// Human-readable adapter name.
    fn name(&self) -> &str;

    fn create_fence(&self, signaled: bool, label: &str) -> RhiResult<Box<dyn Fence>>;

    fn create_semaphore(&self, kind: SemaphoreKind, label: &str) -> RhiResult<Arc<dyn Semaphore>>;

    fn create_command_buffer(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> RhiResult<Box<dyn CommandBuffer>>;

    fn create_depth_target(&self, desc: &DepthTargetDesc) -> RhiResult<Arc<dyn DepthTarget>>;

    /// Creates a host-visible buffer.
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Box<dyn Buffer>>;

    /// Submits one batch to `queue`.
    ///
    /// Every command buffer in `info` must have been allocated for `queue`
    /// and ended.
    fn submit(&self, queue: QueueKind, info: &SubmitInfo<'_>) -> RhiResult<()>;

    /// Blocks until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;
}

/// Depth-only image with a view, used as a shadow map face.
pub trait DepthTarget: Send + Sync + Debug {
    fn label(&self) -> &str;

    fn extent(&self) -> (u32, u32);

    fn as_any(&self) -> &dyn Any;
}

/// Host-visible GPU buffer.
pub trait Buffer: Send + Sync + Debug {
    fn label(&self) -> &str;

    fn size(&self) -> u64;

    /// Copies `data` into the buffer at `offset`.
    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()>;

    fn as_any(&self) -> &dyn Any;
}
