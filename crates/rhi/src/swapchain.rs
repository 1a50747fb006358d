//! Presentation interface.

use std::any::Any;
use std::fmt::Debug;

use crate::error::RhiResult;
use crate::sync::Semaphore;
use crate::types::{AcquiredImage, SurfaceStatus};

pub trait Swapchain: Send + Debug {
    /// Acquires the next presentable image, signaling `signal` once it is
    /// ready. An out-of-date surface is reported in the returned status, not
    /// as an error.
    fn acquire_next_image(&mut self, signal: &dyn Semaphore, timeout_ns: u64)
    -> RhiResult<AcquiredImage>;

    /// Queues `image_index` for presentation once `wait` is signaled.
    fn present(&mut self, image_index: u32, wait: &dyn Semaphore) -> RhiResult<SurfaceStatus>;

    fn image_count(&self) -> u32;

    fn extent(&self) -> (u32, u32);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
