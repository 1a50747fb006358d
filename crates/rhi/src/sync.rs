//! Fence and semaphore traits.

use std::any::Any;
use std::fmt::Debug;

use crate::error::RhiResult;
use crate::types::SemaphoreKind;

/// CPU-observable completion signal for a queue submission.
pub trait Fence: Send + Sync + Debug {
    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`](crate::RhiError::FenceTimeout) if the
    /// fence is still unsignaled after `timeout_ns`.
    fn wait(&self, timeout_ns: u64) -> RhiResult<()>;

    /// Returns the fence to the unsignaled state.
    fn reset(&self) -> RhiResult<()>;

    fn is_signaled(&self) -> RhiResult<bool>;

    fn label(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// GPU-side ordering primitive between submissions.
pub trait Semaphore: Send + Sync + Debug {
    fn kind(&self) -> SemaphoreKind;

    fn label(&self) -> &str;

    /// Current counter of a timeline semaphore. Binary semaphores report 0.
    fn value(&self) -> RhiResult<u64>;

    fn as_any(&self) -> &dyn Any;
}

/// Downcasts a trait object to a backend type, naming the object on failure.
pub(crate) fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &str) -> RhiResult<&'a T> {
    any.downcast_ref::<T>().ok_or_else(|| {
        crate::RhiError::InvalidHandle(format!("{what} belongs to a different backend"))
    })
}
