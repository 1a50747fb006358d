//! Frame loop error types.

use renderer_rhi::RhiError;
use thiserror::Error;

use crate::frame_sync::SyncState;

/// Errors raised while producing a frame.
///
/// Every error is fatal for the frame loop; nothing is retried. A frame
/// that fails leaves its slot in [`SyncState::Recording`], so later frames
/// on that slot report [`FrameError::InvalidState`].
#[derive(Error, Debug)]
pub enum FrameError {
    /// Device, queue or synchronization failure, including fence timeouts
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A frame step was called out of order
    #[error("frame slot {slot}: expected {expected}, found {found}")]
    InvalidState {
        slot: usize,
        expected: SyncState,
        found: SyncState,
    },

    /// A pool job panicked while recording
    #[error("job '{0}' panicked")]
    JobPanicked(String),

    /// A pool job finished without sending its result
    #[error("job '{0}' dropped its result channel")]
    JobDisconnected(String),

    /// A command buffer lent to a job never came back
    #[error("command buffer '{0}' was not returned by its job")]
    BufferLent(String),

    /// Settings the frame loop cannot run with
    #[error("configuration error: {0}")]
    Config(String),
}

impl FrameError {
    /// True when the error means the GPU stopped making progress.
    pub fn is_gpu_hang(&self) -> bool {
        matches!(self, FrameError::Rhi(RhiError::FenceTimeout { .. }))
    }
}

/// Result type alias for frame operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
