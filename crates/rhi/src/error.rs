//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error, including objects from a different backend
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A fence did not signal within the allowed time. The GPU is
    /// considered hung; callers do not retry.
    #[error("Fence '{label}' not signaled after {timeout_ns} ns")]
    FenceTimeout { label: String, timeout_ns: u64 },

    /// A queue submission was rejected
    #[error("Submit error: {0}")]
    SubmitError(String),

    /// A lock guarding a queue or allocator was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
