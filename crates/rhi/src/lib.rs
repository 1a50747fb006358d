//! Rendering hardware interface.
//!
//! The frame loop talks to the GPU only through the traits in this crate:
//! [`Device`], [`Fence`], [`Semaphore`], [`CommandBuffer`], [`Swapchain`],
//! [`DepthTarget`] and [`Buffer`]. Two backends implement them:
//!
//! - [`vulkan`]: ash on Vulkan 1.3 with timeline semaphores and
//!   gpu-allocator managed memory
//! - [`headless`]: a CPU simulation of queues and sync objects that records
//!   a journal, used for tests and runs without a GPU

pub mod command;
pub mod device;
pub mod error;
pub mod headless;
pub mod swapchain;
pub mod sync;
pub mod types;
pub mod vulkan;

pub use command::CommandBuffer;
pub use device::{Buffer, DepthTarget, Device};
pub use error::{RhiError, RhiResult};
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
pub use types::{
    Access, AcquiredImage, BufferDesc, DepthTargetDesc, ImageLayout, PipelineStage, QueueKind,
    SemaphoreKind, SemaphoreSignal, SemaphoreWait, SubmitInfo, SurfaceStatus,
};

// Re-export ash for hosts that drive the Vulkan backend directly
pub use ash;
pub use ash::vk;
