//! Vulkan 1.3 backend built on ash.
//!
//! Bring-up order: [`Instance`] → surface (created by the platform layer) →
//! [`select_physical_device`] → [`VulkanDevice`] → [`VulkanSwapchain`].
//! After that the frame loop only sees the RHI traits.

mod buffer;
mod command;
mod convert;
mod device;
mod image;
mod instance;
mod physical_device;
mod swapchain;
mod sync;

pub use buffer::VulkanBuffer;
pub use command::VulkanCommandBuffer;
pub use device::VulkanDevice;
pub use image::{DEPTH_FORMAT, VulkanDepthTarget};
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
pub use swapchain::{SwapchainSupportDetails, VulkanSwapchain};
pub use sync::{VulkanFence, VulkanSemaphore};
