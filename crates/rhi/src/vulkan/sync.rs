//! Vulkan fences and semaphores.
//!
//! - [`VulkanFence`] - GPU-to-CPU synchronization (host waits for a submit)
//! - [`VulkanSemaphore`] - GPU-to-GPU synchronization, binary or timeline
//!
//! Timeline semaphores are created with an initial value of 0. The frame
//! loop signals them with `frame + 1`, so the first frame never waits on a
//! value that was set at creation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::sync::{Fence, Semaphore};
use crate::types::SemaphoreKind;

use super::device::DeviceShared;

/// Vulkan fence wrapper.
pub struct VulkanFence {
    device: Arc<DeviceShared>,
    fence: vk::Fence,
    label: String,
}

impl VulkanFence {
    pub(crate) fn new(device: Arc<DeviceShared>, signaled: bool, label: &str) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.device.create_fence(&create_info, None)? };

        debug!(
            "Created fence '{}' ({})",
            label,
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device,
            fence,
            label: label.to_string(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Fence for VulkanFence {
    fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let fences = [self.fence];
        match unsafe { self.device.device.wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout {
                label: self.label.clone(),
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.device.reset_fences(&fences)? };
        Ok(())
    }

    fn is_signaled(&self) -> RhiResult<bool> {
        Ok(unsafe { self.device.device.get_fence_status(self.fence)? })
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanFence")
            .field("label", &self.label)
            .field("fence", &self.fence)
            .finish()
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence '{}'", self.label);
    }
}

/// Vulkan semaphore wrapper.
pub struct VulkanSemaphore {
    device: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
    kind: SemaphoreKind,
    label: String,
}

impl VulkanSemaphore {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        kind: SemaphoreKind,
        label: &str,
    ) -> RhiResult<Self> {
        let semaphore_type = match kind {
            SemaphoreKind::Binary => vk::SemaphoreType::BINARY,
            SemaphoreKind::Timeline => vk::SemaphoreType::TIMELINE,
        };
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(semaphore_type)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.device.create_semaphore(&create_info, None)? };
        debug!("Created {:?} semaphore '{}'", kind, label);

        Ok(Self {
            device,
            semaphore,
            kind,
            label: label.to_string(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Semaphore for VulkanSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn value(&self) -> RhiResult<u64> {
        match self.kind {
            SemaphoreKind::Binary => Ok(0),
            SemaphoreKind::Timeline => Ok(unsafe {
                self.device
                    .device
                    .get_semaphore_counter_value(self.semaphore)?
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanSemaphore")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore '{}'", self.label);
    }
}
