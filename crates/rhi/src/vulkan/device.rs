//! Vulkan logical device, queues and submission.
//!
//! [`VulkanDevice`] creates the logical device with the features the frame
//! loop depends on (timeline semaphores, dynamic rendering), retrieves the
//! graphics, compute and present queues, and initializes gpu-allocator.
//!
//! Every object created from the device keeps the shared device state alive
//! through an `Arc`, so the logical device is destroyed only after the last
//! fence, semaphore, command buffer or resource has been dropped.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::vulkan::{Instance, VulkanDevice, select_physical_device};
//! use renderer_rhi::{Device, QueueKind, SubmitInfo};
//! use ash::vk;
//!
//! # fn example(surface: vk::SurfaceKHR) -> Result<(), renderer_rhi::RhiError> {
//! let instance = Instance::new("renderer", false, &[])?;
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let physical = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = VulkanDevice::new(&instance, &physical)?;
//!
//! // An empty submission still orders fences and semaphores
//! let fence = device.create_fence(false, "example")?;
//! device.submit(QueueKind::Graphics, &SubmitInfo::default().fence(fence.as_ref()))?;
//! fence.wait(u64::MAX)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::command::CommandBuffer;
use crate::device::{Buffer, DepthTarget, Device};
use crate::error::{RhiError, RhiResult};
use crate::sync::{Fence, Semaphore, downcast};
use crate::types::{BufferDesc, DepthTargetDesc, QueueKind, SemaphoreKind, SubmitInfo};

use super::buffer::VulkanBuffer;
use super::command::VulkanCommandBuffer;
use super::convert;
use super::image::VulkanDepthTarget;
use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use super::sync::{VulkanFence, VulkanSemaphore};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// A queue handle guarded for external synchronization.
///
/// Vulkan requires host access to a `VkQueue` to be serialized. Families
/// that serve several roles share one `QueueLock`.
pub(crate) struct QueueLock {
    pub(crate) family: u32,
    queue: Mutex<vk::Queue>,
}

impl QueueLock {
    pub(crate) fn lock(&self) -> RhiResult<MutexGuard<'_, vk::Queue>> {
        self.queue.lock().map_err(|_| RhiError::LockPoisoned("queue"))
    }
}

/// State shared by the device and every object created from it.
pub(crate) struct DeviceShared {
    pub(crate) device: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics: Arc<QueueLock>,
    pub(crate) compute: Arc<QueueLock>,
    pub(crate) present: Arc<QueueLock>,
}

impl DeviceShared {
    pub(crate) fn queue(&self, kind: QueueKind) -> &QueueLock {
        match kind {
            QueueKind::Graphics => &self.graphics,
            QueueKind::Compute => &self.compute,
        }
    }

    pub(crate) fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::LockPoisoned("allocator"))
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator owns device memory and must go before the device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

/// Vulkan implementation of [`Device`].
pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
    name: String,
}

impl VulkanDevice {
    /// Creates a new logical device.
    ///
    /// Enables timeline semaphores (Vulkan 1.2) plus dynamic rendering and
    /// synchronization2 (Vulkan 1.3), and the swapchain extension.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(compute_family), Some(present_family)) = (
            queue_families.graphics_family,
            queue_families.compute_family,
            queue_families.present_family,
        ) else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };
        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let mut locks: HashMap<u32, Arc<QueueLock>> = HashMap::new();
        for &family in &unique_families {
            let queue = unsafe { device.get_device_queue(family, 0) };
            debug!("Queue retrieved from family {}", family);
            locks.insert(
                family,
                Arc::new(QueueLock {
                    family,
                    queue: Mutex::new(queue),
                }),
            );
        }
        let lock_for = |family: u32| {
            locks
                .get(&family)
                .cloned()
                .ok_or_else(|| RhiError::InvalidHandle(format!("queue family {family}")))
        };
        let graphics = lock_for(graphics_family)?;
        let compute = lock_for(compute_family)?;
        let present = lock_for(present_family)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        info!("GPU memory allocator initialized");

        let debug_utils = instance
            .has_debug_utils()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));

        Ok(Arc::new(Self {
            shared: Arc::new(DeviceShared {
                device,
                physical_device: physical_device_info.device,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                debug_utils,
                queue_families,
                graphics,
                compute,
                present,
            }),
            name: physical_device_info.device_name().to_string(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.shared.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.shared.physical_device
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.shared.queue_families
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }
}

impl fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("name", &self.name)
            .field("queue_families", &self.shared.queue_families)
            .finish()
    }
}

impl Device for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_fence(&self, signaled: bool, label: &str) -> RhiResult<Box<dyn Fence>> {
        Ok(Box::new(VulkanFence::new(
            self.shared.clone(),
            signaled,
            label,
        )?))
    }

    fn create_semaphore(&self, kind: SemaphoreKind, label: &str) -> RhiResult<Arc<dyn Semaphore>> {
        Ok(Arc::new(VulkanSemaphore::new(
            self.shared.clone(),
            kind,
            label,
        )?))
    }

    fn create_command_buffer(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> RhiResult<Box<dyn CommandBuffer>> {
        Ok(Box::new(VulkanCommandBuffer::new(
            self.shared.clone(),
            queue,
            label,
        )?))
    }

    fn create_depth_target(&self, desc: &DepthTargetDesc) -> RhiResult<Arc<dyn DepthTarget>> {
        Ok(Arc::new(VulkanDepthTarget::new(self.shared.clone(), desc)?))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Box<dyn Buffer>> {
        Ok(Box::new(VulkanBuffer::new(self.shared.clone(), desc)?))
    }

    fn submit(&self, queue: QueueKind, info: &SubmitInfo<'_>) -> RhiResult<()> {
        let mut command_buffers = Vec::with_capacity(info.command_buffers.len());
        for command_buffer in &info.command_buffers {
            if command_buffer.queue() != queue {
                return Err(RhiError::SubmitError(format!(
                    "'{}' was allocated for the {} queue, submitted to {}",
                    command_buffer.label(),
                    command_buffer.queue(),
                    queue
                )));
            }
            let vk_buffer =
                downcast::<VulkanCommandBuffer>(command_buffer.as_any(), "command buffer")?;
            command_buffers.push(vk_buffer.handle());
        }

        let mut wait_semaphores = Vec::with_capacity(info.waits.len());
        let mut wait_values = Vec::with_capacity(info.waits.len());
        let mut wait_stages = Vec::with_capacity(info.waits.len());
        for wait in &info.waits {
            let semaphore = downcast::<VulkanSemaphore>(wait.semaphore.as_any(), "semaphore")?;
            wait_semaphores.push(semaphore.handle());
            // Binary semaphores ignore the value but the array must match
            wait_values.push(wait.value.unwrap_or(0));
            wait_stages.push(convert::pipeline_stage(wait.stage));
        }

        let mut signal_semaphores = Vec::with_capacity(info.signals.len());
        let mut signal_values = Vec::with_capacity(info.signals.len());
        for signal in &info.signals {
            let semaphore = downcast::<VulkanSemaphore>(signal.semaphore.as_any(), "semaphore")?;
            signal_semaphores.push(semaphore.handle());
            signal_values.push(signal.value.unwrap_or(0));
        }

        let fence = match info.fence {
            Some(fence) => downcast::<VulkanFence>(fence.as_any(), "fence")?.handle(),
            None => vk::Fence::null(),
        };

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue_lock = self.shared.queue(queue);
        let vk_queue = queue_lock.lock()?;
        unsafe {
            self.shared
                .device
                .queue_submit(*vk_queue, &[submit_info], fence)?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.shared.device.device_wait_idle()? };
        Ok(())
    }
}
