//! Depth-only render targets used as shadow map faces.
//!
//! Each target is a D32_SFLOAT image in GPU-only memory with one view. It is
//! written as a depth attachment by a shadow job and sampled by the main
//! pass, so it carries both attachment and sampled usage.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::DepthTarget;
use crate::error::{RhiError, RhiResult};
use crate::types::DepthTargetDesc;

use super::device::DeviceShared;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

pub struct VulkanDepthTarget {
    device: Arc<DeviceShared>,
    image: vk::Image,
    image_view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    label: String,
}

impl VulkanDepthTarget {
    pub(crate) fn new(device: Arc<DeviceShared>, desc: &DepthTargetDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "depth target '{}' must have a non-zero extent",
                desc.label
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&image_info, None)? };
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator()?.allocate(&AllocationCreateDesc {
            name: &desc.label,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH)
                    .level_count(1)
                    .layer_count(1),
            );
        let image_view = unsafe { device.device.create_image_view(&view_info, None)? };

        debug!(
            "Created depth target '{}': {}x{}",
            desc.label, desc.width, desc.height
        );

        Ok(Self {
            device,
            image,
            image_view,
            allocation: Some(allocation),
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            label: desc.label.clone(),
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }
}

impl DepthTarget for VulkanDepthTarget {
    fn label(&self) -> &str {
        &self.label
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for VulkanDepthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDepthTarget")
            .field("label", &self.label)
            .field("extent", &self.extent)
            .finish()
    }
}

impl Drop for VulkanDepthTarget {
    fn drop(&mut self) {
        // View before image, image before its memory
        unsafe {
            self.device.device.destroy_image_view(self.image_view, None);
            self.device.device.destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free depth target '{}': {:?}", self.label, e);
                    }
                }
                Err(e) => error!("Leaking depth target '{}' memory: {}", self.label, e),
            }
        }
        debug!("Destroyed depth target '{}'", self.label);
    }
}
