//! Vulkan command buffer recording.
//!
//! Each [`VulkanCommandBuffer`] owns its own `VkCommandPool`. Pools are
//! externally synchronized, so a private pool is what lets a worker thread
//! record shadow or particle work while the control thread records the main
//! pass.

use std::any::Any;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::command::CommandBuffer;
use crate::device::DepthTarget;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::Swapchain;
use crate::sync::downcast;
use crate::types::{Access, ImageLayout, PipelineStage, QueueKind};

use super::convert;
use super::device::DeviceShared;
use super::image::VulkanDepthTarget;
use super::swapchain::VulkanSwapchain;

pub struct VulkanCommandBuffer {
    device: Arc<DeviceShared>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    queue: QueueKind,
    label: String,
    recording: bool,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(device: Arc<DeviceShared>, queue: QueueKind, label: &str) -> RhiResult<Self> {
        let family = device.queue(queue).family;
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.device.create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Created command buffer '{}' for {} queue (family {})",
            label, queue, family
        );

        Ok(Self {
            device,
            pool,
            buffer,
            queue,
            label: label.to_string(),
            recording: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    fn image_barrier(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        src_stage: vk::PipelineStageFlags,
        from: ImageLayout,
        to: ImageLayout,
    ) {
        let (_, src_access) = convert::layout_usage(from);
        let (dst_stage, dst_access) = convert::layout_usage(to);
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(convert::image_layout(from))
            .new_layout(convert::image_layout(to))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn queue(&self) -> QueueKind {
        self.queue
    }

    fn label(&self) -> &str {
        &self.label
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    fn begin(&mut self) -> RhiResult<()> {
        if self.recording {
            return Err(RhiError::SubmitError(format!(
                "command buffer '{}' is already recording",
                self.label
            )));
        }
        unsafe {
            self.device
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .device
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        unsafe { self.device.device.end_command_buffer(self.buffer)? };
        self.recording = false;
        Ok(())
    }

    // =========================================================================
    // Debug labels
    // =========================================================================

    fn begin_label(&mut self, name: &str) {
        let Some(debug_utils) = &self.device.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            warn!("Skipping debug label with interior NUL: {:?}", name);
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.buffer, &label) };
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = &self.device.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.buffer) };
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn memory_barrier(
        &mut self,
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    ) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(convert::access(src_access))
            .dst_access_mask(convert::access(dst_access));
        unsafe {
            self.device.device.cmd_pipeline_barrier(
                self.buffer,
                convert::pipeline_stage(src_stage),
                convert::pipeline_stage(dst_stage),
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn transition_depth(&mut self, target: &dyn DepthTarget, from: ImageLayout, to: ImageLayout) {
        match downcast::<VulkanDepthTarget>(target.as_any(), "depth target") {
            Ok(target) => {
                let src_stage = convert::layout_usage(from).0;
                self.image_barrier(target.image(), vk::ImageAspectFlags::DEPTH, src_stage, from, to)
            }
            Err(e) => warn!("Skipping depth transition in '{}': {}", self.label, e),
        }
    }

    fn transition_swapchain_image(
        &mut self,
        swapchain: &dyn Swapchain,
        image_index: u32,
        from: ImageLayout,
        to: ImageLayout,
    ) -> RhiResult<()> {
        let swapchain = downcast::<VulkanSwapchain>(swapchain.as_any(), "swapchain")?;
        let image = swapchain.image(image_index)?;
        let src_stage = convert::swapchain_src_stage(from);
        self.image_barrier(image, vk::ImageAspectFlags::COLOR, src_stage, from, to);
        Ok(())
    }

    // =========================================================================
    // Depth passes (dynamic rendering)
    // =========================================================================

    fn begin_depth_pass(&mut self, target: &dyn DepthTarget, clear_depth: f32) {
        let target = match downcast::<VulkanDepthTarget>(target.as_any(), "depth target") {
            Ok(target) => target,
            Err(e) => {
                warn!("Skipping depth pass in '{}': {}", self.label, e);
                return;
            }
        };
        let (width, height) = target.extent();
        let extent = vk::Extent2D { width, height };

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.image_view())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear_depth,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            let device = &self.device.device;
            device.cmd_begin_rendering(self.buffer, &rendering_info);
            device.cmd_set_viewport(self.buffer, 0, &[viewport]);
            device.cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    fn set_depth_bias(&mut self, constant: f32, slope: f32) {
        unsafe {
            self.device
                .device
                .cmd_set_depth_bias(self.buffer, constant, 0.0, slope);
        }
    }

    fn end_depth_pass(&mut self) {
        unsafe { self.device.device.cmd_end_rendering(self.buffer) };
    }

    // =========================================================================
    // Work
    // =========================================================================

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .device
                .cmd_draw(self.buffer, vertex_count, instance_count, 0, 0);
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device.device.cmd_dispatch(self.buffer, x, y, z) };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanCommandBuffer")
            .field("label", &self.label)
            .field("queue", &self.queue)
            .field("recording", &self.recording)
            .finish()
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        // Freeing the pool frees the buffer
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
        debug!("Destroyed command buffer '{}'", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<VulkanCommandBuffer>();
    }
}
