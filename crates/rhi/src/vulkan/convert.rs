//! Mapping from backend-neutral RHI types to Vulkan flags.

use ash::vk;

use crate::types::{Access, ImageLayout, PipelineStage};

pub(crate) fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    const TABLE: [(PipelineStage, vk::PipelineStageFlags); 11] = [
        (PipelineStage::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStage::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStage::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (
            PipelineStage::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (PipelineStage::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStage::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStage::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStage::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStage::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStage::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];

    let flags = TABLE
        .iter()
        .filter(|(ours, _)| stage.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, vk_flag)| acc | *vk_flag);

    // An empty stage mask is invalid in a barrier
    if flags.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        flags
    }
}

pub(crate) fn access(access: Access) -> vk::AccessFlags {
    const TABLE: [(Access, vk::AccessFlags); 7] = [
        (Access::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (Access::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (
            Access::DEPTH_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            Access::DEPTH_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (
            Access::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            Access::VERTEX_ATTRIBUTE_READ,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        (Access::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
    ];

    TABLE
        .iter()
        .filter(|(ours, _)| access.contains(*ours))
        .fold(vk::AccessFlags::empty(), |acc, (_, vk_flag)| acc | *vk_flag)
}

pub(crate) fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthReadOnly => vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Access and stage masks implied by an image being in `layout`.
pub(crate) fn layout_usage(layout: ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        ImageLayout::Undefined => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        ImageLayout::DepthAttachment => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ImageLayout::DepthReadOnly => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        ImageLayout::General => (
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::SHADER_WRITE
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        ImageLayout::PresentSrc => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
    }
}

/// Source stage of a barrier on a swapchain image leaving `from`.
///
/// A freshly acquired image is only ordered by the `image_available` wait,
/// which the post-process submission places at the compute stage. The
/// barrier has to start from that stage to chain with the wait.
pub(crate) fn swapchain_src_stage(from: ImageLayout) -> vk::PipelineStageFlags {
    match from {
        ImageLayout::Undefined => vk::PipelineStageFlags::COMPUTE_SHADER,
        other => layout_usage(other).0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stage_combines_flags() {
        let flags = pipeline_stage(PipelineStage::FRAGMENT_SHADER | PipelineStage::VERTEX_INPUT);
        assert_eq!(
            flags,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::VERTEX_INPUT
        );
    }

    #[test]
    fn test_empty_stage_maps_to_top_of_pipe() {
        assert_eq!(
            pipeline_stage(PipelineStage::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }

    #[test]
    fn test_access_mapping() {
        assert_eq!(
            access(Access::SHADER_WRITE | Access::SHADER_READ),
            vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::SHADER_READ
        );
        assert!(access(Access::empty()).is_empty());
    }

    #[test]
    fn test_image_layout_mapping() {
        assert_eq!(
            image_layout(ImageLayout::PresentSrc),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            image_layout(ImageLayout::DepthReadOnly),
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_acquired_image_barrier_chains_with_acquire_wait() {
        assert_eq!(
            swapchain_src_stage(ImageLayout::Undefined),
            vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(
            swapchain_src_stage(ImageLayout::General),
            layout_usage(ImageLayout::General).0
        );
        // Depth targets keep the plain layout mapping
        assert_eq!(
            layout_usage(ImageLayout::Undefined).0,
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }
}
