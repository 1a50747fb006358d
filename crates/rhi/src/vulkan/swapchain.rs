//! Vulkan swapchain: image acquisition and presentation.
//!
//! [`VulkanSwapchain`] implements the backend-neutral [`Swapchain`] trait.
//! Out-of-date and suboptimal surfaces are reported through
//! [`SurfaceStatus`] instead of errors so the frame loop can skip or flag
//! the frame and carry on.
//!
//! Swapchain images are written by the tone-map compute pass, so storage
//! usage is requested whenever the surface supports it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::Swapchain;
use crate::sync::{Semaphore, downcast};
use crate::types::{AcquiredImage, SurfaceStatus};

use super::device::{DeviceShared, QueueLock, VulkanDevice};
use super::instance::Instance;
use super::sync::VulkanSemaphore;

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, min images {}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan implementation of [`Swapchain`].
pub struct VulkanSwapchain {
    device: Arc<DeviceShared>,
    present_queue: Arc<QueueLock>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl VulkanSwapchain {
    /// Creates a swapchain for `surface`. The surface itself stays owned by
    /// the caller and must outlive the swapchain.
    pub fn new(
        instance: &Instance,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let shared = device.shared().clone();
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &shared.device);

        let mut swapchain = Self {
            present_queue: shared.present.clone(),
            device: shared,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D { width, height },
            present_mode: vk::PresentModeKHR::FIFO,
        };
        swapchain.build(width, height)?;
        Ok(swapchain)
    }

    /// Rebuilds the swapchain for a new surface size.
    ///
    /// The caller must make sure no image of the old swapchain is in use,
    /// typically by waiting for the device to go idle first.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain for new size: {}x{}", width, height);
        self.build(width, height)
    }

    fn build(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device,
            self.surface,
            &self.surface_loader,
        )?;
        let Some(surface_format) = choose_surface_format(&support.formats) else {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        };
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities);
        let usage = image_usage(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images, usage {:?}",
            extent.width, extent.height, surface_format.format, present_mode, image_count, usage
        );

        let families = self.device.queue_families.unique_families();
        let (sharing_mode, family_indices) = if families.len() > 1 {
            debug!("Using CONCURRENT sharing mode across families {:?}", families);
            (vk::SharingMode::CONCURRENT, families.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device.device, &self.images, surface_format.format)?;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        info!("Swapchain created with {} images", self.images.len());
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image(&self, index: u32) -> RhiResult<vk::Image> {
        self.images.get(index as usize).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "swapchain image {} out of {}",
                index,
                self.images.len()
            ))
        })
    }

    pub fn image_view(&self, index: u32) -> RhiResult<vk::ImageView> {
        self.image_views.get(index as usize).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!("swapchain image view {index}"))
        })
    }

    fn destroy_image_views(&mut self) {
        for &view in &self.image_views {
            unsafe { self.device.device.destroy_image_view(view, None) };
        }
        self.image_views.clear();
    }
}

impl Swapchain for VulkanSwapchain {
    fn acquire_next_image(
        &mut self,
        signal: &dyn Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquiredImage> {
        let semaphore = downcast::<VulkanSemaphore>(signal.as_any(), "semaphore")?;
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore.handle(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, false)) => Ok(AcquiredImage {
                index: Some(index),
                status: SurfaceStatus::Optimal,
            }),
            Ok((index, true)) => Ok(AcquiredImage {
                index: Some(index),
                status: SurfaceStatus::Suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage {
                index: None,
                status: SurfaceStatus::OutOfDate,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn present(&mut self, image_index: u32, wait: &dyn Semaphore) -> RhiResult<SurfaceStatus> {
        let semaphore = downcast::<VulkanSemaphore>(wait.as_any(), "semaphore")?;
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [semaphore.handle()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.present_queue.lock()?;
        match unsafe { self.swapchain_loader.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(SurfaceStatus::Optimal),
            Ok(true) => Ok(SurfaceStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanSwapchain")
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("images", &self.images.len())
            .finish()
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Prefers a UNORM format since tone mapping writes the final color through
/// a storage image and applies the transfer curve itself.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];
    for wanted in preferred {
        if let Some(&format) = formats
            .iter()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        {
            return Some(format);
        }
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!("Using first available surface format: {:?}", format.format);
    }
    first
}

/// MAILBOX when available, otherwise FIFO which is always supported.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn image_usage(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if capabilities
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::STORAGE)
    {
        usage |= vk::ImageUsageFlags::STORAGE;
    } else {
        warn!("Surface does not support storage images; tone mapping must render instead");
    }
    usage
}

fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    images
        .iter()
        .enumerate()
        .map(|(i, &image)| {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            unsafe { device.create_image_view(&create_info, None) }.map_err(|e| {
                RhiError::SwapchainError(format!("Failed to create image view {i}: {e:?}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm() {
        let formats = vec![
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats);
        assert_eq!(selected.map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
    }

    #[test]
    fn test_choose_surface_format_fallback_and_empty() {
        let formats = vec![surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::A2B10G10R10_UNORM_PACK32)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_clamps_when_undefined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..capabilities
        };
        let extent = choose_extent(&fixed, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_image_usage_adds_storage_when_supported() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::STORAGE,
            ..Default::default()
        };
        assert!(image_usage(&capabilities).contains(vk::ImageUsageFlags::STORAGE));

        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(
            image_usage(&capabilities),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        );
    }
}
