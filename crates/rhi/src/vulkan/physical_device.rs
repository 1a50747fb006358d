//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate all available GPUs
//! 2. Find graphics, present and compute queue families (preferring a
//!    dedicated compute family so particles and post-processing overlap
//!    with graphics work)
//! 3. Require Vulkan 1.3, timeline semaphores and the swapchain extension
//! 4. Score the remaining devices, preferring discrete GPUs

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices for different queue types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to the surface.
    pub present_family: Option<u32>,
    /// Index of the queue family used for compute submissions.
    pub compute_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if every queue the frame loop submits to is available.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
            && self.present_family.is_some()
            && self.compute_family.is_some()
    }

    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics_family, self.present_family, self.compute_family]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// True when compute work runs on a different family than graphics.
    pub fn has_dedicated_compute(&self) -> bool {
        self.compute_family.is_some() && self.compute_family != self.graphics_family
    }
}

/// Information about a selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for the frame loop.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}) - Score: {}, dedicated compute: {}",
        selected.device_name(),
        selected.device_type_name(),
        score,
        selected.queue_families.has_dedicated_compute()
    );
    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing queue families {:?}",
            device_name, queue_families
        );
        return None;
    }

    if !supports_api_1_3(properties.api_version) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", device_name);
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    if features_1_2.timeline_semaphore == vk::FALSE || features_1_3.dynamic_rendering == vk::FALSE {
        debug!(
            "GPU '{}' skipped: timeline semaphores or dynamic rendering unsupported",
            device_name
        );
        return None;
    }

    let has_swapchain = unsafe { instance.enumerate_device_extension_properties(device) }
        .map(|extensions| {
            extensions.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == ash::khr::swapchain::NAME
            })
        })
        .unwrap_or(false);
    if !has_swapchain {
        debug!("GPU '{}' skipped: no swapchain extension", device_name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn supports_api_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let flags: Vec<vk::QueueFlags> = families
        .iter()
        .map(|family| {
            if family.queue_count == 0 {
                vk::QueueFlags::empty()
            } else {
                family.queue_flags
            }
        })
        .collect();

    let mut indices = pick_families(&flags);

    indices.present_family = (0..families.len() as u32).find(|&i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });

    indices
}

/// Picks graphics and compute families from per-family capability flags.
/// Present support is resolved separately against the surface.
fn pick_families(flags: &[vk::QueueFlags]) -> QueueFamilyIndices {
    let graphics_family = flags
        .iter()
        .position(|f| f.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let dedicated_compute = flags
        .iter()
        .position(|f| f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let compute_family = dedicated_compute.or_else(|| {
        flags
            .iter()
            .position(|f| f.contains(vk::QueueFlags::COMPUTE))
            .map(|i| i as u32)
    });

    QueueFamilyIndices {
        graphics_family,
        present_family: None,
        compute_family,
    }
}

/// Rates a physical device based on its capabilities.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    // Async compute is what lets particles and post-processing overlap
    if info.queue_families.has_dedicated_compute() {
        score += 500;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_unique_families_with_duplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: Some(1),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0, 1]);
        assert!(indices.has_dedicated_compute());
    }

    #[test]
    fn test_pick_families_prefers_dedicated_compute() {
        let flags = [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ];
        let indices = pick_families(&flags);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.compute_family, Some(2));
    }

    #[test]
    fn test_pick_families_falls_back_to_graphics_compute() {
        let flags = [vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE];
        let indices = pick_families(&flags);
        assert_eq!(indices.compute_family, Some(0));
        assert!(!QueueFamilyIndices {
            present_family: Some(0),
            ..indices
        }
        .has_dedicated_compute());
    }

    #[test]
    fn test_api_version_check() {
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!supports_api_1_3(vk::make_api_version(0, 1, 2, 198)));
    }
}
