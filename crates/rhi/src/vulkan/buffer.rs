//! Host-visible buffers for per-slot frame data (light uniforms).
//!
//! Memory comes from gpu-allocator in `CpuToGpu` and stays persistently
//! mapped, so a write is a plain copy into the mapping.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Buffer;
use crate::error::{RhiError, RhiResult};
use crate::types::BufferDesc;

use super::device::DeviceShared;

pub struct VulkanBuffer {
    device: Arc<DeviceShared>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    label: String,
    write_lock: Mutex<()>,
}

impl VulkanBuffer {
    pub(crate) fn new(device: Arc<DeviceShared>, desc: &BufferDesc) -> RhiResult<Self> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "buffer '{}' size must be greater than 0",
                desc.label
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator()?.allocate(&AllocationCreateDesc {
            name: &desc.label,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created buffer '{}': {} bytes", desc.label, desc.size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size: desc.size,
            label: desc.label.clone(),
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

/// Rejects writes that would run past the end of a buffer.
pub(crate) fn check_range(label: &str, size: u64, offset: u64, len: usize) -> RhiResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::InvalidHandle(format!(
            "write to '{label}' exceeds buffer size: offset {offset} + data {len} > buffer {size}"
        ))),
    }
}

impl Buffer for VulkanBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_range(&self.label, self.size, offset, data.len())?;

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle(format!("buffer '{}' has no allocation", self.label))
        })?;
        let mapped_ptr = allocation.mapped_ptr().ok_or_else(|| {
            RhiError::InvalidHandle(format!("buffer '{}' memory is not mapped", self.label))
        })?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RhiError::LockPoisoned("buffer write"))?;
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("label", &self.label)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer '{}': {:?}", self.label, e);
                    }
                }
                Err(e) => error!("Leaking buffer '{}' memory: {}", self.label, e),
            }
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed buffer '{}'", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range("lights", 64, 0, 64).is_ok());
        assert!(check_range("lights", 64, 32, 32).is_ok());
        assert!(check_range("lights", 64, 32, 33).is_err());
        assert!(check_range("lights", 64, u64::MAX, 1).is_err());
    }
}
