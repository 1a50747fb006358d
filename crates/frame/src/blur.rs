//! Separable Gaussian blur for bloom.
//!
//! The kernel parameters go through a [`DeferredDescriptorCache`], so a
//! change from the UI while earlier frames are still on the GPU only lands
//! in each slot's weight buffer when that slot records its post-process
//! pass.

use bytemuck::{Pod, Zeroable};
use renderer_core::Settings;
use renderer_rhi::{Access, Buffer, BufferDesc, CommandBuffer, Device, PipelineStage};
use tracing::{debug, info};

use crate::descriptor_cache::DeferredDescriptorCache;
use crate::error::{FrameError, FrameResult};

/// Largest kernel the weight buffer has room for.
pub const MAX_KERNEL_SIZE: u32 = 63;

/// Workgroup width along the blurred axis.
const GROUP_SIZE: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurKernel {
    /// Number of taps. Always odd.
    pub kernel_size: u32,
    /// Variance of the Gaussian.
    pub sigma: f32,
}

impl Default for BlurKernel {
    fn default() -> Self {
        Self {
            kernel_size: 15,
            sigma: 3.0,
        }
    }
}

impl BlurKernel {
    pub fn new(kernel_size: u32, sigma: f32) -> FrameResult<Self> {
        let kernel = Self { kernel_size, sigma };
        kernel.validate()?;
        Ok(kernel)
    }

    fn validate(&self) -> FrameResult<()> {
        if self.kernel_size % 2 == 0 || self.kernel_size > MAX_KERNEL_SIZE {
            return Err(FrameError::Config(format!(
                "blur kernel size must be odd and at most {MAX_KERNEL_SIZE}, got {}",
                self.kernel_size
            )));
        }
        if !(self.sigma > 0.0 && self.sigma.is_finite()) {
            return Err(FrameError::Config(format!(
                "blur sigma must be positive, got {}",
                self.sigma
            )));
        }
        Ok(())
    }

    /// Gaussian weights for offsets `-k/2 ..= k/2`. They are not normalized.
    pub fn weights(&self) -> Vec<f32> {
        let half = (self.kernel_size / 2) as i32;
        let scale = 1.0 / (self.sigma.sqrt() * (2.0 * std::f32::consts::PI).sqrt());
        (-half..=half)
            .map(|i| {
                let x = i as f32;
                scale * (-(x * x) / (2.0 * self.sigma)).exp()
            })
            .collect()
    }
}

/// Layout of the per-slot weight buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlurUniforms {
    kernel_size: u32,
    _pad: [u32; 3],
    weights: [f32; MAX_KERNEL_SIZE as usize],
}

impl BlurUniforms {
    fn new(kernel: &BlurKernel) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.kernel_size = kernel.kernel_size;
        for (dst, w) in uniforms.weights.iter_mut().zip(kernel.weights()) {
            *dst = w;
        }
        uniforms
    }
}

/// Workgroup counts for one blur direction over `extent`.
pub fn dispatch_size(extent: (u32, u32), horizontal: bool) -> (u32, u32) {
    let (width, height) = extent;
    if horizontal {
        (width.div_ceil(GROUP_SIZE).max(1), height.max(1))
    } else {
        (width.max(1), height.div_ceil(GROUP_SIZE).max(1))
    }
}

/// Bloom blur chain recorded into the post-process command buffer.
#[derive(Debug)]
pub struct BloomBlur {
    kernel: DeferredDescriptorCache<BlurKernel>,
    buffers: Vec<Box<dyn Buffer>>,
    passes: u32,
    extent: (u32, u32),
}

impl BloomBlur {
    pub fn new(device: &dyn Device, settings: &Settings, extent: (u32, u32)) -> FrameResult<Self> {
        let kernel = BlurKernel::new(settings.blur_kernel_size, settings.blur_sigma)?;
        let buffers = (0..settings.frames_in_flight)
            .map(|slot| {
                device.create_buffer(&BufferDesc {
                    label: format!("blur weights[{slot}]"),
                    size: std::mem::size_of::<BlurUniforms>() as u64,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Bloom blur: {} pass(es), kernel {} sigma {}",
            settings.bloom_passes, kernel.kernel_size, kernel.sigma
        );
        Ok(Self {
            kernel: DeferredDescriptorCache::new(kernel, settings.frames_in_flight),
            buffers,
            passes: settings.bloom_passes,
            extent,
        })
    }

    pub fn kernel(&self) -> BlurKernel {
        self.kernel.get()
    }

    /// Per-slot dirty state of the weight buffers.
    pub fn cache(&self) -> &DeferredDescriptorCache<BlurKernel> {
        &self.kernel
    }

    /// Returns whether the value changed.
    pub fn set_kernel_size(&self, kernel_size: u32) -> FrameResult<bool> {
        self.edit_kernel(|kernel| BlurKernel::new(kernel_size, kernel.sigma))
    }

    /// Returns whether the value changed.
    pub fn set_sigma(&self, sigma: f32) -> FrameResult<bool> {
        self.edit_kernel(|kernel| BlurKernel::new(kernel.kernel_size, sigma))
    }

    /// Derives the new kernel from the current one under the cache lock, so
    /// concurrent edits of the other field are kept. An invalid kernel
    /// leaves the cache untouched.
    fn edit_kernel(
        &self,
        next: impl FnOnce(&BlurKernel) -> FrameResult<BlurKernel>,
    ) -> FrameResult<bool> {
        let mut result = Ok(());
        let changed = self.kernel.update(|kernel| match next(kernel) {
            Ok(edited) => *kernel = edited,
            Err(e) => result = Err(e),
        });
        result.map(|()| changed)
    }

    #[inline]
    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn set_passes(&mut self, passes: u32) {
        if passes != self.passes {
            debug!("Bloom passes {} -> {}", self.passes, passes);
            self.passes = passes;
        }
    }

    /// Rewrites `slot`'s weights if they are stale, then records the
    /// horizontal/vertical pass pairs, each followed by a compute barrier.
    pub fn record(&self, cb: &mut dyn CommandBuffer, slot: usize) -> FrameResult<()> {
        let buffer = self.buffers.get(slot).ok_or_else(|| {
            FrameError::Config(format!("no blur weight buffer for slot {slot}"))
        })?;
        self.kernel.bind(slot, |kernel| {
            buffer.write(0, bytemuck::bytes_of(&BlurUniforms::new(kernel)))?;
            Ok(())
        })?;

        for _ in 0..self.passes {
            for horizontal in [true, false] {
                let (x, y) = dispatch_size(self.extent, horizontal);
                cb.dispatch(x, y, 1);
                cb.memory_barrier(
                    PipelineStage::COMPUTE_SHADER,
                    Access::SHADER_WRITE,
                    PipelineStage::COMPUTE_SHADER,
                    Access::SHADER_READ,
                );
            }
        }
        Ok(())
    }
}
