//! Renderer settings loaded from TOML.
//!
//! Every field has a default, so a settings file only needs to name the
//! values it changes:
//!
//! ```toml
//! frames_in_flight = 3
//! bloom_passes = 2
//! desired_fps = 144
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Tunables for the frame loop and the passes it drives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Swapchain / render target resolution as `[width, height]`.
    pub resolution: [u32; 2],
    /// Worker threads for recording jobs. Zero uses the available parallelism.
    pub worker_threads: usize,
    /// Horizontal + vertical blur iterations in the bloom chain.
    pub bloom_passes: u32,
    /// Gaussian kernel width. Must be odd.
    pub blur_kernel_size: u32,
    pub blur_sigma: f32,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
    /// Edge length of each shadow map face.
    pub shadow_map_size: u32,
    /// Frame rate cap. Zero disables the limiter.
    pub desired_fps: u32,
    /// Upper bound on the frame fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Enable the Vulkan validation layers.
    pub validation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            resolution: [1280, 720],
            worker_threads: 0,
            bloom_passes: 1,
            blur_kernel_size: 15,
            blur_sigma: 3.0,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
            shadow_map_size: 1024,
            desired_fps: 0,
            fence_timeout_ms: None,
            validation: cfg!(debug_assertions),
        }
    }
}

impl Settings {
    /// Loads and validates settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`Settings::validate`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&contents)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parses and validates settings from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings as pretty TOML.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Checks the invariants the frame loop relies on.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.blur_kernel_size == 0 || self.blur_kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "blur_kernel_size must be odd, got {}",
                self.blur_kernel_size
            )));
        }
        if self.blur_sigma <= 0.0 || !self.blur_sigma.is_finite() {
            return Err(Error::Config(format!(
                "blur_sigma must be positive, got {}",
                self.blur_sigma
            )));
        }
        if self.resolution[0] == 0 || self.resolution[1] == 0 {
            return Err(Error::Config("resolution must be non-zero".into()));
        }
        if self.shadow_map_size == 0 {
            return Err(Error::Config("shadow_map_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Worker count with the zero default resolved.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// Fence timeout in nanoseconds, `u64::MAX` when unbounded.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .unwrap_or(u64::MAX)
    }
}
