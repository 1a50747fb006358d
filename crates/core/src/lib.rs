//! Core utilities for the Vulkan renderer.
//!
//! This crate provides foundational types and utilities used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing and pacing
//! - Settings management

mod config;
mod error;
mod logging;
mod timer;

pub use config::Settings;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FpsCounter, FrameLimiter, Timer};
