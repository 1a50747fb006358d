//! Error types shared by the renderer crates.

use thiserror::Error;

/// Main error type for the renderer's host-facing layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI (surface creation)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed
    #[error("Settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings were parsed but are not usable
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;
