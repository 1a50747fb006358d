//! Windowing for the renderer host.
//!
//! A winit [`Window`] plus the Vulkan [`Surface`] the swapchain presents
//! into.

mod window;

pub use window::{Surface, Window, required_extensions};

pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
