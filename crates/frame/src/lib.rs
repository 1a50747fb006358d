//! Frame orchestration.
//!
//! This crate drives one frame at a time through the GPU:
//! - Frames in flight, each with its own fence, semaphores and command buffers
//! - Shadow and particle work recorded in parallel on a worker pool
//! - A semaphore chain across the graphics and compute queues
//! - Per-slot descriptor rewrites that only happen when parameters change

pub mod blur;
pub mod descriptor_cache;
pub mod drawable;
pub mod error;
pub mod frame_slot;
pub mod frame_sync;
pub mod light_manager;
pub mod orchestrator;
pub mod particle;
pub mod scene;
pub mod shadow;
pub mod thread_pool;

pub use blur::{BlurKernel, BloomBlur};
pub use descriptor_cache::DeferredDescriptorCache;
pub use drawable::{
    Animated, ComputeContext, DrawContext, Drawable, Overlay, ParticleSystem, PostProcessor,
    PostprocessContext, ShadowContext, Skybox,
};
pub use error::{FrameError, FrameResult};
pub use frame_slot::FrameSlot;
pub use frame_sync::{FrameSync, SyncState, timeline_value};
pub use light_manager::{LightManager, LightSet};
pub use orchestrator::{FrameInfo, FrameOrchestrator, FrameReport, ResetHook, RunSummary, UpdateHook};
pub use scene::Scene;
pub use shadow::{LightKind, ShadowOutcome};
pub use thread_pool::{JobHandle, ThreadPool};
