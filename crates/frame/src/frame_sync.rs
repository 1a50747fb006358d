//! Per-slot synchronization objects and the submit chain they order.
//!
//! A [`FrameSync`] owns everything one frame slot synchronizes with: the
//! `in_flight` fence, four binary semaphores and the two timeline semaphores
//! the worker jobs signal. The submit methods build the waits and signals of
//! each pass and only accept being called in chain order:
//!
//! ```text
//! Idle/InFlight --begin_frame--> Recording --submit_render--> RenderSubmitted
//!   --submit_postprocess--> PostprocessSubmitted --submit_overlay--> OverlaySubmitted
//!   --present--> InFlight
//! ```
//!
//! | Pass         | Queue    | Waits on                                              | Signals                          |
//! |--------------|----------|-------------------------------------------------------|----------------------------------|
//! | Render       | graphics | `shadow_done` = frame+1, `particle_done` = frame+1    | `postprocessing_done`            |
//! | Post-process | compute  | `image_available`, `postprocessing_done`              | `gui_done`                       |
//! | Overlay      | graphics | `gui_done`                                            | `render_finished`, `in_flight`   |
//! | Present      | present  | `render_finished`                                     |                                  |

use std::fmt;
use std::sync::Arc;

use renderer_rhi::{
    AcquiredImage, CommandBuffer, Device, Fence, PipelineStage, QueueKind, Semaphore,
    SemaphoreKind, SubmitInfo, SurfaceStatus, Swapchain,
};
use tracing::{debug, trace};

use crate::error::{FrameError, FrameResult};

/// Where a slot is in its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Never used, or abandoned before anything was submitted.
    Idle,
    Recording,
    RenderSubmitted,
    PostprocessSubmitted,
    OverlaySubmitted,
    /// Presented; retired by the next fence wait.
    InFlight,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Recording => "recording",
            SyncState::RenderSubmitted => "render submitted",
            SyncState::PostprocessSubmitted => "postprocess submitted",
            SyncState::OverlaySubmitted => "overlay submitted",
            SyncState::InFlight => "in flight",
        };
        f.write_str(name)
    }
}

/// Timeline value the worker jobs of `frame` signal and the render pass
/// waits for. Offset by one so frame 0 is above the initial counter.
#[inline]
pub fn timeline_value(frame: u64) -> u64 {
    frame + 1
}

pub struct FrameSync {
    slot: usize,
    state: SyncState,
    image_index: Option<u32>,
    in_flight: Box<dyn Fence>,
    image_available: Arc<dyn Semaphore>,
    render_finished: Arc<dyn Semaphore>,
    postprocessing_done: Arc<dyn Semaphore>,
    gui_done: Arc<dyn Semaphore>,
    shadow_done: Arc<dyn Semaphore>,
    particle_done: Arc<dyn Semaphore>,
}

impl FrameSync {
    pub fn new(device: &dyn Device, slot: usize) -> FrameResult<Self> {
        let binary = |name: &str| device.create_semaphore(SemaphoreKind::Binary, &format!("{name}[{slot}]"));
        let timeline =
            |name: &str| device.create_semaphore(SemaphoreKind::Timeline, &format!("{name}[{slot}]"));

        // Signaled so the first wait on a fresh slot returns at once
        let in_flight = device.create_fence(true, &format!("in_flight[{slot}]"))?;

        let sync = Self {
            slot,
            state: SyncState::Idle,
            image_index: None,
            in_flight,
            image_available: binary("image_available")?,
            render_finished: binary("render_finished")?,
            postprocessing_done: binary("postprocessing_done")?,
            gui_done: binary("gui_done")?,
            shadow_done: timeline("shadow_done")?,
            particle_done: timeline("particle_done")?,
        };
        debug!("Frame sync objects created for slot {}", slot);
        Ok(sync)
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Swapchain image acquired for the current frame.
    #[inline]
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    #[inline]
    pub fn in_flight(&self) -> &dyn Fence {
        self.in_flight.as_ref()
    }

    /// Timeline the shadow jobs of this slot signal.
    pub fn shadow_done(&self) -> &Arc<dyn Semaphore> {
        &self.shadow_done
    }

    /// Timeline the particle job of this slot signals.
    pub fn particle_done(&self) -> &Arc<dyn Semaphore> {
        &self.particle_done
    }

    fn expect(&self, expected: SyncState) -> FrameResult<()> {
        if self.state != expected {
            return Err(FrameError::InvalidState {
                slot: self.slot,
                expected,
                found: self.state,
            });
        }
        Ok(())
    }

    /// Waits until the GPU is done with this slot, then opens it for
    /// recording.
    ///
    /// # Errors
    ///
    /// A fence that stays unsignaled for `timeout_ns` is returned as
    /// [`RhiError::FenceTimeout`](renderer_rhi::RhiError::FenceTimeout) and
    /// the slot keeps its state.
    pub fn begin_frame(&mut self, timeout_ns: u64) -> FrameResult<()> {
        if !matches!(self.state, SyncState::Idle | SyncState::InFlight) {
            return Err(FrameError::InvalidState {
                slot: self.slot,
                expected: SyncState::InFlight,
                found: self.state,
            });
        }
        self.in_flight.wait(timeout_ns)?;
        self.in_flight.reset()?;
        self.image_index = None;
        self.state = SyncState::Recording;
        trace!("Slot {} recording", self.slot);
        Ok(())
    }

    /// Acquires the image this frame presents into, signaling
    /// `image_available`.
    pub fn acquire(
        &mut self,
        swapchain: &mut dyn Swapchain,
        timeout_ns: u64,
    ) -> FrameResult<AcquiredImage> {
        self.expect(SyncState::Recording)?;
        let acquired = swapchain.acquire_next_image(self.image_available.as_ref(), timeout_ns)?;
        self.image_index = acquired.index;
        Ok(acquired)
    }

    /// Gives up on a frame that acquired nothing.
    ///
    /// The fence was already reset by [`begin_frame`](Self::begin_frame), so
    /// an empty submission signals it again and the next wait on this slot
    /// does not block forever.
    pub fn abandon_frame(&mut self, device: &dyn Device) -> FrameResult<()> {
        self.expect(SyncState::Recording)?;
        device.submit(
            QueueKind::Graphics,
            &SubmitInfo::default().fence(self.in_flight.as_ref()),
        )?;
        self.image_index = None;
        self.state = SyncState::Idle;
        debug!("Slot {} abandoned its frame", self.slot);
        Ok(())
    }

    /// Main scene pass: waits for this frame's shadow maps and particle
    /// simulation.
    pub fn submit_render(
        &mut self,
        device: &dyn Device,
        command_buffer: &dyn CommandBuffer,
        frame: u64,
    ) -> FrameResult<()> {
        self.expect(SyncState::Recording)?;
        let value = timeline_value(frame);
        device.submit(
            QueueKind::Graphics,
            &SubmitInfo::default()
                .command_buffer(command_buffer)
                .wait_value(self.shadow_done.as_ref(), value, PipelineStage::FRAGMENT_SHADER)
                .wait_value(self.particle_done.as_ref(), value, PipelineStage::VERTEX_INPUT)
                .signal(self.postprocessing_done.as_ref()),
        )?;
        self.state = SyncState::RenderSubmitted;
        Ok(())
    }

    /// Bloom and tone mapping on the compute queue. Also the first use of
    /// the acquired image.
    pub fn submit_postprocess(
        &mut self,
        device: &dyn Device,
        command_buffer: &dyn CommandBuffer,
    ) -> FrameResult<()> {
        self.expect(SyncState::RenderSubmitted)?;
        device.submit(
            QueueKind::Compute,
            &SubmitInfo::default()
                .command_buffer(command_buffer)
                .wait(self.image_available.as_ref(), PipelineStage::COMPUTE_SHADER)
                .wait(self.postprocessing_done.as_ref(), PipelineStage::COMPUTE_SHADER)
                .signal(self.gui_done.as_ref()),
        )?;
        self.state = SyncState::PostprocessSubmitted;
        Ok(())
    }

    /// Overlay pass; the last submission of the frame, so it carries the
    /// fence.
    pub fn submit_overlay(
        &mut self,
        device: &dyn Device,
        command_buffer: &dyn CommandBuffer,
    ) -> FrameResult<()> {
        self.expect(SyncState::PostprocessSubmitted)?;
        device.submit(
            QueueKind::Graphics,
            &SubmitInfo::default()
                .command_buffer(command_buffer)
                .wait(self.gui_done.as_ref(), PipelineStage::FRAGMENT_SHADER)
                .signal(self.render_finished.as_ref())
                .fence(self.in_flight.as_ref()),
        )?;
        self.state = SyncState::OverlaySubmitted;
        Ok(())
    }

    /// Queues the acquired image for presentation behind `render_finished`.
    pub fn present(&mut self, swapchain: &mut dyn Swapchain) -> FrameResult<SurfaceStatus> {
        self.expect(SyncState::OverlaySubmitted)?;
        let image_index = self.image_index.ok_or(FrameError::InvalidState {
            slot: self.slot,
            expected: SyncState::OverlaySubmitted,
            found: SyncState::Idle,
        })?;
        let status = swapchain.present(image_index, self.render_finished.as_ref())?;
        self.state = SyncState::InFlight;
        Ok(status)
    }
}

impl fmt::Debug for FrameSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSync")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("image_index", &self.image_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::RhiError;
    use renderer_rhi::headless::{HeadlessDevice, Lane};

    fn ended(device: &HeadlessDevice, queue: QueueKind, label: &str) -> Box<dyn CommandBuffer> {
        let mut cb = device.create_command_buffer(queue, label).unwrap();
        cb.begin().unwrap();
        cb.end().unwrap();
        cb
    }

    /// Signals both timelines the way the worker jobs would.
    fn signal_jobs(device: &HeadlessDevice, sync: &FrameSync, frame: u64) {
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().signal_value(sync.shadow_done().as_ref(), timeline_value(frame)),
            )
            .unwrap();
        device
            .submit(
                QueueKind::Compute,
                &SubmitInfo::default()
                    .signal_value(sync.particle_done().as_ref(), timeline_value(frame)),
            )
            .unwrap();
    }

    fn run_chain(device: &HeadlessDevice, sync: &mut FrameSync, swapchain: &mut dyn Swapchain, frame: u64) {
        sync.begin_frame(u64::MAX).unwrap();
        sync.acquire(swapchain, u64::MAX).unwrap();
        signal_jobs(device, sync, frame);
        let render = ended(device, QueueKind::Graphics, "render");
        let post = ended(device, QueueKind::Compute, "postprocess");
        let gui = ended(device, QueueKind::Graphics, "gui");
        sync.submit_render(device, render.as_ref(), frame).unwrap();
        sync.submit_postprocess(device, post.as_ref()).unwrap();
        sync.submit_overlay(device, gui.as_ref()).unwrap();
        sync.present(swapchain).unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::Recording.to_string(), "recording");
        assert_eq!(SyncState::RenderSubmitted.to_string(), "render submitted");
        assert_eq!(SyncState::InFlight.to_string(), "in flight");
    }

    #[test]
    fn test_full_chain_order() {
        let device = HeadlessDevice::immediate();
        let mut swapchain = device.create_swapchain(3, (64, 64));
        let mut sync = FrameSync::new(&device, 1).unwrap();

        run_chain(&device, &mut sync, &mut swapchain, 4);
        assert_eq!(sync.state(), SyncState::InFlight);

        let submissions = device.submissions().unwrap();
        let render = submissions.iter().find(|s| s.has_buffer("render")).unwrap();
        assert_eq!(render.waits_on("shadow_done[1]").unwrap().value, Some(5));
        assert_eq!(
            render.waits_on("particle_done[1]").unwrap().stage,
            PipelineStage::VERTEX_INPUT
        );
        assert!(render.signals("postprocessing_done[1]").is_some());

        let post = submissions.iter().find(|s| s.has_buffer("postprocess")).unwrap();
        assert_eq!(post.lane, Lane::Compute);
        assert!(post.waits_on("image_available[1]").is_some());
        assert!(post.waits_on("postprocessing_done[1]").is_some());

        let gui = submissions.iter().find(|s| s.has_buffer("gui")).unwrap();
        assert_eq!(gui.fence.as_deref(), Some("in_flight[1]"));
        assert!(gui.signals("render_finished[1]").is_some());

        let present = submissions.last().unwrap();
        assert_eq!(present.lane, Lane::Present);
        assert!(present.waits_on("render_finished[1]").is_some());

        assert!(sync.in_flight().is_signaled().unwrap());
        assert_eq!(device.pending_submissions().unwrap(), 0);
        assert!(device.violations().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_submit_is_rejected() {
        let device = HeadlessDevice::immediate();
        let mut sync = FrameSync::new(&device, 0).unwrap();
        let post = ended(&device, QueueKind::Compute, "postprocess");

        let err = sync.submit_postprocess(&device, post.as_ref()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidState {
                slot: 0,
                expected: SyncState::RenderSubmitted,
                found: SyncState::Idle,
            }
        ));

        sync.begin_frame(u64::MAX).unwrap();
        assert!(matches!(
            sync.begin_frame(u64::MAX),
            Err(FrameError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let device = HeadlessDevice::manual();
        let mut swapchain = device.create_swapchain(2, (64, 64));
        let mut sync = FrameSync::new(&device, 0).unwrap();
        run_chain(&device, &mut sync, &mut swapchain, 0);

        let err = sync.begin_frame(1_000_000).unwrap_err();
        assert!(matches!(err, FrameError::Rhi(RhiError::FenceTimeout { .. })));
        assert!(err.is_gpu_hang());
        assert_eq!(sync.state(), SyncState::InFlight);

        device.run_pending().unwrap();
        sync.begin_frame(1_000_000).unwrap();
    }

    #[test]
    fn test_abandon_resignals_fence() {
        let device = HeadlessDevice::immediate();
        let mut swapchain = device.create_swapchain(2, (64, 64));
        swapchain.push_acquire_status(SurfaceStatus::OutOfDate);
        let mut sync = FrameSync::new(&device, 0).unwrap();

        sync.begin_frame(u64::MAX).unwrap();
        let acquired = sync.acquire(&mut swapchain, u64::MAX).unwrap();
        assert_eq!(acquired.index, None);
        sync.abandon_frame(&device).unwrap();
        assert_eq!(sync.state(), SyncState::Idle);

        // The slot is usable again right away
        sync.begin_frame(0).unwrap();
        assert!(device.violations().unwrap().is_empty());
    }
}
