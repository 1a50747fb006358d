//! Headless implementations of the RHI object traits.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::journal::{Command, Event, Lane, RecordedBuffer, SubmitRecord, WaitRecord};
use super::{Pending, SemaphoreState, Shared, SyncRef};
use crate::command::CommandBuffer;
use crate::device::{Buffer, DepthTarget};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore, downcast};
use crate::types::{
    Access, AcquiredImage, BufferDesc, DepthTargetDesc, ImageLayout, PipelineStage, QueueKind,
    SemaphoreKind, SurfaceStatus,
};

// =============================================================================
// Fence
// =============================================================================

#[derive(Debug)]
pub struct HeadlessFence {
    shared: Arc<Shared>,
    id: u64,
    label: String,
}

impl HeadlessFence {
    pub(super) fn new(shared: Arc<Shared>, id: u64, label: &str) -> Self {
        Self {
            shared,
            id,
            label: label.to_string(),
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }
}

impl Fence for HeadlessFence {
    fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let deadline = (timeout_ns != u64::MAX)
            .then(|| Instant::now() + Duration::from_nanos(timeout_ns));
        let mut state = self.shared.lock()?;
        loop {
            if state.fences.get(&self.id).copied().unwrap_or(false) {
                state.journal.push(Event::FenceWaited {
                    fence: self.label.clone(),
                });
                return Ok(());
            }
            state = match deadline {
                None => self
                    .shared
                    .changed
                    .wait(state)
                    .map_err(|_| RhiError::LockPoisoned("headless device state"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RhiError::FenceTimeout {
                            label: self.label.clone(),
                            timeout_ns,
                        });
                    }
                    self.shared
                        .changed
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| RhiError::LockPoisoned("headless device state"))?
                        .0
                }
            };
        }
    }

    fn reset(&self) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        state.fences.insert(self.id, false);
        state.journal.push(Event::FenceReset {
            fence: self.label.clone(),
        });
        Ok(())
    }

    fn is_signaled(&self) -> RhiResult<bool> {
        Ok(self
            .shared
            .lock()?
            .fences
            .get(&self.id)
            .copied()
            .unwrap_or(false))
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HeadlessFence {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.fences.remove(&self.id);
            state.fence_labels.remove(&self.id);
        }
    }
}

// =============================================================================
// Semaphore
// =============================================================================

#[derive(Debug)]
pub struct HeadlessSemaphore {
    shared: Arc<Shared>,
    id: u64,
    kind: SemaphoreKind,
    label: String,
}

impl HeadlessSemaphore {
    pub(super) fn new(shared: Arc<Shared>, id: u64, kind: SemaphoreKind, label: &str) -> Self {
        Self {
            shared,
            id,
            kind,
            label: label.to_string(),
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }
}

impl Semaphore for HeadlessSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn value(&self) -> RhiResult<u64> {
        Ok(match self.shared.lock()?.semaphores.get(&self.id) {
            Some(SemaphoreState::Timeline { value }) => *value,
            _ => 0,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// Semaphores stay registered after drop so batches still queued against
// them can resolve; the labels keep the journal readable.

// =============================================================================
// Command buffer
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

/// Records [`Command`]s instead of GPU commands.
#[derive(Debug)]
pub struct HeadlessCommandBuffer {
    queue: QueueKind,
    label: String,
    state: RecordState,
    commands: Vec<Command>,
    in_flight: Arc<AtomicUsize>,
}

impl HeadlessCommandBuffer {
    pub(super) fn new(queue: QueueKind, label: &str) -> Self {
        Self {
            queue,
            label: label.to_string(),
            state: RecordState::Initial,
            commands: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Commands recorded since the last `begin`.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub(super) fn is_executable(&self) -> bool {
        self.state == RecordState::Executable
    }

    pub(super) fn snapshot(&self) -> RecordedBuffer {
        RecordedBuffer {
            label: self.label.clone(),
            commands: self.commands.clone(),
        }
    }

    pub(super) fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.in_flight)
    }

    fn record(&mut self, command: Command) {
        if self.state == RecordState::Recording {
            self.commands.push(command);
        }
    }
}

impl CommandBuffer for HeadlessCommandBuffer {
    fn queue(&self) -> QueueKind {
        self.queue
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer '{}' re-recorded while still in flight",
                self.label
            )));
        }
        if self.state == RecordState::Recording {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer '{}' is already recording",
                self.label
            )));
        }
        self.commands.clear();
        self.state = RecordState::Recording;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        if self.state != RecordState::Recording {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer '{}' ended without begin",
                self.label
            )));
        }
        self.state = RecordState::Executable;
        Ok(())
    }

    fn begin_label(&mut self, name: &str) {
        self.record(Command::BeginLabel(name.to_string()));
    }

    fn end_label(&mut self) {
        self.record(Command::EndLabel);
    }

    fn memory_barrier(
        &mut self,
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    ) {
        self.record(Command::MemoryBarrier {
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        });
    }

    fn transition_depth(&mut self, target: &dyn DepthTarget, from: ImageLayout, to: ImageLayout) {
        self.record(Command::TransitionDepth {
            target: target.label().to_string(),
            from,
            to,
        });
    }

    fn transition_swapchain_image(
        &mut self,
        _swapchain: &dyn Swapchain,
        image_index: u32,
        from: ImageLayout,
        to: ImageLayout,
    ) -> RhiResult<()> {
        self.record(Command::TransitionSwapchain {
            image_index,
            from,
            to,
        });
        Ok(())
    }

    fn begin_depth_pass(&mut self, target: &dyn DepthTarget, clear_depth: f32) {
        self.record(Command::BeginDepthPass {
            target: target.label().to_string(),
            clear_depth,
        });
    }

    fn set_depth_bias(&mut self, constant: f32, slope: f32) {
        self.record(Command::SetDepthBias { constant, slope });
    }

    fn end_depth_pass(&mut self) {
        self.record(Command::EndDepthPass);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Depth target and buffer
// =============================================================================

#[derive(Debug)]
pub struct HeadlessDepthTarget {
    label: String,
    extent: (u32, u32),
}

impl HeadlessDepthTarget {
    pub(super) fn new(desc: &DepthTargetDesc) -> Self {
        Self {
            label: desc.label.clone(),
            extent: (desc.width, desc.height),
        }
    }
}

impl DepthTarget for HeadlessDepthTarget {
    fn label(&self) -> &str {
        &self.label
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host memory standing in for a mapped GPU buffer.
#[derive(Debug)]
pub struct HeadlessBuffer {
    label: String,
    data: Mutex<Vec<u8>>,
    writes: AtomicUsize,
}

impl HeadlessBuffer {
    pub(super) fn new(desc: &BufferDesc) -> Self {
        Self {
            label: desc.label.clone(),
            data: Mutex::new(vec![0; desc.size as usize]),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn contents(&self) -> RhiResult<Vec<u8>> {
        self.data
            .lock()
            .map(|data| data.clone())
            .map_err(|_| RhiError::LockPoisoned("headless buffer"))
    }

    /// Number of successful `write` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

impl Buffer for HeadlessBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.data.lock().map(|d| d.len() as u64).unwrap_or(0)
    }

    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut contents = self
            .data
            .lock()
            .map_err(|_| RhiError::LockPoisoned("headless buffer"))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer '{}' size: offset {} + data {} > buffer {}",
                self.label,
                offset,
                data.len(),
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Swapchain
// =============================================================================

/// Round-robin swapchain. Acquire signals its semaphore at once; present is
/// queued on the present lane behind its wait semaphore.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    shared: Arc<Shared>,
    image_count: u32,
    next_image: u32,
    extent: (u32, u32),
    acquire_status: VecDeque<SurfaceStatus>,
    present_status: VecDeque<SurfaceStatus>,
}

impl HeadlessSwapchain {
    pub(super) fn new(shared: Arc<Shared>, image_count: u32, extent: (u32, u32)) -> Self {
        Self {
            shared,
            image_count: image_count.max(1),
            next_image: 0,
            extent,
            acquire_status: VecDeque::new(),
            present_status: VecDeque::new(),
        }
    }

    /// Makes the next acquire report `status`.
    pub fn push_acquire_status(&mut self, status: SurfaceStatus) {
        self.acquire_status.push_back(status);
    }

    /// Makes the next present report `status`.
    pub fn push_present_status(&mut self, status: SurfaceStatus) {
        self.present_status.push_back(status);
    }
}

impl Swapchain for HeadlessSwapchain {
    fn acquire_next_image(
        &mut self,
        signal: &dyn Semaphore,
        _timeout_ns: u64,
    ) -> RhiResult<AcquiredImage> {
        let status = self
            .acquire_status
            .pop_front()
            .unwrap_or(SurfaceStatus::Optimal);
        if status == SurfaceStatus::OutOfDate {
            return Ok(AcquiredImage {
                index: None,
                status,
            });
        }

        let semaphore: &HeadlessSemaphore = downcast(signal.as_any(), "semaphore")?;
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;

        let mut state = self.shared.lock()?;
        state.apply_signal(semaphore.id(), None);
        state.journal.push(Event::Acquired {
            image_index,
            semaphore: semaphore.label().to_string(),
        });
        if state.mode == super::ExecutionMode::Immediate && state.pump() > 0 {
            self.shared.changed.notify_all();
        }
        Ok(AcquiredImage {
            index: Some(image_index),
            status,
        })
    }

    fn present(&mut self, image_index: u32, wait: &dyn Semaphore) -> RhiResult<SurfaceStatus> {
        let status = self
            .present_status
            .pop_front()
            .unwrap_or(SurfaceStatus::Optimal);
        let semaphore: &HeadlessSemaphore = downcast(wait.as_any(), "semaphore")?;

        let mut state = self.shared.lock()?;
        state.next_seq += 1;
        let seq = state.next_seq;
        state.journal.push(Event::Submitted(SubmitRecord {
            seq,
            lane: Lane::Present,
            command_buffers: Vec::new(),
            waits: vec![WaitRecord {
                semaphore: semaphore.label().to_string(),
                value: None,
                stage: PipelineStage::BOTTOM_OF_PIPE,
            }],
            signals: Vec::new(),
            fence: None,
        }));
        let batch = Pending {
            seq,
            lane: Lane::Present,
            waits: vec![SyncRef {
                id: semaphore.id(),
                value: None,
            }],
            signals: Vec::new(),
            fence: None,
            in_flight: Vec::new(),
            present: Some(image_index),
        };
        self.shared.enqueue(&mut state, batch);
        Ok(status)
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
