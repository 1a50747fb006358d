//! CPU-simulated device.
//!
//! The headless backend implements every RHI trait without a GPU. Queue
//! submissions are held on per-lane FIFOs and execute once all of their
//! semaphore waits are satisfied: binary waits consume a pending signal,
//! timeline waits compare against the counter. Executing a batch applies its
//! signals and its fence, which may release later batches.
//!
//! Everything the device is asked to do is appended to a journal of
//! [`Event`]s, and misuse that a real driver would turn into undefined
//! behavior (re-recording an in-flight command buffer, signaling a binary
//! semaphore twice, moving a timeline backwards) is collected as a violation.
//!
//! In [`ExecutionMode::Immediate`] ready batches execute as soon as they are
//! submitted. In [`ExecutionMode::Manual`] nothing executes until
//! [`HeadlessDevice::run_pending`] is called, which lets a test hold the
//! "GPU" back while the CPU keeps recording.

mod journal;
mod objects;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::command::CommandBuffer;
use crate::device::{Buffer, DepthTarget, Device};
use crate::error::{RhiError, RhiResult};
use crate::sync::{Fence, Semaphore, downcast};
use crate::types::{BufferDesc, DepthTargetDesc, QueueKind, SemaphoreKind, SubmitInfo};

pub use journal::{
    Command, Event, Lane, RecordedBuffer, SignalRecord, SubmitRecord, WaitRecord,
};
pub use objects::{
    HeadlessBuffer, HeadlessCommandBuffer, HeadlessDepthTarget, HeadlessFence,
    HeadlessSemaphore, HeadlessSwapchain,
};

/// When submitted work runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Ready batches execute during `submit`.
    Immediate,
    /// Batches execute only in [`HeadlessDevice::run_pending`].
    Manual,
}

#[derive(Debug)]
enum SemaphoreState {
    Binary { pending: u32 },
    Timeline { value: u64 },
}

#[derive(Debug)]
struct SyncRef {
    id: u64,
    value: Option<u64>,
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    lane: Lane,
    waits: Vec<SyncRef>,
    signals: Vec<SyncRef>,
    fence: Option<u64>,
    in_flight: Vec<Arc<AtomicUsize>>,
    present: Option<u32>,
}

#[derive(Debug)]
struct State {
    mode: ExecutionMode,
    next_id: u64,
    next_seq: u64,
    semaphores: HashMap<u64, SemaphoreState>,
    semaphore_labels: HashMap<u64, String>,
    fences: HashMap<u64, bool>,
    fence_labels: HashMap<u64, String>,
    lanes: HashMap<Lane, VecDeque<Pending>>,
    journal: Vec<Event>,
    violations: Vec<String>,
}

impl State {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn semaphore_label(&self, id: u64) -> String {
        self.semaphore_labels
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("semaphore#{id}"))
    }

    fn is_ready(&self, pending: &Pending) -> bool {
        pending.waits.iter().all(|wait| match self.semaphores.get(&wait.id) {
            Some(SemaphoreState::Binary { pending }) => *pending > 0,
            Some(SemaphoreState::Timeline { value }) => *value >= wait.value.unwrap_or(0),
            None => false,
        })
    }

    /// Applies the effects of a batch whose waits are satisfied.
    fn execute(&mut self, batch: Pending) {
        for wait in &batch.waits {
            if let Some(SemaphoreState::Binary { pending }) = self.semaphores.get_mut(&wait.id) {
                *pending -= 1;
            }
        }
        for signal in &batch.signals {
            self.apply_signal(signal.id, signal.value);
        }
        if let Some(fence) = batch.fence {
            let label = self.fence_labels.get(&fence).cloned().unwrap_or_default();
            let signaled = self.fences.entry(fence).or_insert(false);
            if *signaled {
                self.violations
                    .push(format!("fence '{label}' signaled while already signaled"));
            }
            *signaled = true;
        }
        for counter in &batch.in_flight {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        if let Some(image_index) = batch.present {
            self.journal.push(Event::Presented { image_index });
        }
        trace!("Headless {:?} batch #{} executed", batch.lane, batch.seq);
        self.journal.push(Event::Executed {
            seq: batch.seq,
            lane: batch.lane,
        });
    }

    fn apply_signal(&mut self, id: u64, value: Option<u64>) {
        let label = self.semaphore_label(id);
        match self.semaphores.get_mut(&id) {
            Some(SemaphoreState::Binary { pending }) => {
                if *pending > 0 {
                    self.violations.push(format!(
                        "binary semaphore '{label}' signaled with a signal already pending"
                    ));
                }
                *pending += 1;
            }
            Some(SemaphoreState::Timeline { value: current }) => {
                let target = value.unwrap_or(0);
                if target <= *current {
                    self.violations.push(format!(
                        "timeline semaphore '{label}' signaled with {target}, not above {current}"
                    ));
                }
                *current = (*current).max(target);
            }
            None => self
                .violations
                .push(format!("signal of destroyed semaphore '{label}'")),
        }
    }

    /// Executes ready batches lane by lane until nothing moves. Each lane is
    /// strictly FIFO, like a hardware queue.
    fn pump(&mut self) -> usize {
        let mut executed = 0;
        loop {
            let mut progressed = false;
            for lane in [Lane::Graphics, Lane::Compute, Lane::Present] {
                loop {
                    let ready = match self.lanes.get(&lane).and_then(|q| q.front()) {
                        Some(head) => self.is_ready(head),
                        None => false,
                    };
                    if !ready {
                        break;
                    }
                    if let Some(batch) = self.lanes.get_mut(&lane).and_then(|q| q.pop_front()) {
                        self.execute(batch);
                        executed += 1;
                        progressed = true;
                    }
                }
            }
            if !progressed {
                return executed;
            }
        }
    }

    fn pending_count(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> RhiResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RhiError::LockPoisoned("headless device state"))
    }

    /// Queues a batch, executing it right away in immediate mode.
    fn enqueue(&self, state: &mut State, batch: Pending) {
        state.lanes.entry(batch.lane).or_default().push_back(batch);
        if state.mode == ExecutionMode::Immediate && state.pump() > 0 {
            self.changed.notify_all();
        }
    }
}

/// Simulated GPU device. Cheap to clone; clones share all state.
#[derive(Clone, Debug)]
pub struct HeadlessDevice {
    shared: Arc<Shared>,
}

impl HeadlessDevice {
    pub fn new(mode: ExecutionMode) -> Self {
        debug!("Headless device created ({:?})", mode);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    mode,
                    next_id: 0,
                    next_seq: 0,
                    semaphores: HashMap::new(),
                    semaphore_labels: HashMap::new(),
                    fences: HashMap::new(),
                    fence_labels: HashMap::new(),
                    lanes: HashMap::new(),
                    journal: Vec::new(),
                    violations: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn immediate() -> Self {
        Self::new(ExecutionMode::Immediate)
    }

    pub fn manual() -> Self {
        Self::new(ExecutionMode::Manual)
    }

    /// Switches mode. Switching to immediate drains everything that is ready.
    pub fn set_mode(&self, mode: ExecutionMode) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        state.mode = mode;
        if mode == ExecutionMode::Immediate && state.pump() > 0 {
            self.shared.changed.notify_all();
        }
        Ok(())
    }

    /// Executes every batch whose waits are satisfied. Returns how many ran.
    pub fn run_pending(&self) -> RhiResult<usize> {
        let mut state = self.shared.lock()?;
        let executed = state.pump();
        if executed > 0 {
            self.shared.changed.notify_all();
        }
        Ok(executed)
    }

    /// Batches still waiting on a semaphore or on [`run_pending`](Self::run_pending).
    pub fn pending_submissions(&self) -> RhiResult<usize> {
        Ok(self.shared.lock()?.pending_count())
    }

    pub fn journal(&self) -> RhiResult<Vec<Event>> {
        Ok(self.shared.lock()?.journal.clone())
    }

    /// Submissions in the order the device received them.
    pub fn submissions(&self) -> RhiResult<Vec<SubmitRecord>> {
        Ok(self
            .shared
            .lock()?
            .journal
            .iter()
            .filter_map(|event| match event {
                Event::Submitted(record) => Some(record.clone()),
                _ => None,
            })
            .collect())
    }

    pub fn clear_journal(&self) -> RhiResult<()> {
        self.shared.lock()?.journal.clear();
        Ok(())
    }

    /// Misuse detected so far. Empty for a correct frame loop.
    pub fn violations(&self) -> RhiResult<Vec<String>> {
        Ok(self.shared.lock()?.violations.clone())
    }

    /// Current counter of the timeline semaphore labeled `label`.
    pub fn timeline_value(&self, label: &str) -> RhiResult<Option<u64>> {
        let state = self.shared.lock()?;
        Ok(state
            .semaphore_labels
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .and_then(|(id, _)| match state.semaphores.get(id) {
                Some(SemaphoreState::Timeline { value }) => Some(*value),
                _ => None,
            }))
    }

    /// Creates a swapchain with `image_count` images.
    pub fn create_swapchain(&self, image_count: u32, extent: (u32, u32)) -> HeadlessSwapchain {
        HeadlessSwapchain::new(Arc::clone(&self.shared), image_count, extent)
    }

    fn lane(queue: QueueKind) -> Lane {
        match queue {
            QueueKind::Graphics => Lane::Graphics,
            QueueKind::Compute => Lane::Compute,
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::immediate()
    }
}

impl Device for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_fence(&self, signaled: bool, label: &str) -> RhiResult<Box<dyn Fence>> {
        let mut state = self.shared.lock()?;
        let id = state.alloc_id();
        state.fences.insert(id, signaled);
        state.fence_labels.insert(id, label.to_string());
        trace!("Headless fence '{}' created (signaled: {})", label, signaled);
        Ok(Box::new(HeadlessFence::new(
            Arc::clone(&self.shared),
            id,
            label,
        )))
    }

    fn create_semaphore(&self, kind: SemaphoreKind, label: &str) -> RhiResult<Arc<dyn Semaphore>> {
        let mut state = self.shared.lock()?;
        let id = state.alloc_id();
        let initial = match kind {
            SemaphoreKind::Binary => SemaphoreState::Binary { pending: 0 },
            SemaphoreKind::Timeline => SemaphoreState::Timeline { value: 0 },
        };
        state.semaphores.insert(id, initial);
        state.semaphore_labels.insert(id, label.to_string());
        trace!("Headless {:?} semaphore '{}' created", kind, label);
        Ok(Arc::new(HeadlessSemaphore::new(
            Arc::clone(&self.shared),
            id,
            kind,
            label,
        )))
    }

    fn create_command_buffer(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> RhiResult<Box<dyn CommandBuffer>> {
        Ok(Box::new(HeadlessCommandBuffer::new(queue, label)))
    }

    fn create_depth_target(&self, desc: &DepthTargetDesc) -> RhiResult<Arc<dyn DepthTarget>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "depth target '{}' has a zero extent",
                desc.label
            )));
        }
        Ok(Arc::new(HeadlessDepthTarget::new(desc)))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Box<dyn Buffer>> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "buffer '{}' size must be greater than 0",
                desc.label
            )));
        }
        Ok(Box::new(HeadlessBuffer::new(desc)))
    }

    fn submit(&self, queue: QueueKind, info: &SubmitInfo<'_>) -> RhiResult<()> {
        let mut recorded = Vec::with_capacity(info.command_buffers.len());
        let mut in_flight = Vec::with_capacity(info.command_buffers.len());
        for command_buffer in &info.command_buffers {
            let cb: &HeadlessCommandBuffer =
                downcast(command_buffer.as_any(), "command buffer")?;
            if cb.queue() != queue {
                return Err(RhiError::SubmitError(format!(
                    "command buffer '{}' was allocated for the {} queue, submitted to {}",
                    cb.label(),
                    cb.queue(),
                    queue
                )));
            }
            if !cb.is_executable() {
                return Err(RhiError::SubmitError(format!(
                    "command buffer '{}' is not in the executable state",
                    cb.label()
                )));
            }
            recorded.push(cb.snapshot());
            in_flight.push(cb.in_flight_counter());
        }

        let mut state = self.shared.lock()?;

        let mut waits = Vec::with_capacity(info.waits.len());
        let mut wait_records = Vec::with_capacity(info.waits.len());
        for wait in &info.waits {
            let semaphore: &HeadlessSemaphore = downcast(wait.semaphore.as_any(), "semaphore")?;
            check_value(semaphore, wait.value)?;
            waits.push(SyncRef {
                id: semaphore.id(),
                value: wait.value,
            });
            wait_records.push(WaitRecord {
                semaphore: semaphore.label().to_string(),
                value: wait.value,
                stage: wait.stage,
            });
        }

        let mut signals = Vec::with_capacity(info.signals.len());
        let mut signal_records = Vec::with_capacity(info.signals.len());
        for signal in &info.signals {
            let semaphore: &HeadlessSemaphore = downcast(signal.semaphore.as_any(), "semaphore")?;
            check_value(semaphore, signal.value)?;
            signals.push(SyncRef {
                id: semaphore.id(),
                value: signal.value,
            });
            signal_records.push(SignalRecord {
                semaphore: semaphore.label().to_string(),
                value: signal.value,
            });
        }

        let fence = match info.fence {
            Some(fence) => {
                let fence: &HeadlessFence = downcast(fence.as_any(), "fence")?;
                if state.fences.get(&fence.id()).copied().unwrap_or(false) {
                    return Err(RhiError::SubmitError(format!(
                        "fence '{}' submitted while still signaled",
                        fence.label()
                    )));
                }
                Some((fence.id(), fence.label().to_string()))
            }
            None => None,
        };

        for counter in &in_flight {
            counter.fetch_add(1, Ordering::AcqRel);
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let lane = Self::lane(queue);
        state.journal.push(Event::Submitted(SubmitRecord {
            seq,
            lane,
            command_buffers: recorded,
            waits: wait_records,
            signals: signal_records,
            fence: fence.as_ref().map(|(_, label)| label.clone()),
        }));

        let batch = Pending {
            seq,
            lane,
            waits,
            signals,
            fence: fence.map(|(id, _)| id),
            in_flight,
            present: None,
        };
        self.shared.enqueue(&mut state, batch);
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.shared.lock()?;
        if state.pump() > 0 {
            self.shared.changed.notify_all();
        }
        let stuck = state.pending_count();
        if stuck > 0 {
            return Err(RhiError::SubmitError(format!(
                "{stuck} submission(s) can never execute: their semaphore waits are unsatisfied"
            )));
        }
        Ok(())
    }
}

fn check_value(semaphore: &HeadlessSemaphore, value: Option<u64>) -> RhiResult<()> {
    match (semaphore.kind(), value) {
        (SemaphoreKind::Timeline, None) => Err(RhiError::SubmitError(format!(
            "timeline semaphore '{}' used without a value",
            semaphore.label()
        ))),
        (SemaphoreKind::Binary, Some(_)) => Err(RhiError::SubmitError(format!(
            "binary semaphore '{}' used with a timeline value",
            semaphore.label()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PipelineStage;

    fn recorded(device: &HeadlessDevice, queue: QueueKind, label: &str) -> Box<dyn CommandBuffer> {
        let mut cb = device.create_command_buffer(queue, label).unwrap();
        cb.begin().unwrap();
        cb.draw(3, 1);
        cb.end().unwrap();
        cb
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HeadlessDevice>();
    }

    #[test]
    fn test_fence_signaled_by_immediate_submit() {
        let device = HeadlessDevice::immediate();
        let fence = device.create_fence(false, "frame").unwrap();
        let cb = recorded(&device, QueueKind::Graphics, "draw");

        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default()
                    .command_buffer(cb.as_ref())
                    .fence(fence.as_ref()),
            )
            .unwrap();

        assert!(fence.is_signaled().unwrap());
        fence.wait(0).unwrap();
    }

    #[test]
    fn test_binary_wait_blocks_until_signaled() {
        let device = HeadlessDevice::immediate();
        let semaphore = device
            .create_semaphore(SemaphoreKind::Binary, "chain")
            .unwrap();
        let fence = device.create_fence(false, "done").unwrap();

        // Consumer first: stays pending until the producer signals.
        let consumer = recorded(&device, QueueKind::Compute, "consumer");
        device
            .submit(
                QueueKind::Compute,
                &SubmitInfo::default()
                    .command_buffer(consumer.as_ref())
                    .wait(semaphore.as_ref(), PipelineStage::COMPUTE_SHADER)
                    .fence(fence.as_ref()),
            )
            .unwrap();
        assert_eq!(device.pending_submissions().unwrap(), 1);

        let producer = recorded(&device, QueueKind::Graphics, "producer");
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default()
                    .command_buffer(producer.as_ref())
                    .signal(semaphore.as_ref()),
            )
            .unwrap();

        assert_eq!(device.pending_submissions().unwrap(), 0);
        assert!(fence.is_signaled().unwrap());
        assert!(device.violations().unwrap().is_empty());
    }

    #[test]
    fn test_timeline_wait_value() {
        let device = HeadlessDevice::immediate();
        let timeline = device
            .create_semaphore(SemaphoreKind::Timeline, "shadow")
            .unwrap();

        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().wait_value(timeline.as_ref(), 2, PipelineStage::FRAGMENT_SHADER),
            )
            .unwrap();
        device
            .submit(
                QueueKind::Compute,
                &SubmitInfo::default().signal_value(timeline.as_ref(), 1),
            )
            .unwrap();
        assert_eq!(device.pending_submissions().unwrap(), 1);

        device
            .submit(
                QueueKind::Compute,
                &SubmitInfo::default().signal_value(timeline.as_ref(), 2),
            )
            .unwrap();
        assert_eq!(device.pending_submissions().unwrap(), 0);
        assert_eq!(timeline.value().unwrap(), 2);
    }

    #[test]
    fn test_timeline_regression_is_a_violation() {
        let device = HeadlessDevice::immediate();
        let timeline = device
            .create_semaphore(SemaphoreKind::Timeline, "particles")
            .unwrap();
        for value in [3, 3] {
            device
                .submit(
                    QueueKind::Compute,
                    &SubmitInfo::default().signal_value(timeline.as_ref(), value),
                )
                .unwrap();
        }
        assert_eq!(device.violations().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_mode_holds_work_back() {
        let device = HeadlessDevice::manual();
        let fence = device.create_fence(false, "frame").unwrap();
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().fence(fence.as_ref()),
            )
            .unwrap();

        assert!(!fence.is_signaled().unwrap());
        assert!(matches!(
            fence.wait(1_000_000),
            Err(RhiError::FenceTimeout { .. })
        ));

        assert_eq!(device.run_pending().unwrap(), 1);
        fence.wait(0).unwrap();
    }

    #[test]
    fn test_rerecording_in_flight_buffer_fails() {
        let device = HeadlessDevice::manual();
        let mut cb = recorded(&device, QueueKind::Graphics, "render");
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().command_buffer(cb.as_ref()),
            )
            .unwrap();

        assert!(cb.begin().is_err());
        device.run_pending().unwrap();
        assert!(cb.begin().is_ok());
    }

    #[test]
    fn test_submit_rejects_wrong_queue_and_open_buffer() {
        let device = HeadlessDevice::immediate();
        let compute = recorded(&device, QueueKind::Compute, "particles");
        let err = device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().command_buffer(compute.as_ref()),
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::SubmitError(_)));

        let mut open = device
            .create_command_buffer(QueueKind::Graphics, "open")
            .unwrap();
        open.begin().unwrap();
        let err = device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().command_buffer(open.as_ref()),
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::SubmitError(_)));
    }

    #[test]
    fn test_signaled_fence_cannot_be_submitted() {
        let device = HeadlessDevice::immediate();
        let fence = device.create_fence(true, "frame").unwrap();
        let err = device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().fence(fence.as_ref()),
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::SubmitError(_)));
    }

    #[test]
    fn test_wait_idle_reports_deadlock() {
        let device = HeadlessDevice::immediate();
        let never = device
            .create_semaphore(SemaphoreKind::Timeline, "never")
            .unwrap();
        device
            .submit(
                QueueKind::Graphics,
                &SubmitInfo::default().wait_value(never.as_ref(), 1, PipelineStage::ALL_COMMANDS),
            )
            .unwrap();
        assert!(device.wait_idle().is_err());
    }
}
