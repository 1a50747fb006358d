//! Records of what the headless device was asked to do.

use crate::types::{Access, ImageLayout, PipelineStage};

/// Queue lane of the simulated device. Presentation runs on its own lane so
/// it orders against the other queues only through semaphores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Graphics,
    Compute,
    Present,
}

/// A command recorded into a headless command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginLabel(String),
    EndLabel,
    MemoryBarrier {
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    },
    TransitionDepth {
        target: String,
        from: ImageLayout,
        to: ImageLayout,
    },
    TransitionSwapchain {
        image_index: u32,
        from: ImageLayout,
        to: ImageLayout,
    },
    BeginDepthPass {
        target: String,
        clear_depth: f32,
    },
    SetDepthBias {
        constant: f32,
        slope: f32,
    },
    EndDepthPass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// Snapshot of a command buffer at submit time.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedBuffer {
    pub label: String,
    pub commands: Vec<Command>,
}

impl RecordedBuffer {
    /// Names of the debug labels opened in this buffer, in order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            Command::BeginLabel(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaitRecord {
    pub semaphore: String,
    pub value: Option<u64>,
    pub stage: PipelineStage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignalRecord {
    pub semaphore: String,
    pub value: Option<u64>,
}

/// One submission as the device received it.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitRecord {
    /// Sequence number shared with the matching [`Event::Executed`].
    pub seq: u64,
    pub lane: Lane,
    pub command_buffers: Vec<RecordedBuffer>,
    pub waits: Vec<WaitRecord>,
    pub signals: Vec<SignalRecord>,
    pub fence: Option<String>,
}

impl SubmitRecord {
    pub fn waits_on(&self, semaphore: &str) -> Option<&WaitRecord> {
        self.waits.iter().find(|w| w.semaphore == semaphore)
    }

    pub fn signals(&self, semaphore: &str) -> Option<&SignalRecord> {
        self.signals.iter().find(|s| s.semaphore == semaphore)
    }

    pub fn has_buffer(&self, label: &str) -> bool {
        self.command_buffers.iter().any(|b| b.label == label)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Submitted(SubmitRecord),
    Executed { seq: u64, lane: Lane },
    FenceWaited { fence: String },
    FenceReset { fence: String },
    Acquired { image_index: u32, semaphore: String },
    Presented { image_index: u32 },
}
