//! Parallel shadow map recording.
//!
//! Every frame the light manager hands out one [`ShadowJob`] per directional
//! light and one per point light cube face. Each job records its own
//! depth-only command buffer on a pool worker and submits it to the graphics
//! queue. A [`CompletionBarrier`] counts the submissions; the job that
//! arrives last attaches the `shadow_done` timeline signal, so the render
//! pass waits on a single value no matter how many jobs ran.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::Mat4;
use renderer_rhi::{
    CommandBuffer, DepthTarget, Device, ImageLayout, QueueKind, RhiError, Semaphore, SubmitInfo,
};
use renderer_scene::CubeFace;
use tracing::trace;

use crate::drawable::{Drawable, ShadowContext};
use crate::error::{FrameError, FrameResult};
use crate::frame_sync::timeline_value;
use crate::thread_pool::{JobHandle, ThreadPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
}

impl fmt::Display for LightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightKind::Directional => f.write_str("dir"),
            LightKind::Point => f.write_str("point"),
        }
    }
}

/// Short face name used in labels, e.g. `+X`.
pub fn face_name(face: CubeFace) -> &'static str {
    match face {
        CubeFace::PositiveX => "+X",
        CubeFace::NegativeX => "-X",
        CubeFace::PositiveY => "+Y",
        CubeFace::NegativeY => "-Y",
        CubeFace::PositiveZ => "+Z",
        CubeFace::NegativeZ => "-Z",
    }
}

/// Name of one shadow pass: `shadow dir0` or `shadow point1 -Z`.
pub fn pass_name(light: LightKind, light_id: usize, face: Option<CubeFace>) -> String {
    match face {
        Some(face) => format!("shadow {light}{light_id} {}", face_name(face)),
        None => format!("shadow {light}{light_id}"),
    }
}

/// Rasterizer depth bias applied in every shadow pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
}

/// Counts shadow job submissions for one frame.
///
/// The lock is held while the arriving job submits, so submissions enter
/// the queue in arrival order and the last arrival's submission (the one
/// carrying the signal) is queued behind every other.
#[derive(Debug)]
pub struct CompletionBarrier {
    expected: usize,
    arrived: Mutex<usize>,
}

impl CompletionBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            arrived: Mutex::new(0),
        }
    }

    #[inline]
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> FrameResult<usize> {
        Ok(*self.lock()?)
    }

    fn lock(&self) -> FrameResult<std::sync::MutexGuard<'_, usize>> {
        self.arrived
            .lock()
            .map_err(|_| FrameError::Rhi(RhiError::LockPoisoned("shadow completion barrier")))
    }

    /// Records one arrival and runs `submit` under the barrier lock. The
    /// flag passed to `submit` is true for exactly one caller: the one that
    /// completes the count.
    pub fn arrive<T>(&self, submit: impl FnOnce(bool) -> FrameResult<T>) -> FrameResult<T> {
        let mut arrived = self.lock()?;
        if *arrived >= self.expected {
            return Err(FrameError::Config(format!(
                "shadow barrier expected {} arrivals, got more",
                self.expected
            )));
        }
        *arrived += 1;
        submit(*arrived == self.expected)
    }
}

/// What every shadow job of one frame shares.
pub struct ShadowFrame {
    pub device: Arc<dyn Device>,
    /// Shadow-casting drawables, snapshotted at dispatch.
    pub casters: Arc<[Arc<dyn Drawable>]>,
    pub shadow_done: Arc<dyn Semaphore>,
    pub frame: u64,
    pub slot: usize,
    pub depth_bias: DepthBias,
}

/// One depth pass, owning its command buffer while it runs.
pub struct ShadowJob {
    pub light: LightKind,
    /// Position in the light list; shifts when an earlier light is removed.
    pub light_index: usize,
    /// Stable per-kind id the pass, its buffers and its labels are named by.
    pub light_id: usize,
    pub face: Option<CubeFace>,
    pub view_projection: Mat4,
    pub(crate) target: Arc<dyn DepthTarget>,
    /// False until the target has been rendered once; its contents are
    /// undefined before that.
    pub(crate) initialized: bool,
    pub(crate) command_buffer: Box<dyn CommandBuffer>,
}

/// A finished job, returning the command buffer to its owner.
pub struct ShadowOutcome {
    pub light: LightKind,
    pub light_index: usize,
    pub face: Option<CubeFace>,
    pub command_buffer: Box<dyn CommandBuffer>,
    /// CPU time spent recording the pass.
    pub recorded_in: Duration,
}

impl ShadowJob {
    pub fn name(&self) -> String {
        pass_name(self.light, self.light_id, self.face)
    }

    fn record(&mut self, shared: &ShadowFrame) -> FrameResult<()> {
        let name = self.name();
        let target = self.target.as_ref();
        let cb = self.command_buffer.as_mut();

        cb.begin()?;
        cb.begin_label(&format!("{name} {}", shared.frame));

        let from = if self.initialized {
            ImageLayout::DepthReadOnly
        } else {
            ImageLayout::Undefined
        };
        cb.transition_depth(target, from, ImageLayout::DepthAttachment);
        cb.begin_depth_pass(target, 1.0);
        cb.set_depth_bias(shared.depth_bias.constant, shared.depth_bias.slope);

        let mut ctx = ShadowContext {
            light: self.light,
            light_index: self.light_index,
            face: self.face,
            slot: shared.slot,
            view_projection: self.view_projection,
            command_buffer: &mut *cb,
        };
        for drawable in shared.casters.iter() {
            drawable.draw_shadow(&mut ctx);
        }

        cb.end_depth_pass();
        cb.transition_depth(target, ImageLayout::DepthAttachment, ImageLayout::DepthReadOnly);
        cb.end_label();
        cb.end()?;
        Ok(())
    }

    /// Records, then submits through `barrier`.
    pub fn run(mut self, shared: &ShadowFrame, barrier: &CompletionBarrier) -> FrameResult<ShadowOutcome> {
        let started = Instant::now();
        self.record(shared)?;
        let recorded_in = started.elapsed();

        let signaled = barrier.arrive(|last| {
            let mut info = SubmitInfo::default().command_buffer(self.command_buffer.as_ref());
            if last {
                info = info.signal_value(shared.shadow_done.as_ref(), timeline_value(shared.frame));
            }
            shared.device.submit(QueueKind::Graphics, &info)?;
            Ok(last)
        })?;
        trace!(
            job = %self.name(),
            frame = shared.frame,
            signaled,
            "shadow job submitted"
        );

        Ok(ShadowOutcome {
            light: self.light,
            light_index: self.light_index,
            face: self.face,
            command_buffer: self.command_buffer,
            recorded_in,
        })
    }
}

/// Spawns every job of a frame on the pool behind one barrier sized to the
/// job count.
pub fn dispatch_shadow_jobs(
    pool: &ThreadPool,
    jobs: Vec<ShadowJob>,
    shared: Arc<ShadowFrame>,
) -> Vec<JobHandle<FrameResult<ShadowOutcome>>> {
    let barrier = Arc::new(CompletionBarrier::new(jobs.len()));
    jobs.into_iter()
        .map(|job| {
            let shared = Arc::clone(&shared);
            let barrier = Arc::clone(&barrier);
            pool.spawn(job.name(), move || job.run(&shared, &barrier))
        })
        .collect()
}

/// With no lights nothing would signal `shadow_done`; an empty graphics
/// submission advances it so the render pass wait still resolves.
pub fn signal_without_shadows(
    device: &dyn Device,
    shadow_done: &dyn Semaphore,
    frame: u64,
) -> FrameResult<()> {
    device.submit(
        QueueKind::Graphics,
        &SubmitInfo::default().signal_value(shadow_done, timeline_value(frame)),
    )?;
    trace!(frame, "no shadow casters, signaled shadow_done directly");
    Ok(())
}
