//! Fixed-size worker pool for frame jobs.
//!
//! Jobs run FIFO on a dedicated rayon pool (not the global one, so the host
//! application keeps its own). Every job reports back through a bounded(1)
//! crossbeam channel wrapped in a [`JobHandle`]; joining the handle is the
//! only way the control thread blocks on a worker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, bounded};
use rayon::{ThreadPool as RayonPool, ThreadPoolBuilder};
use tracing::{debug, error, trace};

use crate::error::{FrameError, FrameResult};

pub struct ThreadPool {
    pool: RayonPool,
    threads: usize,
}

impl ThreadPool {
    /// Creates a pool with exactly `threads` workers.
    pub fn new(threads: usize) -> FrameResult<Self> {
        if threads == 0 {
            return Err(FrameError::Config(
                "thread pool needs at least one worker".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("frame-worker-{i}"))
            .build()
            .map_err(|e| FrameError::Config(format!("failed to build thread pool: {e}")))?;

        debug!("Thread pool created with {} worker(s)", threads);
        Ok(Self { pool, threads })
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queues `job` and returns a handle to its result.
    ///
    /// A panic inside the job is caught and surfaces as
    /// [`FrameError::JobPanicked`] when the handle is joined.
    pub fn spawn<F, T>(&self, label: impl Into<String>, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = bounded(1);
        let job_label = label.clone();
        self.pool.spawn_fifo(move || {
            trace!(job = %job_label, "job started");
            let outcome = panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!(job = %job_label, "job panicked: {}", message);
                message
            });
            // The receiver may already be gone if the frame was abandoned
            let _ = tx.send(outcome);
        });
        JobHandle { label, rx }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads)
            .finish()
    }
}

/// Pending result of a pool job.
#[must_use = "a job handle must be joined to observe the job's result"]
#[derive(Debug)]
pub struct JobHandle<T> {
    label: String,
    rx: Receiver<Result<T, String>>,
}

impl<T> JobHandle<T> {
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True once the job has produced its result.
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Blocks until the job finishes.
    pub fn join(self) -> FrameResult<T> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(FrameError::JobPanicked(self.label)),
            Err(_) => Err(FrameError::JobDisconnected(self.label)),
        }
    }
}

/// Joins every handle, returning the first error after all jobs finished.
///
/// Waiting for all of them even on failure keeps command buffers from being
/// dropped while a sibling job may still be recording.
pub fn join_all<T>(handles: Vec<JobHandle<T>>) -> FrameResult<Vec<T>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.join() {
            Ok(value) => results.push(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_pool_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ThreadPool>();
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(FrameError::Config(_))));
    }

    #[test]
    fn test_spawn_returns_result() {
        let pool = ThreadPool::new(2).unwrap();
        let handle = pool.spawn("answer", || 6 * 7);
        assert_eq!(handle.label(), "answer");
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_jobs_run_in_parallel() {
        let pool = ThreadPool::new(3).unwrap();
        // Deadlocks unless all three jobs run at the same time
        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let barrier = barrier.clone();
                pool.spawn(format!("job {i}"), move || {
                    barrier.wait();
                    i
                })
            })
            .collect();
        assert_eq!(join_all(handles).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                pool.spawn("tick", move || counter.fetch_add(1, Ordering::SeqCst))
            })
            .collect();
        assert_eq!(join_all(handles).unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_becomes_error() {
        let pool = ThreadPool::new(1).unwrap();
        let handle = pool.spawn("boom", || -> u32 { panic!("shadow job exploded") });
        match handle.join() {
            Err(FrameError::JobPanicked(label)) => assert_eq!(label, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }

        // The worker survives the panic
        assert_eq!(pool.spawn("after", || 1).join().unwrap(), 1);
    }

    #[test]
    fn test_join_all_waits_for_every_job() {
        let pool = ThreadPool::new(2).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![pool.spawn("fails", || -> usize { panic!("first") })];
        for _ in 0..4 {
            let finished = finished.clone();
            handles.push(pool.spawn("ok", move || finished.fetch_add(1, Ordering::SeqCst)));
        }
        assert!(matches!(join_all(handles), Err(FrameError::JobPanicked(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&5_u8), "non-string panic payload");
    }
}
