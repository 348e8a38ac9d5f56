//! Worker thread implementation.
//!
//! Workers share a single MPMC job queue: each one loops claiming a job,
//! executing it and running the finish protocol, yielding when the queue
//! is empty. There are no per-worker queues and no stealing; the queue's
//! ticket discipline is what absorbs the contention.

use crate::job_system::Shared;
use core_affinity::CoreId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// How worker threads are placed on CPU cores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PinningStrategy {
    /// Let the OS scheduler place workers freely.
    #[default]
    None,
    /// Pin worker `i` to core `i` (modulo the core count) for cache
    /// locality.
    Linear,
}

/// Parameters handed to a new worker thread.
pub(crate) struct WorkerParams {
    pub(crate) id: usize,
    pub(crate) shared: Arc<Shared>,
    pub(crate) core_id: Option<CoreId>,
}

/// A worker thread executing jobs from the shared queue.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates and starts a worker thread.
    pub(crate) fn new(params: WorkerParams) -> Self {
        let id = params.id;
        let handle = thread::spawn(move || {
            if let Some(core_id) = params.core_id {
                core_affinity::set_for_current(core_id);
            }
            Worker::run_loop(params.shared, params.id);
        });

        Worker {
            id,
            handle: Some(handle),
        }
    }

    /// Main claim/execute loop. Exits when the scheduler stops running;
    /// jobs still queued at that point are reclaimed by the scheduler's
    /// teardown, not here.
    fn run_loop(shared: Arc<Shared>, _worker_id: usize) {
        #[cfg(feature = "trace")]
        let _collector = crate::trace::CollectorGuard;

        while shared.running.load(Ordering::Relaxed) {
            match shared.try_claim_job() {
                Some(job) => {
                    #[cfg(feature = "trace")]
                    let _span = crate::trace::JobSpanGuard::begin(_worker_id, shared.queue.len());
                    shared.run_job(job);
                }
                None => thread::yield_now(),
            }
        }
    }

    /// Returns the worker's ID.
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}
