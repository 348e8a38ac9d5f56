//! High-level job system interface.
//!
//! The [`JobSystem`] composes the crate's primitives into a scheduler:
//! jobs are allocated from a [`MemoryPool`], their pointers travel through
//! one shared [`MpmcQueue`], and worker threads race to claim and execute
//! them. Completion is tracked by [`Counter`]s and by each job's
//! unfinished count, which also keeps parent jobs alive until their
//! children are done.
//!
//! Waiting is cooperative: `wait_for_counter` and `wait_all` execute
//! queued jobs on the calling thread instead of sleeping, so a job that
//! waits on its own children cannot deadlock the system.

use crate::counter::Counter;
use crate::job::Job;
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::MemoryPool;
use crate::queue::MpmcQueue;
use crate::worker::{PinningStrategy, Worker, WorkerParams};
use crossbeam::utils::Backoff;
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Default capacity of the job queue (slots).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
/// Default capacity of the job pool (blocks per chunk).
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

/// Configuration for a [`JobSystem`].
#[derive(Clone, Debug)]
pub struct JobSystemConfig {
    /// Number of worker threads; 0 means one per available core.
    pub workers: usize,
    /// Job queue capacity; must be a power of two of at least 2.
    pub queue_capacity: usize,
    /// Blocks per job-pool chunk.
    pub pool_capacity: usize,
    /// Whether the job pool may grow when exhausted.
    pub pool_growable: bool,
    /// Worker-to-core placement.
    pub pinning: PinningStrategy,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        JobSystemConfig {
            workers: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pool_growable: true,
            pinning: PinningStrategy::None,
        }
    }
}

/// A queued job pointer. Jobs are pool blocks handed between threads; the
/// queue only moves the pointer, never the record itself.
pub(crate) struct QueuedJob(pub(crate) NonNull<Job>);

// SAFETY: the pointee is a pool block owned by the scheduler; exactly one
// thread holds a claimed job at a time.
unsafe impl Send for QueuedJob {}

/// State shared between the scheduler handle and its workers.
pub(crate) struct Shared {
    pub(crate) queue: MpmcQueue<QueuedJob>,
    pub(crate) pool: MemoryPool<Job>,
    pub(crate) running: AtomicBool,
    /// Jobs scheduled but not yet fully finished (payload plus children).
    pub(crate) pending: AtomicUsize,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Shared {
    /// Pops one job pointer off the queue, if any.
    pub(crate) fn try_claim_job(&self) -> Option<NonNull<Job>> {
        let claimed = self.queue.try_pop()?;
        #[cfg(feature = "metrics")]
        self.metrics.queue_pops.fetch_add(1, Ordering::Relaxed);
        Some(claimed.0)
    }

    /// Executes a claimed job and runs its finish protocol.
    pub(crate) fn run_job(&self, job: NonNull<Job>) {
        // SAFETY: a claimed job pointer is exclusively owned by this
        // thread until the finish protocol returns it to the pool.
        unsafe { Job::run_raw(job.as_ptr()) };
        self.finish(job);
        #[cfg(feature = "metrics")]
        self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Finish protocol: settle the group counter, then walk up the parent
    /// chain retiring every job whose unfinished count reaches zero.
    fn finish(&self, job: NonNull<Job>) {
        // The counter is decremented exactly once per job: here, when its
        // own payload has run. A child completing later only touches the
        // parent's unfinished count.
        // SAFETY: exclusive claim of the job (see run_job).
        if let Some(counter) = unsafe { Job::settle_counter(job.as_ptr()) } {
            counter.decrement();
        }

        let mut current = job;
        loop {
            // SAFETY: `current` is a live pool block; children keep their
            // parent's block alive via its unfinished count.
            let remaining = unsafe { Job::complete_one_raw(current.as_ptr()) };
            if remaining != 0 {
                // Children still running; the last of them re-enters here.
                break;
            }
            // SAFETY: unfinished hit zero, so no other thread can reach
            // this block again; it holds an initialized Job from this pool.
            let parent = unsafe { Job::parent_raw(current.as_ptr()) };
            unsafe { self.pool.destroy(current) };
            self.pending.fetch_sub(1, Ordering::Release);
            match NonNull::new(parent) {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    /// Publishes a job to the queue. A full queue is drained
    /// cooperatively: the enqueuing thread claims and runs one queued job
    /// before retrying, so the push makes progress even when every worker
    /// is itself stuck scheduling (e.g. a job that fans out more work than
    /// the queue holds).
    pub(crate) fn enqueue(&self, job: NonNull<Job>) {
        self.pending.fetch_add(1, Ordering::Relaxed);

        let backoff = Backoff::new();
        let mut item = QueuedJob(job);
        loop {
            match self.queue.try_push(item) {
                Ok(()) => break,
                Err(returned) => {
                    item = returned;
                    #[cfg(feature = "metrics")]
                    self.metrics.enqueue_retries.fetch_add(1, Ordering::Relaxed);
                    match self.try_claim_job() {
                        Some(claimed) => {
                            self.run_job(claimed);
                            backoff.reset();
                        }
                        None => backoff.snooze(),
                    }
                }
            }
        }
        #[cfg(feature = "metrics")]
        self.metrics.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

/// The job scheduler: worker threads, a shared job queue and a job pool.
///
/// Workers start in the constructor and are joined when the system shuts
/// down or drops. Dropping the system stops workers and reclaims queued
/// jobs *without running them*; call [`wait_all`](Self::wait_all) or
/// [`shutdown`](Self::shutdown) first if every job must complete.
///
/// Panicking payloads are caught, reported to stderr, and counted as
/// finished, so waiters never hang on a panicked job.
///
/// Scheduling against a full queue does not block passively: the calling
/// thread executes queued jobs until its push lands, so a job fanning out
/// more work than the queue holds still completes.
///
/// # Example
///
/// ```no_run
/// use jobforge::{Counter, JobSystem};
///
/// let job_system = JobSystem::new(4);
/// let counter = Counter::new(0);
///
/// for i in 0..100 {
///     job_system.schedule_with_counter(move || { let _ = i * i; }, &counter);
/// }
/// job_system.wait_for_counter(&counter);
/// ```
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

impl JobSystem {
    /// Creates a job system with `workers` threads (0 means one per
    /// available core) and default queue and pool capacities.
    pub fn new(workers: usize) -> Self {
        JobSystem::with_config(JobSystemConfig {
            workers,
            ..JobSystemConfig::default()
        })
    }

    /// Creates a job system from an explicit configuration.
    pub fn with_config(config: JobSystemConfig) -> Self {
        let worker_count = if config.workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            config.workers
        };

        let shared = Arc::new(Shared {
            queue: MpmcQueue::new(config.queue_capacity),
            pool: MemoryPool::with_options(config.pool_capacity, config.pool_growable, 0),
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        });

        let core_ids = match config.pinning {
            PinningStrategy::Linear => core_affinity::get_core_ids().unwrap_or_default(),
            PinningStrategy::None => Vec::new(),
        };

        let workers = (0..worker_count)
            .map(|id| {
                Worker::new(WorkerParams {
                    id,
                    shared: Arc::clone(&shared),
                    core_id: if core_ids.is_empty() {
                        None
                    } else {
                        Some(core_ids[id % core_ids.len()])
                    },
                })
            })
            .collect();

        JobSystem { shared, workers }
    }

    /// Schedules a closure with no completion counter.
    ///
    /// Returns false when the job pool is exhausted (non-growable pool or
    /// heap failure); the closure is dropped in that case.
    pub fn schedule<F>(&self, payload: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.shared.pool.construct(Job::new(payload)) {
            Some(job) => {
                self.shared.enqueue(job);
                true
            }
            None => false,
        }
    }

    /// Schedules a closure against `counter`.
    ///
    /// The counter is incremented here and decremented exactly once when
    /// the job's payload has run.
    pub fn schedule_with_counter<F>(&self, payload: F, counter: &Counter) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self
            .shared
            .pool
            .construct(Job::with_counter(payload, counter.clone()))
        {
            Some(job) => {
                counter.increment();
                self.shared.enqueue(job);
                true
            }
            None => false,
        }
    }

    /// Schedules a closure and returns a fresh counter tracking it.
    ///
    /// # Panics
    ///
    /// Panics if the job pool is exhausted.
    pub fn run<F>(&self, payload: F) -> Counter
    where
        F: FnOnce() + Send + 'static,
    {
        let counter = Counter::new(0);
        assert!(
            self.schedule_with_counter(payload, &counter),
            "failed to allocate job"
        );
        counter
    }

    /// Allocates a job from the pool without scheduling it, for callers
    /// building parent/child graphs explicitly.
    ///
    /// The counter is *not* incremented; graph builders own their counter
    /// arithmetic. Returns `None` when the pool is exhausted.
    pub fn allocate_job<F>(&self, payload: F, counter: Option<&Counter>) -> Option<NonNull<Job>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .pool
            .construct(Job::with_parent(payload, counter.cloned(), ptr::null_mut()))
    }

    /// Allocates a job attached under `parent`, bumping the parent's
    /// unfinished count so it stays alive until this child completes.
    ///
    /// # Safety
    ///
    /// `parent` must be a live job obtained from this system's
    /// [`allocate_job`](Self::allocate_job) (or a descendant of one) whose
    /// unfinished count has not yet reached zero.
    pub unsafe fn allocate_child_job<F>(
        &self,
        parent: NonNull<Job>,
        payload: F,
        counter: Option<&Counter>,
    ) -> Option<NonNull<Job>>
    where
        F: FnOnce() + Send + 'static,
    {
        let child = self
            .shared
            .pool
            .construct(Job::with_parent(payload, counter.cloned(), parent.as_ptr()))?;
        Job::add_child_raw(parent.as_ptr());
        Some(child)
    }

    /// Enqueues a job allocated with [`allocate_job`](Self::allocate_job)
    /// or [`allocate_child_job`](Self::allocate_child_job).
    ///
    /// # Safety
    ///
    /// `job` must come from this system's pool and must not have been
    /// scheduled or deallocated already. Ownership passes to the
    /// scheduler.
    pub unsafe fn schedule_job(&self, job: NonNull<Job>) {
        self.shared.enqueue(job);
    }

    /// Returns an unscheduled job's storage to the pool.
    ///
    /// # Safety
    ///
    /// `job` must come from this system's pool, must never have been
    /// scheduled, and must not be referenced (e.g. as a parent) by any
    /// other live job.
    pub unsafe fn deallocate_job(&self, job: NonNull<Job>) {
        self.shared.pool.destroy(job);
    }

    /// Blocks until `counter` reaches zero, executing queued jobs on this
    /// thread while waiting.
    pub fn wait_for_counter(&self, counter: &Counter) {
        while !counter.is_zero() {
            match self.shared.try_claim_job() {
                Some(job) => self.shared.run_job(job),
                None => thread::yield_now(),
            }
        }
    }

    /// Blocks until every scheduled job (and its descendants) has
    /// finished, executing queued jobs on this thread while waiting.
    pub fn wait_all(&self) {
        while self.shared.pending.load(Ordering::Acquire) > 0 {
            match self.shared.try_claim_job() {
                Some(job) => self.shared.run_job(job),
                None => thread::yield_now(),
            }
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of scheduled jobs not yet fully finished. Approximate while
    /// workers are active.
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// Whether workers are still accepting jobs.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Snapshot of the scheduler's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Drains all outstanding work, then stops and joins the workers.
    ///
    /// Returns Err with a description if any worker thread panicked
    /// (payload panics are caught earlier and do not count).
    pub fn shutdown(mut self) -> Result<(), String> {
        self.wait_all();
        self.shared.running.store(false, Ordering::Relaxed);

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let worker_id = worker.id();
            if worker.join().is_err() {
                panicked += 1;
                eprintln!("worker {} panicked during execution", worker_id);
            }
        }

        if panicked > 0 {
            Err(format!("{} worker thread(s) panicked", panicked))
        } else {
            Ok(())
        }
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        JobSystem::new(0)
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // Jobs still queued at teardown are reclaimed without running.
        while let Some(job) = self.shared.try_claim_job() {
            // SAFETY: a claimed job is exclusively ours; workers are gone.
            unsafe { self.shared.pool.destroy(job) };
            self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_job_system_creation() {
        let job_system = JobSystem::new(4);
        assert_eq!(job_system.worker_count(), 4);
        assert!(job_system.is_running());
        assert_eq!(job_system.pending_jobs(), 0);
        job_system.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_default_worker_count() {
        let job_system = JobSystem::new(0);
        let expected = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        assert_eq!(job_system.worker_count(), expected);
    }

    #[test]
    fn test_run_and_wait() {
        let job_system = JobSystem::new(2);
        let value = Arc::new(AtomicUsize::new(0));
        let value_clone = value.clone();

        let counter = job_system.run(move || {
            value_clone.store(42, Ordering::SeqCst);
        });

        job_system.wait_for_counter(&counter);
        assert_eq!(value.load(Ordering::SeqCst), 42);
        job_system.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_schedule_without_counter_and_wait_all() {
        let job_system = JobSystem::new(2);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let count = count.clone();
            assert!(job_system.schedule(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }));
        }

        job_system.wait_all();
        assert_eq!(count.load(Ordering::Relaxed), 100);
        assert_eq!(job_system.pending_jobs(), 0);
    }

    #[test]
    fn test_counter_balances() {
        let job_system = JobSystem::new(4);
        let counter = Counter::new(0);

        for _ in 0..50 {
            job_system.schedule_with_counter(|| {}, &counter);
        }

        job_system.wait_for_counter(&counter);
        assert!(counter.is_zero());
        job_system.shutdown().expect("shutdown failed");
    }

    #[test]
    fn test_non_growable_pool_rejects_overflow() {
        let job_system = JobSystem::with_config(JobSystemConfig {
            workers: 1,
            queue_capacity: 16,
            pool_capacity: 4,
            pool_growable: false,
            ..JobSystemConfig::default()
        });

        // Saturate the pool from this thread; workers may free some blocks
        // concurrently, so only the failure path is deterministic here.
        let mut accepted = 0;
        for _ in 0..1000 {
            if job_system.schedule(|| thread::yield_now()) {
                accepted += 1;
            }
        }
        assert!(accepted >= 4);
        job_system.wait_all();
    }

    #[test]
    fn test_panicking_job_does_not_hang_waiters() {
        let job_system = JobSystem::new(2);
        let counter = Counter::new(0);

        job_system.schedule_with_counter(|| panic!("intentional"), &counter);
        job_system.wait_for_counter(&counter);
        assert!(counter.is_zero());
        job_system.shutdown().expect("shutdown failed");
    }
}
