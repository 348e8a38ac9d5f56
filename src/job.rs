//! Job records: the unit of work the scheduler moves around.
//!
//! Jobs live in the scheduler's [`MemoryPool`](crate::MemoryPool), so the
//! record is small and flat: a boxed closure, an optional completion
//! counter, a raw parent link and the atomic count of unfinished work
//! (the job itself plus any attached children).
//!
//! The scheduler accesses shared jobs through the `*_raw` associated
//! functions, which project individual fields through the raw pointer. A
//! whole-struct reference would assert exclusive (or immutable) access to
//! every field, which is wrong while children concurrently decrement the
//! parent's `unfinished` count.

use crate::counter::Counter;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

/// A unit of work plus its completion bookkeeping.
///
/// `unfinished` starts at 1 for the job's own payload and grows by one per
/// attached child; the storage is reclaimed only when it reaches zero,
/// which keeps parents alive until every descendant has finished.
pub struct Job {
    payload: Option<Box<dyn FnOnce() + Send + 'static>>,
    counter: Option<Counter>,
    parent: *mut Job,
    unfinished: AtomicI32,
}

// Jobs migrate between the scheduling thread and whichever worker claims
// them; the parent pointer always targets a pool block that outlives the
// child (held alive by this job's contribution to `unfinished`).
unsafe impl Send for Job {}

impl Job {
    /// Creates a job with no counter and no parent.
    pub fn new<F>(payload: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            payload: Some(Box::new(payload)),
            counter: None,
            parent: ptr::null_mut(),
            unfinished: AtomicI32::new(1),
        }
    }

    /// Creates a job that decrements `counter` once its payload has run.
    pub fn with_counter<F>(payload: F, counter: Counter) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            payload: Some(Box::new(payload)),
            counter: Some(counter),
            parent: ptr::null_mut(),
            unfinished: AtomicI32::new(1),
        }
    }

    /// Creates a job linked under `parent`. The caller is responsible for
    /// having bumped the parent's unfinished count.
    pub(crate) fn with_parent<F>(payload: F, counter: Option<Counter>, parent: *mut Job) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            payload: Some(Box::new(payload)),
            counter,
            parent,
            unfinished: AtomicI32::new(1),
        }
    }

    /// Runs the payload, at most once.
    ///
    /// A panicking payload is caught and reported to stderr; the job still
    /// counts as finished so waiters do not hang.
    pub fn run(&mut self) {
        if let Some(payload) = self.payload.take() {
            Self::invoke(payload);
        }
    }

    /// Number of unfinished units: the payload (until the finish protocol
    /// retires it) plus unfinished children.
    pub fn unfinished(&self) -> i32 {
        self.unfinished.load(Ordering::Acquire)
    }

    fn invoke(payload: Box<dyn FnOnce() + Send + 'static>) {
        if let Err(err) = panic::catch_unwind(AssertUnwindSafe(payload)) {
            let msg = if let Some(s) = err.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = err.downcast_ref::<String>() {
                s.as_str()
            } else {
                "unknown panic payload"
            };
            eprintln!("job panicked: {}", msg);
        }
    }

    /// Runs the payload of a shared job, at most once.
    ///
    /// # Safety
    ///
    /// `this` must point to a live job claimed by the calling thread; no
    /// other thread may touch the payload concurrently.
    pub(crate) unsafe fn run_raw(this: *mut Job) {
        if let Some(payload) = (*this).payload.take() {
            Self::invoke(payload);
        }
    }

    /// Takes the completion counter of a shared job, leaving `None`.
    /// Called exactly once per job, by the finish protocol.
    ///
    /// # Safety
    ///
    /// Same claim requirement as [`run_raw`](Self::run_raw).
    pub(crate) unsafe fn settle_counter(this: *mut Job) -> Option<Counter> {
        (*this).counter.take()
    }

    /// Registers one more child under a shared job.
    ///
    /// # Safety
    ///
    /// `this` must point to a live job whose unfinished count has not
    /// reached zero.
    pub(crate) unsafe fn add_child_raw(this: *mut Job) {
        (*this).unfinished.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one unit of a shared job's work (its payload or a child) as
    /// done and returns how many remain.
    ///
    /// # Safety
    ///
    /// `this` must point to a live job.
    pub(crate) unsafe fn complete_one_raw(this: *mut Job) -> i32 {
        (*this).unfinished.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Reads the parent link of a shared job.
    ///
    /// # Safety
    ///
    /// `this` must point to a live job.
    pub(crate) unsafe fn parent_raw(this: *mut Job) -> *mut Job {
        (*this).parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_job_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let mut job = Job::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert_eq!(job.unfinished(), 1);
        job.run();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_job_runs_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        let mut job = Job::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        job.run();
        job.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_job_holds_counter_until_settled() {
        let counter = Counter::new(1);
        let mut job = Job::with_counter(|| {}, counter.clone());

        job.run();
        assert_eq!(counter.get(), 1);

        let taken = unsafe { Job::settle_counter(&mut job) }.unwrap();
        assert!(taken.decrement());
        assert!(unsafe { Job::settle_counter(&mut job) }.is_none());
    }

    #[test]
    fn test_child_accounting() {
        let mut job = Job::new(|| {});
        let raw: *mut Job = &mut job;

        unsafe {
            Job::add_child_raw(raw);
            Job::add_child_raw(raw);
        }
        assert_eq!(job.unfinished(), 3);

        unsafe {
            assert_eq!(Job::complete_one_raw(raw), 2);
            assert_eq!(Job::complete_one_raw(raw), 1);
            assert_eq!(Job::complete_one_raw(raw), 0);
        }
    }

    #[test]
    fn test_panicking_payload_is_contained() {
        let mut job = Job::new(|| panic!("boom"));
        // Must not unwind into the caller.
        job.run();
    }
}
