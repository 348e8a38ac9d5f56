//! Counter-based synchronization for job completion tracking.
//!
//! A [`Counter`] counts the outstanding jobs of a logical group: scheduling
//! a job against it adds one, the finish protocol subtracts one, and a
//! value of zero means the group is complete. Cloning a counter is cheap:
//! all clones share the same atomic cell, so the scheduler can hold one
//! while the caller waits on another.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// A shared atomic counter tracking outstanding jobs in a group.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    inner: Arc<AtomicI32>,
}

impl Counter {
    /// Creates a counter starting at `initial`.
    pub fn new(initial: i32) -> Self {
        Counter {
            inner: Arc::new(AtomicI32::new(initial)),
        }
    }

    /// Adds one outstanding job.
    pub fn increment(&self) {
        self.inner.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes one outstanding job. Returns true when this decrement
    /// brought the counter to zero.
    pub fn decrement(&self) -> bool {
        self.inner.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Whether every tracked job has completed.
    pub fn is_zero(&self) -> bool {
        self.get() == 0
    }

    /// Current number of outstanding jobs.
    pub fn get(&self) -> i32 {
        self.inner.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new(0);
        assert_eq!(counter.get(), 0);
        assert!(counter.is_zero());

        counter.increment();
        assert_eq!(counter.get(), 1);
        assert!(!counter.is_zero());

        counter.increment();
        assert_eq!(counter.get(), 2);

        assert!(!counter.decrement());
        assert_eq!(counter.get(), 1);

        assert!(counter.decrement());
        assert!(counter.is_zero());
    }

    #[test]
    fn test_counter_initial_value() {
        let counter = Counter::new(10);
        assert_eq!(counter.get(), 10);

        for _ in 0..10 {
            counter.decrement();
        }
        assert!(counter.is_zero());
    }

    #[test]
    fn test_clones_share_state() {
        let counter = Counter::new(0);
        let clone = counter.clone();

        clone.increment();
        assert_eq!(counter.get(), 1);

        counter.decrement();
        assert!(clone.is_zero());
    }

    #[test]
    fn test_concurrent_increment_decrement() {
        use std::thread;

        const OPS_PER_THREAD: usize = 10_000;

        let counter = Counter::new(0);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..OPS_PER_THREAD {
                        counter.increment();
                    }
                    for _ in 0..OPS_PER_THREAD {
                        counter.decrement();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(counter.is_zero());
    }
}
