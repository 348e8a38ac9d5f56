//! Bounded multi-producer, multi-consumer FIFO queue.
//!
//! Each slot carries a sequence number that encodes which operation may
//! touch it next. Producers and consumers claim tickets from two monotone
//! counters; a ticket holder is the only thread that reads or writes the
//! corresponding slot during that lap. The result is a lock-free queue with
//! global FIFO order and no internal waiting: `try_push` and `try_pop`
//! report full/empty to the caller instead of blocking.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One queue element plus its lap ticket.
///
/// The sequence values cycle through `pos` (writable by the producer at
/// ticket `pos`), `pos + 1` (readable by the consumer at ticket `pos`), and
/// `pos + capacity` (writable again, one lap later).
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded lock-free MPMC queue with global FIFO order.
///
/// Capacity is fixed at construction and must be a power of two of at
/// least 2. Both operations are non-blocking: a full queue fails the push
/// and an empty queue fails the pop, and the caller decides whether to
/// retry, yield, or drop the work.
///
/// # Example
///
/// ```
/// use jobforge::MpmcQueue;
///
/// let queue = MpmcQueue::new(16);
/// queue.try_push(7).unwrap();
/// assert_eq!(queue.try_pop(), Some(7));
/// assert_eq!(queue.try_pop(), None);
/// ```
pub struct MpmcQueue<T> {
    buffer: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    /// Producer ticket counter. On its own cache line so producer CAS
    /// traffic does not invalidate consumer reads of `tail`.
    head: CachePadded<AtomicUsize>,
    /// Consumer ticket counter.
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "queue capacity must be at least 2");
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a power of two"
        );

        let buffer: Box<[CachePadded<Slot<T>>]> = (0..capacity)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect();

        MpmcQueue {
            buffer,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Attempts to push a value, returning it back if the queue is full.
    ///
    /// Never waits. Contention with other producers is resolved by
    /// retrying the ticket claim; a genuinely full queue fails immediately.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // Slot expects a producer at exactly this ticket.
                match self
                    .head
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => {
                        // SAFETY: winning the ticket CAS makes this thread
                        // the sole owner of the slot until the sequence
                        // store below publishes it to consumers.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot has not been consumed since last lap: full.
                return Err(value);
            } else {
                // Another producer already claimed this ticket.
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to pop the oldest value, or returns `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                match self
                    .tail
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => {
                        // SAFETY: the ticket CAS grants exclusive access,
                        // and the Acquire sequence load above synchronized
                        // with the producer's Release store, so the value
                        // is fully written.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // Release the slot for the producer one lap ahead.
                        slot.sequence
                            .store(pos + self.buffer.len(), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                // Another consumer already claimed this ticket.
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued elements.
    ///
    /// Computed from two independent atomic loads, so the value is only
    /// eventually consistent; do not expect exact counts while producers
    /// or consumers are active.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    /// Whether the queue looks empty. Approximate, like [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Whether the queue looks full. Approximate, like [`len`](Self::len).
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Fixed capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let queue: MpmcQueue<i32> = MpmcQueue::new(16);
        assert!(queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.capacity(), 16);
    }

    #[test]
    fn test_single_push_pop() {
        let queue = MpmcQueue::new(16);
        assert!(queue.try_push(42).is_ok());
        assert!(!queue.is_empty());

        assert_eq!(queue.try_pop(), Some(42));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_from_empty() {
        let queue: MpmcQueue<i32> = MpmcQueue::new(16);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_to_full_returns_value() {
        let queue = MpmcQueue::new(4);
        for i in 1..=4 {
            assert!(queue.try_push(i).is_ok());
        }
        assert!(queue.is_full());
        assert_eq!(queue.try_push(5), Err(5));
    }

    #[test]
    fn test_fifo_order() {
        let queue = MpmcQueue::new(16);
        for i in 1..=10 {
            assert!(queue.try_push(i).is_ok());
        }
        for i in 1..=10 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_wrap_around() {
        let queue = MpmcQueue::new(4);

        assert!(queue.try_push(1).is_ok());
        assert!(queue.try_push(2).is_ok());
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));

        // Refill past the original capacity boundary.
        for i in 3..=6 {
            assert!(queue.try_push(i).is_ok());
        }
        for i in 3..=6 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_move_semantics() {
        let queue = MpmcQueue::new(8);
        queue.try_push(String::from("hello, world")).unwrap();
        assert_eq!(queue.try_pop().as_deref(), Some("hello, world"));
    }

    #[test]
    fn test_drop_releases_remaining_elements() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue = MpmcQueue::new(8);
            for _ in 0..5 {
                queue.try_push(Tracked(drops.clone())).ok().unwrap();
            }
            let popped = queue.try_pop();
            assert!(popped.is_some());
            drop(popped);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two_capacity() {
        let _ = MpmcQueue::<i32>::new(12);
    }
}
