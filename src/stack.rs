//! Unbounded ABA-safe LIFO stack.
//!
//! A Treiber stack whose head is a packed tagged pointer: 48 address bits
//! plus a 16-bit version tag that increments on every successful CAS (see
//! [`tagged`](crate::tagged)). The tag is what makes the stack ABA-safe:
//! a node that was popped, freed, and re-pushed at the same address carries
//! a different tag, so a stale CAS fails instead of corrupting the list.
//!
//! The tag wraps after 2^16 successful operations; a collision needs a
//! thread suspended across exactly 65 536 CASes that resume at a recycled
//! address. Workloads that cannot tolerate even that residual risk need
//! hazard pointers or epoch reclamation, which this crate does not provide.

use crate::tagged;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

struct Node<T> {
    data: T,
    next: *mut Node<T>,
}

/// A lock-free LIFO stack with tagged-pointer ABA protection.
///
/// `push` always succeeds (nodes are heap-allocated one at a time); `pop`
/// fails only on an empty stack and never blocks.
///
/// # Example
///
/// ```
/// use jobforge::Stack;
///
/// let stack = Stack::new();
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct Stack<T> {
    head: AtomicU64,
    _marker: std::marker::PhantomData<Box<Node<T>>>,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Stack {
            head: AtomicU64::new(tagged::pack(ptr::null_mut::<Node<T>>(), 0)),
            _marker: std::marker::PhantomData,
        }
    }

    /// Pushes a value onto the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            data: value,
            next: ptr::null_mut(),
        }));

        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is owned by this thread until the CAS below
            // publishes it.
            unsafe { (*node).next = tagged::ptr(old) };
            let new = tagged::pack(node, tagged::tag(old).wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => old = current,
            }
        }
    }

    /// Pops the most recently pushed value, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        let mut old = self.head.load(Ordering::Acquire);
        loop {
            let node = tagged::ptr::<Node<T>>(old);
            if node.is_null() {
                return None;
            }

            // SAFETY: `node` was the head when `old` was loaded. A racing
            // pop may free it before this read; the tag in `old` then no
            // longer matches and the CAS below rejects the stale `next`.
            let next = unsafe { ptr::read(ptr::addr_of!((*node).next)) };
            let new = tagged::pack(next, tagged::tag(old).wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(old, new, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => {
                    // SAFETY: the successful CAS unlinked `node`; this
                    // thread is now its sole owner.
                    let boxed = unsafe { Box::from_raw(node) };
                    return Some(boxed.data);
                }
                Err(current) => old = current,
            }
        }
    }

    /// Whether the stack looks empty. The answer can be stale by the time
    /// the caller acts on it.
    pub fn is_empty(&self) -> bool {
        tagged::ptr::<Node<T>>(self.head.load(Ordering::Acquire)).is_null()
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_round_trip() {
        let stack = Stack::new();
        stack.push(42);
        assert_eq!(stack.pop(), Some(42));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_lifo_order() {
        let stack = Stack::new();
        for i in 0..10 {
            stack.push(i);
        }
        for i in (0..10).rev() {
            assert_eq!(stack.pop(), Some(i));
        }
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_pop_empty() {
        let stack: Stack<u64> = Stack::new();
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_owned_values() {
        let stack = Stack::new();
        stack.push(String::from("bottom"));
        stack.push(String::from("top"));
        assert_eq!(stack.pop().as_deref(), Some("top"));
        assert_eq!(stack.pop().as_deref(), Some("bottom"));
    }

    #[test]
    fn test_drop_drains_nodes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let stack = Stack::new();
            for _ in 0..100 {
                stack.push(Tracked(drops.clone()));
            }
            for _ in 0..50 {
                stack.pop();
            }
        }
        assert_eq!(drops.load(Ordering::Relaxed), 100);
    }
}
