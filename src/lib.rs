//! # jobforge - Lock-Free Primitives and a Cooperative Job Scheduler
//!
//! A library of non-blocking data structures and a job system composed
//! from them, aimed at latency-sensitive applications (game loops,
//! high-throughput servers, simulation engines) that fan independent work
//! out across many hardware threads without taking kernel mutexes on the
//! fast path.
//!
//! ## Architecture
//!
//! Four components compose bottom-up:
//!
//! - **[`MpmcQueue`]**: bounded FIFO exchange between any number of
//!   producers and consumers, driven by per-slot sequence numbers
//! - **[`Stack`]**: unbounded LIFO made ABA-safe by a version tag packed
//!   into the pointer word
//! - **[`MemoryPool`]**: typed chunk-backed allocator whose free list is
//!   itself a tagged-pointer lock-free stack
//! - **[`JobSystem`]**: worker threads popping jobs from an `MpmcQueue`,
//!   allocating them from a `MemoryPool`, and tracking completion through
//!   [`Counter`]s and parent/child unfinished counts
//!
//! Waiting is cooperative: a thread blocked in
//! [`wait_for_counter`](JobSystem::wait_for_counter) drains the job queue
//! itself rather than sleeping, so waiting inside a job cannot deadlock
//! the system.
//!
//! ## Example
//!
//! ```no_run
//! use jobforge::{Counter, JobSystem};
//!
//! let job_system = JobSystem::new(4); // 4 worker threads
//! let counter = Counter::new(0);
//!
//! for i in 0..100 {
//!     job_system.schedule_with_counter(move || {
//!         let _ = i * i;
//!     }, &counter);
//! }
//!
//! job_system.wait_for_counter(&counter);
//! ```
//!
//! Requires a 64-bit target with lock-free 64-bit compare-and-swap and at
//! most 48 usable virtual address bits (current x86-64 / AArch64 layouts).

pub mod counter;
pub mod job;
pub mod job_system;
pub mod pool;
pub mod queue;
pub mod stack;
pub mod worker;

mod tagged;

#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "trace")]
pub mod trace;

pub use counter::Counter;
pub use job::Job;
pub use job_system::{JobSystem, JobSystemConfig, DEFAULT_POOL_CAPACITY, DEFAULT_QUEUE_CAPACITY};
pub use pool::MemoryPool;
pub use queue::MpmcQueue;
pub use stack::Stack;
pub use worker::PinningStrategy;
