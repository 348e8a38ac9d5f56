//! Chunk-backed typed memory pool with a lock-free intrusive free list.
//!
//! Storage is carved into fixed-size blocks. An unallocated block is
//! reinterpreted as a [`FreeNode`] holding the next link, so the free list
//! costs zero bytes per block. The free-list head is a packed tagged
//! pointer (see [`tagged`](crate::tagged)) popped and pushed with the same
//! CAS discipline as [`Stack`](crate::Stack); unlike the stack, blocks live
//! inside chunks that are never released until the pool drops, so the
//! speculative `next` read on the pop path always lands in valid storage.
//!
//! Chunk growth is rare and large, so the append-only chunk vector sits
//! behind a spin flag rather than a lock-free scheme; the allocate and
//! deallocate fast paths never touch it.

use crate::tagged;
use crossbeam::utils::Backoff;
use std::alloc::{alloc, dealloc, Layout};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Free-list link embedded in unallocated block storage.
struct FreeNode {
    next: *mut FreeNode,
}

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A contiguous run of blocks. Chunks are added over the pool's lifetime
/// and never removed or moved, so block addresses stay stable.
struct Chunk {
    memory: NonNull<u8>,
    layout: Layout,
    block_count: usize,
}

unsafe impl Send for Chunk {}

impl Chunk {
    fn new(block_count: usize, block_size: usize, block_align: usize) -> Option<Chunk> {
        let layout = Layout::from_size_align(block_count * block_size, block_align).ok()?;
        // SAFETY: layout has non-zero size (block counts are validated by
        // the pool constructor and grow path).
        let raw = unsafe { alloc(layout) };
        NonNull::new(raw).map(|memory| Chunk {
            memory,
            layout,
            block_count,
        })
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: allocated in `Chunk::new` with this exact layout.
        unsafe { dealloc(self.memory.as_ptr(), self.layout) };
    }
}

/// A lock-free typed memory pool.
///
/// `allocate`/`deallocate` hand out raw blocks; `construct`/`destroy` are
/// the value-aware pair that also runs the constructor and destructor.
/// Every block is either on the free list or in exactly one caller's
/// hands, never both.
///
/// On drop the pool debug-asserts that every block came back; a failed
/// assertion means a leak in the caller.
///
/// # Example
///
/// ```
/// use jobforge::MemoryPool;
///
/// let pool: MemoryPool<u64> = MemoryPool::new(64);
/// let p = pool.construct(99).unwrap();
/// assert_eq!(unsafe { *p.as_ref() }, 99);
/// unsafe { pool.destroy(p) };
/// assert_eq!(pool.allocated_count(), 0);
/// ```
pub struct MemoryPool<T> {
    /// Tagged-pointer head of the intrusive free list.
    free_list: AtomicU64,
    /// Append-only chunk vector, guarded by `chunks_flag`.
    chunks: UnsafeCell<Vec<Chunk>>,
    chunks_flag: AtomicBool,
    total_blocks: AtomicUsize,
    allocated: AtomicUsize,
    chunk_size: usize,
    growable: bool,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for MemoryPool<T> {}
unsafe impl<T: Send> Sync for MemoryPool<T> {}

impl<T> MemoryPool<T> {
    /// Alignment of every block: whichever of `T` and the free-list link
    /// is stricter.
    const BLOCK_ALIGN: usize = max_usize(std::mem::align_of::<T>(), std::mem::align_of::<FreeNode>());

    /// Size of every block: large enough for `T` or a free-list link,
    /// rounded up so consecutive blocks all stay aligned.
    const BLOCK_SIZE: usize = align_up(
        max_usize(std::mem::size_of::<T>(), std::mem::size_of::<FreeNode>()),
        Self::BLOCK_ALIGN,
    );

    /// Creates a growable pool whose chunks each hold `initial_capacity`
    /// blocks.
    ///
    /// # Panics
    ///
    /// Panics if `initial_capacity` is zero.
    pub fn new(initial_capacity: usize) -> Self {
        Self::with_options(initial_capacity, true, 0)
    }

    /// Creates a fixed-capacity pool: once the free list is empty,
    /// `allocate` returns `None`.
    pub fn fixed(capacity: usize) -> Self {
        Self::with_options(capacity, false, 0)
    }

    /// Creates a pool with explicit growth behavior. A `chunk_size` of
    /// zero means subsequent chunks match `initial_capacity`.
    pub fn with_options(initial_capacity: usize, growable: bool, chunk_size: usize) -> Self {
        assert!(initial_capacity > 0, "pool capacity must be non-zero");

        let pool = MemoryPool {
            free_list: AtomicU64::new(tagged::pack(ptr::null_mut::<FreeNode>(), 0)),
            chunks: UnsafeCell::new(Vec::new()),
            chunks_flag: AtomicBool::new(false),
            total_blocks: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            chunk_size: if chunk_size > 0 {
                chunk_size
            } else {
                initial_capacity
            },
            growable,
            _marker: PhantomData,
        };
        pool.add_chunk(initial_capacity);
        pool
    }

    /// Takes one block off the free list, growing the pool by a chunk if
    /// permitted and the list is empty.
    ///
    /// The returned block is uninitialized storage for one `T`. Returns
    /// `None` when the pool is exhausted and not growable, or when the
    /// heap refuses a new chunk.
    pub fn allocate(&self) -> Option<NonNull<T>> {
        let mut node = self.pop_free();
        if node.is_null() && self.growable {
            self.add_chunk(self.chunk_size);
            node = self.pop_free();
        }

        let block = NonNull::new(node as *mut T)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(block)
    }

    /// Returns a block to the free list without touching its contents.
    ///
    /// # Safety
    ///
    /// `block` must have come from this pool's [`allocate`](Self::allocate)
    /// and must not be used again. Any `T` in the block must already have
    /// been dropped (or never constructed); pair with
    /// [`destroy`](Self::destroy) for initialized values.
    pub unsafe fn deallocate(&self, block: NonNull<T>) {
        self.push_free(block.as_ptr() as *mut FreeNode);
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    /// Allocates a block and moves `value` into it.
    pub fn construct(&self, value: T) -> Option<NonNull<T>> {
        let block = self.allocate()?;
        // SAFETY: `block` is a fresh, exclusively owned, uninitialized
        // slot sized and aligned for `T`.
        unsafe { block.as_ptr().write(value) };
        Some(block)
    }

    /// Drops the value in `block` and returns the storage to the pool.
    ///
    /// # Safety
    ///
    /// `block` must have come from this pool's
    /// [`construct`](Self::construct) (or `allocate` followed by a write)
    /// and must hold an initialized `T` that no one else references.
    pub unsafe fn destroy(&self, block: NonNull<T>) {
        ptr::drop_in_place(block.as_ptr());
        self.deallocate(block);
    }

    /// Total number of blocks across all chunks.
    pub fn capacity(&self) -> usize {
        self.total_blocks.load(Ordering::Relaxed)
    }

    /// Number of blocks currently in callers' hands. Approximate while
    /// other threads allocate or deallocate.
    pub fn allocated_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of blocks currently free. Approximate, like
    /// [`allocated_count`](Self::allocated_count).
    pub fn available_count(&self) -> usize {
        self.capacity().saturating_sub(self.allocated_count())
    }

    /// Number of chunks backing the pool.
    pub fn chunk_count(&self) -> usize {
        self.lock_chunks();
        // SAFETY: the spin flag is held.
        let count = unsafe { (*self.chunks.get()).len() };
        self.unlock_chunks();
        count
    }

    /// Whether `allocate` may add chunks when the free list runs dry.
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    /// Byte size of one block.
    pub const fn block_size() -> usize {
        Self::BLOCK_SIZE
    }

    fn lock_chunks(&self) {
        let backoff = Backoff::new();
        while self.chunks_flag.swap(true, Ordering::Acquire) {
            backoff.snooze();
        }
    }

    fn unlock_chunks(&self) {
        self.chunks_flag.store(false, Ordering::Release);
    }

    /// Allocates a chunk, publishes it, and feeds its blocks to the free
    /// list. Returns false if the heap allocation failed.
    fn add_chunk(&self, block_count: usize) -> bool {
        let chunk = match Chunk::new(block_count, Self::BLOCK_SIZE, Self::BLOCK_ALIGN) {
            Some(chunk) => chunk,
            None => return false,
        };
        let base = chunk.memory.as_ptr();

        self.lock_chunks();
        // SAFETY: the spin flag is held; the chunk's heap buffer does not
        // move when the vector reallocates.
        unsafe { (*self.chunks.get()).push(chunk) };
        self.unlock_chunks();

        for i in 0..block_count {
            // SAFETY: in-bounds block of the chunk published above.
            let block = unsafe { base.add(i * Self::BLOCK_SIZE) } as *mut FreeNode;
            self.push_free(block);
        }
        self.total_blocks.fetch_add(block_count, Ordering::Relaxed);
        true
    }

    fn pop_free(&self) -> *mut FreeNode {
        let mut old = self.free_list.load(Ordering::Acquire);
        loop {
            let node = tagged::ptr::<FreeNode>(old);
            if node.is_null() {
                return ptr::null_mut();
            }

            // SAFETY: `node` points into chunk storage, which stays
            // allocated for the pool's lifetime. If the block was grabbed
            // by another thread since `old` was loaded the value read here
            // is garbage, and the tag mismatch makes the CAS discard it.
            let next = unsafe { ptr::read(ptr::addr_of!((*node).next)) };
            let new = tagged::pack(next, tagged::tag(old).wrapping_add(1));
            match self.free_list.compare_exchange_weak(
                old,
                new,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return node,
                Err(current) => old = current,
            }
        }
    }

    fn push_free(&self, node: *mut FreeNode) {
        let mut old = self.free_list.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is exclusively owned until the CAS publishes
            // it back onto the list.
            unsafe { (*node).next = tagged::ptr(old) };
            let new = tagged::pack(node, tagged::tag(old).wrapping_add(1));
            match self.free_list.compare_exchange_weak(
                old,
                new,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => old = current,
            }
        }
    }
}

impl<T> Drop for MemoryPool<T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.allocated.load(Ordering::Relaxed),
            0,
            "memory pool dropped with live allocations"
        );
    }
}
