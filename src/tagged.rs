//! Packed tagged-pointer encoding shared by the stack and the pool free list.
//!
//! A single 64-bit word carries both a pointer and a version tag:
//!
//! ```text
//! [63          48][47                                  0]
//! [  tag: u16    ][            address: 48 bits         ]
//! ```
//!
//! Current x86-64 and AArch64 user-space layouts use 48-bit virtual
//! addresses, leaving the top 16 bits free for a version counter. The tag
//! is bumped on every successful CAS, so a pointer that was freed and
//! reinstated at the same address no longer compares equal, which is the classic
//! ABA defense that still fits in a hardware 64-bit CAS. Platforms with
//! 5-level paging (57-bit addresses) need a narrower tag and are not
//! supported by this encoding.

const PTR_BITS: u32 = 48;
const PTR_MASK: u64 = (1 << PTR_BITS) - 1;

// The encoding only works when a pointer fits in the low 48 bits of u64.
const _: () = assert!(std::mem::size_of::<usize>() == 8, "requires a 64-bit target");

/// Packs a pointer and a version tag into one word.
#[inline]
pub(crate) fn pack<T>(ptr: *mut T, tag: u16) -> u64 {
    (ptr as u64 & PTR_MASK) | ((tag as u64) << PTR_BITS)
}

/// Extracts the pointer half of a packed word.
#[inline]
pub(crate) fn ptr<T>(word: u64) -> *mut T {
    (word & PTR_MASK) as *mut T
}

/// Extracts the version tag of a packed word.
#[inline]
pub(crate) fn tag(word: u64) -> u16 {
    (word >> PTR_BITS) as u16
}
