//! Fixed-capacity buffer pool with an intrusive free list
//!
//! All write buffers come from one contiguous, block-aligned allocation that
//! is sliced into `capacity` equal slots at startup and never reallocated.
//! Free slots are threaded into a singly-linked list through index-based
//! `next` fields, so recycling a buffer is two array writes and allocation is
//! one read - no heap traffic in the hot path.
//!
//! A slot is always in exactly one of two states: *free* (linked into the
//! free list) or *in-flight* (owned by one outstanding write). The sentinel
//! value [`SLOT_TAIL`] terminates the free list and doubles as the in-flight
//! marker: `acquire()` stamps it into the slot it hands out, and `release()`
//! refuses any slot not carrying it, which catches duplicate or stale
//! completions before they can corrupt the list.

use std::alloc::{alloc, dealloc, Layout};

use thiserror::Error;

/// Sentinel for "no next slot": terminates the free list and marks a slot
/// that is currently in-flight.
pub const SLOT_TAIL: u32 = u32::MAX;

/// Buffer pool errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The free list is empty; every slot is in-flight.
    ///
    /// This is expected backpressure, not a fault: the caller should stop
    /// preparing and drain completions.
    #[error("buffer pool exhausted (all {0} slots in flight)")]
    Exhausted(u32),

    /// A slot index outside `[0, capacity)` reached the pool. Indicates a
    /// prior logic fault or a corrupted completion tag.
    #[error("slot index {index} out of range (capacity {capacity})")]
    OutOfRange { index: u32, capacity: u32 },

    /// The slot is already on the free list. Releasing it again would create
    /// a cycle and hand the same buffer to two writes.
    #[error("double release of slot {0}")]
    DoubleRelease(u32),
}

/// Pool of equally sized, block-aligned buffer slots.
///
/// Backed by a single allocation of `capacity * block_size` bytes aligned to
/// `block_size`, so every slot individually satisfies O_DIRECT-style
/// alignment requirements.
pub struct SlotPool {
    base: *mut u8,
    layout: Layout,
    block_size: usize,
    capacity: u32,

    /// Head of the free list, or `SLOT_TAIL` when empty.
    next_free: u32,
    /// Intrusive free-list links, one per slot.
    next: Vec<u32>,
    /// Length of the free list, tracked for invariant checks and reporting.
    free_len: u32,
}

impl SlotPool {
    /// Allocate the pool and build the initial free list covering all slots
    /// in index order.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, `block_size` is not a power of two, or
    /// the allocation fails. These are startup-only conditions; the pool is
    /// never grown or shrunk afterwards.
    pub fn new(capacity: u32, block_size: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be greater than 0");
        assert!(capacity < SLOT_TAIL, "pool capacity collides with sentinel");
        assert!(
            block_size.is_power_of_two(),
            "block size must be a power of 2"
        );

        let total = (capacity as usize)
            .checked_mul(block_size)
            .expect("pool size overflow");
        let layout = Layout::from_size_align(total, block_size).expect("invalid pool layout");

        let base = unsafe { alloc(layout) };
        if base.is_null() {
            panic!("failed to allocate {} byte buffer pool", total);
        }

        // Slot i points at i+1; the last slot terminates the list.
        let mut next: Vec<u32> = (1..=capacity).collect();
        next[capacity as usize - 1] = SLOT_TAIL;

        SlotPool {
            base,
            layout,
            block_size,
            capacity,
            next_free: 0,
            next,
            free_len: capacity,
        }
    }

    /// Pop the head of the free list and mark it in-flight.
    pub fn acquire(&mut self) -> Result<u32, PoolError> {
        let index = self.next_free;
        if index == SLOT_TAIL {
            return Err(PoolError::Exhausted(self.capacity));
        }
        debug_assert!(index < self.capacity);

        self.next_free = self.next[index as usize];
        // In-flight marker; release() checks for it.
        self.next[index as usize] = SLOT_TAIL;
        self.free_len -= 1;
        Ok(index)
    }

    /// Return an in-flight slot to the free list.
    ///
    /// Rejects indices outside the pool and slots that are not marked
    /// in-flight; both indicate the ring's completion stream has
    /// desynchronized from the pool and must be treated as fatal by the
    /// caller.
    pub fn release(&mut self, index: u32) -> Result<(), PoolError> {
        if index >= self.capacity {
            return Err(PoolError::OutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        if self.next[index as usize] != SLOT_TAIL {
            return Err(PoolError::DoubleRelease(index));
        }

        self.next[index as usize] = self.next_free;
        self.next_free = index;
        self.free_len += 1;
        Ok(())
    }

    /// Raw pointer to a slot's memory block.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[inline(always)]
    pub fn slot_ptr(&self, index: u32) -> *mut u8 {
        assert!(index < self.capacity, "invalid slot index");
        unsafe { self.base.add(index as usize * self.block_size) }
    }

    /// Fill every slot with random bytes once at startup, so writes carry
    /// non-trivial data without regenerating it per operation.
    pub fn prefill_random(&mut self) {
        use rand::RngCore;
        let mut rng = rand::thread_rng();

        for i in 0..self.capacity {
            let slice = unsafe {
                std::slice::from_raw_parts_mut(self.slot_ptr(i), self.block_size)
            };
            rng.fill_bytes(slice);
        }
    }

    /// Size of each slot in bytes
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of slots
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently on the free list
    #[inline]
    pub fn free_len(&self) -> u32 {
        self.free_len
    }

    /// Number of slots currently in-flight
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.capacity - self.free_len
    }

    /// Whether every slot is in-flight (the steady-state condition right
    /// after a full submission pass)
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.next_free == SLOT_TAIL
    }

    /// Walk the free list and count its links. Test/diagnostic helper for
    /// the conservation invariant `free list length + in_flight == capacity`.
    pub fn walk_free_list(&self) -> u32 {
        let mut count = 0;
        let mut cursor = self.next_free;
        while cursor != SLOT_TAIL {
            count += 1;
            assert!(
                count <= self.capacity,
                "free list cycle detected at slot {}",
                cursor
            );
            cursor = self.next[cursor as usize];
        }
        count
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base, self.layout);
        }
    }
}

// SlotPool owns its allocation; the raw base pointer is never shared.
unsafe impl Send for SlotPool {}
