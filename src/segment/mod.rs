//! Segment manager contract - the allocation-command protocol
//!
//! Design: the region owner is external. Consumers only see the
//! [`SegmentManager`] trait:
//! 1. `allocation_command` (allocate new, expand forward/backward, shrink)
//! 2. block release and size queries
//! 3. a per-segment directory for shared objects such as node pools
//!
//! [`ArenaSegment`] is a self-contained implementation backed by one
//! contiguous heap buffer, used by the tests and benches and usable directly.

mod arena;
mod managed;

#[cfg(test)]
mod tests;

pub use arena::Arena;
pub use managed::{ArenaSegment, ExpansionPolicy, SEGMENT_ALIGNMENT};

use crate::error::Result;
use crate::offset_ptr::OffsetPtr;
use bitflags::bitflags;
use core::ptr::NonNull;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

bitflags! {
    /// What a caller is willing to accept from an allocation command.
    ///
    /// Flags combine: `ALLOCATE_NEW | EXPAND_FWD | EXPAND_BWD` means "grow the
    /// block in place if you can, otherwise give me a fresh one".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocationCommand: u8 {
        /// Produce a fresh block, ignoring `reuse`.
        const ALLOCATE_NEW = 0b0001;
        /// Grow `reuse` past its end, keeping its start.
        const EXPAND_FWD = 0b0010;
        /// Grow `reuse` before its start; the start moves.
        const EXPAND_BWD = 0b0100;
        /// Release trailing capacity of `reuse` without moving data.
        const SHRINK_IN_PLACE = 0b1000;
    }
}

/// One allocation command, sizes counted in objects of `object_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: AllocationCommand,
    /// Minimum acceptable result (for shrink: the largest acceptable result).
    pub limit: usize,
    /// Size the caller would like.
    pub preferred: usize,
    pub object_size: usize,
    /// Block to expand or shrink; null for a pure allocation.
    pub reuse: OffsetPtr<u8>,
}

impl CommandRequest {
    /// Plain allocate-new of `preferred` objects, accepting down to `limit`.
    pub fn allocate(limit: usize, preferred: usize, object_size: usize) -> Self {
        Self {
            command: AllocationCommand::ALLOCATE_NEW,
            limit,
            preferred,
            object_size,
            reuse: OffsetPtr::null(),
        }
    }

    pub fn new(
        command: AllocationCommand,
        limit: usize,
        preferred: usize,
        object_size: usize,
        reuse: OffsetPtr<u8>,
    ) -> Self {
        Self {
            command,
            limit,
            preferred,
            object_size,
            reuse,
        }
    }
}

/// Outcome of an allocation command.
///
/// `expanded == true` with `block == reuse` is pure forward growth;
/// `expanded == true` with a different block is backward (possibly also
/// forward) growth, and the caller must shift its data inside the block;
/// `expanded == false` is a disjoint new block.
#[derive(Debug, PartialEq, Eq)]
pub struct Received<T> {
    pub block: OffsetPtr<T>,
    /// Usable size in objects.
    pub size: usize,
    pub expanded: bool,
}

impl<T> Clone for Received<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Received<T> {}

impl<T> Received<T> {
    pub fn cast<U>(self) -> Received<U> {
        Received {
            block: self.block.cast(),
            size: self.size,
            expanded: self.expanded,
        }
    }

    /// Grew in place without moving the start of `reuse`.
    #[inline]
    pub fn is_forward_of(&self, reuse: OffsetPtr<T>) -> bool {
        self.expanded && self.block == reuse
    }
}

/// Identity of a segment, distinct for every segment created in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SegmentId(u64);

impl SegmentId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SegmentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Directory key of a shared node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub node_size: usize,
    pub nodes_per_chunk: usize,
}

/// Counters a segment keeps about the commands it served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub expanded_forward: usize,
    pub expanded_backward: usize,
    pub shrunk: usize,
    pub failed: usize,
    pub live_blocks: usize,
    pub free_bytes: usize,
}

/// Owner of a contiguous region that serves allocation commands.
///
/// Blocks are identified by their offset from [`base`](Self::base). Methods
/// take `&self`; implementations keep their bookkeeping behind interior
/// mutability but make no promise about concurrent use of the memory itself.
pub trait SegmentManager {
    fn id(&self) -> SegmentId;

    /// Start of the region in the current address space.
    fn base(&self) -> NonNull<u8>;

    /// Total size of the region in bytes.
    fn max_size(&self) -> usize;

    fn free_memory(&self) -> usize;

    /// Alignment every block start honours.
    fn alignment(&self) -> usize;

    /// Execute one allocation command.
    ///
    /// Fails with `OutOfMemory` when no requested strategy can deliver at
    /// least `limit` objects. A declined expansion never modifies `reuse`.
    fn allocation_command(&self, request: &CommandRequest) -> Result<Received<u8>>;

    /// Allocate a fresh block of exactly `bytes` (rounded up to the alignment).
    fn allocate(&self, bytes: usize) -> Result<OffsetPtr<u8>> {
        self.allocation_command(&CommandRequest::allocate(bytes, bytes, 1))
            .map(|received| received.block)
    }

    /// Return a block to the region.
    ///
    /// # Safety
    /// `block` must have been produced by this segment and not released yet.
    unsafe fn deallocate(&self, block: OffsetPtr<u8>);

    /// Size in bytes of a live block.
    fn block_size(&self, block: OffsetPtr<u8>) -> Option<usize>;

    fn find_shared(&self, key: &PoolKey) -> Option<OffsetPtr<u8>>;

    /// Publish a shared object; returns false if the key is already taken.
    fn register_shared(&self, key: PoolKey, at: OffsetPtr<u8>) -> bool;

    fn unregister_shared(&self, key: &PoolKey) -> Option<OffsetPtr<u8>>;
}
