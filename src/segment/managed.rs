//! ArenaSegment - a region manager over one contiguous arena
//!
//! Design: first-fit free ranges kept in an ordered map, coalesced on every
//! release. Block starts are always `SEGMENT_ALIGNMENT`-aligned and sizes are
//! multiples of it. Bookkeeping lives outside the region; only the blocks
//! themselves are in it.

use super::arena::Arena;
use super::{
    AllocationCommand, CommandRequest, PoolKey, Received, SegmentId, SegmentManager, SegmentStats,
};
use crate::config::SegmentConfig;
use crate::error::{Error, Result};
use crate::logging::{
    log_segment_command, log_segment_exhausted, log_segment_release, log_segment_remap,
};
use crate::offset_ptr::OffsetPtr;
use core::ptr::NonNull;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Alignment of every block handed out by an `ArenaSegment`.
pub const SEGMENT_ALIGNMENT: usize = 16;

/// Which in-place strategies the segment is willing to attempt.
///
/// Switching a direction off makes the segment decline it, which lets callers
/// force a particular negotiation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionPolicy {
    pub forward: bool,
    pub backward: bool,
}

impl Default for ExpansionPolicy {
    fn default() -> Self {
        Self {
            forward: true,
            backward: true,
        }
    }
}

impl ExpansionPolicy {
    /// Never grow in place; every growth is a new block.
    pub const NEW_BLOCK_ONLY: Self = Self {
        forward: false,
        backward: false,
    };
    pub const FORWARD_ONLY: Self = Self {
        forward: true,
        backward: false,
    };
    pub const BACKWARD_ONLY: Self = Self {
        forward: false,
        backward: true,
    };
}

/// In-process region manager over a heap arena.
///
/// Pool headers and vector triples inside the region are updated without
/// synchronization, so a segment can move to another thread but never be
/// shared between threads:
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<relocmem::ArenaSegment>();
/// ```
pub struct ArenaSegment {
    id: SegmentId,
    arena: Arena,
    policy: ExpansionPolicy,
    book: Mutex<Bookkeeping>,
    directory: DashMap<PoolKey, usize>,
}

// Safety: the segment owns its arena outright, and every handle into it
// borrows the segment, so none can be left behind on the old thread.
unsafe impl Send for ArenaSegment {}

impl ArenaSegment {
    /// Create a segment of `size` bytes that allows every expansion.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_policy(size, ExpansionPolicy::default())
    }

    pub fn with_policy(size: usize, policy: ExpansionPolicy) -> Result<Self> {
        let size = round_down(size, SEGMENT_ALIGNMENT);
        let arena = Arena::new(size, SEGMENT_ALIGNMENT).ok_or(Error::OutOfMemory {
            requested: size,
            available: 0,
        })?;

        Ok(Self {
            id: SegmentId::next(),
            arena,
            policy,
            book: Mutex::new(Bookkeeping::new(size)),
            directory: DashMap::new(),
        })
    }

    pub fn from_config(config: &SegmentConfig) -> Result<Self> {
        Self::with_policy(config.size, config.policy())
    }

    pub fn policy(&self) -> ExpansionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ExpansionPolicy) {
        self.policy = policy;
    }

    pub fn stats(&self) -> SegmentStats {
        let book = self.book.lock();
        SegmentStats {
            live_blocks: book.used.len(),
            free_bytes: book.free_bytes,
            ..book.stats
        }
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.book.lock().used.len()
    }

    /// Move the whole region to a new base address, contents intact.
    ///
    /// Requires exclusive access: nothing may hold a resolved address into
    /// the segment across this call. Offsets stay valid.
    pub fn remap(&mut self) -> Result<()> {
        let size = self.arena.size();
        let old = self.arena.relocate().ok_or(Error::OutOfMemory {
            requested: size,
            available: 0,
        })?;
        log_segment_remap(old.as_ptr(), self.arena.base().as_ptr(), size);
        Ok(())
    }

    fn byte_size(objects: usize, object_size: usize) -> Option<usize> {
        let bytes = objects.checked_mul(object_size)?;
        let bytes = bytes.max(1).checked_add(SEGMENT_ALIGNMENT - 1)?;
        Some(round_down(bytes, SEGMENT_ALIGNMENT))
    }

    fn exhausted(&self, book: &mut Bookkeeping, requested: usize) -> Error {
        book.stats.failed += 1;
        log_segment_exhausted(requested, book.free_bytes);
        Error::OutOfMemory {
            requested,
            available: book.free_bytes,
        }
    }

    fn shrink(&self, book: &mut Bookkeeping, request: &CommandRequest) -> Result<Received<u8>> {
        let offset = request
            .reuse
            .offset()
            .ok_or_else(|| Error::InvalidRequest("shrink without a block".into()))?;
        if request.preferred == 0 {
            return Err(Error::InvalidRequest("shrink to zero objects".into()));
        }
        let current = *book.used.get(&offset).ok_or(Error::InvalidBlock { offset })?;
        let target = Self::byte_size(request.preferred, request.object_size)
            .ok_or_else(|| Error::InvalidRequest("shrink size overflows".into()))?;

        if target < current {
            book.used.insert(offset, target);
            book.release_range(offset + target, current - target);
            book.stats.shrunk += 1;
            log_segment_command("shrink_in_place", offset, target);
        }

        Ok(Received {
            block: request.reuse,
            size: target.min(current) / request.object_size,
            expanded: true,
        })
    }
}

impl SegmentManager for ArenaSegment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn base(&self) -> NonNull<u8> {
        self.arena.base()
    }

    fn max_size(&self) -> usize {
        self.arena.size()
    }

    fn free_memory(&self) -> usize {
        self.book.lock().free_bytes
    }

    fn alignment(&self) -> usize {
        SEGMENT_ALIGNMENT
    }

    fn allocation_command(&self, request: &CommandRequest) -> Result<Received<u8>> {
        if request.object_size == 0 {
            return Err(Error::InvalidRequest("zero object size".into()));
        }

        let mut book = self.book.lock();
        if request.command.contains(AllocationCommand::SHRINK_IN_PLACE) {
            return self.shrink(&mut book, request);
        }

        let object_size = request.object_size;
        let preferred = request.preferred.max(request.limit);
        let (Some(limit_bytes), Some(preferred_bytes)) = (
            Self::byte_size(request.limit, object_size),
            Self::byte_size(preferred, object_size),
        ) else {
            return Err(self.exhausted(&mut book, usize::MAX));
        };

        let expand_fwd =
            request.command.contains(AllocationCommand::EXPAND_FWD) && self.policy.forward;
        let expand_bwd =
            request.command.contains(AllocationCommand::EXPAND_BWD) && self.policy.backward;

        if let Some(offset) = request.reuse.offset() {
            if expand_fwd || expand_bwd {
                let current = *book.used.get(&offset).ok_or(Error::InvalidBlock { offset })?;

                if expand_fwd {
                    if let Some(size) =
                        book.expand_forward(offset, current, limit_bytes, preferred_bytes)
                    {
                        if size > current {
                            book.stats.expanded_forward += 1;
                            log_segment_command("expand_forward", offset, size);
                        }
                        return Ok(Received {
                            block: request.reuse,
                            size: size / object_size,
                            expanded: true,
                        });
                    }
                }

                if expand_bwd {
                    let unit = lcm(object_size, SEGMENT_ALIGNMENT);
                    if let Some((start, size)) = book.expand_backward(
                        offset,
                        current,
                        limit_bytes,
                        preferred_bytes,
                        unit,
                        expand_fwd,
                    ) {
                        book.stats.expanded_backward += 1;
                        log_segment_command("expand_backward", start, size);
                        return Ok(Received {
                            block: OffsetPtr::from_offset(start),
                            size: size / object_size,
                            expanded: true,
                        });
                    }
                }
            }
        }

        if request.command.contains(AllocationCommand::ALLOCATE_NEW) {
            if let Some((offset, size)) = book.allocate_new(limit_bytes, preferred_bytes) {
                book.stats.allocations += 1;
                log_segment_command("allocate_new", offset, size);
                return Ok(Received {
                    block: OffsetPtr::from_offset(offset),
                    size: size / object_size,
                    expanded: false,
                });
            }
        }

        Err(self.exhausted(&mut book, limit_bytes))
    }

    unsafe fn deallocate(&self, block: OffsetPtr<u8>) {
        let Some(offset) = block.offset() else {
            return;
        };
        let mut book = self.book.lock();
        match book.used.remove(&offset) {
            Some(size) => {
                book.release_range(offset, size);
                book.stats.deallocations += 1;
                log_segment_release(offset, size);
            }
            None => debug_assert!(false, "release of unknown block at offset {offset}"),
        }
    }

    fn block_size(&self, block: OffsetPtr<u8>) -> Option<usize> {
        let offset = block.offset()?;
        self.book.lock().used.get(&offset).copied()
    }

    fn find_shared(&self, key: &PoolKey) -> Option<OffsetPtr<u8>> {
        self.directory
            .get(key)
            .map(|entry| OffsetPtr::from_offset(*entry.value()))
    }

    fn register_shared(&self, key: PoolKey, at: OffsetPtr<u8>) -> bool {
        let Some(offset) = at.offset() else {
            return false;
        };
        match self.directory.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(offset);
                true
            }
        }
    }

    fn unregister_shared(&self, key: &PoolKey) -> Option<OffsetPtr<u8>> {
        self.directory
            .remove(key)
            .map(|(_, offset)| OffsetPtr::from_offset(offset))
    }
}

/// Free and used ranges of the region, keyed by offset.
struct Bookkeeping {
    free: BTreeMap<usize, usize>,
    used: BTreeMap<usize, usize>,
    free_bytes: usize,
    stats: SegmentStats,
}

impl Bookkeeping {
    fn new(size: usize) -> Self {
        let mut free = BTreeMap::new();
        if size > 0 {
            free.insert(0, size);
        }
        Self {
            free,
            used: BTreeMap::new(),
            free_bytes: size,
            stats: SegmentStats::default(),
        }
    }

    /// First fit for `preferred`, else the largest range of at least `limit`.
    fn allocate_new(&mut self, limit: usize, preferred: usize) -> Option<(usize, usize)> {
        let (offset, available) = match self.free.iter().find(|(_, len)| **len >= preferred) {
            Some((&off, &len)) => (off, len),
            None => {
                let (&off, &len) = self.free.iter().max_by_key(|(_, len)| **len)?;
                if len < limit {
                    return None;
                }
                (off, len)
            }
        };

        let take = available.min(preferred);
        self.take_front(offset, available, take);
        self.used.insert(offset, take);
        Some((offset, take))
    }

    fn expand_forward(
        &mut self,
        offset: usize,
        current: usize,
        limit: usize,
        preferred: usize,
    ) -> Option<usize> {
        if current >= limit.max(preferred) {
            return Some(current);
        }
        let end = offset + current;
        let available = self.free.get(&end).copied().unwrap_or(0);
        if current + available < limit {
            return None;
        }

        let take = available.min(preferred - current);
        self.take_front(end, available, take);
        self.used.insert(offset, current + take);
        Some(current + take)
    }

    /// Grow towards lower addresses, optionally combined with forward growth.
    ///
    /// The start only ever moves by a multiple of `unit`, keeping both the
    /// segment alignment and the caller's element grid.
    fn expand_backward(
        &mut self,
        offset: usize,
        current: usize,
        limit: usize,
        preferred: usize,
        unit: usize,
        with_forward: bool,
    ) -> Option<(usize, usize)> {
        let (&prev_offset, &prev_len) = self.free.range(..offset).next_back()?;
        if prev_offset + prev_len != offset {
            return None;
        }

        let end = offset + current;
        let fwd_available = if with_forward {
            self.free.get(&end).copied().unwrap_or(0)
        } else {
            0
        };
        let target = limit.max(preferred);
        let fwd_take = fwd_available.min(target.saturating_sub(current));

        let grown = current + fwd_take;
        let back_min = round_up(limit.saturating_sub(grown), unit).max(unit);
        let back_want = round_up(target.saturating_sub(grown), unit).max(back_min);
        let back_max = round_down(prev_len, unit);
        if back_max < back_min {
            return None;
        }
        let back = back_want.min(back_max);

        self.free.remove(&prev_offset);
        if prev_len > back {
            self.free.insert(prev_offset, prev_len - back);
        }
        self.free_bytes -= back;
        if fwd_take > 0 {
            self.take_front(end, fwd_available, fwd_take);
        }

        let start = offset - back;
        self.used.remove(&offset);
        self.used.insert(start, back + grown);
        Some((start, back + grown))
    }

    /// Consume `take` bytes from the front of the free range at `offset`.
    fn take_front(&mut self, offset: usize, available: usize, take: usize) {
        self.free.remove(&offset);
        if available > take {
            self.free.insert(offset + take, available - take);
        }
        self.free_bytes -= take;
    }

    /// Return a range to the free map, merging with its neighbours.
    fn release_range(&mut self, mut offset: usize, mut len: usize) {
        self.free_bytes += len;

        if let Some((&prev_offset, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_len == offset {
                self.free.remove(&prev_offset);
                offset = prev_offset;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(offset + len)) {
            len += next_len;
        }
        self.free.insert(offset, len);
    }
}

#[inline]
const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[inline]
const fn round_down(value: usize, align: usize) -> usize {
    value / align * align
}

const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

const fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(4, 16), 16);
        assert_eq!(lcm(12, 16), 48);
        assert_eq!(lcm(24, 16), 48);
        assert_eq!(lcm(32, 16), 32);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_down(47, 16), 32);
    }

    #[test]
    fn release_coalesces_neighbours() {
        let mut book = Bookkeeping::new(256);
        let a = book.allocate_new(64, 64).unwrap();
        let b = book.allocate_new(64, 64).unwrap();
        let c = book.allocate_new(64, 64).unwrap();
        assert_eq!((a.0, b.0, c.0), (0, 64, 128));

        book.used.remove(&a.0);
        book.release_range(a.0, a.1);
        book.used.remove(&c.0);
        book.release_range(c.0, c.1);
        book.used.remove(&b.0);
        book.release_range(b.0, b.1);

        assert_eq!(book.free.len(), 1);
        assert_eq!(book.free.get(&0), Some(&256));
        assert_eq!(book.free_bytes, 256);
    }
}
