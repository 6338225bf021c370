//! Growth - negotiating storage with the allocator
//!
//! Every operation that needs more room asks for it once, with
//! `ALLOCATE_NEW | EXPAND_FWD | EXPAND_BWD` and the current block as `reuse`
//! (plain `ALLOCATE_NEW` when the allocator cannot grow in place), and then
//! branches on what came back:
//!
//! 1. Forward: same start, larger block. Nothing moves.
//! 2. Backward: earlier start, larger block overlapping the old one. The
//!    live elements are moved down to the new start with an overlap-safe
//!    copy; from there on the vector is an ordinary in-place one.
//! 3. New block: new elements are built there first, then the old elements
//!    are moved over and the old block is released.
//!
//! Moving an element is a bitwise copy and cannot fail, so the only fallible
//! step is producing new elements. Each path keeps that step under a guard
//! which, on error or unwind, drops what was produced and puts the existing
//! elements back in their previous order.

use super::OffsetVec;
use crate::allocator::BlockAllocator;
use crate::error::{Error, Result};
use crate::guard::{BlockGuard, ConstructGuard};
use crate::logging::{log_vector_growth, log_vector_rollback, log_vector_shrink};
use crate::offset_ptr::OffsetPtr;
use crate::segment::AllocationCommand;
use core::ptr;

/// What the allocator granted for a growth request.
enum Grant<T> {
    Forward { cap: usize },
    Backward { start: OffsetPtr<T>, cap: usize },
    NewBlock { start: OffsetPtr<T>, cap: usize },
}

impl<T, A: BlockAllocator<T>> OffsetVec<T, A> {
    /// Capacity to request when `additional` more elements are needed.
    ///
    /// Doubles, or grows by `additional` if that is more, clamped to the
    /// allocator's maximum.
    pub(super) fn next_capacity(&self, additional: usize) -> Result<usize> {
        let max = self.alloc.max_size();
        let required = self
            .len
            .checked_add(additional)
            .filter(|&required| required <= max)
            .ok_or(Error::CapacityOverflow {
                requested: self.len.saturating_add(additional),
                max,
            })?;
        let doubled = self.cap.saturating_add(self.cap.max(additional));
        Ok(doubled.min(max).max(required))
    }

    /// Issue one growth command for at least `limit` elements.
    fn negotiate(&mut self, limit: usize, preferred: usize) -> Result<Grant<T>> {
        let command = if self.start.is_null() || !self.alloc.supports_in_place() {
            AllocationCommand::ALLOCATE_NEW
        } else {
            AllocationCommand::ALLOCATE_NEW
                | AllocationCommand::EXPAND_FWD
                | AllocationCommand::EXPAND_BWD
        };

        let received = self
            .alloc
            .allocation_command(command, limit, preferred, self.start)?;

        let grant = if !received.expanded {
            self.stats.new_allocations += 1;
            log_vector_growth("new_block", self.cap, received.size);
            Grant::NewBlock {
                start: received.block,
                cap: received.size,
            }
        } else if received.is_forward_of(self.start) {
            self.stats.expanded_forward += 1;
            log_vector_growth("expand_forward", self.cap, received.size);
            Grant::Forward { cap: received.size }
        } else {
            self.stats.expanded_backward += 1;
            log_vector_growth("expand_backward", self.cap, received.size);
            Grant::Backward {
                start: received.block,
                cap: received.size,
            }
        };
        Ok(grant)
    }

    /// Move the live elements into the granted storage.
    ///
    /// Only for grants with no new elements to build; cannot fail.
    fn adopt(&mut self, grant: Grant<T>) {
        match grant {
            Grant::Forward { cap } => self.cap = cap,
            Grant::Backward { start, cap } => {
                let dst = self.alloc.resolve(start);
                unsafe { ptr::copy(self.data_ptr(), dst, self.len) };
                self.start = start;
                self.cap = cap;
            }
            Grant::NewBlock { start, cap } => {
                let dst = self.alloc.resolve(start);
                unsafe { ptr::copy_nonoverlapping(self.data_ptr(), dst, self.len) };
                self.release_block();
                self.start = start;
                self.cap = cap;
            }
        }
    }

    pub(super) fn grow_to(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.cap {
            return Ok(());
        }
        let max = self.alloc.max_size();
        if new_capacity > max {
            return Err(Error::CapacityOverflow {
                requested: new_capacity,
                max,
            });
        }
        let grant = self.negotiate(new_capacity, new_capacity)?;
        self.adopt(grant);
        Ok(())
    }

    /// Insert up to `n` produced elements before `index`.
    ///
    /// On failure the vector holds exactly its previous elements.
    pub(super) fn insert_from<I>(&mut self, index: usize, n: usize, source: I) -> Result<()>
    where
        I: Iterator<Item = Result<T>>,
    {
        if index > self.len {
            return Err(Error::OutOfRange {
                index,
                len: self.len,
            });
        }
        if n == 0 {
            return Ok(());
        }
        if self.cap - self.len >= n {
            return self.fill_gap(index, n, source);
        }

        let preferred = self.next_capacity(n)?;
        match self.negotiate(self.len + n, preferred)? {
            Grant::NewBlock { start, cap } => self.insert_into_new_block(index, n, start, cap, source),
            grant => {
                self.adopt(grant);
                self.fill_gap(index, n, source)
            }
        }
    }

    /// Open a gap of `n` at `index` in spare capacity and fill it.
    fn fill_gap<I>(&mut self, index: usize, n: usize, mut source: I) -> Result<()>
    where
        I: Iterator<Item = Result<T>>,
    {
        debug_assert!(self.cap - self.len >= n);
        let base = self.data_ptr();
        let tail = self.len - index;

        let mut gap = unsafe {
            ptr::copy(base.add(index), base.add(index + n), tail);
            GapGuard::open(&mut self.len, base, index, n, tail)
        };

        while gap.filled < n {
            match source.next() {
                Some(Ok(value)) => gap.push(value),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        gap.commit();
        Ok(())
    }

    /// Build the new elements in a fresh block, then move the old ones around them.
    fn insert_into_new_block<I>(
        &mut self,
        index: usize,
        n: usize,
        start: OffsetPtr<T>,
        cap: usize,
        mut source: I,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<T>>,
    {
        let block = BlockGuard::new(&self.alloc, start, cap);
        let dst = block.as_mut_ptr();

        let mut built = unsafe { ConstructGuard::new(dst.add(index)) };
        while built.constructed() < n {
            match source.next() {
                Some(Ok(value)) => built.push(value),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        let filled = built.release();
        let (start, cap) = block.release();

        unsafe {
            let src = self.data_ptr();
            ptr::copy_nonoverlapping(src, dst, index);
            ptr::copy_nonoverlapping(src.add(index), dst.add(index + filled), self.len - index);
        }
        self.release_block();
        self.start = start;
        self.cap = cap;
        self.len += filled;
        Ok(())
    }

    /// Replace every element with `n` produced ones.
    ///
    /// When a new block is needed the old elements survive a failure; when
    /// the current block is reused they are dropped first and a failure
    /// leaves the elements produced so far.
    pub(super) fn assign_from<I>(&mut self, n: usize, mut source: I) -> Result<()>
    where
        I: Iterator<Item = Result<T>>,
    {
        if n > self.cap {
            let max = self.alloc.max_size();
            if n > max {
                return Err(Error::CapacityOverflow { requested: n, max });
            }
            match self.negotiate(n, n)? {
                Grant::NewBlock { start, cap } => {
                    let block = BlockGuard::new(&self.alloc, start, cap);
                    let mut built = unsafe { ConstructGuard::new(block.as_mut_ptr()) };
                    while built.constructed() < n {
                        match source.next() {
                            Some(Ok(value)) => built.push(value),
                            Some(Err(err)) => return Err(err),
                            None => break,
                        }
                    }
                    let filled = built.release();
                    let (start, cap) = block.release();

                    self.clear();
                    self.release_block();
                    self.start = start;
                    self.cap = cap;
                    self.len = filled;
                    return Ok(());
                }
                grant => self.adopt(grant),
            }
        }

        self.clear();
        let base = self.data_ptr();
        while self.len < n {
            match source.next() {
                Some(Ok(value)) => {
                    unsafe { base.add(self.len).write(value) };
                    self.len += 1;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        Ok(())
    }

    /// Give unused capacity back to the allocator.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        if self.cap == self.len {
            return Ok(());
        }
        let old_cap = self.cap;

        if self.len == 0 {
            self.release_block();
            log_vector_shrink(old_cap, 0, false);
            return Ok(());
        }

        if self.alloc.supports_in_place() {
            let received = self.alloc.allocation_command(
                AllocationCommand::SHRINK_IN_PLACE,
                self.cap,
                self.len,
                self.start,
            )?;
            self.cap = received.size.clamp(self.len, old_cap);
            log_vector_shrink(old_cap, self.cap, true);
            return Ok(());
        }

        let block = self.alloc.allocate(self.len)?;
        unsafe {
            ptr::copy_nonoverlapping(self.data_ptr(), self.alloc.resolve(block), self.len);
        }
        self.release_block();
        self.start = block;
        self.cap = self.len;
        log_vector_shrink(old_cap, self.cap, false);
        Ok(())
    }
}

/// Custody of an open gap `[index, index + n)` with `tail` elements parked
/// after it.
///
/// The vector's length is cut to `index` while the gap is open, so a panic
/// anywhere leaves the vector consistent. On drop the guard either closes
/// the gap around the `filled` new elements (commit) or drops them and moves
/// the tail back (rollback).
struct GapGuard<'a, T> {
    len: &'a mut usize,
    base: *mut T,
    index: usize,
    n: usize,
    tail: usize,
    filled: usize,
    committed: bool,
}

impl<'a, T> GapGuard<'a, T> {
    /// # Safety
    /// The tail must already sit at `index + n`.
    unsafe fn open(len: &'a mut usize, base: *mut T, index: usize, n: usize, tail: usize) -> Self {
        *len = index;
        Self {
            len,
            base,
            index,
            n,
            tail,
            filled: 0,
            committed: false,
        }
    }

    #[inline]
    fn push(&mut self, value: T) {
        debug_assert!(self.filled < self.n);
        unsafe { self.base.add(self.index + self.filled).write(value) };
        self.filled += 1;
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<T> Drop for GapGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            let gap = self.base.add(self.index);
            if !self.committed {
                if self.filled > 0 {
                    log_vector_rollback("insert", self.filled);
                }
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(gap, self.filled));
                self.filled = 0;
            }
            if self.filled < self.n {
                ptr::copy(gap.add(self.n), gap.add(self.filled), self.tail);
            }
        }
        *self.len = self.index + self.filled + self.tail;
    }
}
