//! Scoped rollback guards for multi-step mutations
//!
//! Each guard records how far an operation got. Dropping an armed guard runs
//! its single rollback routine, on both the error-return path and during
//! unwinding from a panicking element constructor. Disarming it commits.

use crate::allocator::BlockAllocator;
use crate::offset_ptr::OffsetPtr;
use core::ptr;

/// Returns a freshly obtained block to its allocator unless released.
pub struct BlockGuard<'a, T, A: BlockAllocator<T>> {
    alloc: &'a A,
    block: OffsetPtr<T>,
    capacity: usize,
    armed: bool,
}

impl<'a, T, A: BlockAllocator<T>> BlockGuard<'a, T, A> {
    pub fn new(alloc: &'a A, block: OffsetPtr<T>, capacity: usize) -> Self {
        Self {
            alloc,
            block,
            capacity,
            armed: true,
        }
    }

    #[inline]
    pub fn block(&self) -> OffsetPtr<T> {
        self.block
    }

    /// Local address of the guarded block.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut T {
        self.alloc.resolve(self.block)
    }

    /// Keep the block; the caller now owns it.
    pub fn release(mut self) -> (OffsetPtr<T>, usize) {
        self.armed = false;
        (self.block, self.capacity)
    }
}

impl<T, A: BlockAllocator<T>> Drop for BlockGuard<'_, T, A> {
    fn drop(&mut self) {
        if self.armed {
            unsafe { self.alloc.deallocate(self.block, self.capacity) };
        }
    }
}

/// Tracks elements written into raw storage; destroys exactly those on rollback.
pub struct ConstructGuard<T> {
    start: *mut T,
    constructed: usize,
}

impl<T> ConstructGuard<T> {
    /// # Safety
    /// `start` must point to uninitialized storage large enough for every
    /// element that will be pushed, and stay valid while the guard lives.
    pub unsafe fn new(start: *mut T) -> Self {
        Self {
            start,
            constructed: 0,
        }
    }

    /// Write the next element. Caller guarantees the slot is in bounds.
    #[inline]
    pub fn push(&mut self, value: T) {
        unsafe { self.start.add(self.constructed).write(value) };
        self.constructed += 1;
    }

    #[inline]
    pub fn constructed(&self) -> usize {
        self.constructed
    }

    /// Commit: the elements stay alive and ownership passes to the caller.
    pub fn release(self) -> usize {
        let constructed = self.constructed;
        core::mem::forget(self);
        constructed
    }
}

impl<T> Drop for ConstructGuard<T> {
    fn drop(&mut self) {
        if self.constructed > 0 {
            crate::logging::log_vector_rollback("construct", self.constructed);
        }
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.start, self.constructed));
        }
    }
}
