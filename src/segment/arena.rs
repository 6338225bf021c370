//! Arena - the raw memory behind an `ArenaSegment`
//!
//! Uses the standard allocator for portability. The arena can be moved to a
//! fresh allocation with identical contents, which is how a segment models
//! being mapped at a different base address.

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// One contiguous, zero-initialised block of OS memory.
pub struct Arena {
    start: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    /// Allocate a new arena of `size` bytes aligned to `align`.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;

        let start = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { start, layout })
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.start
    }

    /// Arena bounds as `[start, end)`.
    #[inline]
    pub fn bounds(&self) -> (*mut u8, *mut u8) {
        unsafe { (self.start.as_ptr(), self.start.as_ptr().add(self.layout.size())) }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Copy the contents into a fresh allocation and release the old one.
    ///
    /// The new block is acquired before the old one is freed, so the base
    /// address always changes. Returns the previous base.
    pub fn relocate(&mut self) -> Option<NonNull<u8>> {
        let fresh = NonNull::new(unsafe { alloc_zeroed(self.layout) })?;
        let old = self.start;

        unsafe {
            core::ptr::copy_nonoverlapping(old.as_ptr(), fresh.as_ptr(), self.layout.size());
            dealloc(old.as_ptr(), self.layout);
        }

        self.start = fresh;
        Some(old)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.start.as_ptr(), self.layout);
        }
    }
}
