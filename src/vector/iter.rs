//! Iteration over `OffsetVec`

use super::OffsetVec;
use crate::allocator::BlockAllocator;
use crate::offset_ptr::OffsetPtr;
use core::fmt;
use core::iter::FusedIterator;
use core::mem::ManuallyDrop;
use core::ptr;
use core::slice;

/// Owning iterator; releases the block when dropped.
pub struct IntoIter<T, A: BlockAllocator<T>> {
    start: OffsetPtr<T>,
    cap: usize,
    alloc: A,
    front: usize,
    back: usize,
}

impl<T, A: BlockAllocator<T>> IntoIter<T, A> {
    #[inline]
    fn base(&self) -> *mut T {
        self.alloc.resolve(self.start)
    }

    /// Elements not yet yielded.
    pub fn as_slice(&self) -> &[T] {
        if self.front == self.back {
            return &[];
        }
        unsafe { slice::from_raw_parts(self.base().add(self.front), self.back - self.front) }
    }
}

impl<T, A: BlockAllocator<T>> Iterator for IntoIter<T, A> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        let value = unsafe { self.base().add(self.front).read() };
        self.front += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T, A: BlockAllocator<T>> DoubleEndedIterator for IntoIter<T, A> {
    fn next_back(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(unsafe { self.base().add(self.back).read() })
    }
}

impl<T, A: BlockAllocator<T>> ExactSizeIterator for IntoIter<T, A> {}

impl<T, A: BlockAllocator<T>> FusedIterator for IntoIter<T, A> {}

impl<T, A: BlockAllocator<T>> Drop for IntoIter<T, A> {
    fn drop(&mut self) {
        if self.start.is_null() {
            return;
        }
        unsafe {
            let rest = self.base().add(self.front);
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(rest, self.back - self.front));
            self.alloc.deallocate(self.start, self.cap);
        }
    }
}

impl<T: fmt::Debug, A: BlockAllocator<T>> fmt::Debug for IntoIter<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IntoIter").field(&self.as_slice()).finish()
    }
}

impl<T, A: BlockAllocator<T>> IntoIterator for OffsetVec<T, A> {
    type Item = T;
    type IntoIter = IntoIter<T, A>;

    fn into_iter(self) -> IntoIter<T, A> {
        let this = ManuallyDrop::new(self);
        IntoIter {
            start: this.start,
            cap: this.cap,
            alloc: unsafe { ptr::read(&this.alloc) },
            front: 0,
            back: this.len,
        }
    }
}

impl<'a, T, A: BlockAllocator<T>> IntoIterator for &'a OffsetVec<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> slice::Iter<'a, T> {
        self.as_slice().iter()
    }
}

impl<'a, T, A: BlockAllocator<T>> IntoIterator for &'a mut OffsetVec<T, A> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> slice::IterMut<'a, T> {
        self.as_mut_slice().iter_mut()
    }
}
