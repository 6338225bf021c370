//! OffsetVec - a dynamic array whose storage survives relocation
//!
//! Design: the vector stores only an offset handle to its block plus length
//! and capacity, so the triple can live inside the segment itself and stay
//! valid when the segment is mapped elsewhere. Every address is resolved
//! through the allocator at the point of use.
//!
//! Growth goes through the allocation-command protocol (see `growth`):
//! forward expansion first, backward expansion second, a fresh block last.
//! Allocators without in-place support always take the fresh-block route.
//!
//! Invariants:
//! - `len <= cap`; `[0, len)` is initialized, `[len, cap)` is raw storage.
//! - `cap == 0` iff the vector owns no block (`start` is null).

mod growth;
mod iter;


pub use iter::IntoIter;

use crate::allocator::{AssertSized, BlockAllocator};
use crate::error::{BoxError, Error, Result};
use crate::offset_ptr::OffsetPtr;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Bound, Deref, DerefMut, RangeBounds};
use core::ptr;
use core::slice;
use serde::Serialize;

/// How a vector's block has grown since creation (or the last reset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GrowthStats {
    pub expanded_forward: usize,
    pub expanded_backward: usize,
    pub new_allocations: usize,
}

/// Offset triple of a vector, detached from its allocator.
///
/// `repr(C)` so it can be stored inside the segment next to the data.
#[repr(C)]
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(bound = "")]
pub struct RawParts<T> {
    pub start: OffsetPtr<T>,
    pub len: usize,
    pub capacity: usize,
}

impl<T> Clone for RawParts<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawParts<T> {}

/// Dynamic array stored in a segment and addressed by offset.
pub struct OffsetVec<T, A: BlockAllocator<T>> {
    start: OffsetPtr<T>,
    len: usize,
    cap: usize,
    alloc: A,
    stats: GrowthStats,
    _owns: PhantomData<T>,
}

impl<T, A: BlockAllocator<T>> OffsetVec<T, A> {
    /// Empty vector; no block is requested until the first insertion.
    pub fn new_in(alloc: A) -> Self {
        let () = AssertSized::<T>::NON_ZERO;
        Self {
            start: OffsetPtr::null(),
            len: 0,
            cap: 0,
            alloc,
            stats: GrowthStats::default(),
            _owns: PhantomData,
        }
    }

    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut vec = Self::new_in(alloc);
        vec.reserve(capacity)?;
        Ok(vec)
    }

    /// `n` clones of `value`.
    pub fn from_elem_in(n: usize, value: T, alloc: A) -> Result<Self>
    where
        T: Clone,
    {
        let mut vec = Self::new_in(alloc);
        vec.resize(n, value)?;
        Ok(vec)
    }

    pub fn from_iter_in<I: IntoIterator<Item = T>>(iter: I, alloc: A) -> Result<Self> {
        let mut vec = Self::new_in(alloc);
        vec.try_extend(iter)?;
        Ok(vec)
    }

    /// Re-attach a vector from its offset triple.
    ///
    /// # Safety
    /// `parts` must come from [`into_raw_parts`](Self::into_raw_parts) of a
    /// vector whose allocator is equal to `alloc`, and must not be attached
    /// twice.
    pub unsafe fn from_raw_parts(parts: RawParts<T>, alloc: A) -> Self {
        Self {
            start: parts.start,
            len: parts.len,
            cap: parts.capacity,
            alloc,
            stats: GrowthStats::default(),
            _owns: PhantomData,
        }
    }

    /// Give up ownership of the block without dropping the elements.
    pub fn into_raw_parts(self) -> (RawParts<T>, A) {
        let this = ManuallyDrop::new(self);
        let parts = RawParts {
            start: this.start,
            len: this.len,
            capacity: this.cap,
        };
        (parts, unsafe { ptr::read(&this.alloc) })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn max_size(&self) -> usize {
        self.alloc.max_size()
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Offset of the first element; null when no block is owned.
    pub fn start(&self) -> OffsetPtr<T> {
        self.start
    }

    pub fn stats(&self) -> GrowthStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = GrowthStats::default();
    }

    /// Local address of the first element, dangling when no block is owned.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data_ptr()
    }

    #[inline]
    fn data_ptr(&self) -> *mut T {
        if self.start.is_null() {
            ptr::NonNull::dangling().as_ptr()
        } else {
            self.alloc.resolve(self.start)
        }
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.data_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.data_ptr(), self.len) }
    }

    /// Bounds-checked access.
    pub fn at(&self, index: usize) -> Result<&T> {
        self.as_slice().get(index).ok_or(Error::OutOfRange {
            index,
            len: self.len,
        })
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.len;
        self.as_mut_slice()
            .get_mut(index)
            .ok_or(Error::OutOfRange { index, len })
    }

    /// # Safety
    /// `index` must be less than `len()`.
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        &*self.data_ptr().add(index)
    }

    /// # Safety
    /// `index` must be less than `len()`.
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        &mut *self.data_ptr().add(index)
    }

    /// Make room for at least `new_capacity` elements in total.
    ///
    /// Does nothing if the capacity already suffices.
    pub fn reserve(&mut self, new_capacity: usize) -> Result<()> {
        self.grow_to(new_capacity)
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        if self.len < self.cap {
            unsafe { self.data_ptr().add(self.len).write(value) };
            self.len += 1;
            return Ok(());
        }
        self.insert_from(self.len, 1, core::iter::once(Ok(value)))
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(unsafe { self.data_ptr().add(self.len).read() })
    }

    /// Insert `value` before position `index`.
    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        self.insert_from(index, 1, core::iter::once(Ok(value)))
    }

    /// Insert `n` clones of `value` before position `index`.
    pub fn insert_n(&mut self, index: usize, n: usize, value: &T) -> Result<()>
    where
        T: Clone,
    {
        self.insert_from(index, n, (0..n).map(|_| Ok(value.clone())))
    }

    pub fn insert_slice(&mut self, index: usize, values: &[T]) -> Result<()>
    where
        T: Clone,
    {
        self.insert_from(index, values.len(), values.iter().cloned().map(Ok))
    }

    /// Insert every item of a sized iterator before position `index`.
    ///
    /// If the iterator yields fewer items than it reported, only those are
    /// inserted.
    pub fn insert_iter<I>(&mut self, index: usize, iter: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = iter.into_iter();
        let n = iter.len();
        self.insert_from(index, n, iter.map(Ok))
    }

    /// Insert `n` elements produced by a fallible constructor.
    ///
    /// `produce` receives the position within the inserted range. If it
    /// fails, every element it built is dropped and the vector holds its
    /// previous elements again; the error is returned as
    /// [`Error::Construction`].
    pub fn try_insert_with<F, E>(&mut self, index: usize, n: usize, mut produce: F) -> Result<()>
    where
        F: FnMut(usize) -> core::result::Result<T, E>,
        E: Into<BoxError>,
    {
        self.insert_from(
            index,
            n,
            (0..n).map(|i| produce(i).map_err(|e| Error::construction(index + i, e))),
        )
    }

    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<()>
    where
        T: Clone,
    {
        self.insert_slice(self.len, values)
    }

    /// Append every item of `iter`, growing as needed.
    ///
    /// Items appended before a failure stay in the vector.
    pub fn try_extend<I: IntoIterator<Item = T>>(&mut self, iter: I) -> Result<()> {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        if self.cap - self.len < lower {
            let target = self.next_capacity(lower)?;
            self.reserve(target)?;
        }
        for item in iter {
            self.push(item)?;
        }
        Ok(())
    }

    /// Remove and return the element at `index`, shifting the tail down.
    pub fn remove(&mut self, index: usize) -> Result<T> {
        if index >= self.len {
            return Err(Error::OutOfRange {
                index,
                len: self.len,
            });
        }
        unsafe {
            let at = self.data_ptr().add(index);
            let value = at.read();
            ptr::copy(at.add(1), at, self.len - index - 1);
            self.len -= 1;
            Ok(value)
        }
    }

    /// Drop the elements in `range` and close the gap.
    pub fn erase<R: RangeBounds<usize>>(&mut self, range: R) -> Result<()> {
        let from = match range.start_bound() {
            Bound::Included(&i) => i,
            Bound::Excluded(&i) => i.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let to = match range.end_bound() {
            Bound::Included(&i) => i.saturating_add(1),
            Bound::Excluded(&i) => i,
            Bound::Unbounded => self.len,
        };
        if to > self.len || from > to {
            return Err(Error::OutOfRange {
                index: to.max(from),
                len: self.len,
            });
        }

        let old_len = self.len;
        unsafe {
            let base = self.data_ptr();
            // A panicking destructor leaks the tail instead of double-dropping
            self.len = from;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base.add(from), to - from));
            ptr::copy(base.add(to), base.add(from), old_len - to);
        }
        self.len = old_len - (to - from);
        Ok(())
    }

    /// Drop every element past `len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let tail = self.len - len;
        self.len = len;
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.data_ptr().add(len), tail));
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Replace the contents with the items of a sized iterator.
    pub fn assign_iter<I>(&mut self, iter: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = iter.into_iter();
        let n = iter.len();
        self.assign_from(n, iter.map(Ok))
    }

    /// Replace the contents with `n` clones of `value`.
    pub fn assign_n(&mut self, n: usize, value: &T) -> Result<()>
    where
        T: Clone,
    {
        self.assign_from(n, (0..n).map(|_| Ok(value.clone())))
    }

    /// Shrink to `new_len`, or grow with clones of `value`.
    pub fn resize(&mut self, new_len: usize, value: T) -> Result<()>
    where
        T: Clone,
    {
        if new_len <= self.len {
            self.truncate(new_len);
            return Ok(());
        }
        let n = new_len - self.len;
        self.insert_from(self.len, n, (0..n).map(|_| Ok(value.clone())))
    }

    pub fn resize_with<F: FnMut() -> T>(&mut self, new_len: usize, mut f: F) -> Result<()> {
        if new_len <= self.len {
            self.truncate(new_len);
            return Ok(());
        }
        let n = new_len - self.len;
        self.insert_from(self.len, n, (0..n).map(|_| Ok(f())))
    }

    pub fn resize_default(&mut self, new_len: usize) -> Result<()>
    where
        T: Default,
    {
        self.resize_with(new_len, T::default)
    }

    /// Exchange contents, allocators and statistics with `other`.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    /// Element-wise copy sharing this vector's allocator.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        A: Clone,
    {
        let mut copy = Self::with_capacity_in(self.len, self.alloc.clone())?;
        copy.insert_slice(0, self.as_slice())?;
        Ok(copy)
    }

    /// Return the block to the allocator. Elements must already be dropped.
    fn release_block(&mut self) {
        if !self.start.is_null() {
            unsafe { self.alloc.deallocate(self.start, self.cap) };
        }
        self.start = OffsetPtr::null();
        self.cap = 0;
    }
}

impl<T, A: BlockAllocator<T>> Drop for OffsetVec<T, A> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.data_ptr(), self.len));
        }
        self.release_block();
    }
}

impl<T, A: BlockAllocator<T>> Deref for OffsetVec<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: BlockAllocator<T>> DerefMut for OffsetVec<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, A, B> PartialEq<OffsetVec<T, B>> for OffsetVec<T, A>
where
    T: PartialEq,
    A: BlockAllocator<T>,
    B: BlockAllocator<T>,
{
    fn eq(&self, other: &OffsetVec<T, B>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, A: BlockAllocator<T>> Eq for OffsetVec<T, A> {}

impl<T: PartialEq, A: BlockAllocator<T>> PartialEq<[T]> for OffsetVec<T, A> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: PartialEq, A: BlockAllocator<T>, const N: usize> PartialEq<[T; N]> for OffsetVec<T, A> {
    fn eq(&self, other: &[T; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T, A, B> PartialOrd<OffsetVec<T, B>> for OffsetVec<T, A>
where
    T: PartialOrd,
    A: BlockAllocator<T>,
    B: BlockAllocator<T>,
{
    fn partial_cmp(&self, other: &OffsetVec<T, B>) -> Option<Ordering> {
        self.as_slice().partial_cmp(other.as_slice())
    }
}

impl<T: Ord, A: BlockAllocator<T>> Ord for OffsetVec<T, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl<T: Hash, A: BlockAllocator<T>> Hash for OffsetVec<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl<T: fmt::Debug, A: BlockAllocator<T>> fmt::Debug for OffsetVec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
