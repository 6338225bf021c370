//! Element allocators over a segment
//!
//! Design: one trait, two capability levels:
//! 1. Single-shot (`SimpleAllocator`): can only hand out fresh blocks of
//!    exactly the requested size.
//! 2. Negotiating (`SegmentAllocator`): forwards the full allocation-command
//!    protocol, so containers can grow blocks in place.
//!
//! Containers ask [`BlockAllocator::supports_in_place`] instead of branching
//! on allocator types.


use crate::error::{Error, Result};
use crate::offset_ptr::OffsetPtr;
use crate::segment::{AllocationCommand, CommandRequest, Received, SegmentId, SegmentManager};
use core::fmt;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

/// Allocator of contiguous arrays of `T` inside a segment.
pub trait BlockAllocator<T> {
    /// Base of the owning segment in this address space.
    fn segment_base(&self) -> NonNull<u8>;

    /// Largest element count a single block could ever hold.
    fn max_size(&self) -> usize;

    /// Allocate room for exactly `count` elements.
    fn allocate(&self, count: usize) -> Result<OffsetPtr<T>>;

    /// Release a block obtained from this allocator.
    ///
    /// # Safety
    /// `ptr` must come from this allocator (or one equal to it) with the
    /// same `count`, or from a command whose received size was `count`, and
    /// must not be released twice.
    unsafe fn deallocate(&self, ptr: OffsetPtr<T>, count: usize);

    /// Whether `allocation_command` can grow or shrink blocks in place.
    fn supports_in_place(&self) -> bool {
        false
    }

    /// Execute an allocation command.
    ///
    /// The default is single-shot: only `ALLOCATE_NEW` is honoured, always at
    /// exactly `preferred` elements, and `reuse` is ignored.
    fn allocation_command(
        &self,
        command: AllocationCommand,
        limit: usize,
        preferred: usize,
        reuse: OffsetPtr<T>,
    ) -> Result<Received<T>> {
        let _ = (limit, reuse);
        if !command.contains(AllocationCommand::ALLOCATE_NEW) {
            return Err(Error::UnsupportedCommand { command });
        }
        let block = self.allocate(preferred)?;
        Ok(Received {
            block,
            size: preferred,
            expanded: false,
        })
    }

    /// Local address of `ptr`.
    #[inline]
    fn resolve(&self, ptr: OffsetPtr<T>) -> *mut T {
        ptr.resolve(self.segment_base())
    }
}

/// Compile-time rejection of zero-sized element types.
pub(crate) struct AssertSized<T>(PhantomData<T>);

impl<T> AssertSized<T> {
    pub(crate) const NON_ZERO: () = assert!(
        size_of::<T>() != 0,
        "zero-sized element types are not supported"
    );
}

pub(crate) fn check_alignment<T, S: SegmentManager + ?Sized>(segment: &S) -> Result<()> {
    let max = segment.alignment();
    if align_of::<T>() > max {
        return Err(Error::UnsupportedAlignment {
            align: align_of::<T>(),
            max,
        });
    }
    Ok(())
}

/// Negotiating allocator: the full command protocol of the segment.
pub struct SegmentAllocator<'s, T, S: SegmentManager> {
    segment: &'s S,
    _marker: PhantomData<fn() -> T>,
}

impl<'s, T, S: SegmentManager> SegmentAllocator<'s, T, S> {
    pub fn new(segment: &'s S) -> Self {
        let () = AssertSized::<T>::NON_ZERO;
        Self {
            segment,
            _marker: PhantomData,
        }
    }

    pub fn segment(&self) -> &'s S {
        self.segment
    }

    /// The same allocator for another element type.
    pub fn rebind<U>(&self) -> SegmentAllocator<'s, U, S> {
        SegmentAllocator::new(self.segment)
    }
}

impl<T, S: SegmentManager> Clone for SegmentAllocator<'_, T, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, S: SegmentManager> Copy for SegmentAllocator<'_, T, S> {}

impl<T, S: SegmentManager> PartialEq for SegmentAllocator<'_, T, S> {
    fn eq(&self, other: &Self) -> bool {
        self.segment.id() == other.segment.id()
    }
}

impl<T, S: SegmentManager> Eq for SegmentAllocator<'_, T, S> {}

impl<T, S: SegmentManager> fmt::Debug for SegmentAllocator<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentAllocator")
            .field("segment", &self.segment.id())
            .finish()
    }
}

impl<T, S: SegmentManager> BlockAllocator<T> for SegmentAllocator<'_, T, S> {
    fn segment_base(&self) -> NonNull<u8> {
        self.segment.base()
    }

    fn max_size(&self) -> usize {
        self.segment.max_size() / size_of::<T>()
    }

    fn allocate(&self, count: usize) -> Result<OffsetPtr<T>> {
        check_alignment::<T, S>(self.segment)?;
        let request = CommandRequest::allocate(count, count, size_of::<T>());
        self.segment
            .allocation_command(&request)
            .map(|received| received.block.cast())
    }

    unsafe fn deallocate(&self, ptr: OffsetPtr<T>, _count: usize) {
        self.segment.deallocate(ptr.cast());
    }

    fn supports_in_place(&self) -> bool {
        true
    }

    fn allocation_command(
        &self,
        command: AllocationCommand,
        limit: usize,
        preferred: usize,
        reuse: OffsetPtr<T>,
    ) -> Result<Received<T>> {
        check_alignment::<T, S>(self.segment)?;
        let request = CommandRequest::new(command, limit, preferred, size_of::<T>(), reuse.cast());
        self.segment
            .allocation_command(&request)
            .map(Received::cast)
    }
}

/// Single-shot allocator: fresh blocks of exactly the requested size.
pub struct SimpleAllocator<'s, T, S: SegmentManager> {
    segment: &'s S,
    _marker: PhantomData<fn() -> T>,
}

impl<'s, T, S: SegmentManager> SimpleAllocator<'s, T, S> {
    pub fn new(segment: &'s S) -> Self {
        let () = AssertSized::<T>::NON_ZERO;
        Self {
            segment,
            _marker: PhantomData,
        }
    }

    pub fn segment(&self) -> &'s S {
        self.segment
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment.id()
    }
}

impl<T, S: SegmentManager> Clone for SimpleAllocator<'_, T, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, S: SegmentManager> Copy for SimpleAllocator<'_, T, S> {}

impl<T, S: SegmentManager> PartialEq for SimpleAllocator<'_, T, S> {
    fn eq(&self, other: &Self) -> bool {
        self.segment.id() == other.segment.id()
    }
}

impl<T, S: SegmentManager> Eq for SimpleAllocator<'_, T, S> {}

impl<T, S: SegmentManager> fmt::Debug for SimpleAllocator<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleAllocator")
            .field("segment", &self.segment.id())
            .finish()
    }
}

impl<T, S: SegmentManager> BlockAllocator<T> for SimpleAllocator<'_, T, S> {
    fn segment_base(&self) -> NonNull<u8> {
        self.segment.base()
    }

    fn max_size(&self) -> usize {
        self.segment.max_size() / size_of::<T>()
    }

    fn allocate(&self, count: usize) -> Result<OffsetPtr<T>> {
        check_alignment::<T, S>(self.segment)?;
        let bytes = count.checked_mul(size_of::<T>()).ok_or(Error::CapacityOverflow {
            requested: count,
            max: self.max_size(),
        })?;
        self.segment.allocate(bytes).map(OffsetPtr::cast)
    }

    unsafe fn deallocate(&self, ptr: OffsetPtr<T>, _count: usize) {
        self.segment.deallocate(ptr.cast());
    }
}
