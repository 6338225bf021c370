//! Node allocator - a typed handle onto a shared node pool
//!
//! Design: a `NodeAllocator` is nothing but a pool link. Constructing one
//! attaches to (or creates) the pool for `T`'s node size in the segment;
//! cloning links again; dropping unlinks, and the last unlink returns the
//! pool's chunks to the segment.
//!
//! Single-node and bulk operations draw from the same free list, but a node
//! must be released by the counterpart of the call that produced it:
//! `allocate_one` with `deallocate_one`, `allocate_many` with
//! `deallocate_many`. Mixing them is undefined behavior.

use crate::allocator::{check_alignment, AssertSized, BlockAllocator};
use crate::error::{Error, Result};
use crate::offset_ptr::OffsetPtr;
use crate::pool::{node_size_for, NodeChain, NodePool, DEFAULT_NODES_PER_CHUNK};
use crate::segment::SegmentManager;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, size_of};
use core::ptr::{self, NonNull};

/// Allocator of single `T` nodes from the pool shared by every allocator
/// with the same node size and chunk size in the segment.
pub struct NodeAllocator<'s, T, S: SegmentManager, const N: usize = { DEFAULT_NODES_PER_CHUNK }> {
    pool: NodePool<'s, S>,
    _marker: PhantomData<*const T>,
}

impl<'s, T, S: SegmentManager, const N: usize> NodeAllocator<'s, T, S, N> {
    /// Attach to the pool for `T` in `segment`, creating it if needed.
    pub fn new(segment: &'s S) -> Result<Self> {
        let () = AssertSized::<T>::NON_ZERO;
        check_alignment::<T, S>(segment)?;
        let pool = NodePool::get_or_create(segment, node_size_for::<T>(), N)?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: NodePool<'s, S>) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// The allocator for another node type over the same segment.
    ///
    /// Shares this allocator's pool when the node sizes match; otherwise
    /// attaches to (and may have to create) the pool for `U`.
    pub fn rebind<U>(&self) -> Result<NodeAllocator<'s, U, S, N>> {
        if node_size_for::<U>() == node_size_for::<T>() {
            let () = AssertSized::<U>::NON_ZERO;
            check_alignment::<U, S>(self.segment())?;
            return Ok(NodeAllocator::from_pool(self.pool.clone()));
        }
        NodeAllocator::new(self.segment())
    }

    pub fn segment(&self) -> &'s S {
        self.pool.segment()
    }

    pub fn node_pool(&self) -> &NodePool<'s, S> {
        &self.pool
    }

    pub fn allocate_one(&self) -> Result<OffsetPtr<T>> {
        self.pool.allocate_node().map(OffsetPtr::cast)
    }

    /// # Safety
    /// `ptr` must come from `allocate_one` on an allocator equal to this one,
    /// hold no live value, and not be released twice.
    pub unsafe fn deallocate_one(&self, ptr: OffsetPtr<T>) {
        self.pool.deallocate_node(ptr.cast());
    }

    /// Allocate `count` nodes in one pass over the free list.
    pub fn allocate_many(&self, count: usize) -> Result<NodeChain<T>> {
        self.pool.allocate_many(count).map(NodeChain::cast)
    }

    /// # Safety
    /// Every node must come from `allocate_many` on an allocator equal to
    /// this one and not be released twice.
    pub unsafe fn deallocate_many(&self, chain: NodeChain<T>) {
        self.pool.deallocate_many(chain.cast());
    }

    /// Move `value` into the node at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be an allocated node that holds no live value.
    pub unsafe fn construct(&self, ptr: OffsetPtr<T>, value: T) {
        self.resolve(ptr).write(value);
    }

    /// Drop the value in the node at `ptr`, leaving the node allocated.
    ///
    /// # Safety
    /// `ptr` must hold a live value.
    pub unsafe fn destroy(&self, ptr: OffsetPtr<T>) {
        ptr::drop_in_place(self.resolve(ptr));
    }

    #[inline]
    pub fn resolve(&self, ptr: OffsetPtr<T>) -> *mut T {
        ptr.resolve(self.segment().base())
    }

    /// Return every fully free chunk of the pool to the segment.
    pub fn deallocate_free_chunks(&self) -> usize {
        self.pool.shrink_to_fit()
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }
}

impl<T, S: SegmentManager, const N: usize> Clone for NodeAllocator<'_, T, S, N> {
    fn clone(&self) -> Self {
        Self::from_pool(self.pool.clone())
    }
}

impl<T, S: SegmentManager, const N: usize> PartialEq for NodeAllocator<'_, T, S, N> {
    fn eq(&self, other: &Self) -> bool {
        self.pool == other.pool
    }
}

impl<T, S: SegmentManager, const N: usize> Eq for NodeAllocator<'_, T, S, N> {}

impl<T, S: SegmentManager, const N: usize> fmt::Debug for NodeAllocator<'_, T, S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeAllocator")
            .field("pool", &self.pool)
            .finish()
    }
}

/// Block allocation through a node allocator: a single element is one pool
/// node, anything else is a plain segment block.
impl<T, S: SegmentManager, const N: usize> BlockAllocator<T> for NodeAllocator<'_, T, S, N> {
    fn segment_base(&self) -> NonNull<u8> {
        self.segment().base()
    }

    fn max_size(&self) -> usize {
        self.segment().max_size() / self.pool.node_size()
    }

    fn allocate(&self, count: usize) -> Result<OffsetPtr<T>> {
        if count == 1 {
            return self.allocate_one();
        }
        let bytes = count.checked_mul(size_of::<T>()).ok_or(Error::CapacityOverflow {
            requested: count,
            max: BlockAllocator::max_size(self),
        })?;
        self.segment().allocate(bytes).map(OffsetPtr::cast)
    }

    unsafe fn deallocate(&self, ptr: OffsetPtr<T>, count: usize) {
        if count == 1 {
            self.deallocate_one(ptr);
        } else {
            self.segment().deallocate(ptr.cast());
        }
    }
}
