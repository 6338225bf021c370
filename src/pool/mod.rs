//! Node pool - segregated storage for fixed-size nodes
//!
//! Design: the pool header lives inside the segment it allocates from and is
//! found through the segment's shared-object directory, keyed by node size
//! and nodes per chunk. Every handle to the same key in the same segment
//! refers to the same header.
//! - Chunks of `nodes_per_chunk` nodes are requested from the segment one at
//!   a time and linked into a chunk list.
//! - Free nodes form an intrusive singly linked list of offsets.
//! - Handles are reference counted like `RefCount`: cloning links, dropping
//!   unlinks, and the last unlink returns every chunk to the segment.
//!
//! The counters are plain integers. They are only safe because a pool
//! handle borrows a segment that is confined to one thread.

mod chain;


pub use chain::NodeChain;

use crate::error::{Error, Result};
use crate::logging::{
    log_chunk_acquired, log_chunks_released, log_node, log_pool_created, log_pool_destroyed,
};
use crate::offset_ptr::OffsetPtr;
use crate::segment::{PoolKey, SegmentManager};
use bitvec::prelude::*;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};

/// Nodes per chunk used when a caller does not pick one.
pub const DEFAULT_NODES_PER_CHUNK: usize = 64;

/// Pool state, stored inside the segment.
#[repr(C)]
struct PoolHeader {
    node_size: usize,
    nodes_per_chunk: usize,
    ref_count: usize,
    free_head: OffsetPtr<FreeNode>,
    free_count: usize,
    chunks: OffsetPtr<ChunkHeader>,
    chunk_count: usize,
}

/// Prefix of every chunk; nodes follow at the segment alignment.
#[repr(C)]
struct ChunkHeader {
    next: OffsetPtr<ChunkHeader>,
}

/// Overlay of a node while it sits on the free list.
#[repr(C)]
struct FreeNode {
    next: OffsetPtr<FreeNode>,
}

/// Node size a pool must use to hold values of `T`.
///
/// At least one free-list link, rounded to the stricter alignment.
pub const fn node_size_for<T>() -> usize {
    let align = if align_of::<T>() > align_of::<FreeNode>() {
        align_of::<T>()
    } else {
        align_of::<FreeNode>()
    };
    let size = if size_of::<T>() > size_of::<FreeNode>() {
        size_of::<T>()
    } else {
        size_of::<FreeNode>()
    };
    (size + align - 1) / align * align
}

/// Position of a chunk's nodes, used to map a node back to its chunk.
#[derive(Clone, Copy)]
struct ChunkSpan {
    chunk: OffsetPtr<ChunkHeader>,
    nodes_start: usize,
}

/// Map a node offset to `(chunk index, node index)` within a sorted chunk table.
fn locate(
    table: &[ChunkSpan],
    offset: usize,
    node_size: usize,
    nodes_per_chunk: usize,
) -> Option<(usize, usize)> {
    let idx = table.partition_point(|c| c.nodes_start <= offset).checked_sub(1)?;
    let rel = offset - table[idx].nodes_start;
    if rel >= node_size * nodes_per_chunk || rel % node_size != 0 {
        return None;
    }
    Some((idx, rel / node_size))
}

/// Reference-counted handle to a shared node pool.
pub struct NodePool<'s, S: SegmentManager> {
    segment: &'s S,
    header: OffsetPtr<PoolHeader>,
    _not_sync: PhantomData<*mut PoolHeader>,
}

impl<'s, S: SegmentManager> NodePool<'s, S> {
    /// Attach to the pool for `(node_size, nodes_per_chunk)` in `segment`,
    /// creating it on first use. Either way the reference count goes up.
    pub fn get_or_create(segment: &'s S, node_size: usize, nodes_per_chunk: usize) -> Result<Self> {
        if node_size < size_of::<FreeNode>() || node_size % align_of::<FreeNode>() != 0 {
            return Err(Error::InvalidRequest(format!(
                "node size {node_size} cannot hold a free-list link"
            )));
        }
        if nodes_per_chunk == 0 {
            return Err(Error::InvalidRequest("zero nodes per chunk".into()));
        }

        let key = PoolKey {
            node_size,
            nodes_per_chunk,
        };
        if let Some(at) = segment.find_shared(&key) {
            let pool = Self::attach(segment, at.cast());
            pool.inc_ref_count();
            return Ok(pool);
        }

        let at = segment.allocate(size_of::<PoolHeader>())?;
        unsafe {
            at.cast::<PoolHeader>().resolve(segment.base()).write(PoolHeader {
                node_size,
                nodes_per_chunk,
                ref_count: 1,
                free_head: OffsetPtr::null(),
                free_count: 0,
                chunks: OffsetPtr::null(),
                chunk_count: 0,
            });
        }

        if !segment.register_shared(key, at) {
            // Someone published the same key in between; use theirs
            unsafe { segment.deallocate(at) };
            return Self::get_or_create(segment, node_size, nodes_per_chunk);
        }

        log_pool_created(node_size, nodes_per_chunk, at.offset().unwrap_or_default());
        Ok(Self::attach(segment, at.cast()))
    }

    fn attach(segment: &'s S, header: OffsetPtr<PoolHeader>) -> Self {
        Self {
            segment,
            header,
            _not_sync: PhantomData,
        }
    }

    #[inline]
    fn header(&self) -> *mut PoolHeader {
        self.header.resolve(self.segment.base())
    }

    #[inline]
    fn state(&self) -> &PoolHeader {
        unsafe { &*self.header() }
    }

    pub fn segment(&self) -> &'s S {
        self.segment
    }

    /// Location of the pool header; identical for every handle to this pool.
    pub fn id(&self) -> OffsetPtr<u8> {
        self.header.cast()
    }

    pub fn key(&self) -> PoolKey {
        PoolKey {
            node_size: self.node_size(),
            nodes_per_chunk: self.nodes_per_chunk(),
        }
    }

    pub fn node_size(&self) -> usize {
        self.state().node_size
    }

    pub fn nodes_per_chunk(&self) -> usize {
        self.state().nodes_per_chunk
    }

    pub fn ref_count(&self) -> usize {
        self.state().ref_count
    }

    /// True when this handle is the only remaining link to the pool.
    pub fn is_last_link(&self) -> bool {
        self.ref_count() == 1
    }

    pub fn chunk_count(&self) -> usize {
        self.state().chunk_count
    }

    pub fn free_nodes(&self) -> usize {
        self.state().free_count
    }

    fn inc_ref_count(&self) {
        unsafe {
            let header = &mut *self.header();
            debug_assert!(header.ref_count < usize::MAX, "pool refcount overflow");
            header.ref_count += 1;
        }
    }

    /// Returns the count left after unlinking.
    fn dec_ref_count(&self) -> usize {
        unsafe {
            let header = &mut *self.header();
            debug_assert!(header.ref_count > 0, "pool refcount underflow");
            header.ref_count -= 1;
            header.ref_count
        }
    }

    #[inline]
    fn payload_offset(&self) -> usize {
        let align = self.segment.alignment();
        (size_of::<ChunkHeader>() + align - 1) / align * align
    }

    /// Request one chunk from the segment and thread its nodes onto the free list.
    fn acquire_chunk(&self) -> Result<()> {
        let (node_size, nodes_per_chunk) = (self.node_size(), self.nodes_per_chunk());
        let payload = self.payload_offset();
        let bytes = node_size
            .checked_mul(nodes_per_chunk)
            .and_then(|nodes| nodes.checked_add(payload))
            .ok_or(Error::CapacityOverflow {
                requested: nodes_per_chunk,
                max: self.segment.max_size() / node_size,
            })?;

        let chunk = self.segment.allocate(bytes)?;
        let base = self.segment.base();

        unsafe {
            let header = &mut *self.header();
            let chunk_header = chunk.cast::<ChunkHeader>();
            chunk_header.resolve(base).write(ChunkHeader {
                next: header.chunks,
            });
            header.chunks = chunk_header;
            header.chunk_count += 1;

            // Back to front, so the first node of the chunk is handed out first
            for i in (0..nodes_per_chunk).rev() {
                let node = chunk.byte_add(payload + i * node_size).cast::<FreeNode>();
                node.resolve(base).write(FreeNode {
                    next: header.free_head,
                });
                header.free_head = node;
            }
            header.free_count += nodes_per_chunk;

            log_chunk_acquired(node_size, chunk.offset().unwrap_or_default(), header.chunk_count);
        }
        Ok(())
    }

    /// Pop the free-list head. Caller guarantees the list is not empty.
    #[inline]
    unsafe fn pop_free(&self) -> OffsetPtr<u8> {
        let header = &mut *self.header();
        let node = header.free_head;
        debug_assert!(!node.is_null(), "pop from empty free list");
        header.free_head = (*node.resolve(self.segment.base())).next;
        header.free_count -= 1;
        node.cast()
    }

    /// Hand out one node, acquiring a chunk if the free list is empty.
    pub fn allocate_node(&self) -> Result<OffsetPtr<u8>> {
        if self.state().free_head.is_null() {
            self.acquire_chunk()?;
        }
        let node = unsafe { self.pop_free() };
        log_node("allocate", node.offset().unwrap_or_default());
        Ok(node)
    }

    /// Push a node back onto the free list.
    ///
    /// # Safety
    /// `node` must have been handed out by this pool and not returned since.
    pub unsafe fn deallocate_node(&self, node: OffsetPtr<u8>) {
        let header = &mut *self.header();
        let node = node.cast::<FreeNode>();
        node.resolve(self.segment.base()).write(FreeNode {
            next: header.free_head,
        });
        header.free_head = node;
        header.free_count += 1;
        log_node("deallocate", node.offset().unwrap_or_default());
    }

    /// Hand out `count` nodes as one operation.
    ///
    /// Chunks are acquired up front; if the segment runs dry no node is
    /// handed out, and chunks acquired so far stay in the pool as free nodes.
    pub fn allocate_many(&self, count: usize) -> Result<NodeChain<u8>> {
        while self.free_nodes() < count {
            self.acquire_chunk()?;
        }

        let mut chain = NodeChain::with_capacity(count);
        for _ in 0..count {
            chain.push(unsafe { self.pop_free() });
        }
        Ok(chain)
    }

    /// Return every node of `chain` to the free list.
    ///
    /// # Safety
    /// Same contract as [`deallocate_node`](Self::deallocate_node), for each node.
    pub unsafe fn deallocate_many(&self, chain: NodeChain<u8>) {
        for node in chain {
            self.deallocate_node(node);
        }
    }

    /// Chunks ordered by the offset of their first node.
    fn chunk_table(&self) -> Vec<ChunkSpan> {
        let base = self.segment.base();
        let payload = self.payload_offset();
        let mut table = Vec::with_capacity(self.chunk_count());

        let mut chunk = self.state().chunks;
        while let Some(offset) = chunk.offset() {
            table.push(ChunkSpan {
                chunk,
                nodes_start: offset + payload,
            });
            chunk = unsafe { (*chunk.resolve(base)).next };
        }
        table.sort_unstable_by_key(|span| span.nodes_start);
        table
    }

    /// Return every chunk whose nodes are all free to the segment.
    ///
    /// Returns the number of chunks released.
    pub fn shrink_to_fit(&self) -> usize {
        let (node_size, nodes_per_chunk) = (self.node_size(), self.nodes_per_chunk());
        let table = self.chunk_table();
        if table.is_empty() {
            return 0;
        }
        let base = self.segment.base();

        let mut free_per_chunk = vec![0usize; table.len()];
        let mut node = self.state().free_head;
        while let Some(offset) = node.offset() {
            if let Some((chunk, _)) = locate(&table, offset, node_size, nodes_per_chunk) {
                free_per_chunk[chunk] += 1;
            }
            node = unsafe { (*node.resolve(base)).next };
        }

        let released: BitVec = free_per_chunk
            .iter()
            .map(|&free| free == nodes_per_chunk)
            .collect();
        let released_count = released.count_ones();
        if released_count == 0 {
            return 0;
        }

        unsafe {
            let header = &mut *self.header();

            // Relink the free list without the nodes of released chunks
            let mut head = OffsetPtr::<FreeNode>::null();
            let mut tail = OffsetPtr::<FreeNode>::null();
            let mut kept = 0;
            let mut node = header.free_head;
            while let Some(offset) = node.offset() {
                let next = (*node.resolve(base)).next;
                let keep = match locate(&table, offset, node_size, nodes_per_chunk) {
                    Some((chunk, _)) => !released[chunk],
                    None => true,
                };
                if keep {
                    if tail.is_null() {
                        head = node;
                    } else {
                        (*tail.resolve(base)).next = node;
                    }
                    tail = node;
                    kept += 1;
                }
                node = next;
            }
            if !tail.is_null() {
                (*tail.resolve(base)).next = OffsetPtr::null();
            }
            header.free_head = head;
            header.free_count = kept;

            // Rebuild the chunk list from the survivors
            header.chunks = OffsetPtr::null();
            for (idx, span) in table.iter().enumerate().rev() {
                if released[idx] {
                    self.segment.deallocate(span.chunk.cast());
                } else {
                    (*span.chunk.resolve(base)).next = header.chunks;
                    header.chunks = span.chunk;
                }
            }
            header.chunk_count -= released_count;

            log_chunks_released(node_size, released_count, header.chunk_count);
        }
        released_count
    }

    /// Walk the free list and check every node is inside a chunk, on the
    /// node grid, and listed once. Returns the number of free nodes.
    pub fn verify_free_list(&self) -> Result<usize> {
        let (node_size, nodes_per_chunk) = (self.node_size(), self.nodes_per_chunk());
        let table = self.chunk_table();
        let base = self.segment.base();
        let mut seen = bitvec![0; table.len() * nodes_per_chunk];

        let mut count = 0;
        let mut node = self.state().free_head;
        while let Some(offset) = node.offset() {
            let (chunk, slot) = locate(&table, offset, node_size, nodes_per_chunk).ok_or_else(|| {
                Error::CorruptFreeList(format!("node at {offset:#x} is outside every chunk"))
            })?;
            let bit = chunk * nodes_per_chunk + slot;
            if seen[bit] {
                return Err(Error::CorruptFreeList(format!(
                    "node at {offset:#x} is listed twice"
                )));
            }
            seen.set(bit, true);
            count += 1;
            node = unsafe { (*node.resolve(base)).next };
        }

        if count != self.free_nodes() {
            return Err(Error::CorruptFreeList(format!(
                "{count} nodes listed, {} recorded",
                self.free_nodes()
            )));
        }
        Ok(count)
    }

    /// Return every chunk to the segment, regardless of node state.
    fn release_all_chunks(&self) -> usize {
        let base = self.segment.base();
        unsafe {
            let header = &mut *self.header();
            let released = header.chunk_count;
            let mut chunk = header.chunks;
            while !chunk.is_null() {
                let next = (*chunk.resolve(base)).next;
                self.segment.deallocate(chunk.cast());
                chunk = next;
            }
            header.chunks = OffsetPtr::null();
            header.chunk_count = 0;
            header.free_head = OffsetPtr::null();
            header.free_count = 0;
            released
        }
    }

    /// Tear the pool down: chunks, directory entry, header.
    #[cold]
    fn destroy(&self) {
        let key = self.key();
        let released = self.release_all_chunks();
        self.segment.unregister_shared(&key);
        unsafe { self.segment.deallocate(self.header.cast()) };
        log_pool_destroyed(key.node_size, released);
    }
}

impl<S: SegmentManager> Clone for NodePool<'_, S> {
    fn clone(&self) -> Self {
        self.inc_ref_count();
        Self::attach(self.segment, self.header)
    }
}

impl<S: SegmentManager> Drop for NodePool<'_, S> {
    fn drop(&mut self) {
        if self.dec_ref_count() == 0 {
            self.destroy();
        }
    }
}

impl<S: SegmentManager> PartialEq for NodePool<'_, S> {
    fn eq(&self, other: &Self) -> bool {
        self.segment.id() == other.segment.id() && self.header == other.header
    }
}

impl<S: SegmentManager> Eq for NodePool<'_, S> {}

impl<S: SegmentManager> fmt::Debug for NodePool<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("NodePool")
            .field("segment", &self.segment.id())
            .field("header", &self.header)
            .field("node_size", &state.node_size)
            .field("nodes_per_chunk", &state.nodes_per_chunk)
            .field("ref_count", &state.ref_count)
            .field("chunks", &state.chunk_count)
            .field("free", &state.free_count)
            .finish()
    }
}
