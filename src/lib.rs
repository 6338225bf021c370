//! relocmem - containers for memory that is not addressed by native pointers
//!
//! Design: everything stored inside a segment is addressed by an offset from
//! the segment base, so a region can be mapped at a different address in
//! another process (or remapped in this one) without invalidating it.
//!
//! Two building blocks sit on top of the segment's allocation-command
//! protocol:
//! 1. A reference-counted fixed-size node pool, shared by every
//!    [`NodeAllocator`] with the same node size in the same segment.
//! 2. [`OffsetVec`], a dynamic array that asks the segment to grow its block
//!    in place (forward, then backward) before falling back to a copy.
//!
//! Nothing here synchronizes access to a segment. `ArenaSegment` is `Send`
//! but not `Sync`, so within a process every handle to one segment lives on
//! one thread; other `SegmentManager` implementations shared across
//! processes must serialize access themselves.

pub mod allocator;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod node_allocator;
pub mod offset_ptr;
pub mod pool;
pub mod segment;
pub mod vector;

pub use allocator::{BlockAllocator, SegmentAllocator, SimpleAllocator};
pub use config::{Config, SegmentConfig};
pub use error::{BoxError, Error, Result};
pub use node_allocator::NodeAllocator;
pub use offset_ptr::OffsetPtr;
pub use pool::{NodeChain, NodePool};
pub use segment::{
    AllocationCommand, ArenaSegment, CommandRequest, PoolKey, Received, SegmentId,
    SegmentManager, SegmentStats,
};
pub use vector::{GrowthStats, OffsetVec, RawParts};
