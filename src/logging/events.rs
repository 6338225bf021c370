//! Event helpers - one function per thing worth logging
//!
//! Keeps field names consistent across modules. Targets: `segment`, `pool`,
//! `vector`.

use tracing::{debug, trace, warn};

/// Log an allocation command served by a segment
#[inline]
pub fn log_segment_command(command: &str, offset: usize, bytes: usize) {
    trace!(
        target: "segment",
        event = "command",
        command,
        offset,
        size_bytes = bytes,
        "allocation command served"
    );
}

/// Log a block returned to a segment
#[inline]
pub fn log_segment_release(offset: usize, bytes: usize) {
    trace!(
        target: "segment",
        event = "release",
        offset,
        size_bytes = bytes,
        "block released"
    );
}

/// Log an allocation the segment could not satisfy
pub fn log_segment_exhausted(requested: usize, available: usize) {
    warn!(
        target: "segment",
        event = "out_of_memory",
        requested_bytes = requested,
        available_bytes = available,
        "segment exhausted"
    );
}

/// Log a segment moving to a new base address
pub fn log_segment_remap(old_base: *const u8, new_base: *const u8, size: usize) {
    debug!(
        target: "segment",
        event = "remap",
        old_base = ?old_base,
        new_base = ?new_base,
        size_bytes = size,
        "segment remapped"
    );
}

/// Log creation of a shared node pool
pub fn log_pool_created(node_size: usize, nodes_per_chunk: usize, offset: usize) {
    debug!(
        target: "pool",
        event = "pool_created",
        node_size,
        nodes_per_chunk,
        offset,
        "node pool created"
    );
}

/// Log destruction of a node pool after its last link went away
pub fn log_pool_destroyed(node_size: usize, chunks_released: usize) {
    debug!(
        target: "pool",
        event = "pool_destroyed",
        node_size,
        chunks_released,
        "node pool destroyed"
    );
}

/// Log a chunk acquired from the segment
#[inline]
pub fn log_chunk_acquired(node_size: usize, offset: usize, chunk_count: usize) {
    debug!(
        target: "pool",
        event = "chunk_acquired",
        node_size,
        offset,
        chunk_count,
        "chunk acquired"
    );
}

/// Log chunks returned by a shrink pass
pub fn log_chunks_released(node_size: usize, released: usize, remaining: usize) {
    debug!(
        target: "pool",
        event = "chunks_released",
        node_size,
        released,
        remaining,
        "free chunks returned to segment"
    );
}

/// Log a single node handed out or taken back
#[inline]
pub fn log_node(event: &'static str, offset: usize) {
    trace!(target: "pool", event, offset, "node");
}

/// Log the strategy a vector used to grow
#[inline]
pub fn log_vector_growth(strategy: &'static str, old_capacity: usize, new_capacity: usize) {
    debug!(
        target: "vector",
        event = "growth",
        strategy,
        old_capacity,
        new_capacity,
        "vector storage grown"
    );
}

/// Log a rollback of a partially applied vector operation
pub fn log_vector_rollback(operation: &'static str, constructed: usize) {
    debug!(
        target: "vector",
        event = "rollback",
        operation,
        constructed,
        "partial operation rolled back"
    );
}

/// Log a vector returning unused capacity
pub fn log_vector_shrink(old_capacity: usize, new_capacity: usize, in_place: bool) {
    debug!(
        target: "vector",
        event = "shrink",
        old_capacity,
        new_capacity,
        in_place,
        "vector storage shrunk"
    );
}
