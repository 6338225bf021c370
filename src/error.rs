//! Error taxonomy shared by segments, pools and containers
//!
//! Declined expansion requests are not errors: they are a negotiation outcome
//! and never surface here. Only exhausting every strategy does.

use crate::segment::AllocationCommand;
use thiserror::Error;

/// Boxed error produced by a fallible element constructor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The segment could not satisfy an allocate-new request.
    #[error("out of memory: requested {requested} bytes, {available} bytes free")]
    OutOfMemory { requested: usize, available: usize },

    /// Bounds-checked access past the end of a container.
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    /// Requested element count exceeds what the allocator can ever address.
    #[error("capacity overflow: {requested} elements exceeds maximum of {max}")]
    CapacityOverflow { requested: usize, max: usize },

    #[error("alignment {align} exceeds segment alignment {max}")]
    UnsupportedAlignment { align: usize, max: usize },

    /// A single-shot allocator was asked for something other than allocate-new.
    #[error("allocation command {command:?} is not supported by this allocator")]
    UnsupportedCommand { command: AllocationCommand },

    #[error("block at offset {offset} is not owned by this segment")]
    InvalidBlock { offset: usize },

    #[error("invalid allocation request: {0}")]
    InvalidRequest(String),

    /// An element constructor reported failure; already-applied work was rolled back.
    #[error("element construction failed at index {index}: {source}")]
    Construction {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("node pool free list is corrupt: {0}")]
    CorruptFreeList(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures caused by the segment running dry.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }

    pub(crate) fn construction<E: Into<BoxError>>(index: usize, source: E) -> Self {
        Error::Construction {
            index,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_message_names_index_and_len() {
        let err = Error::OutOfRange { index: 7, len: 3 };
        assert_eq!(err.to_string(), "index 7 out of range for length 3");
    }

    #[test]
    fn construction_keeps_source() {
        let err = Error::construction(2, "bad value");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_out_of_memory());
    }
}
