//! Node chains - the unit of bulk allocation and release

use crate::offset_ptr::OffsetPtr;
use smallvec::SmallVec;

/// A batch of individually allocated nodes.
///
/// Returned by bulk allocation and consumed by bulk release. Nodes dropped
/// with the chain are not lost to the segment, only to the pool until it is
/// destroyed.
#[must_use = "nodes in a dropped chain stay allocated until the pool is destroyed"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChain<T> {
    nodes: SmallVec<[OffsetPtr<T>; 16]>,
}

impl<T> NodeChain<T> {
    pub fn new() -> Self {
        Self {
            nodes: SmallVec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SmallVec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, node: OffsetPtr<T>) {
        self.nodes.push(node);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<OffsetPtr<T>> {
        self.nodes.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn as_slice(&self) -> &[OffsetPtr<T>] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = OffsetPtr<T>> + '_ {
        self.nodes.iter().copied()
    }

    /// Append every node of `other`.
    pub fn splice(&mut self, other: NodeChain<T>) {
        self.nodes.extend(other.nodes);
    }

    pub fn cast<U>(self) -> NodeChain<U> {
        self.nodes.into_iter().map(OffsetPtr::cast).collect()
    }
}

impl<T> Default for NodeChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<OffsetPtr<T>> for NodeChain<T> {
    fn from_iter<I: IntoIterator<Item = OffsetPtr<T>>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for NodeChain<T> {
    type Item = OffsetPtr<T>;
    type IntoIter = smallvec::IntoIter<[OffsetPtr<T>; 16]>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}
