//! Core types used throughout the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Node identifier in the cluster.
pub type NodeId = u64;

/// Index of one segment of the hash-partitioned key space, in `[0, segment_count)`.
pub type SegmentId = u32;

/// Monotonic version of an ownership snapshot.
pub type TopologyId = u64;

/// Identity of a schedulable entry.
pub trait EntryId: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> EntryId for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Phase of a topology transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionPhase {
    /// The new ownership is about to be applied; the old one is still authoritative.
    Pre,
    /// The new ownership is now authoritative.
    Post,
}

impl TransitionPhase {
    /// Check if this is the pre-apply phase.
    pub fn is_pre(&self) -> bool {
        matches!(self, TransitionPhase::Pre)
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPhase::Pre => "pre",
            TransitionPhase::Post => "post",
        }
    }
}

impl std::fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_labels() {
        assert!(TransitionPhase::Pre.is_pre());
        assert!(!TransitionPhase::Post.is_pre());
        assert_eq!(TransitionPhase::Post.to_string(), "post");
    }
}
