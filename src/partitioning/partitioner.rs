//! Mapping of entry identities onto segments.

use crate::types::SegmentId;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Maps an entry identity to exactly one segment.
///
/// Implementations must be pure and stable for the lifetime of a ring
/// configuration: the same key always lands in the same segment.
pub trait KeyPartitioner<K: ?Sized>: Send + Sync + 'static {
    /// Total number of segments.
    fn segment_count(&self) -> u32;

    /// Segment that owns `key`.
    fn segment(&self, key: &K) -> SegmentId;
}

/// Partitioner that hashes keys with xxHash64 and reduces modulo the segment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPartitioner {
    segment_count: u32,
}

impl HashPartitioner {
    /// Create a partitioner over `segment_count` segments.
    ///
    /// A zero segment count is clamped to one.
    pub fn new(segment_count: u32) -> Self {
        Self {
            segment_count: segment_count.max(1),
        }
    }

    fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl<K: Hash + ?Sized> KeyPartitioner<K> for HashPartitioner {
    fn segment_count(&self) -> u32 {
        self.segment_count
    }

    fn segment(&self, key: &K) -> SegmentId {
        (Self::hash_key(key) % u64::from(self.segment_count)) as SegmentId
    }
}
