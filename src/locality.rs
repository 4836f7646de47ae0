//! Point-in-time answers to "does this node own the segment of key K".
//!
//! A [`SegmentLocality`] binds one ownership snapshot, a local node and a
//! partitioner. Two localities of a transition are compared through
//! [`SegmentLocality::newly_owned_relative_to`] and
//! [`SegmentLocality::no_longer_owned_relative_to`], which return further
//! localities rather than materialized key sets: keys are tested lazily
//! against the local working set.

use crate::partitioning::{KeyPartitioner, OwnershipSnapshot};
use crate::types::{NodeId, SegmentId, TopologyId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Ownership predicate over entry identities.
pub trait Locality<K: ?Sized>: Send + Sync {
    /// Check whether the local node is responsible for `key`.
    fn owns(&self, key: &K) -> bool;
}

/// Locality for a node that owns every key (non-clustered deployments).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLocal;

impl<K: ?Sized> Locality<K> for AlwaysLocal {
    fn owns(&self, _key: &K) -> bool {
        true
    }
}

/// Locality backed by the primary segments of one node in one snapshot.
pub struct SegmentLocality<K: ?Sized> {
    partitioner: Arc<dyn KeyPartitioner<K>>,
    segments: Arc<BTreeSet<SegmentId>>,
    topology_id: TopologyId,
    node_id: NodeId,
}

impl<K: ?Sized + 'static> SegmentLocality<K> {
    /// Locality of `node_id` under `snapshot`.
    ///
    /// A node that is not a member of the snapshot owns nothing.
    pub fn new(
        partitioner: Arc<dyn KeyPartitioner<K>>,
        snapshot: &OwnershipSnapshot,
        node_id: NodeId,
    ) -> Self {
        Self::with_segments(
            partitioner,
            snapshot.primary_segments_for(node_id),
            snapshot.topology_id(),
            node_id,
        )
    }

    /// Locality over an explicit segment set.
    pub fn with_segments(
        partitioner: Arc<dyn KeyPartitioner<K>>,
        segments: BTreeSet<SegmentId>,
        topology_id: TopologyId,
        node_id: NodeId,
    ) -> Self {
        Self {
            partitioner,
            segments: Arc::new(segments),
            topology_id,
            node_id,
        }
    }

    /// Topology this locality was computed from.
    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    /// The local node.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Owned segments.
    pub fn segments(&self) -> &BTreeSet<SegmentId> {
        &self.segments
    }

    /// Check whether a segment is owned.
    pub fn owns_segment(&self, segment: SegmentId) -> bool {
        self.segments.contains(&segment)
    }

    /// Check whether every segment owned by `other` is also owned here.
    pub fn contains_all(&self, other: &SegmentLocality<K>) -> bool {
        self.segments.is_superset(&other.segments)
    }

    /// Segment of a key under this locality's partitioner.
    pub fn segment_of(&self, key: &K) -> SegmentId {
        self.partitioner.segment(key)
    }

    /// Keys owned here but not under `old`.
    ///
    /// The result carries this locality's topology id.
    pub fn newly_owned_relative_to(&self, old: &SegmentLocality<K>) -> SegmentLocality<K> {
        self.derive(self.segments.difference(&old.segments).copied().collect())
    }

    /// Keys owned under `old` but not here.
    ///
    /// The result carries this locality's topology id.
    pub fn no_longer_owned_relative_to(&self, old: &SegmentLocality<K>) -> SegmentLocality<K> {
        self.derive(old.segments.difference(&self.segments).copied().collect())
    }

    /// Keys owned both here and under `other`.
    pub fn retained_from(&self, other: &SegmentLocality<K>) -> SegmentLocality<K> {
        self.derive(self.segments.intersection(&other.segments).copied().collect())
    }

    fn derive(&self, segments: BTreeSet<SegmentId>) -> SegmentLocality<K> {
        Self {
            partitioner: Arc::clone(&self.partitioner),
            segments: Arc::new(segments),
            topology_id: self.topology_id,
            node_id: self.node_id,
        }
    }
}

impl<K: ?Sized + 'static> Locality<K> for SegmentLocality<K> {
    fn owns(&self, key: &K) -> bool {
        self.segments.contains(&self.partitioner.segment(key))
    }
}

impl<K: ?Sized> Clone for SegmentLocality<K> {
    fn clone(&self) -> Self {
        Self {
            partitioner: Arc::clone(&self.partitioner),
            segments: Arc::clone(&self.segments),
            topology_id: self.topology_id,
            node_id: self.node_id,
        }
    }
}

impl<K: ?Sized> fmt::Debug for SegmentLocality<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentLocality")
            .field("topology_id", &self.topology_id)
            .field("node_id", &self.node_id)
            .field("segments", &self.segments)
            .finish()
    }
}
