//! Immutable segment ownership snapshots.
//!
//! A snapshot is the membership source's answer to "who owns which segment
//! at topology T". The scheduler never mutates one; it only diffs the old and
//! new snapshot of a transition.

use crate::error::{Error, Result};
use crate::types::{NodeId, SegmentId, TopologyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Point-in-time ownership of every segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSnapshot {
    /// Monotonic version of this snapshot.
    topology_id: TopologyId,

    /// Cluster members, sorted.
    members: Vec<NodeId>,

    /// Owners per segment, primary first. Index is the segment id.
    segment_owners: Vec<Vec<NodeId>>,
}

impl OwnershipSnapshot {
    /// Create a validated snapshot.
    ///
    /// Every owner must be a member, and no segment may list an owner twice.
    pub fn new(
        topology_id: TopologyId,
        members: Vec<NodeId>,
        segment_owners: Vec<Vec<NodeId>>,
    ) -> Result<Self> {
        if segment_owners.is_empty() {
            return Err(Error::Config("snapshot must have at least one segment".into()));
        }

        let snapshot = Self::from_parts(topology_id, members, segment_owners);

        for (segment, owners) in snapshot.segment_owners.iter().enumerate() {
            for (i, owner) in owners.iter().enumerate() {
                if !snapshot.contains_member(*owner) {
                    return Err(Error::Config(format!(
                        "segment {} owner {} is not a member",
                        segment, owner
                    )));
                }
                if owners[..i].contains(owner) {
                    return Err(Error::Config(format!(
                        "segment {} lists owner {} twice",
                        segment, owner
                    )));
                }
            }
        }

        Ok(snapshot)
    }

    /// Create a snapshot without validation.
    pub(crate) fn from_parts(
        topology_id: TopologyId,
        mut members: Vec<NodeId>,
        segment_owners: Vec<Vec<NodeId>>,
    ) -> Self {
        members.sort_unstable();
        members.dedup();
        Self {
            topology_id,
            members,
            segment_owners,
        }
    }

    /// A snapshot with no members; every segment is unowned.
    pub fn empty(topology_id: TopologyId, segment_count: u32) -> Self {
        Self::from_parts(
            topology_id,
            Vec::new(),
            vec![Vec::new(); segment_count.max(1) as usize],
        )
    }

    /// Start building a snapshot from explicit primary assignments.
    pub fn builder(topology_id: TopologyId, segment_count: u32) -> SnapshotBuilder {
        SnapshotBuilder::new(topology_id, segment_count)
    }

    /// Get the topology id.
    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    /// Get the number of segments.
    pub fn segment_count(&self) -> u32 {
        self.segment_owners.len() as u32
    }

    /// Get the members of this topology.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// Check if a node is a member of this topology.
    pub fn contains_member(&self, node_id: NodeId) -> bool {
        self.members.binary_search(&node_id).is_ok()
    }

    /// Get the owners of a segment, primary first.
    pub fn owners(&self, segment: SegmentId) -> &[NodeId] {
        self.segment_owners
            .get(segment as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get the primary owner of a segment.
    pub fn primary_owner(&self, segment: SegmentId) -> Option<NodeId> {
        self.owners(segment).first().copied()
    }

    /// Segments for which `node_id` is the primary owner.
    ///
    /// Empty if the node is not a member of this topology.
    pub fn primary_segments_for(&self, node_id: NodeId) -> BTreeSet<SegmentId> {
        if !self.contains_member(node_id) {
            return BTreeSet::new();
        }
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.first() == Some(&node_id))
            .map(|(segment, _)| segment as SegmentId)
            .collect()
    }

}

/// Builder for snapshots with hand-picked primary owners.
#[derive(Debug)]
pub struct SnapshotBuilder {
    topology_id: TopologyId,
    members: Vec<NodeId>,
    segment_owners: Vec<Vec<NodeId>>,
    invalid: Option<Error>,
}

impl SnapshotBuilder {
    fn new(topology_id: TopologyId, segment_count: u32) -> Self {
        Self {
            topology_id,
            members: Vec::new(),
            segment_owners: vec![Vec::new(); segment_count.max(1) as usize],
            invalid: None,
        }
    }

    /// Add a member that may own nothing.
    pub fn member(mut self, node_id: NodeId) -> Self {
        self.members.push(node_id);
        self
    }

    /// Make `node_id` the primary owner of `segments`.
    ///
    /// A previous primary of the segment becomes its first backup.
    pub fn primary<I>(mut self, node_id: NodeId, segments: I) -> Self
    where
        I: IntoIterator<Item = SegmentId>,
    {
        self.members.push(node_id);
        let segment_count = self.segment_owners.len() as u32;
        for segment in segments {
            match self.segment_owners.get_mut(segment as usize) {
                Some(owners) => {
                    owners.retain(|&n| n != node_id);
                    owners.insert(0, node_id);
                }
                None => {
                    self.invalid.get_or_insert(Error::InvalidSegment {
                        segment,
                        segment_count,
                    });
                }
            }
        }
        self
    }

    /// Add `node_id` as a backup owner of `segments`.
    pub fn backup<I>(mut self, node_id: NodeId, segments: I) -> Self
    where
        I: IntoIterator<Item = SegmentId>,
    {
        self.members.push(node_id);
        let segment_count = self.segment_owners.len() as u32;
        for segment in segments {
            match self.segment_owners.get_mut(segment as usize) {
                Some(owners) if !owners.contains(&node_id) => owners.push(node_id),
                Some(_) => {}
                None => {
                    self.invalid.get_or_insert(Error::InvalidSegment {
                        segment,
                        segment_count,
                    });
                }
            }
        }
        self
    }

    /// Build and validate the snapshot.
    pub fn build(self) -> Result<OwnershipSnapshot> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        OwnershipSnapshot::new(self.topology_id, self.members, self.segment_owners)
    }
}
