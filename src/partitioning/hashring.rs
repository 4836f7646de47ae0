//! Consistent hashing implementation with virtual nodes.
//!
//! The ring assigns each segment of the key space an ordered list of owners.
//! Segments sit at evenly spaced positions on the ring; each physical node is
//! represented by multiple virtual nodes (vnodes) so that segments spread
//! evenly and only a small share of them move when membership changes.

use crate::config::SchedulerConfig;
use crate::partitioning::ownership::OwnershipSnapshot;
use crate::types::{NodeId, SegmentId, TopologyId};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Number of virtual nodes per physical node.
/// More vnodes = more even distribution but higher memory usage.
pub const DEFAULT_VNODES_PER_NODE: usize = 256;

/// A consistent hash ring for assigning segments to nodes.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual nodes mapped to their owning physical nodes.
    /// The key is the hash position on the ring, value is the node ID.
    vnodes: BTreeMap<u64, NodeId>,

    /// Number of virtual nodes per physical node.
    vnodes_per_node: usize,

    /// Number of owners per segment.
    num_owners: usize,

    /// List of physical nodes in the ring.
    nodes: Vec<NodeId>,
}

impl HashRing {
    /// Create a new empty hash ring.
    pub fn new(num_owners: usize) -> Self {
        Self::with_vnodes(num_owners, DEFAULT_VNODES_PER_NODE)
    }

    /// Create a new hash ring with custom vnode count.
    pub fn with_vnodes(num_owners: usize, vnodes_per_node: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
            num_owners: num_owners.max(1),
            nodes: Vec::new(),
        }
    }

    /// Create an empty ring with the configured number of owners.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.num_owners)
    }

    /// Get the number of owners per segment.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// Get the number of physical nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all physical nodes in the ring.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Check if a node is in the ring.
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains(&node_id)
    }

    /// Add a node to the ring.
    pub fn add_node(&mut self, node_id: NodeId) {
        if self.nodes.contains(&node_id) {
            return;
        }

        self.nodes.push(node_id);
        self.nodes.sort();

        for i in 0..self.vnodes_per_node {
            self.vnodes.insert(Self::vnode_position(node_id, i), node_id);
        }
    }

    /// Remove a node from the ring.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if !self.nodes.contains(&node_id) {
            return;
        }

        self.nodes.retain(|&n| n != node_id);

        for i in 0..self.vnodes_per_node {
            self.vnodes.remove(&Self::vnode_position(node_id, i));
        }
    }

    /// Get up to `count` distinct owners starting at a ring position.
    /// The first node is the primary owner.
    fn owners_at(&self, position: u64, count: usize) -> Vec<NodeId> {
        if self.vnodes.is_empty() {
            return Vec::new();
        }

        let mut owners = Vec::with_capacity(count.min(self.nodes.len()));

        // Walk clockwise from the position, wrapping around once
        let iter = self.vnodes.range(position..).chain(self.vnodes.iter());

        for (_, &node_id) in iter {
            if !owners.contains(&node_id) {
                owners.push(node_id);
                if owners.len() >= count || owners.len() >= self.nodes.len() {
                    break;
                }
            }
        }

        owners
    }

    /// Ring position of a segment. Segments are evenly spaced.
    pub fn segment_position(segment: SegmentId, segment_count: u32) -> u64 {
        let width = u64::MAX / u64::from(segment_count.max(1));
        width.saturating_mul(u64::from(segment))
    }

    /// Get the owners (primary first) of a segment.
    pub fn segment_owners(&self, segment: SegmentId, segment_count: u32) -> Vec<NodeId> {
        self.owners_at(Self::segment_position(segment, segment_count), self.num_owners)
    }

    /// Get the primary owner of a segment.
    ///
    /// Returns None if the ring is empty.
    pub fn primary_owner(&self, segment: SegmentId, segment_count: u32) -> Option<NodeId> {
        self.owners_at(Self::segment_position(segment, segment_count), 1)
            .into_iter()
            .next()
    }

    /// Build an immutable ownership snapshot of the current ring.
    pub fn snapshot(&self, topology_id: TopologyId, segment_count: u32) -> OwnershipSnapshot {
        let segment_count = segment_count.max(1);
        let owners = (0..segment_count)
            .map(|segment| self.segment_owners(segment, segment_count))
            .collect();

        OwnershipSnapshot::from_parts(topology_id, self.nodes.clone(), owners)
    }

    /// Count primary segments per node.
    ///
    /// This is useful for testing/monitoring segment distribution.
    pub fn segment_distribution(&self, segment_count: u32) -> HashMap<NodeId, usize> {
        let mut distribution = HashMap::new();

        for segment in 0..segment_count {
            if let Some(owner) = self.primary_owner(segment, segment_count) {
                *distribution.entry(owner).or_insert(0) += 1;
            }
        }

        distribution
    }

    fn vnode_position(node_id: NodeId, index: usize) -> u64 {
        let vnode_key = format!("{}:{}", node_id, index);
        let mut hasher = XxHash64::with_seed(0);
        vnode_key.as_bytes().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(2);
        assert_eq!(ring.node_count(), 0);
        assert!(ring.primary_owner(0, 16).is_none());
        assert!(ring.segment_owners(3, 16).is_empty());
    }

    #[test]
    fn test_single_node_owns_everything() {
        let mut ring = HashRing::new(2);
        ring.add_node(1);

        for segment in 0..16 {
            assert_eq!(ring.segment_owners(segment, 16), vec![1]);
        }
    }

    #[test]
    fn test_owner_count() {
        let mut ring = HashRing::new(2);
        ring.add_node(1);
        ring.add_node(2);
        ring.add_node(3);

        for segment in 0..32 {
            let owners = ring.segment_owners(segment, 32);
            assert_eq!(owners.len(), 2);
            assert_ne!(owners[0], owners[1]);
        }
    }

    #[test]
    fn test_add_remove_node() {
        let mut ring = HashRing::new(1);
        ring.add_node(1);
        ring.add_node(2);
        assert!(ring.contains_node(1));

        ring.remove_node(1);
        assert!(!ring.contains_node(1));
        assert_eq!(ring.primary_owner(5, 16), Some(2));
    }

    #[test]
    fn test_minimal_movement() {
        let mut ring = HashRing::new(1);
        ring.add_node(1);
        ring.add_node(2);
        ring.add_node(3);
        let before = ring.snapshot(1, 256);

        ring.add_node(4);
        let after = ring.snapshot(2, 256);

        // Every moved segment must move to the new node
        for segment in 0..256 {
            let (from, to) = (before.primary_owner(segment), after.primary_owner(segment));
            if from != to {
                assert_eq!(to, Some(4));
            }
        }
    }

    #[test]
    fn test_distribution() {
        let mut ring = HashRing::new(2);
        ring.add_node(1);
        ring.add_node(2);
        ring.add_node(3);

        let distribution = ring.segment_distribution(3000);

        for &node in ring.nodes() {
            let count = distribution.get(&node).copied().unwrap_or(0);
            assert!(count > 600 && count < 1400, "Node {} has {} segments", node, count);
        }
    }

    #[test]
    fn test_duplicate_add() {
        let mut ring = HashRing::new(2);
        ring.add_node(1);
        ring.add_node(1);
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn test_snapshot_members() {
        let mut ring = HashRing::new(2);
        ring.add_node(2);
        ring.add_node(1);

        let snapshot = ring.snapshot(7, 8);
        assert_eq!(snapshot.topology_id(), 7);
        assert_eq!(snapshot.segment_count(), 8);
        assert_eq!(snapshot.members(), &[1, 2]);
    }
}
