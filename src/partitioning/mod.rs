//! Partitioning of the key space into segments and segment ownership.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  entry id ──► KeyPartitioner ──► SegmentId (0..N)           │
//! │                                                             │
//! │  HashRing (vnodes) ──► OwnershipSnapshot                    │
//! │                          segment 0 → [node 2, node 1]       │
//! │                          segment 1 → [node 1, node 3]       │
//! │                          ...                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use crema_scheduler::partitioning::{HashPartitioner, HashRing, KeyPartitioner};
//!
//! let mut ring = HashRing::new(2);
//! ring.add_node(1);
//! ring.add_node(2);
//!
//! let snapshot = ring.snapshot(1, 64);
//! let partitioner = HashPartitioner::new(64);
//!
//! let segment = partitioner.segment("session-42");
//! let primary = snapshot.primary_owner(segment);
//! assert!(primary.is_some());
//! ```

mod hashring;
mod ownership;
mod partitioner;

pub use hashring::{HashRing, DEFAULT_VNODES_PER_NODE};
pub use ownership::{OwnershipSnapshot, SnapshotBuilder};
pub use partitioner::{HashPartitioner, KeyPartitioner};
