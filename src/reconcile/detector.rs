//! Classification of a topology event into the reconciliation it needs.

use crate::cluster::TopologyChangedEvent;
use crate::locality::SegmentLocality;
use crate::partitioning::KeyPartitioner;
use crate::types::SegmentId;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Reconciliation required by one phase of a transition.
#[derive(Debug)]
pub enum OwnershipTransition<K: ?Sized> {
    /// Nothing to do in this phase.
    Unchanged,

    /// Pre-apply: segments are about to be lost.
    Losing {
        /// Segments owned before and after the transition.
        retained: SegmentLocality<K>,
        /// Segments about to be lost.
        lost: BTreeSet<SegmentId>,
    },

    /// Post-apply: segments were gained.
    Gained {
        /// Locality before the transition.
        old: SegmentLocality<K>,
        /// Locality after the transition.
        new: SegmentLocality<K>,
        /// Segments gained.
        gained: BTreeSet<SegmentId>,
    },
}

impl<K: ?Sized + 'static> OwnershipTransition<K> {
    /// Classify `event` for the local node.
    ///
    /// Losses are handled before the new topology applies and gains after,
    /// so the node never acts on a segment it does not own in both views.
    pub fn detect(event: &TopologyChangedEvent, partitioner: &Arc<dyn KeyPartitioner<K>>) -> Self {
        let old = SegmentLocality::new(Arc::clone(partitioner), &event.old, event.local_node);
        let new = SegmentLocality::new(Arc::clone(partitioner), &event.new, event.local_node);

        if event.is_pre() {
            if new.contains_all(&old) {
                return OwnershipTransition::Unchanged;
            }
            let lost = new.no_longer_owned_relative_to(&old).segments().clone();
            OwnershipTransition::Losing {
                retained: new.retained_from(&old),
                lost,
            }
        } else {
            if old.contains_all(&new) {
                return OwnershipTransition::Unchanged;
            }
            let gained = new.newly_owned_relative_to(&old).segments().clone();
            OwnershipTransition::Gained { old, new, gained }
        }
    }

    /// Check if the phase needs no work.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, OwnershipTransition::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::OwnershipSnapshot;
    use crate::testing::ModuloPartitioner;
    use crate::types::TransitionPhase;

    fn event(phase: TransitionPhase, old: &[SegmentId], new: &[SegmentId]) -> TopologyChangedEvent {
        let build = |topology_id, segments: &[SegmentId]| {
            let others: Vec<SegmentId> = (0..4).filter(|s| !segments.contains(s)).collect();
            Arc::new(
                OwnershipSnapshot::builder(topology_id, 4)
                    .primary(1, segments.iter().copied())
                    .primary(2, others)
                    .build()
                    .unwrap(),
            )
        };
        TopologyChangedEvent::new(phase, build(1, old), build(2, new), 1)
    }

    fn partitioner() -> Arc<dyn KeyPartitioner<u64>> {
        Arc::new(ModuloPartitioner::new(4))
    }

    #[test]
    fn test_pre_phase_detects_loss() {
        let transition =
            OwnershipTransition::detect(&event(TransitionPhase::Pre, &[0, 1], &[1, 2]), &partitioner());

        match transition {
            OwnershipTransition::Losing { retained, lost } => {
                assert_eq!(lost, BTreeSet::from([0]));
                assert_eq!(retained.segments(), &BTreeSet::from([1]));
                assert_eq!(retained.topology_id(), 2);
            }
            other => panic!("expected loss, got {other:?}"),
        }
    }

    #[test]
    fn test_post_phase_detects_gain() {
        let transition =
            OwnershipTransition::detect(&event(TransitionPhase::Post, &[0, 1], &[1, 2]), &partitioner());

        match transition {
            OwnershipTransition::Gained { old, new, gained } => {
                assert_eq!(gained, BTreeSet::from([2]));
                assert_eq!(old.topology_id(), 1);
                assert_eq!(new.segments(), &BTreeSet::from([1, 2]));
            }
            other => panic!("expected gain, got {other:?}"),
        }
    }

    #[test]
    fn test_gain_only_needs_nothing_before_apply() {
        let pre = OwnershipTransition::detect(&event(TransitionPhase::Pre, &[1], &[1, 2]), &partitioner());
        assert!(pre.is_unchanged());
    }

    #[test]
    fn test_loss_only_needs_nothing_after_apply() {
        let post =
            OwnershipTransition::detect(&event(TransitionPhase::Post, &[1, 2], &[1]), &partitioner());
        assert!(post.is_unchanged());
    }

    #[test]
    fn test_identical_ownership_is_unchanged() {
        for phase in [TransitionPhase::Pre, TransitionPhase::Post] {
            let transition =
                OwnershipTransition::detect(&event(phase, &[0, 3], &[0, 3]), &partitioner());
            assert!(transition.is_unchanged());
        }
    }

    #[test]
    fn test_leaving_node_loses_everything() {
        let old = Arc::new(
            OwnershipSnapshot::builder(1, 4)
                .primary(1, [0, 1])
                .primary(2, [2, 3])
                .build()
                .unwrap(),
        );
        let new = Arc::new(
            OwnershipSnapshot::builder(2, 4)
                .primary(2, [0, 1, 2, 3])
                .build()
                .unwrap(),
        );
        let event = TopologyChangedEvent::new(TransitionPhase::Pre, old, new, 1);

        match OwnershipTransition::detect(&event, &partitioner()) {
            OwnershipTransition::Losing { retained, lost } => {
                assert!(retained.segments().is_empty());
                assert_eq!(lost, BTreeSet::from([0, 1]));
            }
            other => panic!("expected loss, got {other:?}"),
        }
    }
}
