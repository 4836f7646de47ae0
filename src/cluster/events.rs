//! Topology change events.

use crate::partitioning::OwnershipSnapshot;
use crate::reconcile::ReconciliationHandle;
use crate::types::{NodeId, TopologyId, TransitionPhase};
use std::sync::Arc;

/// A topology transition, delivered once before and once after it is applied.
#[derive(Debug, Clone)]
pub struct TopologyChangedEvent {
    /// Whether the new topology is about to be applied or has been applied.
    pub phase: TransitionPhase,
    /// Topology before the transition.
    pub old: Arc<OwnershipSnapshot>,
    /// Topology after the transition.
    pub new: Arc<OwnershipSnapshot>,
    /// The node receiving the event.
    pub local_node: NodeId,
}

impl TopologyChangedEvent {
    /// Create an event.
    pub fn new(
        phase: TransitionPhase,
        old: Arc<OwnershipSnapshot>,
        new: Arc<OwnershipSnapshot>,
        local_node: NodeId,
    ) -> Self {
        Self {
            phase,
            old,
            new,
            local_node,
        }
    }

    /// Check if this is the pre-apply notification.
    pub fn is_pre(&self) -> bool {
        self.phase.is_pre()
    }

    /// Topology id after the transition.
    pub fn topology_id(&self) -> TopologyId {
        self.new.topology_id()
    }

    /// Check if the local node is leaving the cluster.
    pub fn is_local_leave(&self) -> bool {
        self.old.contains_member(self.local_node) && !self.new.contains_member(self.local_node)
    }
}

/// Listener for topology transitions.
///
/// Called on the task delivering the transition. The source waits for the
/// pre-apply handle to resolve before applying the new topology; post-apply
/// handles may resolve later.
pub trait TopologyListener: Send + Sync + 'static {
    /// Called for each phase of a transition.
    fn topology_changed(&self, event: &TopologyChangedEvent) -> ReconciliationHandle;
}
