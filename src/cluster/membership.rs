//! Membership sources and in-process topology delivery.
//!
//! A [`MembershipSource`] owns the authoritative [`OwnershipSnapshot`] and
//! delivers every transition to its listeners in two phases:
//!
//! 1. `Pre`: the old snapshot is still current. Listeners give up what they
//!    are about to lose before returning.
//! 2. `Post`: the new snapshot is current. Listeners pick up what they gained,
//!    possibly in the background.
//!
//! [`TopologyNotifier`] is the in-process implementation. It serializes
//! transitions and rejects snapshots that do not advance the topology id.

use crate::cluster::events::{TopologyChangedEvent, TopologyListener};
use crate::error::{Error, Result};
use crate::partitioning::{HashRing, OwnershipSnapshot};
use crate::reconcile::ReconciliationHandle;
use crate::types::{NodeId, TopologyId, TransitionPhase};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw id value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Source of ownership snapshots for the local node.
pub trait MembershipSource: Send + Sync + 'static {
    /// The local node.
    fn local_node(&self) -> NodeId;

    /// The snapshot currently in effect.
    fn current_topology(&self) -> Arc<OwnershipSnapshot>;

    /// Register a listener for subsequent transitions.
    fn add_listener(&self, listener: Arc<dyn TopologyListener>) -> ListenerId;

    /// Remove a listener. Returns false if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// In-process membership source driven by explicit snapshot installs.
pub struct TopologyNotifier {
    /// This node's ID.
    local_node: NodeId,

    /// The snapshot currently in effect.
    current: RwLock<Arc<OwnershipSnapshot>>,

    /// Registered listeners, in registration order.
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TopologyListener>)>>,

    next_listener_id: AtomicU64,

    /// Held for the duration of a transition.
    transition: tokio::sync::Mutex<()>,
}

impl TopologyNotifier {
    /// Create a notifier with an initial snapshot.
    pub fn new(local_node: NodeId, initial: OwnershipSnapshot) -> Arc<Self> {
        Arc::new(Self {
            local_node,
            current: RwLock::new(Arc::new(initial)),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            transition: tokio::sync::Mutex::new(()),
        })
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Topology id currently in effect.
    pub fn topology_id(&self) -> TopologyId {
        self.current.read().topology_id()
    }

    /// Install a new snapshot.
    ///
    /// Every listener sees the `Pre` event and finishes its pre-apply work
    /// before the snapshot is swapped. Returns the handles of the `Post`
    /// reconciliations, which may still be running.
    pub async fn install(&self, next: OwnershipSnapshot) -> Result<Vec<ReconciliationHandle>> {
        let _transition = self.transition.lock().await;

        let old = Arc::clone(&self.current.read());
        if next.topology_id() <= old.topology_id() {
            return Err(Error::StaleTopology {
                current: old.topology_id(),
                proposed: next.topology_id(),
            });
        }
        let new = Arc::new(next);
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        info!(
            node_id = self.local_node,
            from = old.topology_id(),
            to = new.topology_id(),
            listeners = listeners.len(),
            "Installing topology"
        );

        let pre = TopologyChangedEvent::new(
            TransitionPhase::Pre,
            Arc::clone(&old),
            Arc::clone(&new),
            self.local_node,
        );
        for listener in &listeners {
            let outcome = listener.topology_changed(&pre).wait().await;
            debug!(topology_id = new.topology_id(), ?outcome, "Pre-apply listener done");
        }

        *self.current.write() = Arc::clone(&new);

        let post = TopologyChangedEvent::new(TransitionPhase::Post, old, new, self.local_node);
        Ok(listeners
            .iter()
            .map(|listener| listener.topology_changed(&post))
            .collect())
    }

    /// Install the ring's ownership as the next topology.
    ///
    /// The segment count is kept from the current snapshot.
    pub async fn install_ring(&self, ring: &HashRing) -> Result<Vec<ReconciliationHandle>> {
        let (topology_id, segment_count) = {
            let current = self.current.read();
            (current.topology_id() + 1, current.segment_count())
        };
        self.install(ring.snapshot(topology_id, segment_count)).await
    }
}

impl MembershipSource for TopologyNotifier {
    fn local_node(&self) -> NodeId {
        self.local_node
    }

    fn current_topology(&self) -> Arc<OwnershipSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn add_listener(&self, listener: Arc<dyn TopologyListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        debug!(node_id = self.local_node, listener = id.get(), "Topology listener added");
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if removed {
            debug!(node_id = self.local_node, listener = id.get(), "Topology listener removed");
        }
        removed
    }
}

impl std::fmt::Debug for TopologyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyNotifier")
            .field("local_node", &self.local_node)
            .field("topology_id", &self.topology_id())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
