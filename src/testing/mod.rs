//! Testing utilities for the ownership scheduler.
//!
//! This module provides:
//! - Test doubles for entry handlers, entry sources and partitioners
//! - [`TestNode`], one fully wired node driven by a [`TopologyNotifier`]
//! - Polling helpers for asynchronous assertions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        TestNode                          │
//! │                                                          │
//! │  TopologyNotifier ──► SchedulerTopologyListener          │
//! │                          │                               │
//! │                          ▼                               │
//! │                   EntryReconciler                        │
//! │                    │            │                        │
//! │                    ▼            ▼                        │
//! │        EntryScheduler    InMemoryEntrySource             │
//! │              │                                           │
//! │              ▼                                           │
//! │      RecordingHandler                                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use crema_scheduler::testing::{primary_snapshot, TestNode};
//! use crema_scheduler::SchedulerConfig;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! # async fn main() -> crema_scheduler::Result<()> {
//! let config = SchedulerConfig::new().with_segment_count(4);
//! let initial = primary_snapshot(1, 4, [(1, vec![0, 1]), (2, vec![2, 3])])?;
//! let mut node = TestNode::start(1, initial, config)?;
//!
//! node.put_entries(0..8, Duration::from_secs(3600));
//! assert_eq!(node.armed(), vec![0, 1, 4, 5]);
//!
//! node.install(primary_snapshot(2, 4, [(1, vec![1, 2]), (2, vec![0, 3])])?).await?;
//! assert_eq!(node.armed(), vec![1, 2, 5, 6]);
//!
//! node.close().await;
//! # Ok(())
//! # }
//! ```

mod fixtures;
mod utils;


pub use fixtures::{
    modulo_locality, primary_snapshot, InMemoryEntrySource, ModuloPartitioner, RecordingHandler,
};
pub use utils::{wait_for_result, wait_until};

use crate::cluster::TopologyNotifier;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::metrics::SchedulerMetrics;
use crate::partitioning::OwnershipSnapshot;
use crate::reconcile::{
    EntryReconciler, ListenerRegistration, ReconcileOutcome, ReconciliationHandle,
    SchedulerTopologyListener,
};
use crate::scheduler::EntryScheduler;
use crate::types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// One node with a scheduler kept in line with its own topology notifier.
///
/// Entry identities are `u64`, partitioned by [`ModuloPartitioner`].
pub struct TestNode {
    /// This node's ID.
    pub node_id: NodeId,

    /// Topology source driving the node.
    pub notifier: Arc<TopologyNotifier>,

    /// The node's scheduler.
    pub scheduler: Arc<EntryScheduler<u64>>,

    /// Backing entries enumerated by scheduling passes.
    pub source: Arc<InMemoryEntrySource<u64>>,

    /// Records fired entries.
    pub handler: Arc<RecordingHandler<u64>>,

    /// The topology listener.
    pub listener: Arc<SchedulerTopologyListener<u64>>,

    /// Metrics shared by the scheduler and the listener.
    pub metrics: Arc<SchedulerMetrics>,

    registration: Option<ListenerRegistration>,
}

impl TestNode {
    /// Wire up and register a node on the current runtime.
    pub fn start(node_id: NodeId, initial: OwnershipSnapshot, config: SchedulerConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("no tokio runtime: {e}")))?;

        let metrics = Arc::new(SchedulerMetrics::new());
        let handler: Arc<RecordingHandler<u64>> = Arc::new(RecordingHandler::new());
        let source: Arc<InMemoryEntrySource<u64>> = Arc::new(InMemoryEntrySource::new());
        let scheduler = Arc::new(EntryScheduler::<u64>::with_metrics(
            handler.clone(),
            runtime.clone(),
            Arc::clone(&metrics),
        ));

        let notifier = TopologyNotifier::new(node_id, initial);
        let listener = SchedulerTopologyListener::<u64>::new(
            notifier.clone(),
            Arc::new(ModuloPartitioner::new(config.segment_count)),
            Arc::new(EntryReconciler::new(Arc::clone(&scheduler), source.clone())),
            config,
            &runtime,
            Arc::clone(&metrics),
        )?;
        let registration = listener.register();

        Ok(Self {
            node_id,
            notifier,
            scheduler,
            source,
            handler,
            listener,
            metrics,
            registration: Some(registration),
        })
    }

    /// Store entries and arm the ones this node owns, as a write path would.
    pub fn put_entries(&self, ids: impl IntoIterator<Item = u64>, delay: Duration) {
        let deadline = Instant::now() + delay;
        for id in ids {
            self.source.insert(id, deadline);
            self.scheduler.schedule(id, deadline);
        }
    }

    /// Install a topology and wait for every post-apply reconciliation.
    pub async fn install(&self, snapshot: OwnershipSnapshot) -> Result<Vec<ReconcileOutcome>> {
        let handles = self.notifier.install(snapshot).await?;
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.wait().await);
        }
        Ok(outcomes)
    }

    /// Install a topology without waiting for post-apply reconciliation.
    pub async fn install_nowait(&self, snapshot: OwnershipSnapshot) -> Result<Vec<ReconciliationHandle>> {
        self.notifier.install(snapshot).await
    }

    /// Armed entries, sorted.
    pub fn armed(&self) -> Vec<u64> {
        let mut ids = self.scheduler.scheduled_ids();
        ids.sort_unstable();
        ids
    }

    /// Check if the listener is still registered.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Deregister the listener, waiting for in-flight reconciliation.
    pub async fn close(&mut self) -> bool {
        match self.registration.take() {
            Some(registration) => registration.close().await,
            None => true,
        }
    }
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("node_id", &self.node_id)
            .field("notifier", &self.notifier)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_test_node_start() {
        let initial = primary_snapshot(1, 4, [(1, vec![0, 1]), (2, vec![2, 3])]).unwrap();
        let config = SchedulerConfig::new().with_segment_count(4);
        let mut node = TestNode::start(1, initial, config).unwrap();

        assert!(node.is_registered());
        assert_eq!(node.notifier.listener_count(), 1);
        assert_eq!(node.scheduler.locality_topology(), Some(1));

        node.put_entries(0..4, Duration::from_secs(60));
        assert_eq!(node.armed(), vec![0, 1]);
        assert_eq!(node.source.len(), 4);

        assert!(node.close().await);
        assert!(!node.is_registered());
        assert!(node.close().await);
    }

    #[test]
    fn test_start_outside_runtime() {
        let initial = primary_snapshot(1, 4, [(1, vec![0, 1, 2, 3])]).unwrap();
        let config = SchedulerConfig::new().with_segment_count(4);
        assert!(matches!(
            TestNode::start(1, initial, config),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_primary_snapshot() {
        let snapshot = primary_snapshot(3, 4, [(1, vec![0, 2]), (2, vec![1, 3])]).unwrap();
        assert_eq!(snapshot.topology_id(), 3);
        assert_eq!(snapshot.primary_owner(2), Some(1));
        assert_eq!(snapshot.primary_owner(3), Some(2));
    }

    #[tokio::test]
    async fn test_wait_until() {
        let counter = Arc::new(AtomicUsize::new(0));
        let background = Arc::clone(&counter);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.store(1, Ordering::SeqCst);
        });

        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
        assert!(!wait_until(|| false, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_for_result() {
        let attempts = AtomicUsize::new(0);
        let result = wait_for_result(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { n }
            },
            |n| *n >= 3,
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(result, Some(3));
    }
}
