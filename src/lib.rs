//! Topology-driven ownership scheduler.
//!
//! Entries with a deadline (session expiry, lease timeouts, delayed jobs)
//! are stored across a cluster partitioned into segments. Exactly one node,
//! the primary owner of an entry's segment, keeps a timer for it. This crate
//! keeps a node's armed timers aligned with ownership as the topology changes:
//!
//! - **Before** a new topology applies, entries in segments the node is about
//!   to lose are disarmed, synchronously, so no two nodes fire the same entry.
//! - **After** it applies, entries in newly gained segments are enumerated and
//!   armed in the background, one pass at a time; a newer topology cancels an
//!   older pass.
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_scheduler::cluster::TopologyNotifier;
//! use crema_scheduler::partitioning::{HashPartitioner, HashRing};
//! use crema_scheduler::reconcile::{EntryReconciler, SchedulerTopologyListener};
//! use crema_scheduler::scheduler::{EntryHandler, EntryScheduler, EntrySource};
//! use crema_scheduler::{SchedulerConfig, SchedulerMetrics};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run(
//! #     handler: Arc<dyn EntryHandler<String>>,
//! #     store: Arc<dyn EntrySource<String>>,
//! # ) -> crema_scheduler::Result<()> {
//! let config = SchedulerConfig::new().with_segment_count(256);
//!
//! let mut ring = HashRing::from_config(&config);
//! ring.add_node(1);
//! let notifier = TopologyNotifier::new(1, ring.snapshot(1, config.segment_count));
//!
//! let runtime = tokio::runtime::Handle::current();
//! let metrics = Arc::new(SchedulerMetrics::new());
//! let scheduler = Arc::new(EntryScheduler::with_metrics(
//!     handler,
//!     runtime.clone(),
//!     Arc::clone(&metrics),
//! ));
//! let listener = SchedulerTopologyListener::<String>::new(
//!     notifier.clone(),
//!     Arc::new(HashPartitioner::new(config.segment_count)),
//!     Arc::new(EntryReconciler::new(Arc::clone(&scheduler), store)),
//!     config,
//!     &runtime,
//!     metrics,
//! )?;
//! let registration = listener.register();
//!
//! // Arm on write; ignored if another node owns the session
//! scheduler.schedule_after("session-42".to_string(), Duration::from_secs(1800));
//!
//! // A second node joins: sessions it now owns are disarmed here first
//! ring.add_node(2);
//! notifier.install_ring(&ring).await?;
//!
//! registration.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ cluster          TopologyNotifier ── Pre / Post events ──┐   │
//! └──────────────────────────────────────────────────────────┼───┘
//!                                                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ reconcile        SchedulerTopologyListener                   │
//! │                    ├─ OwnershipTransition::detect            │
//! │                    ├─ cancel (awaited, pre-apply)            │
//! │                    └─ schedule ──► ReconciliationExecutor    │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ scheduler        EntryScheduler (DashMap of armed timers)    │
//! │ locality         SegmentLocality ◄── partitioning            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod locality;
pub mod metrics;
pub mod partitioning;
pub mod reconcile;
pub mod scheduler;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use types::{EntryId, NodeId, SegmentId, TopologyId, TransitionPhase};

// Re-export cluster types
pub use cluster::{
    ListenerId, MembershipSource, TopologyChangedEvent, TopologyListener, TopologyNotifier,
};

// Re-export partitioning types
pub use locality::{AlwaysLocal, Locality, SegmentLocality};
pub use partitioning::{HashPartitioner, HashRing, KeyPartitioner, OwnershipSnapshot};

// Re-export scheduler types
pub use scheduler::{
    EntryHandler, EntryScheduler, EntrySource, ScheduleCandidate, ScheduleReport, ScheduledTask,
};

// Re-export reconciliation types
pub use reconcile::{
    EntryReconciler, ExecutorState, ListenerRegistration, OwnershipTransition, ReconcileOutcome,
    ReconciliationExecutor, ReconciliationHandle, ReconciliationTasks, SchedulerTopologyListener,
};

// Re-export metrics types
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
