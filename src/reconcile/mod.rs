//! Reconciliation of armed entries with topology transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  Pre / Post   ┌───────────────────────────┐
//! │ MembershipSource │ ────────────► │ SchedulerTopologyListener │
//! └──────────────────┘               │   OwnershipTransition     │
//!                                    └─────┬───────────────┬─────┘
//!                       cancel (awaited)   │               │  schedule (submitted)
//!                                          ▼               ▼
//!                                 ┌─────────────────────────────────┐
//!                                 │ ReconciliationTasks             │
//!                                 │   EntryReconciler ──► scheduler │
//!                                 └─────────────────────────────────┘
//!                                                  ▲
//!                                 ReconciliationExecutor (one pass at a time,
//!                                 newest supersedes older)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_scheduler::cluster::TopologyNotifier;
//! use crema_scheduler::partitioning::{HashPartitioner, OwnershipSnapshot};
//! use crema_scheduler::reconcile::{EntryReconciler, SchedulerTopologyListener};
//! use crema_scheduler::scheduler::{EntryHandler, EntryScheduler, EntrySource};
//! use crema_scheduler::{SchedulerConfig, SchedulerMetrics};
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     handler: Arc<dyn EntryHandler<String>>,
//! #     source: Arc<dyn EntrySource<String>>,
//! # ) -> crema_scheduler::Result<()> {
//! let config = SchedulerConfig::new().with_segment_count(64);
//! let notifier = TopologyNotifier::new(1, OwnershipSnapshot::empty(0, 64));
//!
//! let runtime = tokio::runtime::Handle::current();
//! let scheduler = Arc::new(EntryScheduler::new(handler, runtime.clone()));
//! let listener = SchedulerTopologyListener::<String>::new(
//!     notifier.clone(),
//!     Arc::new(HashPartitioner::new(64)),
//!     Arc::new(EntryReconciler::new(scheduler, source)),
//!     config,
//!     &runtime,
//!     Arc::new(SchedulerMetrics::new()),
//! )?;
//!
//! let registration = listener.register();
//! // ... install topologies through the notifier ...
//! registration.close().await;
//! # Ok(())
//! # }
//! ```

mod detector;
mod executor;
mod handle;
mod listener;

pub use detector::OwnershipTransition;
pub use executor::{ExecutorState, ReconciliationExecutor};
pub use handle::{ReconcileOutcome, ReconciliationHandle};
pub use listener::{
    EntryReconciler, ListenerRegistration, ReconciliationTasks, SchedulerTopologyListener,
};
