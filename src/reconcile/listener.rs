//! Topology listener that keeps the entry scheduler aligned with ownership.
//!
//! ```text
//!   Pre  (losing)  ──► cancel in-flight scheduling pass
//!                  ──► install old ∩ new, disarm the rest   (blocking pool)
//!
//!   Post (gaining) ──► install new
//!                  ──► submit scheduling pass for new \ old  (worker)
//! ```

use crate::cluster::{ListenerId, MembershipSource, TopologyChangedEvent, TopologyListener};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::locality::SegmentLocality;
use crate::metrics::SchedulerMetrics;
use crate::partitioning::KeyPartitioner;
use crate::reconcile::detector::OwnershipTransition;
use crate::reconcile::executor::ReconciliationExecutor;
use crate::reconcile::handle::{ReconcileOutcome, ReconciliationHandle};
use crate::scheduler::{EntryScheduler, EntrySource, ScheduleReport};
use crate::types::EntryId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The two reconciliation operations run on ownership changes.
pub trait ReconciliationTasks<K: ?Sized>: Send + Sync + 'static {
    /// Disarm everything `retained` does not own and gate future arms by it.
    ///
    /// Runs on the blocking pool during the pre-apply notification, which
    /// completes only once this returns. Returns the number of entries
    /// disarmed.
    fn cancel(&self, retained: &SegmentLocality<K>) -> usize;

    /// Gate future arms by `new`. Runs inline on the post-apply notification.
    fn install(&self, _new: &SegmentLocality<K>) {}

    /// Arm every entry `new` owns and `old` did not.
    ///
    /// Runs on the reconciliation worker and should return promptly once
    /// `cancel` fires.
    fn schedule(
        &self,
        old: &SegmentLocality<K>,
        new: &SegmentLocality<K>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport>;
}

/// Reconciliation against an [`EntryScheduler`] fed by an [`EntrySource`].
pub struct EntryReconciler<K: EntryId> {
    scheduler: Arc<EntryScheduler<K>>,
    source: Arc<dyn EntrySource<K>>,
}

impl<K: EntryId> EntryReconciler<K> {
    /// Create a reconciler.
    pub fn new(scheduler: Arc<EntryScheduler<K>>, source: Arc<dyn EntrySource<K>>) -> Self {
        Self { scheduler, source }
    }

    /// The scheduler being reconciled.
    pub fn scheduler(&self) -> &Arc<EntryScheduler<K>> {
        &self.scheduler
    }
}

impl<K: EntryId> ReconciliationTasks<K> for EntryReconciler<K> {
    fn cancel(&self, retained: &SegmentLocality<K>) -> usize {
        self.scheduler
            .cancel_unowned(retained.topology_id(), Arc::new(retained.clone()))
    }

    fn install(&self, new: &SegmentLocality<K>) {
        self.scheduler
            .install_locality(new.topology_id(), Arc::new(new.clone()));
    }

    fn schedule(
        &self,
        old: &SegmentLocality<K>,
        new: &SegmentLocality<K>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport> {
        self.scheduler
            .reconcile_schedule(old, new, self.source.as_ref(), cancel)
    }
}

/// Drives [`ReconciliationTasks`] from topology transitions.
pub struct SchedulerTopologyListener<K: ?Sized + 'static> {
    membership: Arc<dyn MembershipSource>,
    partitioner: Arc<dyn KeyPartitioner<K>>,
    tasks: Arc<dyn ReconciliationTasks<K>>,
    executor: Arc<ReconciliationExecutor>,
    runtime: Handle,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
}

impl<K: ?Sized + 'static> SchedulerTopologyListener<K> {
    /// Create a listener. Its reconciliation worker runs on `runtime`.
    pub fn new(
        membership: Arc<dyn MembershipSource>,
        partitioner: Arc<dyn KeyPartitioner<K>>,
        tasks: Arc<dyn ReconciliationTasks<K>>,
        config: SchedulerConfig,
        runtime: &Handle,
        metrics: Arc<SchedulerMetrics>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if partitioner.segment_count() != config.segment_count {
            return Err(Error::Config(format!(
                "partitioner has {} segments, config has {}",
                partitioner.segment_count(),
                config.segment_count
            )));
        }

        let executor = Arc::new(ReconciliationExecutor::start(
            config.worker_name.clone(),
            runtime,
            Arc::clone(&metrics),
        ));

        Ok(Arc::new(Self {
            membership,
            partitioner,
            tasks,
            executor,
            runtime: runtime.clone(),
            config,
            metrics,
        }))
    }

    /// Get the reconciliation executor.
    pub fn executor(&self) -> &Arc<ReconciliationExecutor> {
        &self.executor
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    /// Locality of the local node under the membership's current topology.
    pub fn current_locality(&self) -> SegmentLocality<K> {
        SegmentLocality::new(
            Arc::clone(&self.partitioner),
            &self.membership.current_topology(),
            self.membership.local_node(),
        )
    }

    /// Subscribe to the membership source.
    ///
    /// The current topology is applied first, disarming anything the local
    /// node does not own.
    pub fn register(self: &Arc<Self>) -> ListenerRegistration {
        let locality = self.current_locality();
        let cancelled = self.tasks.cancel(&locality);
        self.metrics.owned_segments.set(locality.segments().len() as i64);

        let listener: Arc<dyn TopologyListener> = Arc::clone(self) as Arc<dyn TopologyListener>;
        let id = self.membership.add_listener(listener);

        info!(
            node_id = locality.node_id(),
            topology_id = locality.topology_id(),
            segments = locality.segments().len(),
            cancelled,
            "Scheduler topology listener registered"
        );

        ListenerRegistration {
            inner: Some(Registration {
                membership: Arc::clone(&self.membership),
                id,
                executor: Arc::clone(&self.executor),
                stop_timeout: self.config.stop_timeout,
            }),
        }
    }

    fn on_losing(&self, retained: SegmentLocality<K>, lost: usize) -> ReconciliationHandle {
        if self.executor.cancel_current() {
            debug!(topology_id = retained.topology_id(), "Cancelled in-flight scheduling pass");
        }

        let (handle, done) = ReconciliationHandle::pending(Uuid::new_v4());
        let tasks = Arc::clone(&self.tasks);
        let metrics = Arc::clone(&self.metrics);
        let warn_threshold = self.config.cancel_warn_threshold;

        self.runtime.spawn_blocking(move || {
            let started = Instant::now();
            let cancelled = tasks.cancel(&retained);
            let elapsed = started.elapsed();

            metrics.record_cancel_pass(elapsed);
            metrics.owned_segments.set(retained.segments().len() as i64);

            if elapsed > warn_threshold {
                metrics.slow_cancel_passes.inc();
                warn!(
                    node_id = retained.node_id(),
                    topology_id = retained.topology_id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = warn_threshold.as_millis() as u64,
                    "Slow cancellation pass delayed topology transition"
                );
            }

            info!(
                node_id = retained.node_id(),
                topology_id = retained.topology_id(),
                segments = lost,
                cancelled,
                "Cancelled entries in lost segments"
            );

            let _ = done.send(ReconcileOutcome::Cancelled { entries: cancelled });
        });

        handle
    }

    fn on_gained(
        &self,
        old: SegmentLocality<K>,
        new: SegmentLocality<K>,
        gained: usize,
    ) -> ReconciliationHandle {
        self.tasks.install(&new);
        self.metrics.owned_segments.set(new.segments().len() as i64);

        let (node_id, topology_id) = (new.node_id(), new.topology_id());
        let tasks = Arc::clone(&self.tasks);
        match self
            .executor
            .submit(move |cancel| tasks.schedule(&old, &new, cancel))
        {
            Ok(handle) => {
                info!(
                    node_id,
                    topology_id,
                    segments = gained,
                    reconciliation_id = ?handle.id(),
                    "Scheduling entries in gained segments"
                );
                handle
            }
            Err(e) => {
                debug!(node_id, topology_id, error = %e, "Scheduling pass not submitted");
                ReconciliationHandle::ready(ReconcileOutcome::Rejected)
            }
        }
    }
}

impl<K: ?Sized + 'static> TopologyListener for SchedulerTopologyListener<K> {
    fn topology_changed(&self, event: &TopologyChangedEvent) -> ReconciliationHandle {
        if event.is_pre() && event.is_local_leave() {
            warn!(
                node_id = event.local_node,
                topology_id = event.topology_id(),
                "Local node leaving topology, disarming every entry"
            );
        }

        match OwnershipTransition::detect(event, &self.partitioner) {
            OwnershipTransition::Unchanged => {
                debug!(
                    node_id = event.local_node,
                    topology_id = event.topology_id(),
                    phase = %event.phase,
                    "Ownership unchanged"
                );
                ReconciliationHandle::ready(ReconcileOutcome::Noop)
            }
            OwnershipTransition::Losing { retained, lost } => self.on_losing(retained, lost.len()),
            OwnershipTransition::Gained { old, new, gained } => {
                self.on_gained(old, new, gained.len())
            }
        }
    }
}

impl<K: ?Sized + 'static> std::fmt::Debug for SchedulerTopologyListener<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerTopologyListener")
            .field("node_id", &self.membership.local_node())
            .field("executor", &self.executor)
            .finish()
    }
}

struct Registration {
    membership: Arc<dyn MembershipSource>,
    id: ListenerId,
    executor: Arc<ReconciliationExecutor>,
    stop_timeout: Duration,
}

/// Active subscription of a [`SchedulerTopologyListener`].
///
/// Closing unsubscribes and stops the reconciliation worker. Dropping without
/// closing unsubscribes and cancels in-flight work without waiting.
#[derive(Default)]
pub struct ListenerRegistration {
    inner: Option<Registration>,
}

impl ListenerRegistration {
    /// Check if the registration is still active.
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Unsubscribe and wait up to the configured stop timeout for an
    /// in-flight scheduling pass to stop.
    ///
    /// Returns false if the pass had to be abandoned.
    pub async fn close(mut self) -> bool {
        let Some(registration) = self.inner.take() else {
            return true;
        };

        registration.membership.remove_listener(registration.id);
        let clean = registration
            .executor
            .shutdown(registration.stop_timeout)
            .await;
        info!(listener = registration.id.get(), clean, "Scheduler topology listener closed");
        clean
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(registration) = self.inner.take() {
            registration.membership.remove_listener(registration.id);
            registration.executor.shutdown_now();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("listener", &self.inner.as_ref().map(|r| r.id))
            .finish()
    }
}
