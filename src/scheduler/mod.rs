//! Ownership-gated timers for entries with a deadline.
//!
//! The [`EntryScheduler`] keeps at most one armed timer per entry identity,
//! and only for entries the local node owns under the installed locality.
//!
//! # Architecture
//!
//! ```text
//! schedule(id) ──► locality.owns(id)? ──► tasks[id] vacant? ──► spawn timer
//!                        (read lock)            (shard lock)
//!
//! cancel_unowned(L) ──► install L (write lock) ──► retain(owned under L)
//!
//! timer ──► deadline ──► remove tasks[id] if same generation ──► handler.fire(id)
//! ```
//!
//! A timer only fires after removing its own entry, so a cancel that wins the
//! race leaves nothing for the timer to fire.

mod entry;

pub use entry::{EntryHandler, EntrySource, ScheduleCandidate, ScheduleReport, ScheduledTask};

use crate::error::{Error, Result};
use crate::locality::{AlwaysLocal, Locality, SegmentLocality};
use crate::metrics::SchedulerMetrics;
use crate::types::{EntryId, TopologyId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Locality currently gating `schedule`.
struct InstalledLocality<K> {
    /// None until a topology-derived locality is installed.
    topology_id: Option<TopologyId>,
    locality: Arc<dyn Locality<K>>,
}

/// Timer registry keyed by entry identity.
pub struct EntryScheduler<K: EntryId> {
    /// Armed entries.
    tasks: Arc<DashMap<K, ScheduledTask>>,

    /// Ownership predicate for new arms.
    locality: RwLock<InstalledLocality<K>>,

    handler: Arc<dyn EntryHandler<K>>,

    /// Runtime the timers run on.
    runtime: Handle,

    next_generation: AtomicU64,

    closed: AtomicBool,

    metrics: Arc<SchedulerMetrics>,
}

impl<K: EntryId> EntryScheduler<K> {
    /// Create a scheduler whose timers run on `runtime`.
    ///
    /// Until a locality is installed every entry is considered owned.
    pub fn new(handler: Arc<dyn EntryHandler<K>>, runtime: Handle) -> Self {
        Self::with_metrics(handler, runtime, Arc::new(SchedulerMetrics::new()))
    }

    /// Create a scheduler that reports into shared metrics.
    pub fn with_metrics(
        handler: Arc<dyn EntryHandler<K>>,
        runtime: Handle,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            locality: RwLock::new(InstalledLocality {
                topology_id: None,
                locality: Arc::new(AlwaysLocal),
            }),
            handler,
            runtime,
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Create a scheduler on the runtime of the calling task.
    pub fn try_current(handler: Arc<dyn EntryHandler<K>>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(handler, runtime))
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    /// Arm `id` to fire at `deadline`.
    ///
    /// Returns false without side effects if the entry is not owned under the
    /// installed locality, is already armed, or the scheduler is shut down.
    pub fn schedule(&self, id: K, deadline: Instant) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        // Held until the entry is inserted, so a concurrent bulk cancel either
        // sees the entry or installed its locality before the ownership check.
        let installed = self.locality.read();
        if !installed.locality.owns(&id) {
            self.metrics.schedule_not_owned.inc();
            trace!(?id, topology_id = ?installed.topology_id, "Not scheduling entry owned elsewhere");
            return false;
        }

        let (id, generation, token) = match self.tasks.entry(id) {
            Entry::Occupied(_) => {
                self.metrics.schedule_duplicate.inc();
                return false;
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                let token = CancellationToken::new();
                let id = vacant.key().clone();
                vacant.insert(ScheduledTask::new(generation, token.clone()));
                (id, generation, token)
            }
        };

        self.metrics.record_armed();
        trace!(?id, generation, "Entry armed");
        self.spawn_timer(id, generation, deadline, token);
        true
    }

    /// Arm `id` to fire after `delay`.
    pub fn schedule_after(&self, id: K, delay: Duration) -> bool {
        self.schedule(id, Instant::now() + delay)
    }

    /// Disarm `id`. Returns false if it was not armed.
    pub fn cancel(&self, id: &K) -> bool {
        match self.tasks.remove(id) {
            Some((_, task)) => {
                task.disarm();
                self.metrics.record_cancelled();
                trace!(?id, generation = task.generation(), "Entry cancelled");
                true
            }
            None => false,
        }
    }

    /// Install the locality that gates future `schedule` calls.
    ///
    /// Installs never move backwards: a locality from an older topology than
    /// the installed one is ignored and false is returned.
    pub fn install_locality(&self, topology_id: TopologyId, locality: Arc<dyn Locality<K>>) -> bool {
        let mut installed = self.locality.write();
        if let Some(current) = installed.topology_id {
            if topology_id < current {
                warn!(current, proposed = topology_id, "Ignoring locality from older topology");
                return false;
            }
        }
        installed.topology_id = Some(topology_id);
        installed.locality = locality;
        true
    }

    /// Install `locality` and disarm every entry it does not own.
    ///
    /// Returns the number of entries disarmed.
    pub fn cancel_unowned(&self, topology_id: TopologyId, locality: Arc<dyn Locality<K>>) -> usize {
        if !self.install_locality(topology_id, Arc::clone(&locality)) {
            return 0;
        }

        let mut cancelled = 0;
        self.tasks.retain(|id, task| {
            if locality.owns(id) {
                return true;
            }
            task.disarm();
            trace!(?id, generation = task.generation(), "Entry no longer owned, cancelled");
            cancelled += 1;
            false
        });

        self.metrics.record_cancelled_many(cancelled as u64);
        debug!(topology_id, cancelled, remaining = self.tasks.len(), "Cancelled unowned entries");
        cancelled
    }

    /// Arm every entry `new` owns and `old` did not.
    ///
    /// Candidates come from `source`, which is blocking; call this off the
    /// async workers. The pass stops between candidates once `cancel` fires.
    #[tracing::instrument(
        skip_all,
        fields(node_id = new.node_id(), topology_id = new.topology_id())
    )]
    pub fn reconcile_schedule(
        &self,
        old: &SegmentLocality<K>,
        new: &SegmentLocality<K>,
        source: &dyn EntrySource<K>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport> {
        let gained = new.newly_owned_relative_to(old);
        let mut report = ScheduleReport::default();
        if gained.segments().is_empty() {
            return Ok(report);
        }

        debug!(segments = ?gained.segments(), "Scheduling newly owned entries");

        for candidate in source.enumerate(&gained)? {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let candidate = candidate?;
            report.visited += 1;

            if !gained.owns(&candidate.id) {
                report.skipped += 1;
                continue;
            }
            if self.schedule(candidate.id, candidate.deadline) {
                report.armed += 1;
            } else {
                report.skipped += 1;
            }
        }

        debug!(
            visited = report.visited,
            armed = report.armed,
            interrupted = report.interrupted,
            "Scheduling pass finished"
        );
        Ok(report)
    }

    /// Number of armed entries.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no entries are armed.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check if `id` is armed.
    pub fn contains(&self, id: &K) -> bool {
        self.tasks.contains_key(id)
    }

    /// Identities of all armed entries.
    pub fn scheduled_ids(&self) -> Vec<K> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Topology of the installed locality, if one was installed.
    pub fn locality_topology(&self) -> Option<TopologyId> {
        self.locality.read().topology_id
    }

    /// Check if the scheduler has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Disarm everything and refuse further arms.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let cancelled = self.disarm_all();
        debug!(cancelled, "Entry scheduler shut down");
        cancelled
    }

    fn disarm_all(&self) -> usize {
        let mut cancelled = 0;
        self.tasks.retain(|_, task| {
            task.disarm();
            cancelled += 1;
            false
        });
        self.metrics.record_cancelled_many(cancelled as u64);
        cancelled
    }

    fn spawn_timer(&self, id: K, generation: u64, deadline: Instant, token: CancellationToken) {
        let tasks = Arc::clone(&self.tasks);
        let handler = Arc::clone(&self.handler);
        let metrics = Arc::clone(&self.metrics);

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // A cancel or re-arm that won the race leaves nothing to remove
                    if tasks.remove_if(&id, |_, task| task.generation() == generation).is_some() {
                        metrics.record_fired();
                        trace!(?id, generation, "Entry fired");
                        handler.fire(id).await;
                    }
                }
            }
        });
    }
}

impl<K: EntryId> std::fmt::Debug for EntryScheduler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryScheduler")
            .field("armed", &self.tasks.len())
            .field("topology_id", &self.locality_topology())
            .field("closed", &self.is_shutdown())
            .finish()
    }
}

impl<K: EntryId> Drop for EntryScheduler<K> {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::KeyPartitioner;
    use crate::testing::{modulo_locality, InMemoryEntrySource, ModuloPartitioner, RecordingHandler};
    use std::collections::BTreeSet;

    fn scheduler(handler: &Arc<RecordingHandler<u64>>) -> EntryScheduler<u64> {
        EntryScheduler::<u64>::new(handler.clone(), Handle::current())
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn test_schedule_arms_once() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);

        assert!(scheduler.schedule(7, far()));
        assert!(!scheduler.schedule(7, far()));
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.contains(&7));
        assert_eq!(scheduler.metrics().schedule_duplicate.get(), 1);
    }

    #[tokio::test]
    async fn test_schedule_requires_ownership() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        let locality = modulo_locality(4, 1, &[0, 1]);
        scheduler.install_locality(1, Arc::new(locality));

        assert!(scheduler.schedule(4, far()));
        assert!(!scheduler.schedule(6, far()));
        assert_eq!(scheduler.scheduled_ids(), vec![4]);
        assert_eq!(scheduler.metrics().schedule_not_owned.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_deadline() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);

        assert!(scheduler.schedule_after(1, Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handler.fired().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(handler.fired(), vec![1]);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.metrics().snapshot().armed_entries, 0);

        // A fired entry may be armed again
        assert!(scheduler.schedule_after(1, Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.fire_count(&1), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_entry_never_fires() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);

        assert!(scheduler.schedule_after(1, Duration::from_secs(10)));
        assert!(scheduler.cancel(&1));
        assert!(!scheduler.cancel(&1));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(handler.fired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_cancel_fires_once() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);

        assert!(scheduler.schedule_after(3, Duration::from_secs(10)));
        assert!(scheduler.cancel(&3));
        assert!(scheduler.schedule_after(3, Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(handler.fired(), vec![3]);
    }

    #[tokio::test]
    async fn test_cancel_unowned() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        for id in 0..8 {
            assert!(scheduler.schedule(id, far()));
        }

        let cancelled = scheduler.cancel_unowned(2, Arc::new(modulo_locality(4, 2, &[0, 1])));
        assert_eq!(cancelled, 4);

        let mut remaining = scheduler.scheduled_ids();
        remaining.sort();
        assert_eq!(remaining, vec![0, 1, 4, 5]);
        assert_eq!(scheduler.locality_topology(), Some(2));

        // The installed locality gates later arms
        assert!(!scheduler.schedule(2, far()));
    }

    #[tokio::test]
    async fn test_older_locality_ignored() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        assert!(scheduler.install_locality(5, Arc::new(modulo_locality(4, 5, &[0, 1, 2, 3]))));
        assert!(scheduler.schedule(2, far()));

        let cancelled = scheduler.cancel_unowned(3, Arc::new(modulo_locality(4, 3, &[0])));
        assert_eq!(cancelled, 0);
        assert!(scheduler.contains(&2));
        assert_eq!(scheduler.locality_topology(), Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_schedule_is_exclusive() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = Arc::new(scheduler(&handler));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            tasks.push(tokio::spawn(async move {
                (0..100u64)
                    .filter(|id| scheduler.schedule(*id, far()))
                    .count()
            }));
        }

        let mut armed = 0;
        for task in tasks {
            armed += task.await.unwrap();
        }
        assert_eq!(armed, 100);
        assert_eq!(scheduler.len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bulk_cancel_races_concurrent_schedules() {
        const WRITERS: u64 = 3;
        const IDS_PER_WRITER: u64 = 500;

        let handler = Arc::new(RecordingHandler::new());
        let scheduler = Arc::new(scheduler(&handler));
        let deadline = far();

        for round in 0..50u64 {
            let owning = 2 * round + 1;
            let losing = owning + 1;
            scheduler.install_locality(owning, Arc::new(modulo_locality(4, owning, &[0, 1])));

            let start = Arc::new(std::sync::Barrier::new(WRITERS as usize + 1));
            let writers: Vec<_> = (0..WRITERS)
                .map(|writer| {
                    let scheduler = Arc::clone(&scheduler);
                    let start = Arc::clone(&start);
                    tokio::task::spawn_blocking(move || {
                        start.wait();
                        // Segment 0 only
                        for i in 0..IDS_PER_WRITER {
                            scheduler.schedule((writer * IDS_PER_WRITER + i) * 4, deadline);
                        }
                    })
                })
                .collect();

            start.wait();
            scheduler.cancel_unowned(losing, Arc::new(modulo_locality(4, losing, &[1])));
            for writer in writers {
                writer.await.unwrap();
            }

            let leaked: Vec<u64> = scheduler
                .scheduled_ids()
                .into_iter()
                .filter(|id| id % 4 == 0)
                .collect();
            assert!(leaked.is_empty(), "round {round} left {} entries armed", leaked.len());
        }

        assert_eq!(scheduler.metrics().snapshot().armed_entries, 0);
    }

    #[tokio::test]
    async fn test_reconcile_schedule_arms_gained_entries() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        let source = InMemoryEntrySource::<u64>::new();
        for id in 0..8 {
            source.insert(id, far());
        }

        let old = modulo_locality(4, 1, &[0, 1]);
        let new = modulo_locality(4, 2, &[1, 2]);
        scheduler.install_locality(2, Arc::new(new.clone()));

        let report = scheduler
            .reconcile_schedule(&old, &new, &source, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.armed, 2);
        assert!(!report.interrupted);

        let mut armed = scheduler.scheduled_ids();
        armed.sort();
        assert_eq!(armed, vec![2, 6]);
    }

    #[tokio::test]
    async fn test_reconcile_schedule_without_gain_skips_source() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        let source = InMemoryEntrySource::<u64>::new();
        source.insert(1, far());

        let old = modulo_locality(4, 1, &[0, 1]);
        let new = modulo_locality(4, 2, &[1]);
        let report = scheduler
            .reconcile_schedule(&old, &new, &source, &CancellationToken::new())
            .unwrap();

        assert_eq!(report, ScheduleReport::default());
        assert_eq!(source.enumerations(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_schedule_stops_when_cancelled() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        let source = InMemoryEntrySource::<u64>::new();
        source.insert(2, far());

        let token = CancellationToken::new();
        token.cancel();
        let report = scheduler
            .reconcile_schedule(
                &modulo_locality(4, 1, &[]),
                &modulo_locality(4, 2, &[2]),
                &source,
                &token,
            )
            .unwrap();

        assert!(report.interrupted);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_schedule_propagates_enumeration_error() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        let source = InMemoryEntrySource::<u64>::new();
        source.fail_next("store offline");

        let result = scheduler.reconcile_schedule(
            &modulo_locality(4, 1, &[]),
            &modulo_locality(4, 2, &[0]),
            &source,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Enumeration(_))));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let handler = Arc::new(RecordingHandler::new());
        let scheduler = scheduler(&handler);
        scheduler.schedule(1, far());
        scheduler.schedule(2, far());

        assert_eq!(scheduler.shutdown(), 2);
        assert!(scheduler.is_shutdown());
        assert!(!scheduler.schedule(3, far()));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_try_current_outside_runtime() {
        let handler: Arc<RecordingHandler<u64>> = Arc::new(RecordingHandler::new());
        assert!(EntryScheduler::<u64>::try_current(handler).is_err());
    }

    #[test]
    fn test_modulo_partitioner_fixture() {
        let partitioner = ModuloPartitioner::new(4);
        assert_eq!(partitioner.segment(&6), 2);
        let locality = modulo_locality(4, 1, &[2]);
        assert_eq!(locality.segments(), &BTreeSet::from([2]));
    }
}
