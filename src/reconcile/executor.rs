//! Single-worker executor for scheduling passes.
//!
//! At most one scheduling pass is current. Submitting a new one cancels the
//! token of its predecessor; the worker stops waiting on a cancelled pass and
//! moves on without waiting for the blocking enumeration to notice.
//!
//! ```text
//!   submit(A) ─┐        submit(B) ─┐
//!              ▼                   ▼
//!   current:  [A] ───────────────► [B]   (A's token cancelled)
//!   worker:   run A ... A abandoned ──► run B ──► idle
//! ```

use crate::error::{Error, Result};
use crate::metrics::SchedulerMetrics;
use crate::reconcile::handle::{ReconcileOutcome, ReconciliationHandle};
use crate::scheduler::ScheduleReport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Work = Box<dyn FnOnce(&CancellationToken) -> Result<ScheduleReport> + Send + 'static>;

/// A queued scheduling pass.
struct Job {
    id: Uuid,
    token: CancellationToken,
    work: Work,
    done: oneshot::Sender<ReconcileOutcome>,
}

/// Observable state of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No pass is running.
    Idle,
    /// A scheduling pass is running.
    Running,
    /// The executor no longer accepts work.
    ShutDown,
}

/// State shared between the executor handle and its worker task.
struct Shared {
    name: String,
    /// The most recently submitted pass.
    current: Mutex<Option<(Uuid, CancellationToken)>>,
    running: AtomicBool,
    /// Cancelled when shutdown starts.
    closing: CancellationToken,
    metrics: Arc<SchedulerMetrics>,
}

impl Shared {
    fn clear_current(&self, id: Uuid) {
        let mut current = self.current.lock();
        if current.as_ref().map(|(current_id, _)| *current_id) == Some(id) {
            *current = None;
        }
    }
}

/// Strictly serialized executor for scheduling passes.
pub struct ReconciliationExecutor {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationExecutor {
    /// Start the executor's worker on `runtime`.
    pub fn start(
        name: impl Into<String>,
        runtime: &Handle,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.into(),
            current: Mutex::new(None),
            running: AtomicBool::new(false),
            closing: CancellationToken::new(),
            metrics,
        });

        let worker = runtime.spawn(Self::run(Arc::clone(&shared), rx));

        Self {
            shared,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Get the executor's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state.
    ///
    /// Reflects the current pass only. A superseded pass whose blocking
    /// enumeration has not yet returned is not `Running`; it is counted in
    /// the `abandoned_passes` gauge until it does.
    pub fn state(&self) -> ExecutorState {
        if self.tx.lock().is_none() {
            ExecutorState::ShutDown
        } else if self.shared.running.load(Ordering::Acquire) {
            ExecutorState::Running
        } else {
            ExecutorState::Idle
        }
    }

    /// Check if the executor has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.state() == ExecutorState::ShutDown
    }

    /// Submit a scheduling pass, superseding the current one.
    ///
    /// Returns [`Error::Rejected`] once the executor is shut down.
    pub fn submit<F>(&self, work: F) -> Result<ReconciliationHandle>
    where
        F: FnOnce(&CancellationToken) -> Result<ScheduleReport> + Send + 'static,
    {
        // Holding the sender lock keeps channel order equal to `current` order.
        let tx = self.tx.lock();
        let Some(sender) = tx.as_ref() else {
            return Err(Error::Rejected);
        };

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (handle, done) = ReconciliationHandle::pending(id);

        let previous = self.shared.current.lock().replace((id, token.clone()));
        if let Some((previous_id, previous_token)) = previous {
            previous_token.cancel();
            debug!(
                executor = %self.shared.name,
                superseded = %previous_id,
                reconciliation_id = %id,
                "Superseding in-flight scheduling pass"
            );
        }

        let job = Job {
            id,
            token,
            work: Box::new(work),
            done,
        };
        if sender.send(job).is_err() {
            self.shared.clear_current(id);
            return Err(Error::Rejected);
        }

        self.shared.metrics.schedule_passes.inc();
        Ok(handle)
    }

    /// Cancel the current pass, if any. Does not wait for it to stop.
    pub fn cancel_current(&self) -> bool {
        match self.shared.current.lock().take() {
            Some((id, token)) => {
                token.cancel();
                debug!(executor = %self.shared.name, reconciliation_id = %id, "Cancelled scheduling pass");
                true
            }
            None => false,
        }
    }

    /// Stop accepting work and cancel the current pass without waiting.
    pub fn shutdown_now(&self) {
        if self.tx.lock().take().is_some() {
            self.shared.closing.cancel();
            self.cancel_current();
            info!(executor = %self.shared.name, "Reconciliation executor shutting down");
        }
    }

    /// Shut down and wait up to `timeout` for the worker to finish.
    ///
    /// Returns false if the worker had to be abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown_now();

        let Some(mut worker) = self.worker.lock().take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(_) => true,
            Err(_) => {
                worker.abort();
                warn!(
                    executor = %self.shared.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Scheduling pass did not stop in time, abandoning it"
                );
                false
            }
        }
    }

    async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.recv().await {
            let Job {
                id,
                token,
                work,
                done,
            } = job;

            if token.is_cancelled() {
                shared.metrics.schedule_passes_superseded.inc();
                let _ = done.send(ReconcileOutcome::Superseded);
                continue;
            }

            shared.running.store(true, Ordering::Release);
            let started = Instant::now();
            let work_token = token.clone();
            let mut task = tokio::task::spawn_blocking(move || work(&work_token));

            let outcome = tokio::select! {
                result = &mut task => Self::outcome_of(&shared, id, result),
                _ = token.cancelled() => {
                    if shared.closing.is_cancelled() {
                        // Give the pass a chance to observe cancellation; bounded by shutdown
                        let _ = (&mut task).await;
                    } else if !task.is_finished() {
                        let metrics = Arc::clone(&shared.metrics);
                        metrics.abandoned_passes.add(1);
                        tokio::spawn(async move {
                            let _ = task.await;
                            metrics.abandoned_passes.add(-1);
                        });
                    }
                    shared.metrics.schedule_passes_superseded.inc();
                    debug!(executor = %shared.name, reconciliation_id = %id, "Scheduling pass abandoned");
                    ReconcileOutcome::Superseded
                }
            };

            if !matches!(outcome, ReconcileOutcome::Superseded) {
                shared
                    .metrics
                    .record_schedule_pass(outcome.is_complete(), started.elapsed());
            }

            shared.running.store(false, Ordering::Release);
            shared.clear_current(id);
            let _ = done.send(outcome);
        }

        debug!(executor = %shared.name, "Reconciliation worker stopped");
    }

    fn outcome_of(
        shared: &Shared,
        id: Uuid,
        result: std::result::Result<Result<ScheduleReport>, tokio::task::JoinError>,
    ) -> ReconcileOutcome {
        match result.map_err(Error::from).and_then(|r| r) {
            Ok(report) if report.interrupted => {
                shared.metrics.schedule_passes_superseded.inc();
                ReconcileOutcome::Superseded
            }
            Ok(report) => {
                debug!(
                    executor = %shared.name,
                    reconciliation_id = %id,
                    armed = report.armed,
                    visited = report.visited,
                    "Scheduling pass completed"
                );
                ReconcileOutcome::Scheduled(report)
            }
            Err(e) => {
                shared.metrics.record_error(e.kind());
                warn!(
                    executor = %shared.name,
                    reconciliation_id = %id,
                    error = %e,
                    "Scheduling pass failed"
                );
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ReconciliationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationExecutor")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ReconciliationExecutor {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn executor() -> ReconciliationExecutor {
        ReconciliationExecutor::start(
            "test",
            &Handle::current(),
            Arc::new(SchedulerMetrics::new()),
        )
    }

    fn report(armed: usize) -> ScheduleReport {
        ScheduleReport {
            visited: armed,
            armed,
            ..Default::default()
        }
    }

    /// Spin in a blocking pass until cancelled.
    fn wait_for_cancel(token: &CancellationToken) -> Result<ScheduleReport> {
        while !token.is_cancelled() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(ScheduleReport {
            interrupted: true,
            ..Default::default()
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_submitted_pass() {
        let executor = executor();
        let handle = executor.submit(|_| Ok(report(3))).unwrap();
        assert!(handle.id().is_some());
        assert_eq!(handle.wait().await, ReconcileOutcome::Scheduled(report(3)));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_newer_pass_supersedes_older() {
        let executor = executor();
        let started = Arc::new(AtomicUsize::new(0));

        let first_started = Arc::clone(&started);
        let first = executor
            .submit(move |token| {
                first_started.fetch_add(1, Ordering::SeqCst);
                wait_for_cancel(token)
            })
            .unwrap();

        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(executor.state(), ExecutorState::Running);

        let second = executor.submit(|_| Ok(report(1))).unwrap();

        assert_eq!(first.wait().await, ReconcileOutcome::Superseded);
        assert_eq!(second.wait().await, ReconcileOutcome::Scheduled(report(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_superseded_pass_counted_until_it_returns() {
        let metrics = Arc::new(SchedulerMetrics::new());
        let executor = ReconciliationExecutor::start("test", &Handle::current(), Arc::clone(&metrics));
        let release = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));

        let (pass_release, pass_started) = (Arc::clone(&release), Arc::clone(&started));
        let stuck = executor
            .submit(move |_| {
                pass_started.store(true, Ordering::SeqCst);
                // Ignores cancellation
                while !pass_release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(ScheduleReport::default())
            })
            .unwrap();
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let next = executor.submit(|_| Ok(report(1))).unwrap();
        assert_eq!(stuck.wait().await, ReconcileOutcome::Superseded);
        assert_eq!(next.wait().await, ReconcileOutcome::Scheduled(report(1)));

        // The worker is idle while the old enumeration still runs
        assert_eq!(executor.state(), ExecutorState::Idle);
        assert_eq!(metrics.abandoned_passes.get(), 1);

        release.store(true, Ordering::SeqCst);
        let gauge = Arc::clone(&metrics);
        assert!(
            crate::testing::wait_until(|| gauge.abandoned_passes.get() == 0, Duration::from_secs(5))
                .await
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_contained() {
        let executor = executor();
        let failed = executor
            .submit(|_| Err(Error::Enumeration("store unavailable".into())))
            .unwrap();
        assert!(matches!(failed.wait().await, ReconcileOutcome::Failed(_)));

        // The worker keeps serving after a failure
        let next = executor.submit(|_| Ok(report(2))).unwrap();
        assert_eq!(next.wait().await, ReconcileOutcome::Scheduled(report(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_pass_fails() {
        let executor = executor();
        let handle = executor.submit(|_| panic!("enumeration bug")).unwrap();
        assert!(matches!(handle.wait().await, ReconcileOutcome::Failed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_current() {
        let executor = executor();
        assert!(!executor.cancel_current());

        let handle = executor.submit(|token| wait_for_cancel(token)).unwrap();
        assert!(executor.cancel_current());
        assert_eq!(handle.wait().await, ReconcileOutcome::Superseded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_rejects_new_work() {
        let executor = executor();
        let running = executor.submit(|token| wait_for_cancel(token)).unwrap();

        assert!(executor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(running.wait().await, ReconcileOutcome::Superseded);
        assert!(executor.is_shutdown());
        assert!(matches!(
            executor.submit(|_| Ok(report(1))),
            Err(Error::Rejected)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_is_bounded() {
        let executor = executor();
        let stop = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));

        let (pass_stop, pass_started) = (Arc::clone(&stop), Arc::clone(&started));
        let _handle = executor
            .submit(move |_| {
                pass_started.store(true, Ordering::SeqCst);
                // Ignores cancellation
                while !pass_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(ScheduleReport::default())
            })
            .unwrap();

        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(!executor.shutdown(Duration::from_millis(50)).await);
        stop.store(true, Ordering::SeqCst);
    }
}
