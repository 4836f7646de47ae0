//! Completion signals for reconciliation passes.

use crate::scheduler::ScheduleReport;
use tokio::sync::oneshot;
use uuid::Uuid;

/// How a reconciliation pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transition required no reconciliation.
    Noop,
    /// A cancellation pass completed, disarming `entries` entries.
    Cancelled { entries: usize },
    /// A scheduling pass completed.
    Scheduled(ScheduleReport),
    /// A newer reconciliation or shutdown cancelled the pass.
    Superseded,
    /// The pass failed; it will not be retried.
    Failed(String),
    /// The executor was shut down before the pass could be submitted.
    Rejected,
}

impl ReconcileOutcome {
    /// Check if the pass ran to completion (or had nothing to do).
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Noop | ReconcileOutcome::Cancelled { .. } | ReconcileOutcome::Scheduled(_)
        )
    }
}

/// Resolves once the reconciliation issued for a transition finishes.
#[derive(Debug)]
pub struct ReconciliationHandle {
    id: Option<Uuid>,
    rx: oneshot::Receiver<ReconcileOutcome>,
}

impl ReconciliationHandle {
    /// A handle that is already resolved.
    pub fn ready(outcome: ReconcileOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { id: None, rx }
    }

    /// A handle resolved through the returned sender.
    pub(crate) fn pending(id: Uuid) -> (Self, oneshot::Sender<ReconcileOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { id: Some(id), rx }, tx)
    }

    /// Id of the submitted reconciliation, if one was submitted.
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Poll for the outcome without waiting.
    pub fn try_outcome(&mut self) -> Option<ReconcileOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(ReconcileOutcome::Superseded),
        }
    }

    /// Wait for the outcome.
    ///
    /// A pass abandoned without reporting (e.g. its worker was aborted)
    /// resolves as [`ReconcileOutcome::Superseded`].
    pub async fn wait(self) -> ReconcileOutcome {
        self.rx.await.unwrap_or(ReconcileOutcome::Superseded)
    }
}
