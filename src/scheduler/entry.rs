//! Armed entries and the collaborators that fire and enumerate them.

use crate::error::Result;
use crate::locality::Locality;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle of one armed entry.
#[derive(Debug)]
pub struct ScheduledTask {
    generation: u64,
    token: CancellationToken,
}

impl ScheduledTask {
    pub(crate) fn new(generation: u64, token: CancellationToken) -> Self {
        Self { generation, token }
    }

    /// Generation assigned when the entry was armed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the entry's timer.
    pub(crate) fn disarm(&self) {
        self.token.cancel();
    }
}

/// An entry eligible for arming, as reported by an [`EntrySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCandidate<K> {
    /// Entry identity.
    pub id: K,
    /// When the entry should fire.
    pub deadline: Instant,
}

impl<K> ScheduleCandidate<K> {
    /// Create a candidate.
    pub fn new(id: K, deadline: Instant) -> Self {
        Self { id, deadline }
    }
}

/// Summary of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Candidates read from the source.
    pub visited: usize,
    /// Candidates armed by this pass.
    pub armed: usize,
    /// Candidates left alone (not owned, or already armed).
    pub skipped: usize,
    /// The pass stopped early because it was cancelled.
    pub interrupted: bool,
}

/// Work run when an armed entry reaches its deadline.
#[async_trait::async_trait]
pub trait EntryHandler<K: Send + 'static>: Send + Sync + 'static {
    /// Fire the entry. Called at most once per arming.
    async fn fire(&self, id: K);
}

/// Entries with a pending deadline, enumerated during reconciliation.
///
/// Enumeration is blocking and runs off the async workers.
pub trait EntrySource<K>: Send + Sync + 'static {
    /// Candidates owned under `filter`.
    ///
    /// Returning extra candidates is harmless; the scheduler checks ownership
    /// again. Errors from individual items abort the pass.
    fn enumerate<'a>(
        &'a self,
        filter: &'a dyn Locality<K>,
    ) -> Result<Box<dyn Iterator<Item = Result<ScheduleCandidate<K>>> + 'a>>;
}
