//! Test doubles for the scheduler's collaborators.

use crate::error::{Error, Result};
use crate::locality::{Locality, SegmentLocality};
use crate::partitioning::{KeyPartitioner, OwnershipSnapshot};
use crate::scheduler::{EntryHandler, EntrySource, ScheduleCandidate};
use crate::types::{EntryId, NodeId, SegmentId, TopologyId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Partitioner mapping integer keys to `key % segment_count`.
#[derive(Debug, Clone, Copy)]
pub struct ModuloPartitioner {
    segment_count: u32,
}

impl ModuloPartitioner {
    /// Create a partitioner over `segment_count` segments (at least one).
    pub fn new(segment_count: u32) -> Self {
        Self {
            segment_count: segment_count.max(1),
        }
    }
}

impl KeyPartitioner<u64> for ModuloPartitioner {
    fn segment_count(&self) -> u32 {
        self.segment_count
    }

    fn segment(&self, key: &u64) -> SegmentId {
        (key % u64::from(self.segment_count)) as SegmentId
    }
}

/// Locality of node 1 over explicit segments, keyed by [`ModuloPartitioner`].
pub fn modulo_locality(
    segment_count: u32,
    topology_id: TopologyId,
    segments: &[SegmentId],
) -> SegmentLocality<u64> {
    SegmentLocality::<u64>::with_segments(
        Arc::new(ModuloPartitioner::new(segment_count)),
        segments.iter().copied().collect::<BTreeSet<_>>(),
        topology_id,
        1,
    )
}

/// Snapshot assigning each listed node its primary segments.
pub fn primary_snapshot<I, S>(
    topology_id: TopologyId,
    segment_count: u32,
    assignments: I,
) -> Result<OwnershipSnapshot>
where
    I: IntoIterator<Item = (NodeId, S)>,
    S: IntoIterator<Item = SegmentId>,
{
    assignments
        .into_iter()
        .fold(
            OwnershipSnapshot::builder(topology_id, segment_count),
            |builder, (node, segments)| builder.primary(node, segments),
        )
        .build()
}

/// Handler that records every fired entry.
#[derive(Debug)]
pub struct RecordingHandler<K> {
    fired: Mutex<Vec<K>>,
}

impl<K: EntryId> RecordingHandler<K> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            fired: Mutex::new(Vec::new()),
        }
    }

    /// Fired entries, in firing order.
    pub fn fired(&self) -> Vec<K> {
        self.fired.lock().clone()
    }

    /// How many times `id` fired.
    pub fn fire_count(&self, id: &K) -> usize {
        self.fired.lock().iter().filter(|fired| *fired == id).count()
    }
}

impl<K: EntryId> Default for RecordingHandler<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<K: EntryId> EntryHandler<K> for RecordingHandler<K> {
    async fn fire(&self, id: K) {
        self.fired.lock().push(id);
    }
}

/// In-memory entry store with controllable enumeration.
///
/// Enumeration can be paused or made to fail, to exercise cancellation and
/// failure handling of scheduling passes.
pub struct InMemoryEntrySource<K> {
    entries: RwLock<HashMap<K, Instant>>,
    failure: Mutex<Option<String>>,
    paused: Mutex<bool>,
    resumed: Condvar,
    enumerations: AtomicUsize,
}

impl<K: EntryId> InMemoryEntrySource<K> {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            failure: Mutex::new(None),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            enumerations: AtomicUsize::new(0),
        }
    }

    /// Add or replace an entry.
    pub fn insert(&self, id: K, deadline: Instant) {
        self.entries.write().insert(id, deadline);
    }

    /// Remove an entry.
    pub fn remove(&self, id: &K) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the source is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Make the next enumeration fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Block enumerations at their start until [`resume`](Self::resume).
    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    /// Release blocked enumerations.
    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    /// Number of enumerations started.
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl<K: EntryId> Default for InMemoryEntrySource<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntryId> EntrySource<K> for InMemoryEntrySource<K> {
    fn enumerate<'a>(
        &'a self,
        filter: &'a dyn Locality<K>,
    ) -> Result<Box<dyn Iterator<Item = Result<ScheduleCandidate<K>>> + 'a>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);

        {
            let mut paused = self.paused.lock();
            while *paused {
                self.resumed.wait(&mut paused);
            }
        }

        if let Some(message) = self.failure.lock().take() {
            return Err(Error::Enumeration(message));
        }

        let candidates: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|(id, _)| filter.owns(id))
            .map(|(id, deadline)| Ok(ScheduleCandidate::new(id.clone(), *deadline)))
            .collect();

        Ok(Box::new(candidates.into_iter()))
    }
}

impl<K> std::fmt::Debug for InMemoryEntrySource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEntrySource")
            .field("entries", &self.entries.read().len())
            .field("enumerations", &self.enumerations.load(Ordering::SeqCst))
            .finish()
    }
}
