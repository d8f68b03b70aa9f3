//! In-memory nearest-neighbour index over atom embeddings.
//!
//! The index is derived state: it can be dropped and rebuilt from the store
//! at any time. Readers load an immutable [`IndexSnapshot`] through
//! `arc-swap`; writers publish a new snapshot, so a search never observes a
//! half-built index.
//!
//! A rebuild reads the store without holding the index, so adds that land
//! between that read and the swap are logged and merged into the new
//! snapshot (see [`VectorIndex::start_rebuild`]).
//!
//! Distance is cosine distance (`1 - cos θ`). Vectors are L2-normalized on
//! insert, so scoring a query is one dot product per entry.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct IndexEntry {
    vector: Arc<[f32]>,
    timestamp: DateTime<Utc>,
}

/// Immutable view of the index at one point in time.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    entries: HashMap<String, IndexEntry>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Adds made while at least one rebuild is open.
#[derive(Debug, Default)]
struct PendingAdds {
    open_rebuilds: usize,
    entries: Vec<(String, IndexEntry)>,
}

/// Marks where a rebuild's store read began. Pass it to
/// [`VectorIndex::finish_rebuild`]; dropping it abandons the rebuild.
#[must_use = "dropping the ticket abandons the rebuild"]
pub struct RebuildTicket<'a> {
    index: &'a VectorIndex,
    from: usize,
}

impl Drop for RebuildTicket<'_> {
    fn drop(&mut self) {
        let mut pending = self.index.pending();
        pending.open_rebuilds = pending.open_rebuilds.saturating_sub(1);
        if pending.open_rebuilds == 0 {
            pending.entries.clear();
        }
    }
}

pub struct VectorIndex {
    dimensions: usize,
    snapshot: ArcSwap<IndexSnapshot>,
    pending: Mutex<PendingAdds>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            snapshot: ArcSwap::from_pointee(IndexSnapshot::default()),
            pending: Mutex::new(PendingAdds::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Index an embedding. Returns `false` (and logs) if it was rejected.
    pub fn add(&self, id: &str, embedding: &[f32], timestamp: DateTime<Utc>) -> bool {
        let Some(vector) = self.normalized(id, embedding) else {
            return false;
        };
        let entry = IndexEntry { vector, timestamp };
        // Held across the publish so a finishing rebuild sees either the log
        // entry or the new snapshot.
        let mut pending = self.pending();
        self.snapshot.rcu(|current| {
            let mut next = IndexSnapshot::clone(current);
            next.entries.insert(id.to_string(), entry.clone());
            next
        });
        if pending.open_rebuilds > 0 {
            pending.entries.push((id.to_string(), entry));
        }
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.snapshot.rcu(|current| {
            let mut next = IndexSnapshot::clone(current);
            removed = next.entries.remove(id).is_some();
            next
        });
        removed
    }

    /// The `k` nearest ids with their distances, nearest first.
    ///
    /// Equal distances prefer the newer atom, then the smaller id.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let Some(query) = unit(query).filter(|_| query.len() == self.dimensions) else {
            tracing::debug!(len = query.len(), "query embedding unusable for vector search");
            return Vec::new();
        };

        let snapshot = self.snapshot.load();
        let mut scored: Vec<(&String, f32, DateTime<Utc>)> = snapshot
            .entries
            .iter()
            .map(|(id, entry)| (id, 1.0 - dot(&query, &entry.vector), entry.timestamp))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(b.0))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(id, distance, _)| (id.clone(), distance))
            .collect()
    }

    /// Build a fresh snapshot from `entries` and swap it in. Returns the number indexed.
    ///
    /// Only safe when no add can race the read that produced `entries`;
    /// otherwise use [`start_rebuild`](Self::start_rebuild) before reading.
    pub fn rebuild<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Vec<f32>, DateTime<Utc>)>,
    {
        let ticket = self.start_rebuild();
        self.finish_rebuild(ticket, entries)
    }

    /// Open a rebuild. Call before reading the store: every add from here on
    /// is carried into the snapshot that [`finish_rebuild`](Self::finish_rebuild) publishes.
    pub fn start_rebuild(&self) -> RebuildTicket<'_> {
        let mut pending = self.pending();
        pending.open_rebuilds += 1;
        RebuildTicket {
            index: self,
            from: pending.entries.len(),
        }
    }

    /// Publish a snapshot of `entries` plus every add logged since `ticket`.
    /// Returns the number indexed.
    pub fn finish_rebuild<I>(&self, ticket: RebuildTicket<'_>, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Vec<f32>, DateTime<Utc>)>,
    {
        let mut next = IndexSnapshot::default();
        for (id, embedding, timestamp) in entries {
            if let Some(vector) = self.normalized(&id, &embedding) {
                next.entries.insert(id, IndexEntry { vector, timestamp });
            }
        }

        let mut pending = self.pending();
        let raced = pending.entries.len().saturating_sub(ticket.from);
        for (id, entry) in pending.entries.iter().skip(ticket.from) {
            next.entries.insert(id.clone(), entry.clone());
        }
        let count = next.len();
        self.snapshot.store(Arc::new(next));
        drop(pending);
        drop(ticket);

        if raced > 0 {
            tracing::debug!(raced, "adds during rebuild merged into new snapshot");
        }
        count
    }

    fn pending(&self) -> MutexGuard<'_, PendingAdds> {
        // The log is a plain Vec; a panic mid-push leaves it usable.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn normalized(&self, id: &str, embedding: &[f32]) -> Option<Arc<[f32]>> {
        if embedding.len() != self.dimensions {
            tracing::warn!(
                atom_id = %id,
                expected = self.dimensions,
                actual = embedding.len(),
                "embedding has wrong dimensionality, not indexed"
            );
            return None;
        }
        match unit(embedding) {
            Some(v) => Some(v.into()),
            None => {
                tracing::warn!(atom_id = %id, "zero-norm embedding, not indexed");
                None
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn unit(v: &[f32]) -> Option<Vec<f32>> {
    let norm = dot(v, v).sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Cosine similarity of two embeddings; `0.0` when either is empty, zero or mismatched.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    match (unit(a), unit(b)) {
        (Some(a), Some(b)) => dot(&a, &b).clamp(-1.0, 1.0),
        _ => 0.0,
    }
}
