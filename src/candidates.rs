//! Bounded candidate set for greedy graph traversal
//!
//! Holds the best `capacity` candidates seen so far, ordered ascending by
//! distance to the search center (ties broken by lower id). Entries live in a
//! sorted `Vec` and are inserted with a binary search, so sorted or
//! reverse-sorted arrival orders cost the same as random ones.

use crate::distance::calculate_distance;
use crate::error::{AnnError, Result};
use crate::source::VectorSource;
use crate::types::{Distance, VectorId};

use std::cmp::Ordering;
use std::collections::HashSet;

/// Scores ids against a fixed search center
pub trait QueryDistance {
    /// Distance from the center to the vector stored under `id`
    fn distance_to(&self, id: VectorId) -> Result<f32>;
}

/// Exact distances, fetching each vector from a [`VectorSource`]
pub struct ExactDistance<'a, S: VectorSource + ?Sized> {
    source: &'a S,
    metric: Distance,
    center: &'a [f32],
}

impl<'a, S: VectorSource + ?Sized> ExactDistance<'a, S> {
    pub fn new(source: &'a S, metric: Distance, center: &'a [f32]) -> Self {
        Self {
            source,
            metric,
            center,
        }
    }
}

impl<S: VectorSource + ?Sized> QueryDistance for ExactDistance<'_, S> {
    fn distance_to(&self, id: VectorId) -> Result<f32> {
        let vector = self
            .source
            .vector_for_id(id)
            .map_err(|e| AnnError::fetch(id, e))?;
        if vector.len() != self.center.len() {
            return Err(AnnError::fetch(
                id,
                AnnError::DimensionMismatch {
                    expected: self.center.len(),
                    actual: vector.len(),
                },
            ));
        }
        Ok(calculate_distance(self.center, &vector, self.metric))
    }
}

/// One candidate during a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateEntry {
    pub id: VectorId,
    pub distance: f32,
    pub visited: bool,
}

impl CandidateEntry {
    /// Total order used everywhere candidates are ranked: distance, then id
    #[inline]
    pub fn cmp_rank(a: (f32, VectorId), b: (f32, VectorId)) -> Ordering {
        a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
    }

    #[inline]
    fn rank(&self) -> (f32, VectorId) {
        (self.distance, self.id)
    }
}

/// Bounded, distance-ordered working set with visited tracking
pub struct CandidateSet<'a, D: QueryDistance + ?Sized> {
    scorer: &'a D,
    capacity: usize,
    /// Sorted ascending by (distance, id)
    entries: Vec<CandidateEntry>,
    /// Every id ever offered to this set
    seen: HashSet<VectorId>,
    unvisited: usize,
    /// All entries before this index are visited
    cursor: usize,
}

impl<'a, D: QueryDistance + ?Sized> CandidateSet<'a, D> {
    /// Create an empty set holding at most `capacity` entries
    pub fn new(capacity: usize, scorer: &'a D) -> Self {
        let capacity = capacity.max(1);
        Self {
            scorer,
            capacity,
            entries: Vec::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity * 4),
            unvisited: 0,
            cursor: 0,
        }
    }

    /// Score `id` and insert it.
    ///
    /// Returns `Ok(true)` when the candidate entered the set. Offering an id
    /// that was offered before is a no-op and does not rescore it.
    pub fn add(&mut self, id: VectorId) -> Result<bool> {
        if self.seen.contains(&id) {
            return Ok(false);
        }
        let distance = self.scorer.distance_to(id)?;
        Ok(self.insert_scored(id, distance))
    }

    /// Add several ids, stopping at the first scoring failure
    pub fn add_range(&mut self, ids: &[VectorId]) -> Result<()> {
        for &id in ids {
            self.add(id)?;
        }
        Ok(())
    }

    /// Insert a candidate whose distance is already known
    pub(crate) fn insert_scored(&mut self, id: VectorId, distance: f32) -> bool {
        if !self.seen.insert(id) && self.entries.iter().any(|e| e.id == id) {
            return false;
        }

        if self.entries.len() >= self.capacity {
            match self.entries.last() {
                // Farther or equal to the current worst: nothing changes
                Some(worst) if distance.total_cmp(&worst.distance) != Ordering::Less => {
                    return false;
                }
                _ => {}
            }
            if let Some(evicted) = self.entries.pop() {
                if !evicted.visited {
                    self.unvisited -= 1;
                }
            }
            self.cursor = self.cursor.min(self.entries.len());
        }

        let key = (distance, id);
        let pos = self
            .entries
            .partition_point(|e| CandidateEntry::cmp_rank(e.rank(), key) == Ordering::Less);

        self.entries.insert(
            pos,
            CandidateEntry {
                id,
                distance,
                visited: false,
            },
        );
        self.unvisited += 1;
        if pos < self.cursor {
            self.cursor = pos;
        }
        true
    }

    /// Take the nearest unvisited entry and mark it visited
    pub fn next(&mut self) -> Option<CandidateEntry> {
        if self.unvisited == 0 {
            return None;
        }
        while self.cursor < self.entries.len() {
            let i = self.cursor;
            self.cursor += 1;
            if !self.entries[i].visited {
                self.entries[i].visited = true;
                self.unvisited -= 1;
                return Some(self.entries[i]);
            }
        }
        None
    }

    /// Check if any entry is still unvisited
    #[inline]
    pub fn has_unvisited(&self) -> bool {
        self.unvisited > 0
    }

    /// All current ids, nearest first
    pub fn elements(&self) -> Vec<VectorId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// All current entries, nearest first
    pub fn entries(&self) -> &[CandidateEntry] {
        &self.entries
    }

    /// Consume the set, returning its entries nearest first
    pub fn into_entries(self) -> Vec<CandidateEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
