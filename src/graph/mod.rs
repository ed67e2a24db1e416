//! Vamana graph index
//!
//! A flat proximity graph over vectors held by a [`VectorSource`]. Every node
//! keeps at most `R` out-edges chosen by robust pruning, and every search
//! starts from one fixed entry point (the dataset medoid).
//!
//! Edge lists live in an arena indexed by vector id. A list is never edited in
//! place: writers swap in a whole new `Arc<[VectorId]>`, so concurrent readers
//! always see either the old list or the new one.

mod build;
mod clustered;
mod kmeans;
pub mod prune;
mod search;

pub use clustered::ClusteredBuilder;
pub use kmeans::KMeans;

use crate::error::{AnnError, Result};
use crate::quantization::ScalarQuantizer;
use crate::source::VectorSource;
use crate::types::{IndexConfig, VectorId};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Edge lists indexed by vector id
#[derive(Default)]
struct EdgeArena {
    slots: RwLock<Vec<RwLock<Arc<[VectorId]>>>>,
}

impl EdgeArena {
    fn from_lists(lists: Vec<Vec<VectorId>>) -> Self {
        let slots = lists
            .into_iter()
            .map(|list| RwLock::new(Arc::from(list)))
            .collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    fn len(&self) -> usize {
        self.slots.read().len()
    }

    fn get(&self, id: VectorId) -> Arc<[VectorId]> {
        self.slots
            .read()
            .get(id as usize)
            .map(|slot| slot.read().clone())
            .unwrap_or_else(empty_list)
    }

    fn set(&self, id: VectorId, list: Vec<VectorId>) -> Result<()> {
        let slots = self.slots.read();
        let slot = slots
            .get(id as usize)
            .ok_or(AnnError::VectorNotFound(id))?;
        *slot.write() = Arc::from(list);
        Ok(())
    }

    fn push(&self, list: Vec<VectorId>) -> VectorId {
        let mut slots = self.slots.write();
        slots.push(RwLock::new(Arc::from(list)));
        (slots.len() - 1) as VectorId
    }

    fn snapshot(&self) -> Vec<Vec<VectorId>> {
        self.slots
            .read()
            .iter()
            .map(|slot| slot.read().to_vec())
            .collect()
    }
}

fn empty_list() -> Arc<[VectorId]> {
    Arc::from(Vec::new())
}

/// Approximate nearest neighbor index over a [`VectorSource`]
pub struct GraphIndex {
    config: IndexConfig,
    /// Taken from the first inserted vector when the source starts empty
    dimensions: AtomicUsize,
    source: Arc<dyn VectorSource>,
    edges: EdgeArena,
    entry_point: RwLock<Option<VectorId>>,
    /// Runtime search list size (L')
    search_list_size: AtomicUsize,
    quantizer: Option<ScalarQuantizer>,
    /// One code vector per node, `dimensions` bytes each
    codes: RwLock<Vec<u8>>,
    /// Serializes incremental inserts
    insert_lock: Mutex<()>,
}

impl GraphIndex {
    /// Create an empty index. Nodes are added by [`GraphIndex::insert`].
    pub fn new(config: IndexConfig, source: Arc<dyn VectorSource>) -> Result<Self> {
        config.validate()?;
        let dimensions = source.dimensions();
        if dimensions == 0 && !source.is_empty() {
            return Err(AnnError::InvalidConfig(
                "vectors must have at least one dimension".into(),
            ));
        }
        Ok(Self::from_parts(config, source, EdgeArena::default(), None, None, Vec::new()))
    }

    fn from_parts(
        config: IndexConfig,
        source: Arc<dyn VectorSource>,
        edges: EdgeArena,
        entry_point: Option<VectorId>,
        quantizer: Option<ScalarQuantizer>,
        codes: Vec<u8>,
    ) -> Self {
        Self {
            dimensions: AtomicUsize::new(source.dimensions()),
            search_list_size: AtomicUsize::new(config.search_list_size),
            config,
            source,
            edges,
            entry_point: RwLock::new(entry_point),
            quantizer,
            codes: RwLock::new(codes),
            insert_lock: Mutex::new(()),
        }
    }

    /// Number of nodes in the graph
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions.load(AtomicOrdering::Acquire)
    }

    pub fn entry_point(&self) -> Option<VectorId> {
        *self.entry_point.read()
    }

    pub fn source(&self) -> &Arc<dyn VectorSource> {
        &self.source
    }

    pub fn quantizer(&self) -> Option<&ScalarQuantizer> {
        self.quantizer.as_ref()
    }

    /// Current out-edges of a node (empty for unknown ids)
    pub fn neighbors(&self, id: VectorId) -> Arc<[VectorId]> {
        self.edges.get(id)
    }

    /// Change the search list size used by later [`GraphIndex::search`] calls
    pub fn set_search_list_size(&self, size: usize) {
        self.search_list_size
            .store(size.max(1), AtomicOrdering::Relaxed);
    }

    pub fn search_list_size(&self) -> usize {
        self.search_list_size.load(AtomicOrdering::Relaxed)
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        let lists = self.edges.snapshot();
        let edge_count: usize = lists.iter().map(|l| l.len()).sum();
        let max_out_degree = lists.iter().map(|l| l.len()).max().unwrap_or(0);
        let avg_out_degree = if lists.is_empty() {
            0.0
        } else {
            edge_count as f64 / lists.len() as f64
        };

        GraphStats {
            node_count: lists.len(),
            edge_count,
            max_out_degree,
            avg_out_degree,
            entry_point: self.entry_point(),
            reachable: self.reachable_flags(&lists).iter().filter(|&&r| r).count(),
            dimensions: self.dimensions(),
            max_degree: self.config.max_degree,
            search_list_size: self.search_list_size(),
            quantizer_bits: self.quantizer.as_ref().map(|q| q.bits()),
        }
    }

    /// Mark the nodes reachable from the entry point (breadth-first)
    fn reachable_flags(&self, lists: &[Vec<VectorId>]) -> Vec<bool> {
        let mut seen = vec![false; lists.len()];
        let Some(entry) = self.entry_point() else {
            return seen;
        };
        if entry as usize >= lists.len() {
            return seen;
        }

        let mut queue = VecDeque::from([entry]);
        seen[entry as usize] = true;
        while let Some(id) = queue.pop_front() {
            for &next in &lists[id as usize] {
                if let Some(flag) = seen.get_mut(next as usize) {
                    if !*flag {
                        *flag = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }

    /// Nodes no search can reach, in id order
    pub(crate) fn unreachable_nodes(&self) -> Vec<VectorId> {
        let lists = self.edges.snapshot();
        self.reachable_flags(&lists)
            .into_iter()
            .enumerate()
            .filter(|(_, reachable)| !reachable)
            .map(|(id, _)| id as VectorId)
            .collect()
    }

    /// Copy out everything needed to persist the index.
    ///
    /// Holds off inserts so edges and codes describe the same nodes.
    pub(crate) fn snapshot(&self) -> IndexSnapshot {
        let _guard = self.insert_lock.lock();
        IndexSnapshot {
            config: self.config.clone(),
            dimensions: self.dimensions(),
            entry_point: self.entry_point(),
            edges: self.edges.snapshot(),
            quantizer: self.quantizer.clone(),
            codes: self.codes.read().clone(),
        }
    }

    /// Rebuild an index from a persisted snapshot
    pub(crate) fn from_snapshot(
        snapshot: IndexSnapshot,
        source: Arc<dyn VectorSource>,
    ) -> Result<Self> {
        snapshot.config.validate()?;
        let nodes = snapshot.edges.len();
        // An index saved before its first insert has no dimensions yet
        let unset = nodes == 0 && snapshot.dimensions == 0;
        if snapshot.dimensions != source.dimensions() && !unset {
            return Err(AnnError::DimensionMismatch {
                expected: snapshot.dimensions,
                actual: source.dimensions(),
            });
        }
        if source.len() < nodes {
            return Err(AnnError::InvalidFormat(format!(
                "index has {} nodes but the vector source holds only {}",
                nodes,
                source.len()
            )));
        }
        match snapshot.entry_point {
            Some(entry) if entry as usize >= nodes => {
                return Err(AnnError::EntryPoint(format!(
                    "entry point {} out of range for {} nodes",
                    entry, nodes
                )));
            }
            None if nodes > 0 => {
                return Err(AnnError::EntryPoint("missing entry point".into()));
            }
            _ => {}
        }
        if let Some((node, &bad)) = snapshot
            .edges
            .iter()
            .enumerate()
            .find_map(|(i, l)| l.iter().find(|&&id| id as usize >= nodes).map(|id| (i, id)))
        {
            return Err(AnnError::InvalidFormat(format!(
                "node {} links to unknown node {}",
                node, bad
            )));
        }
        match &snapshot.quantizer {
            Some(q)
                if q.dimensions() != snapshot.dimensions
                    || snapshot.codes.len() != nodes * snapshot.dimensions =>
            {
                return Err(AnnError::InvalidFormat(
                    "quantized codes do not match the graph".into(),
                ));
            }
            // The saturation code is the largest valid one
            Some(q) if snapshot.codes.iter().any(|&c| c as usize > q.buckets()) => {
                return Err(AnnError::InvalidFormat(format!(
                    "quantized code out of range for {} bits",
                    q.bits()
                )));
            }
            None if !snapshot.codes.is_empty() => {
                return Err(AnnError::InvalidFormat(
                    "codes stored without a quantizer".into(),
                ));
            }
            _ => {}
        }

        Ok(Self::from_parts(
            snapshot.config,
            source,
            EdgeArena::from_lists(snapshot.edges),
            snapshot.entry_point,
            snapshot.quantizer,
            snapshot.codes,
        ))
    }
}

/// Serializable index state
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexSnapshot {
    pub config: IndexConfig,
    pub dimensions: usize,
    pub entry_point: Option<VectorId>,
    pub edges: Vec<Vec<VectorId>>,
    pub quantizer: Option<ScalarQuantizer>,
    pub codes: Vec<u8>,
}

/// Statistics about a graph index
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub max_out_degree: usize,
    pub avg_out_degree: f64,
    pub entry_point: Option<VectorId>,
    /// Nodes reachable from the entry point
    pub reachable: usize,
    pub dimensions: usize,
    /// Configured degree bound (R)
    pub max_degree: usize,
    pub search_list_size: usize,
    pub quantizer_bits: Option<u8>,
}
