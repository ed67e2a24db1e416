//! Sharded graph construction
//!
//! Splits the dataset into overlapping clusters, builds an independent graph
//! per cluster on a worker pool, then merges them: each node's edges become
//! the union of its edges across clusters, pruned back down to `R`.

use super::build::{compute_medoid, thread_pool};
use super::kmeans::KMeans;
use super::prune::robust_prune;
use super::{EdgeArena, GraphIndex};
use crate::error::{AnnError, Result};
use crate::source::{SubsetSource, VectorSource};
use crate::types::{Embedding, IndexConfig, VectorId};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Builds a [`GraphIndex`] from overlapping per-cluster sub-graphs
pub struct ClusteredBuilder {
    config: IndexConfig,
}

impl ClusteredBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build the index. A single shard falls back to the plain build.
    pub fn build(&self, source: Arc<dyn VectorSource>) -> Result<GraphIndex> {
        self.config.validate()?;
        if self.config.shard_count == 1 {
            return GraphIndex::build(self.config.clone(), source);
        }
        let n = source.len();
        if n == 0 {
            return Err(AnnError::EmptyDataset);
        }
        if source.dimensions() == 0 {
            return Err(AnnError::InvalidConfig("vectors must have at least one dimension".into()));
        }

        let pool = thread_pool(self.config.num_threads)?;
        let start = Instant::now();
        info!(
            nodes = n,
            shards = self.config.shard_count,
            overlap = self.config.overlap_factor,
            threads = pool.current_num_threads(),
            "Building clustered graph index"
        );

        let clusters = pool.install(|| self.partition(source.as_ref()))?;
        info!(
            clusters = clusters.len(),
            largest = clusters.iter().map(|c| c.len()).max().unwrap_or(0),
            "Partitioned vectors"
        );

        let sub_graphs = self.build_clusters(&source, &clusters, &pool)?;
        let merged = merge(n, &clusters, sub_graphs);
        debug!("Merged cluster graphs");

        let edges = pool.install(|| self.reprune(source.as_ref(), &merged))?;
        let medoid = pool.install(|| compute_medoid(source.as_ref(), self.config.distance))?;

        let mut index = GraphIndex::from_parts(
            self.config.clone(),
            source,
            EdgeArena::from_lists(edges),
            Some(medoid),
            None,
            Vec::new(),
        );
        index.connect_unreachable(self.config.alpha)?;
        index.check_entry_point()?;
        index.train_quantizer(&pool)?;

        info!(
            nodes = n,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Clustered graph index built"
        );
        Ok(index)
    }

    /// Assign every vector to its `overlap_factor` nearest k-means clusters.
    ///
    /// Centroids are learned from a seeded sample. Empty clusters are dropped.
    pub fn partition(&self, source: &dyn VectorSource) -> Result<Vec<Vec<VectorId>>> {
        let n = source.len();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let sample_size = self.config.cluster_sample_size.min(n);

        let sample: Vec<Embedding> = rand::seq::index::sample(&mut rng, n, sample_size)
            .into_iter()
            .map(|i| {
                let id = i as VectorId;
                source.vector_for_id(id).map_err(|e| AnnError::fetch(id, e))
            })
            .collect::<Result<_>>()?;

        let k = self.config.shard_count.min(sample_size);
        let mut kmeans = KMeans::new(source.dimensions(), k)?.with_seed(self.config.seed);
        kmeans.fit(&sample)?;

        let overlap = self.config.overlap_factor.min(k);
        let assignments: Vec<Vec<usize>> = (0..n as VectorId)
            .into_par_iter()
            .map(|id| -> Result<Vec<usize>> {
                let vector = source
                    .vector_for_id(id)
                    .map_err(|e| AnnError::fetch(id, e))?;
                Ok(kmeans.nearest_n(&vector, overlap))
            })
            .collect::<Result<_>>()?;

        let mut clusters = vec![Vec::new(); k];
        for (id, nearest) in assignments.into_iter().enumerate() {
            for cluster in nearest {
                clusters[cluster].push(id as VectorId);
            }
        }
        clusters.retain(|c| !c.is_empty());
        Ok(clusters)
    }

    /// Build one sub-graph per cluster. Edge lists come back in global ids.
    fn build_clusters(
        &self,
        source: &Arc<dyn VectorSource>,
        clusters: &[Vec<VectorId>],
        pool: &ThreadPool,
    ) -> Result<Vec<Vec<Vec<VectorId>>>> {
        pool.install(|| {
            clusters
                .par_iter()
                .enumerate()
                .map(|(i, ids)| -> Result<Vec<Vec<VectorId>>> {
                    let cluster_start = Instant::now();
                    let subset = Arc::new(SubsetSource::new(Arc::clone(source), ids.clone()));
                    let config = IndexConfig {
                        shard_count: 1,
                        quantizer_bits: None,
                        seed: self.config.seed.wrapping_add(i as u64 + 1),
                        ..self.config.clone()
                    };

                    let graph = GraphIndex::build_graph(config, subset, pool)?;
                    let lists: Vec<Vec<VectorId>> = graph
                        .edges
                        .snapshot()
                        .into_iter()
                        .map(|list| list.into_iter().map(|local| ids[local as usize]).collect())
                        .collect();

                    debug!(
                        cluster = i,
                        nodes = ids.len(),
                        elapsed_ms = cluster_start.elapsed().as_millis() as u64,
                        "Built cluster graph"
                    );
                    Ok(lists)
                })
                .collect()
        })
    }

    /// Prune every node's merged candidates back to `R`.
    ///
    /// Each output slot is produced by exactly one worker.
    fn reprune(
        &self,
        source: &dyn VectorSource,
        merged: &[Vec<VectorId>],
    ) -> Result<Vec<Vec<VectorId>>> {
        merged
            .par_iter()
            .enumerate()
            .map(|(v, candidates)| -> Result<Vec<VectorId>> {
                let id = v as VectorId;
                let center = source
                    .vector_for_id(id)
                    .map_err(|e| AnnError::fetch(id, e))?;
                robust_prune(
                    source,
                    self.config.distance,
                    id,
                    &center,
                    candidates,
                    self.config.alpha,
                    self.config.max_degree,
                )
            })
            .collect()
    }
}

/// Union of every node's edges across all cluster graphs
fn merge(
    n: usize,
    clusters: &[Vec<VectorId>],
    sub_graphs: Vec<Vec<Vec<VectorId>>>,
) -> Vec<Vec<VectorId>> {
    let mut merged: Vec<Vec<VectorId>> = vec![Vec::new(); n];
    for (ids, lists) in clusters.iter().zip(sub_graphs) {
        for (&global, list) in ids.iter().zip(lists) {
            merged[global as usize].extend(list);
        }
    }
    for list in &mut merged {
        list.sort_unstable();
        list.dedup();
    }
    merged
}
