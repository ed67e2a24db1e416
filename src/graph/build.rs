//! Graph construction and incremental insertion

use super::prune::robust_prune;
use super::{ClusteredBuilder, EdgeArena, GraphIndex};
use crate::candidates::{CandidateEntry, ExactDistance};
use crate::distance::calculate_distance;
use crate::error::{AnnError, Result};
use crate::quantization::ScalarQuantizer;
use crate::source::VectorSource;
use crate::types::{Distance, Embedding, IndexConfig, SearchBudget, VectorId};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

impl GraphIndex {
    /// Build an index over every vector in `source`.
    ///
    /// Uses the clustered builder when `config.shard_count > 1`. Trains the
    /// scalar quantizer afterwards when `config.quantizer_bits` is set.
    pub fn build(config: IndexConfig, source: Arc<dyn VectorSource>) -> Result<Self> {
        if config.shard_count > 1 {
            return ClusteredBuilder::new(config).build(source);
        }
        let pool = thread_pool(config.num_threads)?;
        let mut index = Self::build_graph(config, source, &pool)?;
        index.train_quantizer(&pool)?;
        Ok(index)
    }

    /// Vamana build: medoid entry point, random initial graph, then
    /// refinement passes with a growing alpha.
    pub(crate) fn build_graph(
        config: IndexConfig,
        source: Arc<dyn VectorSource>,
        pool: &ThreadPool,
    ) -> Result<Self> {
        config.validate()?;
        let n = source.len();
        if n == 0 {
            return Err(AnnError::EmptyDataset);
        }
        if source.dimensions() == 0 {
            return Err(AnnError::InvalidConfig("vectors must have at least one dimension".into()));
        }

        info!(
            nodes = n,
            dimensions = source.dimensions(),
            max_degree = config.max_degree,
            build_list_size = config.build_list_size,
            alpha = config.alpha,
            "Building graph index"
        );
        let start = Instant::now();

        let medoid = pool.install(|| compute_medoid(source.as_ref(), config.distance))?;
        debug!(medoid, "Selected entry point");

        let mut rng = StdRng::seed_from_u64(config.seed);
        let edges = EdgeArena::from_lists(random_graph(n, config.max_degree, &mut rng));
        let index = Self::from_parts(config, source, edges, Some(medoid), None, Vec::new());

        let mut order: Vec<VectorId> = (0..n as VectorId).collect();
        for pass in 0..index.config.refine_passes {
            let alpha = index.config.pass_alpha(pass);
            order.shuffle(&mut rng);
            let pass_start = Instant::now();

            for &v in &order {
                index.link_node(v, alpha)?;
            }
            debug!(
                pass,
                alpha,
                elapsed_ms = pass_start.elapsed().as_millis() as u64,
                "Refinement pass complete"
            );
        }

        index.connect_unreachable(index.config.alpha)?;
        index.check_entry_point()?;
        info!(
            nodes = n,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Graph index built"
        );
        Ok(index)
    }

    /// Append the next vector of the source to a built (or empty) index.
    ///
    /// `id` must equal the current node count. Inserts are serialized against
    /// each other; concurrent searches keep running and see each edge list
    /// either before or after its replacement.
    pub fn insert(&self, id: VectorId) -> Result<()> {
        let _guard = self.insert_lock.lock();

        let next = self.len() as VectorId;
        if id != next {
            return Err(AnnError::IndexError(format!(
                "next insertable id is {}, got {}",
                next, id
            )));
        }
        if next == 0 && self.dimensions() == 0 {
            let first = self
                .source
                .vector_for_id(id)
                .map_err(|e| AnnError::fetch(id, e))?;
            if first.is_empty() {
                return Err(AnnError::InvalidConfig(
                    "vectors must have at least one dimension".into(),
                ));
            }
            self.dimensions.store(first.len(), AtomicOrdering::Release);
        }
        let vector = self.fetch(id)?;
        let codes = match &self.quantizer {
            Some(quantizer) => Some(quantizer.encode(&vector)?),
            None => None,
        };

        let edges = if self.entry_point().is_some() {
            self.plan_edges(id, &vector, self.config.alpha)?
        } else {
            Vec::new()
        };

        // Codes go first so quantized searches never reach a node without them
        if let Some(codes) = codes {
            self.codes.write().extend_from_slice(&codes);
        }
        self.edges.push(edges.clone());
        {
            let mut entry = self.entry_point.write();
            if entry.is_none() {
                *entry = Some(id);
            }
        }
        self.add_back_edges(id, &edges, self.config.alpha)?;

        debug!(id, degree = edges.len(), "Inserted node");
        Ok(())
    }

    /// Recompute the out-edges of `v` and link back to it
    pub(crate) fn link_node(&self, v: VectorId, alpha: f32) -> Result<()> {
        let center = self.fetch(v)?;
        let edges = self.plan_edges(v, &center, alpha)?;
        self.edges.set(v, edges.clone())?;
        self.add_back_edges(v, &edges, alpha)
    }

    /// Search toward `center` and prune the visited nodes plus the current
    /// out-edges of `v` down to a new edge list. Nothing is written.
    fn plan_edges(&self, v: VectorId, center: &[f32], alpha: f32) -> Result<Vec<VectorId>> {
        let scorer = ExactDistance::new(self.source.as_ref(), self.config.distance, center);
        let traversal = self.greedy_search(
            &scorer,
            self.config.build_list_size,
            &SearchBudget::unlimited(),
        )?;

        let mut candidates = traversal.visited;
        candidates.extend(self.neighbors(v).iter().copied());

        robust_prune(
            self.source.as_ref(),
            self.config.distance,
            v,
            center,
            &candidates,
            alpha,
            self.config.max_degree,
        )
    }

    /// Add `v` to the edge list of every node in `targets`, re-pruning lists
    /// that would exceed the degree bound
    fn add_back_edges(&self, v: VectorId, targets: &[VectorId], alpha: f32) -> Result<()> {
        for &p in targets {
            let current = self.neighbors(p);
            if current.contains(&v) {
                continue;
            }

            let mut list = current.to_vec();
            list.push(v);
            if list.len() > self.config.max_degree {
                let center = self.fetch(p)?;
                list = robust_prune(
                    self.source.as_ref(),
                    self.config.distance,
                    p,
                    &center,
                    &list,
                    alpha,
                    self.config.max_degree,
                )?;
            }
            self.edges.set(p, list)?;
        }
        Ok(())
    }

    /// Give every node that the entry point cannot reach an in-edge from a
    /// nearby reachable node, repeating until the whole graph is reachable.
    pub(crate) fn connect_unreachable(&self, alpha: f32) -> Result<()> {
        let n = self.len();
        for round in 0..n {
            let unreachable = self.unreachable_nodes();
            if unreachable.is_empty() {
                return Ok(());
            }
            debug!(round, unreachable = unreachable.len(), "Linking unreachable nodes");
            for u in unreachable {
                self.link_from_reachable(u, alpha)?;
            }
        }
        Ok(())
    }

    /// Add an edge to `u` from the nearest reachable node that keeps it
    fn link_from_reachable(&self, u: VectorId, alpha: f32) -> Result<()> {
        let center = self.fetch(u)?;
        let scorer = ExactDistance::new(self.source.as_ref(), self.config.distance, &center);
        let traversal = self.greedy_search(
            &scorer,
            self.config.build_list_size,
            &SearchBudget::unlimited(),
        )?;
        let nearest: Vec<VectorId> = traversal
            .entries
            .iter()
            .map(|e| e.id)
            .filter(|&p| p != u)
            .collect();

        for &p in &nearest {
            self.add_back_edges(u, &[p], alpha)?;
            if self.neighbors(p).contains(&u) {
                return Ok(());
            }
        }

        // Every nearby full list prunes `u` away: swap out the last edge of the nearest
        if let Some(&p) = nearest.first() {
            let mut list = self.neighbors(p).to_vec();
            if list.len() >= self.config.max_degree {
                list.pop();
            }
            list.push(u);
            self.edges.set(p, list)?;
        }
        Ok(())
    }

    /// Train the quantizer on every node and encode them all
    pub(crate) fn train_quantizer(&mut self, pool: &ThreadPool) -> Result<()> {
        let Some(bits) = self.config.quantizer_bits else {
            return Ok(());
        };
        let start = Instant::now();
        let n = self.len();

        let mut quantizer = ScalarQuantizer::new(self.dimensions(), bits)?;
        for id in 0..n as VectorId {
            quantizer.add(&self.fetch(id)?)?;
        }

        let encoded = pool.install(|| {
            (0..n as VectorId)
                .into_par_iter()
                .map(|id| quantizer.encode(&self.fetch(id)?))
                .collect::<Result<Vec<Vec<u8>>>>()
        })?;

        *self.codes.get_mut() = encoded.concat();
        self.quantizer = Some(quantizer);
        info!(
            bits,
            nodes = n,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Trained scalar quantizer"
        );
        Ok(())
    }

    /// Fail unless the entry point exists and leads somewhere
    pub(crate) fn check_entry_point(&self) -> Result<()> {
        let n = self.len();
        let entry = self
            .entry_point()
            .ok_or_else(|| AnnError::EntryPoint("no entry point after build".into()))?;
        if entry as usize >= n {
            return Err(AnnError::EntryPoint(format!(
                "entry point {} out of range for {} nodes",
                entry, n
            )));
        }
        if n > 1 && self.neighbors(entry).is_empty() {
            return Err(AnnError::EntryPoint(format!(
                "entry point {} has no out-edges",
                entry
            )));
        }

        let reachable = self.stats().reachable;
        if reachable < n {
            warn!(reachable, nodes = n, "Some nodes are unreachable from the entry point");
        }
        Ok(())
    }

    /// Fetch a vector, attributing failures to its id
    pub(crate) fn fetch(&self, id: VectorId) -> Result<Embedding> {
        let vector = self
            .source
            .vector_for_id(id)
            .map_err(|e| AnnError::fetch(id, e))?;
        let dimensions = self.dimensions();
        if vector.len() != dimensions {
            return Err(AnnError::fetch(
                id,
                AnnError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                },
            ));
        }
        Ok(vector)
    }
}

/// Worker pool for the parallel build steps (0 threads = rayon default)
pub(crate) fn thread_pool(num_threads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| AnnError::IndexError(format!("failed to start worker pool: {}", e)))
}

/// The vector nearest to the dataset centroid, ties broken by lower id
pub(crate) fn compute_medoid(source: &dyn VectorSource, metric: Distance) -> Result<VectorId> {
    let n = source.len();
    let dims = source.dimensions();
    let entry_error =
        |e: AnnError| AnnError::EntryPoint(format!("failed to compute medoid: {}", e));

    let mut sum = vec![0f64; dims];
    for id in 0..n as VectorId {
        let vector = source
            .vector_for_id(id)
            .map_err(|e| entry_error(AnnError::fetch(id, e)))?;
        for (acc, x) in sum.iter_mut().zip(&vector) {
            *acc += *x as f64;
        }
    }
    let centroid: Vec<f32> = sum.iter().map(|s| (s / n as f64) as f32).collect();

    let (_, medoid) = (0..n as VectorId)
        .into_par_iter()
        .map(|id| -> Result<(f32, VectorId)> {
            let vector = source
                .vector_for_id(id)
                .map_err(|e| entry_error(AnnError::fetch(id, e)))?;
            Ok((calculate_distance(&centroid, &vector, metric), id))
        })
        .try_reduce(
            || (f32::INFINITY, VectorId::MAX),
            |a, b| {
                Ok(match CandidateEntry::cmp_rank(a, b) {
                    std::cmp::Ordering::Greater => b,
                    _ => a,
                })
            },
        )?;

    if medoid as usize >= n {
        return Err(AnnError::EntryPoint("no vector has a finite distance to the centroid".into()));
    }
    Ok(medoid)
}

/// Random graph where every node has `min(R, n - 1)` distinct out-edges
fn random_graph(n: usize, max_degree: usize, rng: &mut StdRng) -> Vec<Vec<VectorId>> {
    let degree = max_degree.min(n.saturating_sub(1));
    (0..n)
        .map(|v| {
            if degree + 1 == n {
                (0..n).filter(|&u| u != v).map(|u| u as VectorId).collect()
            } else {
                rand::seq::index::sample(rng, n, degree + 1)
                    .into_iter()
                    .filter(|&u| u != v)
                    .take(degree)
                    .map(|u| u as VectorId)
                    .collect()
            }
        })
        .collect()
}
