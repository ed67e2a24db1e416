//! Greedy graph traversal and the public search entry points

use super::GraphIndex;
use crate::candidates::{CandidateEntry, CandidateSet, ExactDistance, QueryDistance};
use crate::error::{AnnError, Result};
use crate::quantization::QueryTable;
use crate::types::{SearchBudget, VectorId};

use tracing::debug;

/// Outcome of one greedy traversal
pub(crate) struct Traversal {
    /// Final candidate list, nearest first
    pub entries: Vec<CandidateEntry>,
    /// Every expanded node, in expansion order
    pub visited: Vec<VectorId>,
}

/// Scores ids from their quantized codes
struct CodedDistance<'a> {
    table: QueryTable,
    codes: &'a [u8],
    dimensions: usize,
}

impl QueryDistance for CodedDistance<'_> {
    fn distance_to(&self, id: VectorId) -> Result<f32> {
        let start = id as usize * self.dimensions;
        let codes = self
            .codes
            .get(start..start + self.dimensions)
            .ok_or_else(|| AnnError::fetch(id, AnnError::VectorNotFound(id)))?;
        Ok(self.table.distance(codes))
    }
}

impl GraphIndex {
    /// Greedy search from the entry point toward the scorer's center.
    ///
    /// Expands the nearest unvisited candidate until none remain or the
    /// budget runs out.
    pub(crate) fn greedy_search<D: QueryDistance + ?Sized>(
        &self,
        scorer: &D,
        list_size: usize,
        budget: &SearchBudget,
    ) -> Result<Traversal> {
        let Some(entry) = self.entry_point() else {
            return Ok(Traversal {
                entries: Vec::new(),
                visited: Vec::new(),
            });
        };

        let mut candidates = CandidateSet::new(list_size, scorer);
        candidates.add(entry)?;
        let mut visited = Vec::new();

        while candidates.has_unvisited() {
            if budget.is_exhausted(visited.len()) {
                debug!(visited = visited.len(), "Search budget exhausted");
                break;
            }
            let Some(current) = candidates.next() else {
                break;
            };
            visited.push(current.id);
            let neighbors = self.neighbors(current.id);
            candidates.add_range(&neighbors)?;
        }

        Ok(Traversal {
            entries: candidates.into_entries(),
            visited,
        })
    }

    /// Search for the k nearest neighbors with the current search list size
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>> {
        self.search_with_budget(query, k, self.search_list_size(), SearchBudget::unlimited())
    }

    /// Search with an explicit list size for this call only
    pub fn search_with_list_size(
        &self,
        query: &[f32],
        k: usize,
        list_size: usize,
    ) -> Result<Vec<(VectorId, f32)>> {
        self.search_with_budget(query, k, list_size, SearchBudget::unlimited())
    }

    /// Search that stops early once `budget` is spent.
    ///
    /// An exhausted budget is not an error: the best candidates found so far
    /// are returned.
    pub fn search_with_budget(
        &self,
        query: &[f32],
        k: usize,
        list_size: usize,
        budget: SearchBudget,
    ) -> Result<Vec<(VectorId, f32)>> {
        self.check_query(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let scorer = ExactDistance::new(self.source.as_ref(), self.config.distance, query);
        let traversal = self.greedy_search(&scorer, list_size.max(k), &budget)?;

        Ok(traversal
            .entries
            .into_iter()
            .take(k)
            .map(|e| (e.id, e.distance))
            .collect())
    }

    /// Search over the quantized codes, then rerank with exact distances.
    ///
    /// Traversal never touches the vector source; only the final candidate
    /// list is fetched to compute the returned distances.
    pub fn search_quantized(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>> {
        let quantizer = self.quantizer.as_ref().ok_or_else(|| {
            AnnError::NotTrained("index was built without a quantizer".into())
        })?;
        self.check_query(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let list_size = self.search_list_size().max(k);
        let traversal = {
            let codes = self.codes.read();
            let scorer = CodedDistance {
                table: quantizer.query_table(query, self.config.distance)?,
                codes: codes.as_slice(),
                dimensions: self.dimensions(),
            };
            self.greedy_search(&scorer, list_size, &SearchBudget::unlimited())?
        };

        let exact = ExactDistance::new(self.source.as_ref(), self.config.distance, query);
        let mut reranked = traversal
            .entries
            .iter()
            .map(|e| Ok((e.id, exact.distance_to(e.id)?)))
            .collect::<Result<Vec<(VectorId, f32)>>>()?;
        reranked.sort_by(|a, b| CandidateEntry::cmp_rank((a.1, a.0), (b.1, b.0)));
        reranked.truncate(k);

        Ok(reranked)
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        let dimensions = self.dimensions();
        if query.len() != dimensions {
            return Err(AnnError::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::source::{InMemorySource, VectorSource};
    use crate::types::{Distance, IndexConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn built(n: usize, dims: usize, config: IndexConfig) -> (GraphIndex, Vec<Vec<f32>>) {
        let vectors = random_vectors(n, dims, 7);
        let source = Arc::new(InMemorySource::new(vectors.clone()).unwrap());
        (GraphIndex::build(config, source).unwrap(), vectors)
    }

    #[test]
    fn test_search_sorted_and_bounded() {
        let (index, vectors) = built(500, 16, IndexConfig::new(16, 40));
        let results = index.search(&vectors[3], 10).unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(results[0].0, 3);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_search_recall() {
        let (index, vectors) = built(1000, 16, IndexConfig::new(24, 64));
        let queries = random_vectors(30, 16, 99);

        let mut total = 0.0;
        for q in &queries {
            let truth = brute_force(&vectors, q, 10, Distance::L2);
            let found: Vec<VectorId> =
                index.search(q, 10).unwrap().into_iter().map(|r| r.0).collect();
            total += recall(&truth, &found);
        }
        let mean = total / queries.len() as f64;
        assert!(mean >= 0.9, "recall@10 {}", mean);
    }

    #[test]
    fn test_k_larger_than_dataset() {
        let (index, _) = built(12, 4, IndexConfig::new(4, 8));
        let results = index.search(&[0.0; 4], 50).unwrap();
        assert_eq!(results.len(), 12);
    }

    #[test]
    fn test_k_zero_and_empty_graph() {
        let (index, vectors) = built(20, 4, IndexConfig::new(4, 8));
        assert!(index.search(&vectors[0], 0).unwrap().is_empty());

        let empty = GraphIndex::new(
            IndexConfig::new(4, 8),
            Arc::new(InMemorySource::new(vec![vec![0.0; 4]]).unwrap()),
        )
        .unwrap();
        assert!(empty.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let (index, _) = built(20, 4, IndexConfig::new(4, 8));
        assert!(matches!(
            index.search(&[0.0; 3], 5),
            Err(AnnError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_list_size_changes_apply_to_later_searches() {
        let (index, vectors) = built(400, 8, IndexConfig::new(12, 32));
        let query = &vectors[10];

        index.set_search_list_size(1);
        // Effective list size never drops below k
        assert_eq!(index.search(query, 5).unwrap().len(), 5);

        index.set_search_list_size(200);
        let wide = index.search(query, 5).unwrap();
        let explicit = index.search_with_list_size(query, 5, 200).unwrap();
        assert_eq!(wide, explicit);
    }

    #[test]
    fn test_budget_returns_partial_results() {
        let (index, vectors) = built(400, 8, IndexConfig::new(12, 32));
        let query = &vectors[42];

        let limited = index
            .search_with_budget(query, 10, 64, SearchBudget::visits(1))
            .unwrap();
        // One expansion: the entry point plus its neighbors
        assert!(!limited.is_empty());
        assert!(limited.len() <= 10);
        assert!(limited.windows(2).all(|w| w[0].1 <= w[1].1));

        let expired = index
            .search_with_budget(query, 10, 64, SearchBudget::timeout(Duration::ZERO))
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(Some(expired[0].0), index.entry_point());
    }

    #[test]
    fn test_concurrent_searches() {
        let (index, vectors) = built(300, 8, IndexConfig::new(12, 32));
        let index = Arc::new(index);
        let vectors = Arc::new(vectors);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                let vectors = Arc::clone(&vectors);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let q = &vectors[t * 25 + i];
                        let results = index.search(q, 5).unwrap();
                        assert_eq!(results.len(), 5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_search_quantized() {
        let config = IndexConfig::new(16, 48).with_quantizer_bits(6);
        let (index, vectors) = built(800, 16, config);
        let queries = random_vectors(20, 16, 5);

        let mut total = 0.0;
        for q in &queries {
            let truth = brute_force(&vectors, q, 10, Distance::L2);
            let results = index.search_quantized(q, 10).unwrap();
            assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
            // Returned distances are exact
            for (id, d) in &results {
                let exact = index.source().vector_for_id(*id).unwrap();
                assert_eq!(*d, Distance::L2.compute(q, &exact).unwrap());
            }
            let found: Vec<VectorId> = results.into_iter().map(|r| r.0).collect();
            total += recall(&truth, &found);
        }
        assert!(total / queries.len() as f64 >= 0.8);
    }

    #[test]
    fn test_search_quantized_requires_quantizer() {
        let (index, vectors) = built(20, 4, IndexConfig::new(4, 8));
        assert!(matches!(
            index.search_quantized(&vectors[0], 3),
            Err(AnnError::NotTrained(_))
        ));
    }

    #[test]
    fn test_fetch_failure_during_search() {
        /// Fails for one id after the build
        struct Flaky {
            inner: InMemorySource,
            broken: std::sync::atomic::AtomicBool,
        }

        impl VectorSource for Flaky {
            fn vector_for_id(&self, id: VectorId) -> Result<crate::types::Embedding> {
                if id != 0 && self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                    return Err(AnnError::IndexError("storage offline".into()));
                }
                self.inner.vector_for_id(id)
            }
            fn len(&self) -> usize {
                self.inner.len()
            }
            fn dimensions(&self) -> usize {
                self.inner.dimensions()
            }
        }

        let source = Arc::new(Flaky {
            inner: random_source(50, 4, 3),
            broken: std::sync::atomic::AtomicBool::new(false),
        });
        let index = GraphIndex::build(IndexConfig::new(8, 16), source.clone()).unwrap();
        source.broken.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = index.search(&[0.0; 4], 5).unwrap_err();
        assert!(matches!(err, AnnError::Fetch { .. }));
    }
}
