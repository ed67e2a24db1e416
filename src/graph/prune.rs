//! Robust pruning
//!
//! Picks a small, direction-diverse neighbor list for a node: the closest
//! candidate is always kept, and any remaining candidate that is much closer
//! to an already kept neighbor than to the node itself is dropped.

use crate::candidates::CandidateEntry;
use crate::distance::calculate_distance;
use crate::error::{AnnError, Result};
use crate::source::VectorSource;
use crate::types::{Distance, Embedding, VectorId};

/// Select at most `max_degree` neighbors for `node` out of `candidates`.
///
/// `center` is the vector of `node`. Duplicates and `node` itself are ignored.
/// A candidate `q` is dropped once some kept `p` satisfies
/// `alpha * d(p, q) <= d(node, q)`. The result is ordered by distance to
/// `node`, ties broken by lower id.
pub fn robust_prune<S: VectorSource + ?Sized>(
    source: &S,
    metric: Distance,
    node: VectorId,
    center: &[f32],
    candidates: &[VectorId],
    alpha: f32,
    max_degree: usize,
) -> Result<Vec<VectorId>> {
    let mut unique: Vec<VectorId> = candidates.iter().copied().filter(|&id| id != node).collect();
    unique.sort_unstable();
    unique.dedup();

    let mut pool: Vec<(VectorId, f32, Embedding)> = Vec::with_capacity(unique.len());
    for id in unique {
        let vector = source
            .vector_for_id(id)
            .map_err(|e| AnnError::fetch(id, e))?;
        if vector.len() != center.len() {
            return Err(AnnError::fetch(
                id,
                AnnError::DimensionMismatch {
                    expected: center.len(),
                    actual: vector.len(),
                },
            ));
        }
        let distance = calculate_distance(center, &vector, metric);
        pool.push((id, distance, vector));
    }
    pool.sort_by(|a, b| CandidateEntry::cmp_rank((a.1, a.0), (b.1, b.0)));

    let mut selected = Vec::with_capacity(max_degree.min(pool.len()));
    let mut pruned = vec![false; pool.len()];

    for i in 0..pool.len() {
        if selected.len() >= max_degree {
            break;
        }
        if pruned[i] {
            continue;
        }
        selected.push(pool[i].0);

        let (head, tail) = pool.split_at(i + 1);
        let kept = &head[i].2;
        for (offset, (_, d_node, vector)) in tail.iter().enumerate() {
            let j = i + 1 + offset;
            if pruned[j] {
                continue;
            }
            if alpha * calculate_distance(kept, vector, metric) <= *d_node {
                pruned[j] = true;
            }
        }
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_source(n: usize, dims: usize, seed: u64) -> InMemorySource {
        let mut rng = StdRng::seed_from_u64(seed);
        let vectors = (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        InMemorySource::new(vectors).unwrap()
    }

    #[test]
    fn test_collinear_points_keep_only_nearest() {
        // All candidates lie on one ray from the node, so the nearest occludes the rest
        let source = InMemorySource::new(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
        ])
        .unwrap();
        let pruned =
            robust_prune(&source, Distance::L2, 0, &[0.0, 0.0], &[3, 2, 1], 1.0, 8).unwrap();
        assert_eq!(pruned, vec![1]);
    }

    #[test]
    fn test_opposite_directions_both_kept() {
        let source = InMemorySource::new(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![-1.0, 0.0],
            vec![0.0, 2.0],
        ])
        .unwrap();
        let pruned =
            robust_prune(&source, Distance::L2, 0, &[0.0, 0.0], &[1, 2, 3], 1.2, 8).unwrap();
        assert_eq!(pruned, vec![1, 2, 3]);
    }

    #[test]
    fn test_ignores_self_and_duplicates() {
        let source = InMemorySource::new(vec![vec![0.0], vec![1.0], vec![-1.0]]).unwrap();
        let pruned =
            robust_prune(&source, Distance::L2, 0, &[0.0], &[0, 1, 1, 2, 0], 1.0, 4).unwrap();
        assert_eq!(pruned, vec![1, 2]);
    }

    #[test]
    fn test_degree_bound_and_no_occluded_candidate() {
        let source = random_source(300, 8, 11);
        let center = source.vector_for_id(0).unwrap();
        let candidates: Vec<VectorId> = (1..300).collect();

        for (alpha, max_degree) in [(1.0, 8), (1.2, 16), (2.0, 4)] {
            let pruned = robust_prune(
                &source,
                Distance::L2,
                0,
                &center,
                &candidates,
                alpha,
                max_degree,
            )
            .unwrap();
            assert!(!pruned.is_empty());
            assert!(pruned.len() <= max_degree);

            // Every kept neighbor survived all earlier kept neighbors
            for (i, &q) in pruned.iter().enumerate() {
                let vq = source.vector_for_id(q).unwrap();
                let d_node = calculate_distance(&center, &vq, Distance::L2);
                for &p in &pruned[..i] {
                    let vp = source.vector_for_id(p).unwrap();
                    let d_pq = calculate_distance(&vp, &vq, Distance::L2);
                    assert!(alpha * d_pq > d_node);
                }
            }
        }
    }

    #[test]
    fn test_fetch_failure_names_id() {
        let source = InMemorySource::new(vec![vec![0.0], vec![1.0]]).unwrap();
        let err = robust_prune(&source, Distance::L2, 0, &[0.0], &[1, 5], 1.0, 4).unwrap_err();
        assert!(matches!(err, AnnError::Fetch { id: 5, .. }));
    }
}
