//! k-means clustering used to partition vectors for the sharded build

use crate::distance::euclidean_distance_squared;
use crate::error::{AnnError, Result};
use crate::types::Embedding;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Iteration cap for Lloyd refinement
const MAX_ITERATIONS: usize = 25;

/// Stop once no centroid moves further than this (squared L2)
const CONVERGENCE_THRESHOLD: f32 = 1e-6;

/// k-means over squared L2 with k-means++ initialization
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    dimensions: usize,
    seed: u64,
    centroids: Vec<Embedding>,
}

impl KMeans {
    pub fn new(dimensions: usize, k: usize) -> Result<Self> {
        if dimensions == 0 || k == 0 {
            return Err(AnnError::InvalidConfig(
                "k-means needs at least one dimension and one cluster".into(),
            ));
        }
        Ok(Self {
            k,
            dimensions,
            seed: 0,
            centroids: Vec::new(),
        })
    }

    /// Seed for k-means++ sampling. Same seed and input give the same centroids.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Learn `k` centroids from `vectors`
    pub fn fit(&mut self, vectors: &[Embedding]) -> Result<()> {
        if vectors.len() < self.k {
            return Err(AnnError::InvalidConfig(format!(
                "k-means needs at least {} vectors, got {}",
                self.k,
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        self.centroids = self.kmeans_plus_plus(vectors);

        for _ in 0..MAX_ITERATIONS {
            let assignments: Vec<usize> = vectors.iter().map(|v| self.nearest(v)).collect();
            let updated = self.update_centroids(vectors, &assignments);

            let converged = self
                .centroids
                .iter()
                .zip(&updated)
                .all(|(old, new)| euclidean_distance_squared(old, new) <= CONVERGENCE_THRESHOLD);

            self.centroids = updated;
            if converged {
                break;
            }
        }
        Ok(())
    }

    /// First centroid uniformly at random, the rest weighted by squared
    /// distance to the nearest chosen centroid
    fn kmeans_plus_plus(&self, vectors: &[Embedding]) -> Vec<Embedding> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(self.k);
        centroids.push(vectors[rng.gen_range(0..vectors.len())].clone());

        let mut nearest: Vec<f32> = vectors
            .iter()
            .map(|v| euclidean_distance_squared(v, &centroids[0]))
            .collect();

        while centroids.len() < self.k {
            let total: f64 = nearest.iter().map(|&d| d as f64).sum();
            let chosen = if total > 0.0 {
                let threshold = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                nearest
                    .iter()
                    .position(|&d| {
                        cumulative += d as f64;
                        cumulative >= threshold && d > 0.0
                    })
                    .unwrap_or(vectors.len() - 1)
            } else {
                // Every vector coincides with a centroid already
                rng.gen_range(0..vectors.len())
            };

            let centroid = vectors[chosen].clone();
            for (d, v) in nearest.iter_mut().zip(vectors) {
                *d = d.min(euclidean_distance_squared(v, &centroid));
            }
            centroids.push(centroid);
        }
        centroids
    }

    fn update_centroids(&self, vectors: &[Embedding], assignments: &[usize]) -> Vec<Embedding> {
        let mut sums = vec![vec![0f64; self.dimensions]; self.k];
        let mut counts = vec![0usize; self.k];

        for (v, &cluster) in vectors.iter().zip(assignments) {
            counts[cluster] += 1;
            for (s, &x) in sums[cluster].iter_mut().zip(v) {
                *s += x as f64;
            }
        }

        sums.into_iter()
            .zip(&counts)
            .zip(&self.centroids)
            .map(|((sum, &count), old)| {
                if count == 0 {
                    // Empty cluster keeps its previous centroid
                    old.clone()
                } else {
                    sum.iter().map(|s| (s / count as f64) as f32).collect()
                }
            })
            .collect()
    }

    /// Index of the nearest centroid (ties to the lower index)
    pub fn nearest(&self, vector: &[f32]) -> usize {
        self.nearest_n(vector, 1).first().copied().unwrap_or(0)
    }

    /// Indices of the `n` nearest centroids, nearest first
    pub fn nearest_n(&self, vector: &[f32], n: usize) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (euclidean_distance_squared(vector, c), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.into_iter().take(n).map(|(_, i)| i).collect()
    }

    pub fn centroids(&self) -> &[Embedding] {
        &self.centroids
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Embedding> {
        let mut rng = StdRng::seed_from_u64(3);
        let centers = [[0.0f32, 0.0], [10.0, 10.0], [-10.0, 10.0]];
        (0..300)
            .map(|i| {
                let c = centers[i % 3];
                vec![c[0] + rng.gen_range(-1.0..1.0), c[1] + rng.gen_range(-1.0..1.0)]
            })
            .collect()
    }

    #[test]
    fn test_finds_separated_clusters() {
        let vectors = blobs();
        let mut kmeans = KMeans::new(2, 3).unwrap().with_seed(7);
        kmeans.fit(&vectors).unwrap();

        // Points generated around the same center share a cluster
        for i in 0..3 {
            let cluster = kmeans.nearest(&vectors[i]);
            for v in vectors.iter().skip(i).step_by(3) {
                assert_eq!(kmeans.nearest(v), cluster);
            }
        }
        let mut distinct: Vec<usize> = (0..3).map(|i| kmeans.nearest(&vectors[i])).collect();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let vectors = blobs();
        let mut a = KMeans::new(2, 4).unwrap().with_seed(11);
        let mut b = KMeans::new(2, 4).unwrap().with_seed(11);
        a.fit(&vectors).unwrap();
        b.fit(&vectors).unwrap();
        assert_eq!(a.centroids(), b.centroids());
    }

    #[test]
    fn test_nearest_n_ordering() {
        let vectors = blobs();
        let mut kmeans = KMeans::new(2, 3).unwrap().with_seed(1);
        kmeans.fit(&vectors).unwrap();

        let order = kmeans.nearest_n(&[0.0, 0.0], 3);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], kmeans.nearest(&[0.0, 0.0]));
        assert_eq!(kmeans.nearest_n(&[0.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(KMeans::new(0, 3).is_err());
        let mut kmeans = KMeans::new(2, 5).unwrap();
        assert!(kmeans.fit(&[vec![1.0, 2.0]]).is_err());
        assert!(kmeans.fit(&vec![vec![1.0]; 10]).is_err());
    }
}
