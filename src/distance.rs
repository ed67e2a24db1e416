//! Distance functions for vector operations
//!
//! Every metric returns a value where smaller means closer, so the graph code
//! can order candidates the same way regardless of the metric.

use crate::error::{AnnError, Result};
use crate::types::Distance;

impl Distance {
    /// Distance between two vectors, rejecting mismatched dimensions
    pub fn compute(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(AnnError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(calculate_distance(a, b, *self))
    }
}

/// Calculate distance between two vectors using the specified metric.
///
/// Callers must have validated dimensions already.
#[inline]
pub fn calculate_distance(a: &[f32], b: &[f32], metric: Distance) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    match metric {
        Distance::L2 => euclidean_distance_squared(a, b),
        Distance::Dot => dot_product_distance(a, b),
        Distance::Cosine => cosine_distance(a, b),
    }
}

/// Cosine distance: 1 - cosine_similarity
/// Range: [0, 2], where 0 = identical, 2 = opposite
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = norm(a);
    let norm_b = norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0; // Undefined, return neutral distance
    }

    let similarity = dot / (norm_a * norm_b);
    // Clamp to handle floating point errors
    1.0 - similarity.clamp(-1.0, 1.0)
}

/// Squared Euclidean distance (no sqrt, same ordering as L2)
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    // Chunks of 8 let the compiler vectorize the inner loop
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    let mut sum = 0.0f32;

    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let mut chunk_sum = 0.0f32;
        for j in 0..8 {
            let diff = ca[j] - cb[j];
            chunk_sum += diff * diff;
        }
        sum += chunk_sum;
    }

    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        let diff = x - y;
        sum += diff * diff;
    }

    sum
}

/// Dot product distance (negative dot product for ranking)
/// Lower is better (more similar)
#[inline]
pub fn dot_product_distance(a: &[f32], b: &[f32]) -> f32 {
    -dot_product(a, b)
}

/// Dot product of two vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    let mut sum = 0.0f32;

    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let mut chunk_sum = 0.0f32;
        for j in 0..8 {
            chunk_sum += ca[j] * cb[j];
        }
        sum += chunk_sum;
    }

    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        sum += x * y;
    }

    sum
}

/// L2 norm (magnitude) of a vector
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
