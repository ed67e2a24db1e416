//! Per-vector scalar quantizer built from one [`TileEncoder`] per dimension

use super::tile::TileEncoder;
use crate::distance::calculate_distance;
use crate::error::{AnnError, Result};
use crate::source::VectorSource;
use crate::types::{Distance, Embedding, VectorId, MAX_QUANTIZER_BITS};

use serde::{Deserialize, Serialize};

/// Scalar quantizer storing one byte per dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    bits: u8,
    dimensions: usize,
    encoders: Vec<TileEncoder>,
}

impl ScalarQuantizer {
    pub fn new(dimensions: usize, bits: u8) -> Result<Self> {
        if bits == 0 || bits > MAX_QUANTIZER_BITS {
            return Err(AnnError::InvalidConfig(format!(
                "quantizer bits must be in 1..={}, got {}",
                MAX_QUANTIZER_BITS, bits
            )));
        }
        if dimensions == 0 {
            return Err(AnnError::InvalidConfig(
                "quantizer needs at least one dimension".into(),
            ));
        }
        Ok(Self {
            bits,
            dimensions,
            encoders: (0..dimensions).map(|_| TileEncoder::new(bits)).collect(),
        })
    }

    /// Observe one training vector
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector.len())?;
        for (encoder, &value) in self.encoders.iter_mut().zip(vector) {
            encoder.add(value);
        }
        Ok(())
    }

    /// Train on every vector in a source
    pub fn fit<S: VectorSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        for id in 0..source.len() as VectorId {
            let vector = source
                .vector_for_id(id)
                .map_err(|e| AnnError::fetch(id, e))?;
            self.add(&vector)?;
        }
        Ok(())
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.dimensions);
        self.encode_into(vector, &mut out)?;
        Ok(out)
    }

    /// Append the codes of `vector` to `out`
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) -> Result<()> {
        self.check_dimensions(vector.len())?;
        for (encoder, &value) in self.encoders.iter().zip(vector) {
            out.push(encoder.encode(value)?);
        }
        Ok(())
    }

    /// Reconstruct a vector from its codes (centroid of each tile)
    pub fn decode(&self, codes: &[u8]) -> Result<Embedding> {
        self.check_dimensions(codes.len())?;
        self.encoders
            .iter()
            .zip(codes)
            .map(|(encoder, &code)| encoder.centroid(code as usize))
            .collect()
    }

    /// Asymmetric distance between an exact query and a coded vector
    pub fn distance(&self, query: &[f32], codes: &[u8], metric: Distance) -> Result<f32> {
        self.check_dimensions(query.len())?;
        let reconstructed = self.decode(codes)?;
        Ok(calculate_distance(query, &reconstructed, metric))
    }

    /// Precompute per-code partial distances for one query.
    ///
    /// Scoring many code vectors against the same query through the table
    /// avoids decoding each one.
    pub fn query_table(&self, query: &[f32], metric: Distance) -> Result<QueryTable> {
        self.check_dimensions(query.len())?;
        let codes = self.buckets() + 1;
        let mut partial = Vec::with_capacity(self.dimensions * codes);
        let mut squares = Vec::new();
        if metric == Distance::Cosine {
            squares.reserve(self.dimensions * codes);
        }

        for (encoder, &q) in self.encoders.iter().zip(query) {
            for c in encoder.code_centroids()? {
                partial.push(match metric {
                    Distance::L2 => (q - c) * (q - c),
                    Distance::Dot => -q * c,
                    Distance::Cosine => q * c,
                });
                if metric == Distance::Cosine {
                    squares.push(c * c);
                }
            }
        }

        Ok(QueryTable {
            metric,
            codes,
            partial,
            squares,
            query_norm: crate::distance::norm(query),
        })
    }

    pub fn is_trained(&self) -> bool {
        self.encoders.iter().all(|e| e.is_trained())
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of regular tiles per dimension
    pub fn buckets(&self) -> usize {
        1usize << self.bits
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Encoder for one dimension
    pub fn encoder(&self, dimension: usize) -> Option<&TileEncoder> {
        self.encoders.get(dimension)
    }

    fn check_dimensions(&self, actual: usize) -> Result<()> {
        if actual != self.dimensions {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}

/// Lookup table of partial distances for one query
#[derive(Debug, Clone)]
pub struct QueryTable {
    metric: Distance,
    /// Codes per dimension, including the saturation code
    codes: usize,
    partial: Vec<f32>,
    /// Squared centroids, cosine only
    squares: Vec<f32>,
    query_norm: f32,
}

impl QueryTable {
    /// Distance from the query to a coded vector.
    ///
    /// `codes` must come from the quantizer that built this table.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        let mut sum = 0.0f32;
        for (d, &code) in codes.iter().enumerate() {
            sum += self.partial[d * self.codes + code as usize];
        }

        match self.metric {
            Distance::L2 | Distance::Dot => sum,
            Distance::Cosine => {
                let mut norm_sq = 0.0f32;
                for (d, &code) in codes.iter().enumerate() {
                    norm_sq += self.squares[d * self.codes + code as usize];
                }
                let norm = norm_sq.sqrt();
                if self.query_norm == 0.0 || norm == 0.0 {
                    return 1.0;
                }
                1.0 - (sum / (self.query_norm * norm)).clamp(-1.0, 1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dims: usize, seed: u64) -> Vec<Embedding> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn trained(vectors: &[Embedding], bits: u8) -> ScalarQuantizer {
        let mut quantizer = ScalarQuantizer::new(vectors[0].len(), bits).unwrap();
        for v in vectors {
            quantizer.add(v).unwrap();
        }
        quantizer
    }

    #[test]
    fn test_invalid_construction() {
        assert!(ScalarQuantizer::new(4, 0).is_err());
        assert!(ScalarQuantizer::new(4, 8).is_err());
        assert!(ScalarQuantizer::new(0, 4).is_err());
    }

    #[test]
    fn test_untrained_encode_fails() {
        let quantizer = ScalarQuantizer::new(3, 4).unwrap();
        assert!(!quantizer.is_trained());
        assert!(matches!(
            quantizer.encode(&[0.0, 0.0, 0.0]),
            Err(AnnError::NotTrained(_))
        ));
    }

    #[test]
    fn test_encode_decode_error_is_bounded() {
        let vectors = random_vectors(2000, 16, 1);
        let quantizer = trained(&vectors, 6);

        let mut total = 0.0f32;
        for v in &vectors[..100] {
            let codes = quantizer.encode(v).unwrap();
            assert_eq!(codes.len(), 16);
            let decoded = quantizer.decode(&codes).unwrap();
            total += calculate_distance(v, &decoded, Distance::L2);
        }
        // 64 tiles over [-1, 1) leave small per-dimension error
        assert!(total / 100.0 < 0.05, "mean squared error {}", total / 100.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let quantizer = trained(&random_vectors(100, 4, 2), 4);
        assert!(matches!(
            quantizer.encode(&[1.0, 2.0]),
            Err(AnnError::DimensionMismatch { expected: 4, actual: 2 })
        ));
        assert!(quantizer.decode(&[0, 0, 0]).is_err());
    }

    #[test]
    fn test_table_matches_decoded_distance() {
        let vectors = random_vectors(500, 8, 3);
        let quantizer = trained(&vectors, 4);
        let query = &vectors[7];

        for metric in [Distance::L2, Distance::Dot, Distance::Cosine] {
            let table = quantizer.query_table(query, metric).unwrap();
            for v in &vectors[..20] {
                let codes = quantizer.encode(v).unwrap();
                let direct = quantizer.distance(query, &codes, metric).unwrap();
                assert!(
                    (table.distance(&codes) - direct).abs() < 1e-4,
                    "{:?}: table {} vs direct {}",
                    metric,
                    table.distance(&codes),
                    direct
                );
            }
        }
    }

    #[test]
    fn test_fit_from_source() {
        let vectors = random_vectors(50, 3, 4);
        let source = InMemorySource::new(vectors.clone()).unwrap();
        let mut quantizer = ScalarQuantizer::new(3, 3).unwrap();
        quantizer.fit(&source).unwrap();
        assert!(quantizer.is_trained());
        assert_eq!(quantizer.encoder(0).unwrap().count(), 50);
    }
}
