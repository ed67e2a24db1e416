//! Single-dimension tile encoder
//!
//! Learns a normal model of one dimension from a stream of values and splits
//! it into `2^bits` equal-probability tiles. Only running moments are kept, so
//! training is one pass and constant memory.

use crate::error::{AnnError, Result};

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::OnceLock;

/// Above this z-score the upper tail probability is below f64 resolution and
/// the value gets the saturation code.
const SATURATION_Z: f64 = 8.3;

/// Smallest spread, relative to the mean, used when all samples are equal.
/// Keeps boundaries strictly increasing.
const MIN_RELATIVE_STD: f64 = 1e-6;

/// Boundaries and centroids derived from the moments
#[derive(Debug, Clone)]
struct Tiles {
    mean: f64,
    std_dev: f64,
    /// Lower boundary of tiles 1..B (tile 0 is unbounded below)
    boundaries: Vec<f64>,
    /// Centroid of each tile
    centroids: Vec<f32>,
}

/// Equal-population scalar quantizer for one dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileEncoder {
    bits: u8,
    count: u64,
    sum: f64,
    sum_sq: f64,
    #[serde(skip)]
    tiles: OnceLock<Tiles>,
}

impl TileEncoder {
    /// Create an untrained encoder with `2^bits` tiles
    pub fn new(bits: u8) -> Self {
        Self {
            bits,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            tiles: OnceLock::new(),
        }
    }

    /// Observe one training value. Non-finite values are ignored.
    pub fn add(&mut self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let x = value as f64;
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
        self.tiles = OnceLock::new();
    }

    /// Number of regular tiles (B). Code B is the saturation code.
    pub fn buckets(&self) -> usize {
        1usize << self.bits
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of values observed
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_trained(&self) -> bool {
        self.count > 0
    }

    /// Mean of the observed values
    pub fn mean(&self) -> Result<f64> {
        Ok(self.tiles()?.mean)
    }

    /// Standard deviation of the model (floored so tiles never collapse)
    pub fn std_dev(&self) -> Result<f64> {
        Ok(self.tiles()?.std_dev)
    }

    /// Map a value to its tile.
    ///
    /// Returns the number of tile boundaries at or below `value`, so the
    /// result is monotonic in `value`. Values past the representable upper
    /// tail get code `buckets()`.
    pub fn encode(&self, value: f32) -> Result<u8> {
        let tiles = self.tiles()?;
        let x = value as f64;

        if (x - tiles.mean) / tiles.std_dev > SATURATION_Z {
            return Ok(self.buckets() as u8);
        }
        Ok(tiles.boundaries.partition_point(|b| *b <= x) as u8)
    }

    /// Representative value of a tile. The saturation code maps to the top tile.
    pub fn centroid(&self, bucket: usize) -> Result<f32> {
        let tiles = self.tiles()?;
        let buckets = self.buckets();
        if bucket > buckets {
            return Err(AnnError::InvalidBucket { bucket, buckets });
        }
        Ok(tiles.centroids[bucket.min(buckets - 1)])
    }

    /// Lower boundaries of tiles `1..B`, strictly increasing
    pub fn boundaries(&self) -> Result<&[f64]> {
        Ok(&self.tiles()?.boundaries)
    }

    /// Centroids of all tiles plus the saturation code, indexed by code
    pub fn code_centroids(&self) -> Result<Vec<f32>> {
        let tiles = self.tiles()?;
        let mut table = tiles.centroids.clone();
        table.push(tiles.centroids[tiles.centroids.len() - 1]);
        Ok(table)
    }

    fn tiles(&self) -> Result<&Tiles> {
        if self.count == 0 {
            return Err(AnnError::NotTrained(
                "no training values observed for this dimension".into(),
            ));
        }
        Ok(self.tiles.get_or_init(|| self.compute_tiles()))
    }

    fn compute_tiles(&self) -> Tiles {
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        let floor = MIN_RELATIVE_STD * mean.abs().max(1.0);
        let std_dev = variance.sqrt().max(floor);

        let buckets = self.buckets();
        let z: Vec<f64> = (1..buckets)
            .map(|i| inverse_normal_cdf(i as f64 / buckets as f64))
            .collect();

        let boundaries = z.iter().map(|zi| mean + std_dev * zi).collect();

        // Mean of the normal mass between consecutive boundaries
        let mass = 1.0 / buckets as f64;
        let centroids = (0..buckets)
            .map(|i| {
                let pdf_lo = if i == 0 { 0.0 } else { normal_pdf(z[i - 1]) };
                let pdf_hi = if i == buckets - 1 { 0.0 } else { normal_pdf(z[i]) };
                (mean + std_dev * (pdf_lo - pdf_hi) / mass) as f32
            })
            .collect();

        Tiles {
            mean,
            std_dev,
            boundaries,
            centroids,
        }
    }
}

/// Standard normal density
fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * PI).sqrt()
}

/// Standard normal quantile (Acklam's rational approximation, rel. error < 1.2e-9).
///
/// Returns exactly 0.0 at p = 0.5.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 1,000,000 samples centered at 100 with unit spread.
    ///
    /// Samples come in mirrored pairs (x, 200 - x) so the observed mean is
    /// exactly 100.
    fn trained_encoder() -> TileEncoder {
        let mut rng = StdRng::seed_from_u64(42);
        let mut encoder = TileEncoder::new(4);
        for _ in 0..500_000 {
            // Box-Muller
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            let x = (100.0 + z) as f32;
            encoder.add(x);
            encoder.add(200.0f32 - x);
        }
        encoder
    }

    #[test]
    fn test_encode_reference_values() {
        let encoder = trained_encoder();
        assert_eq!(encoder.encode(0.1).unwrap(), 0);
        assert_eq!(encoder.encode(100.0).unwrap(), 8);
        assert_eq!(encoder.encode(1000.0).unwrap(), 16);
    }

    #[test]
    fn test_centroid_reference_values() {
        let encoder = trained_encoder();
        assert_eq!(encoder.centroid(0).unwrap().round(), 98.0);
        assert_eq!(encoder.centroid(2).unwrap().round(), 99.0);
        assert_eq!(encoder.centroid(14).unwrap().round(), 101.0);
        assert_eq!(encoder.centroid(16).unwrap(), encoder.centroid(15).unwrap());
        assert!(matches!(
            encoder.centroid(17),
            Err(AnnError::InvalidBucket { bucket: 17, buckets: 16 })
        ));
    }

    #[test]
    fn test_encode_is_monotonic() {
        let encoder = trained_encoder();
        let mut previous = 0u8;
        let mut v = 90.0f32;
        while v < 110.0 {
            let code = encoder.encode(v).unwrap();
            assert!(code >= previous);
            previous = code;
            v += 0.01;
        }
    }

    #[test]
    fn test_boundaries_strictly_increasing() {
        let encoder = trained_encoder();
        let boundaries = encoder.boundaries().unwrap();
        assert_eq!(boundaries.len(), 15);
        assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_untrained_fails() {
        let encoder = TileEncoder::new(4);
        assert!(matches!(encoder.encode(1.0), Err(AnnError::NotTrained(_))));
        assert!(matches!(encoder.centroid(0), Err(AnnError::NotTrained(_))));
    }

    #[test]
    fn test_constant_input_keeps_tiles_distinct() {
        let mut encoder = TileEncoder::new(3);
        for _ in 0..100 {
            encoder.add(5.0);
        }
        let boundaries = encoder.boundaries().unwrap();
        assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(encoder.encode(4.0).unwrap(), 0);
        assert_eq!(encoder.encode(6.0).unwrap(), 8);
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut encoder = TileEncoder::new(2);
        encoder.add(f32::NAN);
        encoder.add(f32::INFINITY);
        assert!(!encoder.is_trained());
        encoder.add(1.0);
        assert_eq!(encoder.count(), 1);
    }

    #[test]
    fn test_inverse_normal_cdf() {
        assert_eq!(inverse_normal_cdf(0.5), 0.0);
        assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-5);
        assert!((inverse_normal_cdf(0.01) + 2.326348).abs() < 1e-5);
    }

    #[test]
    fn test_serde_roundtrip_reproduces_tiles() {
        let encoder = trained_encoder();
        let bytes = bincode::serialize(&encoder).unwrap();
        let restored: TileEncoder = bincode::deserialize(&bytes).unwrap();
        assert_eq!(encoder.boundaries().unwrap(), restored.boundaries().unwrap());
        assert_eq!(encoder.centroid(3).unwrap(), restored.centroid(3).unwrap());
    }
}
