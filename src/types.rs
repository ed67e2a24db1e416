//! Core types and index configuration

use crate::error::{AnnError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// A vector embedding (array of f32 values)
pub type Embedding = Vec<f32>;

/// Unique identifier for a vector entry
pub type VectorId = u64;

/// Distance metric for similarity calculations.
///
/// Smaller is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// Squared Euclidean distance
    #[default]
    L2,
    /// Negated dot product
    Dot,
    /// Cosine distance (1 - cosine_sim), range [0, 2]
    Cosine,
}

impl Distance {
    /// Returns the name of the distance metric
    pub fn name(&self) -> &'static str {
        match self {
            Distance::L2 => "l2",
            Distance::Dot => "dot",
            Distance::Cosine => "cosine",
        }
    }
}

impl std::str::FromStr for Distance {
    type Err = AnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "l2-squared" | "euclidean" => Ok(Distance::L2),
            "dot" | "dot_product" => Ok(Distance::Dot),
            "cosine" => Ok(Distance::Cosine),
            other => Err(AnnError::InvalidConfig(format!(
                "Unknown distance metric: {}",
                other
            ))),
        }
    }
}

/// Largest code width whose saturation code still fits in a byte
pub const MAX_QUANTIZER_BITS: u8 = 7;

/// Configuration for a graph index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// R: maximum out-degree of every node. Default: 32
    #[serde(default = "default_max_degree")]
    pub max_degree: usize,

    /// L: candidate list size used while building. Must be >= R. Default: 50
    #[serde(default = "default_build_list_size")]
    pub build_list_size: usize,

    /// L': candidate list size used by searches, tunable at runtime. Default: 100
    #[serde(default = "default_search_list_size")]
    pub search_list_size: usize,

    /// Pruning factor, >= 1.0. Higher keeps more long-range edges. Default: 1.2
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Distance metric to use
    #[serde(default)]
    pub distance: Distance,

    /// Number of overlapping clusters for the sharded build. 1 disables sharding.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// How many clusters each vector is assigned to in the sharded build. Default: 2
    #[serde(default = "default_overlap_factor")]
    pub overlap_factor: usize,

    /// Number of vectors sampled to learn the cluster centroids. Default: 10_000
    #[serde(default = "default_cluster_sample_size")]
    pub cluster_sample_size: usize,

    /// Code width of the scalar quantizer; `None` disables quantization
    #[serde(default)]
    pub quantizer_bits: Option<u8>,

    /// Refinement passes over all nodes. The first uses alpha = 1.0, the last `alpha`.
    #[serde(default = "default_refine_passes")]
    pub refine_passes: usize,

    /// Seed for shuffles, random initialization and clustering
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Worker threads for parallel build steps (0 = one per core)
    #[serde(default)]
    pub num_threads: usize,
}

fn default_max_degree() -> usize { 32 }
fn default_build_list_size() -> usize { 50 }
fn default_search_list_size() -> usize { 100 }
fn default_alpha() -> f32 { 1.2 }
fn default_shard_count() -> usize { 1 }
fn default_overlap_factor() -> usize { 2 }
fn default_cluster_sample_size() -> usize { 10_000 }
fn default_refine_passes() -> usize { 2 }
fn default_seed() -> u64 { 0x5eed }

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_degree: default_max_degree(),
            build_list_size: default_build_list_size(),
            search_list_size: default_search_list_size(),
            alpha: default_alpha(),
            distance: Distance::L2,
            shard_count: default_shard_count(),
            overlap_factor: default_overlap_factor(),
            cluster_sample_size: default_cluster_sample_size(),
            quantizer_bits: None,
            refine_passes: default_refine_passes(),
            seed: default_seed(),
            num_threads: 0,
        }
    }
}

impl IndexConfig {
    /// Create a config with the given degree bound and build list size
    pub fn new(max_degree: usize, build_list_size: usize) -> Self {
        Self {
            max_degree,
            build_list_size,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config: IndexConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the pruning factor
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the distance metric
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    /// Set the default search list size
    pub fn with_search_list_size(mut self, size: usize) -> Self {
        self.search_list_size = size;
        self
    }

    /// Enable the sharded build
    pub fn with_shards(mut self, shard_count: usize, overlap_factor: usize) -> Self {
        self.shard_count = shard_count;
        self.overlap_factor = overlap_factor;
        self
    }

    /// Enable scalar quantization with the given code width
    pub fn with_quantizer_bits(mut self, bits: u8) -> Self {
        self.quantizer_bits = Some(bits);
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the worker pool size
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Check every parameter, rejecting the first invalid one
    pub fn validate(&self) -> Result<()> {
        if self.max_degree == 0 {
            return Err(AnnError::InvalidConfig("max_degree (R) must be at least 1".into()));
        }
        if self.build_list_size < self.max_degree {
            return Err(AnnError::InvalidConfig(format!(
                "build_list_size (L={}) must be >= max_degree (R={})",
                self.build_list_size, self.max_degree
            )));
        }
        if self.search_list_size == 0 {
            return Err(AnnError::InvalidConfig("search_list_size must be at least 1".into()));
        }
        if !self.alpha.is_finite() || self.alpha < 1.0 {
            return Err(AnnError::InvalidConfig(format!(
                "alpha must be a finite value >= 1.0, got {}",
                self.alpha
            )));
        }
        if self.shard_count == 0 {
            return Err(AnnError::InvalidConfig("shard_count must be at least 1".into()));
        }
        if self.overlap_factor == 0
            || (self.shard_count > 1 && self.overlap_factor > self.shard_count)
        {
            return Err(AnnError::InvalidConfig(format!(
                "overlap_factor must be in 1..={}, got {}",
                self.shard_count, self.overlap_factor
            )));
        }
        if self.shard_count > 1 && self.cluster_sample_size < self.shard_count {
            return Err(AnnError::InvalidConfig(
                "cluster_sample_size must be >= shard_count".into(),
            ));
        }
        if let Some(bits) = self.quantizer_bits {
            if bits == 0 || bits > MAX_QUANTIZER_BITS {
                return Err(AnnError::InvalidConfig(format!(
                    "quantizer_bits must be in 1..={}, got {}",
                    MAX_QUANTIZER_BITS, bits
                )));
            }
        }
        if self.refine_passes == 0 {
            return Err(AnnError::InvalidConfig("refine_passes must be at least 1".into()));
        }
        Ok(())
    }

    /// Alpha used by refinement pass `pass` (0-based). Ramps from 1.0 up to `alpha`.
    pub(crate) fn pass_alpha(&self, pass: usize) -> f32 {
        if self.refine_passes <= 1 {
            return self.alpha;
        }
        let t = pass as f32 / (self.refine_passes - 1) as f32;
        1.0 + (self.alpha - 1.0) * t
    }
}

/// Limits on a single search. Expiry returns the best candidates found so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchBudget {
    /// Maximum number of nodes to expand
    pub max_visits: Option<usize>,
    /// Wall-clock deadline
    pub deadline: Option<Instant>,
}

impl SearchBudget {
    /// No limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Stop after expanding `visits` nodes
    pub fn visits(visits: usize) -> Self {
        Self {
            max_visits: Some(visits),
            deadline: None,
        }
    }

    /// Stop once `timeout` has elapsed from now
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            max_visits: None,
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub(crate) fn is_exhausted(&self, visited: usize) -> bool {
        if let Some(max) = self.max_visits {
            if visited >= max {
                return true;
            }
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}
