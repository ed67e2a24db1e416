//! keradb-ann: approximate nearest neighbor search for KeraDB
//!
//! A Vamana-style proximity graph over vectors that live in external storage,
//! with an optional per-dimension scalar quantizer for compact codes and cheap
//! approximate distances.
//!
//! ```no_run
//! use keradb_ann::{GraphIndex, InMemorySource, IndexConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> keradb_ann::Result<()> {
//! let source = Arc::new(InMemorySource::new(vec![vec![0.0, 1.0], vec![1.0, 0.0]])?);
//! let index = GraphIndex::build(IndexConfig::new(32, 50), source)?;
//! let nearest = index.search(&[0.1, 0.9], 1)?;
//! assert_eq!(nearest[0].0, 0);
//! # Ok(())
//! # }
//! ```

pub mod candidates;
pub mod distance;
pub mod error;
pub mod graph;
pub mod quantization;
pub mod source;
pub mod storage;
pub mod types;

pub use candidates::{CandidateEntry, CandidateSet, ExactDistance, QueryDistance};
pub use error::{AnnError, Result};
pub use graph::{ClusteredBuilder, GraphIndex, GraphStats};
pub use quantization::{ScalarQuantizer, TileEncoder};
pub use source::{FvecsSource, InMemorySource, SubsetSource, VectorSource};
pub use types::{Distance, Embedding, IndexConfig, SearchBudget, VectorId};
