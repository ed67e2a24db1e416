//! Scalar quantization
//!
//! Each dimension is split into `2^bits` tiles of equal probability under a
//! normal model learned from training data. A vector is stored as one tile
//! code per dimension, and distances against a query are computed from the
//! tile centroids.

pub mod scalar;
pub mod tile;

pub use scalar::{QueryTable, ScalarQuantizer};
pub use tile::TileEncoder;
