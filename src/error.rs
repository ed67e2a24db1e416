use thiserror::Error;

use crate::types::VectorId;

#[derive(Error, Debug)]
pub enum AnnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector set is empty")]
    EmptyDataset,

    #[error("Vector not found: {0}")]
    VectorNotFound(VectorId),

    #[error("Failed to fetch vector {id}: {source}")]
    Fetch {
        id: VectorId,
        source: Box<AnnError>,
    },

    #[error("Entry point error: {0}")]
    EntryPoint(String),

    #[error("Quantizer not trained: {0}")]
    NotTrained(String),

    #[error("Invalid bucket {bucket}: quantizer has {buckets} buckets")]
    InvalidBucket { bucket: usize, buckets: usize },

    #[error("Invalid index format: {0}")]
    InvalidFormat(String),

    #[error("Index version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Checksum mismatch: index data may be corrupted")]
    ChecksumMismatch,

    #[error("Index error: {0}")]
    IndexError(String),
}

impl AnnError {
    /// Wrap a source failure with the id that was being fetched.
    pub fn fetch(id: VectorId, err: AnnError) -> Self {
        match err {
            // Already attributed, keep the innermost id
            AnnError::Fetch { .. } => err,
            other => AnnError::Fetch {
                id,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AnnError>;

impl From<bincode::Error> for AnnError {
    fn from(err: bincode::Error) -> Self {
        AnnError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AnnError {
    fn from(err: serde_json::Error) -> Self {
        AnnError::Serialization(err.to_string())
    }
}
