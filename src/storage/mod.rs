//! Index persistence

pub mod format;
pub mod serializer;

pub use serializer::Serializer;

use crate::error::Result;
use crate::graph::{GraphIndex, IndexSnapshot};
use crate::source::VectorSource;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

impl GraphIndex {
    /// Write the index (graph, entry point, config and quantizer) to `path`.
    ///
    /// Vector data is not stored; reopen with the same source.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let start = Instant::now();

        let snapshot = self.snapshot();
        let payload = Serializer::serialize_value(&snapshot)?;
        format::write_file(path, &payload)?;

        info!(
            path = %path.display(),
            nodes = snapshot.edges.len(),
            bytes = payload.len() + format::HEADER_SIZE,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Saved index"
        );
        Ok(())
    }

    /// Load an index written by [`GraphIndex::save`].
    ///
    /// Fails on any corruption or if `source` does not match the saved
    /// dimensions and node count.
    pub fn open<P: AsRef<Path>>(path: P, source: Arc<dyn VectorSource>) -> Result<Self> {
        let path = path.as_ref();
        let start = Instant::now();

        let payload = format::read_file(path)?;
        let snapshot: IndexSnapshot = Serializer::deserialize_value(&payload)?;
        let index = GraphIndex::from_snapshot(snapshot, source)?;

        info!(
            path = %path.display(),
            nodes = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Opened index"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AnnError;
    use crate::graph::GraphIndex;
    use crate::source::{InMemorySource, VectorSource};
    use crate::types::{Embedding, IndexConfig};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn vectors(n: usize, dims: usize, seed: u64) -> Vec<Embedding> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_save_open_same_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.kann");
        let data = vectors(400, 8, 1);
        let source: Arc<dyn VectorSource> = Arc::new(InMemorySource::new(data).unwrap());

        let config = IndexConfig::new(12, 32).with_quantizer_bits(5);
        let index = GraphIndex::build(config, Arc::clone(&source)).unwrap();
        index.save(&path).unwrap();
        let reopened = GraphIndex::open(&path, Arc::clone(&source)).unwrap();

        assert_eq!(reopened.len(), index.len());
        assert_eq!(reopened.entry_point(), index.entry_point());
        assert_eq!(reopened.config(), index.config());
        for query in vectors(20, 8, 2) {
            assert_eq!(index.search(&query, 10).unwrap(), reopened.search(&query, 10).unwrap());
            assert_eq!(
                index.search_quantized(&query, 10).unwrap(),
                reopened.search_quantized(&query, 10).unwrap()
            );
        }
    }

    #[test]
    fn test_open_rejects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.kann");
        let source: Arc<dyn VectorSource> =
            Arc::new(InMemorySource::new(vectors(100, 4, 3)).unwrap());
        GraphIndex::build(IndexConfig::new(8, 16), Arc::clone(&source))
            .unwrap()
            .save(&path)
            .unwrap();

        let good = std::fs::read(&path).unwrap();
        let mut corrupt = good.clone();
        let middle = corrupt.len() / 2;
        corrupt[middle] ^= 0x55;
        std::fs::write(&path, &corrupt).unwrap();
        assert!(matches!(
            GraphIndex::open(&path, Arc::clone(&source)),
            Err(AnnError::ChecksumMismatch)
        ));

        std::fs::write(&path, &good[..good.len() / 2]).unwrap();
        assert!(matches!(
            GraphIndex::open(&path, Arc::clone(&source)),
            Err(AnnError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_open_rejects_mismatched_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.kann");
        let source: Arc<dyn VectorSource> =
            Arc::new(InMemorySource::new(vectors(100, 4, 4)).unwrap());
        GraphIndex::build(IndexConfig::new(8, 16), source)
            .unwrap()
            .save(&path)
            .unwrap();

        let wrong_dims = Arc::new(InMemorySource::new(vectors(100, 5, 4)).unwrap());
        assert!(matches!(
            GraphIndex::open(&path, wrong_dims),
            Err(AnnError::DimensionMismatch { expected: 4, actual: 5 })
        ));

        let too_few = Arc::new(InMemorySource::new(vectors(50, 4, 4)).unwrap());
        assert!(matches!(
            GraphIndex::open(&path, too_few),
            Err(AnnError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_reopened_index_keeps_runtime_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.kann");
        let source: Arc<dyn VectorSource> =
            Arc::new(InMemorySource::new(vectors(50, 4, 5)).unwrap());
        let index = GraphIndex::build(
            IndexConfig::new(8, 16).with_search_list_size(40),
            Arc::clone(&source),
        )
        .unwrap();
        index.set_search_list_size(7);
        index.save(&path).unwrap();

        // The runtime override is not persisted
        let reopened = GraphIndex::open(&path, source).unwrap();
        assert_eq!(reopened.search_list_size(), 40);
    }
}
