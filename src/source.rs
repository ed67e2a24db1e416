//! Vector sources
//!
//! The index never owns vector data. It references vectors by id and fetches
//! them on demand through a [`VectorSource`], which is usually backed by the
//! database's storage layer.

use crate::error::{AnnError, Result};
use crate::types::{Embedding, VectorId};

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Fetches vectors by id.
///
/// Implementations are called concurrently from search and build workers.
pub trait VectorSource: Send + Sync {
    /// Fetch the vector stored under `id`
    fn vector_for_id(&self, id: VectorId) -> Result<Embedding>;

    /// Number of vectors. Ids are dense in `0..len()`.
    fn len(&self) -> usize;

    /// Dimensionality shared by every vector
    fn dimensions(&self) -> usize;

    /// Check if the source holds no vectors
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: VectorSource + ?Sized> VectorSource for Arc<S> {
    fn vector_for_id(&self, id: VectorId) -> Result<Embedding> {
        (**self).vector_for_id(id)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }
}

/// Vectors held in memory
#[derive(Debug, Clone)]
pub struct InMemorySource {
    dimensions: usize,
    vectors: Vec<Embedding>,
}

impl InMemorySource {
    /// Create a source, checking that every vector has the same dimensions
    pub fn new(vectors: Vec<Embedding>) -> Result<Self> {
        let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(AnnError::DimensionMismatch {
                expected: dimensions,
                actual: bad.len(),
            });
        }
        Ok(Self { dimensions, vectors })
    }

    /// Append a vector and return its id
    pub fn push(&mut self, vector: Embedding) -> Result<VectorId> {
        if self.vectors.is_empty() {
            self.dimensions = vector.len();
        } else if vector.len() != self.dimensions {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        self.vectors.push(vector);
        Ok((self.vectors.len() - 1) as VectorId)
    }

    /// Borrow all vectors
    pub fn vectors(&self) -> &[Embedding] {
        &self.vectors
    }
}

impl VectorSource for InMemorySource {
    fn vector_for_id(&self, id: VectorId) -> Result<Embedding> {
        self.vectors
            .get(id as usize)
            .cloned()
            .ok_or(AnnError::VectorNotFound(id))
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Memory-mapped `.fvecs` file.
///
/// Each record is a little-endian `i32` dimension followed by that many `f32`
/// values. All records must share one dimension.
pub struct FvecsSource {
    mmap: Mmap,
    dimensions: usize,
    count: usize,
}

impl FvecsSource {
    /// Map an `.fvecs` file and validate its layout
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the map is read-only; callers must not truncate the file while it is open
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.is_empty() {
            return Ok(Self {
                mmap,
                dimensions: 0,
                count: 0,
            });
        }
        if mmap.len() < 4 {
            return Err(AnnError::InvalidFormat("fvecs file too short".into()));
        }

        let dim = i32::from_le_bytes([mmap[0], mmap[1], mmap[2], mmap[3]]);
        if dim <= 0 {
            return Err(AnnError::InvalidFormat(format!("invalid fvecs dimension {}", dim)));
        }
        let dimensions = dim as usize;
        let record = 4 + dimensions * 4;
        if mmap.len() % record != 0 {
            return Err(AnnError::InvalidFormat(format!(
                "fvecs length {} is not a multiple of record size {}",
                mmap.len(),
                record
            )));
        }
        let count = mmap.len() / record;

        for i in 0..count {
            let off = i * record;
            let d = i32::from_le_bytes([mmap[off], mmap[off + 1], mmap[off + 2], mmap[off + 3]]);
            if d != dim {
                return Err(AnnError::InvalidFormat(format!(
                    "record {} has dimension {}, expected {}",
                    i, d, dim
                )));
            }
        }

        Ok(Self {
            mmap,
            dimensions,
            count,
        })
    }

    /// Write vectors in `.fvecs` layout
    pub fn write<P: AsRef<Path>>(path: P, vectors: &[Embedding]) -> Result<()> {
        use std::io::Write;

        let mut out = std::io::BufWriter::new(File::create(path.as_ref())?);
        for v in vectors {
            out.write_all(&(v.len() as i32).to_le_bytes())?;
            for x in v {
                out.write_all(&x.to_le_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl VectorSource for FvecsSource {
    fn vector_for_id(&self, id: VectorId) -> Result<Embedding> {
        if id as usize >= self.count {
            return Err(AnnError::VectorNotFound(id));
        }
        let record = 4 + self.dimensions * 4;
        let start = id as usize * record + 4;
        let bytes = &self.mmap[start..start + self.dimensions * 4];

        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A dense view over a subset of another source.
///
/// Local id `i` maps to `ids[i]` in the parent. Used to build per-cluster
/// sub-graphs with the regular builder.
pub struct SubsetSource<S: ?Sized> {
    parent: Arc<S>,
    ids: Vec<VectorId>,
}

impl<S: VectorSource + ?Sized> SubsetSource<S> {
    pub fn new(parent: Arc<S>, ids: Vec<VectorId>) -> Self {
        Self { parent, ids }
    }

    /// Translate a local id back to the parent's id space
    pub fn global_id(&self, local: VectorId) -> Option<VectorId> {
        self.ids.get(local as usize).copied()
    }

    pub fn ids(&self) -> &[VectorId] {
        &self.ids
    }
}

impl<S: VectorSource + ?Sized> VectorSource for SubsetSource<S> {
    fn vector_for_id(&self, id: VectorId) -> Result<Embedding> {
        let global = self.global_id(id).ok_or(AnnError::VectorNotFound(id))?;
        self.parent.vector_for_id(global)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn dimensions(&self) -> usize {
        self.parent.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_source() {
        let mut source = InMemorySource::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.dimensions(), 2);
        assert_eq!(source.vector_for_id(1).unwrap(), vec![3.0, 4.0]);
        assert!(matches!(source.vector_for_id(2), Err(AnnError::VectorNotFound(2))));

        assert_eq!(source.push(vec![5.0, 6.0]).unwrap(), 2);
        assert!(source.push(vec![1.0]).is_err());
    }

    #[test]
    fn test_in_memory_rejects_ragged() {
        let err = InMemorySource::new(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, AnnError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_fvecs_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.fvecs");
        let vectors = vec![vec![0.5, -1.0, 2.0], vec![3.0, 4.0, 5.5]];
        FvecsSource::write(&path, &vectors).unwrap();

        let source = FvecsSource::open(&path).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.dimensions(), 3);
        assert_eq!(source.vector_for_id(0).unwrap(), vectors[0]);
        assert_eq!(source.vector_for_id(1).unwrap(), vectors[1]);
        assert!(source.vector_for_id(2).is_err());
    }

    #[test]
    fn test_fvecs_rejects_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.fvecs");
        FvecsSource::write(&path, &[vec![1.0, 2.0, 3.0]]).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(FvecsSource::open(&path), Err(AnnError::InvalidFormat(_))));
    }

    #[test]
    fn test_subset_source() {
        let parent = Arc::new(
            InMemorySource::new(vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]]).unwrap(),
        );
        let subset = SubsetSource::new(parent, vec![3, 1]);
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.vector_for_id(0).unwrap(), vec![3.0]);
        assert_eq!(subset.global_id(1), Some(1));
        assert!(subset.vector_for_id(2).is_err());
    }
}
