//! Per-namespace flat vector storage with exact inner-product search.
//!
//! Each namespace owns one append-only store of L2-normalized embeddings,
//! so inner product equals cosine similarity. Search is exact brute force,
//! O(n·d) per query. The expected corpora are hundreds to low thousands
//! of questions per celebrity, where a scan completes in well under a
//! millisecond and no approximate structure earns its complexity.
//!
//! # Storage Format
//!
//! One binary file per namespace:
//! - Header (16 bytes): magic `QVEC`, version, dimension, vector count
//! - Vectors: contiguous f32 rows in little-endian format
//!
//! A JSON side-car (`<namespace>.size.json`) carries the authoritative
//! vector count so id assignment survives independently of the index
//! file's own bookkeeping. Saves write a complete snapshot to a temp file
//! and rename it into place; a crash mid-save leaves the old file intact.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Namespace;
use crate::vector::types::{
    VectorDimension, VectorError, VectorId, VectorResult, l2_normalize,
};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector index files.
const MAGIC_BYTES: &[u8; 4] = b"QVEC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Side-car record carrying the authoritative vector count.
#[derive(Debug, Serialize, Deserialize)]
struct SizeRecord {
    count: usize,
}

/// One namespace's in-memory index: normalized vectors in a row-major
/// buffer plus the count the next append starts from.
#[derive(Debug)]
struct NamespaceIndex {
    dimension: VectorDimension,
    /// Row-major storage, `count * dimension` values.
    data: Vec<f32>,
    count: usize,
}

impl NamespaceIndex {
    fn row(&self, idx: usize) -> &[f32] {
        let dim = self.dimension.get();
        &self.data[idx * dim..(idx + 1) * dim]
    }
}

/// Manages one flat vector index per namespace.
///
/// Indexes are created lazily, mutated only by batch append, persisted by
/// explicit [`save`](Self::save), and reloaded on demand for queries.
/// There is no per-record delete: a namespace is removed in its entirety
/// or not at all.
#[derive(Debug)]
pub struct VectorIndexManager {
    index_dir: PathBuf,
    indexes: HashMap<Namespace, NamespaceIndex>,
}

impl VectorIndexManager {
    /// Creates a manager rooted at `index_dir`, creating the directory if
    /// needed.
    pub fn new(index_dir: impl AsRef<Path>) -> VectorResult<Self> {
        let index_dir = index_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_dir)?;

        Ok(Self {
            index_dir,
            indexes: HashMap::new(),
        })
    }

    fn index_path(&self, namespace: &Namespace) -> PathBuf {
        self.index_dir.join(format!("{namespace}.qvec"))
    }

    fn size_path(&self, namespace: &Namespace) -> PathBuf {
        self.index_dir.join(format!("{namespace}.size.json"))
    }

    /// Allocates an empty index with fixed dimensionality.
    ///
    /// Subsequent [`add_vectors`](Self::add_vectors) calls with a different
    /// width fail with `DimensionMismatch`.
    pub fn create(&mut self, namespace: &Namespace, dimension: VectorDimension) {
        info!(
            "Creating index for '{namespace}' with dimension {}",
            dimension.get()
        );
        self.indexes.insert(
            namespace.clone(),
            NamespaceIndex {
                dimension,
                data: Vec::new(),
                count: 0,
            },
        );
    }

    /// Loads a previously saved index from disk into memory.
    ///
    /// Returns `Ok(false)`, not an error, when no index file exists for
    /// the namespace. Corrupt or version-incompatible files are errors.
    pub fn load(&mut self, namespace: &Namespace) -> VectorResult<bool> {
        let path = self.index_path(namespace);

        if !path.exists() {
            warn!("No index found for '{namespace}'");
            return Ok(false);
        }

        let file = File::open(&path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let (dimension, header_count) = read_header(&mmap)?;

        let dim = dimension.get();
        let expected_bytes = HEADER_SIZE + header_count * dim * BYTES_PER_F32;
        if mmap.len() < expected_bytes {
            return Err(VectorError::InvalidFormat(format!(
                "index file for '{namespace}' truncated: {} bytes, expected {expected_bytes}",
                mmap.len()
            )));
        }

        let mut data = Vec::with_capacity(header_count * dim);
        for i in 0..header_count * dim {
            let offset = HEADER_SIZE + i * BYTES_PER_F32;
            data.push(f32::from_le_bytes([
                mmap[offset],
                mmap[offset + 1],
                mmap[offset + 2],
                mmap[offset + 3],
            ]));
        }

        // The side-car count is authoritative for id assignment; the header
        // count only describes this file's payload.
        let count = match self.load_size_record(namespace)? {
            Some(sidecar) => {
                if sidecar != header_count {
                    warn!(
                        "Size side-car for '{namespace}' says {sidecar}, index file says {header_count}"
                    );
                }
                sidecar
            }
            None => header_count,
        };

        info!("Loaded index for '{namespace}' with {count} vectors");
        self.indexes.insert(
            namespace.clone(),
            NamespaceIndex {
                dimension,
                data,
                count,
            },
        );

        Ok(true)
    }

    fn load_size_record(&self, namespace: &Namespace) -> VectorResult<Option<usize>> {
        let path = self.size_path(namespace);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        let record: SizeRecord = serde_json::from_str(&json)
            .map_err(|e| VectorError::InvalidFormat(format!("size side-car unreadable: {e}")))?;
        Ok(Some(record.count))
    }

    /// Writes the full in-memory index to disk.
    ///
    /// The snapshot goes to a temp file that is renamed over the previous
    /// version, so from the caller's perspective either the new file is
    /// fully written or the old one remains. The size side-car is written
    /// after the index file.
    pub fn save(&self, namespace: &Namespace) -> VectorResult<()> {
        let index = self
            .indexes
            .get(namespace)
            .ok_or_else(|| VectorError::NamespaceNotFound(namespace.clone()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.index_dir)?;
        tmp.write_all(MAGIC_BYTES)?;
        tmp.write_all(&STORAGE_VERSION.to_le_bytes())?;
        tmp.write_all(&(index.dimension.get() as u32).to_le_bytes())?;
        tmp.write_all(&(index.count as u32).to_le_bytes())?;
        for value in &index.data {
            tmp.write_all(&value.to_le_bytes())?;
        }
        tmp.flush()?;
        tmp.persist(self.index_path(namespace))
            .map_err(|e| VectorError::Io(e.error))?;

        let record = SizeRecord { count: index.count };
        let json = serde_json::to_string(&record)
            .map_err(|e| VectorError::InvalidFormat(format!("size side-car serialization: {e}")))?;
        let mut size_tmp = tempfile::NamedTempFile::new_in(&self.index_dir)?;
        size_tmp.write_all(json.as_bytes())?;
        size_tmp.flush()?;
        size_tmp
            .persist(self.size_path(namespace))
            .map_err(|e| VectorError::Io(e.error))?;

        info!("Saved index for '{namespace}' ({} vectors)", index.count);
        Ok(())
    }

    /// Appends a batch of vectors and returns the contiguous id range
    /// assigned, starting at the namespace's current size.
    ///
    /// With `normalize` set (the usual case), each vector is divided by its
    /// Euclidean norm; a zero-norm vector fails the whole batch with
    /// `DegenerateVector` before anything is appended.
    pub fn add_vectors(
        &mut self,
        namespace: &Namespace,
        vectors: &[Vec<f32>],
        normalize: bool,
    ) -> VectorResult<Vec<VectorId>> {
        let index = self
            .indexes
            .get_mut(namespace)
            .ok_or_else(|| VectorError::NamespaceNotFound(namespace.clone()))?;

        for vector in vectors {
            index.dimension.validate_vector(vector)?;
        }

        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(vectors.len());
        for (position, vector) in vectors.iter().enumerate() {
            let mut row = vector.clone();
            if normalize && !l2_normalize(&mut row) {
                return Err(VectorError::DegenerateVector { position });
            }
            rows.push(row);
        }

        let start = index.count as u32;
        for row in &rows {
            index.data.extend_from_slice(row);
        }
        index.count += rows.len();

        let ids: Vec<VectorId> = (start..start + rows.len() as u32)
            .map(VectorId::new)
            .collect();

        debug!(
            "Appended {} vectors to '{namespace}' (ids {start}..{})",
            rows.len(),
            index.count
        );
        Ok(ids)
    }

    /// Exact nearest-neighbor search over the namespace.
    ///
    /// Normalizes the query, computes the inner product against every
    /// stored vector, and returns the `k` highest-scoring `(id, score)`
    /// pairs in descending score order with ties broken by ascending id,
    /// making results fully deterministic.
    pub fn search(
        &self,
        namespace: &Namespace,
        query: &[f32],
        k: usize,
    ) -> VectorResult<Vec<(VectorId, f32)>> {
        let index = self
            .indexes
            .get(namespace)
            .ok_or_else(|| VectorError::NamespaceNotFound(namespace.clone()))?;

        index.dimension.validate_vector(query)?;

        let mut normalized = query.to_vec();
        if !l2_normalize(&mut normalized) {
            return Err(VectorError::DegenerateVector { position: 0 });
        }

        // Scan the rows actually present; the side-car count governs id
        // assignment, not this file's payload
        let rows = index.data.len() / index.dimension.get();
        let mut scored: Vec<(VectorId, f32)> = (0..rows)
            .map(|i| {
                let score: f32 = index
                    .row(i)
                    .iter()
                    .zip(normalized.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (VectorId::new(i as u32), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Number of vectors currently held for the namespace (0 if neither
    /// created nor loaded).
    #[must_use]
    pub fn size(&self, namespace: &Namespace) -> usize {
        self.indexes.get(namespace).map_or(0, |index| index.count)
    }

    /// Whether the namespace is present in memory.
    #[must_use]
    pub fn is_loaded(&self, namespace: &Namespace) -> bool {
        self.indexes.contains_key(namespace)
    }

    /// Whether an index file exists on disk for the namespace.
    #[must_use]
    pub fn index_exists(&self, namespace: &Namespace) -> bool {
        self.index_path(namespace).exists()
    }

    /// Removes the namespace from memory and disk, both index file and
    /// size side-car. Missing files are fine; failed removals propagate.
    pub fn delete(&mut self, namespace: &Namespace) -> VectorResult<()> {
        self.indexes.remove(namespace);

        let index_path = self.index_path(namespace);
        if index_path.exists() {
            std::fs::remove_file(&index_path)?;
        }
        let size_path = self.size_path(namespace);
        if size_path.exists() {
            std::fs::remove_file(&size_path)?;
        }

        info!("Deleted index for '{namespace}'");
        Ok(())
    }
}

fn read_header(mmap: &Mmap) -> VectorResult<(VectorDimension, usize)> {
    if mmap.len() < HEADER_SIZE {
        return Err(VectorError::InvalidFormat(
            "file too small to contain header".to_string(),
        ));
    }

    if &mmap[0..4] != MAGIC_BYTES {
        return Err(VectorError::InvalidFormat("invalid magic bytes".to_string()));
    }

    let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        });
    }

    let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
    let dimension = VectorDimension::new(dim_value as usize)?;
    let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

    Ok((dimension, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    fn dim4() -> VectorDimension {
        VectorDimension::new(4).unwrap()
    }

    #[test]
    fn test_create_and_add() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("Test Celebrity");

        manager.create(&namespace, dim4());
        assert_eq!(manager.size(&namespace), 0);

        let vectors = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 2.0, 0.0, 0.0]];
        let ids = manager.add_vectors(&namespace, &vectors, true).unwrap();

        assert_eq!(ids, vec![VectorId::new(0), VectorId::new(1)]);
        assert_eq!(manager.size(&namespace), 2);

        // Ids keep counting from the current size
        let more = manager
            .add_vectors(&namespace, &[vec![0.0, 0.0, 3.0, 0.0]], true)
            .unwrap();
        assert_eq!(more, vec![VectorId::new(2)]);
    }

    #[test]
    fn test_add_requires_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();

        let result = manager.add_vectors(&ns("nobody"), &[vec![1.0; 4]], true);
        assert!(matches!(result, Err(VectorError::NamespaceNotFound(_))));
    }

    #[test]
    fn test_dimension_validation() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());

        let result = manager.add_vectors(&namespace, &[vec![1.0, 2.0]], true);
        assert!(matches!(
            result,
            Err(VectorError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_degenerate_vector_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());

        let result = manager.add_vectors(&namespace, &[vec![0.0; 4]], true);
        assert!(matches!(
            result,
            Err(VectorError::DegenerateVector { position: 0 })
        ));
        // Nothing was appended
        assert_eq!(manager.size(&namespace), 0);
    }

    #[test]
    fn test_search_ordering_and_ties() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());
        // Two identical vectors (tie) and one orthogonal
        let vectors = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
        ];
        manager.add_vectors(&namespace, &vectors, true).unwrap();

        let results = manager
            .search(&namespace, &[1.0, 0.0, 0.0, 0.0], 3)
            .unwrap();

        assert_eq!(results.len(), 3);
        // Tie between ids 0 and 1 resolves by ascending id
        assert_eq!(results[0].0, VectorId::new(0));
        assert_eq!(results[1].0, VectorId::new(1));
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        assert!(results[2].1 < 0.01);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());
        manager
            .add_vectors(&namespace, &[vec![1.0, 0.0, 0.0, 0.0]], true)
            .unwrap();

        let results = manager
            .search(&namespace, &[1.0, 0.0, 0.0, 0.0], 10)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let namespace = ns("Test Celebrity");

        {
            let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
            manager.create(&namespace, dim4());
            manager
                .add_vectors(
                    &namespace,
                    &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
                    true,
                )
                .unwrap();
            manager.save(&namespace).unwrap();
        }

        {
            let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
            assert!(manager.index_exists(&namespace));
            assert!(manager.load(&namespace).unwrap());
            assert_eq!(manager.size(&namespace), 2);

            let results = manager
                .search(&namespace, &[0.0, 1.0, 0.0, 0.0], 1)
                .unwrap();
            assert_eq!(results[0].0, VectorId::new(1));
            assert!((results[0].1 - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_missing_returns_false() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();

        assert!(!manager.load(&ns("never indexed")).unwrap());
        assert!(!manager.is_loaded(&ns("never indexed")));
    }

    #[test]
    fn test_save_requires_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let manager = VectorIndexManager::new(temp_dir.path()).unwrap();

        let result = manager.save(&ns("nobody"));
        assert!(matches!(result, Err(VectorError::NamespaceNotFound(_))));
    }

    #[test]
    fn test_delete_removes_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());
        manager
            .add_vectors(&namespace, &[vec![1.0, 0.0, 0.0, 0.0]], true)
            .unwrap();
        manager.save(&namespace).unwrap();
        assert!(manager.index_exists(&namespace));

        manager.delete(&namespace).unwrap();
        assert!(!manager.index_exists(&namespace));
        assert_eq!(manager.size(&namespace), 0);
        assert!(!manager.load(&namespace).unwrap());
    }

    #[test]
    fn test_rejects_corrupt_magic() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        std::fs::write(
            temp_dir.path().join(format!("{namespace}.qvec")),
            b"NOPE0000000000000000",
        )
        .unwrap();

        let result = manager.load(&namespace);
        assert!(matches!(result, Err(VectorError::InvalidFormat(_))));
    }

    #[test]
    fn test_stored_vectors_are_normalized() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = VectorIndexManager::new(temp_dir.path()).unwrap();
        let namespace = ns("test");

        manager.create(&namespace, dim4());
        // Magnitude should not matter once normalized
        manager
            .add_vectors(&namespace, &[vec![100.0, 0.0, 0.0, 0.0]], true)
            .unwrap();

        let results = manager
            .search(&namespace, &[0.5, 0.0, 0.0, 0.0], 1)
            .unwrap();
        assert!((results[0].1 - 1.0).abs() < 1e-6);
    }
}
