//! Ingestion glue: embed a question batch, append to both stores,
//! persist both.
//!
//! This is the only writer in the system. The append-and-persist cycle
//! is fixed: embed, add vectors, add metadata under the returned ids,
//! save the index, save the metadata, in that order, before success is
//! reported to the caller. Both stores are saved after every batch so
//! the id-alignment invariant (equal counts, identical id sets) holds at
//! every commit point; a crash mid-batch loses the uncommitted batch but
//! never the alignment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::dedup::QuestionCandidate;
use crate::embedding::{EmbeddingError, TextEmbedder};
use crate::store::{MetadataError, MetadataStore, SourceRecord, SourceType};
use crate::types::Namespace;
use crate::vector::{VectorError, VectorId, VectorIndexManager};

/// Errors from the ingestion path.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Celebrity name is blank\nSuggestion: Ingestion requires a non-empty celebrity name")]
    BlankCelebrity,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Result type alias for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Counts describing one namespace's indexed content.
#[derive(Debug, Clone)]
pub struct NamespaceStats {
    pub question_count: usize,
    pub sources: HashMap<SourceType, usize>,
}

/// Appends question batches to a namespace and persists both stores.
///
/// One indexer instance is the single writer for the namespaces it
/// touches; retrieval against a namespace must be serialized around its
/// writes by the caller.
pub struct QuestionIndexer {
    embedder: Arc<dyn TextEmbedder>,
    index: VectorIndexManager,
    store: MetadataStore,
}

impl QuestionIndexer {
    /// Creates an indexer over the given storage directories.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index_dir: impl AsRef<Path>,
        metadata_dir: impl AsRef<Path>,
    ) -> IngestResult<Self> {
        let index = VectorIndexManager::new(index_dir)?;
        let store = MetadataStore::new(metadata_dir)?;

        Ok(Self {
            embedder,
            index,
            store,
        })
    }

    /// Indexes a batch of questions for a celebrity and persists both
    /// stores. Returns the contiguous vector ids assigned to the batch.
    ///
    /// The namespace is created lazily on its first batch; later batches
    /// keep appending at the persisted size.
    pub fn index_batch(
        &mut self,
        celebrity: &str,
        items: &[QuestionCandidate],
    ) -> IngestResult<Vec<VectorId>> {
        let namespace = Namespace::new(celebrity).ok_or(IngestError::BlankCelebrity)?;

        if items.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_namespace(&namespace)?;

        let texts: Vec<&str> = items.iter().map(|q| q.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let ids = self.index.add_vectors(&namespace, &vectors, true)?;
        let sources: Vec<SourceRecord> = items.iter().map(|q| q.source.clone()).collect();
        self.store
            .add_metadata(&namespace, celebrity, &ids, &texts, &sources)?;

        // Index first, then metadata; success is only reported once both
        // snapshots are on disk.
        self.index.save(&namespace)?;
        self.store.save(&namespace)?;

        info!(
            "Indexed {} questions for '{celebrity}' (namespace now {})",
            items.len(),
            self.index.size(&namespace)
        );
        Ok(ids)
    }

    fn ensure_namespace(&mut self, namespace: &Namespace) -> IngestResult<()> {
        if self.index.is_loaded(namespace) {
            return Ok(());
        }

        if !self.index.load(namespace)? {
            self.index.create(namespace, self.embedder.dimension());
        }
        self.store.load(namespace)?;
        Ok(())
    }

    /// Deletes a namespace in its entirety: vectors, size side-car and
    /// metadata, in memory and on disk.
    pub fn remove_namespace(&mut self, celebrity: &str) -> IngestResult<()> {
        let namespace = Namespace::new(celebrity).ok_or(IngestError::BlankCelebrity)?;

        self.index.delete(&namespace)?;
        self.store.delete(&namespace)?;
        Ok(())
    }

    /// Counts for a namespace, loading it from disk if needed.
    pub fn stats(&mut self, celebrity: &str) -> IngestResult<NamespaceStats> {
        let namespace = Namespace::new(celebrity).ok_or(IngestError::BlankCelebrity)?;

        if !self.index.is_loaded(&namespace) {
            self.index.load(&namespace)?;
            self.store.load(&namespace)?;
        }

        Ok(NamespaceStats {
            question_count: self.index.size(&namespace),
            sources: self.store.get_sources_summary(&namespace),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use tempfile::TempDir;

    fn candidate(text: &str, source_type: SourceType) -> QuestionCandidate {
        QuestionCandidate {
            text: text.to_string(),
            source: SourceRecord {
                source_type,
                source_url: "https://example.com/interview".to_string(),
                source_title: "Interview".to_string(),
                timestamp: None,
                date: Some("2024-05-01".to_string()),
            },
        }
    }

    #[test]
    fn test_index_batch_assigns_contiguous_ids() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();

        let batch = vec![
            candidate("What inspired you to act?", SourceType::Youtube),
            candidate("How do you prepare for roles?", SourceType::Podcast),
        ];
        let ids = indexer.index_batch("Test Celebrity", &batch).unwrap();
        assert_eq!(ids, vec![VectorId::new(0), VectorId::new(1)]);

        let more = indexer
            .index_batch(
                "Test Celebrity",
                &[candidate("Favorite co-star?", SourceType::Article)],
            )
            .unwrap();
        assert_eq!(more, vec![VectorId::new(2)]);
    }

    #[test]
    fn test_id_alignment_after_persist() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let celebrity = "Test Celebrity";
        let namespace = Namespace::new(celebrity).unwrap();

        {
            let mut indexer = QuestionIndexer::new(
                Arc::new(MockEmbedder::new()),
                index_dir.path(),
                metadata_dir.path(),
            )
            .unwrap();
            indexer
                .index_batch(
                    celebrity,
                    &[
                        candidate("What inspired you to act?", SourceType::Youtube),
                        candidate("How do you prepare for roles?", SourceType::Podcast),
                        candidate("What's your favorite food?", SourceType::Article),
                    ],
                )
                .unwrap();
        }

        // Fresh handles reading the persisted state: counts equal, every
        // vector id has a metadata record
        let mut index = VectorIndexManager::new(index_dir.path()).unwrap();
        let mut store = MetadataStore::new(metadata_dir.path()).unwrap();
        assert!(index.load(&namespace).unwrap());
        assert!(store.load(&namespace).unwrap());

        assert_eq!(index.size(&namespace), store.question_count(&namespace));
        for id in 0..index.size(&namespace) as u32 {
            assert!(
                store
                    .get_metadata(&namespace, VectorId::new(id))
                    .is_some(),
                "metadata missing for id {id}"
            );
        }
    }

    #[test]
    fn test_ids_continue_across_instances() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let celebrity = "Test Celebrity";

        {
            let mut indexer = QuestionIndexer::new(
                Arc::new(MockEmbedder::new()),
                index_dir.path(),
                metadata_dir.path(),
            )
            .unwrap();
            indexer
                .index_batch(
                    celebrity,
                    &[candidate("What inspired you to act?", SourceType::Youtube)],
                )
                .unwrap();
        }

        // A new writer resumes id assignment at the persisted size
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();
        let ids = indexer
            .index_batch(
                celebrity,
                &[candidate("Favorite co-star?", SourceType::Podcast)],
            )
            .unwrap();
        assert_eq!(ids, vec![VectorId::new(1)]);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();

        let ids = indexer.index_batch("Test Celebrity", &[]).unwrap();
        assert!(ids.is_empty());

        // Nothing was created on disk
        let namespace = Namespace::new("Test Celebrity").unwrap();
        let index = VectorIndexManager::new(index_dir.path()).unwrap();
        assert!(!index.index_exists(&namespace));
    }

    #[test]
    fn test_blank_celebrity_rejected() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();

        let result = indexer.index_batch("   ", &[candidate("q", SourceType::Youtube)]);
        assert!(matches!(result, Err(IngestError::BlankCelebrity)));
    }

    #[test]
    fn test_stats() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();

        indexer
            .index_batch(
                "Test Celebrity",
                &[
                    candidate("What inspired you to act?", SourceType::Youtube),
                    candidate("How do you prepare for roles?", SourceType::Youtube),
                    candidate("Favorite co-star?", SourceType::Article),
                ],
            )
            .unwrap();

        let stats = indexer.stats("Test Celebrity").unwrap();
        assert_eq!(stats.question_count, 3);
        assert_eq!(stats.sources[&SourceType::Youtube], 2);
        assert_eq!(stats.sources[&SourceType::Article], 1);
    }

    #[test]
    fn test_remove_namespace() {
        let index_dir = TempDir::new().unwrap();
        let metadata_dir = TempDir::new().unwrap();
        let namespace = Namespace::new("Test Celebrity").unwrap();
        let mut indexer = QuestionIndexer::new(
            Arc::new(MockEmbedder::new()),
            index_dir.path(),
            metadata_dir.path(),
        )
        .unwrap();

        indexer
            .index_batch(
                "Test Celebrity",
                &[candidate("What inspired you to act?", SourceType::Youtube)],
            )
            .unwrap();

        indexer.remove_namespace("Test Celebrity").unwrap();

        let index = VectorIndexManager::new(index_dir.path()).unwrap();
        let store = MetadataStore::new(metadata_dir.path()).unwrap();
        assert!(!index.index_exists(&namespace));
        assert!(!store.exists(&namespace));
    }
}
