//! Metadata side-table for indexed questions.
//!
//! The vector index stores only embeddings; this store holds the
//! human-readable context for each vector id and is persisted
//! independently, one JSON file per namespace. The two stores are never
//! implicitly synchronized: after a successful append the caller must
//! save both (index first, then metadata) to preserve the id-alignment
//! invariant.
//!
//! On disk the map is a JSON object whose top-level keys are
//! string-encoded integer ids. Keys are converted back to integers at the
//! deserialization boundary; a non-numeric key means the file was edited
//! or corrupted and load fails rather than guessing.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::Namespace;
use crate::vector::VectorId;

/// Where an indexed question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Youtube,
    Podcast,
    YoutubePodcast,
    Article,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Youtube => "youtube",
            Self::Podcast => "podcast",
            Self::YoutubePodcast => "youtube_podcast",
            Self::Article => "article",
        };
        write!(f, "{name}")
    }
}

/// Source attribution consumed at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_type: SourceType,
    pub source_url: String,
    pub source_title: String,
    /// Seconds into the source, when the question has a known position.
    pub timestamp: Option<f64>,
    /// ISO date of the interview or article.
    pub date: Option<String>,
}

/// One indexed question with full context, keyed by its vector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub celebrity_name: String,
    pub question_text: String,
    pub source_type: SourceType,
    pub source_url: String,
    pub source_title: String,
    pub timestamp: Option<f64>,
    pub date: Option<String>,
    /// RFC 3339 timestamp of insertion.
    pub indexed_at: String,
}

impl QuestionRecord {
    fn new(celebrity_name: &str, question_text: &str, source: &SourceRecord) -> Self {
        Self {
            celebrity_name: celebrity_name.to_string(),
            question_text: question_text.to_string(),
            source_type: source.source_type,
            source_url: source.source_url.clone(),
            source_title: source.source_title.clone(),
            timestamp: source.timestamp,
            date: source.date.clone(),
            indexed_at: Utc::now().to_rfc3339(),
        }
    }

    /// The source attribution portion of this record.
    #[must_use]
    pub fn source(&self) -> SourceRecord {
        SourceRecord {
            source_type: self.source_type,
            source_url: self.source_url.clone(),
            source_title: self.source_title.clone(),
            timestamp: self.timestamp,
            date: self.date.clone(),
        }
    }
}

/// Errors from metadata persistence and batch validation.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("No metadata loaded for namespace '{0}'\nSuggestion: Load or add metadata before saving")]
    NamespaceNotFound(Namespace),

    #[error(
        "Length mismatch: {ids} ids, {texts} texts, {sources} sources\nSuggestion: Every appended vector needs exactly one text and one source record"
    )]
    LengthMismatch {
        ids: usize,
        texts: usize,
        sources: usize,
    },

    #[error("Metadata file for '{namespace}' is corrupt: {reason}\nSuggestion: Delete the namespace and re-index from source")]
    Corrupt { namespace: Namespace, reason: String },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Io(#[from] std::io::Error),
}

/// Result type alias for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Per-namespace map from vector id to question context.
///
/// `BTreeMap` keeps ids ordered so saved files diff cleanly between runs.
#[derive(Debug)]
pub struct MetadataStore {
    storage_dir: PathBuf,
    metadata: HashMap<Namespace, BTreeMap<u32, QuestionRecord>>,
}

impl MetadataStore {
    /// Creates a store rooted at `storage_dir`, creating the directory if
    /// needed.
    pub fn new(storage_dir: impl AsRef<Path>) -> MetadataResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        Ok(Self {
            storage_dir,
            metadata: HashMap::new(),
        })
    }

    fn metadata_path(&self, namespace: &Namespace) -> PathBuf {
        self.storage_dir.join(format!("{namespace}_metadata.json"))
    }

    /// Loads metadata for a namespace from disk.
    ///
    /// Returns `Ok(false)` and leaves the namespace empty when no file
    /// exists; an unreadable or corrupt file is an error.
    pub fn load(&mut self, namespace: &Namespace) -> MetadataResult<bool> {
        let path = self.metadata_path(namespace);

        if !path.exists() {
            warn!("No metadata found for '{namespace}'");
            self.metadata.insert(namespace.clone(), BTreeMap::new());
            return Ok(false);
        }

        let json = std::fs::read_to_string(&path)?;
        let raw: BTreeMap<String, QuestionRecord> =
            serde_json::from_str(&json).map_err(|e| MetadataError::Corrupt {
                namespace: namespace.clone(),
                reason: e.to_string(),
            })?;

        // String keys on disk, integer keys in memory
        let mut records = BTreeMap::new();
        for (key, record) in raw {
            let id: u32 = key.parse().map_err(|_| MetadataError::Corrupt {
                namespace: namespace.clone(),
                reason: format!("non-numeric id key '{key}'"),
            })?;
            records.insert(id, record);
        }

        info!("Loaded metadata for {} questions in '{namespace}'", records.len());
        self.metadata.insert(namespace.clone(), records);
        Ok(true)
    }

    /// Saves a namespace's metadata to disk atomically.
    pub fn save(&self, namespace: &Namespace) -> MetadataResult<()> {
        let records = self
            .metadata
            .get(namespace)
            .ok_or_else(|| MetadataError::NamespaceNotFound(namespace.clone()))?;

        let keyed: BTreeMap<String, &QuestionRecord> = records
            .iter()
            .map(|(id, record)| (id.to_string(), record))
            .collect();
        let json = serde_json::to_string_pretty(&keyed).map_err(|e| MetadataError::Corrupt {
            namespace: namespace.clone(),
            reason: format!("serialization failed: {e}"),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.storage_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.metadata_path(namespace))
            .map_err(|e| MetadataError::Io(e.error))?;

        info!("Saved metadata for '{namespace}' ({} records)", records.len());
        Ok(())
    }

    /// Adds one record per id for a freshly appended batch.
    ///
    /// The three sequences must have equal length; the namespace is
    /// created lazily if this is its first batch.
    pub fn add_metadata(
        &mut self,
        namespace: &Namespace,
        celebrity_name: &str,
        ids: &[VectorId],
        texts: &[&str],
        sources: &[SourceRecord],
    ) -> MetadataResult<()> {
        if ids.len() != texts.len() || ids.len() != sources.len() {
            return Err(MetadataError::LengthMismatch {
                ids: ids.len(),
                texts: texts.len(),
                sources: sources.len(),
            });
        }

        let records = self.metadata.entry(namespace.clone()).or_default();
        for ((id, text), source) in ids.iter().zip(texts).zip(sources) {
            records.insert(id.get(), QuestionRecord::new(celebrity_name, text, source));
        }

        info!("Added metadata for {} questions to '{namespace}'", ids.len());
        Ok(())
    }

    /// Returns the record for an id, or `None` when unknown.
    ///
    /// Absence is not an error: retrieval tolerates missing metadata
    /// without failing the whole query.
    #[must_use]
    pub fn get_metadata(&self, namespace: &Namespace, id: VectorId) -> Option<&QuestionRecord> {
        self.metadata.get(namespace)?.get(&id.get())
    }

    /// Batch lookup, order-preserving, `None` for missing ids.
    #[must_use]
    pub fn get_batch_metadata(
        &self,
        namespace: &Namespace,
        ids: &[VectorId],
    ) -> Vec<Option<QuestionRecord>> {
        match self.metadata.get(namespace) {
            Some(records) => ids
                .iter()
                .map(|id| records.get(&id.get()).cloned())
                .collect(),
            None => vec![None; ids.len()],
        }
    }

    /// Number of records held for the namespace.
    #[must_use]
    pub fn question_count(&self, namespace: &Namespace) -> usize {
        self.metadata.get(namespace).map_or(0, BTreeMap::len)
    }

    /// Count of records per source type.
    #[must_use]
    pub fn get_sources_summary(&self, namespace: &Namespace) -> HashMap<SourceType, usize> {
        let mut summary = HashMap::new();
        if let Some(records) = self.metadata.get(namespace) {
            for record in records.values() {
                *summary.entry(record.source_type).or_insert(0) += 1;
            }
        }
        summary
    }

    /// Whether a metadata file exists on disk for the namespace.
    #[must_use]
    pub fn exists(&self, namespace: &Namespace) -> bool {
        self.metadata_path(namespace).exists()
    }

    /// Removes the namespace's metadata from memory and disk.
    pub fn delete(&mut self, namespace: &Namespace) -> MetadataResult<()> {
        self.metadata.remove(namespace);

        let path = self.metadata_path(namespace);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        info!("Deleted metadata for '{namespace}'");
        Ok(())
    }
}
