//! Threshold-based semantic retrieval.
//!
//! The defining contract of this engine: a query returns EVERY indexed
//! question whose similarity clears the configured threshold, whether that
//! is one match, five, or none. It is never "the top K", and callers must not
//! treat it that way. A candidate pool larger than needed is fetched from
//! the index so borderline matches are not lost to an arbitrarily small
//! k, then the threshold does the actual selection.
//!
//! Query-path absences (unknown namespace, empty index, missing metadata
//! for an id) are normal outcomes, reported as empty results or a
//! [`NoResultsReason`], never as errors.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedding::{EmbeddingError, TextEmbedder};
use crate::store::{MetadataError, MetadataStore, QuestionRecord};
use crate::types::Namespace;
use crate::vector::{VectorError, VectorIndexManager};

/// Default minimum cosine similarity for a match. ~0.50 works well for
/// interview questions with all-MiniLM-L6-v2.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.50;

/// Default candidate pool fetched from the index before threshold
/// filtering.
pub const DEFAULT_CANDIDATE_POOL: usize = 20;

/// Errors from retrieval operations.
///
/// Note that "nothing found" is not in here: empty results are values,
/// not errors.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Similarity threshold must be between 0 and 1, got {0}")]
    InvalidThreshold(f32),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Result type alias for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// One question that cleared the threshold, with its score.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatch {
    pub id: u32,
    #[serde(flatten)]
    pub record: QuestionRecord,
    pub similarity_score: f32,
}

/// A retrieval result with the context downstream consumers need to
/// decide what to do with it.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalReport {
    pub matches: Vec<SimilarityMatch>,
    pub count: usize,
    pub threshold_used: f32,
    /// Highest similarity seen, 0.0 when there were no matches.
    pub max_similarity: f32,
    pub query: String,
    pub celebrity: String,
}

/// Why a query produced nothing, as a machine-readable reason.
///
/// Lets the answer layer distinguish "never indexed" from "indexed but
/// empty" from "indexed but the closest match scored X".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoResultsReason {
    /// No index has ever been saved for this celebrity.
    NoIndex,
    /// The index exists but holds zero vectors.
    EmptyIndex,
    /// Matches exist but all score below the threshold.
    BelowThreshold {
        closest_match: Option<QuestionRecord>,
        closest_similarity: f32,
        threshold: f32,
    },
}

/// Retrieves indexed questions semantically close to a query.
///
/// Owns its own index and metadata handles and reloads a namespace from
/// disk on every query, so it always sees the writer's latest saved
/// snapshot. Per the concurrency contract, a retriever must not run
/// concurrently with a writer on the same namespace.
pub struct QuestionRetriever {
    embedder: Arc<dyn TextEmbedder>,
    index: VectorIndexManager,
    store: MetadataStore,
    threshold: f32,
}

impl QuestionRetriever {
    /// Creates a retriever over the given storage directories.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index_dir: impl AsRef<Path>,
        metadata_dir: impl AsRef<Path>,
        threshold: f32,
    ) -> RetrievalResult<Self> {
        validate_threshold(threshold)?;

        let index = VectorIndexManager::new(index_dir)?;
        let store = MetadataStore::new(metadata_dir)?;

        info!("Retriever initialized (threshold: {threshold})");
        Ok(Self {
            embedder,
            index,
            store,
            threshold,
        })
    }

    /// The current similarity threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Changes the similarity threshold.
    ///
    /// Fails with [`RetrievalError::InvalidThreshold`] outside `[0, 1]`.
    pub fn adjust_threshold(&mut self, new_threshold: f32) -> RetrievalResult<()> {
        validate_threshold(new_threshold)?;
        info!(
            "Threshold adjusted: {} -> {new_threshold}",
            self.threshold
        );
        self.threshold = new_threshold;
        Ok(())
    }

    /// Retrieves every question above the similarity threshold, sorted by
    /// similarity descending. Uses the default candidate pool size.
    pub fn retrieve(
        &mut self,
        celebrity: &str,
        query: &str,
    ) -> RetrievalResult<Vec<SimilarityMatch>> {
        self.retrieve_with_pool(celebrity, query, DEFAULT_CANDIDATE_POOL)
    }

    /// Retrieves with an explicit candidate pool size.
    ///
    /// The pool bounds how many neighbors are fetched before threshold
    /// filtering; the match count is otherwise unconstrained between 0
    /// and `candidate_pool`.
    pub fn retrieve_with_pool(
        &mut self,
        celebrity: &str,
        query: &str,
        candidate_pool: usize,
    ) -> RetrievalResult<Vec<SimilarityMatch>> {
        info!("Searching '{celebrity}' for: '{query}'");

        let Some(namespace) = Namespace::new(celebrity) else {
            return Ok(Vec::new());
        };

        if !self.index.load(&namespace)? {
            return Ok(Vec::new());
        }
        if !self.store.load(&namespace)? {
            return Ok(Vec::new());
        }

        let index_size = self.index.size(&namespace);
        if index_size == 0 {
            warn!("Index is empty for '{namespace}'");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed_single(query)?;

        let k = candidate_pool.min(index_size);
        let candidates = self.index.search(&namespace, &query_embedding, k)?;
        debug!("Index returned {} candidates", candidates.len());

        let mut matches: Vec<SimilarityMatch> = candidates
            .into_iter()
            .filter(|(_, similarity)| *similarity >= self.threshold)
            .filter_map(|(id, similarity)| {
                // A missing record means store corruption; drop the
                // candidate rather than failing the whole query.
                self.store.get_metadata(&namespace, id).map(|record| {
                    SimilarityMatch {
                        id: id.get(),
                        record: record.clone(),
                        similarity_score: similarity,
                    }
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        info!(
            "Found {} matches above threshold {}",
            matches.len(),
            self.threshold
        );
        Ok(matches)
    }

    /// Retrieval plus the context a downstream consumer needs: count,
    /// threshold used, best score, and the original query.
    pub fn retrieve_with_context(
        &mut self,
        celebrity: &str,
        query: &str,
    ) -> RetrievalResult<RetrievalReport> {
        let matches = self.retrieve(celebrity, query)?;
        let max_similarity = matches.first().map_or(0.0, |m| m.similarity_score);

        Ok(RetrievalReport {
            count: matches.len(),
            threshold_used: self.threshold,
            max_similarity,
            query: query.to_string(),
            celebrity: celebrity.to_string(),
            matches,
        })
    }

    /// Explains why a query produced no results.
    ///
    /// Bypasses the threshold and reports the single closest match with
    /// its raw score, or the structural reason when no search is even
    /// possible. Never an error for the common nothing-found case.
    pub fn explain_no_results(
        &mut self,
        celebrity: &str,
        query: &str,
    ) -> RetrievalResult<NoResultsReason> {
        let Some(namespace) = Namespace::new(celebrity) else {
            return Ok(NoResultsReason::NoIndex);
        };

        if !self.index.load(&namespace)? {
            return Ok(NoResultsReason::NoIndex);
        }

        if self.index.size(&namespace) == 0 {
            return Ok(NoResultsReason::EmptyIndex);
        }

        self.store.load(&namespace)?;

        let query_embedding = self.embedder.embed_single(query)?;
        let nearest = self.index.search(&namespace, &query_embedding, 1)?;

        let (id, closest_similarity) = nearest[0];
        Ok(NoResultsReason::BelowThreshold {
            closest_match: self.store.get_metadata(&namespace, id).cloned(),
            closest_similarity,
            threshold: self.threshold,
        })
    }

    /// Finds indexed questions similar to a question already in hand,
    /// excluding the probe text itself and optionally one source URL.
    ///
    /// Useful for cross-source duplicate checks before ingesting.
    pub fn similar_questions(
        &mut self,
        celebrity: &str,
        question_text: &str,
        exclude_source: Option<&str>,
    ) -> RetrievalResult<Vec<SimilarityMatch>> {
        let matches = self.retrieve(celebrity, question_text)?;

        Ok(matches
            .into_iter()
            .filter(|m| m.record.question_text != question_text)
            .filter(|m| exclude_source.is_none_or(|url| m.record.source_url != url))
            .collect())
    }
}

fn validate_threshold(threshold: f32) -> RetrievalResult<()> {
    if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
        return Err(RetrievalError::InvalidThreshold(threshold));
    }
    Ok(())
}
