//! Per-celebrity semantic question index.
//!
//! Indexes interview questions per celebrity and answers similarity
//! queries with an absolute threshold: a query returns every indexed
//! question that scores above the configured similarity, however many
//! that is, and never a padded top-K. The same embedding space drives
//! deduplication, thematic clustering and diversity filtering.
//!
//! Scraping, transcription and answer generation live outside this
//! crate; it consumes `(text, source)` batches and a text embedder, and
//! exposes indexing, threshold search and dedup utilities.

pub mod config;
pub mod dedup;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod retrieval;
pub mod store;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use dedup::{DedupError, DedupedQuestion, QuestionCandidate, SemanticDeduper};
pub use embedding::{EmbeddingError, FastEmbedder, TextEmbedder};
pub use extract::{ExtractedQuestion, QuestionExtractor, TranscriptSegment};
pub use ingest::{IngestError, NamespaceStats, QuestionIndexer};
pub use retrieval::{
    NoResultsReason, QuestionRetriever, RetrievalError, RetrievalReport, SimilarityMatch,
};
pub use store::{MetadataError, MetadataStore, QuestionRecord, SourceRecord, SourceType};
pub use types::Namespace;
pub use vector::{VectorDimension, VectorError, VectorId, VectorIndexManager};
