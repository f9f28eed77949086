//! Embedding generation for question texts.
//!
//! This module provides the trait and implementations for converting
//! question text into semantic vectors. The production implementation
//! uses fastembed with the AllMiniLML6V2 model (384 dimensions); the same
//! model version MUST be used for indexing and retrieval, which is why
//! the embedder is constructed once at the composition root and injected
//! as `Arc<dyn TextEmbedder>` wherever embeddings are needed. There is
//! deliberately no global instance.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;
use tracing::info;

use crate::vector::{VectorDimension, cosine_similarity};

/// Errors from embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(
        "Failed to initialize embedding model: {0}\nSuggestion: Ensure you have internet connection for first-time model download"
    )]
    ModelInit(String),

    #[error("Failed to generate embeddings: {0}")]
    EmbeddingFailed(String),

    #[error("Cannot embed empty text\nSuggestion: Filter blank questions before embedding")]
    EmptyInput,

    #[error(
        "Embedding dimension mismatch: expected {expected}, got {actual}\nSuggestion: The model version changed; re-index affected namespaces"
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result type alias for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for converting text to fixed-dimension semantic vectors.
///
/// Implementations must be deterministic per model version: the same text
/// always embeds to the same vector, and `dimension()` never changes over
/// the life of the instance.
pub trait TextEmbedder: Send + Sync {
    /// Embeds a single text.
    ///
    /// Fails with [`EmbeddingError::EmptyInput`] on blank text.
    fn embed_single(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embeds a batch of texts, one vector per input, order-preserving.
    ///
    /// Fails with [`EmbeddingError::EmptyInput`] on an empty batch or any
    /// blank entry; silently dropping entries would desynchronize the
    /// output from the caller's id bookkeeping.
    fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// The fixed dimension of vectors produced by this embedder.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Cosine similarity between two texts.
    fn similarity(&self, text1: &str, text2: &str) -> EmbeddingResult<f32> {
        let a = self.embed_single(text1)?;
        let b = self.embed_single(text2)?;
        Ok(cosine_similarity(&a, &b))
    }
}

/// FastEmbed implementation using the AllMiniLML6V2 model.
///
/// Produces 384-dimensional embeddings. The model handle sits behind a
/// `Mutex` because fastembed's embed call takes `&mut self`.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedder {
    /// Creates a new embedder with the default model cache location.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new() -> EmbeddingResult<Self> {
        Self::from_options(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
    }

    /// Creates a new embedder caching model files under `cache_dir`.
    pub fn with_cache_dir(cache_dir: impl Into<std::path::PathBuf>) -> EmbeddingResult<Self> {
        Self::from_options(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir.into())
                .with_show_download_progress(false),
        )
    }

    fn from_options(options: InitOptions) -> EmbeddingResult<Self> {
        info!("Loading sentence embedding model AllMiniLML6V2");
        let mut model =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        // Probe the model once to learn its output width
        let probe = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
        let width = probe
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::ModelInit("model produced no output".to_string()))?
            .len();
        let dimension = VectorDimension::new(width)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        info!("Model loaded, embedding dimension {width}");
        Ok(Self {
            model: Mutex::new(model),
            dimension,
        })
    }

    fn embed_strings(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                EmbeddingError::EmbeddingFailed(
                    "embedding model lock poisoned by a panic in another thread".to_string(),
                )
            })?
            .embed(texts, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension.get() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension.get(),
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }
}

impl TextEmbedder for FastEmbedder {
    fn embed_single(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut embeddings = self.embed_strings(vec![text.to_string()])?;
        Ok(embeddings.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        self.embed_strings(texts.iter().map(|t| t.to_string()).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Mock embedder for tests.
///
/// Builds deterministic embeddings from keyword features so that tests
/// can steer similarity without downloading a model: texts sharing a
/// theme land close together, unrelated texts stay near the baseline
/// similarity floor.
#[cfg(test)]
pub struct MockEmbedder {
    dimension: VectorDimension,
}

#[cfg(test)]
impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MockEmbedder {
    /// Theme keywords and the pair of dimensions each one excites.
    const FEATURES: &'static [(&'static [&'static str], usize)] = &[
        // Why they became a performer
        (&["inspired", "acting", "actor", "drew you", "pick"], 0),
        // Craft and preparation
        (&["prepare", "preparation", "role"], 2),
        // Off-topic personal favorites
        (&["food", "eat", "dish"], 4),
        // Colleagues
        (&["co-star", "costar", "cast"], 6),
        // Early life
        (&["childhood", "family", "grew up"], 8),
    ];

    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: VectorDimension::new(16).unwrap(),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let lowered = text.to_lowercase();

        let mut embedding = vec![0.1; dim];
        for (keywords, slot) in Self::FEATURES {
            if keywords.iter().any(|kw| lowered.contains(kw)) {
                embedding[*slot] = 0.9;
                embedding[*slot + 1] = 0.8;
            }
        }

        // Normalize to unit length like real sentence embeddings
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        for value in &mut embedding {
            *value /= magnitude;
        }

        embedding
    }
}

#[cfg(test)]
impl TextEmbedder for MockEmbedder {
    fn embed_single(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.embed_text(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
