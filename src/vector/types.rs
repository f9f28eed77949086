//! Type-safe wrappers and core types for the vector index.
//!
//! This module provides newtypes and error types following the crate's
//! strict type safety guidelines. All types implement necessary traits
//! for ergonomic usage while preventing primitive obsession.

use crate::types::Namespace;
use thiserror::Error;

/// Standard embedding dimension (all-MiniLM-L6-v2 model).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Type-safe wrapper for vector ids.
///
/// Ids are contiguous non-negative integers assigned at append time,
/// starting at the namespace's current size. Zero is the first valid id,
/// so this wraps a plain `u32` rather than `NonZeroU32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(u32);

impl VectorId {
    /// Creates a new `VectorId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the id as a usize row offset.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent mixing
/// embeddings of different widths in one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "No index for namespace '{0}'\nSuggestion: Create or load the index before operating on it"
    )]
    NamespaceNotFound(Namespace),

    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors come from the same embedding model version"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Vector at batch position {position} has zero norm and cannot be L2-normalized\nSuggestion: Drop degenerate embeddings before indexing"
    )]
    DegenerateVector { position: usize },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Io(#[from] std::io::Error),

    #[error("Invalid index file: {0}\nSuggestion: Delete the namespace and re-index from source")]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Re-index the namespace with this version"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}

/// Result type alias for vector index operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Computes cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`, where 1 is most similar. A zero vector on
/// either side yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// L2-normalizes a vector in place.
///
/// Returns `false` when the norm is zero and the vector cannot be scaled.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    true
}
