//! Vector index for per-celebrity question embeddings.
//!
//! One flat, append-only index per namespace, storing L2-normalized
//! vectors so that inner product equals cosine similarity. Search is
//! exact brute force over the whole namespace. Corpora stay small
//! (hundreds to low thousands of questions), so there is no approximate
//! structure here and none is planned; if that ever changes, it swaps in
//! behind the same [`VectorIndexManager`] contract.

mod index;
mod types;

pub use index::VectorIndexManager;
pub use types::{
    VECTOR_DIMENSION_384, VectorDimension, VectorError, VectorId, VectorResult,
    cosine_similarity, l2_normalize,
};
