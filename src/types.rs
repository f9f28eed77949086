//! Shared domain types.
//!
//! The only type living here is [`Namespace`], the logical partition key:
//! one namespace per indexed celebrity, owning exactly one vector index and
//! one metadata store. Everything else in the crate is keyed by it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized partition key derived from a celebrity name.
///
/// Construction trims the input, lowercases it, and collapses whitespace
/// runs into single underscores, so `"Shah Rukh Khan"` and
/// `"  shah rukh  khan "` name the same namespace. The normalized form is
/// also the stem of every file the namespace owns on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Creates a namespace from a display name, normalizing it.
    ///
    /// Returns `None` if the name is blank after trimming.
    #[must_use]
    pub fn new(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }

        let normalized = trimmed
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");

        Some(Self(normalized))
    }

    /// Returns the normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
