//! Configuration module for the question index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `PRESSER_` and use double
//! underscores to separate nested levels:
//! - `PRESSER_RETRIEVAL__SIMILARITY_THRESHOLD=0.6` sets `retrieval.similarity_threshold`
//! - `PRESSER_DEDUP__MERGE_THRESHOLD=0.9` sets `dedup.merge_threshold`
//! - `PRESSER_DATA_DIR=/var/lib/presser` sets `data_dir`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the TOML configuration file.
pub const CONFIG_FILE: &str = "presser.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory for all persisted state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Deduplication settings
    #[serde(default)]
    pub dedup: DedupConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Sentence embedding model name. Must stay fixed for the life of an
    /// index: vectors from different model versions do not mix.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where model files are cached between runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a retrieval match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Candidates fetched from the index before threshold filtering
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DedupConfig {
    /// Cosine similarity at which two questions merge as duplicates
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,

    /// Minimum cosine distance kept by the diversity filter
    #[serde(default = "default_min_distance")]
    pub min_distance: f32,
}

fn default_version() -> u32 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_similarity_threshold() -> f32 {
    crate::retrieval::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_candidate_pool() -> usize {
    crate::retrieval::DEFAULT_CANDIDATE_POOL
}

fn default_merge_threshold() -> f32 {
    0.85
}

fn default_min_distance() -> f32 {
    0.15
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            candidate_pool: default_candidate_pool(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            min_distance: default_min_distance(),
        }
    }
}

impl Settings {
    /// Loads settings from defaults, then `presser.toml`, then
    /// `PRESSER_`-prefixed environment variables, later layers winning.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("PRESSER_").split("__"))
            .extract()
    }

    /// Directory holding the per-namespace vector index files.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    /// Directory holding the per-namespace metadata files.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    /// Writes the current settings to `presser.toml` in `dir`.
    pub fn init_config_file(&self, dir: &std::path::Path) -> std::io::Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);
        let toml = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(format!("failed to serialize settings: {e}")))?;
        std::fs::write(&path, toml)?;
        Ok(path)
    }
}
