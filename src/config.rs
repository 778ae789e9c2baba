//! YAML configuration file support for docdedup.
//!
//! A single file describes the sketch, the LSH layout, the score thresholds,
//! the semantic tier and the storage backend. Every section is optional and
//! falls back to the library defaults, so the smallest valid file is just
//! `version: "1"`.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "newsroom archive"
//!
//! sketch:
//!   shingle_width: 3
//!   num_hashes: 128
//!   seed: 42
//!   use_parallel: false
//!
//! lsh:
//!   bands: 16
//!   rows: 8
//!
//! thresholds:
//!   near_auto_link: 0.95
//!   near_review: 0.85
//!   near_related: 0.70
//!   semantic_review: 0.98
//!   semantic_ignore: 0.85
//!
//! semantic:
//!   enabled: true
//!   top_k: 5
//!   dimension: 64
//!   resilience:
//!     timeout_ms: 2000
//!     circuit:
//!       failure_threshold: 5
//!       reset_timeout_ms: 30000
//!
//! max_candidates: 64
//!
//! storage:
//!   backend: redb
//!   path: "docdedup.redb"
//!
//! compression:
//!   codec: zstd
//!   level: 3
//! ```

use std::fs;
use std::path::Path;

use index::{AnnConfig, BackendConfig, CompressionConfig, LshConfig};
use perceptual::SketchConfig;
use resolver::{ResolverConfig, SemanticTierConfig, Thresholds};
use semantic::ResilienceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedding dimension used by the bundled stub embedder when the config
/// does not pin one.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 64;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DedupConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub sketch: SketchConfig,

    #[serde(default)]
    pub lsh: LshConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub semantic: SemanticYamlConfig,

    /// LSH candidates scored per query
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default)]
    pub storage: BackendConfig,

    #[serde(default)]
    pub compression: CompressionConfig,
}

impl DedupConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: DedupConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Point storage at a redb file, replacing whatever the file said.
    pub fn with_redb_path(mut self, path: impl Into<String>) -> Self {
        self.storage = BackendConfig::redb(path);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.semantic.validate()?;
        self.resolver_config()
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))
    }

    /// The subset of settings the resolver itself consumes.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            sketch: self.sketch.clone(),
            lsh: self.lsh,
            thresholds: self.thresholds,
            semantic: SemanticTierConfig {
                enabled: self.semantic.enabled,
                top_k: self.semantic.top_k,
                dimension: self.semantic.dimension,
                ann: self.semantic.ann,
            },
            max_candidates: self.max_candidates,
            storage: self.storage.clone(),
            compression: self.compression.clone(),
        }
    }

    /// Dimension the embedder should produce.
    pub fn embedding_dimension(&self) -> usize {
        self.semantic
            .dimension
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSION)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            sketch: SketchConfig::default(),
            lsh: LshConfig::default(),
            thresholds: Thresholds::default(),
            semantic: SemanticYamlConfig::default(),
            max_candidates: default_max_candidates(),
            storage: BackendConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

/// Semantic tier YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticYamlConfig {
    #[serde(default = "true_value")]
    pub enabled: bool,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fixed embedding dimension; unset adopts the first stored vector's.
    #[serde(default)]
    pub dimension: Option<usize>,

    #[serde(default)]
    pub ann: AnnConfig,

    /// Timeout and circuit breaker around every embedder call.
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl SemanticYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.resilience.timeout.is_zero() {
            return Err(ConfigLoadError::Validation(
                "semantic.resilience.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.resilience.circuit.failure_threshold == 0 {
            return Err(ConfigLoadError::Validation(
                "semantic.resilience.circuit.failure_threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SemanticYamlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: default_top_k(),
            dimension: None,
            ann: AnnConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

fn true_value() -> bool {
    true
}

fn default_top_k() -> usize {
    5
}

fn default_max_candidates() -> usize {
    64
}
