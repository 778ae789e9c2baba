use canonical::{ContentDigest, DocumentId};
use index::{AnnConfig, BackendConfig, CompressionConfig, IndexError, LshConfig, Table};
use perceptual::{Signature, SketchConfig, SketchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Score bands for the near and semantic tiers.
///
/// Near tier: `>= near_auto_link` links, `[near_review, near_auto_link)` asks
/// the caller, `[near_related, near_review)` is informational.
/// Semantic tier: `>= semantic_review` asks the caller,
/// `[semantic_ignore, semantic_review)` is informational. The semantic tier
/// never links on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub near_auto_link: f32,
    pub near_review: f32,
    pub near_related: f32,
    pub semantic_review: f32,
    pub semantic_ignore: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            near_auto_link: 0.95,
            near_review: 0.85,
            near_related: 0.70,
            semantic_review: 0.98,
            semantic_ignore: 0.85,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ResolveError> {
        let all = [
            ("near_auto_link", self.near_auto_link),
            ("near_review", self.near_review),
            ("near_related", self.near_related),
            ("semantic_review", self.semantic_review),
            ("semantic_ignore", self.semantic_ignore),
        ];
        for (name, value) in all {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResolveError::InvalidConfig(format!(
                    "thresholds.{name} must be within [0.0, 1.0], got {value}"
                )));
            }
        }
        if !(self.near_related <= self.near_review && self.near_review <= self.near_auto_link) {
            return Err(ResolveError::InvalidConfig(
                "thresholds must satisfy near_related <= near_review <= near_auto_link".into(),
            ));
        }
        if self.semantic_ignore > self.semantic_review {
            return Err(ResolveError::InvalidConfig(
                "thresholds must satisfy semantic_ignore <= semantic_review".into(),
            ));
        }
        Ok(())
    }
}

/// Semantic tier settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticTierConfig {
    /// When false, documents that clear the near tier are stored as unique
    /// without consulting the embedder.
    pub enabled: bool,
    /// Candidates fetched from the semantic index per query.
    pub top_k: usize,
    /// Fixed embedding dimension. `None` adopts the first stored vector's.
    pub dimension: Option<usize>,
    pub ann: AnnConfig,
}

impl Default for SemanticTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 5,
            dimension: None,
            ann: AnnConfig::default(),
        }
    }
}

/// Everything a [`DuplicateResolver`](crate::DuplicateResolver) needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    pub sketch: SketchConfig,
    pub lsh: LshConfig,
    pub thresholds: Thresholds,
    pub semantic: SemanticTierConfig,
    /// LSH candidates scored with the estimator per query.
    pub max_candidates: usize,
    pub storage: BackendConfig,
    pub compression: CompressionConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sketch: SketchConfig::default(),
            lsh: LshConfig::default(),
            thresholds: Thresholds::default(),
            semantic: SemanticTierConfig::default(),
            max_candidates: 64,
            storage: BackendConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn with_storage(mut self, storage: BackendConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_semantic_enabled(mut self, enabled: bool) -> Self {
        self.semantic.enabled = enabled;
        self
    }

    pub fn with_sketch(mut self, sketch: SketchConfig) -> Self {
        self.sketch = sketch;
        self
    }

    pub fn with_lsh(mut self, lsh: LshConfig) -> Self {
        self.lsh = lsh;
        self
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        self.sketch.validate()?;
        self.lsh.validate()?;
        if self.lsh.signature_len() != self.sketch.num_hashes {
            return Err(ResolveError::InvalidConfig(format!(
                "lsh bands * rows ({}) must equal sketch.num_hashes ({})",
                self.lsh.signature_len(),
                self.sketch.num_hashes
            )));
        }
        self.thresholds.validate()?;
        if self.max_candidates == 0 {
            return Err(ResolveError::InvalidConfig(
                "max_candidates must be greater than zero".into(),
            ));
        }
        if self.semantic.top_k == 0 {
            return Err(ResolveError::InvalidConfig(
                "semantic.top_k must be greater than zero".into(),
            ));
        }
        if self.semantic.dimension == Some(0) {
            return Err(ResolveError::InvalidConfig(
                "semantic.dimension must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Unique,
    Exact,
    Near,
    Semantic,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Unique => "unique",
            Classification::Exact => "exact",
            Classification::Near => "near",
            Classification::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signal produced the verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ContentHash,
    MinHash,
    Embedding,
    /// No tier matched.
    None,
}

/// What the resolver did with the verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// A new record was created.
    Stored,
    /// The label was appended to an existing record.
    Linked,
    /// Nothing was written; the caller decides via `admit` or `link`.
    Review,
    /// A new record was created; the match is informational only.
    Related,
}

/// A match worth mentioning that did not decide the verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedCandidate {
    pub id: DocumentId,
    pub score: f32,
    pub method: DetectionMethod,
}

/// A classified document held back for caller confirmation.
///
/// Hand it to [`DuplicateResolver::admit`](crate::DuplicateResolver::admit)
/// to store it, or call `link` on the matched record to fold it in.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDocument {
    pub digest: ContentDigest,
    pub label: String,
    pub signature: Signature,
    pub embedding: Option<Vec<f32>>,
}

impl PendingDocument {
    pub fn document_id(&self) -> DocumentId {
        self.digest.document_id()
    }
}

/// Result of one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub classification: Classification,
    /// Present for every classification except `Unique`.
    pub matched: Option<DocumentId>,
    /// Similarity to `matched`; for `Unique` the best score seen, or 0.0.
    pub score: f32,
    pub method: DetectionMethod,
    pub disposition: Disposition,
    /// Record created or updated by this call.
    pub document_id: Option<DocumentId>,
    pub related: Option<RelatedCandidate>,
    /// The embedder failed, so the semantic tier was skipped.
    pub semantic_unavailable: bool,
    /// Set for `Review` dispositions.
    pub pending: Option<PendingDocument>,
}

impl Verdict {
    pub(crate) fn exact(id: DocumentId) -> Self {
        Self {
            classification: Classification::Exact,
            matched: Some(id.clone()),
            score: 1.0,
            method: DetectionMethod::ContentHash,
            disposition: Disposition::Linked,
            document_id: Some(id),
            related: None,
            semantic_unavailable: false,
            pending: None,
        }
    }

    pub(crate) fn stored(id: DocumentId, score: f32) -> Self {
        Self {
            classification: Classification::Unique,
            matched: None,
            score,
            method: DetectionMethod::None,
            disposition: Disposition::Stored,
            document_id: Some(id),
            related: None,
            semantic_unavailable: false,
            pending: None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.classification != Classification::Unique
    }

    pub fn needs_review(&self) -> bool {
        self.disposition == Disposition::Review
    }
}

/// Outcome of one detection tier.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Matched { id: DocumentId, score: f32 },
    NotMatched,
    /// The tier could not run, e.g. the embedder failed.
    Unavailable { reason: String },
}

/// What `rebuild` found in the persisted tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub records: usize,
    pub signatures_indexed: usize,
    pub embeddings_indexed: usize,
    /// Rows that could not be decoded, removed from their table.
    pub undecodable: Vec<(Table, String)>,
    /// Signature or embedding rows with no record, removed.
    pub orphans: Vec<(Table, String)>,
    /// Records whose signature row was missing or unreadable. They are kept
    /// with the empty sketch: exact copies still match, near copies do not.
    pub unindexed: Vec<String>,
}

impl RebuildReport {
    pub fn is_clean(&self) -> bool {
        self.undecodable.is_empty() && self.orphans.is_empty() && self.unindexed.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input is empty")]
    Empty,
    #[error("failed to read input: {0}")]
    Read(#[from] std::io::Error),
}

/// Errors produced by the resolver.
///
/// An unavailable embedder is not an error; it degrades the verdict instead
/// (see [`Verdict::semantic_unavailable`]).
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("input error: {0}")]
    Input(#[from] InputError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("sketch error: {0}")]
    Sketch(#[from] SketchError),
    #[error("invalid resolver config: {0}")]
    InvalidConfig(String),
    #[error("no document with id {0}")]
    NotFound(DocumentId),
}

impl ResolveError {
    pub(crate) fn is_corruption(&self) -> bool {
        matches!(self, ResolveError::Index(e) if e.is_corruption())
    }
}
