//! # docdedup
//!
//! Multi-level duplicate detection for documents. Every document passes
//! through up to three tiers, cheapest first:
//!
//! 1. **exact**: SHA-256 of the raw bytes ([`canonical`]),
//! 2. **near**: MinHash over word 3-shingles with LSH candidate lookup
//!    ([`perceptual`], [`index`]),
//! 3. **semantic**: embedding cosine similarity ([`semantic`], [`index`]).
//!
//! [`resolver::DuplicateResolver`] ties the tiers together and owns the
//! persisted document tables. This crate adds the YAML configuration layer
//! ([`DedupConfig`]) and a few helpers to open a resolver and its embedder
//! from one config.
//!
//! ```
//! use docdedup::{Classification, DedupConfig};
//!
//! let config = DedupConfig::from_yaml("version: \"1\"\nsemantic:\n  dimension: 32\n")?;
//! let resolver = docdedup::open(&config)?;
//! let embedder = docdedup::build_embedder(&config)?;
//!
//! let text = "Minutes of the quarterly planning meeting.";
//! let verdict = resolver.classify(text.as_bytes(), text, "minutes.txt", &embedder)?;
//! assert_eq!(verdict.classification, Classification::Unique);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;

pub use canonical;
pub use index;
pub use perceptual;
pub use resolver;
pub use semantic;

pub use canonical::{hash_bytes, ContentDigest, DocumentId};
pub use config::{ConfigLoadError, DedupConfig, SemanticYamlConfig, DEFAULT_EMBEDDING_DIMENSION};
pub use index::{BackendConfig, DocumentRecord};
pub use resolver::{
    Classification, DetectionMethod, Disposition, DuplicateResolver, InputError,
    PendingDocument, RebuildReport, RelatedCandidate, ResolveError, ResolverConfig, Thresholds,
    Verdict,
};
pub use semantic::{Embedder, ResilientEmbedder, SemanticError, StubEmbedder};

/// Open the configured store and rebuild the in-memory indexes from it.
pub fn open(config: &DedupConfig) -> Result<DuplicateResolver, ResolveError> {
    DuplicateResolver::open(config.resolver_config())
}

/// The bundled feature-hashing embedder, wrapped in the configured timeout
/// and circuit breaker.
pub fn build_embedder(
    config: &DedupConfig,
) -> Result<ResilientEmbedder<StubEmbedder>, SemanticError> {
    let stub = StubEmbedder::new(config.embedding_dimension())?;
    Ok(ResilientEmbedder::new(stub, config.semantic.resilience))
}
