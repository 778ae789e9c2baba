//! # Duplicate resolution (`resolver`)
//!
//! ## Purpose
//!
//! `resolver` sits on top of the hashing (`canonical`), sketching
//! (`perceptual`) and index (`index`) crates. For every incoming document it
//! decides whether it is already stored, byte for byte (**exact**), nearly
//! word for word (**near**), or in meaning (**semantic**), and reconciles the
//! verdict with the document store.
//!
//! ## Tiers
//!
//! | Tier | Signal | Outcome |
//! |---|---|---|
//! | exact | SHA-256 of the raw bytes | label appended to the stored record |
//! | near | MinHash over word 3-shingles, LSH candidates | auto-link, review, or related |
//! | semantic | embedding cosine (only if the near tier found nothing) | review or related |
//!
//! A document that clears every tier is stored as a new record, together
//! with its signature and embedding, in one transaction. Each call writes at
//! most one record, and `Review` verdicts write nothing until the caller
//! resolves them with [`DuplicateResolver::admit`] or
//! [`DuplicateResolver::link`].
//!
//! ## Degradation
//!
//! The embedder is an external collaborator. When it fails, times out or
//! returns a vector of the wrong dimension the document is stored as
//! `Unique` with [`Verdict::semantic_unavailable`] set; the call does not fail.
//! A corrupt persisted row found mid-classification triggers a rebuild of
//! the in-memory indexes and one retry.
//!
//! ## Example Usage
//!
//! ```
//! use resolver::{Classification, DuplicateResolver, ResolverConfig};
//! use semantic::StubEmbedder;
//!
//! let resolver = DuplicateResolver::in_memory(ResolverConfig::default())?;
//! let embedder = StubEmbedder::new(64)?;
//!
//! let text = "The quick brown fox jumps over the lazy dog.";
//! let first = resolver.classify(text.as_bytes(), text, "a.txt", &embedder)?;
//! assert_eq!(first.classification, Classification::Unique);
//!
//! let again = resolver.classify(text.as_bytes(), text, "b.txt", &embedder)?;
//! assert_eq!(again.classification, Classification::Exact);
//! assert_eq!(again.score, 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Observability
//!
//! Every classification runs inside a `resolver.classify` tracing span and
//! ends with a `classify_success` or `classify_failure` event. Install a
//! [`ResolveMetrics`] implementation via [`set_resolve_metrics`] to record
//! outcomes and latency.

pub mod engine;
pub mod locks;
pub mod metrics;
pub mod types;

pub use crate::engine::DuplicateResolver;
pub use crate::locks::HashLocks;
pub use crate::metrics::{set_resolve_metrics, ResolveMetrics};
pub use crate::types::{
    Classification, DetectionMethod, Disposition, InputError, PendingDocument, RebuildReport,
    RelatedCandidate, ResolveError, ResolverConfig, SemanticTierConfig, Thresholds, TierOutcome,
    Verdict,
};
