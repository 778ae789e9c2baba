//! Embedding collaborator boundary.
//!
//! The duplicate resolver never runs a model itself. It asks an [`Embedder`]
//! for a vector at most once per classification, and treats any error as
//! "semantic tier unavailable" rather than a failed call.
//!
//! This crate provides:
//!
//! - the [`Embedder`] trait implemented by real model adapters
//! - [`StubEmbedder`], a deterministic offline embedder for dry runs and tests
//! - [`ResilientEmbedder`], which bounds each call with a timeout and stops
//!   calling a failing model via a [`CircuitBreaker`]
//! - [`l2_normalize_in_place`] for adapters that return raw vectors
//!
//! ```
//! use semantic::{Embedder, ResilienceConfig, ResilientEmbedder, StubEmbedder};
//!
//! let embedder = ResilientEmbedder::new(StubEmbedder::new(64)?, ResilienceConfig::default());
//! let v = embedder.embed("The quick brown fox")?;
//! assert_eq!(v.len(), 64);
//! # Ok::<(), semantic::SemanticError>(())
//! ```

pub mod circuit_breaker;
mod error;
mod normalize;
mod resilient;
mod serde_millis;
mod stub;

pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use crate::error::SemanticError;
pub use crate::normalize::l2_normalize_in_place;
pub use crate::resilient::{ResilienceConfig, ResilientEmbedder};
pub use crate::stub::StubEmbedder;

/// Source of text embeddings.
///
/// Implementations must be deterministic enough that the same text embeds
/// close to itself, and must return vectors of one fixed dimension.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError>;

    /// Identifier of the model, for logs.
    fn model_name(&self) -> &str;
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        (**self).embed(text)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        (**self).embed(text)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        (**self).embed(text)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
