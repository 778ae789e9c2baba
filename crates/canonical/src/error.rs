use thiserror::Error;

/// Errors raised while parsing digests and identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("invalid content digest: {0}")]
    InvalidDigest(String),
}
