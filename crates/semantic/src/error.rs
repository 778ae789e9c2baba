use thiserror::Error;

/// Why an embedding could not be produced.
///
/// Every variant means the same thing to the duplicate resolver: the semantic
/// tier is unavailable for this call and the verdict degrades gracefully.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("invalid semantic config: {0}")]
    InvalidConfig(String),
    #[error("inference failure: {0}")]
    Inference(String),
    #[error("embedding timed out after {millis} ms")]
    Timeout { millis: u64 },
    #[error("circuit open for {model}; embedding calls suspended")]
    CircuitOpen { model: String },
    #[error("embedding model returned an empty vector")]
    EmptyEmbedding,
}
