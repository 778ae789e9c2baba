use fxhash::hash64;

use crate::normalize::l2_normalize_in_place;
use crate::{Embedder, SemanticError};

/// Deterministic offline embedder.
///
/// Each word contributes a hash-seeded sinusoid vector and the sum is
/// normalised, so texts sharing vocabulary land close together. It has no
/// notion of meaning; it exists for dry runs and tests.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dimension: usize,
    model_name: String,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Result<Self, SemanticError> {
        if dimension == 0 {
            return Err(SemanticError::InvalidConfig(
                "stub dimension must be >= 1".into(),
            ));
        }
        Ok(Self {
            dimension,
            model_name: format!("stub-{dimension}"),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn add_word(v: &mut [f32], word: &str) {
    let h = hash64(word.as_bytes());
    for (idx, value) in v.iter_mut().enumerate() {
        *value += ((h >> (idx % 32)) as f32 * 0.0001).sin();
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        let mut v = vec![0f32; self.dimension];
        let words = canonical::tokenize_words(text);
        if words.is_empty() {
            // Still deterministic for symbol-only input.
            add_word(&mut v, text);
        }
        for word in &words {
            add_word(&mut v, word);
        }
        l2_normalize_in_place(&mut v);
        Ok(v)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
