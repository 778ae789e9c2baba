use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A word token with its UTF-8 byte offsets in the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Lowercased word.
    pub text: String,
    /// Byte offset (inclusive) in the source text.
    pub start: usize,
    /// Byte offset (exclusive) in the source text.
    pub end: usize,
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        self.text.as_str()
    }
}

/// Split normalised text into lowercased words with byte offsets.
///
/// Word boundaries follow Unicode UAX #29, so punctuation and whitespace are
/// dropped and "It's" stays one word. Deterministic and locale independent.
pub fn tokenize(text: &str) -> Vec<Token> {
    text.unicode_word_indices()
        .map(|(start, word)| Token {
            text: word.to_lowercase(),
            start,
            end: start + word.len(),
        })
        .collect()
}

/// Lowercased words only, for callers that do not need offsets.
pub fn tokenize_words(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}
