//! # Shingle sketches
//!
//! Turns normalised text into a fixed-length MinHash [`Signature`] whose
//! agreement rate with another signature estimates the Jaccard similarity of
//! the two documents' word-shingle sets.
//!
//! ## Contract
//!
//! - Input is already-normalised text; this crate only splits it into
//!   lowercased Unicode words.
//! - The API is a pure function of `(text, config)`: no I/O, no clocks, no
//!   process-global state. Identical input and config give a bit-identical
//!   signature in every process.
//!
//! ## Pipeline
//!
//! 1. **Tokenize** with [`canonical::tokenize_words`].
//! 2. **Shingle**: every run of `shingle_width` consecutive words becomes one
//!    64-bit rolling hash. Repeated shingles collapse into a set.
//! 3. **MinHash**: `num_hashes` seeded hash functions each keep the minimum
//!    over the set.
//!
//! Documents with fewer words than the shingle width are sketched from a
//! single tagged pseudo-shingle of their padded words. Documents with no
//! words at all produce the empty sketch, which never matches anything.
//!
//! ## Example
//!
//! ```
//! use perceptual::{build_sketch, SketchConfig};
//!
//! let cfg = SketchConfig::default();
//! let a = build_sketch("The quick brown fox jumps over the lazy dog.", &cfg).unwrap();
//! let b = build_sketch("the quick brown fox jumps over the lazy dog", &cfg).unwrap();
//!
//! assert_eq!(a.len(), 128);
//! assert_eq!(a, b);
//! assert_eq!(a.jaccard(&b), 1.0);
//! ```

pub mod config;
mod minhash;
mod shingles;
mod signature;

pub use crate::config::{SketchConfig, SketchError};
pub use crate::minhash::EMPTY_SLOT;
pub use crate::signature::Signature;

use crate::minhash::MinHasher;
use crate::shingles::shingle_set;

/// Identifier of the sketch algorithm, recorded alongside persisted tables.
pub const SKETCH_ALGORITHM: &str = "word_shingle_minhash_v1";

/// Sketch normalised text.
pub fn build_sketch(text: &str, cfg: &SketchConfig) -> Result<Signature, SketchError> {
    let tokens = canonical::tokenize_words(text);
    sketch_tokens(&tokens, cfg)
}

/// Sketch an already tokenized word stream.
pub fn sketch_tokens<S>(tokens: &[S], cfg: &SketchConfig) -> Result<Signature, SketchError>
where
    S: AsRef<str>,
{
    cfg.validate()?;
    let set = shingle_set(tokens, cfg.shingle_width, cfg.seed);
    let hasher = MinHasher::new(cfg.num_hashes, cfg.seed, cfg.use_parallel);
    Ok(Signature::from_slots(hasher.signature(&set)))
}
