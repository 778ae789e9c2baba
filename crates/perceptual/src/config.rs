//! Configuration and error types for sketch building.
//!
//! The sketch builder is a pure function of `(normalised_text, SketchConfig)`.
//! Nothing here reads the environment or the clock, so two processes with
//! equal configs produce bit-identical signatures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters of the word-shingle MinHash sketch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SketchConfig {
    /// Configuration schema version.
    ///
    /// Any change that can alter a signature must bump this, since stored
    /// signatures are only comparable with signatures built the same way.
    pub version: u32,
    /// Number of consecutive words per shingle.
    pub shingle_width: usize,
    /// Number of MinHash slots in a signature.
    pub num_hashes: usize,
    /// Seed for the token hash, the rolling base and the slot keys.
    pub seed: u64,
    /// Compute MinHash slots on the rayon pool.
    pub use_parallel: bool,
}

impl SketchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shingle_width(mut self, width: usize) -> Self {
        self.shingle_width = width;
        self
    }

    pub fn with_num_hashes(mut self, num_hashes: usize) -> Self {
        self.num_hashes = num_hashes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    pub fn validate(&self) -> Result<(), SketchError> {
        if self.version < 1 {
            return Err(SketchError::InvalidConfigVersion {
                version: self.version,
            });
        }
        if self.shingle_width < 1 {
            return Err(SketchError::InvalidConfigWidth {
                width: self.shingle_width,
            });
        }
        if self.num_hashes < 1 {
            return Err(SketchError::InvalidConfigHashes {
                num_hashes: self.num_hashes,
            });
        }
        Ok(())
    }
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            version: 1,
            shingle_width: 3,
            num_hashes: 128,
            seed: 0xF00D_BAAD_F00D_BAAD,
            use_parallel: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SketchError {
    #[error("invalid config: shingle_width must be >= 1 (got {width})")]
    InvalidConfigWidth { width: usize },

    #[error("invalid config: num_hashes must be >= 1 (got {num_hashes})")]
    InvalidConfigHashes { num_hashes: usize },

    #[error("invalid config version {version}; expected >= 1")]
    InvalidConfigVersion { version: u32 },

    #[error("signature length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
