//! MinHash over shingle sets.
//!
//! Slot `j` simulates an independent permutation by mixing every shingle
//! with its own key and keeping the minimum. Keys are derived from the
//! configured seed with SplitMix64, so the family is fully reproducible.

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Value of every slot in the sketch of a document with no words.
pub const EMPTY_SLOT: u64 = u64::MAX;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// A fixed family of `num_hashes` MinHash functions.
#[derive(Debug, Clone)]
pub(crate) struct MinHasher {
    keys: Vec<u64>,
    parallel: bool,
}

impl MinHasher {
    pub(crate) fn new(num_hashes: usize, seed: u64, parallel: bool) -> Self {
        let keys = (0..num_hashes as u64)
            .map(|j| splitmix64(seed.wrapping_add(j.wrapping_mul(GOLDEN_GAMMA))))
            .collect();
        Self { keys, parallel }
    }

    /// Signature of a shingle set. An empty set yields all-[`EMPTY_SLOT`].
    pub(crate) fn signature(&self, shingles: &[u64]) -> Vec<u64> {
        if shingles.is_empty() {
            return vec![EMPTY_SLOT; self.keys.len()];
        }
        if self.parallel {
            self.keys
                .par_iter()
                .map(|&key| min_over(shingles, key))
                .collect()
        } else {
            self.keys.iter().map(|&key| min_over(shingles, key)).collect()
        }
    }
}

#[inline]
fn min_over(shingles: &[u64], key: u64) -> u64 {
    shingles
        .iter()
        .map(|&s| mix_u64(s, key))
        .min()
        .unwrap_or(EMPTY_SLOT)
}

#[inline]
pub(crate) fn mix_u64(x: u64, key: u64) -> u64 {
    let mut h = xxh3_64_with_seed(&x.to_le_bytes(), key);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}

#[inline]
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(GOLDEN_GAMMA);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
