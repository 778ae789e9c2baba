//! Word shingling.
//!
//! Each window of `width` consecutive words is reduced to one 64-bit value
//! with a seeded polynomial rolling hash over per-word xxh3 hashes, so the
//! whole stream is processed in O(n).

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::minhash::splitmix64;

/// Stand-in hash for the missing words of a document shorter than one window.
const PAD_TOKEN_HASH: u64 = 0x5A5A_5A5A_0000_FFFF;

/// Domain tag folded into the single shingle of a short document, so it can
/// never equal a regular full-window shingle built from the same words.
const SHORT_DOC_TAG: u64 = 0xD0C5_0000_5407_7000;

const BASE: u64 = 1_000_003;

#[inline]
fn rolling_base(seed: u64) -> u64 {
    BASE ^ splitmix64(seed)
}

fn token_hashes<S: AsRef<str>>(tokens: &[S], seed: u64) -> Vec<u64> {
    tokens
        .iter()
        .map(|t| xxh3_64_with_seed(t.as_ref().as_bytes(), seed))
        .collect()
}

/// Hash every full window of `width` words. Returns nothing when the input
/// is shorter than one window.
pub(crate) fn word_shingles<S: AsRef<str>>(tokens: &[S], width: usize, seed: u64) -> Vec<u64> {
    let n = tokens.len();
    if width == 0 || n < width {
        return Vec::new();
    }
    let th = token_hashes(tokens, seed);
    let base = rolling_base(seed);

    // base^(width-1), used to drop the oldest word from the window
    let mut base_top = 1u64;
    for _ in 1..width {
        base_top = base_top.wrapping_mul(base);
    }

    let mut out = Vec::with_capacity(n - width + 1);
    let mut h = th[..width]
        .iter()
        .fold(0u64, |acc, &v| acc.wrapping_mul(base).wrapping_add(v));
    out.push(h);

    for (&old, &new) in th.iter().zip(th.iter().skip(width)) {
        h = h.wrapping_sub(old.wrapping_mul(base_top));
        h = h.wrapping_mul(base).wrapping_add(new);
        out.push(h);
    }
    out
}

/// The single pseudo-shingle of a document with `1..width` words: the words
/// padded to a full window, hashed, then tagged.
pub(crate) fn short_document_shingle<S: AsRef<str>>(tokens: &[S], width: usize, seed: u64) -> u64 {
    let base = rolling_base(seed);
    let mut th = token_hashes(tokens, seed);
    th.resize(width.max(th.len()), PAD_TOKEN_HASH);
    let h = th
        .iter()
        .fold(0u64, |acc, &v| acc.wrapping_mul(base).wrapping_add(v));
    h ^ SHORT_DOC_TAG
}

/// Shingle set of a token stream: sorted, deduplicated.
pub(crate) fn shingle_set<S: AsRef<str>>(tokens: &[S], width: usize, seed: u64) -> Vec<u64> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut set = if tokens.len() < width {
        vec![short_document_shingle(tokens, width, seed)]
    } else {
        word_shingles(tokens, width, seed)
    };
    set.sort_unstable();
    set.dedup();
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 0xF00D_BAAD_F00D_BAAD;

    // ==================== Shingling Tests ====================

    #[test]
    fn word_shingles_empty_tokens() {
        let tokens: Vec<&str> = vec![];
        assert!(word_shingles(&tokens, 3, SEED).is_empty());
    }

    #[test]
    fn word_shingles_width_zero() {
        assert!(word_shingles(&["a", "b"], 0, SEED).is_empty());
    }

    #[test]
    fn word_shingles_count() {
        let tokens = ["the", "quick", "brown", "fox", "jumps"];
        assert_eq!(word_shingles(&tokens, 3, SEED).len(), 3);
        assert_eq!(word_shingles(&tokens, 5, SEED).len(), 1);
        assert_eq!(word_shingles(&tokens, 6, SEED).len(), 0);
    }

    #[test]
    fn rolling_matches_direct_window_hash() {
        let tokens = ["a", "b", "c", "d", "e", "f"];
        let rolled = word_shingles(&tokens, 3, SEED);
        for (i, window) in tokens.windows(3).enumerate() {
            let direct = word_shingles(window, 3, SEED);
            assert_eq!(direct.len(), 1);
            assert_eq!(rolled[i], direct[0], "window {i}");
        }
    }

    #[test]
    fn word_order_matters() {
        let a = word_shingles(&["red", "green", "blue"], 3, SEED);
        let b = word_shingles(&["blue", "green", "red"], 3, SEED);
        assert_ne!(a, b);
    }

    #[test]
    fn seed_changes_shingles() {
        let tokens = ["one", "two", "three"];
        assert_ne!(
            word_shingles(&tokens, 3, 1),
            word_shingles(&tokens, 3, 2)
        );
    }

    // ==================== Short Document Tests ====================

    #[test]
    fn short_document_yields_one_tagged_shingle() {
        let set = shingle_set(&["hello", "world"], 3, SEED);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn short_document_never_equals_full_window() {
        // "a b" padded must not hash like any real three-word window
        let short = short_document_shingle(&["a", "b"], 3, SEED);
        let full = word_shingles(&["a", "b", "c"], 3, SEED);
        assert!(!full.contains(&short));
    }

    #[test]
    fn distinct_short_documents_differ() {
        assert_ne!(
            short_document_shingle(&["hello"], 3, SEED),
            short_document_shingle(&["goodbye"], 3, SEED)
        );
    }

    #[test]
    fn shingle_set_dedups_repeats() {
        let tokens = ["la", "la", "la", "la", "la", "la"];
        assert_eq!(shingle_set(&tokens, 3, SEED).len(), 1);
    }

    #[test]
    fn shingle_set_is_sorted() {
        let tokens = ["z", "y", "x", "w", "v", "u", "t"];
        let set = shingle_set(&tokens, 2, SEED);
        assert!(set.windows(2).all(|w| w[0] < w[1]));
    }
}
