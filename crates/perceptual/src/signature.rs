use serde::{Deserialize, Serialize};

use crate::config::SketchError;
use crate::minhash::EMPTY_SLOT;

/// Fixed-length MinHash signature of one document.
///
/// Immutable once built. The fraction of positions on which two signatures
/// agree is an unbiased estimate of the Jaccard similarity of the underlying
/// shingle sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<u64>);

impl Signature {
    pub fn from_slots(slots: Vec<u64>) -> Self {
        Self(slots)
    }

    /// The sketch of a document with no words, `len` slots long.
    pub fn empty_sketch(len: usize) -> Self {
        Self(vec![EMPTY_SLOT; len])
    }

    pub fn slots(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for the sketch of a document with no words. Such sketches are
    /// never bucketed and never match anything.
    pub fn is_empty_sketch(&self) -> bool {
        self.0.iter().all(|&v| v == EMPTY_SLOT)
    }

    /// Estimated Jaccard similarity in `[0, 1]`.
    ///
    /// Signatures of different length, and empty sketches, score 0.
    pub fn jaccard(&self, other: &Signature) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        if self.is_empty_sketch() || other.is_empty_sketch() {
            return 0.0;
        }
        let equal = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b)
            .count();
        equal as f32 / self.0.len() as f32
    }

    /// Split into `bands` contiguous groups of `rows` slots.
    pub fn bands(&self, rows: usize) -> impl Iterator<Item = &[u64]> {
        self.0.chunks_exact(rows.max(1))
    }

    pub fn ensure_len(&self, expected: usize) -> Result<(), SketchError> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(SketchError::LengthMismatch {
                expected,
                actual: self.0.len(),
            })
        }
    }

    pub fn into_slots(self) -> Vec<u64> {
        self.0
    }
}

impl AsRef<[u64]> for Signature {
    fn as_ref(&self) -> &[u64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_counts_equal_positions() {
        let a = Signature::from_slots(vec![1, 2, 3, 4]);
        let b = Signature::from_slots(vec![1, 2, 9, 9]);
        assert!((a.jaccard(&b) - 0.5).abs() < f32::EPSILON);
        assert!((a.jaccard(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn jaccard_length_mismatch_is_zero() {
        let a = Signature::from_slots(vec![1, 2, 3, 4]);
        let b = Signature::from_slots(vec![1, 2, 3]);
        assert_eq!(a.jaccard(&b), 0.0);
    }

    #[test]
    fn empty_sketches_never_match() {
        let e = Signature::empty_sketch(8);
        assert_eq!(e, Signature::from_slots(vec![EMPTY_SLOT; 8]));
        assert!(e.is_empty_sketch());
        assert_eq!(e.jaccard(&e), 0.0);
    }

    #[test]
    fn bands_split_evenly() {
        let s = Signature::from_slots((0..128).collect());
        let bands: Vec<_> = s.bands(8).collect();
        assert_eq!(bands.len(), 16);
        assert_eq!(bands[1], &[8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn ensure_len_reports_mismatch() {
        let s = Signature::from_slots(vec![0; 64]);
        assert!(s.ensure_len(64).is_ok());
        assert_eq!(
            s.ensure_len(128),
            Err(SketchError::LengthMismatch {
                expected: 128,
                actual: 64
            })
        );
    }

    #[test]
    fn serializes_as_plain_array() {
        let s = Signature::from_slots(vec![1, 2]);
        assert_eq!(serde_json::to_string(&s).unwrap(), "[1,2]");
    }
}
