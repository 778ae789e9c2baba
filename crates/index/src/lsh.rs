//! MinHash LSH banding over persisted signatures.
//!
//! A signature of `bands * rows` slots is cut into `bands` contiguous groups.
//! Each group hashes to a band key, and documents sharing any band key with a
//! query become candidates. With 16 bands of 8 rows, a pair at Jaccard `s`
//! collides in at least one band with probability `1 - (1 - s^8)^16`: about
//! 0.94 at s = 0.85 and under 0.02 at s = 0.4.
//!
//! Buckets live in memory only. The `signatures` table is authoritative and
//! [`NearDuplicateIndex::rebuild`] reconstructs every bucket from it.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use canonical::DocumentId;
use hashbrown::HashMap;
use perceptual::Signature;
use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::backend::Table;
use crate::store::DocumentStore;
use crate::IndexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    pub bands: usize,
    pub rows: usize,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self { bands: 16, rows: 8 }
    }
}

impl LshConfig {
    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn signature_len(&self) -> usize {
        self.bands * self.rows
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.bands == 0 || self.rows == 0 {
            return Err(IndexError::InvalidConfig(format!(
                "bands and rows must be >= 1 (got bands={}, rows={})",
                self.bands, self.rows
            )));
        }
        Ok(())
    }

    /// Probability that a pair at Jaccard `s` shares at least one band.
    pub fn collision_probability(&self, s: f64) -> f64 {
        1.0 - (1.0 - s.powi(self.rows as i32)).powi(self.bands as i32)
    }
}

/// A bucket-mate of a query signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LshCandidate {
    pub id: DocumentId,
    /// Number of bands in which the candidate collided with the query.
    pub bands_matched: usize,
}

pub(crate) fn band_key(band: usize, slots: &[u64]) -> u64 {
    let mut bytes = Vec::with_capacity(slots.len() * 8);
    for slot in slots {
        bytes.extend_from_slice(&slot.to_le_bytes());
    }
    xxh3_64_with_seed(&bytes, band as u64)
}

type Buckets = Vec<HashMap<u64, Vec<DocumentId>>>;

pub struct NearDuplicateIndex {
    cfg: LshConfig,
    store: Arc<DocumentStore>,
    buckets: RwLock<Buckets>,
}

impl NearDuplicateIndex {
    pub fn new(cfg: LshConfig, store: Arc<DocumentStore>) -> Result<Self, IndexError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            store,
            buckets: RwLock::new(empty_buckets(cfg.bands)),
        })
    }

    pub fn config(&self) -> &LshConfig {
        &self.cfg
    }

    fn band_keys(&self, signature: &Signature) -> Result<Vec<u64>, IndexError> {
        if signature.len() != self.cfg.signature_len() {
            return Err(IndexError::SignatureLength {
                expected: self.cfg.signature_len(),
                got: signature.len(),
            });
        }
        Ok(signature
            .bands(self.cfg.rows)
            .enumerate()
            .map(|(band, slots)| band_key(band, slots))
            .collect())
    }

    /// Persist the signature row, then bucket it.
    pub fn insert(&self, id: &DocumentId, signature: &Signature) -> Result<(), IndexError> {
        self.band_keys(signature)?;
        let mut batch = self.store.batch();
        batch.put_signature(id, signature)?;
        self.store.commit(batch)?;
        self.index_in_memory(id, signature)
    }

    /// Bucket a signature whose row has already been committed.
    ///
    /// Empty sketches are accepted but never bucketed.
    pub fn index_in_memory(&self, id: &DocumentId, signature: &Signature) -> Result<(), IndexError> {
        let keys = self.band_keys(signature)?;
        if signature.is_empty_sketch() {
            return Ok(());
        }
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (band, key) in keys.into_iter().enumerate() {
            let ids = buckets[band].entry(key).or_default();
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Ok(())
    }

    /// Drop `id` from the buckets its signature hashes to.
    pub fn remove(&self, id: &DocumentId, signature: &Signature) -> Result<(), IndexError> {
        let keys = self.band_keys(signature)?;
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (band, key) in keys.into_iter().enumerate() {
            if let Some(ids) = buckets[band].get_mut(&key) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    buckets[band].remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Drop `id` from every bucket, for when its signature is unknown.
    pub fn purge(&self, id: &DocumentId) -> Result<(), IndexError> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for band in buckets.iter_mut() {
            band.retain(|_, ids| {
                ids.retain(|other| other != id);
                !ids.is_empty()
            });
        }
        Ok(())
    }

    /// Candidates sharing at least one band key, most colliding bands first.
    pub fn query_ranked(&self, signature: &Signature) -> Result<Vec<LshCandidate>, IndexError> {
        let keys = self.band_keys(signature)?;
        if signature.is_empty_sketch() {
            return Ok(Vec::new());
        }
        let buckets = self
            .buckets
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let mut counts: HashMap<&DocumentId, usize> = HashMap::new();
        for (band, key) in keys.iter().enumerate() {
            if let Some(ids) = buckets[band].get(key) {
                for id in ids {
                    *counts.entry(id).or_default() += 1;
                }
            }
        }
        let mut out: Vec<LshCandidate> = counts
            .into_iter()
            .map(|(id, bands_matched)| LshCandidate {
                id: id.clone(),
                bands_matched,
            })
            .collect();
        out.sort_by(|a, b| match b.bands_matched.cmp(&a.bands_matched) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        });
        Ok(out)
    }

    /// Union of all bucket-mates, in id order.
    pub fn query(&self, signature: &Signature) -> Result<Vec<DocumentId>, IndexError> {
        let mut ids: Vec<DocumentId> = self
            .query_ranked(signature)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Estimated Jaccard between a query and a stored document.
    ///
    /// A bucketed id without a signature row means the buckets and the table
    /// disagree, which is reported as corruption.
    pub fn similarity_to(&self, signature: &Signature, id: &DocumentId) -> Result<f32, IndexError> {
        let stored = self.store.signature(id)?.ok_or_else(|| {
            IndexError::corruption(Table::Signatures, id.as_str(), "bucketed id has no signature row")
        })?;
        Ok(signature.jaccard(&stored))
    }

    /// Estimated Jaccard between two stored documents.
    pub fn exact_jaccard(&self, a: &DocumentId, b: &DocumentId) -> Result<f32, IndexError> {
        let load = |id: &DocumentId| {
            self.store.signature(id)?.ok_or_else(|| IndexError::NotFound {
                table: Table::Signatures,
                key: id.to_string(),
            })
        };
        let sa = load(a)?;
        let sb = load(b)?;
        Ok(sa.jaccard(&sb))
    }

    /// Replace all buckets with ones built from `entries`.
    pub fn rebuild_from<I>(&self, entries: I) -> Result<usize, IndexError>
    where
        I: IntoIterator<Item = (DocumentId, Signature)>,
    {
        let mut fresh = empty_buckets(self.cfg.bands);
        let mut indexed = 0usize;
        for (id, signature) in entries {
            let keys = match self.band_keys(&signature) {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(id = %id, error = %err, "lsh_rebuild_skip");
                    continue;
                }
            };
            if signature.is_empty_sketch() {
                continue;
            }
            for (band, key) in keys.into_iter().enumerate() {
                fresh[band].entry(key).or_default().push(id.clone());
            }
            indexed += 1;
        }
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        *buckets = fresh;
        Ok(indexed)
    }

    /// Rebuild every bucket from the `signatures` table. Unreadable rows are
    /// skipped and logged.
    pub fn rebuild(&self) -> Result<usize, IndexError> {
        let (rows, bad) = self.store.load_table::<Signature>(Table::Signatures)?;
        for key in &bad {
            warn!(key = %key, "lsh_rebuild_undecodable_signature");
        }
        self.rebuild_from(rows)
    }

    /// Number of distinct documents currently bucketed.
    pub fn len(&self) -> usize {
        let Ok(buckets) = self.buckets.read() else {
            return 0;
        };
        // Every bucketed document appears exactly once in band 0.
        buckets
            .first()
            .map(|band| band.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn empty_buckets(bands: usize) -> Buckets {
    (0..bands).map(|_| HashMap::new()).collect()
}
