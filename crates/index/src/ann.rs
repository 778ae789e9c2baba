//! Approximate nearest neighbour search using HNSW.
//!
//! Small collections are scanned linearly. Once the collection reaches
//! `min_vectors_for_ann`, queries go through a Hierarchical Navigable Small
//! World graph built lazily by [`AnnIndex::build`].
//!
//! ## Trade-offs
//!
//! - **Speed**: sub-linear search on large collections
//! - **Recall**: typically 95-99%, so a graph query can miss a neighbour
//! - **Mutations**: any insert or removal drops the graph; the next query
//!   rebuilds it from the stored vectors

use canonical::DocumentId;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnConfig {
    /// Max connections per node
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_results: usize,
    pub enabled: bool,
    /// Below this many vectors a linear scan is used
    pub min_vectors_for_ann: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_results: 100,
            enabled: true,
            min_vectors_for_ann: 1000,
        }
    }
}

impl AnnConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }

    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        self.enabled && num_vectors >= self.min_vectors_for_ann
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnResult {
    pub id: DocumentId,
    /// Cosine distance, `1 - similarity`.
    pub distance: f32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnnError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("empty vector")]
    EmptyVector,
    #[error("vector has non-finite components")]
    NonFinite,
}

/// Vector store plus optional HNSW graph. Positions are dense; removal
/// swaps the last vector into the hole.
pub struct AnnIndex {
    config: AnnConfig,
    dimension: Option<usize>,
    configured_dimension: Option<usize>,
    hnsw: Option<Hnsw<'static, f32, DistCosine>>,
    positions: HashMap<DocumentId, usize>,
    ids: Vec<DocumentId>,
    vectors: Vec<Vec<f32>>,
    built: bool,
}

impl AnnIndex {
    /// `dimension = None` fixes the dimension at the first insert.
    pub fn new(dimension: Option<usize>, config: AnnConfig) -> Self {
        Self {
            config,
            dimension,
            configured_dimension: dimension,
            hnsw: None,
            positions: HashMap::new(),
            ids: Vec::new(),
            vectors: Vec::new(),
            built: false,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn check_dimension(&self, len: usize) -> Result<(), AnnError> {
        if len == 0 {
            return Err(AnnError::EmptyVector);
        }
        match self.dimension {
            Some(expected) if expected != len => Err(AnnError::DimensionMismatch {
                expected,
                got: len,
            }),
            _ => Ok(()),
        }
    }

    /// Insert or replace the vector for `id`.
    pub fn insert(&mut self, id: DocumentId, vector: Vec<f32>) -> Result<(), AnnError> {
        self.check_dimension(vector.len())?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(AnnError::NonFinite);
        }
        self.dimension.get_or_insert(vector.len());

        match self.positions.get(&id) {
            Some(&pos) => self.vectors[pos] = vector,
            None => {
                self.positions.insert(id.clone(), self.vectors.len());
                self.ids.push(id);
                self.vectors.push(vector);
            }
        }
        self.invalidate();
        Ok(())
    }

    pub fn remove(&mut self, id: &DocumentId) -> bool {
        let Some(pos) = self.positions.remove(id) else {
            return false;
        };
        self.vectors.swap_remove(pos);
        self.ids.swap_remove(pos);
        if let Some(moved) = self.ids.get(pos) {
            self.positions.insert(moved.clone(), pos);
        }
        self.invalidate();
        true
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.ids.clear();
        self.vectors.clear();
        self.dimension = self.configured_dimension;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.hnsw = None;
        self.built = false;
    }

    pub fn get(&self, id: &DocumentId) -> Option<&[f32]> {
        self.positions.get(id).map(|&pos| self.vectors[pos].as_slice())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// True when the next query would benefit from [`AnnIndex::build`].
    pub fn needs_build(&self) -> bool {
        !self.built && self.config.should_use_ann(self.vectors.len())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<AnnResult>, AnnError> {
        self.check_dimension(query.len())?;
        let k = k.min(self.config.max_results);
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        if self.built && self.config.should_use_ann(self.vectors.len()) {
            if let Some(ref hnsw) = self.hnsw {
                let hits: Vec<Neighbour> = hnsw.search(query, k, self.config.ef_search);
                return Ok(hits
                    .into_iter()
                    .filter_map(|n| {
                        self.ids.get(n.get_origin_id()).map(|id| AnnResult {
                            id: id.clone(),
                            distance: n.distance,
                        })
                    })
                    .collect());
            }
        }
        Ok(self.linear_search(query, k))
    }

    fn linear_search(&self, query: &[f32], k: usize) -> Vec<AnnResult> {
        let mut distances: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, vec)| (pos, cosine_distance(query, vec)))
            .collect();

        // Ascending distance, ties broken by id for stable output.
        distances.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });

        distances
            .into_iter()
            .take(k)
            .map(|(pos, distance)| AnnResult {
                id: self.ids[pos].clone(),
                distance,
            })
            .collect()
    }

    pub fn build(&mut self) {
        if self.vectors.is_empty() {
            return;
        }

        // HNSW needs a handful of points to be worth it.
        let nb_elem = self.vectors.len();
        if nb_elem < 10 {
            self.built = true;
            return;
        }

        let nb_layer = 16.min((nb_elem as f32).ln().trunc() as usize);
        let hnsw = Hnsw::<f32, DistCosine>::new(
            self.config.m,
            nb_elem,
            nb_layer,
            self.config.ef_construction,
            DistCosine {},
        );

        let data_for_insertion: Vec<(&Vec<f32>, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, vec)| (vec, pos))
            .collect();
        hnsw.parallel_insert(&data_for_insertion);

        self.hnsw = Some(hnsw);
        self.built = true;
    }

    pub fn config(&self) -> &AnnConfig {
        &self.config
    }
}

/// `1 - cosine similarity`; a zero vector is maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
