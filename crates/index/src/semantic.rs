//! Embedding index over the `embeddings` table.

use std::sync::{Arc, RwLock};

use canonical::DocumentId;
use tracing::{debug, warn};

use crate::ann::{AnnConfig, AnnError, AnnIndex};
use crate::backend::Table;
use crate::store::DocumentStore;
use crate::IndexError;

/// A stored document ranked by cosine similarity to a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticCandidate {
    pub id: DocumentId,
    pub similarity: f32,
}

impl From<AnnError> for IndexError {
    fn from(e: AnnError) -> Self {
        match e {
            AnnError::DimensionMismatch { expected, got } => {
                IndexError::DimensionMismatch { expected, got }
            }
            AnnError::EmptyVector => IndexError::DimensionMismatch {
                expected: 1,
                got: 0,
            },
            AnnError::NonFinite => IndexError::NonFiniteEmbedding,
        }
    }
}

/// id -> embedding, persisted first and mirrored in an [`AnnIndex`].
pub struct SemanticIndex {
    store: Arc<DocumentStore>,
    ann: RwLock<AnnIndex>,
}

impl SemanticIndex {
    pub fn new(store: Arc<DocumentStore>, dimension: Option<usize>, config: AnnConfig) -> Self {
        Self {
            store,
            ann: RwLock::new(AnnIndex::new(dimension, config)),
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.ann.read().ok().and_then(|ann| ann.dimension())
    }

    /// Reject an embedding the index could not hold.
    pub fn check_embedding(&self, embedding: &[f32]) -> Result<(), IndexError> {
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteEmbedding);
        }
        let ann = self
            .ann
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(ann.check_dimension(embedding.len())?)
    }

    /// Persist the embedding row, then index it.
    pub fn insert(&self, id: &DocumentId, embedding: &[f32]) -> Result<(), IndexError> {
        self.check_embedding(embedding)?;
        let mut batch = self.store.batch();
        batch.put_embedding(id, embedding)?;
        self.store.commit(batch)?;
        self.index_in_memory(id, embedding)
    }

    /// Index an embedding whose row has already been committed.
    pub fn index_in_memory(&self, id: &DocumentId, embedding: &[f32]) -> Result<(), IndexError> {
        let mut ann = self
            .ann
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        ann.insert(id.clone(), embedding.to_vec())?;
        Ok(())
    }

    pub fn remove(&self, id: &DocumentId) -> Result<bool, IndexError> {
        let mut ann = self
            .ann
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(ann.remove(id))
    }

    /// Top `top_k` stored documents by cosine similarity, best first.
    pub fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SemanticCandidate>, IndexError> {
        if self.needs_build()? {
            let mut ann = self
                .ann
                .write()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            // Another query may have built it while we waited.
            if ann.needs_build() {
                debug!(vectors = ann.len(), "semantic_index_build");
                ann.build();
            }
        }
        let ann = self
            .ann
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let hits = ann.search(embedding, top_k)?;
        Ok(hits
            .into_iter()
            .map(|hit| SemanticCandidate {
                id: hit.id,
                similarity: (1.0 - hit.distance).clamp(0.0, 1.0),
            })
            .collect())
    }

    fn needs_build(&self) -> Result<bool, IndexError> {
        Ok(self
            .ann
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .needs_build())
    }

    /// Replace the in-memory index with `entries`. Vectors of the wrong
    /// dimension are skipped and logged.
    pub fn rebuild_from<I>(&self, entries: I) -> Result<usize, IndexError>
    where
        I: IntoIterator<Item = (DocumentId, Vec<f32>)>,
    {
        let mut ann = self
            .ann
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        ann.clear();
        for (id, vector) in entries {
            if let Err(err) = ann.insert(id.clone(), vector) {
                warn!(id = %id, error = %err, "semantic_rebuild_skip");
            }
        }
        Ok(ann.len())
    }

    /// Rebuild from the `embeddings` table.
    pub fn rebuild(&self) -> Result<usize, IndexError> {
        let (rows, bad) = self.store.load_table::<Vec<f32>>(Table::Embeddings)?;
        for key in &bad {
            warn!(key = %key, "semantic_rebuild_undecodable_embedding");
        }
        self.rebuild_from(rows)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.ann
            .read()
            .map(|ann| ann.get(id).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.ann.read().map(|ann| ann.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
