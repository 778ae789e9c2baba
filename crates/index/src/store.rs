//! Typed access to the three persisted tables.
//!
//! The tables are the source of truth. Bucket maps and vector indexes are
//! derived from them and can always be rebuilt by scanning.

use canonical::{ContentDigest, DocumentId};
use chrono::{DateTime, Utc};
use perceptual::Signature;
use serde::{Deserialize, Serialize};

use crate::backend::{IndexBackend, Table, WriteBatch};
use crate::codec::CompressionConfig;
use crate::IndexError;

pub const STORE_SCHEMA_VERSION: u16 = 1;

const fn default_schema_version() -> u16 {
    STORE_SCHEMA_VERSION
}

/// Row of the `records` table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecordRow {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: DocumentId,
    pub digest: ContentDigest,
    pub source_labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub duplicate_of: Option<DocumentId>,
}

/// A canonical stored document with everything derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub digest: ContentDigest,
    /// Insertion ordered; the same label may appear more than once.
    pub source_labels: Vec<String>,
    pub signature: Signature,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub duplicate_of: Option<DocumentId>,
}

impl DocumentRecord {
    pub fn new(
        digest: ContentDigest,
        label: impl Into<String>,
        signature: Signature,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        Self {
            id: digest.document_id(),
            digest,
            source_labels: vec![label.into()],
            signature,
            embedding,
            created_at: Utc::now(),
            duplicate_of: None,
        }
    }

    pub fn row(&self) -> RecordRow {
        RecordRow {
            schema_version: STORE_SCHEMA_VERSION,
            id: self.id.clone(),
            digest: self.digest,
            source_labels: self.source_labels.clone(),
            created_at: self.created_at,
            duplicate_of: self.duplicate_of.clone(),
        }
    }

    fn from_parts(row: RecordRow, signature: Signature, embedding: Option<Vec<f32>>) -> Self {
        Self {
            id: row.id,
            digest: row.digest,
            source_labels: row.source_labels,
            signature,
            embedding,
            created_at: row.created_at,
            duplicate_of: row.duplicate_of,
        }
    }
}

/// Encodes typed rows into one atomic [`WriteBatch`].
pub struct StoreBatch<'a> {
    codec: &'a CompressionConfig,
    batch: WriteBatch,
}

impl StoreBatch<'_> {
    pub fn put_row(&mut self, row: &RecordRow) -> Result<&mut Self, IndexError> {
        let value = self.codec.encode(row)?;
        self.batch.put(Table::Records, row.id.as_str(), value);
        Ok(self)
    }

    pub fn put_signature(
        &mut self,
        id: &DocumentId,
        signature: &Signature,
    ) -> Result<&mut Self, IndexError> {
        let value = self.codec.encode(signature)?;
        self.batch.put(Table::Signatures, id.as_str(), value);
        Ok(self)
    }

    pub fn put_embedding(
        &mut self,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<&mut Self, IndexError> {
        let value = self.codec.encode(&embedding)?;
        self.batch.put(Table::Embeddings, id.as_str(), value);
        Ok(self)
    }

    /// Record, signature and optional embedding of a new document.
    pub fn put_record(&mut self, record: &DocumentRecord) -> Result<&mut Self, IndexError> {
        self.put_row(&record.row())?;
        self.put_signature(&record.id, &record.signature)?;
        if let Some(embedding) = &record.embedding {
            self.put_embedding(&record.id, embedding)?;
        }
        Ok(self)
    }

    pub fn delete(&mut self, table: Table, id: &DocumentId) -> &mut Self {
        self.batch.delete(table, id.as_str());
        self
    }

    /// Remove a document from every table.
    pub fn delete_all(&mut self, id: &DocumentId) -> &mut Self {
        for table in Table::ALL {
            self.batch.delete(table, id.as_str());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Typed facade over an [`IndexBackend`].
pub struct DocumentStore {
    backend: Box<dyn IndexBackend>,
    codec: CompressionConfig,
}

impl DocumentStore {
    pub fn new(backend: Box<dyn IndexBackend>, codec: CompressionConfig) -> Self {
        Self { backend, codec }
    }

    pub fn batch(&self) -> StoreBatch<'_> {
        StoreBatch {
            codec: &self.codec,
            batch: WriteBatch::new(),
        }
    }

    /// Apply a batch atomically.
    pub fn commit(&self, batch: StoreBatch<'_>) -> Result<(), IndexError> {
        self.backend.write(batch.batch)
    }

    fn decode_row<T: serde::de::DeserializeOwned>(
        &self,
        table: Table,
        key: &str,
        bytes: &[u8],
    ) -> Result<T, IndexError> {
        self.codec
            .decode(bytes)
            .map_err(|e| IndexError::corruption(table, key, e))
    }

    pub fn row(&self, id: &DocumentId) -> Result<Option<RecordRow>, IndexError> {
        match self.backend.get(Table::Records, id.as_str())? {
            Some(bytes) => {
                let row: RecordRow = self.decode_row(Table::Records, id.as_str(), &bytes)?;
                if &row.id != id {
                    return Err(IndexError::corruption(
                        Table::Records,
                        id.as_str(),
                        format!("row carries id {}", row.id),
                    ));
                }
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub fn signature(&self, id: &DocumentId) -> Result<Option<Signature>, IndexError> {
        self.backend
            .get(Table::Signatures, id.as_str())?
            .map(|bytes| self.decode_row(Table::Signatures, id.as_str(), &bytes))
            .transpose()
    }

    pub fn embedding(&self, id: &DocumentId) -> Result<Option<Vec<f32>>, IndexError> {
        self.backend
            .get(Table::Embeddings, id.as_str())?
            .map(|bytes| self.decode_row(Table::Embeddings, id.as_str(), &bytes))
            .transpose()
    }

    pub fn contains(&self, id: &DocumentId) -> Result<bool, IndexError> {
        Ok(self.backend.get(Table::Records, id.as_str())?.is_some())
    }

    /// Full record. A record row without a signature row is corruption.
    pub fn record(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, IndexError> {
        let Some(row) = self.row(id)? else {
            return Ok(None);
        };
        let signature = self.signature(id)?.ok_or_else(|| {
            IndexError::corruption(Table::Signatures, id.as_str(), "record has no signature row")
        })?;
        let embedding = self.embedding(id)?;
        Ok(Some(DocumentRecord::from_parts(row, signature, embedding)))
    }

    /// Visit raw rows of one table. Undecodable keys surface as corruption.
    pub fn scan_raw(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(DocumentId, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        self.backend.scan(table, &mut |key, value| {
            let id: DocumentId = key
                .parse()
                .map_err(|e| IndexError::corruption(table, key, e))?;
            visitor(id, value)
        })
    }

    /// Decode every row of `table`, splitting decodable rows from the keys
    /// that could not be read.
    pub fn load_table<T: serde::de::DeserializeOwned>(
        &self,
        table: Table,
    ) -> Result<(Vec<(DocumentId, T)>, Vec<String>), IndexError> {
        let mut good = Vec::new();
        let mut bad = Vec::new();
        self.backend.scan(table, &mut |key, value| {
            let Ok(id) = key.parse::<DocumentId>() else {
                bad.push(key.to_string());
                return Ok(());
            };
            match self.codec.decode::<T>(value) {
                Ok(v) => good.push((id, v)),
                Err(_) => bad.push(key.to_string()),
            }
            Ok(())
        })?;
        Ok((good, bad))
    }

    /// Delete rows by raw key, used to clear rows whose key is not a valid id.
    pub fn purge_keys(&self, table: Table, keys: &[String]) -> Result<(), IndexError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(table, key.as_str());
        }
        self.backend.write(batch)
    }

    pub fn flush(&self) -> Result<(), IndexError> {
        self.backend.flush()
    }
}
