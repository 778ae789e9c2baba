use crate::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// The three durable tables. Every row is keyed by document id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    /// id -> record row (digest, labels, timestamps, back-reference)
    Records,
    /// id -> MinHash signature
    Signatures,
    /// id -> embedding vector
    Embeddings,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Records, Table::Signatures, Table::Embeddings];

    pub fn name(self) -> &'static str {
        match self {
            Table::Records => "records",
            Table::Signatures => "signatures",
            Table::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        table: Table,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: String,
    },
}

/// A set of writes applied in one storage transaction: all of them or none.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: Table, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            table,
            key: key.into(),
            value,
        });
        self
    }

    pub fn delete(&mut self, table: Table, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            table,
            key: key.into(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Storage engine behind the document tables.
///
/// Implementations must apply a [`WriteBatch`] atomically and serialise
/// concurrent writers; readers may run alongside writers.
pub trait IndexBackend: Send + Sync {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, IndexError>;

    fn write(&self, batch: WriteBatch) -> Result<(), IndexError>;

    /// Visit every row of `table` in key order.
    fn scan(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;

    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

impl<B: IndexBackend + ?Sized> IndexBackend for Arc<B> {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        (**self).get(table, key)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), IndexError> {
        (**self).write(batch)
    }

    fn scan(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        (**self).scan(table, visitor)
    }

    fn flush(&self) -> Result<(), IndexError> {
        (**self).flush()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Redb {
        path: String,
    },
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    pub fn build(&self) -> Result<Box<dyn IndexBackend>, IndexError> {
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(IndexError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

type Tables = HashMap<Table, BTreeMap<String, Vec<u8>>>;

/// Ephemeral backend for tests and dry runs.
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBackend for InMemoryBackend {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let guard = self
            .tables
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(guard.get(&table).and_then(|rows| rows.get(key).cloned()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), IndexError> {
        // One write lock for the whole batch keeps it atomic for readers.
        let mut guard = self
            .tables
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { table, key, value } => {
                    guard.entry(table).or_default().insert(key, value);
                }
                WriteOp::Delete { table, key } => {
                    if let Some(rows) = guard.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn scan(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let guard = self
            .tables
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        if let Some(rows) = guard.get(&table) {
            for (key, value) in rows {
                visitor(key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_puts_and_deletes() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        batch
            .put(Table::Records, "a", b"1".to_vec())
            .put(Table::Signatures, "a", b"2".to_vec());
        backend.write(batch).unwrap();

        assert_eq!(backend.get(Table::Records, "a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get(Table::Signatures, "a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.get(Table::Embeddings, "a").unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.delete(Table::Records, "a").delete(Table::Embeddings, "a");
        backend.write(batch).unwrap();
        assert_eq!(backend.get(Table::Records, "a").unwrap(), None);
        assert_eq!(backend.get(Table::Signatures, "a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn tables_are_isolated() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        batch.put(Table::Records, "k", b"r".to_vec());
        backend.write(batch).unwrap();

        let mut seen = Vec::new();
        backend
            .scan(Table::Signatures, &mut |k, _| {
                seen.push(k.to_string());
                Ok(())
            })
            .unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn scan_is_key_ordered() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        for key in ["c", "a", "b"] {
            batch.put(Table::Records, key, key.as_bytes().to_vec());
        }
        backend.write(batch).unwrap();

        let mut keys = Vec::new();
        backend
            .scan(Table::Records, &mut |k, _| {
                keys.push(k.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn scan_visitor_error_stops_iteration() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        batch
            .put(Table::Records, "a", vec![])
            .put(Table::Records, "b", vec![]);
        backend.write(batch).unwrap();

        let mut visits = 0;
        let err = backend
            .scan(Table::Records, &mut |_, _| {
                visits += 1;
                Err(IndexError::backend("stop"))
            })
            .unwrap_err();
        assert_eq!(visits, 1);
        assert!(matches!(err, IndexError::Backend(_)));
    }

    #[test]
    fn backend_config_builds_in_memory() {
        let backend = BackendConfig::default().build().unwrap();
        assert_eq!(backend.get(Table::Records, "x").unwrap(), None);
    }

    #[test]
    fn table_names_are_stable() {
        let names: Vec<_> = Table::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["records", "signatures", "embeddings"]);
    }
}
