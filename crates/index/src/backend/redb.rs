//! Redb backend for the document tables.
//!
//! Redb is a pure Rust embedded key-value store with ACID transactions and
//! MVCC reads. Each [`Table`] maps to its own redb table, and a
//! [`WriteBatch`] is applied inside a single write transaction, so a crash
//! mid-batch leaves either every row or none of them.
//!
//! # Configuration Example
//! ```yaml
//! storage:
//!   backend: redb
//!   path: "/data/docdedup.redb"
//! ```

use crate::backend::{Table, WriteBatch, WriteOp};
use crate::{IndexBackend, IndexError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const SIGNATURES: TableDefinition<&str, &[u8]> = TableDefinition::new("signatures");
const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        Table::Records => RECORDS,
        Table::Signatures => SIGNATURES,
        Table::Embeddings => EMBEDDINGS,
    }
}

/// Durable backend. Redb serialises write transactions internally, which is
/// what gives the tables their single-writer discipline.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create a database file and make sure all tables exist.
    ///
    /// ```no_run
    /// use index::RedbBackend;
    ///
    /// let backend = RedbBackend::open("/tmp/docdedup.redb").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(|e| IndexError::backend(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| IndexError::backend(e.to_string()))?;
        for table in Table::ALL {
            // Opening a table inside a write transaction creates it.
            write_txn
                .open_table(definition(table))
                .map_err(|e| IndexError::backend(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| IndexError::backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl IndexBackend for RedbBackend {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| IndexError::backend(e.to_string()))?;
        let handle = read_txn
            .open_table(definition(table))
            .map_err(|e| IndexError::backend(e.to_string()))?;

        let value = handle
            .get(key)
            .map_err(|e| IndexError::backend(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), IndexError> {
        if batch.is_empty() {
            return Ok(());
        }
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| IndexError::backend(e.to_string()))?;

        {
            let mut records = write_txn
                .open_table(RECORDS)
                .map_err(|e| IndexError::backend(e.to_string()))?;
            let mut signatures = write_txn
                .open_table(SIGNATURES)
                .map_err(|e| IndexError::backend(e.to_string()))?;
            let mut embeddings = write_txn
                .open_table(EMBEDDINGS)
                .map_err(|e| IndexError::backend(e.to_string()))?;

            for op in batch.ops() {
                let (table, key) = match op {
                    WriteOp::Put { table, key, .. } | WriteOp::Delete { table, key } => {
                        (*table, key.as_str())
                    }
                };
                let handle = match table {
                    Table::Records => &mut records,
                    Table::Signatures => &mut signatures,
                    Table::Embeddings => &mut embeddings,
                };
                match op {
                    WriteOp::Put { value, .. } => {
                        handle
                            .insert(key, value.as_slice())
                            .map_err(|e| IndexError::backend(e.to_string()))?;
                    }
                    WriteOp::Delete { .. } => {
                        handle
                            .remove(key)
                            .map_err(|e| IndexError::backend(e.to_string()))?;
                    }
                }
            }
        }

        // Dropping an uncommitted transaction aborts it, so an error above
        // leaves the database untouched.
        write_txn
            .commit()
            .map_err(|e| IndexError::backend(e.to_string()))?;
        Ok(())
    }

    fn scan(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| IndexError::backend(e.to_string()))?;
        let handle = read_txn
            .open_table(definition(table))
            .map_err(|e| IndexError::backend(e.to_string()))?;

        for item in handle
            .iter()
            .map_err(|e| IndexError::backend(e.to_string()))?
        {
            let (key, value) = item.map_err(|e| IndexError::backend(e.to_string()))?;
            visitor(key.value(), value.value())?;
        }

        Ok(())
    }

    fn flush(&self) -> Result<(), IndexError> {
        // Redb commits are durable on return.
        Ok(())
    }
}
