//! # Document index
//!
//! Persistence and similarity search for stored documents.
//!
//! ## Core Features
//!
//! - **Pluggable Backends**: the three document tables (`records`,
//!   `signatures`, `embeddings`) sit behind the [`IndexBackend`] trait. An
//!   in-memory backend serves tests; a redb backend (feature
//!   `backend-redb`, on by default) gives durable ACID storage.
//! - **Atomic batches**: a [`WriteBatch`] spanning several tables commits as
//!   one transaction, so a record never exists without its signature.
//! - **Compact rows**: values are bincode-encoded and zstd-compressed
//!   ([`CompressionConfig`]).
//! - **Near-duplicate index**: [`NearDuplicateIndex`] bands MinHash
//!   signatures into LSH buckets (16 bands x 8 rows by default).
//! - **Semantic index**: [`SemanticIndex`] ranks embeddings by cosine
//!   similarity, scanning linearly for small collections and switching to
//!   HNSW ([`ann`]) for large ones.
//!
//! ## Rebuildability
//!
//! Both in-memory indexes are derived data. Each exposes `rebuild()` which
//! reconstructs it from the persisted tables, and `index_in_memory()` for
//! incremental updates after the caller has committed the rows.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use index::{BackendConfig, CompressionConfig, DocumentStore, LshConfig, NearDuplicateIndex};
//! use perceptual::{build_sketch, SketchConfig};
//!
//! let store = Arc::new(DocumentStore::new(
//!     BackendConfig::in_memory().build().unwrap(),
//!     CompressionConfig::default(),
//! ));
//! let lsh = NearDuplicateIndex::new(LshConfig::default(), store).unwrap();
//!
//! let text = "The quick brown fox jumps over the lazy dog.";
//! let id = canonical::hash_bytes(text.as_bytes()).document_id();
//! let sig = build_sketch(text, &SketchConfig::default()).unwrap();
//! lsh.insert(&id, &sig).unwrap();
//!
//! assert_eq!(lsh.query(&sig).unwrap(), vec![id]);
//! ```

pub mod ann;
mod backend;
mod codec;
mod error;
pub mod lsh;
pub mod semantic;
mod store;

#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use backend::{BackendConfig, InMemoryBackend, IndexBackend, Table, WriteBatch, WriteOp};
pub use codec::{CompressionCodec, CompressionConfig};
pub use error::IndexError;
pub use lsh::{LshCandidate, LshConfig, NearDuplicateIndex};
pub use semantic::{SemanticCandidate, SemanticIndex};
pub use store::{DocumentRecord, DocumentStore, RecordRow, StoreBatch, STORE_SCHEMA_VERSION};

pub use ann::{cosine_similarity, AnnConfig};
