//! Content identity layer.
//!
//! This crate answers one question cheaply: have we seen these exact bytes
//! before? It also owns the word tokenizer shared by the sketch builder.
//!
//! ## What we do
//!
//! - SHA-256 over the raw bytes, streamed in 64 KiB blocks
//! - [`DocumentId`] derived from the digest, so identity is content addressed
//! - Unicode word tokenization (lowercased) with byte offsets
//!
//! ## Pure function guarantee
//!
//! No clock calls, no OS/locale dependence. File and reader hashing do I/O and
//! propagate its errors untouched.

mod error;
mod hash;
mod token;

pub use crate::error::CanonicalError;
pub use crate::hash::{
    hash_bytes, hash_file, hash_reader, ContentDigest, DocumentId, HASH_BLOCK_SIZE,
};
pub use crate::token::{tokenize, tokenize_words, Token};
