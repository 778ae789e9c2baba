//! Content hashing for the exact-duplicate tier.
//!
//! Every submitted document is identified by the SHA-256 digest of its raw
//! bytes. Input is consumed in fixed 64 KiB blocks so that arbitrarily large
//! files can be hashed without being held in memory.
//!
//! ```text
//! digest = SHA-256(raw_bytes)
//! id     = lowercase_hex(digest)
//! ```
//!
//! # Examples
//!
//! ```rust
//! use canonical::{hash_bytes, hash_reader};
//!
//! let a = hash_bytes(b"hello world");
//! let b = hash_reader(&b"hello world"[..]).unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.to_hex().len(), 64);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CanonicalError;

/// Block size used when streaming input through the hasher.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// A 256-bit SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char hex digest.
    pub fn from_hex(s: &str) -> Result<Self, CanonicalError> {
        if s.len() != 64 {
            return Err(CanonicalError::InvalidDigest(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| CanonicalError::InvalidDigest(e.to_string()))?;
        Ok(Self(out))
    }

    /// The document identifier derived from this digest.
    pub fn document_id(&self) -> DocumentId {
        DocumentId(self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Stable identifier of a stored document: the hex form of its content digest.
///
/// Because the identifier is derived from the bytes, two distinct records can
/// never share one, and an exact-duplicate check is a plain key lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the digest this identifier was derived from.
    pub fn digest(&self) -> Result<ContentDigest, CanonicalError> {
        ContentDigest::from_hex(&self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = CanonicalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ContentDigest::from_hex(&lowered).map(|d| d.document_id())
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ContentDigest> for DocumentId {
    fn from(digest: ContentDigest) -> Self {
        digest.document_id()
    }
}

/// Hash an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    for block in bytes.chunks(HASH_BLOCK_SIZE) {
        hasher.update(block);
    }
    ContentDigest(hasher.finalize().into())
}

/// Stream a reader through SHA-256 in 64 KiB blocks.
///
/// I/O errors are returned as-is; an interrupted read is retried.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(ContentDigest(hasher.finalize().into()))
}

/// Hash a file on disk.
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<ContentDigest> {
    let file = File::open(path)?;
    hash_reader(io::BufReader::with_capacity(HASH_BLOCK_SIZE, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn known_vector() {
        // SHA-256("abc")
        let d = hash_bytes(b"abc");
        assert_eq!(
            d.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reader_matches_bytes_across_block_boundaries() {
        let data: Vec<u8> = (0..(HASH_BLOCK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let a = hash_bytes(&data);
        let b = hash_reader(&data[..]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn file_hash_matches_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"the quick brown fox").unwrap();
        tmp.flush().unwrap();
        assert_eq!(hash_file(tmp.path()).unwrap(), hash_bytes(b"the quick brown fox"));
    }

    #[test]
    fn reader_error_is_propagated() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
            }
        }
        let err = hash_reader(Broken).unwrap_err();
        assert_eq!(err.to_string(), "disk gone");
    }

    #[test]
    fn document_id_round_trips_through_digest() {
        let d = hash_bytes(b"doc");
        let id = d.document_id();
        assert_eq!(id.digest().unwrap(), d);
        let parsed: DocumentId = id.as_str().to_uppercase().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!("abc".parse::<DocumentId>().is_err());
        assert!("zz".repeat(32).parse::<DocumentId>().is_err());
    }

    #[test]
    fn no_collisions_over_distinct_inputs() {
        let mut seen = HashSet::new();
        for i in 0..5_000u32 {
            let payload = format!("document number {i}");
            assert!(seen.insert(hash_bytes(payload.as_bytes())));
        }
    }
}
