//! Content checksums for copy verification
//!
//! Checksums are rendered as `<tag>:<hex>` (for example `xxh3:9a1f...`) so
//! that values produced with different algorithms are never compared.

use crate::config::HashAlgorithm;
use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Hash result as hex string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResult {
    /// The hash algorithm used
    pub algorithm: HashAlgorithm,
    /// Hash value as lowercase hex string
    pub hash: String,
    /// Number of bytes hashed
    pub size: u64,
}

impl HashResult {
    /// Create a new hash result
    pub fn new(algorithm: HashAlgorithm, hash: String, size: u64) -> Self {
        Self { algorithm, hash, size }
    }

    /// Render as a tagged checksum string
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.algorithm.tag(), self.hash)
    }
}

impl std::fmt::Display for HashResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tagged())
    }
}

/// Unified hasher that supports all algorithms
pub enum Hasher {
    /// XXHash3 128-bit
    XXHash3(xxhash_rust::xxh3::Xxh3),
    /// XXHash64
    XXHash64(xxhash_rust::xxh64::Xxh64),
    /// BLAKE3
    Blake3(blake3::Hasher),
    /// SHA-256
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Create a new hasher for the given algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::XXHash3 => Self::XXHash3(xxhash_rust::xxh3::Xxh3::new()),
            HashAlgorithm::XXHash64 => Self::XXHash64(xxhash_rust::xxh64::Xxh64::new(0)),
            HashAlgorithm::Blake3 => Self::Blake3(blake3::Hasher::new()),
            HashAlgorithm::Sha256 => {
                use sha2::Digest;
                Self::Sha256(sha2::Sha256::new())
            }
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::XXHash3(h) => h.update(data),
            Self::XXHash64(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
            Self::Sha256(h) => {
                use sha2::Digest;
                h.update(data);
            }
        }
    }

    /// Finalize and get the hash as hex string
    pub fn finalize(self) -> String {
        match self {
            Self::XXHash3(h) => format!("{:032x}", h.digest128()),
            Self::XXHash64(h) => format!("{:016x}", h.digest()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::Sha256(h) => {
                use sha2::Digest;
                hex::encode(h.finalize())
            }
        }
    }
}

/// Compute hash of data in memory
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> HashResult {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    HashResult::new(algorithm, hasher.finalize(), data.len() as u64)
}

/// Compute hash of a file
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<HashResult> {
    const BUFFER_SIZE: usize = 1024 * 1024;

    let file = File::open(path).with_path(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).with_path(path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(HashResult::new(algorithm, hasher.finalize(), size))
}

/// Compare two tagged checksums
///
/// Returns `None` when the values were produced by different algorithms and
/// cannot be compared.
pub fn checksums_match(expected: &str, actual: &str) -> Option<bool> {
    let (expected_tag, expected_hash) = expected.split_once(':')?;
    let (actual_tag, actual_hash) = actual.split_once(':')?;

    if expected_tag != actual_tag {
        return None;
    }
    Some(expected_hash.eq_ignore_ascii_case(actual_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_algorithms() {
        let data = b"archive me";

        for algorithm in [
            HashAlgorithm::XXHash3,
            HashAlgorithm::XXHash64,
            HashAlgorithm::Blake3,
            HashAlgorithm::Sha256,
        ] {
            let hash = hash_bytes(data, algorithm);
            assert!(!hash.hash.is_empty());
            assert_eq!(hash.size, data.len() as u64);
            assert!(hash.tagged().starts_with(algorithm.tag()));
            assert_eq!(hash, hash_bytes(data, algorithm));
        }
    }

    #[test]
    fn test_hash_file_matches_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("object.bin");
        std::fs::write(&path, b"coldline payload").unwrap();

        let from_file = hash_file(&path, HashAlgorithm::Blake3).unwrap();
        let from_memory = hash_bytes(b"coldline payload", HashAlgorithm::Blake3);

        assert_eq!(from_file, from_memory);
    }

    #[test]
    fn test_checksums_match() {
        let a = hash_bytes(b"one", HashAlgorithm::XXHash3).tagged();
        let b = hash_bytes(b"two", HashAlgorithm::XXHash3).tagged();
        let c = hash_bytes(b"one", HashAlgorithm::Sha256).tagged();

        assert_eq!(checksums_match(&a, &a), Some(true));
        assert_eq!(checksums_match(&a, &b), Some(false));
        assert_eq!(checksums_match(&a, &c), None);
        assert_eq!(checksums_match("untagged", &a), None);
    }
}
