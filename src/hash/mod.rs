//! Checksum computation for copy verification
//!
//! Provides XXHash3, XXHash64, BLAKE3 and SHA-256 digests for the backends
//! that compute checksums themselves (in-memory and local directory).

mod integrity;

pub use integrity::*;
