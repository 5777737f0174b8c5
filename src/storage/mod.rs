//! Object storage backends
//!
//! The engine talks to storage only through the [`ObjectStore`] trait:
//! paginated listing, metadata lookup, server-side copy and delete.
//! Implementations are provided for an in-process store (tests and dry
//! rehearsals), a local directory tree, and S3-compatible services.

mod local;
mod memory;
#[cfg(feature = "native_s3")]
mod s3;

pub use local::*;
pub use memory::*;
#[cfg(feature = "native_s3")]
pub use s3::*;

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a single backend call
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Backend operations, used to label retries and failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOp {
    /// Fetch one page of a bucket listing
    List,
    /// Existence / metadata check
    Head,
    /// Server-side copy
    Copy,
    /// Object removal
    Delete,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::List => "list",
            Self::Head => "head",
            Self::Copy => "copy",
            Self::Delete => "delete",
        })
    }
}

/// An object as seen by the lister
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Bucket-relative key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the backend reports one
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend storage tier (STANDARD, COLDLINE, GLACIER, ...)
    pub storage_class: Option<String>,
    /// Content checksum, when the backend reports one
    pub checksum: Option<String>,
}

impl ObjectDescriptor {
    /// Create a descriptor with only key and size known
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            storage_class: None,
            checksum: None,
        }
    }

    /// Set the last-modified timestamp
    pub fn with_last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }

    /// Set the storage class
    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    /// Set the checksum
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Directory placeholder objects created by consoles and sync tools
    pub fn is_placeholder(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Metadata returned by a head call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes
    pub size: u64,
    /// Content checksum, when the backend reports one
    pub checksum: Option<String>,
    /// Storage class
    pub storage_class: Option<String>,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page
    pub objects: Vec<ObjectDescriptor>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Storage backend used by the archive engine
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Fetch one page of objects in `bucket` whose key starts with `prefix`
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> StorageResult<ListPage>;

    /// Look up an object; `Ok(None)` when it does not exist
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Server-side copy, overwriting the destination
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    /// Remove an object
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;
}
