//! In-process object store
//!
//! Keeps buckets in memory and records every call, which makes it the
//! backend of choice for tests and dry rehearsals. Failures can be injected
//! per operation and key, destination metadata can be tampered with, and a
//! fixed latency can be applied to copies.

use super::{ListPage, ObjectDescriptor, ObjectMeta, ObjectStore, StorageOp, StorageResult};
use crate::config::HashAlgorithm;
use crate::error::StorageError;
use crate::hash::hash_bytes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// An object to seed into a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryObject {
    /// Object key
    pub key: String,
    /// Object body
    pub body: Vec<u8>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Storage class
    pub storage_class: Option<String>,
}

impl MemoryObject {
    /// Create an object modified now
    pub fn new(key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            last_modified: Some(Utc::now()),
            storage_class: None,
        }
    }

    /// Set the modification time
    pub fn modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }

    /// Clear the modification time
    pub fn without_modified(mut self) -> Self {
        self.last_modified = None;
        self
    }

    /// Set the storage class
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCall {
    /// Operation performed
    pub op: StorageOp,
    /// Bucket addressed (destination bucket for copies)
    pub bucket: String,
    /// Object key, or the prefix for listings
    pub key: String,
    /// Whether the call returned `Ok` (a head of a missing object counts as failed)
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body_len: u64,
    checksum: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    storage_class: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    faults: HashMap<(StorageOp, String), VecDeque<StorageError>>,
    size_overrides: HashMap<(String, String), u64>,
    checksum_overrides: HashMap<(String, String), String>,
    calls: Vec<StorageCall>,
}

/// In-memory [`ObjectStore`]
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    page_size: usize,
    checksum: Option<HashAlgorithm>,
    copy_latency: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            checksum: None,
            copy_latency: Duration::ZERO,
        }
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Report checksums computed with `algorithm`
    pub fn with_checksums(mut self, algorithm: HashAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }

    /// Delay every copy by `latency`
    pub fn with_copy_latency(mut self, latency: Duration) -> Self {
        self.copy_latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty bucket
    pub fn create_bucket(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Insert or replace an object, creating the bucket if needed
    pub fn put(&self, bucket: &str, object: MemoryObject) {
        let checksum = self
            .checksum
            .map(|algorithm| hash_bytes(&object.body, algorithm).tagged());
        let stored = StoredObject {
            body_len: object.body.len() as u64,
            checksum,
            last_modified: object.last_modified,
            storage_class: object.storage_class,
        };
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(object.key, stored);
    }

    /// Fail the next call of `op` on `key` with `error`
    ///
    /// For listings the key is the bucket name. Faults queue up and are
    /// consumed one per call.
    pub fn inject_fault(&self, op: StorageOp, key: &str, error: StorageError) {
        self.inject_faults(op, key, 1, error);
    }

    /// Fail the next `count` calls of `op` on `key` with `error`
    pub fn inject_faults(&self, op: StorageOp, key: &str, count: usize, error: StorageError) {
        let mut state = self.lock();
        let queue = state.faults.entry((op, key.to_string())).or_default();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    /// Make head calls report `size` for this object
    pub fn tamper_size(&self, bucket: &str, key: &str, size: u64) {
        self.lock()
            .size_overrides
            .insert((bucket.to_string(), key.to_string()), size);
    }

    /// Make head calls report `checksum` for this object
    pub fn tamper_checksum(&self, bucket: &str, key: &str, checksum: impl Into<String>) {
        self.lock()
            .checksum_overrides
            .insert((bucket.to_string(), key.to_string()), checksum.into());
    }

    /// Check whether an object exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    /// Keys in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// All recorded calls in completion order
    pub fn calls(&self) -> Vec<StorageCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op` on `key`
    pub fn call_count(&self, op: StorageOp, key: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op && call.key == key)
            .count()
    }

    /// Number of calls of `op` on any key
    pub fn op_count(&self, op: StorageOp) -> usize {
        self.lock().calls.iter().filter(|call| call.op == op).count()
    }

    fn take_fault(state: &mut MemoryState, op: StorageOp, key: &str) -> Option<StorageError> {
        state
            .faults
            .get_mut(&(op, key.to_string()))
            .and_then(VecDeque::pop_front)
    }

    fn record(state: &mut MemoryState, op: StorageOp, bucket: &str, key: &str, succeeded: bool) {
        state.calls.push(StorageCall {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            succeeded,
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        let mut state = self.lock();
        let prefix = prefix.unwrap_or("");

        if let Some(err) = Self::take_fault(&mut state, StorageOp::List, bucket) {
            Self::record(&mut state, StorageOp::List, bucket, prefix, false);
            return Err(err);
        }

        let Some(objects) = state.buckets.get(bucket) else {
            Self::record(&mut state, StorageOp::List, bucket, prefix, false);
            return Err(StorageError::not_found(format!("bucket '{}' does not exist", bucket)));
        };

        let start = match &token {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page: Vec<ObjectDescriptor> = objects
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(key, stored)| ObjectDescriptor {
                key: key.clone(),
                size: stored.body_len,
                last_modified: stored.last_modified,
                storage_class: stored.storage_class.clone(),
                checksum: stored.checksum.clone(),
            })
            .collect();

        let next_token = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|object| object.key.clone())
        } else {
            None
        };

        Self::record(&mut state, StorageOp::List, bucket, prefix, true);
        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let mut state = self.lock();

        if let Some(err) = Self::take_fault(&mut state, StorageOp::Head, key) {
            Self::record(&mut state, StorageOp::Head, bucket, key, false);
            return Err(err);
        }

        let id = (bucket.to_string(), key.to_string());
        let meta = state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|stored| ObjectMeta {
                size: state.size_overrides.get(&id).copied().unwrap_or(stored.body_len),
                checksum: state
                    .checksum_overrides
                    .get(&id)
                    .cloned()
                    .or_else(|| stored.checksum.clone()),
                storage_class: stored.storage_class.clone(),
            });

        Self::record(&mut state, StorageOp::Head, bucket, key, meta.is_some());
        Ok(meta)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        if !self.copy_latency.is_zero() {
            tokio::time::sleep(self.copy_latency).await;
        }

        let mut state = self.lock();

        if let Some(err) = Self::take_fault(&mut state, StorageOp::Copy, src_key) {
            Self::record(&mut state, StorageOp::Copy, dst_bucket, src_key, false);
            return Err(err);
        }

        let source = state
            .buckets
            .get(src_bucket)
            .and_then(|objects| objects.get(src_key))
            .cloned();

        let Some(mut object) = source else {
            Self::record(&mut state, StorageOp::Copy, dst_bucket, src_key, false);
            return Err(StorageError::not_found(format!(
                "object '{}/{}' does not exist",
                src_bucket, src_key
            )));
        };

        if !state.buckets.contains_key(dst_bucket) {
            Self::record(&mut state, StorageOp::Copy, dst_bucket, src_key, false);
            return Err(StorageError::not_found(format!(
                "bucket '{}' does not exist",
                dst_bucket
            )));
        }

        object.last_modified = Some(Utc::now());
        state
            .buckets
            .entry(dst_bucket.to_string())
            .or_default()
            .insert(dst_key.to_string(), object);

        Self::record(&mut state, StorageOp::Copy, dst_bucket, src_key, true);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.lock();

        if let Some(err) = Self::take_fault(&mut state, StorageOp::Delete, key) {
            Self::record(&mut state, StorageOp::Delete, bucket, key, false);
            return Err(err);
        }

        let removed = state
            .buckets
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .is_some();

        Self::record(&mut state, StorageOp::Delete, bucket, key, removed);
        if removed {
            Ok(())
        } else {
            Err(StorageError::not_found(format!(
                "object '{}/{}' does not exist",
                bucket, key
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;

    #[tokio::test]
    async fn test_pagination() {
        let store = MemoryStore::new().with_page_size(2);
        for i in 0..5 {
            store.put("src", MemoryObject::new(format!("k{}", i), vec![0u8; i]));
        }

        let mut keys = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = store.list_page("src", None, token).await.unwrap();
            pages += 1;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
    }

    #[tokio::test]
    async fn test_prefix_listing() {
        let store = MemoryStore::new();
        store.put("src", MemoryObject::new("a/1", "x"));
        store.put("src", MemoryObject::new("b/1", "x"));
        store.put("src", MemoryObject::new("b/2", "x"));

        let page = store.list_page("src", Some("b/"), None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b/1", "b/2"]);
    }

    #[tokio::test]
    async fn test_copy_head_delete() {
        let store = MemoryStore::new().with_checksums(HashAlgorithm::XXHash3);
        store.create_bucket("dst");
        store.put("src", MemoryObject::new("obj", "hello").class("COLDLINE"));

        store.copy("src", "obj", "dst", "obj").await.unwrap();
        let meta = store.head("dst", "obj").await.unwrap().unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.checksum.unwrap().starts_with("xxh3:"));
        assert_eq!(meta.storage_class.as_deref(), Some("COLDLINE"));

        store.delete("src", "obj").await.unwrap();
        assert!(!store.contains("src", "obj"));
        assert!(store.head("src", "obj").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.put("src", MemoryObject::new("obj", "x"));
        store.inject_faults(
            StorageOp::Delete,
            "obj",
            2,
            StorageError::new(StorageErrorKind::ServerError, "503"),
        );

        assert!(store.delete("src", "obj").await.is_err());
        assert!(store.delete("src", "obj").await.is_err());
        assert!(store.delete("src", "obj").await.is_ok());
        assert_eq!(store.call_count(StorageOp::Delete, "obj"), 3);
    }

    #[tokio::test]
    async fn test_missing_bucket_listing() {
        let store = MemoryStore::new();
        let err = store.list_page("nope", None, None).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::NotFound);
    }
}
