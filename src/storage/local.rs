//! Local directory backend
//!
//! Treats every sub-directory of a root as a bucket and every regular file
//! below it as an object keyed by its `/`-separated relative path. Useful
//! for archiving between mounted volumes and for exercising the engine
//! without cloud credentials.

use super::{ListPage, ObjectDescriptor, ObjectMeta, ObjectStore, StorageResult};
use crate::config::HashAlgorithm;
use crate::error::{StorageError, StorageErrorKind};
use crate::hash::hash_file;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Storage class reported for local files
pub const LOCAL_STORAGE_CLASS: &str = "STANDARD";

const PARTIAL_SUFFIX: &str = ".objarchive-partial";

/// Directory-tree [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    checksum: Option<HashAlgorithm>,
}

impl LocalStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checksum: None,
        }
    }

    /// Compute checksums with `algorithm` on listing and head
    pub fn with_checksums(mut self, algorithm: HashAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_segment(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let bucket_path = self.bucket_path(bucket)?;
        let relative = Path::new(key);

        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StorageError::new(
                StorageErrorKind::InvalidRequest,
                format!("key '{}' is not a relative object path", key),
            ));
        }

        Ok(bucket_path.join(relative))
    }

    fn checksum_of(path: &Path, algorithm: Option<HashAlgorithm>) -> StorageResult<Option<String>> {
        match algorithm {
            Some(algorithm) => hash_file(path, algorithm)
                .map(|result| Some(result.tagged()))
                .map_err(|e| StorageError::new(StorageErrorKind::Other, e.to_string())),
            None => Ok(None),
        }
    }
}

fn validate_segment(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
        return Err(StorageError::new(
            StorageErrorKind::InvalidRequest,
            format!("'{}' is not a valid bucket name", bucket),
        ));
    }
    Ok(())
}

fn key_for(bucket_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    Some(parts?.join("/"))
}

fn join_error(err: tokio::task::JoinError) -> StorageError {
    StorageError::new(StorageErrorKind::Other, format!("blocking task failed: {}", err))
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        _token: Option<String>,
    ) -> StorageResult<ListPage> {
        let bucket_root = self.bucket_path(bucket)?;
        let prefix = prefix.unwrap_or("").to_string();
        let checksum = self.checksum;

        let objects = tokio::task::spawn_blocking(move || -> StorageResult<Vec<ObjectDescriptor>> {
            if !bucket_root.is_dir() {
                return Err(StorageError::not_found(format!(
                    "bucket directory '{}' does not exist",
                    bucket_root.display()
                )));
            }

            let mut objects = Vec::new();
            for entry in WalkDir::new(&bucket_root).sort_by_file_name() {
                let entry = entry.map_err(|e| match e.into_io_error() {
                    Some(io) => StorageError::from(io),
                    None => StorageError::new(StorageErrorKind::Other, "directory walk failed"),
                })?;
                if !entry.file_type().is_file()
                    || entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX)
                {
                    continue;
                }

                let Some(key) = key_for(&bucket_root, entry.path()) else {
                    tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 path");
                    continue;
                };
                if !key.starts_with(&prefix) {
                    continue;
                }

                let metadata = entry.metadata().map_err(|e| match e.into_io_error() {
                    Some(io) => StorageError::from(io),
                    None => StorageError::new(StorageErrorKind::Other, "metadata read failed"),
                })?;

                objects.push(ObjectDescriptor {
                    key,
                    size: metadata.len(),
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    storage_class: Some(LOCAL_STORAGE_CLASS.to_string()),
                    checksum: Self::checksum_of(entry.path(), checksum)?,
                });
            }
            Ok(objects)
        })
        .await
        .map_err(join_error)??;

        Ok(ListPage {
            objects,
            next_token: None,
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.object_path(bucket, key)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checksum = self.checksum;
        let checksum = tokio::task::spawn_blocking(move || Self::checksum_of(&path, checksum))
            .await
            .map_err(join_error)??;

        Ok(Some(ObjectMeta {
            size: metadata.len(),
            checksum,
            storage_class: Some(LOCAL_STORAGE_CLASS.to_string()),
        }))
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;

        let dst_root = self.bucket_path(dst_bucket)?;
        if !tokio::fs::try_exists(&dst_root).await? {
            return Err(StorageError::not_found(format!(
                "bucket directory '{}' does not exist",
                dst_root.display()
            )));
        }

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Staged under a temporary name; a truncated object never appears at `dst`.
        let staging = dst.with_file_name(format!(
            ".{}{}",
            dst.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            PARTIAL_SUFFIX
        ));

        if let Err(err) = stage_and_commit(&src, &staging, &dst).await {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging file");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}

async fn stage_and_commit(src: &Path, staging: &Path, dst: &Path) -> StorageResult<()> {
    tokio::fs::copy(src, staging).await?;

    let source_meta = tokio::fs::metadata(src).await?;
    let mtime = FileTime::from_last_modification_time(&source_meta);
    filetime::set_file_mtime(staging, mtime)?;

    tokio::fs::rename(staging, dst).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/logs")).unwrap();
        std::fs::create_dir_all(dir.path().join("dst")).unwrap();
        std::fs::write(dir.path().join("src/logs/a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), b"bravo!").unwrap();
        let store = LocalStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_keys_and_prefix() {
        let (_dir, store) = setup();

        let page = store.list_page("src", None, None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b.txt", "logs/a.txt"]);
        assert!(page.next_token.is_none());

        let page = store.list_page("src", Some("logs/"), None).await.unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].size, 5);
        assert!(page.objects[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_copy_preserves_mtime_and_verifies() {
        let (dir, store) = setup();
        let store = store.with_checksums(HashAlgorithm::Blake3);

        let old = SystemTime::now() - Duration::from_secs(400 * 86_400);
        filetime::set_file_mtime(
            dir.path().join("src/logs/a.txt"),
            FileTime::from_system_time(old),
        )
        .unwrap();

        store.copy("src", "logs/a.txt", "dst", "logs/a.txt").await.unwrap();

        let src = store.head("src", "logs/a.txt").await.unwrap().unwrap();
        let dst = store.head("dst", "logs/a.txt").await.unwrap().unwrap();
        assert_eq!(src, dst);

        let original = std::fs::metadata(dir.path().join("src/logs/a.txt")).unwrap();
        let copied = std::fs::metadata(dir.path().join("dst/logs/a.txt")).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&copied),
            FileTime::from_last_modification_time(&original)
        );
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_staging_file() {
        let (dir, store) = setup();
        // A non-empty directory at the destination path makes the final rename fail
        std::fs::create_dir_all(dir.path().join("dst/logs/a.txt/inner")).unwrap();

        assert!(store.copy("src", "logs/a.txt", "dst", "logs/a.txt").await.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("dst/logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["a.txt"]);
        assert!(dir.path().join("dst/logs/a.txt").is_dir());
    }

    #[tokio::test]
    async fn test_head_missing_and_delete() {
        let (_dir, store) = setup();

        assert!(store.head("dst", "nothing.txt").await.unwrap().is_none());
        store.delete("src", "b.txt").await.unwrap();
        assert!(store.head("src", "b.txt").await.unwrap().is_none());

        let err = store.delete("src", "b.txt").await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = setup();

        let err = store.head("src", "../dst/x").await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidRequest);

        let err = store.list_page("..", None, None).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let (_dir, store) = setup();
        let err = store.list_page("absent", None, None).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::NotFound);
    }
}
