//! LocalObjectStore - object store backed by a directory.
//!
//! Keys map to relative paths under the root. Writes go to a temporary sibling
//! first and are renamed into place, so a reader never sees a half-written
//! result.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::domain::ByteRange;
use crate::error::StorageError;
use crate::ports::ObjectStore;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root, rejecting anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(StorageError::Other(format!("invalid key {key:?}")));
        }
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::Other(format!("invalid key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(key: &str, err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound {
            key: key.to_string(),
        },
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            StorageError::Transient(format!("{key}: {err}"))
        }
        _ => StorageError::Other(format!("{key}: {err}")),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, e))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = path.with_file_name(format!(".{file_name}.{}.tmp", ulid::Ulid::new()));

        if let Err(e) = tokio::fs::write(&staging, &bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(map_io(key, e));
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(map_io(key, e));
        }
        Ok(())
    }

    async fn fetch_range(&self, key: &str, range: ByteRange) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(key, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| map_io(key, e))?
            .len();

        let start = range.start.min(len);
        let end = range.end.clamp(start, len);
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| map_io(key, e))?;

        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| map_io(key, e))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn put_creates_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store
            .put("results/2024/job-1.json", b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(store.fetch("results/2024/job-1.json").await.unwrap(), b"{}");
        assert!(dir.path().join("results/2024/job-1.json").is_file());
    }

    #[tokio::test]
    async fn put_overwrites_and_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("k", b"one".to_vec()).await.unwrap();
        store.put("k", b"two".to_vec()).await.unwrap();

        assert_eq!(store.fetch("k").await.unwrap(), b"two");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store.fetch("absent").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { key } if key == "absent"));
    }

    #[rstest]
    #[case("../escape")]
    #[case("/etc/passwd")]
    #[case("a//b")]
    #[case("a/./b")]
    #[case("")]
    #[tokio::test]
    async fn rejects_keys_escaping_the_root(#[case] key: &str) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store.fetch(key).await.unwrap_err();
        assert!(matches!(err, StorageError::Other(_)), "{key:?} -> {err:?}");
    }

    #[tokio::test]
    async fn fetch_range_reads_only_the_slice() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put("bundle", b"abcdefghij".to_vec()).await.unwrap();

        let slice = store
            .fetch_range("bundle", ByteRange::new(3, 7))
            .await
            .unwrap();
        assert_eq!(slice, b"defg");

        let clamped = store
            .fetch_range("bundle", ByteRange::new(8, 64))
            .await
            .unwrap();
        assert_eq!(clamped, b"ij");
    }
}
