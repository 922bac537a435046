//! ObjectStore port - durable key/value blob storage.
//!
//! Function code, input bundles and results all move through this trait. Concrete
//! bindings live in `impls` (in-memory, local directory); a cloud bucket would
//! be one more implementation.
//!
//! # Design principles
//! - stateless: no per-job state is kept between calls
//! - `Send + Sync`: one instance is shared by every worker slot
//! - retries are the caller's business (see `retry::with_retry`)

use async_trait::async_trait;

use crate::domain::ByteRange;
use crate::error::StorageError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the whole object stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch `[range.start, range.end)` of an object, clamped to its length.
    ///
    /// The default slices a full fetch; bindings with native range reads
    /// should override it.
    async fn fetch_range(&self, key: &str, range: ByteRange) -> Result<Vec<u8>, StorageError> {
        let bytes = self.fetch(key).await?;
        let len = bytes.len() as u64;
        let start = range.start.min(len);
        let end = range.end.clamp(start, len);
        Ok(bytes[start as usize..end as usize].to_vec())
    }
}
