//! Pluggable backend for data blocks and object-metadata blobs.
//!
//! The pipelines only ever talk to [`BlockStore`]; which engine sits behind
//! it is decided once at startup from the `--io` flag.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::S3Result;

pub mod file_store;
pub mod mem_store;

pub use file_store::FileStore;
pub use mem_store::MemStore;

/// Backend contract consumed by the pipelines and the dispatcher.
///
/// Operations are individually thread-safe. `write_data_block` is idempotent
/// for the same `(bytes, digest)` pair, and `is_data_block_exist` may race
/// with a concurrent write of the same digest; either outcome is correct
/// because blocks are immutable once written.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Create a bucket. 409 if it already exists.
    async fn put_bucket(&self, bucket: &str) -> S3Result<()>;

    /// Check bucket existence. 404 if missing.
    async fn head_bucket(&self, bucket: &str) -> S3Result<()>;

    /// Delete a bucket. 404 if missing, 409 if it still holds objects.
    async fn delete_bucket(&self, bucket: &str) -> S3Result<()>;

    /// Produce the XML listing body for the bucket's objects.
    async fn get_bucket(&self, bucket: &str) -> S3Result<String>;

    /// Whether a block with this digest is already stored.
    async fn is_data_block_exist(&self, digest: &str) -> bool;

    /// Persist one data block under its digest. A no-op when the block
    /// already exists.
    async fn write_data_block(&self, data: &[u8], digest: &str) -> S3Result<()>;

    /// Read up to `buf.len()` bytes of the block starting at `offset`;
    /// returns the number of bytes read.
    async fn read_data_block_range(
        &self,
        digest: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> S3Result<usize>;

    /// Persist the metadata blob for `(bucket, name)`, replacing any
    /// previous record.
    async fn write_object_md(&self, bucket: &str, name: &str, data: &[u8]) -> S3Result<()>;

    /// Fetch the metadata blob for `(bucket, name)`.
    async fn read_object_md(&self, bucket: &str, name: &str) -> S3Result<Vec<u8>>;
}

/// Instantiate the engine selected by the `--io` flag, or `None` for an
/// unknown engine name.
pub fn open_engine(engine: &str, storage_dir: &Path) -> Option<Arc<dyn BlockStore>> {
    match engine {
        "fileio" => Some(Arc::new(FileStore::new(storage_dir))),
        "memio" => Some(Arc::new(MemStore::new())),
        _ => None,
    }
}
