//! `memio` engine: everything in process memory.
//!
//! Used by the test suite and selectable from the CLI for throwaway runs.
//! Keeps a counter of physical block writes so dedup behavior is observable.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::constants::{BUCKET_LIST_MAX_KEYS, S3_XMLNS};
use crate::errors::{S3Error, S3Result};
use crate::models::object_md::ObjectMd;
use crate::store::BlockStore;

#[derive(Default)]
struct Inner {
    // bucket -> object name -> metadata blob
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    blocks: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
    block_writes: AtomicU64,
    block_reads: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical block writes so far; dedup hits do not count.
    pub fn block_writes(&self) -> u64 {
        self.block_writes.load(Ordering::Relaxed)
    }

    /// Number of block range reads so far.
    pub fn block_reads(&self) -> u64 {
        self.block_reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockStore for MemStore {
    async fn put_bucket(&self, bucket: &str) -> S3Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.buckets.contains_key(bucket) {
            return Err(S3Error::bucket_already_exists(bucket));
        }
        inner.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> S3Result<()> {
        let inner = self.inner.read().unwrap();
        if inner.buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(S3Error::no_such_bucket(bucket))
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> S3Result<()> {
        let mut inner = self.inner.write().unwrap();
        match inner.buckets.get(bucket) {
            None => Err(S3Error::no_such_bucket(bucket)),
            Some(objects) if !objects.is_empty() => Err(S3Error::bucket_not_empty(bucket)),
            Some(_) => {
                inner.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn get_bucket(&self, bucket: &str) -> S3Result<String> {
        let inner = self.inner.read().unwrap();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| S3Error::no_such_bucket(bucket))?;

        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="{}">"#,
            S3_XMLNS
        );
        xml.push_str(&format!("<Name>{}</Name>", bucket));
        let count = objects.len().min(BUCKET_LIST_MAX_KEYS);
        xml.push_str(&format!("<KeyCount>{}</KeyCount>", count));
        xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", BUCKET_LIST_MAX_KEYS));
        xml.push_str("<IsTruncated>false</IsTruncated>");
        for bytes in objects.values().take(BUCKET_LIST_MAX_KEYS) {
            let md = ObjectMd::decode(bytes)?;
            xml.push_str(&format!(
                "<Contents><Key>{}</Key><ETag>\"{}\"</ETag><Size>{}</Size></Contents>",
                md.name, md.etag, md.size
            ));
        }
        xml.push_str("</ListBucketResult>");
        Ok(xml)
    }

    async fn is_data_block_exist(&self, digest: &str) -> bool {
        self.inner.read().unwrap().blocks.contains_key(digest)
    }

    async fn write_data_block(&self, data: &[u8], digest: &str) -> S3Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.blocks.contains_key(digest) {
            inner.blocks.insert(digest.to_string(), data.to_vec());
            self.block_writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn read_data_block_range(
        &self,
        digest: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> S3Result<usize> {
        self.block_reads.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read().unwrap();
        let block = inner
            .blocks
            .get(digest)
            .ok_or_else(|| S3Error::internal(format!("data block missing: {}", digest)))?;
        let start = (offset as usize).min(block.len());
        let n = (block.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&block[start..start + n]);
        Ok(n)
    }

    async fn write_object_md(&self, bucket: &str, name: &str, data: &[u8]) -> S3Result<()> {
        let mut inner = self.inner.write().unwrap();
        let objects = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
        objects.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_object_md(&self, bucket: &str, name: &str) -> S3Result<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
        objects
            .get(name)
            .cloned()
            .ok_or_else(|| S3Error::no_such_key(bucket, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_only_physical_block_writes() {
        let store = MemStore::new();
        let data = b"payload";
        let digest = format!("{:x}", md5::compute(data));

        store.write_data_block(data, &digest).await.unwrap();
        store.write_data_block(data, &digest).await.unwrap();
        assert_eq!(store.block_writes(), 1);
    }

    #[tokio::test]
    async fn bucket_must_exist_for_metadata() {
        let store = MemStore::new();
        let err = store.write_object_md("b1", "/k1", b"x").await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }
}
