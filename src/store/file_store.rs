//! `fileio` engine: blocks and metadata blobs on local disk.
//!
//! Blocks live beneath `base/blocks/{shard}/{shard}/{digest}` where the
//! shards are the first two bytes of the digest itself; metadata blobs live
//! beneath `base/meta/{bucket}/{shard}/{shard}/{md5(name)}`. Sharding keeps
//! the per-directory file count bounded. All writes go through a temp file
//! and an atomic rename.

use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::constants::{BUCKET_LIST_MAX_KEYS, S3_XMLNS};
use crate::errors::{S3Error, S3Result};
use crate::models::object_md::ObjectMd;
use crate::store::BlockStore;

pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject names that could escape the storage tree. Object names are
    /// never used as path components (they are hashed), so only bucket
    /// names need vetting.
    fn ensure_bucket_name_safe(bucket: &str) -> S3Result<()> {
        if bucket.is_empty()
            || bucket == "."
            || bucket == ".."
            || bucket
                .bytes()
                .any(|b| b == b'/' || b == b'\\' || b == b'\0' || b.is_ascii_control())
        {
            return Err(S3Error::invalid_request(format!(
                "invalid bucket name `{}`",
                bucket
            )));
        }
        Ok(())
    }

    fn block_path(&self, digest: &str) -> PathBuf {
        let mut path = self.base_path.join("blocks");
        path.push(&digest[..2.min(digest.len())]);
        path.push(&digest[2.min(digest.len())..4.min(digest.len())]);
        path.push(digest);
        path
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        let mut path = self.base_path.join("meta");
        path.push(bucket);
        path
    }

    fn object_md_path(&self, bucket: &str, name: &str) -> PathBuf {
        let digest = md5::compute(name.as_bytes());
        let mut path = self.bucket_root(bucket);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    /// Write `data` to `path` via a temp file in the same directory followed
    /// by a rename, creating parent directories as needed.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "path missing parent directory"))?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(())
    }

    /// Decode every metadata record under the bucket's shard tree.
    async fn collect_objects(&self, bucket: &str) -> S3Result<Vec<ObjectMd>> {
        let root = self.bucket_root(bucket);
        let mut records = Vec::new();
        let mut shard_a = read_dir(&root).await?;
        while let Some(a) = next_entry(&mut shard_a).await? {
            let mut shard_b = read_dir(&a.path()).await?;
            while let Some(b) = next_entry(&mut shard_b).await? {
                let mut files = read_dir(&b.path()).await?;
                while let Some(entry) = next_entry(&mut files).await? {
                    let bytes = fs::read(entry.path())
                        .await
                        .map_err(|err| S3Error::internal(format!("read object md: {}", err)))?;
                    records.push(ObjectMd::decode(&bytes)?);
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BlockStore for FileStore {
    async fn put_bucket(&self, bucket: &str) -> S3Result<()> {
        Self::ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        if fs::metadata(&root).await.is_ok() {
            return Err(S3Error::bucket_already_exists(bucket));
        }
        fs::create_dir_all(&root)
            .await
            .map_err(|err| S3Error::internal(format!("create bucket dir: {}", err)))?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> S3Result<()> {
        Self::ensure_bucket_name_safe(bucket)?;
        match fs::metadata(self.bucket_root(bucket)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(S3Error::internal("bucket path is not a directory")),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(S3Error::no_such_bucket(bucket))
            }
            Err(err) => Err(S3Error::internal(format!("stat bucket: {}", err))),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> S3Result<()> {
        self.head_bucket(bucket).await?;
        if !self.collect_objects(bucket).await?.is_empty() {
            return Err(S3Error::bucket_not_empty(bucket));
        }
        fs::remove_dir_all(self.bucket_root(bucket))
            .await
            .map_err(|err| S3Error::internal(format!("remove bucket dir: {}", err)))
    }

    async fn get_bucket(&self, bucket: &str) -> S3Result<String> {
        self.head_bucket(bucket).await?;
        let mut records = self.collect_objects(bucket).await?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records.truncate(BUCKET_LIST_MAX_KEYS);
        Ok(build_list_bucket_xml(bucket, &records))
    }

    async fn is_data_block_exist(&self, digest: &str) -> bool {
        fs::metadata(self.block_path(digest)).await.is_ok()
    }

    async fn write_data_block(&self, data: &[u8], digest: &str) -> S3Result<()> {
        let path = self.block_path(digest);
        if fs::metadata(&path).await.is_ok() {
            // content-addressed: an existing block is bit-identical
            debug!(digest, "data block already present");
            return Ok(());
        }
        self.write_atomic(&path, data)
            .await
            .map_err(|err| S3Error::internal(format!("write data block: {}", err)))
    }

    async fn read_data_block_range(
        &self,
        digest: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> S3Result<usize> {
        let path = self.block_path(digest);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(S3Error::internal(format!("data block missing: {}", digest)));
            }
            Err(err) => return Err(S3Error::internal(format!("open data block: {}", err))),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|err| S3Error::internal(format!("seek data block: {}", err)))?;
        }
        let mut n = 0;
        while n < buf.len() {
            let r = file
                .read(&mut buf[n..])
                .await
                .map_err(|err| S3Error::internal(format!("read data block: {}", err)))?;
            if r == 0 {
                break;
            }
            n += r;
        }
        Ok(n)
    }

    async fn write_object_md(&self, bucket: &str, name: &str, data: &[u8]) -> S3Result<()> {
        self.head_bucket(bucket).await?;
        self.write_atomic(&self.object_md_path(bucket, name), data)
            .await
            .map_err(|err| S3Error::internal(format!("write object md: {}", err)))
    }

    async fn read_object_md(&self, bucket: &str, name: &str) -> S3Result<Vec<u8>> {
        self.head_bucket(bucket).await?;
        match fs::read(self.object_md_path(bucket, name)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(S3Error::no_such_key(bucket, name))
            }
            Err(err) => Err(S3Error::internal(format!("read object md: {}", err))),
        }
    }
}

async fn read_dir(path: &Path) -> S3Result<fs::ReadDir> {
    fs::read_dir(path)
        .await
        .map_err(|err| S3Error::internal(format!("read dir {}: {}", path.display(), err)))
}

async fn next_entry(dir: &mut fs::ReadDir) -> S3Result<Option<fs::DirEntry>> {
    dir.next_entry()
        .await
        .map_err(|err| S3Error::internal(format!("read dir entry: {}", err)))
}

fn build_list_bucket_xml(bucket: &str, records: &[ObjectMd]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="{}">"#,
        S3_XMLNS
    );
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", records.len()));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", BUCKET_LIST_MAX_KEYS));
    xml.push_str("<IsTruncated>false</IsTruncated>");
    for md in records {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&md.name)));
        if let Some(ts) = DateTime::from_timestamp(md.mtime, 0) {
            xml.push_str(&format!(
                "<LastModified>{}</LastModified>",
                ts.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
        }
        xml.push_str(&format!("<ETag>\"{}\"</ETag>", xml_escape(&md.etag)));
        xml.push_str(&format!("<Size>{}</Size>", md.size));
        xml.push_str("</Contents>");
    }
    xml.push_str("</ListBucketResult>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn bucket_lifecycle() {
        let (_dir, store) = store();

        assert_eq!(
            store.head_bucket("b1").await.unwrap_err().status,
            StatusCode::NOT_FOUND
        );

        store.put_bucket("b1").await.unwrap();
        store.head_bucket("b1").await.unwrap();

        let err = store.put_bucket("b1").await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        store.delete_bucket("b1").await.unwrap();
        assert_eq!(
            store.delete_bucket("b1").await.unwrap_err().status,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn rejects_traversal_bucket_names() {
        let (_dir, store) = store();
        for name in ["", "..", "a/b", "a\\b"] {
            let err = store.put_bucket(name).await.unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "name {:?}", name);
        }
    }

    #[tokio::test]
    async fn data_block_write_is_idempotent() {
        let (_dir, store) = store();
        let data = b"some block payload";
        let digest = format!("{:x}", md5::compute(data));

        assert!(!store.is_data_block_exist(&digest).await);
        store.write_data_block(data, &digest).await.unwrap();
        assert!(store.is_data_block_exist(&digest).await);
        // second write is a no-op
        store.write_data_block(data, &digest).await.unwrap();

        let mut buf = vec![0u8; data.len()];
        let n = store.read_data_block_range(&digest, 0, &mut buf).await.unwrap();
        assert_eq!(n, data.len());
        assert_eq!(&buf[..n], data);
    }

    #[tokio::test]
    async fn read_range_honors_offset_and_short_tail() {
        let (_dir, store) = store();
        let data = b"0123456789";
        let digest = format!("{:x}", md5::compute(data));
        store.write_data_block(data, &digest).await.unwrap();

        let mut buf = vec![0u8; 4];
        let n = store.read_data_block_range(&digest, 6, &mut buf).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], b"6789");

        let mut buf = vec![0u8; 16];
        let n = store.read_data_block_range(&digest, 8, &mut buf).await.unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn missing_block_is_internal_error() {
        let (_dir, store) = store();
        let mut buf = vec![0u8; 8];
        let err = store
            .read_data_block_range(&"f".repeat(32), 0, &mut buf)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn object_md_round_trip_and_listing() {
        let (_dir, store) = store();
        store.put_bucket("b1").await.unwrap();

        let mut md = ObjectMd::new("b1", "/k1", 5);
        md.etag = "5d41402abc4b2a76b9719d911017c592".into();
        md.blocks = vec![md.etag.clone()];
        store
            .write_object_md("b1", "/k1", &md.encode().unwrap())
            .await
            .unwrap();

        let bytes = store.read_object_md("b1", "/k1").await.unwrap();
        assert_eq!(ObjectMd::decode(&bytes).unwrap(), md);

        let err = store.read_object_md("b1", "/nope").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = store.read_object_md("b2", "/k1").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let xml = store.get_bucket("b1").await.unwrap();
        assert!(xml.contains("<Key>/k1</Key>"));
        assert!(xml.contains("<Size>5</Size>"));
        assert!(xml.contains("<KeyCount>1</KeyCount>"));

        // a bucket holding objects cannot be deleted
        let err = store.delete_bucket("b1").await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn overwrite_replaces_metadata() {
        let (_dir, store) = store();
        store.put_bucket("b1").await.unwrap();

        let mut first = ObjectMd::new("b1", "/k1", 1);
        first.etag = "a".repeat(32);
        store
            .write_object_md("b1", "/k1", &first.encode().unwrap())
            .await
            .unwrap();

        let mut second = ObjectMd::new("b1", "/k1", 2);
        second.etag = "b".repeat(32);
        store
            .write_object_md("b1", "/k1", &second.encode().unwrap())
            .await
            .unwrap();

        let bytes = store.read_object_md("b1", "/k1").await.unwrap();
        assert_eq!(ObjectMd::decode(&bytes).unwrap().etag, second.etag);
    }
}
