//! The serialized descriptor of a stored object.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::DATA_BLOCK_SIZE;
use crate::errors::{S3Error, S3Result};

/// Current on-disk format version; written as a single leading byte ahead of
/// the bincode body so the layout can evolve.
const OBJECT_MD_VERSION: u8 = 1;

/// Metadata record for a single object.
///
/// The record is what the metadata store persists under `(bucket, name)`;
/// the payload itself lives in the content-addressed block store, reachable
/// through `blocks`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectMd {
    /// Owning bucket; never empty.
    pub bucket: String,

    /// Object key; always begins with `/`.
    pub name: String,

    /// Seconds since the Unix epoch at the time of the successful write.
    pub mtime: i64,

    /// Total payload length in bytes; equals the sum of block payload lengths.
    pub size: u64,

    /// Lowercase hex MD5 of the entire payload.
    pub etag: String,

    /// Chunking granularity used when this object was written.
    pub block_size: u32,

    /// Ordered per-block digests. Block `i` holds payload bytes
    /// `[i * block_size, min(size, (i + 1) * block_size))`.
    pub blocks: Vec<String>,

    /// How many blocks were already present in the store at write time.
    /// Advisory; not required for correctness.
    pub dd_blocks: u64,
}

impl ObjectMd {
    /// Fresh record for an incoming write; the pipeline fills in `etag`,
    /// `blocks`, and `dd_blocks`.
    pub fn new(bucket: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            mtime: Utc::now().timestamp(),
            size,
            etag: String::new(),
            block_size: DATA_BLOCK_SIZE as u32,
            blocks: Vec::new(),
            dd_blocks: 0,
        }
    }

    /// Payload length of block `idx`; only the final block may be short.
    pub fn block_payload_len(&self, idx: usize) -> usize {
        let bs = self.block_size as u64;
        let start = idx as u64 * bs;
        self.size.saturating_sub(start).min(bs) as usize
    }

    /// Serialize as a version byte followed by the bincode body.
    pub fn encode(&self) -> S3Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|err| S3Error::internal(format!("failed to encode object metadata: {}", err)))?;
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(OBJECT_MD_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a record previously produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> S3Result<Self> {
        match bytes.split_first() {
            Some((&OBJECT_MD_VERSION, body)) => bincode::deserialize(body).map_err(|err| {
                S3Error::internal(format!("failed to decode object metadata: {}", err))
            }),
            Some((version, _)) => Err(S3Error::internal(format!(
                "unknown object metadata version {}",
                version
            ))),
            None => Err(S3Error::internal("empty object metadata")),
        }
    }
}
