//! Streaming object-write pipeline.
//!
//! The request body is cut into fixed-size blocks; each block is hashed,
//! deduplicated against the store, and persisted by a dedicated writer task
//! while the producer is already ingesting the next block. Pipeline depth is
//! two: one block being read, one being hashed/written. The producer waits
//! for the previous block's result before dispatching the next, which keeps
//! block digests and the cumulative ETag bytes in strict block order without
//! any explicit sequencing.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{DATA_BLOCK_SIZE, ZERO_DATA_ETAG};
use crate::errors::{S3Error, S3Result};
use crate::models::object_md::ObjectMd;
use crate::store::BlockStore;

/// What the writer task reports back for one block. The buffer rides along
/// so the producer can recycle it for a later block.
struct BlockWriteOutcome {
    digest: String,
    existed: bool,
    result: S3Result<()>,
    buf: Vec<u8>,
}

/// Consume `content_length` bytes of `body`, persist the payload as
/// deduplicated blocks, and fill `md.blocks`, `md.etag`, and `md.dd_blocks`.
///
/// `rw_timeout` bounds every cross-task hand-off; production callers pass
/// [`crate::constants::RW_TIMEOUT`].
pub async fn put_object_data<S>(
    store: Arc<dyn BlockStore>,
    body: S,
    content_length: u64,
    md: &mut ObjectMd,
    rw_timeout: Duration,
) -> S3Result<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    if content_length <= DATA_BLOCK_SIZE as u64 {
        return put_small_object(store, body, content_length, md).await;
    }

    let (job_tx, job_rx) = mpsc::channel::<Vec<u8>>(1);
    let (res_tx, mut res_rx) = mpsc::channel::<BlockWriteOutcome>(1);
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(block_writer(
        store,
        job_rx,
        res_tx,
        cancel.clone(),
        rw_timeout,
    ));

    let mut chunker = BodyChunker::new(body);
    let mut read_buf = vec![0u8; DATA_BLOCK_SIZE];
    let mut spare = vec![0u8; DATA_BLOCK_SIZE];
    let mut wait = false;
    let mut consumed: u64 = 0;
    let mut dd_blocks: u64 = 0;

    let outcome: S3Result<()> = async {
        while consumed < content_length {
            let target = (content_length - consumed).min(DATA_BLOCK_SIZE as u64) as usize;
            let n = chunker.fill_block(&mut read_buf[..target]).await?;
            consumed += n as u64;
            debug!(n, consumed, content_length, "read block from body");

            if n < target {
                return Err(S3Error::invalid_request("data less than ContentLength"));
            }

            if wait {
                let res = recv_outcome(&mut res_rx, rw_timeout).await?;
                res.result?;
                if res.existed {
                    dd_blocks += 1;
                }
                md.blocks.push(res.digest);
                spare = res.buf;
                spare.resize(DATA_BLOCK_SIZE, 0);
            }

            // hand the filled buffer to the writer, keep the spare for the
            // next body read
            let mut buf = mem::replace(&mut read_buf, mem::take(&mut spare));
            buf.truncate(n);
            wait = true;
            match timeout(rw_timeout, job_tx.send(buf)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(S3Error::internal("block writer exited early")),
                Err(_) => return Err(S3Error::internal("block writer stalled")),
            }
        }

        // drain the last in-flight block
        if wait {
            let res = recv_outcome(&mut res_rx, rw_timeout).await?;
            res.result?;
            if res.existed {
                dd_blocks += 1;
            }
            md.blocks.push(res.digest);
        }
        Ok(())
    }
    .await;

    if let Err(err) = outcome {
        // unblock the writer; already-written blocks are left for gc
        cancel.cancel();
        return Err(err);
    }

    drop(job_tx);
    let etag_ctx = writer
        .await
        .map_err(|_| S3Error::internal("block writer task failed"))?;
    md.etag = format!("{:x}", etag_ctx.compute());
    md.dd_blocks = dd_blocks;
    debug!(
        bucket = %md.bucket,
        name = %md.name,
        total_blocks = md.blocks.len(),
        dd_blocks,
        "object data written"
    );
    Ok(())
}

/// Fast path for `content_length <= DATA_BLOCK_SIZE`: the whole payload is
/// one block, so its digest doubles as the whole-payload MD5 and no writer
/// task is needed.
async fn put_small_object<S>(
    store: Arc<dyn BlockStore>,
    body: S,
    content_length: u64,
    md: &mut ObjectMd,
) -> S3Result<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut buf = vec![0u8; content_length as usize];
    let mut chunker = BodyChunker::new(body);
    let n = chunker.fill_block(&mut buf).await?;
    if (n as u64) < content_length {
        return Err(S3Error::invalid_request("data less than ContentLength"));
    }

    if content_length == 0 {
        md.etag = ZERO_DATA_ETAG.to_string();
        return Ok(());
    }

    let digest = format!("{:x}", md5::compute(&buf));
    let existed = store.is_data_block_exist(&digest).await;
    if !existed {
        store.write_data_block(&buf, &digest).await?;
        debug!(%digest, content_length, "created data block");
    } else {
        debug!(%digest, content_length, "data block exists");
    }

    md.dd_blocks = existed as u64;
    md.blocks.push(digest.clone());
    // single block: the block digest is the MD5 of the full payload
    md.etag = digest;
    Ok(())
}

/// Persistent per-request writer. Owns both digesters: the per-block MD5 and
/// the cumulative ETag MD5. Safe because at most one block is in flight, so
/// blocks arrive here in ascending order. The final ETag context is the
/// task's join value.
async fn block_writer(
    store: Arc<dyn BlockStore>,
    mut jobs: mpsc::Receiver<Vec<u8>>,
    results: mpsc::Sender<BlockWriteOutcome>,
    cancel: CancellationToken,
    rw_timeout: Duration,
) -> md5::Context {
    let mut etag = md5::Context::new();
    while let Some(buf) = jobs.recv().await {
        let digest = format!("{:x}", md5::compute(&buf));
        etag.consume(&buf);

        let mut existed = true;
        let mut result = Ok(());
        if !store.is_data_block_exist(&digest).await {
            existed = false;
            result = store.write_data_block(&buf, &digest).await;
            debug!(%digest, len = buf.len(), ok = result.is_ok(), "created data block");
        } else {
            debug!(%digest, len = buf.len(), "data block exists");
        }

        let outcome = BlockWriteOutcome {
            digest,
            existed,
            result,
            buf,
        };
        tokio::select! {
            sent = results.send(outcome) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => {
                debug!("block writer quit");
                break;
            }
            _ = sleep(rw_timeout) => {
                warn!("block writer result hand-off timed out");
                break;
            }
        }
    }
    etag
}

async fn recv_outcome(
    rx: &mut mpsc::Receiver<BlockWriteOutcome>,
    rw_timeout: Duration,
) -> S3Result<BlockWriteOutcome> {
    match timeout(rw_timeout, rx.recv()).await {
        Ok(Some(res)) => Ok(res),
        Ok(None) => Err(S3Error::internal("block writer exited early")),
        Err(_) => Err(S3Error::internal("timed out waiting for block write")),
    }
}

/// Re-assembles a chunked body stream into fixed-size blocks.
struct BodyChunker<S> {
    stream: S,
    pending: Bytes,
}

impl<S> BodyChunker<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
        }
    }

    /// Fill `buf` completely unless the body ends first; returns the number
    /// of bytes written. One empty chunk is tolerated per block, a second
    /// consecutive one means the client hung.
    async fn fill_block(&mut self, buf: &mut [u8]) -> S3Result<usize> {
        let mut filled = 0;
        let mut read_zero = false;
        while filled < buf.len() {
            if !self.pending.is_empty() {
                let take = self.pending.len().min(buf.len() - filled);
                buf[filled..filled + take].copy_from_slice(&self.pending[..take]);
                self.pending.advance(take);
                filled += take;
                continue;
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        if read_zero {
                            return Err(S3Error::internal(
                                "read 0 bytes from http with no error twice",
                            ));
                        }
                        read_zero = true;
                        continue;
                    }
                    self.pending = chunk;
                }
                Some(Err(err)) => {
                    warn!(%err, "failed to read data from http");
                    return Err(S3Error::internal("failed to read data from http"));
                }
                None => break,
            }
        }
        Ok(filled)
    }
}
