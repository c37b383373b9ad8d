//! Lazy block-paged object reader with single-block look-ahead.
//!
//! Three actors touch a reader over its lifetime: a prefetcher task fetching
//! block N+1, the consumer draining block N through [`AsyncRead`], and
//! whoever drops the reader (possibly mid-stream, when the client hangs up).
//! They coordinate through a capacity-one result channel and a shared
//! cancellation token; every cross-task wait is bounded by the pipeline
//! timeout.

use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::errors::{S3Error, S3Result};
use crate::models::object_md::ObjectMd;
use crate::store::BlockStore;

/// One fetched block, as delivered by the prefetcher. The buffer travels
/// with the result so the consumer can recycle it for the next prefetch.
struct BlockRead {
    blk_idx: usize,
    buf: Vec<u8>,
    n: usize,
    result: S3Result<()>,
}

/// Streams an object back block by block.
///
/// Reads never cross a block boundary: a `read` that reaches the end of the
/// resident block returns a partial fill, and the caller's next `read`
/// continues in the following block. Dropping the reader cancels any
/// outstanding prefetch; cancellation is idempotent.
pub struct ObjectDataReader {
    store: Arc<dyn BlockStore>,
    md: Arc<ObjectMd>,
    /// Bytes already delivered to the consumer.
    off: u64,
    /// The currently-resident block.
    curr: BlockRead,
    /// Whether a prefetch is outstanding.
    wait: bool,
    tx: Option<mpsc::Sender<BlockRead>>,
    rx: Option<mpsc::Receiver<BlockRead>>,
    cancel: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
    deadline: Option<Pin<Box<Sleep>>>,
    rw_timeout: Duration,
}

impl std::fmt::Debug for ObjectDataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDataReader").finish()
    }
}

impl ObjectDataReader {
    /// Synchronously fetch block 0 and, for multi-block objects, start the
    /// prefetch of block 1. Callers handle `size == 0` themselves; a reader
    /// always has at least one block.
    pub async fn open(
        store: Arc<dyn BlockStore>,
        md: Arc<ObjectMd>,
        rw_timeout: Duration,
    ) -> S3Result<Self> {
        let block_size = md.block_size as usize;
        let first = read_block(store.as_ref(), &md, 0, vec![0u8; block_size]).await;
        first.result.clone()?;

        let cancel = CancellationToken::new();
        let mut reader = Self {
            store,
            md,
            off: 0,
            curr: first,
            wait: false,
            tx: None,
            rx: None,
            closed: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            deadline: None,
            rw_timeout,
        };

        if reader.md.size > reader.md.block_size as u64 {
            let (tx, rx) = mpsc::channel(1);
            reader.wait = true;
            spawn_prefetch(
                reader.store.clone(),
                reader.md.clone(),
                1,
                vec![0u8; block_size],
                tx.clone(),
                reader.cancel.clone(),
                rw_timeout,
            );
            reader.tx = Some(tx);
            reader.rx = Some(rx);
        }
        Ok(reader)
    }

    /// Idempotent; wakes the prefetcher and any in-progress read.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait for the outstanding prefetch, install its block as resident, and
    /// start the next prefetch if more payload remains.
    fn poll_next_block(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let rx = match self.rx.as_mut() {
            Some(rx) => rx,
            None => {
                return Poll::Ready(Err(S3Error::internal("no prefetch channel").into()));
            }
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(next)) => {
                self.deadline = None;
                self.wait = false;
                let old = mem::replace(&mut self.curr, next);
                if self.curr.result.is_ok() && self.off + (self.curr.n as u64) < self.md.size {
                    if let Some(tx) = self.tx.as_ref() {
                        self.wait = true;
                        spawn_prefetch(
                            self.store.clone(),
                            self.md.clone(),
                            self.curr.blk_idx + 1,
                            old.buf,
                            tx.clone(),
                            self.cancel.clone(),
                            self.rw_timeout,
                        );
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => {
                Poll::Ready(Err(S3Error::internal("prefetch channel closed").into()))
            }
            Poll::Pending => {
                if self.closed.as_mut().poll(cx).is_ready() {
                    warn!(off = self.off, "stop read, reader closed");
                    return Poll::Ready(Err(
                        S3Error::internal("connection closed prematurely").into()
                    ));
                }
                let rw_timeout = self.rw_timeout;
                let deadline = self
                    .deadline
                    .get_or_insert_with(|| Box::pin(sleep(rw_timeout)));
                if deadline.as_mut().poll(cx).is_ready() {
                    self.deadline = None;
                    warn!(off = self.off, "stop read, timeout");
                    return Poll::Ready(Err(S3Error::internal("internal read timeout").into()));
                }
                Poll::Pending
            }
        }
    }
}

impl AsyncRead for ObjectDataReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.off >= this.md.size {
                return Poll::Ready(Ok(()));
            }

            let bs = this.md.block_size as u64;
            let idx = (this.off / bs) as usize;
            let blk_off = (this.off % bs) as usize;

            if idx < this.curr.blk_idx {
                // reads only move forward
                return Poll::Ready(Err(
                    S3Error::invalid_request("read previous data again").into()
                ));
            }

            if idx > this.curr.blk_idx {
                if !this.wait {
                    return Poll::Ready(Err(S3Error::internal("no prefetch in flight").into()));
                }
                match this.poll_next_block(cx) {
                    Poll::Ready(Ok(())) => continue,
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            if let Err(err) = &this.curr.result {
                return Poll::Ready(Err(err.clone().into()));
            }

            // serve only from the resident block; a partial fill tells the
            // caller to read again for the next block
            let end = this.curr.n.min(blk_off + out.remaining());
            out.put_slice(&this.curr.buf[blk_off..end]);
            this.off += (end - blk_off) as u64;
            return Poll::Ready(Ok(()));
        }
    }
}

impl Drop for ObjectDataReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fetch one block into `buf`. A successful fetch returns exactly
/// `block_size` bytes unless it is the object's final block.
async fn read_block(
    store: &dyn BlockStore,
    md: &ObjectMd,
    blk: usize,
    mut buf: Vec<u8>,
) -> BlockRead {
    if blk >= md.blocks.len() {
        return BlockRead {
            blk_idx: blk,
            buf,
            n: 0,
            result: Err(S3Error::internal("no more block to read")),
        };
    }

    match store.read_data_block_range(&md.blocks[blk], 0, &mut buf).await {
        Ok(n) => {
            let mut result = Ok(());
            if n != md.block_size as usize && blk != md.blocks.len() - 1 {
                result = Err(S3Error::internal("read less data for a full block"));
            }
            debug!(blk, n, "read block done");
            BlockRead {
                blk_idx: blk,
                buf,
                n,
                result,
            }
        }
        Err(err) => BlockRead {
            blk_idx: blk,
            buf,
            n: 0,
            result: Err(err),
        },
    }
}

/// Fetch `blk` in the background and hand the result to the consumer,
/// racing cancellation and the hand-off deadline. Losing either race means
/// exiting silently; the consumer is gone or has given up.
fn spawn_prefetch(
    store: Arc<dyn BlockStore>,
    md: Arc<ObjectMd>,
    blk: usize,
    buf: Vec<u8>,
    tx: mpsc::Sender<BlockRead>,
    cancel: CancellationToken,
    rw_timeout: Duration,
) {
    tokio::spawn(async move {
        let res = read_block(store.as_ref(), &md, blk, buf).await;
        tokio::select! {
            sent = tx.send(res) => {
                if sent.is_err() {
                    debug!(blk, "reader gone before prefetched block was delivered");
                }
            }
            _ = cancel.cancelled() => {
                debug!(blk, "stop prefetch, reader closed");
            }
            _ = sleep(rw_timeout) => {
                warn!(blk, "stop prefetch, hand-off timeout");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DATA_BLOCK_SIZE;
    use crate::services::write_pipeline::put_object_data;
    use crate::store::MemStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    async fn stored_object(store: &Arc<MemStore>, data: &[u8]) -> Arc<ObjectMd> {
        let mut md = ObjectMd::new("b1", "/k1", data.len() as u64);
        let chunks: Vec<_> = data.chunks(8192).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        put_object_data(
            store.clone() as Arc<dyn BlockStore>,
            stream::iter(chunks),
            data.len() as u64,
            &mut md,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        Arc::new(md)
    }

    #[tokio::test]
    async fn round_trip_three_blocks() {
        let store = Arc::new(MemStore::new());
        let data = patterned(300_000);
        let md = stored_object(&store, &data).await;

        let mut reader = ObjectDataReader::open(
            store.clone() as Arc<dyn BlockStore>,
            md,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(store.block_reads(), 3);
    }

    #[tokio::test]
    async fn round_trip_block_size_plus_one() {
        let store = Arc::new(MemStore::new());
        let data = patterned(DATA_BLOCK_SIZE + 1);
        let md = stored_object(&store, &data).await;

        let mut reader = ObjectDataReader::open(
            store.clone() as Arc<dyn BlockStore>,
            md,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), DATA_BLOCK_SIZE + 1);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn a_read_never_crosses_a_block_boundary() {
        let store = Arc::new(MemStore::new());
        let data = patterned(DATA_BLOCK_SIZE + 1000);
        let md = stored_object(&store, &data).await;

        let mut reader = ObjectDataReader::open(
            store.clone() as Arc<dyn BlockStore>,
            md,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; DATA_BLOCK_SIZE * 2];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, DATA_BLOCK_SIZE);
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 1000);
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    /// Scriptable backend for the failure paths: per-digest hangs, delays,
    /// and errors.
    #[derive(Default)]
    struct ScriptedStore {
        blocks: HashMap<String, Vec<u8>>,
        hang_on: Option<String>,
        fail_on: Option<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl BlockStore for ScriptedStore {
        async fn put_bucket(&self, _: &str) -> S3Result<()> {
            unreachable!()
        }
        async fn head_bucket(&self, _: &str) -> S3Result<()> {
            unreachable!()
        }
        async fn delete_bucket(&self, _: &str) -> S3Result<()> {
            unreachable!()
        }
        async fn get_bucket(&self, _: &str) -> S3Result<String> {
            unreachable!()
        }
        async fn is_data_block_exist(&self, _: &str) -> bool {
            unreachable!()
        }
        async fn write_data_block(&self, _: &[u8], _: &str) -> S3Result<()> {
            unreachable!()
        }
        async fn read_data_block_range(
            &self,
            digest: &str,
            _offset: u64,
            buf: &mut [u8],
        ) -> S3Result<usize> {
            if self.hang_on.as_deref() == Some(digest) {
                futures::future::pending::<()>().await;
            }
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            if self.fail_on.as_deref() == Some(digest) {
                return Err(S3Error::internal("disk read failed"));
            }
            let block = &self.blocks[digest];
            let n = block.len().min(buf.len());
            buf[..n].copy_from_slice(&block[..n]);
            Ok(n)
        }
        async fn write_object_md(&self, _: &str, _: &str, _: &[u8]) -> S3Result<()> {
            unreachable!()
        }
        async fn read_object_md(&self, _: &str, _: &str) -> S3Result<Vec<u8>> {
            unreachable!()
        }
    }

    /// Ten-byte object in three four-byte blocks (4 + 4 + 2).
    fn tiny_md() -> ObjectMd {
        let mut md = ObjectMd::new("b1", "/k1", 10);
        md.block_size = 4;
        md.blocks = vec!["d0".into(), "d1".into(), "d2".into()];
        md.etag = "0".repeat(32);
        md
    }

    fn tiny_blocks() -> HashMap<String, Vec<u8>> {
        HashMap::from([
            ("d0".to_string(), b"aaaa".to_vec()),
            ("d1".to_string(), b"bbbb".to_vec()),
            ("d2".to_string(), b"cc".to_vec()),
        ])
    }

    #[tokio::test]
    async fn hung_prefetch_is_a_read_timeout() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            hang_on: Some("d1".into()),
            ..Default::default()
        });
        let mut reader = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            Arc::new(tiny_md()),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("internal read timeout"), "{err}");
    }

    #[tokio::test]
    async fn close_mid_stream_cancels_the_consumer() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            hang_on: Some("d1".into()),
            ..Default::default()
        });
        let mut reader = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            Arc::new(tiny_md()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
        reader.close();
        reader.close(); // idempotent
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(
            err.to_string().contains("connection closed prematurely"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn dropping_the_reader_releases_the_prefetcher() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let md = Arc::new(tiny_md());
        let reader = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            md.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        // prefetcher for block 1 is still inside its delayed read
        drop(reader);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(Arc::strong_count(&md), 1);
    }

    #[tokio::test]
    async fn backend_error_on_later_block_propagates() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            fail_on: Some("d1".into()),
            ..Default::default()
        });
        let mut reader = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            Arc::new(tiny_md()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("disk read failed"), "{err}");
    }

    #[tokio::test]
    async fn failing_first_block_fails_open() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            fail_on: Some("d0".into()),
            ..Default::default()
        });
        let err = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            Arc::new(tiny_md()),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.message.contains("disk read failed"));
    }

    #[tokio::test]
    async fn short_read_of_a_full_block_is_internal() {
        let mut blocks = tiny_blocks();
        blocks.insert("d1".to_string(), b"bb".to_vec()); // 2 bytes, not the last block
        let store = Arc::new(ScriptedStore {
            blocks,
            ..Default::default()
        });
        let mut reader = ObjectDataReader::open(
            store as Arc<dyn BlockStore>,
            Arc::new(tiny_md()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(
            err.to_string().contains("read less data for a full block"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn forward_jump_without_prefetch_is_internal() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            ..Default::default()
        });
        let md = Arc::new(tiny_md());
        let cancel = CancellationToken::new();
        let mut reader = ObjectDataReader {
            store: store as Arc<dyn BlockStore>,
            md,
            off: 4, // inside block 1, but block 0 is resident and nothing in flight
            curr: BlockRead {
                blk_idx: 0,
                buf: b"aaaa".to_vec(),
                n: 4,
                result: Ok(()),
            },
            wait: false,
            tx: None,
            rx: None,
            closed: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            deadline: None,
            rw_timeout: Duration::from_secs(5),
        };

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("no prefetch in flight"), "{err}");
    }

    #[tokio::test]
    async fn backward_offset_is_a_logic_error() {
        let store = Arc::new(ScriptedStore {
            blocks: tiny_blocks(),
            ..Default::default()
        });
        let md = Arc::new(tiny_md());
        let cancel = CancellationToken::new();
        let mut reader = ObjectDataReader {
            store: store as Arc<dyn BlockStore>,
            md,
            off: 0,
            curr: BlockRead {
                blk_idx: 1,
                buf: b"bbbb".to_vec(),
                n: 4,
                result: Ok(()),
            },
            wait: false,
            tx: None,
            rx: None,
            closed: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            deadline: None,
            rw_timeout: Duration::from_secs(5),
        };

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("read previous data again"), "{err}");
    }
}
