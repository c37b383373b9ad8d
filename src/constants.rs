//! System-wide constants: chunking granularity, I/O deadlines, and the
//! handful of fixed S3 strings the dispatcher and engines rely on.

use std::time::Duration;

/// Fixed chunking granularity for object payloads. Every block except
/// possibly the last one of an object holds exactly this many bytes, and
/// all pipeline buffers are sized to it.
pub const DATA_BLOCK_SIZE: usize = 131_072;

/// Deadline for every single cross-task send/receive and block I/O wait.
pub const RW_TIMEOUT: Duration = Duration::from_secs(30);

/// MD5 of the empty byte string; the ETag of every zero-size object.
pub const ZERO_DATA_ETAG: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = "CloudZzzz";

/// Object-name form of a ListObjectsV2 bucket request.
pub const BUCKET_LIST_OP: &str = "/?list-type=2";

/// Cap on keys returned by a single bucket listing.
pub const BUCKET_LIST_MAX_KEYS: usize = 1000;

/// XML namespace for S3 response documents.
pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
