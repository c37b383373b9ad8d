//! S3-compatible object storage with content-addressed block deduplication.
//!
//! Objects are split into fixed-size blocks keyed by their MD5 digest;
//! identical blocks are stored exactly once regardless of how many objects
//! reference them. The crate provides the streaming write pipeline, the
//! block-paged read pipeline with look-ahead prefetch, the S3 request
//! dispatcher, and two storage engines (`fileio`, `memio`).

pub mod config;
pub mod constants;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
