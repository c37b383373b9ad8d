//! Object-level handlers: the HTTP ends of the write and read pipelines.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::DateTime;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::constants::RW_TIMEOUT;
use crate::errors::{S3Error, S3Result};
use crate::handlers::AppState;
use crate::models::object_md::ObjectMd;
use crate::services::read_pipeline::ObjectDataReader;
use crate::services::write_pipeline::put_object_data;

/// PUT of an object: run the write pipeline over the request body, then
/// persist the metadata record. Bucket checks are deliberately skipped here;
/// the metadata write is what validates the bucket, and blocks written for a
/// rejected request stay unreferenced until gc.
pub async fn put_object(state: AppState, req: Request, bucket: String, object: String) -> Response {
    let content_length = match req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        Some(len) => len,
        None => return S3Error::missing_content_length().into_response(),
    };

    let mut md = ObjectMd::new(bucket.clone(), object.clone(), content_length);
    let body = req
        .into_body()
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    if let Err(err) = put_object_data(
        state.store.clone(),
        body,
        content_length,
        &mut md,
        RW_TIMEOUT,
    )
    .await
    {
        error!(%bucket, %object, %err, "failed to write object data");
        return err.into_response();
    }

    let bytes = match md.encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%bucket, %object, %err, "failed to encode object metadata");
            return err.into_response();
        }
    };
    if let Err(err) = state.store.write_object_md(&bucket, &object, &bytes).await {
        return err.into_response();
    }

    info!(%bucket, %object, etag = %md.etag, "successfully created object");

    let mut resp = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&md.etag) {
        resp.headers_mut().insert(header::ETAG, value);
    }
    resp
}

/// GET of an object: metadata first, then the block-paged reader as the
/// response body.
pub async fn get_object(state: AppState, bucket: &str, object: &str) -> Response {
    let md = match fetch_object_md(&state, bucket, object).await {
        Ok(md) => Arc::new(md),
        Err(err) => return err.into_response(),
    };

    let mut resp = Response::new(Body::empty());
    set_object_headers(resp.headers_mut(), &md);
    if md.size == 0 {
        info!(%bucket, %object, "read 0 size object");
        return resp;
    }

    let reader = match ObjectDataReader::open(state.store.clone(), md, RW_TIMEOUT).await {
        Ok(reader) => reader,
        Err(err) => {
            error!(%bucket, %object, %err, "failed to read first data block");
            return err.into_response();
        }
    };
    *resp.body_mut() = Body::from_stream(ReaderStream::new(reader));
    resp
}

/// HEAD of an object: the GET headers without the body.
pub async fn head_object(state: AppState, bucket: &str, object: &str) -> Response {
    let md = match fetch_object_md(&state, bucket, object).await {
        Ok(md) => md,
        Err(err) => return err.into_response(),
    };

    let mut resp = Response::new(Body::empty());
    set_object_headers(resp.headers_mut(), &md);
    resp
}

async fn fetch_object_md(state: &AppState, bucket: &str, object: &str) -> S3Result<ObjectMd> {
    let bytes = state.store.read_object_md(bucket, object).await?;
    ObjectMd::decode(&bytes)
}

fn set_object_headers(headers: &mut HeaderMap, md: &ObjectMd) {
    if let Ok(value) = HeaderValue::from_str(&md.size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&md.etag) {
        headers.insert(header::ETAG, value);
    }
    if let Some(ts) = DateTime::from_timestamp(md.mtime, 0) {
        let last_modified = ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&last_modified) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}
