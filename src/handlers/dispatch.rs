//! The S3 request dispatcher.
//!
//! Resolves `(bucket, object)` from the two S3 URL styles, decides whether
//! the request targets the bucket itself or an object inside it, and routes
//! by HTTP verb. Handlers overwrite the default `400 "not support request"`
//! response on success.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, error, warn};

use crate::constants::{BUCKET_LIST_OP, SERVER_NAME};
use crate::errors::S3Error;
use crate::handlers::{AppState, bucket_handlers, object_handlers};

/// Route one S3 request. Mounted as the router fallback so every path shape
/// reaches it.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let (bucket, object) = bucket_and_object(&host, &path_query);
    debug!(method = %req.method(), %host, %path_query, %bucket, %object, "dispatch");

    if bucket.is_empty() {
        error!(%host, %path_query, "InvalidRequest, no bucketname");
        return S3Error::invalid_request("InvalidRequest, no bucketname").into_response();
    }

    match req.method().as_str() {
        "PUT" => put_op(state, req, bucket, object).await,
        "GET" => get_op(state, bucket, object).await,
        "HEAD" => head_op(state, bucket, object).await,
        "DELETE" => del_op(state, bucket, object).await,
        "POST" | "OPTIONS" => not_support(),
        method => {
            error!(method, %path_query, "unsupported request");
            not_support()
        }
    }
}

async fn put_op(state: AppState, req: Request, bucket: String, object: String) -> Response {
    if is_bucket_op(&object) {
        if object.is_empty() || object == "/" {
            bucket_handlers::put_bucket(state, &bucket).await
        } else {
            warn!(%bucket, %object, "not support put bucket operation");
            not_support()
        }
    } else {
        object_handlers::put_object(state, req, bucket, object).await
    }
}

async fn get_op(state: AppState, bucket: String, object: String) -> Response {
    if is_bucket_op(&object) {
        if object.is_empty() || object == "/" || object == BUCKET_LIST_OP {
            bucket_handlers::get_bucket(state, &bucket).await
        } else {
            warn!(%bucket, %object, "bucket subresource not implemented");
            S3Error::not_implemented("bucket subresource not implemented").into_response()
        }
    } else {
        object_handlers::get_object(state, &bucket, &object).await
    }
}

async fn head_op(state: AppState, bucket: String, object: String) -> Response {
    if is_bucket_op(&object) {
        if object.is_empty() || object == "/" {
            bucket_handlers::head_bucket(state, &bucket).await
        } else {
            warn!(%bucket, %object, "invalid head bucket operation");
            S3Error::invalid_request("invalid head bucket operation").into_response()
        }
    } else {
        object_handlers::head_object(state, &bucket, &object).await
    }
}

async fn del_op(state: AppState, bucket: String, object: String) -> Response {
    if is_bucket_op(&object) {
        if object.is_empty() || object == "/" {
            bucket_handlers::delete_bucket(state, &bucket).await
        } else {
            warn!(%bucket, %object, "not support delete bucket operation");
            not_support()
        }
    } else {
        // the store interface has no DeleteObject
        S3Error::not_implemented("object delete not implemented").into_response()
    }
}

fn not_support() -> Response {
    S3Error::invalid_request("not support request").into_response()
}

/// Extract the bucket from a virtual-hosted-style `Host`
/// (`<bucket>.s3<...>.<domain>.<tld>`); empty for path-style hosts.
fn bucket_from_host(host: &str) -> &str {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() == 4 && labels[1].starts_with("s3") {
        labels[0]
    } else {
        ""
    }
}

/// Resolve `(bucket, object)` from the request. For path-style URLs the
/// path-and-query splits at most three ways on `/`:
/// `/b/k…` → (`b`, `/k…`), `/b/` and `/b` → (`b`, `/`), `/` → no bucket.
fn bucket_and_object(host: &str, path_query: &str) -> (String, String) {
    let bucket = bucket_from_host(host);
    if !bucket.is_empty() {
        // bucket came from the Host; the whole URL is the object name
        return (bucket.to_string(), path_query.to_string());
    }

    let parts: Vec<&str> = path_query.splitn(3, '/').collect();
    match parts.as_slice() {
        [_, bucket, rest] => (bucket.to_string(), format!("/{}", rest)),
        [_, bucket] => (bucket.to_string(), "/".to_string()),
        _ => (String::new(), String::new()),
    }
}

/// A request targets the bucket itself when the object name is empty, `/`,
/// or a bare sub-resource query.
fn is_bucket_op(object: &str) -> bool {
    object.is_empty() || object == "/" || object.starts_with("/?") || object.starts_with('?')
}

/// Layer applied to every route: the fixed `Server` header and the RFC 1123
/// `Date` header.
pub async fn common_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    if let Ok(date) = HeaderValue::from_str(&rfc1123_now()) {
        headers.insert(header::DATE, date);
    }
    resp
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
