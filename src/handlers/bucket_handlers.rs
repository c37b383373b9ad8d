//! Bucket-level handlers. These surface the store's status unchanged; the
//! engines own bucket semantics (409 on duplicate create, 409 on non-empty
//! delete, 404 on anything missing).

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::handlers::AppState;

pub async fn put_bucket(state: AppState, bucket: &str) -> Response {
    match state.store.put_bucket(bucket).await {
        Ok(()) => {
            info!(%bucket, "put bucket");
            Response::new(Body::empty())
        }
        Err(err) => err.into_response(),
    }
}

pub async fn get_bucket(state: AppState, bucket: &str) -> Response {
    match state.store.get_bucket(bucket).await {
        Ok(xml) => {
            let mut resp = Response::new(Body::from(xml));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/xml"),
            );
            resp
        }
        Err(err) => err.into_response(),
    }
}

pub async fn head_bucket(state: AppState, bucket: &str) -> Response {
    match state.store.head_bucket(bucket).await {
        Ok(()) => Response::new(Body::empty()),
        Err(err) => err.into_response(),
    }
}

pub async fn delete_bucket(state: AppState, bucket: &str) -> Response {
    match state.store.delete_bucket(bucket).await {
        Ok(()) => {
            info!(%bucket, "del bucket");
            Response::new(Body::empty())
        }
        Err(err) => err.into_response(),
    }
}
