use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// A `(status, message)` pair that maps 1:1 onto the HTTP response.
///
/// Every fallible operation in the core returns one of these instead of
/// unwinding; pipeline tasks ship them over channels.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct S3Error {
    pub status: StatusCode,
    pub message: String,
}

impl S3Error {
    /// Create a new S3Error with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// 400 InvalidRequest
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 500 InternalError
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// 501 NotImplemented
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, msg)
    }

    /// 404 NoSuchBucket
    pub fn no_such_bucket(bucket: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("NoSuchBucket: {}", bucket))
    }

    /// 404 NoSuchKey
    pub fn no_such_key(bucket: &str, name: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("NoSuchKey: {}{}", bucket, name),
        )
    }

    /// 409 BucketAlreadyExists
    pub fn bucket_already_exists(bucket: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            format!("BucketAlreadyExists: {}", bucket),
        )
    }

    /// 409 BucketNotEmpty
    pub fn bucket_not_empty(bucket: &str) -> Self {
        Self::new(StatusCode::CONFLICT, format!("BucketNotEmpty: {}", bucket))
    }

    /// 411 MissingContentLength
    pub fn missing_content_length() -> Self {
        Self::new(StatusCode::LENGTH_REQUIRED, "missing Content-Length")
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<S3Error> for std::io::Error {
    fn from(err: S3Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err)
    }
}

pub type S3Result<T> = Result<T, S3Error>;
