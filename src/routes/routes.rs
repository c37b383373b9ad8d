//! Route composition.
//!
//! The S3 surface does not map onto a conventional route table: bucket and
//! object names arrive in either the path or the `Host` header, so all S3
//! traffic funnels through the dispatcher mounted as the router fallback.
//! Only the health probes get explicit routes. Every response, health
//! included, passes the common-header layer (`Server`, `Date`).

use axum::{Router, middleware, routing::get};

use crate::handlers::{
    AppState,
    dispatch::{common_headers, dispatch},
    health_handlers::{healthz, readyz},
};

/// Build the router. The router carries shared state ([`AppState`]) to all
/// handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback(dispatch)
        .layer(middleware::from_fn(common_headers))
}
