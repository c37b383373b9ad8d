//! HTTP layer: the S3 request dispatcher and the operation handlers.

use std::sync::Arc;

use crate::store::BlockStore;

pub mod bucket_handlers;
pub mod dispatch;
pub mod health_handlers;
pub mod object_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlockStore>,
}
