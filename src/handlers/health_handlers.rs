//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that exercises the storage engine

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

use crate::handlers::AppState;

/// `GET /healthz`
///
/// Very small liveness probe that always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that writes a fixed probe block through the storage
/// engine and reads it back. The probe payload is constant, so repeated
/// probes dedup onto a single stored block.
///
/// Returns JSON describing the check. HTTP 200 when it passes, HTTP 503
/// when it fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    const PROBE: &[u8] = b"readyz-probe";

    let digest = format!("{:x}", md5::compute(PROBE));
    let store_check = match state.store.write_data_block(PROBE, &digest).await {
        Ok(()) => {
            let mut buf = vec![0u8; PROBE.len()];
            match state.store.read_data_block_range(&digest, 0, &mut buf).await {
                Ok(n) if &buf[..n] == PROBE => (true, None::<String>),
                Ok(_) => (false, Some("probe block content mismatch".to_string())),
                Err(err) => (false, Some(format!("could not read probe block: {}", err))),
            }
        }
        Err(err) => (false, Some(format!("could not write probe block: {}", err))),
    };

    let overall_ok = store_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "store",
        CheckStatus {
            ok: store_check.0,
            error: store_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
