//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that lists the store and round-trips a probe object

use crate::models::entry::ListOptions;
use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE_BODY: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe that always returns 200 OK.
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
/// Readiness probe that:
/// 1. Pulls the first entry of a listing (provisioning the bucket if needed).
/// 2. Performs a put/get/del of a probe key.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    // 1) Listing check
    let list_check = match service.list(ListOptions::default().with_limit(1)).next().await {
        None | Some(Ok(_)) => (true, None::<String>),
        Some(Err(e)) => (false, Some(format!("error: {}", e))),
    };

    // 2) Write/read/delete check
    let probe = format!(".readyz-{}", Uuid::new_v4());
    let object_check = match service
        .put(&probe, Bytes::from_static(PROBE_BODY), None)
        .await
    {
        Ok(()) => {
            let read = service.get(&probe, None).await;
            let removed = service.del(&probe, None).await;
            match (read, removed) {
                (Ok(data), Ok(())) if data.body.as_ref() == PROBE_BODY => (true, None),
                (Ok(data), Err(e)) if data.body.as_ref() == PROBE_BODY => {
                    (true, Some(format!("could not remove probe object: {}", e)))
                }
                (Ok(_), _) => (false, Some("probe content mismatch".to_string())),
                (Err(e), _) => (false, Some(format!("could not read probe object: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write probe object: {}", e))),
    };

    let overall_ok = list_check.0 && object_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "list",
        CheckStatus {
            ok: list_check.0,
            error: list_check.1,
        },
    );
    checks.insert(
        "object",
        CheckStatus {
            ok: object_check.0,
            error: object_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        backend: service.backend(),
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
    backend: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
