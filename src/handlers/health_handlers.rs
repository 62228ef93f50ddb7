//! Health & readiness handlers.
//!
//! - `GET /healthz` — liveness: always 200, no I/O.
//! - `GET /readyz` — readiness: exercises the metadata repository and the
//!   blob store through the same `ObjectService::list` path real requests
//!   use, so a broken DB connection or an unmounted storage volume fails
//!   the probe instead of just liveness.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{services::object_service::ListArgs, state::AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    error: Option<String>,
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let token = CancellationToken::new();
    let check = state
        .object_service
        .list(
            ListArgs {
                limit: Some(1),
                ..Default::default()
            },
            &token,
        )
        .await;

    match check {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ok",
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "error",
                error: Some(err.to_string()),
            }),
        ),
    }
}
