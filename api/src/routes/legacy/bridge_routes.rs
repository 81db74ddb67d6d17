//! Legacy bridge operator surface: status snapshot and manual pulls.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

/// GET `/api/orders/legacy-bridge/status`.
#[instrument(name = "legacy_status_route", skip(state))]
pub async fn legacy_status_route(State(state): State<Arc<AppState>>) -> Response {
    let body = match &state.bridge {
        Some(bridge) => json!({
            "config": bridge.config(),
            "status": bridge.status().await,
        }),
        None => json!({"config": {"enabled": false}}),
    };
    ApiReply::data(body).send(StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
pub struct PullOnceRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// POST `/api/orders/legacy-bridge/pull-once`: one manual pull; dry-run
/// returns parse previews without ingesting.
#[instrument(name = "legacy_pull_once_route", skip(state))]
pub async fn legacy_pull_once_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PullOnceRequest>,
) -> Response {
    let Some(bridge) = &state.bridge else {
        return AppError::BadRequest("legacy bridge is not configured".to_string())
            .into_response();
    };

    match bridge.pull_once(body.dry_run).await {
        Ok(summary) => {
            ApiReply::data(summary).send(StatusCode::OK)
        }
        Err(e) => AppError::Http {
            status: StatusCode::BAD_GATEWAY,
            code: "LEGACY_PULL_FAILED",
            message: e.to_string(),
        }
        .into_response(),
    }
}
