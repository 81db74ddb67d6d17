//! GET `/api/orders/ingest-engine/status`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::instrument;

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;
use crate::routes::config::pipeline_config_route::StoreQuery;

#[instrument(name = "engine_status_route", skip(state))]
pub async fn engine_status_route(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
) -> Response {
    let mut status = match state.ingest.engine_status(&query.store_id).await {
        Ok(status) => status,
        Err(e) => return AppError::from(e).into_response(),
    };

    if let Some(obj) = status.as_object_mut() {
        let bridge = match &state.bridge {
            Some(bridge) => json!({
                "enabled": bridge.config().enabled,
                "endpoint": bridge.config().endpoint,
                "status": bridge.status().await,
            }),
            None => json!({"enabled": false}),
        };
        obj.insert("legacy_bridge".to_string(), bridge);
    }

    ApiReply::data(status).send(StatusCode::OK)
}
