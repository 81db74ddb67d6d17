//! POST `/api/orders/review/decision`.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{info, instrument};

use order_contracts::envelopes::DecisionRequest;
use order_contracts::validator;

use crate::core::{
    app_state::AppState,
    http::response_envelope::{ApiReply, validation_failure},
};
use crate::error_handler::AppError;

#[instrument(name = "review_decision_route", skip(state, body))]
pub async fn review_decision_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let errors = validator::validate_decision_request(&body);
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    let req: DecisionRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => return AppError::BadRequest(e.to_string()).into_response(),
    };

    match state.ingest.reviews().apply_decision(&req).await {
        Ok(resp) => {
            state.events.publish(
                "review_decided",
                &resp.order_id,
                json!({
                    "decision": resp.decision.as_str(),
                    "review_queue_status": resp.review_queue_status.as_str(),
                }),
            );
            info!(
                order_id = %resp.order_id,
                decision = resp.decision.as_str(),
                "review decision served"
            );
            ApiReply::data(resp).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
