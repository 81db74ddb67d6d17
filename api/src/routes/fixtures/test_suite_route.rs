//! POST `/api/orders/ingest-test-suite`: run the canned receipts through
//! the live pipeline and summarize.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::core::{app_state::AppState, http::response_envelope::ApiReply};
use crate::error_handler::AppError;

#[derive(Debug, Deserialize)]
pub struct TestSuiteRequest {
    #[serde(default = "default_store")]
    pub store_id: String,
    #[serde(default)]
    pub inject_dirty: bool,
    #[serde(default)]
    pub max_cases: Option<usize>,
    #[serde(default)]
    pub scenario: Option<String>,
}

fn default_store() -> String {
    "default".to_string()
}

#[instrument(name = "ingest_test_suite_route", skip(state))]
pub async fn ingest_test_suite_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TestSuiteRequest>,
) -> Response {
    let summary = state
        .ingest
        .run_test_suite(
            &body.store_id,
            body.inject_dirty,
            body.max_cases,
            body.scenario.as_deref(),
        )
        .await;

    match summary {
        Ok(summary) => {
            info!(store_id = %body.store_id, "test suite served");
            ApiReply::data(summary).send(StatusCode::OK)
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
