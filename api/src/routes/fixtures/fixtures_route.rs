//! GET `/api/orders/ingest-fixtures`: the canned test receipts.

use axum::{http::StatusCode, response::Response};
use serde_json::json;
use tracing::instrument;

use ingest_engine::fixtures::{builtin_fixtures, fixture_allowed_mods, fixture_menu_catalog};

use crate::core::http::response_envelope::ApiReply;

#[instrument(name = "ingest_fixtures_route")]
pub async fn ingest_fixtures_route() -> Response {
    ApiReply::data(json!({
        "fixtures": builtin_fixtures(),
        "menu_catalog": fixture_menu_catalog(),
        "allowed_mods": fixture_allowed_mods(),
    }))
    .send(StatusCode::OK)
}
