//! Shared application state threaded through every handler.

use std::sync::Arc;

use ingest_engine::IngestService;
use legacy_bridge::LegacyBridge;

use crate::core::events::OrderEventHub;

pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub bridge: Option<Arc<LegacyBridge>>,
    pub events: Arc<OrderEventHub>,
}
