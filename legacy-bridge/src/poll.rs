//! Poll loop with per-order fingerprint dedupe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ingest_engine::{IngestError, IngestService};
use order_contracts::API_VERSION;
use order_contracts::envelopes::IngestRequest;

use crate::wire::{LegacyOrder, WireError, parse_legacy_payload};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("legacy endpoint fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Poller configuration; out-of-range values clamp to the allowed window.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub store_id: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_orders_per_pull: usize,
    pub dedupe_window_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            store_id: "default".to_string(),
            poll_interval_ms: 10_000,
            request_timeout_ms: 5_000,
            max_orders_per_pull: 50,
            dedupe_window_ms: 10 * 60 * 1000,
        }
    }
}

impl BridgeConfig {
    /// Reads `POS_LEGACY_*` variables and clamps every knob.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn num(name: &str) -> Option<u64> {
            var(name).and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            enabled: var("POS_LEGACY_ENABLED").is_some_and(|v| {
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            }),
            endpoint: var("POS_LEGACY_ENDPOINT").unwrap_or_default(),
            store_id: var("POS_LEGACY_STORE_ID").unwrap_or(defaults.store_id),
            poll_interval_ms: num("POS_LEGACY_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms)
                .clamp(2_000, 120_000),
            request_timeout_ms: num("POS_LEGACY_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout_ms)
                .clamp(1_000, 60_000),
            max_orders_per_pull: (num("POS_LEGACY_MAX_ORDERS_PER_PULL")
                .unwrap_or(defaults.max_orders_per_pull as u64)
                .clamp(1, 200)) as usize,
            dedupe_window_ms: num("POS_LEGACY_DEDUPE_WINDOW_MS")
                .unwrap_or(defaults.dedupe_window_ms)
                .clamp(60_000, 24 * 60 * 60 * 1000),
        }
    }
}

/// Snapshot exposed on the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStatus {
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_summary: Option<Value>,
}

/// Result of one pull.
#[derive(Debug, Clone, Serialize)]
pub struct PullSummary {
    pub dry_run: bool,
    pub fetched_orders: usize,
    pub ingested: usize,
    pub skipped_duplicates: usize,
    pub errors: usize,
    pub previews: Vec<Value>,
}

/// The bridge itself; construct once, share via `Arc`.
pub struct LegacyBridge {
    cfg: BridgeConfig,
    http: reqwest::Client,
    ingest: Arc<IngestService>,
    /// fingerprint → last seen; pruned to the dedupe window.
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    status: RwLock<BridgeStatus>,
}

impl LegacyBridge {
    pub fn new(cfg: BridgeConfig, ingest: Arc<IngestService>) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            cfg,
            http,
            ingest,
            seen: Mutex::new(HashMap::new()),
            status: RwLock::new(BridgeStatus::default()),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub async fn status(&self) -> BridgeStatus {
        self.status.read().await.clone()
    }

    /// Background loop: one sequential pull per tick.
    pub async fn run(self: Arc<Self>) {
        if !self.cfg.enabled {
            info!("legacy bridge disabled; poll loop not started");
            return;
        }
        info!(
            endpoint = %self.cfg.endpoint,
            interval_ms = self.cfg.poll_interval_ms,
            "legacy bridge poll loop started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.cfg.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.pull_once(false).await {
                warn!(error = %e, "legacy pull failed");
            }
        }
    }

    /// Fetches the endpoint once and feeds the parsed orders to ingest.
    pub async fn pull_once(&self, dry_run: bool) -> Result<PullSummary, BridgeError> {
        self.status.write().await.last_pull_at = Some(Utc::now());

        let outcome = self.fetch_and_ingest(dry_run).await;
        let mut status = self.status.write().await;
        match &outcome {
            Ok(summary) => {
                status.last_success_at = Some(Utc::now());
                status.last_error = None;
                status.last_summary = serde_json::to_value(summary).ok();
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn fetch_and_ingest(&self, dry_run: bool) -> Result<PullSummary, BridgeError> {
        let payload = self
            .http
            .get(&self.cfg.endpoint)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let orders = parse_legacy_payload(&payload)?;
        self.ingest_orders(&orders, dry_run).await
    }

    /// Dedupe + ingest for already parsed orders. Split out so a payload
    /// can also be fed directly (tests, manual replays).
    pub async fn ingest_orders(
        &self,
        orders: &[LegacyOrder],
        dry_run: bool,
    ) -> Result<PullSummary, BridgeError> {
        let now = Utc::now();
        let window = chrono::Duration::milliseconds(self.cfg.dedupe_window_ms as i64);

        let mut summary = PullSummary {
            dry_run,
            fetched_orders: orders.len(),
            ingested: 0,
            skipped_duplicates: 0,
            errors: 0,
            previews: Vec::new(),
        };

        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| now - *at <= window);

        for order in orders.iter().take(self.cfg.max_orders_per_pull) {
            let fingerprint = order.fingerprint();
            if seen.contains_key(&fingerprint) {
                summary.skipped_duplicates += 1;
                debug!(order_no = %order.order_no, "duplicate order skipped");
                continue;
            }

            if dry_run {
                summary.previews.push(json!({
                    "order_no": order.order_no,
                    "display_order_no": order.display_order_no,
                    "table": order.table_label,
                    "source_text": order.source_text,
                    "fingerprint": fingerprint,
                }));
                continue;
            }

            let req = IngestRequest {
                api_version: API_VERSION.to_string(),
                source_text: Some(order.source_text.clone()),
                text: None,
                store_id: Some(self.cfg.store_id.clone()),
                order_id: None,
                audit_trace_id: None,
                metadata: Some(json!({
                    "source": "legacy_pos_pull",
                    "legacy": {
                        "order_no": order.order_no,
                        "display_order_no": order.display_order_no,
                        "table": order.table_label,
                        "serial_nos": order.serial_nos,
                        "selected_raw": order
                            .records
                            .iter()
                            .map(|r| r.selected_raw.clone())
                            .collect::<Vec<_>>(),
                    },
                })),
                menu_catalog: None,
                allowed_mods: None,
                simulate: None,
            };

            match self.ingest.ingest_pos_text(&req).await {
                Ok(_) => {
                    seen.insert(fingerprint, now);
                    summary.ingested += 1;
                }
                Err(e) => {
                    warn!(order_no = %order.order_no, error = %e, "legacy order ingest failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            fetched = summary.fetched_orders,
            ingested = summary.ingested,
            skipped = summary.skipped_duplicates,
            errors = summary.errors,
            dry_run,
            "legacy pull processed"
        );
        Ok(summary)
    }
}
