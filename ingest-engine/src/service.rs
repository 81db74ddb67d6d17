//! Ingest orchestration.
//!
//! Drives one `ingest_pos_text` request end to end. Pipeline failures
//! downgrade to the rule fallback with a recorded reason; only review /
//! audit persistence failures and contract violations fail the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use audit_log::{AuditEvent, AuditEventKind, AuditLog};
use llm_adapter::{FallbackReason, LlmItem, NormalizerClient, StructuredOutput};
use order_contracts::dispatch::{self, DispatchRoute};
use order_contracts::envelopes::{IngestRequest, IngestResponse};
use order_contracts::types::{LineCandidates, OrderPayload, ReviewQueueStatus};
use order_contracts::{API_VERSION, ENTITY_VERSION, validator};
use pipeline_cache::{Namespace, PipelineCache};
use review_store::ReviewStore;
use services::ids::{new_order_id, new_trace_id};
use store_config::model::{LlmConfig, MenuItem, parse_allowed_mods, parse_menu_catalog};
use store_config::ConfigStore;

use crate::candidates;
use crate::errors::{IngestError, IngestResult};
use crate::fallback::AUTO_PICK_THRESHOLD;
use crate::fixtures::{
    DIRTY_SUFFIX, builtin_fixtures, fixture_allowed_mods, fixture_menu_catalog,
};
use crate::merge::{self, MergeContext};
use crate::parser::{self, ParsedReceipt};

/// Store used when a request names none.
pub const DEFAULT_STORE_ID: &str = "default";

/// Floor of the total LLM-stage budget, milliseconds.
const MIN_STAGE_BUDGET_MS: u64 = 25_000;

/// Process-level knobs read once at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineEnv {
    /// `POS_LLM_ENABLED` kill switch (None when unset).
    pub llm_enabled: Option<bool>,
    /// `POS_PIPELINE_TIMEOUT_MS` override for the stage budget.
    pub pipeline_timeout_ms: Option<u64>,
}

impl EngineEnv {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            llm_enabled: var("POS_LLM_ENABLED").map(|v| {
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            }),
            pipeline_timeout_ms: var("POS_PIPELINE_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// Config actually used for one request (store files or inline override).
struct ResolvedConfig {
    store_id: String,
    menu: Vec<MenuItem>,
    allowed_mods: Vec<String>,
    llm: LlmConfig,
    menu_catalog_version: String,
    allowed_mods_version: String,
    config_error: Option<String>,
}

/// Outcome of the bounded LLM stage.
#[derive(Default)]
struct LlmStage {
    output: Option<StructuredOutput>,
    fallback_reason: Option<FallbackReason>,
    attempts: u32,
    request: Option<Value>,
    response: Option<Value>,
    cache_replay: bool,
}

/// The ingest orchestrator; construct once at startup and share.
pub struct IngestService {
    configs: Arc<ConfigStore>,
    cache: Arc<PipelineCache>,
    audit: Arc<AuditLog>,
    reviews: Arc<ReviewStore>,
    env: EngineEnv,
    /// Per-order serialization of audit/review writes.
    order_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestService {
    pub fn new(
        configs: Arc<ConfigStore>,
        cache: Arc<PipelineCache>,
        audit: Arc<AuditLog>,
        reviews: Arc<ReviewStore>,
        env: EngineEnv,
    ) -> Self {
        Self {
            configs,
            cache,
            audit,
            reviews,
            env,
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn configs(&self) -> &Arc<ConfigStore> {
        &self.configs
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn reviews(&self) -> &Arc<ReviewStore> {
        &self.reviews
    }

    async fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs the full ingest pipeline for one request.
    pub async fn ingest_pos_text(&self, req: &IngestRequest) -> IngestResult<IngestResponse> {
        let store_id = req
            .resolved_store_id()
            .unwrap_or(DEFAULT_STORE_ID)
            .to_string();
        let order_id = req
            .order_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_order_id);
        let trace_id = req
            .audit_trace_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_trace_id);
        let source_text = req.receipt_text().unwrap_or_default().to_string();

        let lock = self.lock_for(&order_id).await;
        let _guard = lock.lock().await;

        info!(%store_id, %order_id, %trace_id, "ingest started");

        // 1) Config (store files or inline override).
        let cfg = self.resolve_config(req, &store_id).await;

        // 2) Parse + candidates.
        let parsed = parser::parse_receipt(&source_text);
        let cands = candidates::generate(&parsed.lines, &cfg.menu);

        // 3) LLM stage (bounded; every failure becomes a reason).
        let stage = self.run_llm_stage(req, &parsed, &cands, &cfg, &order_id).await;

        // 4) Merge.
        let reason_token = stage.fallback_reason.map(|r| r.as_str());
        let merge_ctx = MergeContext {
            order_id: &order_id,
            source_text: &source_text,
            menu: &cfg.menu,
            allowed_mods: &cfg.allowed_mods,
            fallback_reason: reason_token,
        };
        let mut order = merge::merge(&parsed, &cands, stage.output.as_ref(), &merge_ctx);

        // 5) Engine + fallback tags on the order itself.
        if let Some(meta) = order.metadata.as_object_mut() {
            let engine = if stage.output.is_some() {
                "llm_pipeline"
            } else {
                "rule_fallback"
            };
            meta.insert("ingest_engine".into(), json!(engine));
            if let Some(reason) = reason_token {
                meta.insert("fallback_reason".into(), json!(reason));
            }
            if stage.cache_replay {
                meta.insert("llm_cache_replay".into(), json!(true));
            }
        }

        // 6) Classify.
        let decision = dispatch::classify(&order);
        let status = match decision.route {
            DispatchRoute::AutoDispatch => ReviewQueueStatus::DispatchReady,
            DispatchRoute::ReviewQueue => ReviewQueueStatus::PendingReview,
        };

        // 7) Payload + contract check.
        let llm_attempted = stage.attempts > 0;
        let llm_used = llm_attempted && stage.fallback_reason.is_none();
        let mut payload_meta = match &req.metadata {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        payload_meta.insert("store_id".into(), json!(cfg.store_id));
        payload_meta.insert("menu_catalog_version".into(), json!(cfg.menu_catalog_version));
        payload_meta.insert("allowed_mods_version".into(), json!(cfg.allowed_mods_version));
        payload_meta.insert("llm_attempted".into(), json!(llm_attempted));
        payload_meta.insert("llm_used".into(), json!(llm_used));
        payload_meta.insert(
            "structured_result_metadata".into(),
            json!({
                "attempts": stage.attempts,
                "fallback_reason": reason_token,
                "cache_replay": stage.cache_replay,
            }),
        );
        if let Some(err) = &cfg.config_error {
            payload_meta.insert("config_error".into(), json!(err));
        }

        let payload = OrderPayload {
            review_summary: order.review_summary(),
            order,
            review_queue_status: status,
            audit_trace_id: trace_id.clone(),
            metadata: Value::Object(payload_meta),
            version: ENTITY_VERSION,
        };

        let violations = validator::validate_order_payload(&payload);
        if !violations.is_empty() {
            warn!(?violations, %order_id, "built payload violates contract");
            return Err(IngestError::Contract(violations));
        }

        // 8) Persist + audit (failures here fail the request).
        let record = self.reviews.upsert(payload.clone()).await?;

        let mut pipeline_event = AuditEvent::new(&order_id, AuditEventKind::IngestPipeline);
        pipeline_event.raw_text = Some(source_text.clone());
        pipeline_event.parse_result = serde_json::to_value(&parsed.lines).ok();
        pipeline_event.candidates = serde_json::to_value(&cands).ok();
        pipeline_event.llm_request = stage.request.clone();
        pipeline_event.llm_response = stage.response.clone();
        pipeline_event.fallback_reason = reason_token.map(str::to_string);
        pipeline_event.merge_result = serde_json::to_value(&payload.order.audit_events).ok();
        pipeline_event.final_output = serde_json::to_value(&payload.order).ok();
        pipeline_event.needs_review = payload.order.overall_needs_review;
        pipeline_event.metadata = json!({
            "audit_trace_id": trace_id,
            "store_id": cfg.store_id,
            "ingest_engine": payload.order.metadata.get("ingest_engine"),
        });
        self.audit.append(&pipeline_event).await?;

        let mut dispatch_event = AuditEvent::new(&order_id, AuditEventKind::DispatchDecision);
        dispatch_event.metadata = json!({
            "audit_trace_id": trace_id,
            "route": decision.route.as_str(),
            "reasons": decision.reasons,
            "source": decision.source,
            "review_queue_status": status.as_str(),
        });
        dispatch_event.needs_review = decision.route == DispatchRoute::ReviewQueue;
        self.audit.append(&dispatch_event).await?;

        // 9) Cache writes are best-effort.
        self.write_caches(&record.order_payload, &cfg, &parsed, &order_id).await;

        info!(
            %order_id,
            status = status.as_str(),
            needs_review = record.order_payload.order.overall_needs_review,
            "ingest completed"
        );

        Ok(IngestResponse {
            accepted: true,
            version: ENTITY_VERSION,
            api_version: API_VERSION.to_string(),
            order_payload: record.order_payload,
            status,
            trace_id,
        })
    }

    async fn resolve_config(&self, req: &IngestRequest, store_id: &str) -> ResolvedConfig {
        let mut config_error: Option<String> = None;

        let (mut menu, mut mods, llm, mut menu_version, mut mods_version, resolved_id) =
            match self.configs.get_config(store_id).await {
                Ok(cfg) => (
                    cfg.menu_catalog.clone(),
                    cfg.allowed_mods.clone(),
                    cfg.llm.clone(),
                    cfg.menu_catalog_version.clone(),
                    cfg.allowed_mods_version.clone(),
                    cfg.store_id.clone(),
                ),
                Err(e) => {
                    warn!(store_id, error = %e, "store config unavailable, using defaults");
                    config_error = Some(e.to_string());
                    (
                        Vec::new(),
                        Vec::new(),
                        self.configs.env_defaults().seed_config(),
                        "unavailable".to_string(),
                        "unavailable".to_string(),
                        store_id.to_string(),
                    )
                }
            };

        // Inline overrides apply to this request only.
        if let Some(raw) = &req.menu_catalog {
            match parse_menu_catalog(raw) {
                Ok(inline) => {
                    menu_version = content_version_of(&inline);
                    menu = inline;
                }
                Err(e) => {
                    config_error = Some(format!("menu_catalog: {e}"));
                }
            }
        }
        if let Some(raw) = &req.allowed_mods {
            match parse_allowed_mods(raw) {
                Ok(inline) => {
                    mods_version = content_version_of(&inline);
                    mods = inline;
                }
                Err(e) => {
                    config_error = Some(format!("allowed_mods: {e}"));
                }
            }
        }

        ResolvedConfig {
            store_id: resolved_id,
            menu,
            allowed_mods: mods,
            llm,
            menu_catalog_version: menu_version,
            allowed_mods_version: mods_version,
            config_error,
        }
    }

    async fn run_llm_stage(
        &self,
        req: &IngestRequest,
        parsed: &ParsedReceipt,
        cands: &[LineCandidates],
        cfg: &ResolvedConfig,
        order_id: &str,
    ) -> LlmStage {
        let mut stage = LlmStage::default();
        if parsed.lines.is_empty() {
            return stage;
        }

        if req.simulate.as_ref().is_some_and(|s| s.llm_timeout) {
            stage.fallback_reason = Some(FallbackReason::LlmTimeout);
            return stage;
        }

        // Cache replay: all mappings and note mods already decided for
        // these exact config versions.
        if let Some(output) = self.try_cache_replay(parsed, cfg, order_id).await {
            stage.output = Some(output);
            stage.cache_replay = true;
            return stage;
        }

        let client = match NormalizerClient::from_config(&cfg.llm, self.env.llm_enabled) {
            Ok(client) => client,
            Err(reason) => {
                stage.fallback_reason = Some(reason);
                return stage;
            }
        };

        // Total stage budget covers connection setup on top of the
        // provider-side timeout.
        let budget_ms = self
            .env
            .pipeline_timeout_ms
            .unwrap_or_else(|| MIN_STAGE_BUDGET_MS.max(cfg.llm.timeout_s * 1000 + 5_000));

        stage.attempts = 1;
        let invoke = client.invoke(&parsed.lines, cands, &cfg.allowed_mods);
        match tokio::time::timeout(Duration::from_millis(budget_ms), invoke).await {
            Ok(Ok(exchange)) => {
                stage.request = Some(exchange.request);
                stage.response = Some(exchange.response);
                stage.output = Some(exchange.output);
            }
            Ok(Err(reason)) => {
                debug!(%reason, "llm stage fell back");
                stage.fallback_reason = Some(reason);
            }
            Err(_) => {
                warn!(budget_ms, "llm stage exceeded its total budget");
                stage.fallback_reason = Some(FallbackReason::LlmTimeout);
            }
        }
        stage
    }

    async fn try_cache_replay(
        &self,
        parsed: &ParsedReceipt,
        cfg: &ResolvedConfig,
        order_id: &str,
    ) -> Option<StructuredOutput> {
        let mut items = Vec::with_capacity(parsed.lines.len());

        for line in &parsed.lines {
            let key_fields = json!({
                "name_raw": line.name_raw,
                "menu_catalog_version": cfg.menu_catalog_version,
            });
            let entry = self
                .cache
                .get(Namespace::ItemMapping, &key_fields, Some(order_id))
                .await
                .ok()??;
            if entry.confidence < AUTO_PICK_THRESHOLD {
                return None;
            }
            let item_id = entry.value.get("item_id")?.as_str()?.to_string();

            let mut mods = Vec::new();
            let mut confidence_mods = None;
            if let Some(note) = &line.note_raw {
                let note_fields = json!({
                    "note_raw": note,
                    "allowed_mods_version": cfg.allowed_mods_version,
                });
                let note_entry = self
                    .cache
                    .get(Namespace::NoteMods, &note_fields, Some(order_id))
                    .await
                    .ok()??;
                mods = serde_json::from_value(note_entry.value.clone()).ok()?;
                confidence_mods = Some(note_entry.confidence);
            }

            items.push(LlmItem {
                line_index: line.line_index,
                item_id: Some(item_id),
                mods,
                confidence_item: Some(entry.confidence),
                confidence_mods,
                needs_review: false,
            });
        }

        // Group hints replay from their own namespace when available; a
        // miss is fine, the merge rules re-derive them deterministically.
        let mut groups = Vec::new();
        if !parsed.order_notes.is_empty() {
            let pattern: Vec<&str> =
                parsed.order_notes.iter().map(|n| n.text.as_str()).collect();
            let fields = json!({
                "group_pattern": pattern.join("|"),
                "menu_catalog_version": cfg.menu_catalog_version,
                "allowed_mods_version": cfg.allowed_mods_version,
            });
            if let Ok(Some(entry)) = self
                .cache
                .get(Namespace::GroupPattern, &fields, Some(order_id))
                .await
            {
                groups = serde_json::from_value(entry.value).unwrap_or_default();
            }
        }

        debug!(order_id, lines = items.len(), "cache replay satisfied all lines");
        Some(StructuredOutput { items, groups })
    }

    async fn write_caches(
        &self,
        payload: &OrderPayload,
        cfg: &ResolvedConfig,
        parsed: &ParsedReceipt,
        order_id: &str,
    ) {
        for item in &payload.order.items {
            let Some(code) = &item.item_code else {
                continue;
            };
            // Only confident, clean decisions may seed the replay path.
            if item.needs_review
                || !item.confidence_item.is_some_and(|c| c >= AUTO_PICK_THRESHOLD)
            {
                continue;
            }
            let fields = json!({
                "name_raw": item.name_raw,
                "menu_catalog_version": cfg.menu_catalog_version,
            });
            let value = json!({
                "item_id": code,
                "canonical_name": item.name_normalized,
            });
            if let Err(e) = self
                .cache
                .put(
                    Namespace::ItemMapping,
                    &fields,
                    value,
                    item.confidence_item.unwrap_or(0.0),
                    json!({}),
                    None,
                    Some(order_id),
                )
                .await
            {
                debug!(error = %e, "item-mapping cache write failed");
            }

            if let (Some(note), Some(conf)) = (&item.note_raw, item.confidence_mods) {
                let fields = json!({
                    "note_raw": note,
                    "allowed_mods_version": cfg.allowed_mods_version,
                });
                if let Err(e) = self
                    .cache
                    .put(
                        Namespace::NoteMods,
                        &fields,
                        json!(item.mods),
                        conf,
                        json!({}),
                        None,
                        Some(order_id),
                    )
                    .await
                {
                    debug!(error = %e, "note-mods cache write failed");
                }
            }
        }

        if !parsed.order_notes.is_empty() && !payload.order.groups.is_empty() {
            let pattern: Vec<&str> =
                parsed.order_notes.iter().map(|n| n.text.as_str()).collect();
            let fields = json!({
                "group_pattern": pattern.join("|"),
                "menu_catalog_version": cfg.menu_catalog_version,
                "allowed_mods_version": cfg.allowed_mods_version,
            });
            if let Err(e) = self
                .cache
                .put(
                    Namespace::GroupPattern,
                    &fields,
                    serde_json::to_value(&payload.order.groups).unwrap_or(Value::Null),
                    0.9,
                    json!({}),
                    None,
                    Some(order_id),
                )
                .await
            {
                debug!(error = %e, "group-pattern cache write failed");
            }
        }
    }

    /// Engine + store + queue snapshot for the status endpoint.
    pub async fn engine_status(&self, store_id: &str) -> IngestResult<Value> {
        let queue = self.reviews.counts_by_status().await;
        let status = match self.configs.get_config(store_id).await {
            Ok(cfg) => json!({
                "api_version": API_VERSION,
                "llm": {
                    "provider": cfg.llm.provider,
                    "model": cfg.llm.model,
                    "timeout_s": cfg.llm.timeout_s,
                    "enabled": cfg.llm.resolved_enabled(self.env.llm_enabled),
                    "api_key": cfg.llm.redacted_api_key(),
                },
                "store": {
                    "store_id": cfg.store_id,
                    "menu_items": cfg.menu_catalog.len(),
                    "allowed_mods": cfg.allowed_mods.len(),
                    "menu_catalog_version": cfg.menu_catalog_version,
                    "allowed_mods_version": cfg.allowed_mods_version,
                    "llm_config_version": cfg.llm_config_version,
                },
                "queue": queue,
            }),
            Err(e) => json!({
                "api_version": API_VERSION,
                "config_error": e.to_string(),
                "queue": queue,
            }),
        };
        Ok(status)
    }

    /// Runs the built-in fixtures through the pipeline with an inline
    /// deterministic catalog; returns a per-fixture summary.
    pub async fn run_test_suite(
        &self,
        store_id: &str,
        inject_dirty: bool,
        max_cases: Option<usize>,
        scenario: Option<&str>,
    ) -> IngestResult<Value> {
        let mut rows = Vec::new();
        let fixtures: Vec<_> = builtin_fixtures()
            .into_iter()
            .filter(|f| scenario.is_none_or(|s| f.scenario == s))
            .take(max_cases.unwrap_or(usize::MAX))
            .collect();

        for fixture in &fixtures {
            let mut source = fixture.source_text.to_string();
            if inject_dirty && !source.is_empty() {
                source.push_str(DIRTY_SUFFIX);
            }

            let req = IngestRequest {
                api_version: API_VERSION.to_string(),
                source_text: Some(source),
                text: None,
                store_id: Some(store_id.to_string()),
                order_id: None,
                audit_trace_id: None,
                metadata: Some(json!({"source": "fixture-suite", "fixture": fixture.name})),
                menu_catalog: Some(fixture_menu_catalog()),
                allowed_mods: Some(fixture_allowed_mods()),
                simulate: None,
            };

            let row = match self.ingest_pos_text(&req).await {
                Ok(resp) => {
                    let dirty_shifts_expectation = inject_dirty && !fixture.source_text.is_empty();
                    let expected = fixture.expect_needs_review || dirty_shifts_expectation;
                    json!({
                        "fixture": fixture.name,
                        "scenario": fixture.scenario,
                        "accepted": resp.accepted,
                        "order_id": resp.order_payload.order.order_id,
                        "review_queue_status": resp.status.as_str(),
                        "overall_needs_review": resp.order_payload.order.overall_needs_review,
                        "matches_expectation":
                            resp.order_payload.order.overall_needs_review == expected,
                    })
                }
                Err(e) => json!({
                    "fixture": fixture.name,
                    "scenario": fixture.scenario,
                    "accepted": false,
                    "error": e.to_string(),
                }),
            };
            rows.push(row);
        }

        let passed = rows
            .iter()
            .filter(|r| r["matches_expectation"].as_bool().unwrap_or(false))
            .count();
        Ok(json!({
            "store_id": store_id,
            "total": rows.len(),
            "passed": passed,
            "inject_dirty": inject_dirty,
            "results": rows,
        }))
    }
}

fn content_version_of<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .map(|v| services::canonical::content_version(&v))
        .unwrap_or_else(|_| "invalid".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use store_config::model::LlmEnvDefaults;

    async fn service(dir: &tempfile::TempDir) -> IngestService {
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log.jsonl")));
        let configs = Arc::new(ConfigStore::new(dir.path(), LlmEnvDefaults::default()));
        let cache = Arc::new(
            PipelineCache::load(dir.path().join("cache_store.json"), Some(audit.clone()))
                .await
                .unwrap(),
        );
        let reviews = Arc::new(
            ReviewStore::load(dir.path().join("review_store.json"), audit.clone())
                .await
                .unwrap(),
        );
        IngestService::new(configs, cache, audit, reviews, EngineEnv::default())
    }

    fn request(source: &str) -> IngestRequest {
        IngestRequest {
            api_version: API_VERSION.to_string(),
            source_text: Some(source.to_string()),
            text: None,
            store_id: Some("main".to_string()),
            order_id: None,
            audit_trace_id: None,
            metadata: None,
            menu_catalog: Some(fixture_menu_catalog()),
            allowed_mods: Some(fixture_allowed_mods()),
            simulate: None,
        }
    }

    #[tokio::test]
    async fn happy_path_auto_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let resp = svc
            .ingest_pos_text(&request("招牌鍋貼 x5\n酸辣湯 x1"))
            .await
            .unwrap();

        assert!(resp.accepted);
        assert_eq!(resp.status, ReviewQueueStatus::DispatchReady);
        let order = &resp.order_payload.order;
        assert!(!order.overall_needs_review);
        assert_eq!(order.items.len(), 2);
        assert!(order.items.iter().all(|i| i.item_code.is_some()));
        assert!(order.groups.is_empty());
        // LLM was never attempted: no key, disabled-family reason recorded.
        assert_eq!(
            order.metadata["fallback_reason"],
            json!("env_disabled")
        );
    }

    #[tokio::test]
    async fn unparseable_qty_queues_for_review() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let resp = svc.ingest_pos_text(&request("咖哩鍋貼 xO")).await.unwrap();
        assert!(resp.accepted);
        assert_eq!(resp.status, ReviewQueueStatus::PendingReview);
        let order = &resp.order_payload.order;
        assert_eq!(order.items[0].qty, 1);
        assert!(order.items[0].needs_review);
    }

    #[tokio::test]
    async fn grouping_note_survives_the_full_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let resp = svc
            .ingest_pos_text(&request("招牌鍋貼 x5\n咖哩鍋貼 x3\n備註:分裝"))
            .await
            .unwrap();
        let order = &resp.order_payload.order;
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.groups.len(), 1);
        assert_eq!(order.groups[0].label, "分裝");
        assert_eq!(order.groups[0].line_indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn empty_source_is_accepted_but_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let resp = svc.ingest_pos_text(&request("")).await.unwrap();
        assert!(resp.accepted);
        assert_eq!(resp.status, ReviewQueueStatus::PendingReview);
        let order = &resp.order_payload.order;
        assert!(order.items.is_empty());
        assert!(order.overall_needs_review);
        assert_eq!(order.audit_events[0].code, "no_items_detected");
    }

    #[tokio::test]
    async fn simulated_timeout_records_the_reason() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let mut req = request("招牌鍋貼 x5");
        req.simulate = Some(order_contracts::envelopes::SimulateFlags { llm_timeout: true });
        let resp = svc.ingest_pos_text(&req).await.unwrap();

        assert!(resp.accepted);
        let order = &resp.order_payload.order;
        assert_eq!(order.metadata["fallback_reason"], json!("llm_timeout"));
        assert_eq!(order.metadata["ingest_engine"], json!("rule_fallback"));
        assert_eq!(
            resp.order_payload.metadata["llm_used"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn audit_trail_carries_the_pipeline_stages() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let resp = svc.ingest_pos_text(&request("招牌鍋貼 x5")).await.unwrap();
        let order_id = resp.order_payload.order.order_id.clone();

        let events = svc.audit().events_for_order(&order_id).await.unwrap();
        let pipeline = events
            .iter()
            .find(|e| e.event_type == AuditEventKind::IngestPipeline)
            .unwrap();
        assert!(pipeline.raw_text.is_some());
        assert!(pipeline.parse_result.is_some());
        assert!(pipeline.candidates.is_some());
        assert!(pipeline.final_output.is_some());

        assert!(events
            .iter()
            .any(|e| e.event_type == AuditEventKind::DispatchDecision));
    }

    #[tokio::test]
    async fn repeated_ingest_replays_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let first = svc.ingest_pos_text(&request("招牌鍋貼 x5")).await.unwrap();
        assert!(first.order_payload.order.metadata.get("llm_cache_replay").is_none());

        let second = svc.ingest_pos_text(&request("招牌鍋貼 x5")).await.unwrap();
        let order = &second.order_payload.order;
        assert_eq!(order.metadata["llm_cache_replay"], json!(true));
        assert_eq!(order.metadata["ingest_engine"], json!("llm_pipeline"));
        assert_eq!(order.items[0].item_code.as_deref(), Some("I001"));
        assert_eq!(second.status, ReviewQueueStatus::DispatchReady);
    }

    #[tokio::test]
    async fn test_suite_runs_all_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let summary = svc.run_test_suite("main", false, None, None).await.unwrap();
        let total = summary["total"].as_u64().unwrap();
        assert_eq!(total as usize, builtin_fixtures().len());
        assert_eq!(summary["passed"], summary["total"]);
    }

    #[tokio::test]
    async fn engine_status_summarizes_store_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        svc.ingest_pos_text(&request("咖哩鍋貼 xO")).await.unwrap();

        let status = svc.engine_status("main").await.unwrap();
        assert_eq!(status["llm"]["provider"], json!("openai"));
        assert_eq!(status["queue"]["pending_review"], json!(1));
    }
}
