//! Persistent review queue.
//!
//! A keyed map `order_id → ReviewRecord` persisted as a single JSON
//! document with atomic replacement on every mutation. Mutations for one
//! order are serialized by an in-process lock registry; decisions walk the
//! state machine and re-classify through the pure dispatch classifier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use audit_log::{AuditEvent, AuditEventKind, AuditLog};
use order_contracts::dispatch::{self, DispatchRoute};
use order_contracts::envelopes::{DecisionRequest, DecisionResponse};
use order_contracts::types::{OrderPayload, ReviewDecision, ReviewQueueStatus, ReviewRecord};
use services::fs_atomic::write_atomic;

pub type ReviewResult<T> = Result<T, ReviewStoreError>;

#[derive(Debug, Error)]
pub enum ReviewStoreError {
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// `patched_order.order_id` must equal the request `order_id`.
    #[error("patched order id `{got}` does not match request order id `{expected}`")]
    InvalidPatchedOrderId { expected: String, got: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("audit error: {0}")]
    Audit(#[from] audit_log::AuditError),
}

impl ReviewStoreError {
    /// Stable machine-readable code for the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            ReviewStoreError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            ReviewStoreError::InvalidPatchedOrderId { .. } => "INVALID_PATCHED_ORDER_ID",
            ReviewStoreError::Io(_) => "IO_ERROR",
            ReviewStoreError::Serde(_) => "SERDE_ERROR",
            ReviewStoreError::Audit(_) => "AUDIT_ERROR",
        }
    }
}

/// One page of the review listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReviewPage {
    pub items: Vec<ReviewRecord>,
    pub pending_review: Vec<ReviewRecord>,
    pub tracking: Vec<ReviewRecord>,
    pub total: usize,
    pub next_cursor: Option<usize>,
}

/// Scope accepted by the test-data cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    TestOnly,
    All,
}

/// File-backed review registry.
pub struct ReviewStore {
    path: PathBuf,
    records: RwLock<HashMap<String, ReviewRecord>>,
    /// Per-order mutation locks (read-modify-write the whole record).
    order_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    audit: Arc<AuditLog>,
}

impl ReviewStore {
    /// Loads the store document (missing file means an empty store).
    pub async fn load(path: impl Into<PathBuf>, audit: Arc<AuditLog>) -> ReviewResult<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
            order_locks: Mutex::new(HashMap::new()),
            audit,
        })
    }

    async fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist(&self) -> ReviewResult<()> {
        let doc = {
            let records = self.records.read().await;
            serde_json::to_vec_pretty(&*records)?
        };
        write_atomic(&self.path, &doc).await?;
        Ok(())
    }

    /// Creates or replaces the record for `payload.order.order_id`.
    /// `created_at` of an existing record survives the update.
    pub async fn upsert(&self, payload: OrderPayload) -> ReviewResult<ReviewRecord> {
        let order_id = payload.order.order_id.clone();
        let lock = self.lock_for(&order_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let record = {
            let mut records = self.records.write().await;
            let created_at = records
                .get(&order_id)
                .map(|existing| existing.created_at)
                .unwrap_or(now);
            let record = ReviewRecord {
                order_id: order_id.clone(),
                audit_trace_id: payload.audit_trace_id.clone(),
                order_payload: payload,
                created_at,
                updated_at: now,
            };
            records.insert(order_id.clone(), record.clone());
            record
        };
        self.persist().await?;
        debug!(order_id, "review record upserted");
        Ok(record)
    }

    pub async fn get(&self, order_id: &str) -> Option<ReviewRecord> {
        self.records.read().await.get(order_id).cloned()
    }

    /// Purges one record without leaving an audit trail (reject-and-remove).
    pub async fn delete(&self, order_id: &str) -> ReviewResult<bool> {
        let lock = self.lock_for(order_id).await;
        let _guard = lock.lock().await;

        let removed = self.records.write().await.remove(order_id).is_some();
        if removed {
            self.persist().await?;
            info!(order_id, "review record deleted");
        }
        Ok(removed)
    }

    /// Pages records by `updated_at` descending and splits the page into
    /// pending-review and tracking sections.
    pub async fn list(&self, page: usize, page_size: usize) -> ReviewPage {
        let mut all: Vec<ReviewRecord> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = all.len();
        let page_size = page_size.clamp(1, 200);
        let start = page.saturating_mul(page_size);
        let items: Vec<ReviewRecord> = all.into_iter().skip(start).take(page_size).collect();
        let next_cursor = (start + items.len() < total).then(|| page + 1);

        let (tracking, pending_review) = items
            .iter()
            .cloned()
            .partition(|r| r.order_payload.review_queue_status.is_tracking());

        ReviewPage {
            items,
            pending_review,
            tracking,
            total,
            next_cursor,
        }
    }

    /// Record counts per queue status (engine status surface).
    pub async fn counts_by_status(&self) -> HashMap<&'static str, usize> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for record in self.records.read().await.values() {
            *counts
                .entry(record.order_payload.review_queue_status.as_str())
                .or_default() += 1;
        }
        counts
    }

    /// Applies a reviewer decision; see the state machine in the module docs.
    pub async fn apply_decision(&self, req: &DecisionRequest) -> ReviewResult<DecisionResponse> {
        let lock = self.lock_for(&req.order_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .records
            .read()
            .await
            .get(&req.order_id)
            .cloned()
            .ok_or_else(|| ReviewStoreError::OrderNotFound(req.order_id.clone()))?;

        // Patch first: approval re-classifies the patched order.
        if let Some(patched) = &req.patched_order {
            if patched.order_id != req.order_id {
                return Err(ReviewStoreError::InvalidPatchedOrderId {
                    expected: req.order_id.clone(),
                    got: patched.order_id.clone(),
                });
            }

            let before = record.order_payload.order.clone();
            let mut after = patched.clone();
            after.overall_needs_review = after.compute_overall_needs_review();
            record.order_payload.review_summary = after.review_summary();
            record.order_payload.order = after.clone();

            let mut correction =
                AuditEvent::new(&req.order_id, AuditEventKind::ManualCorrection);
            correction.human_correction = Some(json!({
                "before": serde_json::to_value(&before)?,
                "after": serde_json::to_value(&after)?,
            }));
            correction.metadata = json!({
                "reviewer_id": req.reviewer_id,
                "note": req.note,
            });
            self.audit.append(&correction).await?;
        }

        let next_status = match req.decision {
            ReviewDecision::Reject => ReviewQueueStatus::Rejected,
            ReviewDecision::RequestChanges => ReviewQueueStatus::InReview,
            ReviewDecision::Approve => {
                let decision = dispatch::classify(&record.order_payload.order);
                match decision.route {
                    DispatchRoute::AutoDispatch => ReviewQueueStatus::DispatchReady,
                    DispatchRoute::ReviewQueue => ReviewQueueStatus::InReview,
                }
            }
        };

        record.order_payload.review_queue_status = next_status;
        record.updated_at = Utc::now();

        {
            let mut records = self.records.write().await;
            records.insert(req.order_id.clone(), record.clone());
        }
        self.persist().await?;

        let mut event = AuditEvent::new(&req.order_id, AuditEventKind::ReviewDecision);
        event.metadata = json!({
            "decision": req.decision.as_str(),
            "reviewer_id": req.reviewer_id,
            "note": req.note,
            "review_queue_status": next_status.as_str(),
            "patched": req.patched_order.is_some(),
        });
        event.needs_review = next_status == ReviewQueueStatus::InReview;
        self.audit.append(&event).await?;

        info!(
            order_id = %req.order_id,
            decision = req.decision.as_str(),
            status = next_status.as_str(),
            "review decision applied"
        );

        Ok(DecisionResponse {
            order_id: req.order_id.clone(),
            review_queue_status: next_status,
            decision: req.decision,
            order_payload: record.order_payload,
        })
    }

    /// Removes records matching the scope; returns `(deleted, remaining)`.
    pub async fn clear(&self, scope: ClearScope) -> ReviewResult<(usize, usize)> {
        let (deleted, remaining) = {
            let mut records = self.records.write().await;
            let before = records.len();
            match scope {
                ClearScope::All => records.clear(),
                ClearScope::TestOnly => records.retain(|_, r| !looks_like_test_data(r)),
            }
            (before - records.len(), records.len())
        };
        if deleted > 0 {
            self.persist().await?;
            info!(deleted, remaining, "review store cleared");
        }
        Ok((deleted, remaining))
    }
}

const TEST_DATA_MARKERS: &[&str] = &["test", "smoke", "fixture", "demo"];

fn value_has_marker(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let lower = s.to_ascii_lowercase();
            TEST_DATA_MARKERS.iter().any(|m| lower.contains(m))
        }
        Value::Array(items) => items.iter().any(value_has_marker),
        Value::Object(map) => map.values().any(value_has_marker),
        _ => false,
    }
}

/// Heuristic keyword sniff over metadata; operator tooling, lossy by design.
fn looks_like_test_data(record: &ReviewRecord) -> bool {
    let payload = &record.order_payload;
    let source_marked = payload
        .metadata
        .get("source")
        .or_else(|| payload.order.metadata.get("source"))
        .is_some_and(value_has_marker);
    source_marked || value_has_marker(&payload.metadata) || value_has_marker(&payload.order.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_contracts::types::{NormalizedItem, NormalizedOrder, RawLine};

    fn payload(order_id: &str, needs_review: bool) -> OrderPayload {
        let item = NormalizedItem {
            line_index: 0,
            raw_line: "咖哩鍋貼 xO".into(),
            name_raw: "咖哩鍋貼".into(),
            name_normalized: "咖哩鍋貼".into(),
            item_code: (!needs_review).then(|| "I003".to_string()),
            qty: 1,
            note_raw: None,
            mods: vec![],
            group_id: None,
            confidence_item: Some(if needs_review { 0.4 } else { 0.95 }),
            confidence_mods: None,
            needs_review,
            metadata: json!({}),
            version: 1,
        };
        let mut order = NormalizedOrder {
            source_text: "咖哩鍋貼 xO".into(),
            order_id: order_id.into(),
            items: vec![item],
            groups: vec![],
            lines: vec![RawLine {
                line_index: 0,
                raw_line: "咖哩鍋貼 xO".into(),
                name_raw: "咖哩鍋貼".into(),
                qty: 1,
                note_raw: None,
                qty_unparsed: needs_review,
            }],
            audit_events: vec![],
            overall_needs_review: false,
            metadata: json!({}),
            version: 1,
        };
        order.overall_needs_review = order.compute_overall_needs_review();
        OrderPayload {
            review_summary: order.review_summary(),
            review_queue_status: if order.overall_needs_review {
                ReviewQueueStatus::PendingReview
            } else {
                ReviewQueueStatus::DispatchReady
            },
            order,
            audit_trace_id: format!("trc-{order_id}"),
            metadata: json!({}),
            version: 1,
        }
    }

    async fn store(dir: &tempfile::TempDir) -> ReviewStore {
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log.jsonl")));
        ReviewStore::load(dir.path().join("review_store.json"), audit)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let first = store.upsert(payload("ord-1", true)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.upsert(payload("ord-1", true)).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn unknown_order_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let req = DecisionRequest {
            order_id: "ord-missing".into(),
            api_version: "1.0".into(),
            audit_trace_id: None,
            review_queue_status: None,
            decision: ReviewDecision::Approve,
            reviewer_id: "ops".into(),
            note: None,
            patched_order: None,
            metadata: None,
        };
        let err = store.apply_decision(&req).await.unwrap_err();
        assert_eq!(err.code(), "ORDER_NOT_FOUND");
    }

    #[tokio::test]
    async fn approve_with_patch_reaches_dispatch_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.upsert(payload("ord-1", true)).await.unwrap();

        // Reviewer fixes the mapping and clears the flag.
        let mut patched = payload("ord-1", true).order;
        patched.items[0].item_code = Some("I003".into());
        patched.items[0].needs_review = false;
        patched.lines[0].qty_unparsed = false;

        let req = DecisionRequest {
            order_id: "ord-1".into(),
            api_version: "1.0".into(),
            audit_trace_id: None,
            review_queue_status: None,
            decision: ReviewDecision::Approve,
            reviewer_id: "ops".into(),
            note: Some("fixed mapping".into()),
            patched_order: Some(patched),
            metadata: None,
        };
        let resp = store.apply_decision(&req).await.unwrap();
        assert_eq!(resp.review_queue_status, ReviewQueueStatus::DispatchReady);
        assert!(!resp.order_payload.order.overall_needs_review);

        // The correction trail records the before/after pair.
        let events = store.audit.events_for_order("ord-1").await.unwrap();
        let correction = events
            .iter()
            .find(|e| e.event_type == AuditEventKind::ManualCorrection)
            .unwrap();
        let diff = correction.human_correction.as_ref().unwrap();
        assert_eq!(diff["before"]["items"][0]["item_code"], Value::Null);
        assert_eq!(diff["after"]["items"][0]["item_code"], "I003");
    }

    #[tokio::test]
    async fn patched_order_id_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.upsert(payload("ord-1", true)).await.unwrap();

        let patched = payload("ord-2", false).order;
        let req = DecisionRequest {
            order_id: "ord-1".into(),
            api_version: "1.0".into(),
            audit_trace_id: None,
            review_queue_status: None,
            decision: ReviewDecision::Approve,
            reviewer_id: "ops".into(),
            note: None,
            patched_order: Some(patched),
            metadata: None,
        };
        let err = store.apply_decision(&req).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PATCHED_ORDER_ID");
    }

    #[tokio::test]
    async fn approve_without_patch_on_flagged_order_stays_in_review() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.upsert(payload("ord-1", true)).await.unwrap();

        let req = DecisionRequest {
            order_id: "ord-1".into(),
            api_version: "1.0".into(),
            audit_trace_id: None,
            review_queue_status: None,
            decision: ReviewDecision::Approve,
            reviewer_id: "ops".into(),
            note: None,
            patched_order: None,
            metadata: None,
        };
        let resp = store.apply_decision(&req).await.unwrap();
        assert_eq!(resp.review_queue_status, ReviewQueueStatus::InReview);
    }

    #[tokio::test]
    async fn listing_splits_pending_and_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.upsert(payload("ord-clean", false)).await.unwrap();
        store.upsert(payload("ord-flagged", true)).await.unwrap();

        let page = store.list(0, 10).await;
        assert_eq!(page.total, 2);
        assert_eq!(page.pending_review.len(), 1);
        assert_eq!(page.tracking.len(), 1);
        assert_eq!(page.items[0].order_id, "ord-flagged"); // newest first
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn clear_test_only_is_a_keyword_sniff() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let mut test_payload = payload("ord-smoke", false);
        test_payload.metadata = json!({"source": "smoke-suite"});
        store.upsert(test_payload).await.unwrap();
        store.upsert(payload("ord-real", false)).await.unwrap();

        let (deleted, remaining) = store.clear(ClearScope::TestOnly).await.unwrap();
        assert_eq!((deleted, remaining), (1, 1));
        assert!(store.get("ord-real").await.is_some());
    }

    #[tokio::test]
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log.jsonl")));
        let path = dir.path().join("review_store.json");
        {
            let store = ReviewStore::load(&path, audit.clone()).await.unwrap();
            store.upsert(payload("ord-1", true)).await.unwrap();
        }
        let store = ReviewStore::load(&path, audit).await.unwrap();
        assert!(store.get("ord-1").await.is_some());
    }
}
