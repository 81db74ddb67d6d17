//! Namespaced pipeline cache.
//!
//! Three namespaces (item mapping, note mods, group pattern) keyed by
//! SHA-256 over canonical JSON of the namespace's required fields. Config
//! versions are part of every key, so invalidation on config change is
//! implicit: a new version simply derives a different key. Entries carry
//! a per-namespace TTL and are persisted as one JSON document.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use audit_log::{AuditEvent, AuditEventKind, AuditLog};
use services::canonical::{canonical_json, sha256_hex};
use services::fs_atomic::write_atomic;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cache key for {namespace} is missing required field `{field}`")]
    MissingKeyField {
        namespace: &'static str,
        field: &'static str,
    },

    #[error("cache key fields must be a JSON object")]
    KeyFieldsNotObject,
}

/// Cache namespace with its key contract and default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    ItemMapping,
    NoteMods,
    GroupPattern,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::ItemMapping => "item-mapping",
            Namespace::NoteMods => "note-mods",
            Namespace::GroupPattern => "group-pattern",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Namespace::ItemMapping => &["name_raw", "menu_catalog_version"],
            Namespace::NoteMods => &["note_raw", "allowed_mods_version"],
            Namespace::GroupPattern => {
                &["group_pattern", "menu_catalog_version", "allowed_mods_version"]
            }
        }
    }

    pub fn default_ttl_s(self) -> i64 {
        match self {
            Namespace::ItemMapping | Namespace::NoteMods => 3600,
            Namespace::GroupPattern => 1800,
        }
    }
}

/// Derives the cache key for a namespace from the provided key fields.
///
/// Only the required fields participate; extra fields are ignored so
/// callers can pass a wider context object.
pub fn cache_key(namespace: Namespace, fields: &Value) -> CacheResult<String> {
    let obj = fields.as_object().ok_or(CacheError::KeyFieldsNotObject)?;

    let mut selected = Map::new();
    for field in namespace.required_fields() {
        let value = obj.get(*field).filter(|v| !v.is_null()).ok_or(
            CacheError::MissingKeyField {
                namespace: namespace.prefix(),
                field,
            },
        )?;
        selected.insert((*field).to_string(), value.clone());
    }

    let digest = sha256_hex(&canonical_json(&Value::Object(selected)));
    Ok(format!("{}:{}", namespace.prefix(), digest))
}

/// One cached decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub confidence: f64,
    #[serde(default)]
    pub meta: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// File-backed namespaced cache.
pub struct PipelineCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry>>,
    audit: Option<Arc<AuditLog>>,
}

impl PipelineCache {
    /// Loads the cache document (missing file means an empty cache).
    /// Passing an audit log enables hit/miss/write tracing.
    pub async fn load(
        path: impl Into<PathBuf>,
        audit: Option<Arc<AuditLog>>,
    ) -> CacheResult<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            audit,
        })
    }

    /// Looks up an entry; expired entries are deleted and count as a miss.
    pub async fn get(
        &self,
        namespace: Namespace,
        fields: &Value,
        trace_order: Option<&str>,
    ) -> CacheResult<Option<CacheEntry>> {
        let key = cache_key(namespace, fields)?;
        let now = Utc::now();

        let hit = {
            let entries = self.entries.read().await;
            entries.get(&key).cloned()
        };

        match hit {
            Some(entry) if !entry.is_expired(now) => {
                self.trace(AuditEventKind::CacheHit, &key, trace_order).await;
                Ok(Some(entry))
            }
            Some(_) => {
                self.entries.write().await.remove(&key);
                self.persist().await?;
                debug!(%key, "expired cache entry dropped");
                self.trace(AuditEventKind::CacheMiss, &key, trace_order).await;
                Ok(None)
            }
            None => {
                self.trace(AuditEventKind::CacheMiss, &key, trace_order).await;
                Ok(None)
            }
        }
    }

    /// Stores an entry. `ttl_s` defaults to the namespace TTL; a
    /// non-positive TTL means the entry never expires.
    pub async fn put(
        &self,
        namespace: Namespace,
        fields: &Value,
        value: Value,
        confidence: f64,
        meta: Value,
        ttl_s: Option<i64>,
        trace_order: Option<&str>,
    ) -> CacheResult<String> {
        let key = cache_key(namespace, fields)?;
        let now = Utc::now();
        let ttl = ttl_s.unwrap_or_else(|| namespace.default_ttl_s());

        let entry = CacheEntry {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            meta,
            created_at: now,
            expires_at: (ttl > 0).then(|| now + Duration::seconds(ttl)),
        };

        self.entries.write().await.insert(key.clone(), entry);
        self.persist().await?;
        self.trace(AuditEventKind::CacheWrite, &key, trace_order).await;
        Ok(key)
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self) -> CacheResult<()> {
        let doc = {
            let entries = self.entries.read().await;
            serde_json::to_vec_pretty(&*entries)?
        };
        write_atomic(&self.path, &doc).await?;
        Ok(())
    }

    async fn trace(&self, kind: AuditEventKind, key: &str, order_id: Option<&str>) {
        let Some(audit) = &self.audit else {
            return;
        };
        let mut event = AuditEvent::new(order_id.unwrap_or(""), kind);
        event.metadata = serde_json::json!({"cache_key": key});
        // Tracing is best-effort; a failed append must not fail the lookup.
        if let Err(e) = audit.append(&event).await {
            debug!(error = %e, "cache trace append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn cache(dir: &tempfile::TempDir) -> PipelineCache {
        PipelineCache::load(dir.path().join("cache_store.json"), None)
            .await
            .unwrap()
    }

    #[test]
    fn key_ignores_field_order_and_string_whitespace() {
        let a = cache_key(
            Namespace::ItemMapping,
            &json!({"name_raw": "招牌鍋貼 ", "menu_catalog_version": "abc123"}),
        )
        .unwrap();
        let b = cache_key(
            Namespace::ItemMapping,
            &json!({"menu_catalog_version": "abc123", "name_raw": "招牌鍋貼"}),
        )
        .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("item-mapping:"));
    }

    #[test]
    fn version_change_yields_a_different_key() {
        let v1 = cache_key(
            Namespace::NoteMods,
            &json!({"note_raw": "加辣", "allowed_mods_version": "v1"}),
        )
        .unwrap();
        let v2 = cache_key(
            Namespace::NoteMods,
            &json!({"note_raw": "加辣", "allowed_mods_version": "v2"}),
        )
        .unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn missing_required_field_fails_key_construction() {
        let err = cache_key(Namespace::GroupPattern, &json!({"group_pattern": "同袋"}))
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingKeyField { .. }));
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_confidence_clamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir).await;
        let fields = json!({"name_raw": "酸辣湯", "menu_catalog_version": "v1"});

        cache
            .put(
                Namespace::ItemMapping,
                &fields,
                json!({"item_id": "I002"}),
                7.5,
                json!({}),
                None,
                None,
            )
            .await
            .unwrap();

        let entry = cache
            .get(Namespace::ItemMapping, &fields, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value["item_id"], "I002");
        assert_eq!(entry.confidence, 1.0);
        assert!(entry.expires_at.is_some());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss_and_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir).await;
        let fields = json!({"note_raw": "不要香菜", "allowed_mods_version": "v1"});

        cache
            .put(
                Namespace::NoteMods,
                &fields,
                json!(["不加香菜"]),
                0.9,
                json!({}),
                Some(-1),
                None,
            )
            .await
            .unwrap();
        // Non-positive TTL means no expiry; store again with a tiny TTL
        // already in the past by rewriting expires_at through a fresh put.
        assert!(cache.get(Namespace::NoteMods, &fields, None).await.unwrap().is_some());

        cache
            .put(
                Namespace::NoteMods,
                &fields,
                json!(["不加香菜"]),
                0.9,
                json!({}),
                Some(1),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(cache.get(Namespace::NoteMods, &fields, None).await.unwrap().is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache_store.json");
        let fields = json!({"name_raw": "招牌鍋貼", "menu_catalog_version": "v1"});

        {
            let cache = PipelineCache::load(&path, None).await.unwrap();
            cache
                .put(
                    Namespace::ItemMapping,
                    &fields,
                    json!({"item_id": "I001"}),
                    1.0,
                    json!({}),
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        let reloaded = PipelineCache::load(&path, None).await.unwrap();
        let entry = reloaded
            .get(Namespace::ItemMapping, &fields, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value["item_id"], "I001");
    }
}
