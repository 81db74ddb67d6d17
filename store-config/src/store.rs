//! File-backed config store with fingerprint hot reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::{Value, json};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use services::canonical::content_version;
use services::fs_atomic::write_atomic;

use crate::errors::{ConfigResult, ConfigStoreError};
use crate::model::{
    LlmEnvDefaults, MenuItem, StoreConfig, normalize_store_id, parse_allowed_mods,
    parse_llm_config, parse_menu_catalog,
};

const MENU_FILE: &str = "menu_catalog.json";
const MODS_FILE: &str = "allowed_mods.json";
const LLM_FILE: &str = "llm_config.json";

/// Cheap change detector for one config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileFingerprint {
    len: u64,
    mtime: Option<SystemTime>,
}

async fn fingerprint(path: &Path) -> Option<FileFingerprint> {
    let meta = fs::metadata(path).await.ok()?;
    Some(FileFingerprint {
        len: meta.len(),
        mtime: meta.modified().ok(),
    })
}

struct CachedStore {
    config: Arc<StoreConfig>,
    fingerprints: [Option<FileFingerprint>; 3],
}

/// Per-store config registry rooted at `<root>/stores/`.
pub struct ConfigStore {
    root: PathBuf,
    defaults: LlmEnvDefaults,
    cache: RwLock<HashMap<String, CachedStore>>,
    /// Serializes writers per store directory.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>, defaults: LlmEnvDefaults) -> Self {
        Self {
            root: root.into(),
            defaults,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Env defaults this store was constructed with.
    pub fn env_defaults(&self) -> &LlmEnvDefaults {
        &self.defaults
    }

    fn store_dir(&self, store_id: &str) -> PathBuf {
        self.root.join("stores").join(store_id)
    }

    fn file_paths(&self, store_id: &str) -> [PathBuf; 3] {
        let dir = self.store_dir(store_id);
        [dir.join(MENU_FILE), dir.join(MODS_FILE), dir.join(LLM_FILE)]
    }

    /// Returns the store config, reloading from disk when any file
    /// fingerprint changed. Stores are seeded with defaults on first
    /// reference.
    pub async fn get_config(&self, store_id: &str) -> ConfigResult<Arc<StoreConfig>> {
        let store_id = normalize_store_id(store_id)?;
        self.seed_if_missing(&store_id).await?;

        let paths = self.file_paths(&store_id);
        let fingerprints = [
            fingerprint(&paths[0]).await,
            fingerprint(&paths[1]).await,
            fingerprint(&paths[2]).await,
        ];

        if let Some(cached) = self.cache.read().await.get(&store_id) {
            if cached.fingerprints == fingerprints {
                return Ok(cached.config.clone());
            }
            debug!(store_id, "config fingerprints changed, reloading");
        }

        let config = Arc::new(self.load(&store_id, &paths).await?);
        self.cache.write().await.insert(
            store_id,
            CachedStore {
                config: config.clone(),
                fingerprints,
            },
        );
        Ok(config)
    }

    /// Replaces menu catalog and/or allowed mods, atomically, and returns
    /// the fresh config.
    pub async fn update_config(
        &self,
        store_id: &str,
        menu_catalog: Option<&Value>,
        allowed_mods: Option<&Value>,
    ) -> ConfigResult<Arc<StoreConfig>> {
        let store_id = normalize_store_id(store_id)?;
        self.seed_if_missing(&store_id).await?;
        let paths = self.file_paths(&store_id);

        let _guard = self.write_lock.lock().await;

        if let Some(raw) = menu_catalog {
            let normalized = parse_menu_catalog(raw)?;
            write_json(&paths[0], &serde_json::to_value(&normalized)?).await?;
        }
        if let Some(raw) = allowed_mods {
            let normalized = parse_allowed_mods(raw)?;
            write_json(&paths[1], &serde_json::to_value(&normalized)?).await?;
        }
        drop(_guard);

        self.invalidate(Some(&store_id)).await;
        info!(store_id, "store config updated");
        self.get_config(&store_id).await
    }

    /// The LLM slice of a store's config.
    pub async fn get_llm_config(&self, store_id: &str) -> ConfigResult<crate::model::LlmConfig> {
        Ok(self.get_config(store_id).await?.llm.clone())
    }

    /// Applies a partial update to the LLM config file.
    pub async fn update_llm_config(
        &self,
        store_id: &str,
        patch: &Value,
    ) -> ConfigResult<Arc<StoreConfig>> {
        let store_id = normalize_store_id(store_id)?;
        self.seed_if_missing(&store_id).await?;
        let path = &self.file_paths(&store_id)[2];

        let patch_obj = patch.as_object().ok_or_else(|| {
            ConfigStoreError::InvalidLlmConfig("patch must be an object".to_string())
        })?;

        let _guard = self.write_lock.lock().await;

        let mut current = read_json(path).await.unwrap_or_else(|_| json!({}));
        let merged = current.as_object_mut().ok_or_else(|| {
            ConfigStoreError::InvalidLlmConfig("stored llm config is not an object".to_string())
        })?;
        for (key, value) in patch_obj {
            merged.insert(key.clone(), value.clone());
        }
        let key_on_disk = merged.get("api_key").and_then(Value::as_str).is_some();

        // Normalize through the model layer, but persist only what came
        // from the file or the patch: env-provided secrets stay in the
        // environment.
        let mut normalized = parse_llm_config(&current, &self.defaults)?;
        if !key_on_disk {
            normalized.api_key = None;
        }
        write_json(path, &serde_json::to_value(&normalized)?).await?;
        drop(_guard);

        self.invalidate(Some(&store_id)).await;
        info!(store_id, "llm config updated");
        self.get_config(&store_id).await
    }

    /// Lists known store ids (directories under `<root>/stores/`).
    pub async fn list_stores(&self) -> ConfigResult<Vec<String>> {
        let stores_dir = self.root.join("stores");
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&stores_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Drops cached entries (all stores when `store_id` is `None`).
    pub async fn invalidate(&self, store_id: Option<&str>) {
        let mut cache = self.cache.write().await;
        match store_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    async fn seed_if_missing(&self, store_id: &str) -> ConfigResult<()> {
        let paths = self.file_paths(store_id);
        if fs::try_exists(&paths[0]).await.unwrap_or(false)
            && fs::try_exists(&paths[1]).await.unwrap_or(false)
            && fs::try_exists(&paths[2]).await.unwrap_or(false)
        {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        if !fs::try_exists(&paths[0]).await.unwrap_or(false) {
            write_json(&paths[0], &json!([])).await?;
        }
        if !fs::try_exists(&paths[1]).await.unwrap_or(false) {
            write_json(&paths[1], &json!([])).await?;
        }
        if !fs::try_exists(&paths[2]).await.unwrap_or(false) {
            let seed = self.defaults.seed_config();
            // Secrets stay in the environment, never in the seed file.
            let seed = serde_json::to_value(&seed)?;
            write_json(&paths[2], &seed).await?;
        }
        info!(store_id, "seeded store config with defaults");
        Ok(())
    }

    async fn load(&self, store_id: &str, paths: &[PathBuf; 3]) -> ConfigResult<StoreConfig> {
        let menu_raw = read_json(&paths[0]).await?;
        let mods_raw = read_json(&paths[1]).await?;
        let llm_raw = read_json(&paths[2]).await?;

        let menu_catalog: Vec<MenuItem> = parse_menu_catalog(&menu_raw)?;
        let allowed_mods = parse_allowed_mods(&mods_raw)?;
        let llm = parse_llm_config(&llm_raw, &self.defaults)?;

        let menu_catalog_version = content_version(&serde_json::to_value(&menu_catalog)?);
        let allowed_mods_version = content_version(&serde_json::to_value(&allowed_mods)?);
        let llm_config_version = content_version(&serde_json::to_value(&llm)?);

        debug!(
            store_id,
            items = menu_catalog.len(),
            mods = allowed_mods.len(),
            %menu_catalog_version,
            "store config loaded"
        );

        Ok(StoreConfig {
            store_id: store_id.to_string(),
            menu_catalog,
            allowed_mods,
            llm,
            menu_catalog_version,
            allowed_mods_version,
            llm_config_version,
        })
    }
}

async fn read_json(path: &Path) -> ConfigResult<Value> {
    let bytes = fs::read(path).await?;
    match serde_json::from_slice(&bytes) {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file failed to parse");
            Err(e.into())
        }
    }
}

async fn write_json(path: &Path, value: &Value) -> ConfigResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let cs = ConfigStore::new(dir.path(), LlmEnvDefaults::default());
        (dir, cs)
    }

    #[tokio::test]
    async fn first_reference_seeds_defaults() {
        let (_dir, cs) = store();
        let cfg = cs.get_config("brand-new").await.unwrap();
        assert!(cfg.menu_catalog.is_empty());
        assert!(cfg.allowed_mods.is_empty());
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cs.list_stores().await.unwrap(), vec!["brand-new"]);
    }

    #[tokio::test]
    async fn update_roundtrip_preserves_versions() {
        let (_dir, cs) = store();
        let menu = json!([{"item_id": "I001", "canonical_name": "招牌鍋貼"}]);
        let mods = json!(["加辣", "不加香菜"]);

        let first = cs.update_config("main", Some(&menu), Some(&mods)).await.unwrap();

        // Re-writing identical content must not move the versions.
        let menu_again = serde_json::to_value(&first.menu_catalog).unwrap();
        let mods_again = serde_json::to_value(&first.allowed_mods).unwrap();
        let second = cs
            .update_config("main", Some(&menu_again), Some(&mods_again))
            .await
            .unwrap();

        assert_eq!(first.menu_catalog, second.menu_catalog);
        assert_eq!(first.menu_catalog_version, second.menu_catalog_version);
        assert_eq!(first.allowed_mods_version, second.allowed_mods_version);
    }

    #[tokio::test]
    async fn external_edit_hot_reloads_with_new_version() {
        let (dir, cs) = store();
        cs.update_config("main", None, Some(&json!(["加辣"]))).await.unwrap();
        let before = cs.get_config("main").await.unwrap();

        // Simulate another process appending a marker to the mods file.
        let mods_path = dir.path().join("stores/main/allowed_mods.json");
        std::fs::write(&mods_path, r#"["加辣", "SMOKE_MARKER"]"#).unwrap();

        let after = cs.get_config("main").await.unwrap();
        assert!(after.allowed_mods.contains(&"SMOKE_MARKER".to_string()));
        assert_ne!(before.allowed_mods_version, after.allowed_mods_version);
        assert_eq!(before.menu_catalog_version, after.menu_catalog_version);
    }

    #[tokio::test]
    async fn llm_patch_merges_and_normalizes() {
        let (_dir, cs) = store();
        let cfg = cs
            .update_llm_config("main", &json!({"timeout_s": 300, "api_key": "sk-test-abcdef123456"}))
            .await
            .unwrap();
        assert_eq!(cfg.llm.timeout_s, 60);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test-abcdef123456"));
        assert_eq!(cfg.llm.redacted_api_key().unwrap(), "sk-t***56");

        // Patch another field; the key survives the merge.
        let cfg = cs
            .update_llm_config("main", &json!({"enabled": false}))
            .await
            .unwrap();
        assert_eq!(cfg.llm.enabled, Some(false));
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test-abcdef123456"));

        let llm = cs.get_llm_config("main").await.unwrap();
        assert_eq!(llm, cfg.llm);
    }

    #[tokio::test]
    async fn malformed_mods_payload_is_rejected() {
        let (_dir, cs) = store();
        let err = cs
            .update_config("main", None, Some(&json!("not-a-list")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigStoreError::InvalidAllowedMods(_)));
    }
}
