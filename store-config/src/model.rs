//! Store configuration model and normalization rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ConfigResult, ConfigStoreError};

/// Default request timeout for the completion service, seconds.
pub const DEFAULT_LLM_TIMEOUT_S: u64 = 15;
/// Allowed timeout window, seconds.
pub const LLM_TIMEOUT_RANGE_S: (u64, u64) = (2, 60);
/// The currently supported provider token.
pub const SUPPORTED_PROVIDER: &str = "openai";

/// One menu catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub item_id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub sold_out: bool,
}

/// Per-store LLM configuration as persisted in `llm_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub timeout_s: u64,
    /// `None` resolves to "enabled iff an api key is present".
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Stored as-is; only ever exposed redacted.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LlmConfig {
    /// Redacts the api key for read surfaces (`prefix***suffix` or `***`).
    pub fn redacted_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(redact_secret)
    }

    /// Resolves the effective enablement, honoring the env kill switch.
    pub fn resolved_enabled(&self, env_enabled: Option<bool>) -> bool {
        if env_enabled == Some(false) {
            return false;
        }
        match self.enabled {
            Some(flag) => flag,
            None => self.api_key.is_some(),
        }
    }
}

/// Redaction used everywhere a secret leaves the process.
pub fn redact_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count > 8 {
        let prefix: String = secret.chars().take(4).collect();
        let suffix: String = secret.chars().skip(count - 2).collect();
        format!("{prefix}***{suffix}")
    } else {
        "***".to_string()
    }
}

/// Fully normalized per-store configuration with content versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub store_id: String,
    pub menu_catalog: Vec<MenuItem>,
    pub allowed_mods: Vec<String>,
    pub llm: LlmConfig,
    pub menu_catalog_version: String,
    pub allowed_mods_version: String,
    pub llm_config_version: String,
}

/// Process-wide LLM defaults sourced from `POS_LLM_*` environment.
#[derive(Debug, Clone, Default)]
pub struct LlmEnvDefaults {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout_s: Option<u64>,
    pub api_key: Option<String>,
}

impl LlmEnvDefaults {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            enabled: var("POS_LLM_ENABLED").map(|v| {
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            }),
            provider: var("POS_LLM_PROVIDER"),
            model: var("POS_LLM_MODEL"),
            timeout_s: var("POS_LLM_TIMEOUT_S").and_then(|v| v.trim().parse().ok()),
            api_key: var("POS_LLM_API_KEY"),
        }
    }

    /// Seed config for a store that has no `llm_config.json` yet.
    /// Secrets stay in the environment; the file is seeded without a key.
    pub fn seed_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self
                .provider
                .clone()
                .unwrap_or_else(|| SUPPORTED_PROVIDER.to_string()),
            model: self.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout_s: clamp_timeout(self.timeout_s.unwrap_or(DEFAULT_LLM_TIMEOUT_S)),
            enabled: None,
            api_key: None,
        }
    }
}

/// Lowercases and cleans a store id to `[a-z0-9_-]`, max 64 chars.
pub fn normalize_store_id(raw: &str) -> ConfigResult<String> {
    let cleaned: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return Err(ConfigStoreError::InvalidStoreId(raw.to_string()));
    }
    Ok(cleaned)
}

/// Parses a menu catalog payload: either a list of item objects or a
/// mapping from id to object.
pub fn parse_menu_catalog(value: &Value) -> ConfigResult<Vec<MenuItem>> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .enumerate()
            .map(|(i, entry)| parse_menu_item(entry, None, i))
            .collect(),
        Value::Object(map) => map
            .iter()
            .enumerate()
            .map(|(i, (id, entry))| parse_menu_item(entry, Some(id.as_str()), i))
            .collect(),
        other => Err(ConfigStoreError::InvalidMenuCatalog(format!(
            "expected list or mapping, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_menu_item(entry: &Value, map_key: Option<&str>, index: usize) -> ConfigResult<MenuItem> {
    let obj = entry.as_object().ok_or_else(|| {
        ConfigStoreError::InvalidMenuCatalog(format!("entry {index} is not an object"))
    })?;

    let str_field = |name: &str| obj.get(name).and_then(Value::as_str).map(str::trim);

    let id = str_field("item_id")
        .or_else(|| str_field("id"))
        .or(map_key)
        .filter(|s| !s.is_empty());
    let name = str_field("canonical_name")
        .or_else(|| str_field("name"))
        .filter(|s| !s.is_empty());

    let (item_id, canonical_name) = match (id, name) {
        (Some(id), Some(name)) => (id.to_string(), name.to_string()),
        (Some(id), None) => (id.to_string(), id.to_string()),
        (None, Some(name)) => (name.to_string(), name.to_string()),
        (None, None) => {
            return Err(ConfigStoreError::InvalidMenuCatalog(format!(
                "entry {index} carries neither an id nor a name"
            )));
        }
    };

    let aliases = obj
        .get("aliases")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(MenuItem {
        item_id,
        canonical_name,
        aliases,
        sold_out: obj.get("sold_out").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Parses and normalizes allowed mods: list of strings, deduplicated in
/// first-seen order, empties dropped.
pub fn parse_allowed_mods(value: &Value) -> ConfigResult<Vec<String>> {
    let entries = value.as_array().ok_or_else(|| {
        ConfigStoreError::InvalidAllowedMods(format!(
            "expected list of strings, got {}",
            json_kind(value)
        ))
    })?;

    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let s = entry.as_str().ok_or_else(|| {
            ConfigStoreError::InvalidAllowedMods(format!("entry {i} is not a string"))
        })?;
        let trimmed = s.trim();
        if trimmed.is_empty() || out.iter().any(|seen| seen == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    Ok(out)
}

/// Normalizes a raw LLM config object read from disk or a PUT body.
pub fn parse_llm_config(value: &Value, defaults: &LlmEnvDefaults) -> ConfigResult<LlmConfig> {
    let obj = value.as_object().ok_or_else(|| {
        ConfigStoreError::InvalidLlmConfig(format!("expected object, got {}", json_kind(value)))
    })?;

    let seed = defaults.seed_config();

    let provider = obj
        .get("provider")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or(seed.provider);

    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(seed.model);

    let timeout_s = match obj.get("timeout_s") {
        Some(v) if !v.is_null() => {
            let n = v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64));
            match n {
                Some(n) => clamp_timeout(n),
                None => {
                    return Err(ConfigStoreError::InvalidLlmConfig(
                        "timeout_s must be a number".to_string(),
                    ));
                }
            }
        }
        _ => seed.timeout_s,
    };

    let enabled = match obj.get("enabled") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            return Err(ConfigStoreError::InvalidLlmConfig(
                "enabled must be true, false or null".to_string(),
            ));
        }
    };

    let api_key = obj
        .get("api_key")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| defaults.api_key.clone());

    Ok(LlmConfig {
        provider,
        model,
        timeout_s,
        enabled,
        api_key,
    })
}

pub fn clamp_timeout(timeout_s: u64) -> u64 {
    timeout_s.clamp(LLM_TIMEOUT_RANGE_S.0, LLM_TIMEOUT_RANGE_S.1)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
