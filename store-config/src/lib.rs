//! Per-store configuration store.
//!
//! Each store owns three JSON files (menu catalog, allowed mods, LLM
//! config) under `<root>/stores/<store_id>/`. Reads are served from an
//! in-memory cache guarded by per-file fingerprints, so external edits hot
//! reload on the next `get_config`. Writes are atomic (temp-file +
//! rename) and bump content-hash versions.

pub mod errors;
pub mod model;
pub mod store;

pub use errors::ConfigStoreError;
pub use model::{LlmConfig, LlmEnvDefaults, MenuItem, StoreConfig};
pub use store::ConfigStore;
