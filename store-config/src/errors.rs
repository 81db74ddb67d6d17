//! Error hierarchy for the config store.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigStoreError>;

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Store id empty (after normalization) or otherwise unusable.
    #[error("invalid store id: {0}")]
    InvalidStoreId(String),

    /// Menu catalog payload is neither a list of items nor an id→item map,
    /// or an entry carries no usable identifier.
    #[error("invalid menu catalog: {0}")]
    InvalidMenuCatalog(String),

    /// Allowed mods payload is not a list of strings.
    #[error("invalid allowed mods: {0}")]
    InvalidAllowedMods(String),

    /// LLM config payload has the wrong shape.
    #[error("invalid llm config: {0}")]
    InvalidLlmConfig(String),
}
