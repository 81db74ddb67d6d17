//! Fallback reasons: why the LLM path was not used.

use serde::{Deserialize, Serialize};

/// Stable tokens recorded in order metadata and audit events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Disabled by the environment kill switch or the store config.
    EnvDisabled,
    /// Store config names a provider this build does not support.
    UnsupportedProvider,
    /// Enablement resolved to auto and no api key is present.
    MissingApiKey,
    /// The provider did not answer within `timeout_s`.
    LlmTimeout,
    /// Non-2xx status or a broken transport.
    LlmHttpError,
    /// The reply was not parseable JSON.
    LlmInvalidJson,
    /// The reply parsed but violated the output schema.
    LlmSchemaViolation,
    /// The reply chose an item id outside the line's candidate set.
    LlmItemNotInCandidates,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::EnvDisabled => "env_disabled",
            FallbackReason::UnsupportedProvider => "unsupported_provider",
            FallbackReason::MissingApiKey => "missing_api_key",
            FallbackReason::LlmTimeout => "llm_timeout",
            FallbackReason::LlmHttpError => "llm_http_error",
            FallbackReason::LlmInvalidJson => "llm_invalid_json",
            FallbackReason::LlmSchemaViolation => "llm_schema_violation",
            FallbackReason::LlmItemNotInCandidates => "llm_item_not_in_candidates",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_match_display() {
        assert_eq!(
            serde_json::to_value(FallbackReason::LlmTimeout).unwrap(),
            serde_json::json!("llm_timeout")
        );
        assert_eq!(FallbackReason::EnvDisabled.to_string(), "env_disabled");
    }
}
