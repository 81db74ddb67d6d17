//! Completion-service client (enum dispatch, no async-trait).
//!
//! Endpoint derives from `POS_LLM_ENDPOINT` (default OpenAI API base):
//! - POST {endpoint}/v1/chat/completions, non-streaming,
//!   `response_format={"type":"json_object"}`, temperature 0.
//!
//! Zero application-level retries: any failure surfaces as a
//! [`FallbackReason`] and the caller falls back to rules.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use order_contracts::types::{LineCandidates, RawLine};
use store_config::model::{LlmConfig, SUPPORTED_PROVIDER};

use crate::output::{self, StructuredOutput};
use crate::prompt::build_normalize_prompt;
use crate::reason::FallbackReason;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";

/// Default endpoint resolution (env-overridable).
pub fn default_endpoint() -> String {
    std::env::var("POS_LLM_ENDPOINT")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

/// The full exchange, kept for the audit trail.
#[derive(Debug, Clone)]
pub struct LlmExchange {
    pub output: StructuredOutput,
    /// Request summary (model, endpoint, prompt) for `llm_request`.
    pub request: Value,
    /// Raw reply content for `llm_response`.
    pub response: Value,
}

/// Thin enum client over supported providers.
pub enum NormalizerClient {
    OpenAi(OpenAiNormalizer),
}

impl NormalizerClient {
    /// Builds a client from the resolved store config.
    ///
    /// Returns the disabled-family reasons without touching the network:
    /// `env_disabled`, `unsupported_provider`, `missing_api_key`.
    pub fn from_config(
        cfg: &LlmConfig,
        env_enabled: Option<bool>,
    ) -> Result<Self, FallbackReason> {
        if !cfg.resolved_enabled(env_enabled) {
            return Err(FallbackReason::EnvDisabled);
        }
        if cfg.provider != SUPPORTED_PROVIDER {
            warn!(provider = %cfg.provider, "unsupported llm provider");
            return Err(FallbackReason::UnsupportedProvider);
        }
        let Some(api_key) = cfg.api_key.clone() else {
            return Err(FallbackReason::MissingApiKey);
        };
        Ok(Self::OpenAi(OpenAiNormalizer::new(
            cfg.clone(),
            api_key,
            default_endpoint(),
        )?))
    }

    /// Runs one normalization request.
    pub async fn invoke(
        &self,
        lines: &[RawLine],
        candidates: &[LineCandidates],
        allowed_mods: &[String],
    ) -> Result<LlmExchange, FallbackReason> {
        match self {
            Self::OpenAi(client) => client.invoke(lines, candidates, allowed_mods).await,
        }
    }
}

/// Concrete OpenAI chat-completions client.
pub struct OpenAiNormalizer {
    client: reqwest::Client,
    cfg: LlmConfig,
    url_chat: String,
}

impl OpenAiNormalizer {
    fn new(cfg: LlmConfig, api_key: String, endpoint: String) -> Result<Self, FallbackReason> {
        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| FallbackReason::MissingApiKey)?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_s))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                warn!(error = %e, "failed to build llm http client");
                FallbackReason::LlmHttpError
            })?;

        let url_chat = format!(
            "{}/v1/chat/completions",
            endpoint.trim_end_matches('/')
        );

        Ok(Self {
            client,
            cfg,
            url_chat,
        })
    }

    async fn invoke(
        &self,
        lines: &[RawLine],
        candidates: &[LineCandidates],
        allowed_mods: &[String],
    ) -> Result<LlmExchange, FallbackReason> {
        let started = Instant::now();
        let prompt = build_normalize_prompt(lines, candidates, allowed_mods);

        let body = ChatCompletionRequest {
            model: &self.cfg.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        debug!(
            model = %self.cfg.model,
            lines = lines.len(),
            prompt_len = prompt.user.len(),
            "POST {}", self.url_chat
        );

        let resp = self
            .client
            .post(&self.url_chat)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FallbackReason::LlmTimeout
                } else {
                    warn!(error = %e, "llm transport failure");
                    FallbackReason::LlmHttpError
                }
            })?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "llm returned non-success status");
            return Err(FallbackReason::LlmHttpError);
        }

        let envelope: ChatCompletionResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                FallbackReason::LlmTimeout
            } else {
                warn!(error = %e, "failed to decode chat completion envelope");
                FallbackReason::LlmHttpError
            }
        })?;

        let content = envelope
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or(FallbackReason::LlmHttpError)?;

        let output = output::parse_and_validate(&content, lines, candidates)?;

        info!(
            model = %self.cfg.model,
            items = output.items.len(),
            groups = output.groups.len(),
            latency_ms = started.elapsed().as_millis(),
            "llm normalization completed"
        );

        Ok(LlmExchange {
            output,
            request: json!({
                "provider": self.cfg.provider,
                "model": self.cfg.model,
                "timeout_s": self.cfg.timeout_s,
                "system": prompt.system,
                "user": prompt.user,
            }),
            response: Value::String(content),
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(enabled: Option<bool>, api_key: Option<&str>, provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_s: 15,
            enabled,
            api_key: api_key.map(str::to_string),
        }
    }

    #[test]
    fn disabled_config_short_circuits() {
        let err = NormalizerClient::from_config(&cfg(Some(false), Some("sk-x"), "openai"), None)
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, FallbackReason::EnvDisabled);

        let err = NormalizerClient::from_config(&cfg(Some(true), Some("sk-x"), "openai"), Some(false))
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, FallbackReason::EnvDisabled);
    }

    #[test]
    fn unsupported_provider_is_reported() {
        let err = NormalizerClient::from_config(&cfg(Some(true), Some("sk-x"), "parrot"), None)
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, FallbackReason::UnsupportedProvider);
    }

    #[test]
    fn missing_key_is_reported() {
        let err = NormalizerClient::from_config(&cfg(Some(true), None, "openai"), None)
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, FallbackReason::MissingApiKey);
    }

    #[test]
    fn auto_enablement_with_key_builds_a_client() {
        assert!(NormalizerClient::from_config(&cfg(None, Some("sk-test"), "openai"), None).is_ok());
    }
}
