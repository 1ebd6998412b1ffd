//! Reasoning backend abstraction.
//!
//! Defines the [`ChatModel`] trait used by the classifier, the strategy
//! selector and LLM synthesis, plus two implementations:
//! - **[`OpenAiChat`]**: any OpenAI-compatible `/chat/completions` endpoint,
//!   with retry and backoff.
//! - **[`DisabledChat`]**: always errors; callers fall back to their
//!   deterministic defaults.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelsConfig;

/// A reasoning backend: one system prompt and one user turn in, text out.
///
/// The classifier, the strategy selector and LLM synthesis all talk to a
/// `ChatModel`; tests substitute scripted implementations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Sends one system + user turn and returns the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// A model that refuses every call.
pub struct DisabledChat {
    reason: String,
}

impl DisabledChat {
    /// `reason` is included in every error this model returns.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("reasoning backend disabled: {}", self.reason)
    }
}

/// Chat completions over an OpenAI-compatible HTTP API.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OpenAiChat {
    /// Reads the API key from `config.api_key_env`.
    ///
    /// `config.timeout_secs` bounds each HTTP attempt; callers wrap the whole
    /// call, retries included, in [`ModelsConfig::call_budget`].
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or the HTTP client cannot be built.
    pub fn new(config: &ModelsConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("chat API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat completion failed after retries")))
    }
}

/// Extracts `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Builds the model for one role (classifier, selector, synthesis).
///
/// A disabled provider or a missing key yields [`DisabledChat`] so the
/// pipeline still runs on its fallbacks.
pub fn create_chat_model(config: &ModelsConfig, model: &str) -> Arc<dyn ChatModel> {
    if !config.is_enabled() {
        return Arc::new(DisabledChat::new("models.provider = \"disabled\""));
    }
    match OpenAiChat::new(config, model) {
        Ok(chat) => Arc::new(chat),
        Err(e) => {
            tracing::warn!(model, error = %e, "reasoning backend unavailable, using fallbacks");
            Arc::new(DisabledChat::new(e.to_string()))
        }
    }
}
