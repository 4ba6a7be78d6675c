//! LLM chat client abstraction and the xAI (Grok) implementation.
//!
//! Defines the [`LlmClient`] trait used by metadata extraction and candidate
//! arbitration, plus:
//! - **[`DisabledClient`]**: always errors; used when no provider is configured.
//! - **[`XaiClient`]**: calls the OpenAI-compatible xAI chat completions API
//!   with retry and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

pub const API_KEY_ENV: &str = "XAI_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider is disabled")]
    Disabled,
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// A chat-style language model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier (e.g. `"grok-3-latest"`).
    fn model_name(&self) -> &str;

    /// Send one system + user exchange and return the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Client for `POST {base_url}/chat/completions` on the xAI API.
pub struct XaiClient {
    client: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl XaiClient {
    /// Build a client reading the key from `XAI_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| LlmError::MissingApiKey(API_KEY_ENV))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for XaiClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        let url = self.endpoint();

        let mut last_err = String::from("no attempt made");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying LLM request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
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

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(status = status.as_u16(), "transient LLM API error");
                        last_err = format!("HTTP {}: {}", status, body_text);
                        continue;
                    }

                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LLM request failed");
                    last_err = e.to_string();
                    continue;
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.config.max_retries + 1,
            last: last_err,
        })
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, LlmError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))
}

/// Create the configured [`LlmClient`].
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "xai" => Ok(Box::new(XaiClient::new(config)?)),
        _ => Ok(Box::new(DisabledClient)),
    }
}

/// Recover the JSON object from a model reply.
///
/// Models often wrap JSON in Markdown fences or add prose around it. Parse
/// the first complete object starting at a `{`, ignoring whatever follows it.
pub fn parse_json_payload(text: &str) -> Result<serde_json::Value, LlmError> {
    let mut last_err = None;
    for (start, _) in text.match_indices('{') {
        let mut values =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        match values.next() {
            Some(Ok(value @ serde_json::Value::Object(_))) => return Ok(value),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if last_err.is_none() {
                    last_err = Some(e.to_string());
                }
            }
            None => {}
        }
    }
    Err(LlmError::InvalidResponse(
        last_err.unwrap_or_else(|| "no JSON object in reply".to_string()),
    ))
}
