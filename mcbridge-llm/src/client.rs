//! AI completion client for OpenAI-compatible endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::prompt;
use crate::types::ChatTurn;

/// The AI responder interface the dispatcher programs against.
///
/// One call, one reply. Implementations must not retry internally: a
/// failed or timed-out completion is surfaced as-is, and the next request
/// is treated independently.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce a reply to `message`, given the remembered `context` and
    /// the bridge's `system_prompt`.
    async fn complete(
        &self,
        context: &[ChatTurn],
        message: &str,
        system_prompt: &str,
    ) -> Result<String, LlmError>;
}

/// Backend selection for the AI responder.
#[derive(Debug, Clone)]
pub enum AiProvider {
    /// OpenAI-compatible API (also works for DashScope, Together, local
    /// inference servers exposing the same surface).
    OpenAiCompatible {
        /// API base URL, without the `/v1/chat/completions` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No backend configured — every call fails with
    /// [`LlmError::Unavailable`], and the dispatcher answers with its
    /// fallback reply.
    None,
}

/// The completion client.
pub struct AiClient {
    provider: AiProvider,
    http: Client,
    model: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AiClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        provider: AiProvider,
        model: impl Into<String>,
        timeout: Duration,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            timeout,
            max_tokens,
            temperature,
        }
    }

    /// A client with no backend; all calls fail with `Unavailable`.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            AiProvider::None,
            String::new(),
            Duration::from_secs(30),
            0,
            0.0,
        )
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, AiProvider::None)
    }

    async fn complete_openai(
        &self,
        base_url: &str,
        api_key: &str,
        context: &[ChatTurn],
        message: &str,
        system_prompt: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": prompt::build_messages(system_prompt, context, message),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false,
        });

        let start = Instant::now();
        let result = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(LlmError::Timeout(self.timeout.as_millis() as u64));
            }
            Err(e) => return Err(e.into()),
        };

        if !response.status().is_success() {
            return Err(LlmError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LlmError::ParseError(format!("no choices[0].message.content in {value}"))
            })?
            .to_string();

        debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            context_turns = context.len(),
            "AI completion finished"
        );
        Ok(text)
    }
}

#[async_trait]
impl Responder for AiClient {
    async fn complete(
        &self,
        context: &[ChatTurn],
        message: &str,
        system_prompt: &str,
    ) -> Result<String, LlmError> {
        match &self.provider {
            AiProvider::None => Err(LlmError::Unavailable("no AI backend configured".into())),
            AiProvider::OpenAiCompatible { base_url, api_key } => {
                let result = self
                    .complete_openai(base_url, api_key, context, message, system_prompt)
                    .await;
                if let Err(e) = &result {
                    warn!(error = %e, "AI completion failed");
                }
                result
            }
        }
    }
}
