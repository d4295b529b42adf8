//! An [`LlmBackend`] that reaches a backend over HTTP, the way `bin/server`'s
//! Gmail client reaches for `reqwest` rather than hand-rolling a connection.
//!
//! This speaks one generic JSON request/response shape rather than any
//! particular hosted provider's real wire protocol — it is the seam a real
//! provider integration plugs into, not one.

use crate::backend::{LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
use crate::error::LlmError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct GenericResponse {
    content: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: GenericUsage,
}

#[derive(Deserialize, Default)]
struct GenericUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Posts `{prompt, system, context, temperature, max_tokens}` to
/// `config.base_url` and expects `{content, model?, usage?}` back.
pub struct HttpLlmBackend {
    client: reqwest::Client,
    config: LlmBackendConfig,
}

impl HttpLlmBackend {
    /// # Errors
    ///
    /// Returns [`LlmError::InvalidConfig`] if the underlying HTTP client
    /// cannot be built.
    pub fn new(config: LlmBackendConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::InvalidConfig { reason: e.to_string() })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "system": request.system,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "output_schema": request.output_schema,
        });

        let mut builder = self.client.post(&self.config.base_url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::ProviderUnavailable {
                    provider: self.config.provider.name().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs: retry_after });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed { reason: format!("status {status}: {text}") });
        }

        let parsed: GenericResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParseFailed { reason: e.to_string() })?;

        Ok(LlmResponse {
            content: parsed.content,
            structured_output: None,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    fn provider(&self) -> LlmProvider {
        self.config.provider.clone()
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl LlmProvider {
    fn name(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenAiCompatible => "openai_compatible",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_with_default_client() {
        let backend = HttpLlmBackend::new(LlmBackendConfig::ollama("http://localhost:11434", "llama3"));
        assert!(backend.is_ok());
    }

    #[test]
    fn provider_name_covers_every_variant() {
        assert_eq!(LlmProvider::Ollama.name(), "ollama");
        assert_eq!(LlmProvider::Anthropic.name(), "anthropic");
        assert_eq!(LlmProvider::OpenAi.name(), "openai");
        assert_eq!(LlmProvider::OpenAiCompatible.name(), "openai_compatible");
    }
}
