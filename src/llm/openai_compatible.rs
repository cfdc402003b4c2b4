//! OpenAI-compatible model provider implementation.
//!
//! Connects to any endpoint that implements the OpenAI Chat Completions
//! API: cloud providers, proxies, or local inference servers.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelProvider,
};

/// Provider name constant to avoid magic strings.
const PROVIDER_NAME: &str = "openai_compatible";

/// OpenAI-compatible Chat Completions API provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: LlmConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// The client carries a local request timeout so a hung connection
    /// cannot stall the batch beyond the configured bound.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("Failed to build reqwest client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Construct API URL for a given path.
    /// Uses the base_url as-is and appends `/v1/{path}`.
    /// Strips trailing `/v1` from base_url to avoid double `/v1` issues.
    fn api_url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/{}", base, path.trim_start_matches('/'))
    }

    /// Add Authorization header if an API key is configured.
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_ref() {
            Some(key) => request.header("Authorization", format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    /// Send a request to the chat completions API.
    async fn send_request(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let url = self.api_url("chat/completions");

        tracing::debug!(url, model = %body.model, "sending chat completion request");

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);

        let request = self.add_auth_header(request);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                return LlmError::Timeout {
                    provider: PROVIDER_NAME.to_string(),
                };
            }
            tracing::error!(error = %e, "chat completion request failed");
            LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed {
                    provider: PROVIDER_NAME.to_string(),
                },
                408 => LlmError::Timeout {
                    provider: PROVIDER_NAME.to_string(),
                },
                429 => LlmError::RateLimited {
                    provider: PROVIDER_NAME.to_string(),
                    retry_after: None,
                },
                code if code >= 500 => LlmError::ServerError {
                    provider: PROVIDER_NAME.to_string(),
                    status: code,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER_NAME.to_string(),
                    reason: format!(
                        "HTTP {}: {}",
                        status,
                        &response_text[..response_text.len().min(200)]
                    ),
                },
            });
        }

        serde_json::from_str(&response_text).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            reason: format!(
                "JSON parse error: {}. Raw: {}",
                e,
                &response_text[..response_text.len().min(200)]
            ),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatCompletionMessage {
                    role: "system".to_string(),
                    content: req.system,
                },
                ChatCompletionMessage {
                    role: "user".to_string(),
                    content: req.user,
                },
            ],
            temperature: req.temperature.or(Some(self.config.temperature)),
            max_tokens: req.max_tokens.or(Some(self.config.max_tokens)),
        };

        let response = self.send_request(&request).await?;

        let choice =
            response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::InvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    reason: "No choices in response".to_string(),
                })?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
            finish_reason,
        })
    }
}

// OpenAI-compatible Chat Completions API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: ChatCompletionUsage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_provider_with_base_url(base_url: &str) -> OpenAiCompatibleProvider {
        let config = LlmConfig {
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 1500,
            timeout: Duration::from_secs(30),
        };
        OpenAiCompatibleProvider::new(config).unwrap()
    }

    #[test]
    fn test_api_url_trailing_slash() {
        // trailing slash: https://api.example.com/ → https://api.example.com/v1/chat/completions
        let provider = create_provider_with_base_url("https://api.example.com/");
        let url = provider.api_url("chat/completions");
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_api_url_no_trailing_slash() {
        let provider = create_provider_with_base_url("https://api.example.com");
        let url = provider.api_url("chat/completions");
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_api_url_already_has_v1() {
        // already has /v1: https://openrouter.ai/api/v1 → should NOT produce /v1/v1
        let provider = create_provider_with_base_url("https://openrouter.ai/api/v1");
        let url = provider.api_url("chat/completions");
        assert_eq!(url, "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_response_deserializes_minimal_payload() {
        let raw = r#"{
            "choices": [{"message": {"content": "diff --git"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("diff --git"));
        assert_eq!(parsed.usage.prompt_tokens, 10);
    }
}
