// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP LLM client.
//!
//! Both supported vendors expose the OpenAI-compatible chat-completions
//! shape, so a single request/response mapping covers openai and mistral;
//! only the origin differs. `json_mode` maps to the `response_format`
//! field.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use yourmoment_core::model::LlmVendor;

use super::{Generation, GenerationRequest, LlmClient, LlmError};

// ── Chat-completions request/response ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
}

/// Configuration for the HTTP LLM client.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Origin override for the openai vendor (testing).
    pub openai_base_url: Option<String>,
    /// Origin override for the mistral vendor (testing).
    pub mistral_base_url: Option<String>,
}

impl Default for HttpLlmConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            openai_base_url: None,
            mistral_base_url: None,
        }
    }
}

/// Client over the real vendor APIs.
pub struct HttpLlmClient {
    config: HttpLlmConfig,
    client: reqwest::Client,
}

impl HttpLlmClient {
    /// Create a client with the given configuration.
    pub fn new(config: HttpLlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn base_url(&self, vendor: LlmVendor) -> String {
        let override_url = match vendor {
            LlmVendor::OpenAi => self.config.openai_base_url.as_deref(),
            LlmVendor::Mistral => self.config.mistral_base_url.as_deref(),
        };
        override_url
            .unwrap_or(vendor.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let provider = &request.provider;
        let url = format!("{}/chat/completions", self.base_url(provider.vendor));

        let body = ChatRequest {
            model: &provider.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
            response_format: provider.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&provider.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("{} returned HTTP {status}: {detail}", provider.vendor);
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(LlmError::Transient(message))
            } else {
                Err(LlmError::Permanent(message))
            };
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Permanent(format!("unparseable completion response: {e}")))?;
        let latency_ms = started.elapsed().as_millis() as i64;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let (prompt_tokens, completion_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        debug!(
            vendor = %provider.vendor,
            model = %provider.model_name,
            latency_ms,
            "Generation call completed"
        );

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_per_vendor() {
        let client = HttpLlmClient::new(HttpLlmConfig::default()).unwrap();
        assert_eq!(
            client.base_url(LlmVendor::OpenAi),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            client.base_url(LlmVendor::Mistral),
            "https://api.mistral.ai/v1"
        );
    }

    #[test]
    fn test_base_url_override() {
        let client = HttpLlmClient::new(HttpLlmConfig {
            mistral_base_url: Some("http://localhost:8088/v1/".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(LlmVendor::Mistral), "http://localhost:8088/v1");
        assert_eq!(
            client.base_url(LlmVendor::OpenAi),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn test_chat_request_serialization() {
        let body = ChatRequest {
            model: "mistral-small-latest",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "Du bist hilfsbereit.",
                },
                ChatMessage {
                    role: "user",
                    content: "Kommentiere diesen Text.",
                },
            ],
            temperature: 0.7,
            max_tokens: 256,
            response_format: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "mistral-small-latest");
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json.get("response_format").is_none());

        let with_json_mode = ChatRequest {
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
            ..body
        };
        let json = serde_json::to_value(&with_json_mode).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Toller Text!"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 18, "total_tokens": 138}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Toller Text!")
        );
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(120));
        assert_eq!(usage.completion_tokens, Some(18));
    }
}
