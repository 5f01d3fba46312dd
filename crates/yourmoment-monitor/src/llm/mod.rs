// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LLM adapter.
//!
//! The generation worker calls [`LlmClient::generate`] with everything the
//! backend needs - vendor, model, decrypted API key, sampling parameters
//! and the rendered prompts. No database connection is checked out while a
//! generation call is in flight.

pub mod http;
pub mod mock;

pub use self::http::HttpLlmClient;
pub use self::mock::MockLlmClient;

use async_trait::async_trait;
use thiserror::Error;

use yourmoment_core::model::ProviderSnapshot;

/// Errors from LLM calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Rate limit or temporary backend condition; worth retrying on a
    /// later coordinator tick.
    #[error("Transient LLM error: {0}")]
    Transient(String),

    /// Invalid key, content policy rejection or malformed request.
    #[error("Permanent LLM error: {0}")]
    Permanent(String),
}

impl LlmError {
    /// Whether a retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.is_server_error() || s.as_u16() == 429)
                .unwrap_or(false);

        if transient {
            LlmError::Transient(err.to_string())
        } else {
            LlmError::Permanent(err.to_string())
        }
    }
}

/// A generation request built by the generation worker.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Provider configuration with the decrypted API key.
    pub provider: ProviderSnapshot,
    /// System prompt of the template.
    pub system_prompt: String,
    /// Rendered user prompt.
    pub user_prompt: String,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Comment text returned by the backend.
    pub text: String,
    /// Prompt tokens billed.
    pub prompt_tokens: Option<i32>,
    /// Completion tokens billed.
    pub completion_tokens: Option<i32>,
    /// Backend-reported or measured latency.
    pub latency_ms: i64,
}

impl Generation {
    /// Total tokens of the call, if the backend reported usage.
    pub fn total_tokens(&self) -> Option<i32> {
        match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => Some(prompt.unwrap_or(0) + completion.unwrap_or(0)),
        }
    }
}

/// The language-model backend surface consumed by the generation worker.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;
}
