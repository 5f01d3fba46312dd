// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock LLM client for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use async_trait::async_trait;

use super::{Generation, GenerationRequest, LlmClient, LlmError};

/// Scriptable LLM client.
///
/// Returns a fixed completion by default; can be switched to fail
/// transiently or permanently, and optionally sleeps per call to simulate
/// a slow backend.
pub struct MockLlmClient {
    response_text: Mutex<String>,
    fail_transient: Mutex<bool>,
    fail_permanent: Mutex<bool>,
    call_delay_ms: AtomicU32,
    calls: AtomicU32,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("Mega cool, din Text!")
    }
}

impl MockLlmClient {
    /// Create a client that always returns the given text.
    pub fn new(response_text: &str) -> Self {
        Self {
            response_text: Mutex::new(response_text.to_string()),
            fail_transient: Mutex::new(false),
            fail_permanent: Mutex::new(false),
            call_delay_ms: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change the scripted completion text.
    pub async fn set_response(&self, text: &str) {
        *self.response_text.lock().await = text.to_string();
    }

    /// Make every call fail transiently.
    pub async fn fail_transiently(&self, fail: bool) {
        *self.fail_transient.lock().await = fail;
    }

    /// Make every call fail permanently.
    pub async fn fail_permanently(&self, fail: bool) {
        *self.fail_permanent.lock().await = fail;
    }

    /// Sleep this long per call, simulating a slow backend.
    pub fn set_call_delay_ms(&self, delay_ms: u32) {
        self.call_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// Number of generate calls so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// All requests seen so far.
    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        let delay = self.call_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }

        if *self.fail_transient.lock().await {
            return Err(LlmError::Transient("mock rate limit".to_string()));
        }
        if *self.fail_permanent.lock().await {
            return Err(LlmError::Permanent("mock invalid API key".to_string()));
        }

        Ok(Generation {
            text: self.response_text.lock().await.clone(),
            prompt_tokens: Some(100),
            completion_tokens: Some(20),
            latency_ms: delay as i64,
        })
    }
}
