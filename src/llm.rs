//! Language-model backends
//!
//! A small abstraction over chat-completion providers so the translator and
//! composer can try an ordered priority list (primary first, then fallbacks)
//! without caring which vendor sits behind each slot. Every call is bounded
//! by an explicit timeout so a hung backend cannot stall the pipeline.

use crate::error::{InsightError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiBackend {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(name: &str, api_key: String, base_url: String, model: String) -> Self {
        Self {
            name: name.to_string(),
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InsightError::Llm(format!("failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InsightError::Llm("no content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Deterministic backend for tests: pops canned responses in order.
pub struct ScriptedBackend {
    name: String,
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, responses: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| InsightError::Llm("scripted backend poisoned".to_string()))?;
        responses
            .pop_front()
            .ok_or_else(|| InsightError::Llm(format!("backend '{}' exhausted", self.name)))
    }
}

/// Backend that always fails; stands in for an unreachable provider in tests.
pub struct FailingBackend {
    name: String,
}

impl FailingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(InsightError::Llm(format!(
            "backend '{}' unavailable",
            self.name
        )))
    }
}

/// Ordered priority list of backends with a per-call timeout.
///
/// The order is construction data: callers decide primary vs fallback; the
/// router never hardcodes a provider.
#[derive(Clone)]
pub struct LlmRouter {
    backends: Vec<Arc<dyn LlmBackend>>,
    call_timeout: Duration,
}

impl LlmRouter {
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>) -> Self {
        Self {
            backends,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn backends(&self) -> &[Arc<dyn LlmBackend>] {
        &self.backends
    }

    /// One bounded call against one backend.
    pub async fn complete_one(&self, backend: &Arc<dyn LlmBackend>, prompt: &str) -> Result<String> {
        debug!("calling LLM backend '{}'", backend.name());
        match tokio::time::timeout(self.call_timeout, backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(InsightError::Llm(format!(
                "backend '{}' timed out after {:?}",
                backend.name(),
                self.call_timeout
            ))),
        }
    }

    /// First successful completion across the chain.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match self.complete_one(backend, prompt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("backend '{}' failed: {}", backend.name(), e);
                    failures.push(format!("{}: {}", backend.name(), e));
                }
            }
        }
        Err(InsightError::Llm(format!(
            "all {} backends failed ({})",
            self.backends.len(),
            failures.join("; ")
        )))
    }
}

/// Strip markdown code fences and label prefixes from a model response.
pub fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .trim_start_matches("JSON:")
        .trim()
}
