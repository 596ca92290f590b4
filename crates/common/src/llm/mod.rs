//! LLM client
//!
//! Provides:
//! - A provider abstraction over chat-completion endpoints
//! - An OpenAI-compatible HTTP provider
//! - A retrying client with linear backoff shared by every generation stage
//! - Structured-output parsing with explicit fallbacks (see [`parse`])

pub mod parse;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single chat-completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one prompt, return the raw completion text
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat-completion provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str =
    "You are an expert nonfiction author and digital product strategist. Follow the requested output format exactly.";

impl OpenAiProvider {
    /// Create a new provider
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Internal {
                message: "LLM response contained no message content".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline provider for local development. Its output never parses as
/// structured JSON, so stages exercise their fallback branches.
pub struct MockProvider;

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let first_line = prompt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        Ok(format!(
            "## Draft\n\nThis is placeholder text generated offline for: {}\n\n[Mock response - LLM API key not configured]",
            first_line.trim()
        ))
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

type Responder = dyn Fn(&str, u32) -> Result<String> + Send + Sync;

/// Provider driven by a closure, receiving the prompt and the 1-based call
/// number. Counts calls so retry behaviour can be asserted.
pub struct ScriptedProvider {
    responder: Box<Responder>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, u32) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of completed `complete` calls
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.responder)(prompt, call)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Attempt budget and linear backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1200),
        }
    }
}

/// Retrying LLM client used by every generation stage
#[derive(Clone)]
pub struct LlmClient {
    provider: Option<Arc<dyn CompletionProvider>>,
    policy: RetryPolicy,
}

impl LlmClient {
    /// Build a client around an explicit provider. `None` models a missing
    /// credential: every call fails without contacting anything.
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Create a client based on configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        };

        let provider: Option<Arc<dyn CompletionProvider>> = match config.provider.as_str() {
            "openai" => match config.api_key.clone().filter(|k| !k.is_empty()) {
                Some(key) => Some(Arc::new(OpenAiProvider::new(key, config)?)),
                None => {
                    tracing::warn!("LLM API key not configured; generation requests will fail");
                    None
                }
            },
            "mock" => Some(Arc::new(MockProvider)),
            other => {
                return Err(AppError::Configuration {
                    message: format!("unknown LLM provider '{}'", other),
                })
            }
        };

        Ok(Self::new(provider, policy))
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Model name of the configured provider
    pub fn model_name(&self) -> &str {
        self.provider
            .as_deref()
            .map(|p| p.model_name())
            .unwrap_or("unconfigured")
    }

    /// Send `prompt` and return the trimmed completion.
    ///
    /// Any failure (transport, non-2xx, empty text) is retried until the
    /// attempt budget is spent; the final error carries the last cause.
    pub async fn call(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.call_with(prompt, max_tokens, |text| text.to_string())
            .await
    }

    /// Like [`LlmClient::call`], with `refine` applied to each completion.
    /// Output that refines to blank text counts as a failed attempt.
    pub async fn call_with<F>(&self, prompt: &str, max_tokens: u32, refine: F) -> Result<String>
    where
        F: Fn(&str) -> String,
    {
        let provider = self.provider.as_ref().ok_or_else(|| AppError::Configuration {
            message: "LLM API key is not configured".to_string(),
        })?;

        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            let start = Instant::now();

            let failure = match provider.complete(prompt, max_tokens).await {
                Ok(text) => {
                    let text = refine(text.trim());
                    if !text.trim().is_empty() {
                        metrics::record_llm_call(
                            start.elapsed().as_secs_f64(),
                            provider.model_name(),
                            true,
                        );
                        return Ok(text);
                    }
                    "empty completion".to_string()
                }
                Err(e) => e.to_string(),
            };

            metrics::record_llm_call(start.elapsed().as_secs_f64(), provider.model_name(), false);
            tracing::warn!(
                attempt,
                max_attempts,
                error = %failure,
                "LLM request failed"
            );
            last_error = failure;

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(AppError::UpstreamGeneration {
            attempts: max_attempts,
            message: last_error,
        })
    }
}
