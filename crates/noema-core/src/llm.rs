//! Status-model capability: turns raw reasoning text into short
//! human-readable status lines.
//!
//! The engine depends only on [`StatusModelClient`]; the hosted
//! implementation ([`OpenRouterStatusClient`]) speaks the OpenAI-compatible
//! chat-completions dialect used by OpenRouter. Any backend — hosted API,
//! local heuristic, test double — can be injected at engine construction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StatusApiConfig;
use crate::phase::ThinkingPhase;

/// Cap on the reasoning excerpt included in a status prompt. Status calls
/// only need the most recent thinking, and the tail is what describes the
/// current activity.
const STATUS_EXCERPT_CHARS: usize = 1200;

/// Cap on the history excerpt included in a final-summary prompt.
const SUMMARY_EXCERPT_CHARS: usize = 4000;

const STATUS_MAX_TOKENS: u32 = 40;
const SUMMARY_MAX_TOKENS: u32 = 60;
const STATUS_TEMPERATURE: f32 = 0.2;

/// Failure taxonomy for status-model calls. Every variant is recoverable at
/// the engine level — callers degrade to fallback messages, never panic.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("status model call timed out after {0} ms")]
    Timeout(u64),

    #[error("status model API error: HTTP {status}")]
    Api { status: u16 },

    #[error("status model returned an empty or malformed payload")]
    InvalidResponse,

    #[error("status model call failed: {0}")]
    Unknown(String),
}

/// Capability interface for status generation. Both operations are
/// time-bounded by the implementation; the engine never adds its own
/// timeout on top.
#[async_trait]
pub trait StatusModelClient: Send + Sync {
    /// Produce a 5–10 word, present-continuous description of what the
    /// reasoning excerpt is currently doing.
    async fn generate_status(
        &self,
        reasoning_text: &str,
        phase: ThinkingPhase,
        request_id: &str,
    ) -> Result<String, StatusError>;

    /// Produce an 8–15 word, past-tense completion summary over the full
    /// reasoning history. Allowed 1.5× the status timeout.
    async fn generate_final_summary(
        &self,
        reasoning_history: &str,
        artifact_description: &str,
        request_id: &str,
    ) -> Result<String, StatusError>;

    /// Provider tag recorded in event metadata (e.g. "openrouter").
    fn provider(&self) -> &str;

    /// Model identifier recorded in event metadata.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenRouter-compatible chat-completions wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    /// Reasoning-capable models must answer directly here; a status line
    /// about the thinking must not itself spend time thinking.
    thinking: ThinkingControl,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ThinkingControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

// ---------------------------------------------------------------------------
// Hosted client
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenRouter-style APIs.
pub struct OpenRouterStatusClient {
    api: StatusApiConfig,
    client: reqwest::Client,
}

impl OpenRouterStatusClient {
    pub fn new(api: StatusApiConfig) -> Self {
        let client = reqwest::Client::builder()
            // Transport-level ceiling; per-call deadlines are tighter.
            .timeout(api.status_timeout * 2)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { api, client }
    }

    /// Build from environment (`NOEMA_STATUS_API_*`). `None` when no API
    /// key is configured.
    pub fn from_env() -> Option<Self> {
        StatusApiConfig::from_env().map(Self::new)
    }

    async fn chat(
        &self,
        prompt: String,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, StatusError> {
        let url = format!("{}/chat/completions", self.api.base_url);
        let body = ChatRequest {
            model: self.api.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: STATUS_TEMPERATURE,
            max_tokens,
            thinking: ThinkingControl { kind: "disabled" },
        };

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let res = tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| StatusError::Timeout(deadline.as_millis() as u64))?
            .map_err(|e| StatusError::Unknown(e.to_string()))?;

        if !res.status().is_success() {
            return Err(StatusError::Api {
                status: res.status().as_u16(),
            });
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|_| StatusError::InvalidResponse)?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(StatusError::InvalidResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl StatusModelClient for OpenRouterStatusClient {
    async fn generate_status(
        &self,
        reasoning_text: &str,
        phase: ThinkingPhase,
        request_id: &str,
    ) -> Result<String, StatusError> {
        let prompt = build_status_prompt(reasoning_text, phase);
        debug!(
            target: "noema::llm",
            request_id,
            phase = phase.as_str(),
            chars = reasoning_text.len(),
            "requesting status line"
        );
        self.chat(prompt, STATUS_MAX_TOKENS, self.api.status_timeout)
            .await
    }

    async fn generate_final_summary(
        &self,
        reasoning_history: &str,
        artifact_description: &str,
        request_id: &str,
    ) -> Result<String, StatusError> {
        let prompt = build_summary_prompt(reasoning_history, artifact_description);
        debug!(
            target: "noema::llm",
            request_id,
            chars = reasoning_history.len(),
            "requesting final summary"
        );
        self.chat(
            prompt,
            SUMMARY_MAX_TOKENS,
            self.api.status_timeout.mul_f64(1.5),
        )
        .await
    }

    fn provider(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.api.model
    }
}

/// Fallback-only stand-in used when no API key is configured. Every call
/// fails with `Unknown`, so the engine's circuit breaker opens quickly and
/// the canned message bank carries the stream.
pub struct DisabledStatusClient;

#[async_trait]
impl StatusModelClient for DisabledStatusClient {
    async fn generate_status(
        &self,
        _reasoning_text: &str,
        _phase: ThinkingPhase,
        _request_id: &str,
    ) -> Result<String, StatusError> {
        Err(StatusError::Unknown("status model disabled".to_string()))
    }

    async fn generate_final_summary(
        &self,
        _reasoning_history: &str,
        _artifact_description: &str,
        _request_id: &str,
    ) -> Result<String, StatusError> {
        Err(StatusError::Unknown("status model disabled".to_string()))
    }

    fn provider(&self) -> &str {
        "disabled"
    }

    fn model(&self) -> &str {
        "none"
    }
}

fn build_status_prompt(reasoning_text: &str, phase: ThinkingPhase) -> String {
    let excerpt = tail_chars(reasoning_text, STATUS_EXCERPT_CHARS);
    format!(
        "You are narrating an AI assistant's progress to the person waiting for it. \
         Below is the assistant's most recent raw reasoning. Describe what it is doing \
         right now in 5-10 words, present continuous tense. No quotes, no trailing \
         punctuation beyond an ellipsis. Current stage: {}.\n\nReasoning:\n{}",
        phase.as_str(),
        excerpt
    )
}

fn build_summary_prompt(reasoning_history: &str, artifact_description: &str) -> String {
    let excerpt = tail_chars(reasoning_history, SUMMARY_EXCERPT_CHARS);
    format!(
        "An AI assistant just finished creating: {}. Below is its reasoning history. \
         Summarize what was accomplished in 8-15 words, past tense, plain language, \
         no quotes.\n\nReasoning history:\n{}",
        artifact_description, excerpt
    )
}

/// Last `max_chars` of `text`, aligned to a char boundary.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text;
    }
    let skip = char_count - max_chars;
    let (idx, _) = text.char_indices().nth(skip).unwrap_or((0, ' '));
    &text[idx..]
}
