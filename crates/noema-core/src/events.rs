//! Structured events emitted by the engine toward the caller's sink.
//!
//! The caller owns the transport. For an SSE feed the payload of
//! [`ReasoningEvent::to_sse_data`] goes on the `data:` line and
//! [`ReasoningEventKind::sse_event_name`] on the `event:` line; the engine
//! itself never formats wire frames.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::phase::ThinkingPhase;

/// Event discriminator. Wire names follow the `reasoning_*` convention the
/// frontend listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningEventKind {
    #[serde(rename = "reasoning_status")]
    Status,
    #[serde(rename = "reasoning_final")]
    Final,
    #[serde(rename = "reasoning_heartbeat")]
    Heartbeat,
    #[serde(rename = "reasoning_error")]
    Error,
}

impl ReasoningEventKind {
    /// SSE `event:` field value, identical to the serde wire name.
    pub fn sse_event_name(&self) -> &'static str {
        match self {
            ReasoningEventKind::Status => "reasoning_status",
            ReasoningEventKind::Final => "reasoning_final",
            ReasoningEventKind::Heartbeat => "reasoning_heartbeat",
            ReasoningEventKind::Error => "reasoning_error",
        }
    }
}

/// Where a message came from: the status model, or the canned bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    Llm,
    Fallback,
}

/// Per-event envelope data.
///
/// `timestamp` is RFC 3339 and monotonically non-decreasing across all
/// events from one engine instance; `request_id` always matches the owning
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub request_id: String,
    pub timestamp: String,
    pub source: StatusSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_open: Option<bool>,
}

/// One emitted status unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningEvent {
    #[serde(rename = "type")]
    pub kind: ReasoningEventKind,
    pub message: String,
    pub phase: ThinkingPhase,
    pub metadata: EventMetadata,
}

impl ReasoningEvent {
    /// JSON payload for an SSE `data:` line.
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Caller-supplied event consumer.
///
/// Invoked inline while the engine holds its internal state lock, so the
/// sink must not call back into the same engine; hand the event to a
/// channel if further work is needed. A panicking sink is contained and
/// logged — it never corrupts engine state.
pub type EventSink = Arc<dyn Fn(ReasoningEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ReasoningEventKind, source: StatusSource) -> ReasoningEvent {
        ReasoningEvent {
            kind,
            message: "Writing the code...".to_string(),
            phase: ThinkingPhase::Implementing,
            metadata: EventMetadata {
                request_id: "req-1".to_string(),
                timestamp: "2026-08-06T12:00:00.000Z".to_string(),
                source,
                provider: None,
                model: None,
                circuit_breaker_open: None,
            },
        }
    }

    #[test]
    fn test_wire_shape() {
        let event = sample(ReasoningEventKind::Status, StatusSource::Fallback);
        let json: serde_json::Value =
            serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(json["type"], "reasoning_status");
        assert_eq!(json["phase"], "implementing");
        assert_eq!(json["metadata"]["source"], "fallback");
        assert_eq!(json["metadata"]["request_id"], "req-1");
    }

    #[test]
    fn test_optional_metadata_is_omitted() {
        let event = sample(ReasoningEventKind::Heartbeat, StatusSource::Fallback);
        let json: serde_json::Value =
            serde_json::from_str(&event.to_sse_data()).unwrap();
        let metadata = json["metadata"].as_object().unwrap();
        assert!(!metadata.contains_key("provider"));
        assert!(!metadata.contains_key("model"));
        assert!(!metadata.contains_key("circuit_breaker_open"));
    }

    #[test]
    fn test_llm_metadata_round_trips() {
        let mut event = sample(ReasoningEventKind::Final, StatusSource::Llm);
        event.metadata.provider = Some("openrouter".to_string());
        event.metadata.model = Some("z-ai/glm-4.5-air".to_string());
        let parsed: ReasoningEvent =
            serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(parsed.metadata.provider.as_deref(), Some("openrouter"));
        assert_eq!(parsed.kind, ReasoningEventKind::Final);
    }

    #[test]
    fn test_sse_event_names_match_serde() {
        for kind in [
            ReasoningEventKind::Status,
            ReasoningEventKind::Final,
            ReasoningEventKind::Heartbeat,
            ReasoningEventKind::Error,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.sse_event_name()));
        }
    }
}
