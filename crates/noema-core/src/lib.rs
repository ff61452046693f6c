//! noema-core: reasoning status engine.
//!
//! Sits between a raw token/reasoning stream coming off an LLM backend and
//! a client-facing event feed. Buffers incremental reasoning text, decides
//! when a status update is worth emitting, asks a status model to phrase it
//! (with canned fallbacks when the model is slow, failing, or circuit-broken),
//! rate-limits emissions against UI flicker, and keeps idle streams alive
//! with heartbeats.
//!
//! The transport is the caller's problem: construct a
//! [`ReasoningStatusEngine`] with an [`EventSink`] and forward the events
//! onto whatever wire you use (the `noema-gateway` add-on shows the SSE
//! wiring).

mod breaker;
mod config;
mod engine;
mod events;
mod fallback;
mod llm;
mod phase;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use config::{ConfigError, PhaseConfig, PhaseConfigMap, ReasoningConfig, StatusApiConfig};
pub use engine::{ReasoningStatusEngine, StateSnapshot};
pub use events::{
    EventMetadata, EventSink, ReasoningEvent, ReasoningEventKind, StatusSource,
};
pub use fallback::FallbackBank;
pub use llm::{DisabledStatusClient, OpenRouterStatusClient, StatusError, StatusModelClient};
pub use phase::{detect_phase, ThinkingPhase};
