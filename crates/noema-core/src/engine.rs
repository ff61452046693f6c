//! Reasoning status engine: the stateful orchestrator between a raw
//! reasoning stream and the caller's event sink.
//!
//! One engine serves exactly one generation request. Internally it is a
//! timer-driven state machine: chunks accumulate in a buffer, a flush
//! policy decides when enough content (or time) justifies a status update,
//! the status model is attempted under admission control and a circuit
//! breaker, and every emission passes an anti-flicker gate so the UI never
//! sees updates faster than a human can read them. All state lives behind
//! one `tokio::sync::Mutex` — a single serialized write surface, no shared
//! mutable state between instances.
//!
//! Lifecycle: `idle → started → active (chunks / flushes / heartbeats in
//! any interleaving) → finalized | destroyed`. `destroyed` is terminal and
//! idempotent; every mutating method is a silent no-op afterward, which
//! keeps racy shutdown sequences harmless.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::{ConfigError, PhaseConfigMap, ReasoningConfig};
use crate::events::{EventMetadata, EventSink, ReasoningEvent, ReasoningEventKind, StatusSource};
use crate::fallback::FallbackBank;
use crate::llm::StatusModelClient;
use crate::phase::{detect_phase, ThinkingPhase};

/// Internal per-request state. Single writer: only engine methods touch it,
/// always under the engine's mutex.
struct ProviderState {
    current_phase: ThinkingPhase,
    buffer: String,
    reasoning_history: String,
    fallback: FallbackBank,
    breaker: CircuitBreaker,
    pending_calls: u32,
    last_emit: Option<Instant>,
    last_flush_attempt: Instant,
    last_chunk: Instant,
    last_wall: Option<DateTime<Utc>>,
    started: bool,
    finalizing: bool,
    destroyed: bool,
    flush_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Read-only diagnostics view returned by
/// [`ReasoningStatusEngine::state_snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub current_phase: ThinkingPhase,
    pub buffered_chars: usize,
    pub pending_calls: u32,
    pub started: bool,
    pub destroyed: bool,
    pub circuit_breaker: BreakerSnapshot,
}

struct EngineInner {
    request_id: String,
    config: ReasoningConfig,
    client: Arc<dyn StatusModelClient>,
    sink: EventSink,
    state: Mutex<ProviderState>,
}

/// Public handle. Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct ReasoningStatusEngine {
    inner: Arc<EngineInner>,
}

impl ReasoningStatusEngine {
    /// Builds an engine for one generation request.
    ///
    /// Fails fast on configuration errors (an empty fallback list means a
    /// broken deployment, not a transient condition).
    pub fn new(
        request_id: impl Into<String>,
        sink: EventSink,
        client: Arc<dyn StatusModelClient>,
        config: ReasoningConfig,
        phases: PhaseConfigMap,
    ) -> Result<Self, ConfigError> {
        phases.validate()?;
        let now = Instant::now();
        let state = ProviderState {
            current_phase: ThinkingPhase::Analyzing,
            buffer: String::new(),
            reasoning_history: String::new(),
            fallback: FallbackBank::from_phase_config(&phases),
            breaker: CircuitBreaker::default(),
            pending_calls: 0,
            last_emit: None,
            last_flush_attempt: now,
            last_chunk: now,
            last_wall: None,
            started: false,
            finalizing: false,
            destroyed: false,
            flush_timer: None,
            heartbeat: None,
        };
        Ok(Self {
            inner: Arc::new(EngineInner {
                request_id: request_id.into(),
                config,
                client,
                sink,
                state: Mutex::new(state),
            }),
        })
    }

    /// Convenience constructor using default tunables and phase table.
    pub fn with_defaults(
        request_id: impl Into<String>,
        sink: EventSink,
        client: Arc<dyn StatusModelClient>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            request_id,
            sink,
            client,
            ReasoningConfig::default(),
            PhaseConfigMap::default(),
        )
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Emits the opening status and starts the idle-heartbeat timer.
    pub async fn start(&self) {
        let mut state = self.inner.state.lock().await;
        if state.destroyed {
            warn!(
                target: "noema::engine",
                request_id = %self.inner.request_id,
                "start() called on a destroyed engine"
            );
            return;
        }
        if state.started {
            debug!(
                target: "noema::engine",
                request_id = %self.inner.request_id,
                "start() called twice"
            );
            return;
        }
        state.started = true;
        self.inner
            .emit_fallback_status(&mut state, Instant::now());

        let period = self.inner.config.idle_heartbeat;
        let inner = Arc::clone(&self.inner);
        state.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !inner.heartbeat_tick().await {
                    break;
                }
            }
        }));
    }

    /// Feeds one fragment of streamed reasoning text through the buffering
    /// and flush policy.
    pub async fn process_reasoning_chunk(&self, chunk: &str) {
        let mut state = self.inner.state.lock().await;
        if state.destroyed {
            return;
        }
        let now = Instant::now();
        state.last_chunk = now;
        state.buffer.push_str(chunk);
        state.reasoning_history.push_str(chunk);

        let detected = detect_phase(&state.buffer, state.current_phase);
        if detected != state.current_phase {
            debug!(
                target: "noema::engine",
                request_id = %self.inner.request_id,
                from = state.current_phase.as_str(),
                to = detected.as_str(),
                "phase transition"
            );
            state.current_phase = detected;
        }

        let should_flush = state.buffer.len() >= self.inner.config.min_buffer_chars
            || (!state.buffer.is_empty()
                && now.duration_since(state.last_flush_attempt) > self.inner.config.max_wait);
        if should_flush {
            self.inner.flush_locked(&mut state);
        } else if state.flush_timer.is_none() {
            self.inner
                .schedule_flush(&mut state, self.inner.config.max_wait);
        }
    }

    /// Force-sets the phase from an explicit external signal and emits a
    /// matching fallback status immediately. Unlike automatic detection,
    /// this bypasses the anti-flicker gate.
    pub async fn set_phase(&self, phase: ThinkingPhase) {
        let mut state = self.inner.state.lock().await;
        if state.destroyed || phase == state.current_phase {
            return;
        }
        debug!(
            target: "noema::engine",
            request_id = %self.inner.request_id,
            from = state.current_phase.as_str(),
            to = phase.as_str(),
            "forced phase change"
        );
        state.current_phase = phase;
        self.inner
            .emit_fallback_status(&mut state, Instant::now());
    }

    /// One-shot terminal operation: flushes any buffered text, attempts a
    /// final summary (skipped while the breaker is open), emits exactly one
    /// `reasoning_final` event, then destroys the engine.
    pub async fn finalize(&self, artifact_description: &str) {
        let (history, skip_model) = {
            let mut state = self.inner.state.lock().await;
            if state.destroyed || state.finalizing {
                return;
            }
            state.finalizing = true;
            if !state.buffer.is_empty() {
                self.inner.flush_locked(&mut state);
            }
            (state.reasoning_history.clone(), state.breaker.is_open())
        };

        let summary = if skip_model {
            debug!(
                target: "noema::engine",
                request_id = %self.inner.request_id,
                "breaker open, skipping final summary call"
            );
            None
        } else {
            match self
                .inner
                .client
                .generate_final_summary(&history, artifact_description, &self.inner.request_id)
                .await
            {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(
                        target: "noema::engine",
                        request_id = %self.inner.request_id,
                        error = %err,
                        "final summary failed, using template"
                    );
                    None
                }
            }
        };

        let mut state = self.inner.state.lock().await;
        let now = Instant::now();
        match summary {
            Some(message) => self.inner.emit(
                &mut state,
                ReasoningEventKind::Final,
                message,
                StatusSource::Llm,
                now,
            ),
            None => {
                let message = format!("Created {}.", artifact_description);
                self.inner.emit(
                    &mut state,
                    ReasoningEventKind::Final,
                    message,
                    StatusSource::Fallback,
                    now,
                );
            }
        }
        self.inner.destroy_locked(&mut state);
    }

    /// Terminal and idempotent: marks the state inert and cancels pending
    /// timers. In-flight model calls are not aborted; their results are
    /// discarded on completion.
    pub async fn destroy(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.destroy_locked(&mut state);
    }

    /// Read-only snapshot for diagnostics and tests.
    pub async fn state_snapshot(&self) -> StateSnapshot {
        let state = self.inner.state.lock().await;
        StateSnapshot {
            current_phase: state.current_phase,
            buffered_chars: state.buffer.len(),
            pending_calls: state.pending_calls,
            started: state.started,
            destroyed: state.destroyed,
            circuit_breaker: state.breaker.snapshot(),
        }
    }
}

impl EngineInner {
    /// Consumes the buffer to produce (or attempt) one status event.
    /// Synchronous under the state lock; the model call itself runs on a
    /// spawned task so the lock is never held across a suspension point.
    fn flush_locked(self: &Arc<Self>, state: &mut ProviderState) {
        let now = Instant::now();
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        state.last_flush_attempt = now;

        // Anti-flicker gate: too soon after the last emission. Keep the
        // buffer and come back when the cooldown expires.
        if let Some(last_emit) = state.last_emit {
            let elapsed = now.duration_since(last_emit);
            if elapsed < self.config.min_update_interval {
                let remaining = self.config.min_update_interval - elapsed;
                self.schedule_flush(state, remaining);
                return;
            }
        }

        if state.buffer.is_empty() {
            return;
        }

        // Admission control: never queue unbounded model calls.
        if state.pending_calls >= self.config.max_pending_calls {
            debug!(
                target: "noema::engine",
                request_id = %self.request_id,
                pending = state.pending_calls,
                "pending-call ceiling reached, emitting fallback"
            );
            state.buffer.clear();
            self.emit_fallback_status(state, now);
            return;
        }

        // Breaker gate. An open breaker past its cooldown lets exactly this
        // one attempt through as a half-open probe.
        if state.breaker.is_open()
            && !state
                .breaker
                .should_probe(self.config.breaker_reset, now)
        {
            state.buffer.clear();
            self.emit_fallback_status(state, now);
            return;
        }

        let snapshot = std::mem::take(&mut state.buffer);
        state.pending_calls += 1;
        let phase = state.current_phase;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner
                .client
                .generate_status(&snapshot, phase, &inner.request_id)
                .await;
            inner.on_status_call_complete(result).await;
        });
    }

    /// Completion handler for a spawned status call. Runs on the calling
    /// task, re-acquiring the state lock; a completion that lands after
    /// `destroy()` still settles the breaker and counters but emits nothing.
    async fn on_status_call_complete(
        self: &Arc<Self>,
        result: Result<String, crate::llm::StatusError>,
    ) {
        let mut state = self.state.lock().await;
        state.pending_calls = state.pending_calls.saturating_sub(1);
        let now = Instant::now();
        match result {
            Ok(message) => {
                if state.breaker.is_open() {
                    info!(
                        target: "noema::engine",
                        request_id = %self.request_id,
                        "status model recovered, closing circuit breaker"
                    );
                }
                state.breaker.record_success();
                if state.destroyed {
                    return;
                }
                self.emit(
                    &mut state,
                    ReasoningEventKind::Status,
                    message,
                    StatusSource::Llm,
                    now,
                );
            }
            Err(err) => {
                let opened = state
                    .breaker
                    .record_failure(self.config.breaker_threshold, now);
                if opened {
                    warn!(
                        target: "noema::engine",
                        request_id = %self.request_id,
                        failures = state.breaker.consecutive_failures(),
                        error = %err,
                        "circuit breaker opened, status updates degrade to fallback"
                    );
                } else {
                    debug!(
                        target: "noema::engine",
                        request_id = %self.request_id,
                        error = %err,
                        "status call failed, emitting fallback"
                    );
                }
                if state.destroyed {
                    return;
                }
                self.emit_fallback_status(&mut state, now);
            }
        }
    }

    fn schedule_flush(self: &Arc<Self>, state: &mut ProviderState, delay: Duration) {
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(self);
        state.flush_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = inner.state.lock().await;
            state.flush_timer = None;
            if state.destroyed {
                return;
            }
            inner.flush_locked(&mut state);
        }));
    }

    /// Heartbeat tick body. Returns `false` once the engine is destroyed so
    /// the timer task exits. Keepalives repeat the current fallback message
    /// (no rotation) and are exempt from the anti-flicker gate.
    async fn heartbeat_tick(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.destroyed {
            return false;
        }
        let now = Instant::now();
        if now.duration_since(state.last_chunk) >= self.config.idle_heartbeat {
            let message = state.fallback.first(state.current_phase).to_string();
            self.emit(
                &mut state,
                ReasoningEventKind::Heartbeat,
                message,
                StatusSource::Fallback,
                now,
            );
        }
        true
    }

    fn emit_fallback_status(&self, state: &mut ProviderState, now: Instant) {
        let phase = state.current_phase;
        let message = state.fallback.next(phase);
        self.emit(
            state,
            ReasoningEventKind::Status,
            message,
            StatusSource::Fallback,
            now,
        );
    }

    /// Single emission path: stamps `last_emit`, assigns a monotonic wall
    /// timestamp, and hands the event to the sink. A panicking sink is
    /// contained here so a misbehaving consumer cannot corrupt engine
    /// state.
    fn emit(
        &self,
        state: &mut ProviderState,
        kind: ReasoningEventKind,
        message: String,
        source: StatusSource,
        now: Instant,
    ) {
        if state.destroyed {
            return;
        }
        state.last_emit = Some(now);

        let mut wall = Utc::now();
        if let Some(last_wall) = state.last_wall {
            if wall < last_wall {
                wall = last_wall;
            }
        }
        state.last_wall = Some(wall);

        let (provider, model) = match source {
            StatusSource::Llm => (
                Some(self.client.provider().to_string()),
                Some(self.client.model().to_string()),
            ),
            StatusSource::Fallback => (None, None),
        };
        let event = ReasoningEvent {
            kind,
            message,
            phase: state.current_phase,
            metadata: EventMetadata {
                request_id: self.request_id.clone(),
                timestamp: wall.to_rfc3339_opts(SecondsFormat::Millis, true),
                source,
                provider,
                model,
                circuit_breaker_open: state.breaker.is_open().then_some(true),
            },
        };

        let sink = Arc::clone(&self.sink);
        if catch_unwind(AssertUnwindSafe(move || sink(event))).is_err() {
            warn!(
                target: "noema::engine",
                request_id = %self.request_id,
                "event sink panicked, continuing"
            );
        }
    }

    fn destroy_locked(&self, state: &mut ProviderState) {
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.abort();
        }
        debug!(
            target: "noema::engine",
            request_id = %self.request_id,
            "engine destroyed"
        );
    }
}
