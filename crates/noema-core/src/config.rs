//! Engine tunables and status-model API configuration.
//!
//! All knobs have compiled-in defaults that can be overridden per-process
//! through `NOEMA_*` environment variables. Invalid or unset values fall
//! back to the default; floors prevent pathological settings (a zero-width
//! anti-flicker gate, an unbounded call fan-out) from reaching the engine.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | NOEMA_MIN_BUFFER_CHARS | 150 | Buffered chars that justify a flush. |
//! | NOEMA_MAX_WAIT_MS | 3000 | Max time buffered text may sit un-flushed. |
//! | NOEMA_MIN_UPDATE_INTERVAL_MS | 1500 | Anti-flicker gate between emissions. |
//! | NOEMA_MAX_PENDING_CALLS | 3 | In-flight status-model call ceiling. |
//! | NOEMA_BREAKER_THRESHOLD | 3 | Consecutive failures that open the breaker. |
//! | NOEMA_BREAKER_RESET_MS | 30000 | Cooldown before a half-open probe. |
//! | NOEMA_IDLE_HEARTBEAT_MS | 8000 | Idle period before a keepalive status. |
//! | NOEMA_STATUS_TIMEOUT_MS | 2000 | Hard timeout for one status call. |
//! | NOEMA_STATUS_API_KEY / OPENROUTER_API_KEY | — | Status-model API key. |
//! | NOEMA_STATUS_API_BASE | openrouter.ai/api/v1 | Chat-completions base URL. |
//! | NOEMA_STATUS_MODEL | z-ai/glm-4.5-air | Model identifier. |

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::phase::ThinkingPhase;

const DEFAULT_MIN_BUFFER_CHARS: usize = 150;
const DEFAULT_MAX_WAIT_MS: u64 = 3000;
const DEFAULT_MIN_UPDATE_INTERVAL_MS: u64 = 1500;
const DEFAULT_MAX_PENDING_CALLS: u32 = 3;
const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_BREAKER_RESET_MS: u64 = 30_000;
const DEFAULT_IDLE_HEARTBEAT_MS: u64 = 8000;
const DEFAULT_STATUS_TIMEOUT_MS: u64 = 2000;

const DEFAULT_STATUS_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_STATUS_MODEL: &str = "z-ai/glm-4.5-air";

/// A configuration problem that indicates a broken deployment rather than a
/// transient condition. Surfaced at engine construction, never at call time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("phase '{0}' has an empty fallback message list")]
    EmptyFallbackList(&'static str),
}

/// Immutable engine tunables, fixed at construction.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Buffered chars that justify an immediate flush.
    pub min_buffer_chars: usize,
    /// Maximum time buffered text may wait before a flush is forced.
    pub max_wait: Duration,
    /// Anti-flicker gate: minimum interval between emitted events.
    pub min_update_interval: Duration,
    /// Admission control: ceiling on concurrently in-flight model calls.
    pub max_pending_calls: u32,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    /// Cooldown (from the original open) before a half-open probe.
    pub breaker_reset: Duration,
    /// Idle period without chunks before a keepalive status is emitted.
    pub idle_heartbeat: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            min_buffer_chars: env_usize("NOEMA_MIN_BUFFER_CHARS", DEFAULT_MIN_BUFFER_CHARS).max(1),
            max_wait: Duration::from_millis(
                env_u64("NOEMA_MAX_WAIT_MS", DEFAULT_MAX_WAIT_MS).max(100),
            ),
            min_update_interval: Duration::from_millis(
                env_u64("NOEMA_MIN_UPDATE_INTERVAL_MS", DEFAULT_MIN_UPDATE_INTERVAL_MS).max(50),
            ),
            max_pending_calls: env_u32("NOEMA_MAX_PENDING_CALLS", DEFAULT_MAX_PENDING_CALLS).max(1),
            breaker_threshold: env_u32("NOEMA_BREAKER_THRESHOLD", DEFAULT_BREAKER_THRESHOLD).max(1),
            breaker_reset: Duration::from_millis(
                env_u64("NOEMA_BREAKER_RESET_MS", DEFAULT_BREAKER_RESET_MS).max(1000),
            ),
            idle_heartbeat: Duration::from_millis(
                env_u64("NOEMA_IDLE_HEARTBEAT_MS", DEFAULT_IDLE_HEARTBEAT_MS).max(1000),
            ),
        }
    }
}

/// Per-phase display configuration: UI label, rotating fallback messages,
/// and an advisory duration hint (surfaced to clients, never used for
/// scheduling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub display_name: String,
    pub fallback_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_duration: Option<Duration>,
}

/// Full phase table. Callers may override any subset of phases; validation
/// happens once, at engine construction.
#[derive(Debug, Clone)]
pub struct PhaseConfigMap {
    phases: HashMap<ThinkingPhase, PhaseConfig>,
}

impl PhaseConfigMap {
    pub fn get(&self, phase: ThinkingPhase) -> &PhaseConfig {
        // Construction guarantees every phase is present.
        &self.phases[&phase]
    }

    /// Replace the configuration for one phase.
    pub fn set(&mut self, phase: ThinkingPhase, config: PhaseConfig) {
        self.phases.insert(phase, config);
    }

    /// Rejects any phase whose fallback message list is empty. The engine
    /// calls this once in its constructor so a misconfigured deployment
    /// fails loudly instead of erroring mid-stream.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for phase in ThinkingPhase::ALL {
            if self.phases[&phase].fallback_messages.is_empty() {
                return Err(ConfigError::EmptyFallbackList(phase.as_str()));
            }
        }
        Ok(())
    }
}

impl Default for PhaseConfigMap {
    fn default() -> Self {
        let mut phases = HashMap::new();
        phases.insert(
            ThinkingPhase::Analyzing,
            phase_config(
                "Analyzing",
                &[
                    "Analyzing your request...",
                    "Understanding the requirements...",
                    "Reviewing the details...",
                ],
                Some(Duration::from_secs(5)),
            ),
        );
        phases.insert(
            ThinkingPhase::Planning,
            phase_config(
                "Planning",
                &[
                    "Planning the approach...",
                    "Structuring the solution...",
                    "Mapping out the pieces...",
                ],
                Some(Duration::from_secs(8)),
            ),
        );
        phases.insert(
            ThinkingPhase::Implementing,
            phase_config(
                "Implementing",
                &[
                    "Writing the code...",
                    "Building the core logic...",
                    "Putting the pieces together...",
                    "Working through the details...",
                ],
                Some(Duration::from_secs(20)),
            ),
        );
        phases.insert(
            ThinkingPhase::Styling,
            phase_config(
                "Styling",
                &[
                    "Polishing the presentation...",
                    "Refining the visual details...",
                    "Adjusting layout and spacing...",
                ],
                Some(Duration::from_secs(10)),
            ),
        );
        phases.insert(
            ThinkingPhase::Finalizing,
            phase_config(
                "Finalizing",
                &[
                    "Finalizing the result...",
                    "Wrapping things up...",
                    "Running final checks...",
                ],
                Some(Duration::from_secs(5)),
            ),
        );
        Self { phases }
    }
}

fn phase_config(
    display_name: &str,
    messages: &[&str],
    typical_duration: Option<Duration>,
) -> PhaseConfig {
    PhaseConfig {
        display_name: display_name.to_string(),
        fallback_messages: messages.iter().map(|m| m.to_string()).collect(),
        typical_duration,
    }
}

/// Connection settings for the hosted status model.
#[derive(Debug, Clone)]
pub struct StatusApiConfig {
    /// Chat-completions base URL (no trailing slash).
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer token for the upstream API.
    pub api_key: String,
    /// Hard wall-clock timeout for one status call. Final-summary calls
    /// get 1.5× this value.
    pub status_timeout: Duration,
}

impl StatusApiConfig {
    /// Load from environment. Key priority: `NOEMA_STATUS_API_KEY`, then
    /// `OPENROUTER_API_KEY`. Returns `None` when no key is configured, in
    /// which case callers should run the engine fallback-only.
    pub fn from_env() -> Option<Self> {
        let api_key = env_opt_string("NOEMA_STATUS_API_KEY")
            .or_else(|| env_opt_string("OPENROUTER_API_KEY"))?;
        Some(Self {
            base_url: env_opt_string("NOEMA_STATUS_API_BASE")
                .unwrap_or_else(|| DEFAULT_STATUS_API_BASE.to_string()),
            model: env_opt_string("NOEMA_STATUS_MODEL")
                .unwrap_or_else(|| DEFAULT_STATUS_MODEL.to_string()),
            api_key,
            status_timeout: Duration::from_millis(
                env_u64("NOEMA_STATUS_TIMEOUT_MS", DEFAULT_STATUS_TIMEOUT_MS).max(100),
            ),
        })
    }

    /// Explicit constructor for injected/test configurations.
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.trim().to_string(),
            status_timeout: Duration::from_millis(DEFAULT_STATUS_TIMEOUT_MS),
        }
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_config_defaults() {
        let config = ReasoningConfig::default();
        assert_eq!(config.min_buffer_chars, 150);
        assert_eq!(config.max_wait, Duration::from_millis(3000));
        assert_eq!(config.min_update_interval, Duration::from_millis(1500));
        assert_eq!(config.max_pending_calls, 3);
        assert_eq!(config.breaker_threshold, 3);
        assert_eq!(config.breaker_reset, Duration::from_millis(30_000));
        assert_eq!(config.idle_heartbeat, Duration::from_millis(8000));
    }

    #[test]
    fn test_default_phase_map_validates() {
        let map = PhaseConfigMap::default();
        assert!(map.validate().is_ok());
        for phase in ThinkingPhase::ALL {
            assert!(!map.get(phase).fallback_messages.is_empty());
        }
    }

    #[test]
    fn test_empty_fallback_list_is_rejected() {
        let mut map = PhaseConfigMap::default();
        map.set(
            ThinkingPhase::Styling,
            PhaseConfig {
                display_name: "Styling".to_string(),
                fallback_messages: Vec::new(),
                typical_duration: None,
            },
        );
        let err = map.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFallbackList("styling")));
    }

    #[test]
    fn test_status_api_config_trims_base_url() {
        let api = StatusApiConfig::new("https://example.test/api/v1/", "some/model", " key ");
        assert_eq!(api.base_url, "https://example.test/api/v1");
        assert_eq!(api.api_key, "key");
    }
}
