//! Rotating bank of canned status messages, one list per phase.
//!
//! Used whenever semantic status generation is skipped (breaker open,
//! back-pressure) or fails. Rotation is index-based, not randomized, so the
//! user sees each phrase once before any repeats.

use std::collections::HashMap;

use crate::config::PhaseConfigMap;
use crate::phase::ThinkingPhase;

/// Per-phase rotating message source. Owned by the engine's internal state,
/// so rotation indexes share the engine's single-writer discipline.
#[derive(Debug, Clone)]
pub struct FallbackBank {
    messages: HashMap<ThinkingPhase, Vec<String>>,
    cursors: HashMap<ThinkingPhase, usize>,
}

impl FallbackBank {
    /// Builds the bank from a phase table. The table must already have been
    /// validated — `next`/`peek` assume every list is non-empty.
    pub fn from_phase_config(phases: &PhaseConfigMap) -> Self {
        let mut messages = HashMap::new();
        let mut cursors = HashMap::new();
        for phase in ThinkingPhase::ALL {
            messages.insert(phase, phases.get(phase).fallback_messages.clone());
            cursors.insert(phase, 0usize);
        }
        Self { messages, cursors }
    }

    /// Returns the current message for `phase` and advances that phase's
    /// rotation cursor.
    pub fn next(&mut self, phase: ThinkingPhase) -> String {
        let list = &self.messages[&phase];
        let cursor = self.cursors.get_mut(&phase).expect("all phases present");
        let message = list[*cursor % list.len()].clone();
        *cursor += 1;
        message
    }

    /// Returns the first message for `phase` without touching the rotation
    /// cursor. Used by heartbeats: a keepalive is a repeat, not a new
    /// status.
    pub fn first(&self, phase: ThinkingPhase) -> &str {
        &self.messages[&phase][0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> FallbackBank {
        FallbackBank::from_phase_config(&PhaseConfigMap::default())
    }

    #[test]
    fn test_rotation_wraps() {
        let mut bank = bank();
        let list_len = 3; // analyzing has three defaults
        let first = bank.next(ThinkingPhase::Analyzing);
        for _ in 1..list_len {
            bank.next(ThinkingPhase::Analyzing);
        }
        let wrapped = bank.next(ThinkingPhase::Analyzing);
        assert_eq!(first, wrapped);
    }

    #[test]
    fn test_phases_rotate_independently() {
        let mut bank = bank();
        let a1 = bank.next(ThinkingPhase::Analyzing);
        let p1 = bank.next(ThinkingPhase::Planning);
        let a2 = bank.next(ThinkingPhase::Analyzing);
        assert_ne!(a1, a2);
        assert_ne!(a1, p1);
    }

    #[test]
    fn test_first_does_not_advance() {
        let mut bank = bank();
        let first = bank.first(ThinkingPhase::Implementing).to_string();
        assert_eq!(bank.next(ThinkingPhase::Implementing), first);
        // Rotation moved on, but `first` still reports the list head.
        assert_ne!(bank.next(ThinkingPhase::Implementing), first);
        assert_eq!(bank.first(ThinkingPhase::Implementing), first);
    }

    #[test]
    fn test_first_analyzing_message_is_the_opener() {
        let mut bank = bank();
        assert_eq!(
            bank.next(ThinkingPhase::Analyzing),
            "Analyzing your request..."
        );
    }
}
