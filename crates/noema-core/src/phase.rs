//! Thinking-phase classification over accumulated reasoning text.
//!
//! The detector is a pure keyword scorer: it never calls out to a model, so
//! it can run on every incoming chunk. Phase changes are deliberately
//! sticky — see [`detect_phase`].

use serde::{Deserialize, Serialize};

/// Coarse stage of artifact generation, ordered research → done.
///
/// Declaration order doubles as the tie-break order in [`detect_phase`]:
/// when two phases score equally, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingPhase {
    Analyzing,
    Planning,
    Implementing,
    Styling,
    Finalizing,
}

impl ThinkingPhase {
    /// All phases in declaration (tie-break) order.
    pub const ALL: [ThinkingPhase; 5] = [
        ThinkingPhase::Analyzing,
        ThinkingPhase::Planning,
        ThinkingPhase::Implementing,
        ThinkingPhase::Styling,
        ThinkingPhase::Finalizing,
    ];

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingPhase::Analyzing => "analyzing",
            ThinkingPhase::Planning => "planning",
            ThinkingPhase::Implementing => "implementing",
            ThinkingPhase::Styling => "styling",
            ThinkingPhase::Finalizing => "finalizing",
        }
    }

    /// Case-insensitive substring signals for this phase. Lists include
    /// common inflections ("build"/"building") so a strong single mention
    /// can clear the switch threshold on its own.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ThinkingPhase::Analyzing => &[
                "analyz",
                "understand",
                "examin",
                "requirement",
                "looking at",
                "the user wants",
            ],
            ThinkingPhase::Planning => &[
                "plan",
                "planning",
                "approach",
                "outline",
                "structur",
                "break down",
                "step",
            ],
            ThinkingPhase::Implementing => &[
                "implement",
                "build",
                "building",
                "creat",
                "writ",
                "code",
                "function",
                "component",
            ],
            ThinkingPhase::Styling => &[
                "styl",
                "styling",
                "css",
                "color",
                "layout",
                "font",
                "theme",
                "visual",
            ],
            ThinkingPhase::Finalizing => &[
                "finaliz",
                "finalizing",
                "finish",
                "complet",
                "wrap up",
                "clean up",
                "verify",
            ],
        }
    }
}

/// Minimum score before the detector will switch away from the current
/// phase. A single stray keyword must not cause the status line to flicker.
const SWITCH_THRESHOLD: usize = 2;

/// Maps accumulated reasoning text to the best-matching phase.
///
/// Every phase is scored by counting case-insensitive substring matches of
/// its keyword list. The highest scorer wins, with ties resolved by
/// declaration order, but the current phase is only abandoned when the
/// winner scores at least [`SWITCH_THRESHOLD`].
pub fn detect_phase(accumulated_text: &str, current_phase: ThinkingPhase) -> ThinkingPhase {
    let text = accumulated_text.to_lowercase();

    let mut best = current_phase;
    let mut best_score = 0usize;
    for phase in ThinkingPhase::ALL {
        let score: usize = phase
            .keywords()
            .iter()
            .map(|kw| text.matches(kw).count())
            .sum();
        // Strict comparison + declaration-order iteration = deterministic tie-break.
        if score > best_score {
            best = phase;
            best_score = score;
        }
    }

    if best != current_phase && best_score < SWITCH_THRESHOLD {
        return current_phase;
    }
    best
}
