//! # Session Metrics Accumulator
//!
//! Running counts for one live session: provider token usage, completed
//! turns, and whether the first agent utterance has been reported. The
//! accumulated values feed the interview recorder at finalization.

use serde::{Deserialize, Serialize};

/// Token counts reported by the completion provider for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Per-session running totals, owned by the session engine.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Completed assistant turns (greeting excluded)
    pub turns: u32,
    first_utterance_recorded: bool,
}

impl SessionMetrics {
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
    }

    pub fn record_turn(&mut self) {
        self.turns += 1;
    }

    /// Latch the first-utterance marker. Returns true only on the first
    /// call, so the caller reports latency exactly once.
    pub fn mark_first_utterance(&mut self) -> bool {
        if self.first_utterance_recorded {
            false
        } else {
            self.first_utterance_recorded = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let mut metrics = SessionMetrics::default();
        metrics.record_usage(&TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 40,
        });
        metrics.record_usage(&TokenUsage {
            prompt_tokens: 200,
            completion_tokens: 60,
        });

        assert_eq!(metrics.prompt_tokens, 320);
        assert_eq!(metrics.completion_tokens, 100);
    }

    #[test]
    fn test_first_utterance_latches_once() {
        let mut metrics = SessionMetrics::default();
        assert!(metrics.mark_first_utterance());
        assert!(!metrics.mark_first_utterance());
    }
}
