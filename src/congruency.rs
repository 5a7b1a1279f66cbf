//! # Congruency Analysis
//!
//! Compares a candidate's résumé against the role title and job description
//! to detect gross mismatch. Runs in the background on the orchestrator's
//! behalf and never blocks the live reply path.
//!
//! ## Modes:
//! - **Quick**: fired right after the greeting, on truncated inputs; only an
//!   extreme-incompatibility verdict above a very high confidence may end
//!   the interview
//! - **Full**: fired once the conversation has progressed; acts above a
//!   slightly lower but still high confidence, and still only when the
//!   extreme flag is set
//!
//! Ordinary mismatches never truncate the interview — the candidate is here
//! to practice. Analyzer errors fail open: the session continues as if the
//! check had passed.

use crate::llm::client::{CompletionClient, CompletionParams};
use crate::session::history::ChatMessage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Which scrutiny level a check runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Quick,
    Full,
}

/// Outcome of one congruency analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongruencyVerdict {
    pub is_congruent: bool,
    /// Analyzer's confidence in its own verdict, 0.0 to 1.0
    pub confidence: f32,
    /// Set only for gross mismatches (wrong field entirely, fabricated
    /// seniority), not ordinary skill gaps
    pub is_extremely_incompatible: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Confidence gates above which a verdict may end the interview. Kept
/// configurable; the defaults mirror the product's current values.
#[derive(Debug, Clone, Copy)]
pub struct CongruencyThresholds {
    pub quick_confidence: f32,
    pub full_confidence: f32,
}

impl Default for CongruencyThresholds {
    fn default() -> Self {
        Self {
            quick_confidence: 0.95,
            full_confidence: 0.85,
        }
    }
}

impl CongruencyThresholds {
    /// Whether a verdict is strong enough to end the interview for the mode
    /// it was produced under.
    pub fn demands_end(&self, mode: CheckMode, verdict: &CongruencyVerdict) -> bool {
        match mode {
            CheckMode::Quick => {
                verdict.is_extremely_incompatible && verdict.confidence > self.quick_confidence
            }
            CheckMode::Full => {
                !verdict.is_congruent
                    && verdict.is_extremely_incompatible
                    && verdict.confidence > self.full_confidence
            }
        }
    }
}

/// Contract the orchestrator depends on.
#[async_trait]
pub trait CongruencyAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        resume: &str,
        role_title: &str,
        job_description: &str,
        mode: CheckMode,
    ) -> Result<CongruencyVerdict>;
}

/// Analyzer backed by a single-shot LLM completion returning strict JSON.
pub struct LlmCongruencyAnalyzer {
    client: Arc<dyn CompletionClient>,
}

/// Quick mode trims inputs so the check returns before the first real
/// question; the full pass reads everything.
const QUICK_INPUT_LIMIT: usize = 1500;

impl LlmCongruencyAnalyzer {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    fn build_messages(
        resume: &str,
        role_title: &str,
        job_description: &str,
        mode: CheckMode,
    ) -> Vec<ChatMessage> {
        let (resume, job_description) = match mode {
            CheckMode::Quick => (
                truncate(resume, QUICK_INPUT_LIMIT),
                truncate(job_description, QUICK_INPUT_LIMIT),
            ),
            CheckMode::Full => (resume, job_description),
        };

        let system = "You assess whether a candidate's r\u{e9}sum\u{e9} is a plausible match \
                      for a job opening. Reply with strict JSON only, no prose, matching: \
                      {\"is_congruent\": bool, \"confidence\": number, \
                      \"is_extremely_incompatible\": bool, \"reasons\": [string]}. \
                      Set is_extremely_incompatible only for gross mismatches such as a \
                      completely unrelated field, never for ordinary skill gaps.";

        let user = format!(
            "Role title: {role_title}\n\nJob description:\n{job_description}\n\nR\u{e9}sum\u{e9}:\n{resume}"
        );

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parse the analyzer's reply, tolerating code fences around the JSON.
fn parse_verdict(reply: &str) -> Result<CongruencyVerdict> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| anyhow!("Unparseable congruency verdict: {}", e))
}

#[async_trait]
impl CongruencyAnalyzer for LlmCongruencyAnalyzer {
    async fn analyze(
        &self,
        resume: &str,
        role_title: &str,
        job_description: &str,
        mode: CheckMode,
    ) -> Result<CongruencyVerdict> {
        let messages = Self::build_messages(resume, role_title, job_description, mode);
        let params = CompletionParams {
            temperature: 0.0,
            max_tokens: 300,
        };

        let reply = self.client.complete(messages, params).await?;
        let verdict = parse_verdict(&reply)?;
        debug!(
            ?mode,
            is_congruent = verdict.is_congruent,
            confidence = verdict.confidence,
            extreme = verdict.is_extremely_incompatible,
            "Congruency verdict"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(congruent: bool, confidence: f32, extreme: bool) -> CongruencyVerdict {
        CongruencyVerdict {
            is_congruent: congruent,
            confidence,
            is_extremely_incompatible: extreme,
            reasons: vec![],
        }
    }

    #[test]
    fn test_quick_mode_requires_extreme_flag_and_very_high_confidence() {
        let thresholds = CongruencyThresholds::default();

        assert!(thresholds.demands_end(CheckMode::Quick, &verdict(false, 0.99, true)));
        // high confidence but not extreme: tolerated
        assert!(!thresholds.demands_end(CheckMode::Quick, &verdict(false, 0.99, false)));
        // extreme but at the threshold exactly: tolerated
        assert!(!thresholds.demands_end(CheckMode::Quick, &verdict(false, 0.95, true)));
    }

    #[test]
    fn test_full_mode_requires_all_three_conditions() {
        let thresholds = CongruencyThresholds::default();

        assert!(thresholds.demands_end(CheckMode::Full, &verdict(false, 0.9, true)));
        assert!(!thresholds.demands_end(CheckMode::Full, &verdict(true, 0.9, true)));
        assert!(!thresholds.demands_end(CheckMode::Full, &verdict(false, 0.9, false)));
        assert!(!thresholds.demands_end(CheckMode::Full, &verdict(false, 0.85, true)));
    }

    #[test]
    fn test_parse_verdict_plain_and_fenced() {
        let plain = r#"{"is_congruent": false, "confidence": 0.97, "is_extremely_incompatible": true, "reasons": ["unrelated field"]}"#;
        let parsed = parse_verdict(plain).unwrap();
        assert!(parsed.is_extremely_incompatible);
        assert_eq!(parsed.reasons.len(), 1);

        let fenced = format!("```json\n{}\n```", plain);
        assert!(parse_verdict(&fenced).unwrap().is_extremely_incompatible);
    }

    #[test]
    fn test_parse_verdict_rejects_prose() {
        assert!(parse_verdict("The candidate looks fine to me.").is_err());
    }

    #[test]
    fn test_quick_mode_truncates_inputs() {
        let resume = "r".repeat(5000);
        let messages =
            LlmCongruencyAnalyzer::build_messages(&resume, "Engineer", "jd", CheckMode::Quick);
        assert!(messages[1].content.len() < 2500);

        let full = LlmCongruencyAnalyzer::build_messages(&resume, "Engineer", "jd", CheckMode::Full);
        assert!(full[1].content.len() > 5000);
    }
}
