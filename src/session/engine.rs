//! # Session Engine
//!
//! The orchestrator core for one live call: an explicit phase machine with a
//! pure transition function. Every inbound protocol frame and every
//! background-task outcome becomes an [`Event`]; the engine mutates its own
//! session state and returns [`Effect`]s for the connection adapter to apply
//! (send a frame, start a completion, launch a check, write a record).
//!
//! The engine performs no I/O and never blocks, which makes every transition
//! testable without a live connection.
//!
//! ## Phases:
//! `AwaitingDetails → Greeted → Active → Ending` (terminal). The greeting is
//! always response sequence 0; the sequence is synchronized forward with the
//! platform's `response_id` and never decreases.
//!
//! ## Invariants:
//! - At most one completion request in flight (`processing` flag); a
//!   `response_required` arriving mid-flight is ignored, since the platform
//!   re-issues the event after any interruption
//! - The history is pruned to its bound before every completion request
//! - Finalization happens exactly once, whichever of end-call, close, or
//!   error comes first

use crate::config::AppConfig;
use crate::congruency::{CheckMode, CongruencyThresholds, CongruencyVerdict};
use crate::llm::prompt;
use crate::protocol::{
    DynamicVariables, EndReason, InboundFrame, InteractionType, OutboundFrame, SessionConfig,
};
use crate::recorder::{FinalizeRecord, SessionRecord};
use crate::session::history::{ChatMessage, ConversationHistory};
use crate::session::metrics::{SessionMetrics, TokenUsage};
use crate::session::timer::InterviewTimer;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connection open, waiting for call metadata
    AwaitingDetails,
    /// Greeting spoken, no candidate reply processed yet
    Greeted,
    /// Conversation underway
    Active,
    /// A closing message has been sent; terminal
    Ending,
}

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum Event {
    /// An inbound frame, with any registered call context already resolved
    /// by the adapter (the engine does not read the cache itself)
    Frame {
        frame: InboundFrame,
        context: Option<DynamicVariables>,
    },
    /// A streamed completion finished; `text` is the full reply
    CompletionFinished {
        response_id: u64,
        text: String,
        usage: Option<TokenUsage>,
    },
    /// Every completion attempt failed; the caller still needs to hear something
    CompletionFailed { response_id: u64 },
    /// A background congruency check returned
    Verdict {
        mode: CheckMode,
        verdict: CongruencyVerdict,
    },
    /// The connection closed or errored
    ConnectionClosed { error: bool },
}

/// Side effects for the adapter to apply, in order.
#[derive(Debug)]
pub enum Effect {
    Send(OutboundFrame),
    /// Start a streamed completion over this history snapshot
    BeginCompletion {
        response_id: u64,
        messages: Vec<ChatMessage>,
    },
    /// Launch a background congruency check
    RunCongruencyCheck {
        mode: CheckMode,
        resume: String,
        role_title: String,
        job_description: String,
    },
    /// Open the durable session record
    OpenRecord(SessionRecord),
    /// Report that the agent's first utterance went out
    RecordFirstUtterance { interview_id: String },
    /// Forward provider token usage
    RecordTokens {
        interview_id: String,
        usage: TokenUsage,
    },
    /// Close the durable record; emitted exactly once per session
    Finalize {
        interview_id: String,
        record: FinalizeRecord,
    },
}

/// Engine tunables, extracted from [`AppConfig`] at connection time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_duration_minutes: u64,
    pub warning_threshold_minutes: u64,
    pub max_reminders: u32,
    pub history_limit: usize,
    pub default_language: String,
    pub full_check_after_turns: u32,
    pub thresholds: CongruencyThresholds,
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_duration_minutes: config.interview.max_duration_minutes,
            warning_threshold_minutes: config.interview.warning_threshold_minutes,
            max_reminders: config.interview.max_reminders,
            history_limit: config.interview.history_limit,
            default_language: config.interview.default_language.clone(),
            full_check_after_turns: config.interview.full_check_after_turns,
            thresholds: config.congruency.thresholds(),
        }
    }
}

/// Per-connection orchestrator state machine.
pub struct SessionEngine {
    settings: EngineSettings,
    phase: Phase,
    call_id: Option<String>,
    language: String,
    profile: DynamicVariables,
    history: ConversationHistory,
    response_sequence: u64,
    has_greeted: bool,
    reminder_count: u32,
    /// Single in-flight completion guard
    processing: bool,
    quick_check_started: bool,
    /// Full check scheduled (runs at most once)
    congruency_checked: bool,
    /// Set by a verdict strong enough to end the interview
    should_end_interview: bool,
    warned_time_low: bool,
    user_turns: u32,
    timer: InterviewTimer,
    metrics: SessionMetrics,
    started_at: DateTime<Utc>,
    finalized: bool,
}

impl SessionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let timer = InterviewTimer::new(
            settings.max_duration_minutes,
            settings.warning_threshold_minutes,
        );
        Self::with_timer(settings, timer)
    }

    /// Construct with an explicit timer. Tests pass timers started in the
    /// past to exercise the warning and expiry paths.
    pub fn with_timer(settings: EngineSettings, timer: InterviewTimer) -> Self {
        let language = prompt::resolve_language(Some(&settings.default_language));
        let history = ConversationHistory::new(settings.history_limit);
        Self {
            settings,
            phase: Phase::AwaitingDetails,
            call_id: None,
            language,
            profile: DynamicVariables::default(),
            history,
            response_sequence: 0,
            has_greeted: false,
            reminder_count: 0,
            processing: false,
            quick_check_started: false,
            congruency_checked: false,
            should_end_interview: false,
            warned_time_low: false,
            user_turns: 0,
            timer,
            metrics: SessionMetrics::default(),
            started_at: Utc::now(),
            finalized: false,
        }
    }

    /// Effects for a freshly opened connection: the config frame goes out
    /// before any inbound event is processed.
    pub fn on_open(&self) -> Vec<Effect> {
        vec![Effect::Send(OutboundFrame::Config {
            config: SessionConfig {
                auto_reconnect: true,
                call_details: true,
            },
        })]
    }

    /// The transition function. Applies `event` to the session state and
    /// returns the effects to perform, in order.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Frame { frame, context } => self.handle_frame(frame, context),
            Event::CompletionFinished {
                response_id,
                text,
                usage,
            } => self.on_completion_finished(response_id, text, usage),
            Event::CompletionFailed { response_id } => self.on_completion_failed(response_id),
            Event::Verdict { mode, verdict } => self.on_verdict(mode, verdict),
            Event::ConnectionClosed { error } => self.on_connection_closed(error),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn timer(&self) -> &InterviewTimer {
        &self.timer
    }

    /// Key under which this session is recorded: the product's interview id
    /// when registered, otherwise the platform call id.
    pub fn interview_key(&self) -> String {
        self.profile
            .interview_id
            .clone()
            .or_else(|| self.call_id.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn handle_frame(
        &mut self,
        frame: InboundFrame,
        context: Option<DynamicVariables>,
    ) -> Vec<Effect> {
        self.note_call_id(frame.call_id.clone());

        match frame.interaction_type {
            InteractionType::CallDetails | InteractionType::CallStarted => {
                self.on_call_details(frame, context)
            }
            InteractionType::ResponseRequired => self.on_response_required(frame),
            InteractionType::ReminderRequired => self.on_reminder_required(frame),
            InteractionType::PingPong => vec![Effect::Send(OutboundFrame::PingPong {
                timestamp: frame.timestamp.unwrap_or(0),
            })],
            InteractionType::UpdateOnly => {
                // history is rebuilt from response_required transcripts;
                // transcript-only updates carry nothing the session needs
                debug!(call_id = ?self.call_id, "update_only frame ignored");
                vec![]
            }
        }
    }

    /// The call id is discovered from whichever event carries it first and
    /// immutable afterwards.
    fn note_call_id(&mut self, call_id: Option<String>) {
        if self.call_id.is_none() {
            if let Some(id) = call_id {
                self.call_id = Some(id);
            }
        }
    }

    fn on_call_details(
        &mut self,
        frame: InboundFrame,
        context: Option<DynamicVariables>,
    ) -> Vec<Effect> {
        let platform = frame.dynamic_variables();
        let context = context.unwrap_or_default();

        // Live platform fields win where both sides have a value, except
        // language: the platform is not authoritative for it, so the
        // registration-time value takes precedence.
        let context_language = context.preferred_language.clone();
        let mut merged = platform.or(context);
        if context_language.is_some() {
            merged.preferred_language = context_language;
        }

        self.language = prompt::resolve_language(
            merged
                .preferred_language
                .as_deref()
                .or(Some(&self.settings.default_language)),
        );
        self.profile = merged;

        info!(
            call_id = ?self.call_id,
            language = %self.language,
            role = ?self.profile.job_title,
            "Call details merged"
        );

        if self.has_greeted {
            // reconnect or duplicate details event; the profile refresh above
            // is all that is needed
            return vec![];
        }

        self.greet()
    }

    /// Build the system prompt, speak the greeting as sequence 0, open the
    /// durable record, and kick off the quick congruency check when the
    /// inputs for it exist. The check must never delay the greeting, so it
    /// is returned as a background effect after the send.
    fn greet(&mut self) -> Vec<Effect> {
        let system = prompt::system_prompt(
            &self.language,
            &self.profile,
            self.settings.max_duration_minutes,
        );
        self.history.push(ChatMessage::system(system));

        let greeting = prompt::greeting(&self.language, &self.profile);
        self.history.push(ChatMessage::assistant(greeting.clone()));

        let mut effects = vec![Effect::Send(OutboundFrame::complete(
            self.response_sequence,
            greeting,
        ))];
        self.has_greeted = true;
        self.phase = Phase::Greeted;
        self.response_sequence += 1;

        effects.push(Effect::OpenRecord(self.session_record()));
        if self.metrics.mark_first_utterance() {
            effects.push(Effect::RecordFirstUtterance {
                interview_id: self.interview_key(),
            });
        }

        if let Some(check) = self.quick_check_effect() {
            effects.push(check);
        }

        effects
    }

    fn quick_check_effect(&mut self) -> Option<Effect> {
        if self.quick_check_started {
            return None;
        }
        let (Some(resume), Some(role)) = (
            self.profile.interviewee_cv.clone(),
            self.profile.job_title.clone(),
        ) else {
            return None;
        };

        self.quick_check_started = true;
        Some(Effect::RunCongruencyCheck {
            mode: CheckMode::Quick,
            resume,
            role_title: role,
            job_description: self.profile.job_description.clone().unwrap_or_default(),
        })
    }

    fn on_response_required(&mut self, frame: InboundFrame) -> Vec<Effect> {
        if !self.has_greeted {
            // defensive path for platforms that skip the details event: the
            // greeting still goes out, still as sequence 0
            warn!(call_id = ?self.call_id, "response_required before call details; greeting now");
            let effects = self.greet();
            // whatever the caller already said is part of the conversation
            if let Some(utterance) = frame.last_user_utterance() {
                self.history.push(ChatMessage::user(utterance));
                self.user_turns += 1;
            }
            return effects;
        }

        if self.phase == Phase::Ending {
            debug!(call_id = ?self.call_id, "response_required after ending; dropped");
            return vec![];
        }

        if let Some(response_id) = frame.response_id {
            self.response_sequence = self.response_sequence.max(response_id);
        }

        if self.timer.is_expired() {
            info!(
                call_id = ?self.call_id,
                elapsed = %self.timer.formatted_elapsed(),
                "Session duration reached; ending call"
            );
            return self.end_call(EndReason::TimeExceeded, prompt::time_exceeded_closing(&self.language));
        }

        if self.timer.in_warning_window() && !self.warned_time_low {
            self.warned_time_low = true;
            let warning = prompt::time_warning(&self.language, self.timer.minutes_remaining());
            self.history.push(ChatMessage::assistant(warning.clone()));
            let effect = Effect::Send(OutboundFrame::complete(self.response_sequence, warning));
            self.response_sequence += 1;
            return vec![effect];
        }

        if self.processing {
            // the platform re-issues response_required after interruptions;
            // a second completion would race this one into the history
            warn!(call_id = ?self.call_id, "Completion already in flight; event ignored");
            return vec![];
        }

        if let Some(utterance) = frame.last_user_utterance() {
            self.history.push(ChatMessage::user(utterance));
            self.user_turns += 1;
        }
        self.reminder_count = 0;
        self.phase = Phase::Active;

        if self.should_end_interview {
            info!(call_id = ?self.call_id, "Congruency verdict demands end; closing gracefully");
            let closing = prompt::incompatibility_closing(&self.language, &self.profile);
            return self.end_call(EndReason::Incompatibility, closing);
        }

        let mut effects = Vec::new();
        if let Some(check) = self.full_check_effect() {
            effects.push(check);
        }

        self.processing = true;
        self.history.prune();
        effects.push(Effect::BeginCompletion {
            response_id: self.response_sequence,
            messages: self.history.snapshot(),
        });
        effects
    }

    fn full_check_effect(&mut self) -> Option<Effect> {
        if self.congruency_checked || self.user_turns < self.settings.full_check_after_turns {
            return None;
        }
        let (Some(resume), Some(role)) = (
            self.profile.interviewee_cv.clone(),
            self.profile.job_title.clone(),
        ) else {
            // nothing to compare; never check again this session
            self.congruency_checked = true;
            return None;
        };

        self.congruency_checked = true;
        Some(Effect::RunCongruencyCheck {
            mode: CheckMode::Full,
            resume,
            role_title: role,
            job_description: self.profile.job_description.clone().unwrap_or_default(),
        })
    }

    fn on_reminder_required(&mut self, frame: InboundFrame) -> Vec<Effect> {
        if self.phase == Phase::Ending {
            return vec![];
        }
        if let Some(response_id) = frame.response_id {
            self.response_sequence = self.response_sequence.max(response_id);
        }

        self.reminder_count += 1;
        if self.reminder_count >= self.settings.max_reminders {
            info!(
                call_id = ?self.call_id,
                reminders = self.reminder_count,
                "Reminder budget exhausted; ending call"
            );
            return self.end_call(
                EndReason::SilenceTimeout,
                prompt::silence_farewell(&self.language),
            );
        }

        let nudge = prompt::reminder_nudge(&self.language, self.reminder_count);
        self.history.push(ChatMessage::assistant(nudge.clone()));
        let effect = Effect::Send(OutboundFrame::complete(self.response_sequence, nudge));
        self.response_sequence += 1;
        vec![effect]
    }

    fn on_completion_finished(
        &mut self,
        response_id: u64,
        text: String,
        usage: Option<TokenUsage>,
    ) -> Vec<Effect> {
        self.processing = false;
        if !text.is_empty() {
            self.history.push(ChatMessage::assistant(text));
        }
        self.metrics.record_turn();
        self.response_sequence = self.response_sequence.max(response_id) + 1;
        if self.phase == Phase::Greeted {
            self.phase = Phase::Active;
        }

        match usage {
            Some(usage) => {
                self.metrics.record_usage(&usage);
                vec![Effect::RecordTokens {
                    interview_id: self.interview_key(),
                    usage,
                }]
            }
            None => vec![],
        }
    }

    /// Every attempt failed: speak the fixed apology so the caller is never
    /// met with silence.
    fn on_completion_failed(&mut self, response_id: u64) -> Vec<Effect> {
        self.processing = false;
        if self.phase == Phase::Ending {
            // the closing message already went out; nothing to apologize for
            return vec![];
        }
        self.response_sequence = self.response_sequence.max(response_id);

        let apology = prompt::fallback_apology(&self.language);
        self.history.push(ChatMessage::assistant(apology.clone()));
        let effect = Effect::Send(OutboundFrame::complete(self.response_sequence, apology));
        self.response_sequence += 1;
        vec![effect]
    }

    fn on_verdict(&mut self, mode: CheckMode, verdict: CongruencyVerdict) -> Vec<Effect> {
        let demands_end = self.settings.thresholds.demands_end(mode, &verdict);
        info!(
            call_id = ?self.call_id,
            ?mode,
            is_congruent = verdict.is_congruent,
            confidence = verdict.confidence,
            extreme = verdict.is_extremely_incompatible,
            demands_end,
            "Congruency verdict received"
        );
        if demands_end {
            // acted on at the next response_required; the caller is never
            // cut off mid-utterance
            self.should_end_interview = true;
        }
        vec![]
    }

    fn on_connection_closed(&mut self, error: bool) -> Vec<Effect> {
        let reason = if error {
            EndReason::Error
        } else {
            EndReason::Completed
        };
        self.phase = Phase::Ending;
        match self.finalize_effect(reason) {
            Some(effect) => vec![effect],
            None => vec![],
        }
    }

    /// Speak a closing message and finalize. Used for every server-decided
    /// termination; the platform is asked to disconnect only after the
    /// message is spoken.
    fn end_call(&mut self, reason: EndReason, closing: String) -> Vec<Effect> {
        self.phase = Phase::Ending;
        let send = Effect::Send(OutboundFrame::ending(
            self.response_sequence,
            closing,
            reason,
        ));
        self.response_sequence += 1;

        match self.finalize_effect(reason) {
            Some(finalize) => vec![send, finalize],
            None => vec![send],
        }
    }

    fn finalize_effect(&mut self, reason: EndReason) -> Option<Effect> {
        if self.finalized {
            return None;
        }
        self.finalized = true;

        let elapsed = self.timer.elapsed().as_secs();
        let max_secs = self.settings.max_duration_minutes * 60;
        let completion_rate = if max_secs == 0 {
            1.0
        } else {
            (elapsed as f32 / max_secs as f32).min(1.0)
        };

        info!(
            call_id = ?self.call_id,
            reason = reason.as_str(),
            elapsed = %self.timer.formatted_elapsed(),
            turns = self.metrics.turns,
            "Session finalized"
        );

        Some(Effect::Finalize {
            interview_id: self.interview_key(),
            record: FinalizeRecord {
                end_reason: reason,
                completion_rate,
                duration_seconds: elapsed,
                prompt_tokens: self.metrics.prompt_tokens,
                completion_tokens: self.metrics.completion_tokens,
                turns: self.metrics.turns,
            },
        })
    }

    fn session_record(&self) -> SessionRecord {
        SessionRecord {
            interview_id: self.profile.interview_id.clone(),
            call_id: self.call_id.clone().unwrap_or_else(|| "unknown".to_string()),
            candidate_name: self.profile.first_name.clone(),
            role_title: self.profile.job_title.clone(),
            company_name: self.profile.company_name.clone(),
            language: self.language.clone(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn settings() -> EngineSettings {
        EngineSettings {
            max_duration_minutes: 15,
            warning_threshold_minutes: 2,
            max_reminders: 3,
            history_limit: 10,
            default_language: "en".to_string(),
            full_check_after_turns: 4,
            thresholds: CongruencyThresholds::default(),
        }
    }

    fn engine() -> SessionEngine {
        SessionEngine::new(settings())
    }

    fn engine_with_elapsed(elapsed_secs: u64) -> SessionEngine {
        let timer = InterviewTimer::starting_at(
            Instant::now() - Duration::from_secs(elapsed_secs),
            15,
            2,
        );
        SessionEngine::with_timer(settings(), timer)
    }

    fn frame(interaction_type: InteractionType) -> InboundFrame {
        InboundFrame {
            interaction_type,
            call_id: Some("call_1".to_string()),
            response_id: None,
            transcript: vec![],
            timestamp: None,
            retell_llm_dynamic_variables: None,
            metadata: None,
        }
    }

    fn call_details(resume: Option<&str>) -> Event {
        let mut details = frame(InteractionType::CallDetails);
        details.retell_llm_dynamic_variables = Some(DynamicVariables {
            first_name: Some("Dana".to_string()),
            job_title: Some("Backend Engineer".to_string()),
            interviewee_cv: resume.map(str::to_string),
            job_description: Some("Build reliable services.".to_string()),
            ..Default::default()
        });
        Event::Frame {
            frame: details,
            context: None,
        }
    }

    fn response_required(response_id: u64, utterance: &str) -> Event {
        let mut f = frame(InteractionType::ResponseRequired);
        f.response_id = Some(response_id);
        f.transcript = vec![crate::protocol::TranscriptTurn {
            role: crate::protocol::SpeakerRole::User,
            content: utterance.to_string(),
            timestamp: None,
        }];
        Event::Frame {
            frame: f,
            context: None,
        }
    }

    fn reminder(response_id: u64) -> Event {
        let mut f = frame(InteractionType::ReminderRequired);
        f.response_id = Some(response_id);
        Event::Frame {
            frame: f,
            context: None,
        }
    }

    fn sent_frames(effects: &[Effect]) -> Vec<&OutboundFrame> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn has_completion(effects: &[Effect]) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::BeginCompletion { .. }))
    }

    fn end_reason_of(frame: &OutboundFrame) -> Option<EndReason> {
        match frame {
            OutboundFrame::Response {
                end_call: true,
                end_call_reason,
                ..
            } => *end_call_reason,
            _ => None,
        }
    }

    #[test]
    fn test_on_open_sends_config_frame_first() {
        let effects = engine().on_open();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Send(OutboundFrame::Config { config }) => {
                assert!(config.auto_reconnect);
                assert!(config.call_details);
            }
            other => panic!("expected config frame, got {:?}", other),
        }
    }

    #[test]
    fn test_call_details_without_resume_greets_without_check() {
        let mut engine = engine();
        let effects = engine.handle(call_details(None));

        let frames = sent_frames(&effects);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            OutboundFrame::Response {
                response_id,
                content_complete,
                ..
            } => {
                // greeting is always sequence 0
                assert_eq!(*response_id, 0);
                assert!(content_complete);
            }
            other => panic!("expected response frame, got {:?}", other),
        }
        assert!(engine.has_greeted);
        // no résumé means no background check is scheduled
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::RunCongruencyCheck { .. })));
        // durable record opened, first utterance reported
        assert!(effects.iter().any(|e| matches!(e, Effect::OpenRecord(_))));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::RecordFirstUtterance { .. })));
    }

    #[test]
    fn test_call_details_with_resume_schedules_quick_check() {
        let mut engine = engine();
        let effects = engine.handle(call_details(Some("Ten years of Rust.")));

        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::RunCongruencyCheck {
                mode: CheckMode::Quick,
                ..
            }
        )));
    }

    #[test]
    fn test_duplicate_call_details_does_not_greet_twice() {
        let mut engine = engine();
        engine.handle(call_details(None));
        let effects = engine.handle(call_details(None));
        assert!(sent_frames(&effects).is_empty());
    }

    #[test]
    fn test_context_language_beats_platform_language() {
        let mut engine = engine();
        let mut details = frame(InteractionType::CallDetails);
        details.retell_llm_dynamic_variables = Some(DynamicVariables {
            preferred_language: Some("en".to_string()),
            ..Default::default()
        });
        engine.handle(Event::Frame {
            frame: details,
            context: Some(DynamicVariables {
                preferred_language: Some("es".to_string()),
                ..Default::default()
            }),
        });
        assert_eq!(engine.language, "es");
    }

    #[test]
    fn test_response_required_before_details_greets_defensively() {
        let mut engine = engine();
        let effects = engine.handle(response_required(0, "Hello?"));

        let frames = sent_frames(&effects);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            OutboundFrame::Response { response_id, .. } => assert_eq!(*response_id, 0),
            other => panic!("expected response frame, got {:?}", other),
        }
        assert!(engine.has_greeted);
    }

    #[test]
    fn test_normal_turn_streams_a_completion() {
        let mut engine = engine();
        engine.handle(call_details(None));
        let effects = engine.handle(response_required(1, "I worked on billing."));

        assert!(has_completion(&effects));
        match effects
            .iter()
            .find(|e| matches!(e, Effect::BeginCompletion { .. }))
            .unwrap()
        {
            Effect::BeginCompletion {
                response_id,
                messages,
            } => {
                assert_eq!(*response_id, 1);
                // system prompt, greeting, user turn
                assert_eq!(messages.len(), 3);
            }
            _ => unreachable!(),
        }
        assert!(engine.processing);
    }

    #[test]
    fn test_second_response_required_while_processing_is_ignored() {
        let mut engine = engine();
        engine.handle(call_details(None));
        let first = engine.handle(response_required(1, "First answer."));
        assert!(has_completion(&first));

        let second = engine.handle(response_required(2, "Echoed answer."));
        assert!(second.is_empty());
        assert!(!has_completion(&second));
    }

    #[test]
    fn test_completion_finished_appends_turn_and_advances_sequence() {
        let mut engine = engine();
        engine.handle(call_details(None));
        engine.handle(response_required(1, "First answer."));

        let effects = engine.handle(Event::CompletionFinished {
            response_id: 1,
            text: "Tell me more about that.".to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: 300,
                completion_tokens: 20,
            }),
        });

        assert!(!engine.processing);
        assert_eq!(engine.response_sequence, 2);
        assert_eq!(engine.phase, Phase::Active);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::RecordTokens { .. })));
        // next turn is accepted again
        let next = engine.handle(response_required(2, "Sure."));
        assert!(has_completion(&next));
    }

    #[test]
    fn test_response_sequence_never_decreases() {
        let mut engine = engine();
        let mut last = 0u64;
        engine.handle(call_details(None));

        for (id, text) in [(1, "a"), (5, "b"), (3, "c")] {
            engine.handle(response_required(id, text));
            engine.handle(Event::CompletionFinished {
                response_id: id,
                text: "ok".to_string(),
                usage: None,
            });
            assert!(engine.response_sequence >= last);
            last = engine.response_sequence;
        }
        // stale response_id 3 must not wind the sequence back
        assert!(engine.response_sequence >= 6);
    }

    #[test]
    fn test_completion_failure_sends_fallback_apology() {
        let mut engine = engine();
        engine.handle(call_details(None));
        engine.handle(response_required(1, "Answer."));

        let effects = engine.handle(Event::CompletionFailed { response_id: 1 });
        let frames = sent_frames(&effects);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            OutboundFrame::Response {
                content,
                content_complete,
                end_call,
                ..
            } => {
                assert!(content_complete);
                assert!(!end_call);
                assert!(content.contains("repeat"));
            }
            other => panic!("expected response frame, got {:?}", other),
        }
        assert!(!engine.processing);
    }

    #[test]
    fn test_history_is_bounded_before_every_completion() {
        let mut engine = engine();
        engine.handle(call_details(None));

        for turn in 0..30 {
            let id = (turn + 1) as u64;
            let effects = engine.handle(response_required(id, "answer"));
            if let Some(Effect::BeginCompletion { messages, .. }) = effects
                .iter()
                .find(|e| matches!(e, Effect::BeginCompletion { .. }))
            {
                assert!(messages.len() <= 10);
                assert_eq!(messages[0].role, crate::session::history::ChatRole::System);
            }
            engine.handle(Event::CompletionFinished {
                response_id: id,
                text: "next question".to_string(),
                usage: None,
            });
        }
    }

    #[test]
    fn test_timer_warning_fires_once_then_resumes_completions() {
        let mut engine = engine_with_elapsed(14 * 60);
        engine.handle(call_details(None));

        let warned = engine.handle(response_required(1, "Answer."));
        assert!(!has_completion(&warned));
        let frames = sent_frames(&warned);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            OutboundFrame::Response {
                content, end_call, ..
            } => {
                assert!(content.contains("minute"));
                assert!(!end_call);
            }
            other => panic!("expected warning response, got {:?}", other),
        }

        // the warning fired once; the next turn gets a completion again
        let next = engine.handle(response_required(2, "Okay."));
        assert!(has_completion(&next));
    }

    #[test]
    fn test_expired_timer_ends_call_before_any_completion() {
        let mut engine = engine_with_elapsed(15 * 60);
        engine.handle(call_details(None));

        let effects = engine.handle(response_required(1, "Answer."));
        assert!(!has_completion(&effects));

        let frames = sent_frames(&effects);
        assert_eq!(end_reason_of(frames[0]), Some(EndReason::TimeExceeded));
        assert!(effects.iter().any(|e| matches!(e, Effect::Finalize { .. })));
    }

    #[test]
    fn test_reminder_budget_nudges_then_ends_with_silence_reason() {
        let mut engine = engine();
        engine.handle(call_details(None));

        for expected_count in 1..=2u32 {
            let effects = engine.handle(reminder(expected_count as u64));
            let frames = sent_frames(&effects);
            assert_eq!(frames.len(), 1);
            assert_eq!(end_reason_of(frames[0]), None, "nudge must not end call");
        }

        let effects = engine.handle(reminder(3));
        let frames = sent_frames(&effects);
        assert_eq!(end_reason_of(frames[0]), Some(EndReason::SilenceTimeout));
        assert!(effects.iter().any(|e| matches!(e, Effect::Finalize { .. })));
    }

    #[test]
    fn test_user_reply_resets_reminder_count() {
        let mut engine = engine();
        engine.handle(call_details(None));
        engine.handle(reminder(1));
        engine.handle(reminder(2));

        engine.handle(response_required(3, "Sorry, I'm back."));
        assert_eq!(engine.reminder_count, 0);
    }

    #[test]
    fn test_extreme_quick_verdict_ends_next_turn_without_completion() {
        let mut engine = engine();
        engine.handle(call_details(Some("Pastry chef for ten years.")));

        engine.handle(Event::Verdict {
            mode: CheckMode::Quick,
            verdict: CongruencyVerdict {
                is_congruent: false,
                confidence: 0.99,
                is_extremely_incompatible: true,
                reasons: vec!["unrelated field".to_string()],
            },
        });

        let effects = engine.handle(response_required(1, "Ready for questions."));
        assert!(!has_completion(&effects));
        let frames = sent_frames(&effects);
        assert_eq!(end_reason_of(frames[0]), Some(EndReason::Incompatibility));
    }

    #[test]
    fn test_ordinary_mismatch_is_tolerated() {
        let mut engine = engine();
        engine.handle(call_details(Some("Some résumé.")));

        // extreme flag but confidence at the threshold: tolerated
        engine.handle(Event::Verdict {
            mode: CheckMode::Quick,
            verdict: CongruencyVerdict {
                is_congruent: false,
                confidence: 0.95,
                is_extremely_incompatible: true,
                reasons: vec![],
            },
        });

        let effects = engine.handle(response_required(1, "Answer."));
        assert!(has_completion(&effects));
    }

    #[test]
    fn test_full_check_scheduled_once_after_enough_turns() {
        let mut engine = engine();
        engine.handle(call_details(Some("Résumé text.")));

        let mut full_checks = 0;
        for turn in 0..8u64 {
            let effects = engine.handle(response_required(turn + 1, "answer"));
            full_checks += effects
                .iter()
                .filter(|e| {
                    matches!(
                        e,
                        Effect::RunCongruencyCheck {
                            mode: CheckMode::Full,
                            ..
                        }
                    )
                })
                .count();
            engine.handle(Event::CompletionFinished {
                response_id: turn + 1,
                text: "ok".to_string(),
                usage: None,
            });
        }
        assert_eq!(full_checks, 1);
    }

    #[test]
    fn test_ping_pong_echoes_without_state_change() {
        let mut engine = engine();
        engine.handle(call_details(None));
        let sequence_before = engine.response_sequence;

        let mut f = frame(InteractionType::PingPong);
        f.timestamp = Some(1712000000);
        let effects = engine.handle(Event::Frame {
            frame: f,
            context: None,
        });

        match &effects[..] {
            [Effect::Send(OutboundFrame::PingPong { timestamp })] => {
                assert_eq!(*timestamp, 1712000000);
            }
            other => panic!("expected ping_pong echo, got {:?}", other),
        }
        assert_eq!(engine.response_sequence, sequence_before);
    }

    #[test]
    fn test_connection_close_finalizes_once_with_normal_reason() {
        let mut engine = engine();
        engine.handle(call_details(None));

        let effects = engine.handle(Event::ConnectionClosed { error: false });
        match &effects[..] {
            [Effect::Finalize { record, .. }] => {
                assert_eq!(record.end_reason, EndReason::Completed);
            }
            other => panic!("expected finalize, got {:?}", other),
        }

        // a second close produces nothing
        assert!(engine
            .handle(Event::ConnectionClosed { error: true })
            .is_empty());
    }

    #[test]
    fn test_close_after_server_ending_does_not_finalize_again() {
        let mut engine = engine_with_elapsed(16 * 60);
        engine.handle(call_details(None));
        let ended = engine.handle(response_required(1, "Answer."));
        assert!(ended.iter().any(|e| matches!(e, Effect::Finalize { .. })));

        let effects = engine.handle(Event::ConnectionClosed { error: false });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_finalize_reports_completion_rate_capped_at_one() {
        let mut engine = engine_with_elapsed(20 * 60);
        engine.handle(call_details(None));
        let effects = engine.handle(Event::ConnectionClosed { error: true });
        match &effects[..] {
            [Effect::Finalize { record, .. }] => {
                assert_eq!(record.end_reason, EndReason::Error);
                assert!((record.completion_rate - 1.0).abs() < f32::EPSILON);
            }
            other => panic!("expected finalize, got {:?}", other),
        }
    }
}
