//! # Call Protocol Frames
//!
//! Wire types for the voice platform's custom-LLM call protocol. The platform
//! opens one WebSocket per live call and exchanges JSON frames with this
//! server.
//!
//! ## Frame Flow:
//! 1. **Connection**: Platform connects to `/ws/interview/{call_id}`
//! 2. **Config**: Server immediately sends a `config` frame (auto reconnect,
//!    request call details)
//! 3. **Call details**: Platform sends `call_details` (or the older
//!    `call_started`) with per-call dynamic variables
//! 4. **Turns**: `response_required` / `reminder_required` events ask the
//!    server to speak; the server streams `response` frames back
//! 5. **Keep-alive**: `ping_pong` frames are echoed verbatim
//!
//! ## Message Format:
//! - **Platform → Server**: JSON with an `interaction_type` discriminant
//! - **Server → Platform**: JSON with a `response_type` discriminant

use serde::{Deserialize, Serialize};

/// Category of an inbound protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Call metadata delivered after the config frame requests it
    CallDetails,
    /// Older protocol variant of `call_details`; handled identically
    CallStarted,
    /// Transcript-only update; no reply expected
    UpdateOnly,
    /// The caller spoke and a reply is owed
    ResponseRequired,
    /// The caller has been silent past the platform's reminder threshold
    ReminderRequired,
    /// Keep-alive probe; must be echoed immediately
    PingPong,
}

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    Agent,
    User,
}

/// One utterance in the running call transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: SpeakerRole,
    pub content: String,
    /// Platform-side capture time (epoch millis); absent on older protocol versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Free-form per-call fields forwarded by the platform.
///
/// The platform is not a reliable carrier for these (fields are dropped on
/// some call paths), which is why the call context cache exists. Every field
/// is optional; merging rules live in the session engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicVariables {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interviewee_cv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<String>,
}

impl DynamicVariables {
    /// Fill any absent field from `fallback`, consuming both.
    pub fn or(self, fallback: DynamicVariables) -> DynamicVariables {
        DynamicVariables {
            first_name: self.first_name.or(fallback.first_name),
            job_title: self.job_title.or(fallback.job_title),
            company_name: self.company_name.or(fallback.company_name),
            job_description: self.job_description.or(fallback.job_description),
            interviewee_cv: self.interviewee_cv.or(fallback.interviewee_cv),
            preferred_language: self.preferred_language.or(fallback.preferred_language),
            interview_id: self.interview_id.or(fallback.interview_id),
        }
    }
}

/// An inbound JSON frame from the platform.
///
/// All fields beyond `interaction_type` are optional on the wire; which ones
/// are populated depends on the event. `retell_llm_dynamic_variables` is the
/// current field name for per-call variables, `metadata` the legacy one —
/// both are accepted and merged.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub response_id: Option<u64>,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    /// Keep-alive timestamp, present on `ping_pong`
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub retell_llm_dynamic_variables: Option<DynamicVariables>,
    #[serde(default)]
    pub metadata: Option<DynamicVariables>,
}

impl InboundFrame {
    /// Merged view of the two variable-carrying fields; the newer
    /// `retell_llm_dynamic_variables` wins per field.
    pub fn dynamic_variables(&self) -> DynamicVariables {
        let primary = self.retell_llm_dynamic_variables.clone().unwrap_or_default();
        let legacy = self.metadata.clone().unwrap_or_default();
        primary.or(legacy)
    }

    /// Most recent caller utterance in the transcript, if any.
    pub fn last_user_utterance(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|turn| turn.role == SpeakerRole::User)
            .map(|turn| turn.content.as_str())
    }
}

/// Why a call was ended by this server. Serialized into `end_call_reason`
/// and into the finalized interview record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Connection closed normally without the server forcing an end
    Completed,
    /// Hard session duration reached
    TimeExceeded,
    /// Reminder budget exhausted without the caller speaking
    SilenceTimeout,
    /// Congruency verdict flagged an extreme résumé/role mismatch
    Incompatibility,
    /// Connection-level failure
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::TimeExceeded => "time_exceeded",
            EndReason::SilenceTimeout => "silence_timeout",
            EndReason::Incompatibility => "incompatibility",
            EndReason::Error => "error",
        }
    }
}

/// Config payload sent as the first outbound frame on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ask the platform to transparently re-establish a dropped socket
    pub auto_reconnect: bool,
    /// Ask the platform to send a `call_details` event
    pub call_details: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An outbound JSON frame to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Connection-level options; sent once, before any inbound event
    Config { config: SessionConfig },

    /// A (possibly partial) spoken reply correlated to an inbound event
    Response {
        response_id: u64,
        content: String,
        content_complete: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        end_call: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        end_call_after_spoken: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        no_interruption_allowed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_call_reason: Option<EndReason>,
    },

    /// Unprompted agent speech. Part of the wire contract; this server never
    /// emits it — terminations always ride on a pending `response`.
    AgentInterrupt {
        content: String,
        content_complete: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        no_interruption_allowed: bool,
    },

    /// Keep-alive echo
    PingPong { timestamp: u64 },
}

impl OutboundFrame {
    /// A streaming chunk of an in-progress reply.
    pub fn partial(response_id: u64, content: impl Into<String>) -> Self {
        OutboundFrame::Response {
            response_id,
            content: content.into(),
            content_complete: false,
            end_call: false,
            end_call_after_spoken: false,
            no_interruption_allowed: false,
            end_call_reason: None,
        }
    }

    /// A finished reply that keeps the call going.
    pub fn complete(response_id: u64, content: impl Into<String>) -> Self {
        OutboundFrame::Response {
            response_id,
            content: content.into(),
            content_complete: true,
            end_call: false,
            end_call_after_spoken: false,
            no_interruption_allowed: false,
            end_call_reason: None,
        }
    }

    /// A closing message. The platform is asked to wait until it is fully
    /// spoken before disconnecting, with interruption disabled.
    pub fn ending(response_id: u64, content: impl Into<String>, reason: EndReason) -> Self {
        OutboundFrame::Response {
            response_id,
            content: content.into(),
            content_complete: true,
            end_call: true,
            end_call_after_spoken: true,
            no_interruption_allowed: true,
            end_call_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_details_frame() {
        let json = r#"{
            "interaction_type": "call_details",
            "call_id": "call_abc123",
            "retell_llm_dynamic_variables": {
                "first_name": "Dana",
                "job_title": "Backend Engineer",
                "preferred_language": "es"
            },
            "metadata": {
                "company_name": "Acme",
                "job_title": "ignored by merge"
            }
        }"#;

        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.interaction_type, InteractionType::CallDetails);
        assert_eq!(frame.call_id.as_deref(), Some("call_abc123"));

        let vars = frame.dynamic_variables();
        assert_eq!(vars.first_name.as_deref(), Some("Dana"));
        // retell_llm_dynamic_variables wins over legacy metadata per field
        assert_eq!(vars.job_title.as_deref(), Some("Backend Engineer"));
        // absent fields fall back to metadata
        assert_eq!(vars.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_parse_response_required_frame() {
        let json = r#"{
            "interaction_type": "response_required",
            "response_id": 3,
            "transcript": [
                {"role": "agent", "content": "Tell me about a project."},
                {"role": "user", "content": "I built a billing service."},
                {"role": "agent", "content": "Go on."},
                {"role": "user", "content": "It handled retries."}
            ]
        }"#;

        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.response_id, Some(3));
        assert_eq!(frame.last_user_utterance(), Some("It handled retries."));
    }

    #[test]
    fn test_partial_response_omits_end_call_fields() {
        let frame = OutboundFrame::partial(2, "Let me think");
        let json = serde_json::to_string(&frame).unwrap();

        assert!(json.contains(r#""response_type":"response""#));
        assert!(json.contains(r#""response_id":2"#));
        assert!(!json.contains("end_call"));
        assert!(!json.contains("no_interruption_allowed"));
    }

    #[test]
    fn test_ending_response_carries_reason_and_spoken_flags() {
        let frame = OutboundFrame::ending(5, "Goodbye.", EndReason::SilenceTimeout);
        let json = serde_json::to_string(&frame).unwrap();

        assert!(json.contains(r#""end_call":true"#));
        assert!(json.contains(r#""end_call_after_spoken":true"#));
        assert!(json.contains(r#""no_interruption_allowed":true"#));
        assert!(json.contains(r#""end_call_reason":"silence_timeout""#));
    }

    #[test]
    fn test_config_frame_shape() {
        let frame = OutboundFrame::Config {
            config: SessionConfig {
                auto_reconnect: true,
                call_details: true,
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""response_type":"config""#));
        assert!(json.contains(r#""auto_reconnect":true"#));
        assert!(json.contains(r#""call_details":true"#));
    }

    #[test]
    fn test_ping_pong_round_trip() {
        let json = r#"{"interaction_type": "ping_pong", "timestamp": 1712000000}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.interaction_type, InteractionType::PingPong);

        let echo = OutboundFrame::PingPong {
            timestamp: frame.timestamp.unwrap(),
        };
        let out = serde_json::to_string(&echo).unwrap();
        assert!(out.contains(r#""response_type":"ping_pong""#));
        assert!(out.contains("1712000000"));
    }
}
