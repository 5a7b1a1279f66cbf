//! # Interview Metrics Recorder
//!
//! Collaborator contract for durable interview records. The orchestrator
//! calls it fire-and-forget from spawned tasks: a recorder failure is logged
//! and never reaches the live reply path.
//!
//! Two implementations ship: an HTTP client against the persistence service
//! and a null recorder for deployments (and tests) without one.

use crate::protocol::EndReason;
use crate::session::metrics::TokenUsage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Fields captured when a session record is opened.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub interview_id: Option<String>,
    pub call_id: String,
    pub candidate_name: Option<String>,
    pub role_title: Option<String>,
    pub company_name: Option<String>,
    pub language: String,
    pub started_at: DateTime<Utc>,
}

/// Fields written exactly once when the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeRecord {
    pub end_reason: EndReason,
    /// Elapsed time over the configured maximum, capped at 1.0
    pub completion_rate: f32,
    pub duration_seconds: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub turns: u32,
}

/// Contract the orchestrator depends on for durable storage.
#[async_trait]
pub trait InterviewRecorder: Send + Sync {
    /// Open a session record; returns the store's session identifier.
    async fn create(&self, record: SessionRecord) -> Result<String>;

    /// Mark that the agent's first utterance has been spoken.
    async fn record_first_utterance(&self, interview_id: &str) -> Result<()>;

    /// Add provider token usage from one completed turn.
    async fn update_tokens(&self, interview_id: &str, usage: TokenUsage) -> Result<()>;

    /// Close the record. Called exactly once per session.
    async fn finalize(&self, interview_id: &str, record: FinalizeRecord) -> Result<()>;
}

/// Recorder backed by the persistence service's internal REST API.
pub struct HttpRecorder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, serde::Deserialize)]
struct CreateResponse {
    session_id: String,
}

#[derive(Serialize)]
struct TokenUpdateBody {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl HttpRecorder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Recorder service returned {} for {}", status, path));
        }
        Ok(response)
    }
}

#[async_trait]
impl InterviewRecorder for HttpRecorder {
    async fn create(&self, record: SessionRecord) -> Result<String> {
        let response = self.post("/internal/interview-sessions", &record).await?;
        let created: CreateResponse = response.json().await?;
        Ok(created.session_id)
    }

    async fn record_first_utterance(&self, interview_id: &str) -> Result<()> {
        self.post(
            &format!("/internal/interview-sessions/{interview_id}/first-utterance"),
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn update_tokens(&self, interview_id: &str, usage: TokenUsage) -> Result<()> {
        self.post(
            &format!("/internal/interview-sessions/{interview_id}/tokens"),
            &TokenUpdateBody {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        )
        .await?;
        Ok(())
    }

    async fn finalize(&self, interview_id: &str, record: FinalizeRecord) -> Result<()> {
        self.post(
            &format!("/internal/interview-sessions/{interview_id}/finalize"),
            &record,
        )
        .await?;
        Ok(())
    }
}

/// Recorder that logs and discards everything. Active when no persistence
/// service is configured.
pub struct NullRecorder;

#[async_trait]
impl InterviewRecorder for NullRecorder {
    async fn create(&self, record: SessionRecord) -> Result<String> {
        debug!(call_id = %record.call_id, "Recorder disabled; session record dropped");
        Ok(record.interview_id.unwrap_or_else(|| record.call_id))
    }

    async fn record_first_utterance(&self, interview_id: &str) -> Result<()> {
        debug!(interview_id, "Recorder disabled; first utterance dropped");
        Ok(())
    }

    async fn update_tokens(&self, interview_id: &str, usage: TokenUsage) -> Result<()> {
        debug!(
            interview_id,
            prompt = usage.prompt_tokens,
            completion = usage.completion_tokens,
            "Recorder disabled; token update dropped"
        );
        Ok(())
    }

    async fn finalize(&self, interview_id: &str, record: FinalizeRecord) -> Result<()> {
        debug!(
            interview_id,
            reason = record.end_reason.as_str(),
            duration = record.duration_seconds,
            "Recorder disabled; finalize dropped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_recorder_url_join() {
        let recorder = HttpRecorder::new("https://api.internal.example/", "key");
        assert_eq!(
            recorder.url("/internal/interview-sessions"),
            "https://api.internal.example/internal/interview-sessions"
        );
    }

    #[tokio::test]
    async fn test_null_recorder_accepts_everything() {
        let recorder = NullRecorder;
        let id = recorder
            .create(SessionRecord {
                interview_id: None,
                call_id: "call_1".to_string(),
                candidate_name: None,
                role_title: None,
                company_name: None,
                language: "en".to_string(),
                started_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(id, "call_1");
        assert!(recorder.record_first_utterance("call_1").await.is_ok());
        assert!(recorder
            .finalize(
                "call_1",
                FinalizeRecord {
                    end_reason: EndReason::Completed,
                    completion_rate: 0.4,
                    duration_seconds: 360,
                    prompt_tokens: 1000,
                    completion_tokens: 200,
                    turns: 5,
                }
            )
            .await
            .is_ok());
    }
}
