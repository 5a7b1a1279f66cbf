//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor: the
//! runtime configuration, request metrics, the call context cache, and the
//! collaborator handles (completion client, congruency analyzer, interview
//! recorder) constructed once at startup.
//!
//! Mutable pieces use the Arc<RwLock<T>> pattern: many concurrent readers or
//! one writer, shared by cheap clones of `AppState`. Collaborators are plain
//! `Arc<dyn Trait>` handles — constructed once, immutable afterwards, and
//! swappable for fakes in tests.

use crate::config::AppConfig;
use crate::congruency::CongruencyAnalyzer;
use crate::llm::client::CompletionClient;
use crate::recorder::InterviewRecorder;
use crate::session::context::CallContextCache;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared application state. Cloning is cheap; all heavy members are behind
/// Arcs.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration (tunable sections can be updated live)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP/WebSocket request metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started; Instant is Copy, no lock needed
    pub start_time: Instant,

    call_context: Arc<CallContextCache>,
    completion_client: Arc<dyn CompletionClient>,
    analyzer: Arc<dyn CongruencyAnalyzer>,
    recorder: Arc<dyn InterviewRecorder>,
}

/// Server-wide counters collected across all requests and live sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total errors since start
    pub error_count: u64,

    /// Currently connected interview sessions
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        call_context: Arc<CallContextCache>,
        completion_client: Arc<dyn CompletionClient>,
        analyzer: Arc<dyn CongruencyAnalyzer>,
        recorder: Arc<dyn InterviewRecorder>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            call_context,
            completion_client,
            analyzer,
            recorder,
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn call_context(&self) -> Arc<CallContextCache> {
        self.call_context.clone()
    }

    pub fn completion_client(&self) -> Arc<dyn CompletionClient> {
        self.completion_client.clone()
    }

    pub fn analyzer(&self) -> Arc<dyn CongruencyAnalyzer> {
        self.analyzer.clone()
    }

    pub fn recorder(&self) -> Arc<dyn InterviewRecorder> {
        self.recorder.clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one finished request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        // guard against double-decrement on racing disconnect paths
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Consistent copy of the metrics for the /metrics endpoint; cloning
    /// avoids holding the lock during response serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::NullRecorder;
    use crate::session::metrics::TokenUsage;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopClient;

    #[async_trait]
    impl CompletionClient for NoopClient {
        async fn stream(
            &self,
            _messages: Vec<crate::session::history::ChatMessage>,
            _params: crate::llm::client::CompletionParams,
        ) -> Result<crate::llm::client::CompletionStream> {
            Ok(Box::pin(futures_util::stream::empty::<
                Result<crate::llm::client::CompletionChunk>,
            >()))
        }
    }

    struct NoopAnalyzer;

    #[async_trait]
    impl CongruencyAnalyzer for NoopAnalyzer {
        async fn analyze(
            &self,
            _resume: &str,
            _role_title: &str,
            _job_description: &str,
            _mode: crate::congruency::CheckMode,
        ) -> Result<crate::congruency::CongruencyVerdict> {
            Ok(crate::congruency::CongruencyVerdict {
                is_congruent: true,
                confidence: 1.0,
                is_extremely_incompatible: false,
                reasons: vec![],
            })
        }
    }

    fn state() -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(CallContextCache::new(Duration::from_secs(60))),
            Arc::new(NoopClient),
            Arc::new(NoopAnalyzer),
            Arc::new(NullRecorder),
        )
    }

    #[test]
    fn test_session_gauge_never_underflows() {
        let state = state();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("GET /health", 5, false);
        state.record_endpoint_request("GET /health", 15, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert!((metric.average_duration_ms() - 10.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = state();
        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().server.port, 8080);
    }

    #[tokio::test]
    async fn test_null_recorder_is_usable_through_state() {
        let state = state();
        let recorder = state.recorder();
        assert!(recorder
            .update_tokens(
                "interview_1",
                TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1
                }
            )
            .await
            .is_ok());
    }
}
