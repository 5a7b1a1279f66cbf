//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values built into the code
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special-case environment variables (HOST, PORT, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER_HOST, APP_LLM_MODEL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::congruency::CongruencyThresholds;
use crate::llm::retry::RetryPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub interview: InterviewConfig,
    pub congruency: CongruencyConfig,
    pub retry: RetryConfig,
    pub context: ContextConfig,
    pub recorder: RecorderConfig,
}

/// HTTP/WebSocket server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Cap per spoken reply; voice answers should stay short
    pub max_response_tokens: u32,
}

/// Live-session behavior tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Hard session cap
    pub max_duration_minutes: u64,
    /// Minutes remaining at which the spoken time warning fires
    pub warning_threshold_minutes: u64,
    /// Silence reminders tolerated before the session ends
    pub max_reminders: u32,
    /// Conversation history bound (system prompt included)
    pub history_limit: usize,
    /// Fallback when no preferred language can be resolved
    pub default_language: String,
    /// User turns after which the full congruency check runs
    pub full_check_after_turns: u32,
}

/// Confidence gates for the congruency checks. See the analyzer module for
/// what each mode additionally requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongruencyConfig {
    pub quick_confidence_threshold: f32,
    pub full_confidence_threshold: f32,
}

/// Completion-provider retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Call context cache lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

/// Persistence-service client settings. An empty base_url disables durable
/// recording (the null recorder is used instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            llm: LlmConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4o".to_string(),
                temperature: 0.7,
                max_response_tokens: 250,
            },
            interview: InterviewConfig {
                max_duration_minutes: 15,
                warning_threshold_minutes: 2,
                max_reminders: 3,
                history_limit: 20,
                default_language: "en".to_string(),
                full_check_after_turns: 4,
            },
            congruency: CongruencyConfig {
                quick_confidence_threshold: 0.95,
                full_confidence_threshold: 0.85,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 4000,
            },
            context: ContextConfig {
                ttl_seconds: 3600,
                sweep_interval_seconds: 60,
            },
            recorder: RecorderConfig {
                base_url: String::new(),
                api_key: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`
    /// - `APP_LLM_MODEL=gpt-4o-mini`
    /// - `HOST` / `PORT`: deployment-platform overrides
    /// - `OPENAI_API_KEY`: provider key without the APP_ prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms and provider SDKs use these names; they do
        // not follow the APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("llm.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.interview.max_duration_minutes == 0 {
            return Err(anyhow::anyhow!(
                "Interview duration must be at least 1 minute"
            ));
        }
        if self.interview.warning_threshold_minutes >= self.interview.max_duration_minutes {
            return Err(anyhow::anyhow!(
                "Warning threshold must be shorter than the interview duration"
            ));
        }
        if self.interview.history_limit < 2 {
            return Err(anyhow::anyhow!(
                "History limit must hold the system prompt plus at least one turn"
            ));
        }
        if self.interview.max_reminders == 0 {
            return Err(anyhow::anyhow!("Max reminders must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("Retry attempts must be greater than 0"));
        }
        for (name, value) in [
            ("quick", self.congruency.quick_confidence_threshold),
            ("full", self.congruency.full_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!(
                    "Congruency {} threshold must be within 0.0..=1.0",
                    name
                ));
            }
        }
        if self.context.ttl_seconds == 0 {
            return Err(anyhow::anyhow!("Context TTL must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update to the runtime-tunable sections
    /// (interview, congruency, retry). Server and provider settings require
    /// a restart.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(interview) = partial.get("interview") {
            if let Some(v) = interview
                .get("max_duration_minutes")
                .and_then(|v| v.as_u64())
            {
                self.interview.max_duration_minutes = v;
            }
            if let Some(v) = interview
                .get("warning_threshold_minutes")
                .and_then(|v| v.as_u64())
            {
                self.interview.warning_threshold_minutes = v;
            }
            if let Some(v) = interview.get("max_reminders").and_then(|v| v.as_u64()) {
                self.interview.max_reminders = v as u32;
            }
            if let Some(v) = interview.get("history_limit").and_then(|v| v.as_u64()) {
                self.interview.history_limit = v as usize;
            }
            if let Some(v) = interview.get("default_language").and_then(|v| v.as_str()) {
                self.interview.default_language = v.to_string();
            }
            if let Some(v) = interview
                .get("full_check_after_turns")
                .and_then(|v| v.as_u64())
            {
                self.interview.full_check_after_turns = v as u32;
            }
        }

        if let Some(congruency) = partial.get("congruency") {
            if let Some(v) = congruency
                .get("quick_confidence_threshold")
                .and_then(|v| v.as_f64())
            {
                self.congruency.quick_confidence_threshold = v as f32;
            }
            if let Some(v) = congruency
                .get("full_confidence_threshold")
                .and_then(|v| v.as_f64())
            {
                self.congruency.full_confidence_threshold = v as f32;
            }
        }

        if let Some(retry) = partial.get("retry") {
            if let Some(v) = retry.get("max_attempts").and_then(|v| v.as_u64()) {
                self.retry.max_attempts = v as u32;
            }
            if let Some(v) = retry.get("base_delay_ms").and_then(|v| v.as_u64()) {
                self.retry.base_delay_ms = v;
            }
            if let Some(v) = retry.get("max_delay_ms").and_then(|v| v.as_u64()) {
                self.retry.max_delay_ms = v;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl CongruencyConfig {
    pub fn thresholds(&self) -> CongruencyThresholds {
        CongruencyThresholds {
            quick_confidence: self.quick_confidence_threshold,
            full_confidence: self.full_confidence_threshold,
        }
    }
}

impl RecorderConfig {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.interview.max_duration_minutes, 15);
        assert_eq!(config.congruency.quick_confidence_threshold, 0.95);
        assert!(config.validate().is_ok());
        assert!(!config.recorder.is_enabled());
    }

    #[test]
    fn test_validation_rejects_warning_past_duration() {
        let mut config = AppConfig::default();
        config.interview.warning_threshold_minutes = 15;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tiny_history() {
        let mut config = AppConfig::default();
        config.interview.history_limit = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_update_touches_only_named_fields() {
        let mut config = AppConfig::default();
        let json = r#"{"interview": {"max_reminders": 5}, "congruency": {"full_confidence_threshold": 0.9}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.interview.max_reminders, 5);
        assert!((config.congruency.full_confidence_threshold - 0.9).abs() < 1e-6);
        // untouched fields keep their values
        assert_eq!(config.interview.max_duration_minutes, 15);
    }

    #[test]
    fn test_partial_update_still_validates() {
        let mut config = AppConfig::default();
        let json = r#"{"congruency": {"quick_confidence_threshold": 1.5}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let config = AppConfig::default();
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
