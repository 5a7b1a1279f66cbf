//! # LLM Integration
//!
//! Everything that touches the completion provider:
//! - **client**: streaming chat-completions client (OpenAI-compatible SSE)
//! - **retry**: exponential backoff policy for provider failures
//! - **prompt**: localized system prompt and fixed spoken messages

pub mod client;
pub mod prompt;
pub mod retry;
