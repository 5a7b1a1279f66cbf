//! # Interview Session Module
//!
//! Everything owned by one live call, plus the cross-call context cache:
//! - **engine**: the orchestrator state machine (pure transitions, effects out)
//! - **history**: bounded conversation buffer with system-prompt-preserving pruning
//! - **timer**: wall-clock session duration tracking
//! - **context**: TTL cache of call-registration metadata
//! - **metrics**: per-session token/turn accumulator
//!
//! The WebSocket adapter is in src/websocket.rs at the root level.

pub mod context;
pub mod engine;
pub mod history;
pub mod metrics;
pub mod timer;
