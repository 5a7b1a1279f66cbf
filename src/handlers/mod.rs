pub mod calls;
pub mod config;

pub use calls::{get_call_context, register_call};
pub use config::{get_config, update_config};
