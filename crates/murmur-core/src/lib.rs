//! ============================================================================
//! MURMUR-CORE: Speech and text in, structured entries out
//! ============================================================================
//! This crate handles all backend logic for Murmur:
//! - Tool-calling agent client with lenient argument parsing
//! - Credit gate that authorizes before and charges after each agent call
//! - Action executor with single-save batches and undo transactions
//! - Session controller owning turns, generations and the thread view
//! ============================================================================

pub mod agent;
pub mod config;
pub mod conversation;
pub mod credits;
pub mod dates;
pub mod executor;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod tool_results;
pub mod transcriber;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use types::*;
pub use agent::{AgentConfig, AgentError, AgentService, HttpAgentClient};
pub use config::MurmurConfig;
pub use conversation::Conversation;
pub use credits::{CreditGate, LocalCreditGate, ServicePricing};
pub use executor::AgentActionExecutor;
pub use notify::{LogScheduler, NoopScheduler, NotificationScheduler};
pub use pipeline::{Pipeline, PipelineError};
pub use session::{SessionController, SessionError, TurnReport};
pub use store::{DbEntryStore, EntryFilter, EntryStore, MurmurDb};
pub use transcriber::{Transcriber, Transcript};
