//! ============================================================================
//! Configuration - Agent, pricing, session and storage settings
//! ============================================================================
//! Defaults cover everything except the API key. `from_env` overlays the
//! `MURMUR_*` environment variables; the binary loads `.env` first.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::agent::AgentConfig;
use crate::conversation::DEFAULT_HISTORY_LIMIT;
use crate::credits::ServicePricing;

/// Per-session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Messages kept (system prompt included) before each agent call
    pub max_history_messages: usize,
    /// Longest accepted text input, in characters
    pub max_input_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_messages: DEFAULT_HISTORY_LIMIT,
            max_input_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Granted once, when no ledger has been persisted yet
    pub starter_credits: i64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            starter_credits: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; `None` uses ~/.murmur/murmur.redb
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurmurConfig {
    pub agent: AgentConfig,
    pub pricing: ServicePricing,
    pub session: SessionConfig,
    pub credits: CreditConfig,
    pub storage: StorageConfig,
}

impl MurmurConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(key) = var("MURMUR_API_KEY").or_else(|| var("PPQ_API_KEY")) {
            config.agent.api_key = key;
        }
        if let Some(endpoint) = var("MURMUR_ENDPOINT") {
            config.agent.endpoint = endpoint;
        }
        if let Some(model) = var("MURMUR_MODEL") {
            config.agent.model = model;
        }
        if let Some(timeout) = parse_var(&var, "MURMUR_TIMEOUT_SECS") {
            config.agent.timeout_secs = timeout;
        }
        if let Some(history) = parse_var(&var, "MURMUR_MAX_HISTORY") {
            config.session.max_history_messages = history;
        }
        if let Some(credits) = parse_var(&var, "MURMUR_STARTER_CREDITS") {
            config.credits.starter_credits = credits;
        }
        if let Some(path) = var("MURMUR_DB_PATH") {
            config.storage.db_path = Some(path);
        }

        config
    }

    /// Settings an agent call cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.agent.api_key.is_empty() {
            return Err(anyhow!(
                "No API key configured. Set MURMUR_API_KEY (or PPQ_API_KEY) in the environment or .env"
            ));
        }
        if self.session.max_history_messages < 2 {
            return Err(anyhow!(
                "MURMUR_MAX_HISTORY must keep at least the system prompt and one message"
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a valid number", key, raw);
            None
        }
    }
}
