use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::agent::Agent;

/// Loop limits (admins can modify at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_function_calls: u32,
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_function_calls: 20,
            max_iterations: 40,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `MAX_FUNCTION_CALLS` and `MAX_ITERATIONS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_function_calls: env_u32("MAX_FUNCTION_CALLS", defaults.max_function_calls),
            max_iterations: env_u32("MAX_ITERATIONS", defaults.max_iterations),
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match dotenv::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, default, "Invalid number, using default");
            default
        }),
        Err(_) => default,
    }
}

pub struct AppState {
    pub agent: Arc<Agent>,
    pub admin_ids: HashSet<u64>,
    pub agent_config: Arc<RwLock<AgentConfig>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
