//! Configuration schema for market.toml.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Human-readable market name.
    pub name: String,

    /// Minimum bid step; every bid amount must be a multiple of it.
    pub increment: u64,

    /// Conditional-write attempts before a bid surfaces `Conflict`.
    pub max_retries: u32,

    /// Path to SQLite database.
    pub db_path: String,

    /// Path to sweeper YAML config.
    pub sweeper_config_path: String,

    /// How often the sweeper checks its cron schedules (seconds).
    pub sweep_tick_secs: u64,

    /// How often the scheduler polls the persisted agent config version (seconds).
    pub roster_poll_secs: u64,

    /// Upper bound on waiting for loops to stop at shutdown (seconds).
    pub shutdown_timeout_secs: u64,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: "bidhouse".into(),
            increment: 500,
            max_retries: 5,
            db_path: "~/.bidhouse/state.db".into(),
            sweeper_config_path: "~/.bidhouse/sweeper.yml".into(),
            sweep_tick_secs: 5,
            roster_poll_secs: 10,
            shutdown_timeout_secs: 10,
            log_level: "info".into(),
        }
    }
}

impl MarketConfig {
    /// Reject settings the bid protocol cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.increment == 0 {
            bail!("increment must be greater than zero");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.sweep_tick_secs == 0 || self.roster_poll_secs == 0 {
            bail!("sweep_tick_secs and roster_poll_secs must be greater than zero");
        }
        Ok(())
    }

    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved sweeper config path.
    pub fn resolved_sweeper_path(&self) -> String {
        self.resolve_path(&self.sweeper_config_path)
    }
}
