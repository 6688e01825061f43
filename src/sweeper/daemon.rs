//! Cron-based sweep daemon that runs lifecycle housekeeping on schedule.
//!
//! Reads sweeper.yml for task definitions (6-field cron expressions, seconds
//! first) and executes them when due. Its main job is the time-driven
//! `active -> ended` transition.

use crate::config::MarketConfig;
use crate::market::protocol::BidDesk;
use crate::state::SqliteStore;
use crate::sweeper::tasks;
use crate::types::SweepEntry;
use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background sweep daemon.
pub struct SweepDaemon {
    desk: BidDesk,
    store: SqliteStore,
    tick_interval: tokio::time::Duration,
    entries: Vec<SweepEntry>,
    last_run: HashMap<String, chrono::DateTime<Utc>>,
}

impl SweepDaemon {
    /// Create a new sweep daemon, loading entries from the YAML config.
    pub fn new(config: &MarketConfig, desk: BidDesk, store: SqliteStore) -> Result<Self> {
        let entries = load_sweeper_config(config)?;
        info!("Loaded {} sweep entries", entries.len());

        Ok(Self::with_entries(
            desk,
            store,
            entries,
            tokio::time::Duration::from_secs(config.sweep_tick_secs),
        ))
    }

    pub fn with_entries(
        desk: BidDesk,
        store: SqliteStore,
        entries: Vec<SweepEntry>,
        tick_interval: tokio::time::Duration,
    ) -> Self {
        Self {
            desk,
            store,
            tick_interval,
            entries,
            last_run: HashMap::new(),
        }
    }

    /// Run the sweep loop (call from a tokio::spawn).
    ///
    /// The loop exits cooperatively when `cancel` is triggered.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!("Sweep daemon started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {
                    if let Err(e) = self.tick().await {
                        error!("Sweep tick failed: {e}");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Sweep daemon shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Process one tick: check each entry and run it if due.
    ///
    /// Individual task failures are logged and do not stop other tasks.
    /// Infrastructure errors (e.g. DB write failure) are propagated.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();

        for entry in &self.entries {
            if !entry.enabled {
                continue;
            }

            let schedule = match Schedule::from_str(&entry.schedule) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Invalid cron schedule '{}' for '{}': {}", entry.schedule, entry.name, e);
                    continue;
                }
            };

            let last = self
                .last_run
                .get(&entry.name)
                .copied()
                .unwrap_or(now - chrono::Duration::hours(1));

            let Some(next_run) = schedule.after(&last).next() else {
                continue;
            };
            if next_run > now {
                continue;
            }

            debug!("Running sweep task: {}", entry.name);
            let result = tasks::execute_task(&entry.task, &entry.params, &self.desk, &self.store).await;

            let (result_str, success) = match &result {
                Ok(msg) => (msg.clone(), true),
                Err(e) => (format!("Error: {}", e), false),
            };

            let name = entry.name.clone();
            let logged = result_str.clone();
            self.store
                .with_db(move |db| db.log_sweep(&name, &logged, success))
                .await
                .context("Failed to log sweep to database")?;

            self.last_run.insert(entry.name.clone(), now);

            if success {
                debug!("Sweep task '{}': {}", entry.name, result_str);
            } else {
                warn!("Sweep task '{}' failed: {}", entry.name, result_str);
            }
        }

        Ok(())
    }
}

/// Load sweep entries from the YAML config file.
fn load_sweeper_config(config: &MarketConfig) -> Result<Vec<SweepEntry>> {
    let path = config.resolved_sweeper_path();
    let path = std::path::Path::new(&path);

    if !path.exists() {
        debug!("No sweeper config at {:?}, using defaults", path);
        return Ok(default_sweep_entries());
    }

    let contents = std::fs::read_to_string(path).context("Failed to read sweeper.yml")?;
    let entries: Vec<SweepEntry> =
        serde_yaml::from_str(&contents).context("Failed to parse sweeper.yml")?;

    Ok(entries)
}

/// Default sweep entries if no config file exists.
pub fn default_sweep_entries() -> Vec<SweepEntry> {
    vec![
        SweepEntry {
            name: "close_expired_auctions".into(),
            schedule: "*/10 * * * * *".into(), // Every 10 seconds
            task: "close_expired_auctions".into(),
            enabled: true,
            params: serde_json::Value::Null,
        },
        SweepEntry {
            name: "heartbeat_ping".into(),
            schedule: "0 * * * * *".into(), // Every minute
            task: "heartbeat_ping".into(),
            enabled: true,
            params: serde_json::Value::Null,
        },
    ]
}
