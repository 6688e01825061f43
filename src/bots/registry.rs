//! Operator-facing agent management.
//!
//! Every mutation bumps the persisted config version and notifies in-process
//! subscribers, which is what drives roster recomputation in the scheduler.

use crate::market::repository::AgentConfigStore;
use crate::types::AutomatedBidAgent;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Operator-supplied settings for a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub name: String,
    pub balance: u64,
    pub bid_ceiling: u64,
    pub interval_min: u64,
    pub interval_max: u64,
    #[serde(default)]
    pub target_auction_ids: Vec<String>,
}

/// Reject configurations an agent loop cannot run with.
pub fn validate_agent(agent: &AutomatedBidAgent) -> Result<()> {
    if agent.name.trim().is_empty() {
        bail!("agent name must not be empty");
    }
    if agent.interval_max == 0 {
        bail!("interval_max must be greater than zero");
    }
    if agent.interval_min > agent.interval_max {
        bail!(
            "interval_min ({}) must not exceed interval_max ({})",
            agent.interval_min,
            agent.interval_max
        );
    }
    Ok(())
}

#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn AgentConfigStore>,
    notify: watch::Sender<u64>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn AgentConfigStore>) -> Self {
        let (notify, _) = watch::channel(0);
        Self { store, notify }
    }

    pub fn store(&self) -> Arc<dyn AgentConfigStore> {
        self.store.clone()
    }

    /// Receiver that observes every config version this registry writes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }

    pub async fn list(&self) -> Result<Vec<AutomatedBidAgent>> {
        self.store.list_agents().await
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<AutomatedBidAgent>> {
        self.store.get_agent(agent_id).await
    }

    pub async fn create(&self, settings: AgentSettings) -> Result<AutomatedBidAgent> {
        let agent = AutomatedBidAgent {
            id: ulid::Ulid::new().to_string(),
            name: settings.name,
            balance: settings.balance,
            bid_ceiling: settings.bid_ceiling,
            interval_min: settings.interval_min,
            interval_max: settings.interval_max,
            active: true,
            target_auction_ids: settings.target_auction_ids,
        };
        validate_agent(&agent)?;

        self.commit(agent.clone()).await?;
        info!("Agent '{}' ({}) created", agent.name, agent.id);
        Ok(agent)
    }

    /// Replace an existing agent's configuration.
    pub async fn update(&self, agent: AutomatedBidAgent) -> Result<()> {
        validate_agent(&agent)?;
        self.store
            .get_agent(&agent.id)
            .await?
            .with_context(|| format!("No agent with id {}", agent.id))?;

        info!("Agent '{}' ({}) updated", agent.name, agent.id);
        self.commit(agent).await
    }

    pub async fn set_active(&self, agent_id: &str, active: bool) -> Result<()> {
        let mut agent = self
            .store
            .get_agent(agent_id)
            .await?
            .with_context(|| format!("No agent with id {}", agent_id))?;
        if agent.active == active {
            return Ok(());
        }
        agent.active = active;

        info!(
            "Agent '{}' ({}) {}",
            agent.name,
            agent.id,
            if active { "activated" } else { "deactivated" }
        );
        self.commit(agent).await
    }

    /// Returns whether the agent existed.
    pub async fn delete(&self, agent_id: &str) -> Result<bool> {
        match self.store.remove_agent(agent_id).await? {
            Some(version) => {
                info!("Agent {} deleted", agent_id);
                self.notify.send_replace(version);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(&self, agent: AutomatedBidAgent) -> Result<()> {
        let version = self.store.save_agent(agent).await?;
        self.notify.send_replace(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteStore;

    fn settings() -> AgentSettings {
        AgentSettings {
            name: "Sniper".into(),
            balance: 30_000,
            bid_ceiling: 20_000,
            interval_min: 2,
            interval_max: 8,
            target_auction_ids: Vec::new(),
        }
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn create_notifies_subscribers() {
        let registry = registry();
        let mut rx = registry.subscribe();

        let agent = registry.create(settings()).await.unwrap();
        assert!(agent.active);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(registry.list().await.unwrap(), vec![agent]);
    }

    #[tokio::test]
    async fn invalid_intervals_are_rejected() {
        let registry = registry();
        let mut bad = settings();
        bad.interval_min = 10;
        bad.interval_max = 5;
        assert!(registry.create(bad).await.is_err());

        let mut zero = settings();
        zero.interval_min = 0;
        zero.interval_max = 0;
        assert!(registry.create(zero).await.is_err());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redundant_toggle_does_not_notify() {
        let registry = registry();
        let agent = registry.create(settings()).await.unwrap();
        let mut rx = registry.subscribe();
        rx.borrow_and_update();

        registry.set_active(&agent.id, true).await.unwrap();
        assert!(!rx.has_changed().unwrap());

        registry.set_active(&agent.id, false).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(!registry.get(&agent.id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn update_requires_existing_agent() {
        let registry = registry();
        let mut ghost = registry.create(settings()).await.unwrap();
        ghost.id = "ghost".into();
        assert!(registry.update(ghost).await.is_err());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let registry = registry();
        let agent = registry.create(settings()).await.unwrap();
        assert!(registry.delete(&agent.id).await.unwrap());
        assert!(!registry.delete(&agent.id).await.unwrap());
    }
}
