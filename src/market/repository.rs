//! Storage seams consumed by the bid protocol and the agent scheduler.
//!
//! The protocol never assumes transactions beyond what
//! [`AuctionRepository::conditional_write`] promises: the update is applied
//! in full, or not at all when the stored price no longer matches.

use crate::types::{AuctionSnapshot, AuctionUpdate, AutomatedBidAgent, WriteOutcome};
use anyhow::Result;
use async_trait::async_trait;

/// Replicated auction records and their bid logs.
#[async_trait]
pub trait AuctionRepository: Send + Sync {
    /// Point read; `None` when the auction does not exist.
    async fn read(&self, auction_id: &str) -> Result<Option<AuctionSnapshot>>;

    /// Apply `update` only if the stored price equals `expected_price` and
    /// the auction is still active. The bid carried by the update is
    /// appended in the same write.
    async fn conditional_write(
        &self,
        auction_id: &str,
        expected_price: u64,
        update: AuctionUpdate,
    ) -> Result<WriteOutcome>;

    /// Every auction currently in the `active` status.
    async fn list_active(&self) -> Result<Vec<AuctionSnapshot>>;
}

/// Operator-managed automated bidder configuration.
#[async_trait]
pub trait AgentConfigStore: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AutomatedBidAgent>>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AutomatedBidAgent>>;

    /// Insert or replace, bumping the config version.
    async fn save_agent(&self, agent: AutomatedBidAgent) -> Result<u64>;

    /// Delete, bumping the config version. `None` if the agent did not exist.
    async fn remove_agent(&self, agent_id: &str) -> Result<Option<u64>>;

    /// Monotonic counter bumped on every configuration change.
    async fn config_version(&self) -> Result<u64>;
}
