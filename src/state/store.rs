//! Async repository over the SQLite database.
//!
//! SQLite calls are offloaded via `spawn_blocking` so database I/O does not
//! block the async runtime. Each call takes the connection lock on its own,
//! so a read and a later conditional write by the same caller can interleave
//! with other writers exactly like a replicated multi-writer store.

use crate::market::repository::{AgentConfigStore, AuctionRepository};
use crate::state::Database;
use crate::types::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the SQLite-backed auction and agent store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Store over a fresh in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Mutex::new(Database::open_memory()?))))
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.blocking_lock();
            f(&db)
        })
        .await?
    }

    /// List a new auction. Seller-side validation lives here since this is
    /// the only creation path. A buy-now price must sit on the `increment`
    /// grid, since buying appends a bid at exactly that amount.
    pub async fn create_auction(
        &self,
        listing: NewAuction,
        increment: u64,
    ) -> Result<AuctionSnapshot> {
        if listing.title.trim().is_empty() {
            bail!("auction title must not be empty");
        }
        if listing.starting_price == 0 {
            bail!("starting price must be positive");
        }
        if let Some(buy_now) = listing.buy_now_price {
            if buy_now <= listing.starting_price {
                bail!(
                    "buy-now price {} must exceed starting price {}",
                    buy_now,
                    listing.starting_price
                );
            }
            if increment > 0 && buy_now % increment != 0 {
                bail!(
                    "buy-now price {} is not a multiple of the {} increment",
                    buy_now,
                    increment
                );
            }
        }
        if listing.end_time <= Utc::now() {
            bail!("end time must be in the future");
        }
        self.with_db(move |db| db.insert_auction(&listing)).await
    }

    pub async fn list_auctions(&self) -> Result<Vec<AuctionSnapshot>> {
        self.with_db(|db| db.list_auctions()).await
    }

    pub async fn bid_history(&self, auction_id: &str) -> Result<Vec<Bid>> {
        let auction_id = auction_id.to_string();
        self.with_db(move |db| db.bid_history(&auction_id)).await
    }
}

#[async_trait]
impl AuctionRepository for SqliteStore {
    async fn read(&self, auction_id: &str) -> Result<Option<AuctionSnapshot>> {
        let auction_id = auction_id.to_string();
        self.with_db(move |db| db.auction(&auction_id)).await
    }

    async fn conditional_write(
        &self,
        auction_id: &str,
        expected_price: u64,
        update: AuctionUpdate,
    ) -> Result<WriteOutcome> {
        let auction_id = auction_id.to_string();
        self.with_db(move |db| db.conditional_write(&auction_id, expected_price, &update))
            .await
    }

    async fn list_active(&self) -> Result<Vec<AuctionSnapshot>> {
        self.with_db(|db| db.active_auctions()).await
    }
}

#[async_trait]
impl AgentConfigStore for SqliteStore {
    async fn list_agents(&self) -> Result<Vec<AutomatedBidAgent>> {
        self.with_db(|db| db.list_agents()).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AutomatedBidAgent>> {
        let agent_id = agent_id.to_string();
        self.with_db(move |db| db.agent(&agent_id)).await
    }

    async fn save_agent(&self, agent: AutomatedBidAgent) -> Result<u64> {
        self.with_db(move |db| {
            db.upsert_agent(&agent)?;
            db.bump_agents_version()
        })
        .await
    }

    async fn remove_agent(&self, agent_id: &str) -> Result<Option<u64>> {
        let agent_id = agent_id.to_string();
        self.with_db(move |db| {
            if db.delete_agent(&agent_id)? {
                Ok(Some(db.bump_agents_version()?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn config_version(&self) -> Result<u64> {
        self.with_db(|db| db.agents_version()).await
    }
}
