//! SQLite database wrapper with WAL mode and migration support.

use crate::state::schema;
use crate::types::*;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

/// kv key holding the agent configuration version counter.
pub const AGENTS_VERSION_KEY: &str = "agents_version";

const AUCTION_COLUMNS: &str = "id, seller_id, title, description, images_json, starting_price,
     current_price, buy_now_price, end_time, status, winner_id, created_at";

const BID_COLUMNS: &str =
    "id, auction_id, bidder_id, display_name, amount, is_automated, created_at";

const AGENT_COLUMNS: &str =
    "id, name, balance, bid_ceiling, interval_min, interval_max, active, targets_json";

/// The auction state database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Create the schema on first open; refuse schemas from a newer build.
    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating database schema v{}", schema::SCHEMA_VERSION);
            self.conn
                .execute_batch(schema::CREATE_SCHEMA)
                .context("Failed to create schema")?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version > schema::SCHEMA_VERSION {
            bail!(
                "Database schema v{} is newer than this build supports (v{})",
                version,
                schema::SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Get the current schema version (0 if uninitialized).
    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Key-value store
    // -----------------------------------------------------------------------

    /// Get a value from the KV store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the KV store (upsert).
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Auctions
    // -----------------------------------------------------------------------

    /// Insert a new active auction with an empty bid log.
    pub fn insert_auction(&self, auction: &NewAuction) -> Result<AuctionSnapshot> {
        let id = ulid::Ulid::new().to_string();
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO auctions (id, seller_id, title, description, images_json, starting_price,
                                   current_price, buy_now_price, end_time, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, 'active', ?9, ?9)",
            params![
                id,
                auction.seller_id,
                auction.title,
                auction.description,
                serde_json::to_string(&auction.images)?,
                auction.starting_price,
                auction.buy_now_price,
                auction.end_time.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        self.auction(&id)?
            .context("Auction vanished immediately after insert")
    }

    /// Point read of one auction, including its most recent bid.
    pub fn auction(&self, id: &str) -> Result<Option<AuctionSnapshot>> {
        let sql = format!("SELECT {AUCTION_COLUMNS} FROM auctions WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], AuctionRow::from_row)
            .optional()?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row)?)),
            None => Ok(None),
        }
    }

    /// All auctions currently in the `active` status, oldest first.
    pub fn active_auctions(&self) -> Result<Vec<AuctionSnapshot>> {
        self.auctions_where("WHERE status = 'active'")
    }

    /// Every auction, oldest first.
    pub fn list_auctions(&self) -> Result<Vec<AuctionSnapshot>> {
        self.auctions_where("")
    }

    fn auctions_where(&self, filter: &str) -> Result<Vec<AuctionSnapshot>> {
        let sql = format!("SELECT {AUCTION_COLUMNS} FROM auctions {filter} ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], AuctionRow::from_row)?;

        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }

        raw.into_iter().map(|r| self.hydrate(r)).collect()
    }

    /// Attach bid count and last bid to a raw auction row.
    fn hydrate(&self, row: AuctionRow) -> Result<AuctionSnapshot> {
        let bid_count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bids WHERE auction_id = ?1",
            params![row.id],
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE auction_id = ?1 ORDER BY seq DESC LIMIT 1"
        );
        let last_bid = self
            .conn
            .query_row(&sql, params![row.id], BidRow::from_row)
            .optional()?
            .map(BidRow::into_bid)
            .transpose()?;

        row.into_snapshot(bid_count, last_bid)
    }

    /// The full bid log for an auction in acceptance order.
    pub fn bid_history(&self, auction_id: &str) -> Result<Vec<Bid>> {
        let sql = format!("SELECT {BID_COLUMNS} FROM bids WHERE auction_id = ?1 ORDER BY seq");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![auction_id], BidRow::from_row)?;

        let mut bids = Vec::new();
        for row in rows {
            bids.push(row?.into_bid()?);
        }
        Ok(bids)
    }

    /// Compare-and-swap on an auction record.
    ///
    /// Applies `update` (price, status, winner and the optional log entry) in
    /// one transaction only if the stored price still equals
    /// `expected_price` and the auction is still active.
    pub fn conditional_write(
        &self,
        auction_id: &str,
        expected_price: u64,
        update: &AuctionUpdate,
    ) -> Result<WriteOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let changed = tx.execute(
            "UPDATE auctions
             SET current_price = ?1, status = ?2, winner_id = ?3, updated_at = ?4
             WHERE id = ?5 AND current_price = ?6 AND status = 'active'",
            params![
                update.current_price,
                update.status.to_string(),
                update.winner_id,
                Utc::now().to_rfc3339(),
                auction_id,
                expected_price,
            ],
        )?;

        if changed == 0 {
            // Dropping the transaction rolls it back.
            return Ok(WriteOutcome::Conflict);
        }

        if let Some(bid) = &update.bid {
            tx.execute(
                "INSERT INTO bids (id, auction_id, bidder_id, display_name, amount, is_automated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bid.id,
                    bid.auction_id,
                    bid.bidder_id,
                    bid.display_name,
                    bid.amount,
                    bid.is_automated as i32,
                    bid.timestamp.to_rfc3339(),
                ],
            )?;
        }

        tx.commit().context("Failed to commit conditional write")?;
        Ok(WriteOutcome::Applied)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    /// Insert or replace an agent's configuration.
    pub fn upsert_agent(&self, agent: &AutomatedBidAgent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO agents (id, name, balance, bid_ceiling, interval_min, interval_max, active, targets_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = ?2, balance = ?3, bid_ceiling = ?4, interval_min = ?5,
                interval_max = ?6, active = ?7, targets_json = ?8, updated_at = datetime('now')",
            params![
                agent.id,
                agent.name,
                agent.balance,
                agent.bid_ceiling,
                agent.interval_min,
                agent.interval_max,
                agent.active as i32,
                serde_json::to_string(&agent.target_auction_ids)?,
            ],
        )?;
        Ok(())
    }

    /// Delete an agent. Returns whether a row was removed.
    pub fn delete_agent(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Look up one agent.
    pub fn agent(&self, id: &str) -> Result<Option<AutomatedBidAgent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], AgentRow::from_row)
            .optional()?
            .map(AgentRow::into_agent)
            .transpose()
    }

    /// List all agents, active or not.
    pub fn list_agents(&self) -> Result<Vec<AutomatedBidAgent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], AgentRow::from_row)?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?.into_agent()?);
        }
        Ok(agents)
    }

    /// Current agent configuration version (0 if never changed).
    pub fn agents_version(&self) -> Result<u64> {
        Ok(self
            .kv_get(AGENTS_VERSION_KEY)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0))
    }

    /// Increment the agent configuration version and return the new value.
    pub fn bump_agents_version(&self) -> Result<u64> {
        let next = self.agents_version()? + 1;
        self.kv_set(AGENTS_VERSION_KEY, &next.to_string())?;
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Outbox
    // -----------------------------------------------------------------------

    /// Persist a domain event for the delivery component.
    pub fn append_event(&self, event: &DomainEvent) -> Result<()> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO events (id, kind, auction_id, payload_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                event.kind(),
                event.auction_id(),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(())
    }

    /// Undelivered events, oldest first.
    pub fn pending_events(&self) -> Result<Vec<DomainEvent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM events WHERE delivered = 0 ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?).context("Corrupt event payload")?);
        }
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Sweeper
    // -----------------------------------------------------------------------

    /// Log a sweep task execution.
    pub fn log_sweep(&self, task_name: &str, result: &str, success: bool) -> Result<()> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO sweep_log (id, task_name, result, success)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, task_name, result, success as i32],
        )?;
        Ok(())
    }

    /// Number of logged runs of a sweep task.
    pub fn sweep_runs(&self, task_name: &str) -> Result<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sweep_log WHERE task_name = ?1",
            params![task_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_time(column: &str, s: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Corrupt {} timestamp: {:?}", column, s))?;
    Ok(parsed.with_timezone(&Utc))
}

struct AuctionRow {
    id: String,
    seller_id: String,
    title: String,
    description: String,
    images_json: String,
    starting_price: u64,
    current_price: u64,
    buy_now_price: Option<u64>,
    end_time: String,
    status: String,
    winner_id: Option<String>,
    created_at: String,
}

impl AuctionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            seller_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            images_json: row.get(4)?,
            starting_price: row.get(5)?,
            current_price: row.get(6)?,
            buy_now_price: row.get(7)?,
            end_time: row.get(8)?,
            status: row.get(9)?,
            winner_id: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_snapshot(self, bid_count: u64, last_bid: Option<Bid>) -> Result<AuctionSnapshot> {
        Ok(AuctionSnapshot {
            images: serde_json::from_str(&self.images_json).context("Corrupt images_json")?,
            status: self.status.parse()?,
            end_time: parse_time("end_time", &self.end_time)?,
            created_at: parse_time("created_at", &self.created_at)?,
            id: self.id,
            seller_id: self.seller_id,
            title: self.title,
            description: self.description,
            starting_price: self.starting_price,
            current_price: self.current_price,
            buy_now_price: self.buy_now_price,
            winner_id: self.winner_id,
            bid_count,
            last_bid,
        })
    }
}

struct BidRow {
    id: String,
    auction_id: String,
    bidder_id: String,
    display_name: String,
    amount: u64,
    is_automated: i32,
    created_at: String,
}

impl BidRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            auction_id: row.get(1)?,
            bidder_id: row.get(2)?,
            display_name: row.get(3)?,
            amount: row.get(4)?,
            is_automated: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_bid(self) -> Result<Bid> {
        Ok(Bid {
            timestamp: parse_time("bids.created_at", &self.created_at)?,
            id: self.id,
            auction_id: self.auction_id,
            bidder_id: self.bidder_id,
            display_name: self.display_name,
            amount: self.amount,
            is_automated: self.is_automated != 0,
        })
    }
}

struct AgentRow {
    id: String,
    name: String,
    balance: u64,
    bid_ceiling: u64,
    interval_min: u64,
    interval_max: u64,
    active: i32,
    targets_json: String,
}

impl AgentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            balance: row.get(2)?,
            bid_ceiling: row.get(3)?,
            interval_min: row.get(4)?,
            interval_max: row.get(5)?,
            active: row.get(6)?,
            targets_json: row.get(7)?,
        })
    }

    fn into_agent(self) -> Result<AutomatedBidAgent> {
        Ok(AutomatedBidAgent {
            target_auction_ids: serde_json::from_str(&self.targets_json)
                .context("Corrupt targets_json")?,
            id: self.id,
            name: self.name,
            balance: self.balance,
            bid_ceiling: self.bid_ceiling,
            interval_min: self.interval_min,
            interval_max: self.interval_max,
            active: self.active != 0,
        })
    }
}
