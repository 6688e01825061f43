//! Database schema definitions and migrations.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for the auction state database.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Key-value store for runtime state
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Auction records. current_price/status/winner_id only change through
-- conditional writes.
CREATE TABLE IF NOT EXISTS auctions (
    id             TEXT PRIMARY KEY,
    seller_id      TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    images_json    TEXT NOT NULL DEFAULT '[]',
    starting_price INTEGER NOT NULL CHECK (starting_price > 0),
    current_price  INTEGER NOT NULL,
    buy_now_price  INTEGER,
    end_time       TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'active',
    winner_id      TEXT,
    created_at     TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at     TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (status = 'active' OR status = 'ended' OR status = 'sold'),
    CHECK (status != 'sold' OR winner_id IS NOT NULL)
);

-- Append-only bid log; seq is acceptance order
CREATE TABLE IF NOT EXISTS bids (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    auction_id   TEXT NOT NULL REFERENCES auctions(id),
    bidder_id    TEXT NOT NULL,
    display_name TEXT NOT NULL,
    amount       INTEGER NOT NULL CHECK (amount > 0),
    is_automated INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

-- Automated bidding agents
CREATE TABLE IF NOT EXISTS agents (
    id                 TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    balance            INTEGER NOT NULL DEFAULT 0,
    bid_ceiling        INTEGER NOT NULL DEFAULT 0,
    interval_min       INTEGER NOT NULL,
    interval_max       INTEGER NOT NULL,
    active             INTEGER NOT NULL DEFAULT 1,
    targets_json       TEXT NOT NULL DEFAULT '[]',
    created_at         TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Notification outbox
CREATE TABLE IF NOT EXISTS events (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    auction_id   TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    delivered    INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Sweeper execution log
CREATE TABLE IF NOT EXISTS sweep_log (
    id          TEXT PRIMARY KEY,
    task_name   TEXT NOT NULL,
    result      TEXT,
    success     INTEGER NOT NULL DEFAULT 1,
    executed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_auctions_status ON auctions(status);
CREATE INDEX IF NOT EXISTS idx_bids_auction ON bids(auction_id, seq);
CREATE INDEX IF NOT EXISTS idx_events_delivered ON events(delivered);
CREATE INDEX IF NOT EXISTS idx_sweep_task ON sweep_log(task_name);
"#;

