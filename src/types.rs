//! Shared types used across the auction engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Auction state machine
// ---------------------------------------------------------------------------

/// Lifecycle states of an auction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    /// Open for bids.
    Active,
    /// Closed by the expiry sweep once `end_time` passed.
    Ended,
    /// Won outright via buy-now (or a bid at/above the buy-now price).
    Sold,
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
            Self::Sold => write!(f, "sold"),
        }
    }
}

impl FromStr for AuctionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "sold" => Ok(Self::Sold),
            other => anyhow::bail!("Unknown auction status: {}", other),
        }
    }
}

impl Default for AuctionStatus {
    fn default() -> Self {
        Self::Active
    }
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

/// One accepted entry in an auction's bid log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub auction_id: String,
    pub bidder_id: String,
    pub display_name: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub is_automated: bool,
}

impl Bid {
    pub fn new(
        auction_id: &str,
        bidder_id: &str,
        display_name: &str,
        amount: u64,
        is_automated: bool,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            auction_id: auction_id.to_string(),
            bidder_id: bidder_id.to_string(),
            display_name: display_name.to_string(),
            amount,
            timestamp: Utc::now(),
            is_automated,
        }
    }
}

// ---------------------------------------------------------------------------
// Auctions
// ---------------------------------------------------------------------------

/// Fields supplied by a seller when listing a new auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuction {
    pub seller_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub starting_price: u64,
    #[serde(default)]
    pub buy_now_price: Option<u64>,
    pub end_time: DateTime<Utc>,
}

/// Immutable point-in-time view of an auction record.
///
/// Carries the most recent bid rather than the full log; the full log is
/// available through the store's bid history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub images: Vec<String>,
    pub starting_price: u64,
    pub current_price: u64,
    pub buy_now_price: Option<u64>,
    pub end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    pub winner_id: Option<String>,
    pub bid_count: u64,
    pub last_bid: Option<Bid>,
    pub created_at: DateTime<Utc>,
}

impl AuctionSnapshot {
    /// Bidder who authored the most recent accepted bid, if any.
    pub fn leading_bidder(&self) -> Option<&str> {
        self.last_bid.as_ref().map(|b| b.bidder_id.as_str())
    }
}

/// Field changes applied together by a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionUpdate {
    pub current_price: u64,
    pub status: AuctionStatus,
    pub winner_id: Option<String>,
    /// Bid appended to the log in the same write.
    pub bid: Option<Bid>,
}

/// Result of a conditional write against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Stored price or status no longer matched the caller's snapshot.
    Conflict,
}

// ---------------------------------------------------------------------------
// Bid protocol results
// ---------------------------------------------------------------------------

/// A bid that was durably appended to an auction's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedBid {
    pub bid: Bid,
    pub current_price: u64,
    pub status: AuctionStatus,
    /// Number of conditional-write attempts it took.
    pub attempts: u32,
}

impl AppliedBid {
    pub fn sold(&self) -> bool {
        self.status == AuctionStatus::Sold
    }
}

/// Outcome of a successful buy-now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldAuction {
    pub auction_id: String,
    pub winner_id: String,
    pub price: u64,
    pub bid: Bid,
}

/// Outcome of closing an expired auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedAuction {
    pub auction_id: String,
    /// Leading bidder at close; `None` when nobody bid.
    pub winner_id: Option<String>,
    pub final_price: u64,
}

// ---------------------------------------------------------------------------
// Automated bidding agents
// ---------------------------------------------------------------------------

/// Operator-configured automated bidder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomatedBidAgent {
    pub id: String,
    pub name: String,
    /// Ceiling check only; never debited by the engine.
    pub balance: u64,
    pub bid_ceiling: u64,
    /// Seconds.
    pub interval_min: u64,
    /// Seconds.
    pub interval_max: u64,
    pub active: bool,
    /// Allow-list of auctions; empty means every active auction.
    #[serde(default)]
    pub target_auction_ids: Vec<String>,
}

impl AutomatedBidAgent {
    /// Whether the agent belongs on the scheduling roster.
    pub fn is_eligible(&self) -> bool {
        self.active && self.balance > 0
    }
}

/// A bid an agent has decided to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidIntent {
    pub agent_id: String,
    pub display_name: String,
    pub auction_id: String,
    pub amount: u64,
}

// ---------------------------------------------------------------------------
// Domain events
// ---------------------------------------------------------------------------

/// Events handed to the notification sink for out-of-process delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BidPlaced {
        auction_id: String,
        bid_id: String,
        bidder_id: String,
        amount: u64,
        is_automated: bool,
    },
    AuctionWon {
        auction_id: String,
        winner_id: String,
        amount: u64,
    },
    AuctionSold {
        auction_id: String,
        buyer_id: String,
        amount: u64,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BidPlaced { .. } => "bid_placed",
            Self::AuctionWon { .. } => "auction_won",
            Self::AuctionSold { .. } => "auction_sold",
        }
    }

    pub fn auction_id(&self) -> &str {
        match self {
            Self::BidPlaced { auction_id, .. }
            | Self::AuctionWon { auction_id, .. }
            | Self::AuctionSold { auction_id, .. } => auction_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

/// A cron-scheduled sweep task entry from the YAML config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    pub name: String,
    pub schedule: String,
    pub task: String,
    pub enabled: bool,
    #[serde(default)]
    pub params: serde_json::Value,
}
