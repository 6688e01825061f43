//! Caller-facing error taxonomy for the bid protocol.

use crate::types::AuctionStatus;
use thiserror::Error;

/// Why a bid or buy-now was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidRejection {
    #[error("auction is {status}, not accepting bids")]
    InvalidAuctionState { status: AuctionStatus },

    #[error("amount {amount} is not a multiple of the {increment} increment")]
    NotAnIncrement { amount: u64, increment: u64 },

    #[error("amount {amount} does not exceed current price {current_price}")]
    BelowCurrentPrice { amount: u64, current_price: u64 },

    #[error("bidder already holds the leading bid")]
    SelfBid,

    #[error("auction has no buy-now price")]
    BuyNowUnavailable,

    #[error("auction kept changing underneath the write ({attempts} attempts); re-fetch and retry")]
    Conflict { attempts: u32 },
}

impl BidRejection {
    /// Only write-race exhaustion is worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Stable short code for logs and the outbox.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAuctionState { .. } => "invalid_auction_state",
            Self::NotAnIncrement { .. } => "not_an_increment",
            Self::BelowCurrentPrice { .. } => "below_current_price",
            Self::SelfBid => "self_bid",
            Self::BuyNowUnavailable => "buy_now_unavailable",
            Self::Conflict { .. } => "conflict",
        }
    }
}

/// Errors surfaced by the market entry points.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("bid rejected: {0}")]
    Rejected(#[from] BidRejection),

    #[error("auction not found: {0}")]
    NotFound(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl MarketError {
    pub fn rejection(&self) -> Option<&BidRejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

pub type MarketResult<T> = std::result::Result<T, MarketError>;
