//! Pure bid validation against an auction snapshot.

use crate::error::BidRejection;
use crate::market::lifecycle;
use crate::types::AuctionSnapshot;
use chrono::{DateTime, Utc};

/// Check a proposed bid. Checks run in a fixed order and the first failure
/// wins: auction state, increment multiple, price, self-bid.
pub fn validate(
    snapshot: &AuctionSnapshot,
    amount: u64,
    bidder_id: &str,
    increment: u64,
    now: DateTime<Utc>,
) -> Result<(), BidRejection> {
    let status = lifecycle::effective_status(snapshot, now);
    if lifecycle::is_terminal(status) {
        return Err(BidRejection::InvalidAuctionState { status });
    }

    if increment == 0 || amount % increment != 0 {
        return Err(BidRejection::NotAnIncrement { amount, increment });
    }

    if amount <= snapshot.current_price {
        return Err(BidRejection::BelowCurrentPrice {
            amount,
            current_price: snapshot.current_price,
        });
    }

    if snapshot.leading_bidder() == Some(bidder_id) {
        return Err(BidRejection::SelfBid);
    }

    Ok(())
}
