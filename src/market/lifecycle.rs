//! Auction lifecycle: `active -> ended | sold`, both terminal.
//!
//! `ended` is time-driven and performed by the expiry sweep; bid placement
//! only respects it by treating a past-deadline auction as closed.
//! `sold` is bid-driven and performed by the bid protocol.

use crate::types::{AuctionSnapshot, AuctionStatus, AuctionUpdate};
use chrono::{DateTime, Utc};

/// Whether `from -> to` is a legal transition.
pub fn can_transition(from: AuctionStatus, to: AuctionStatus) -> bool {
    matches!(
        (from, to),
        (AuctionStatus::Active, AuctionStatus::Ended) | (AuctionStatus::Active, AuctionStatus::Sold)
    )
}

/// Whether a write may move a record from `from` to `to`. An ordinary bid
/// keeps an active auction active.
pub fn permits(from: AuctionStatus, to: AuctionStatus) -> bool {
    (from == AuctionStatus::Active && to == AuctionStatus::Active) || can_transition(from, to)
}

pub fn is_terminal(status: AuctionStatus) -> bool {
    status != AuctionStatus::Active
}

/// Active record whose deadline has passed but the sweep has not closed yet.
pub fn is_expired(snapshot: &AuctionSnapshot, now: DateTime<Utc>) -> bool {
    snapshot.status == AuctionStatus::Active && now >= snapshot.end_time
}

/// Status as bidders must see it at `now`.
pub fn effective_status(snapshot: &AuctionSnapshot, now: DateTime<Utc>) -> AuctionStatus {
    if is_expired(snapshot, now) {
        AuctionStatus::Ended
    } else {
        snapshot.status
    }
}

pub fn accepts_bids(snapshot: &AuctionSnapshot, now: DateTime<Utc>) -> bool {
    effective_status(snapshot, now) == AuctionStatus::Active
}

/// Update that closes an expired auction, handing it to the leading bidder.
pub fn expiry_update(snapshot: &AuctionSnapshot) -> AuctionUpdate {
    AuctionUpdate {
        current_price: snapshot.current_price,
        status: AuctionStatus::Ended,
        winner_id: snapshot.leading_bidder().map(str::to_string),
        bid: None,
    }
}
