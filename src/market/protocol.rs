//! Bid acceptance protocol: the single choke point for every mutation of an
//! auction record.
//!
//! Each mutation follows the same shape:
//! 1. Read a snapshot
//! 2. Validate against it (rejections never reach the store)
//! 3. Conditional write keyed on the snapshot's price
//! 4. On conflict, re-read and retry up to `max_retries` times
//!
//! Human bids, agent bids, buy-now and expiry closing all go through here.

use crate::error::{BidRejection, MarketError, MarketResult};
use crate::market::events::NotificationSink;
use crate::market::lifecycle;
use crate::market::repository::AuctionRepository;
use crate::market::validator;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for placing bids and buying auctions outright.
#[derive(Clone)]
pub struct BidDesk {
    repo: Arc<dyn AuctionRepository>,
    sink: Arc<dyn NotificationSink>,
    increment: u64,
    max_retries: u32,
}

impl BidDesk {
    pub fn new(
        repo: Arc<dyn AuctionRepository>,
        sink: Arc<dyn NotificationSink>,
        increment: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            repo,
            sink,
            increment,
            max_retries: max_retries.max(1),
        }
    }

    pub fn increment(&self) -> u64 {
        self.increment
    }

    pub fn repository(&self) -> Arc<dyn AuctionRepository> {
        self.repo.clone()
    }

    /// Place a bid. Agents and humans share this path; `is_automated` only
    /// labels the log entry.
    pub async fn place_bid(
        &self,
        auction_id: &str,
        bidder_id: &str,
        display_name: &str,
        amount: u64,
        is_automated: bool,
    ) -> MarketResult<AppliedBid> {
        for attempt in 1..=self.max_retries {
            let snapshot = self.load(auction_id).await?;

            if let Err(rejection) =
                validator::validate(&snapshot, amount, bidder_id, self.increment, Utc::now())
            {
                debug!(
                    "Bid rejected: auction={} bidder={} amount={} reason={}",
                    auction_id,
                    bidder_id,
                    amount,
                    rejection.code()
                );
                return Err(rejection.into());
            }

            let sells = snapshot.buy_now_price.is_some_and(|p| amount >= p);
            let bid = Bid::new(auction_id, bidder_id, display_name, amount, is_automated);
            let update = AuctionUpdate {
                current_price: amount,
                status: if sells {
                    AuctionStatus::Sold
                } else {
                    AuctionStatus::Active
                },
                winner_id: sells.then(|| bidder_id.to_string()),
                bid: Some(bid.clone()),
            };

            match self.write(&snapshot, update).await? {
                WriteOutcome::Applied => {
                    info!(
                        "Bid accepted: auction={} bidder={} amount={} automated={} attempt={}",
                        auction_id, bidder_id, amount, is_automated, attempt
                    );

                    self.publish(DomainEvent::BidPlaced {
                        auction_id: auction_id.to_string(),
                        bid_id: bid.id.clone(),
                        bidder_id: bidder_id.to_string(),
                        amount,
                        is_automated,
                    })
                    .await;

                    if sells {
                        info!("Auction {} sold to {} at {}", auction_id, bidder_id, amount);
                        self.publish(DomainEvent::AuctionSold {
                            auction_id: auction_id.to_string(),
                            buyer_id: bidder_id.to_string(),
                            amount,
                        })
                        .await;
                    }

                    return Ok(AppliedBid {
                        bid,
                        current_price: amount,
                        status: if sells {
                            AuctionStatus::Sold
                        } else {
                            AuctionStatus::Active
                        },
                        attempts: attempt,
                    });
                }
                WriteOutcome::Conflict => {
                    debug!(
                        "Bid write conflict: auction={} bidder={} expected_price={} attempt={}/{}",
                        auction_id, bidder_id, snapshot.current_price, attempt, self.max_retries
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(
            "Bid gave up after {} conflicting writes: auction={} bidder={} amount={}",
            self.max_retries, auction_id, bidder_id, amount
        );
        Err(BidRejection::Conflict {
            attempts: self.max_retries,
        }
        .into())
    }

    /// Win an active auction outright at its buy-now price.
    ///
    /// Appends a synthetic bid at the buy-now price so the log stays the
    /// source of truth for the final price and winner.
    pub async fn buy_now(
        &self,
        auction_id: &str,
        bidder_id: &str,
        display_name: &str,
    ) -> MarketResult<SoldAuction> {
        for attempt in 1..=self.max_retries {
            let snapshot = self.load(auction_id).await?;

            let status = lifecycle::effective_status(&snapshot, Utc::now());
            if lifecycle::is_terminal(status) {
                return Err(BidRejection::InvalidAuctionState { status }.into());
            }
            let price = snapshot
                .buy_now_price
                .ok_or(BidRejection::BuyNowUnavailable)?;
            // Listed while a different increment was configured.
            if self.increment == 0 || price % self.increment != 0 {
                return Err(BidRejection::NotAnIncrement {
                    amount: price,
                    increment: self.increment,
                }
                .into());
            }

            let bid = Bid::new(auction_id, bidder_id, display_name, price, false);
            let update = AuctionUpdate {
                current_price: price,
                status: AuctionStatus::Sold,
                winner_id: Some(bidder_id.to_string()),
                bid: Some(bid.clone()),
            };

            match self.write(&snapshot, update).await? {
                WriteOutcome::Applied => {
                    info!(
                        "Auction {} bought now by {} at {} (attempt {})",
                        auction_id, bidder_id, price, attempt
                    );
                    self.publish(DomainEvent::AuctionSold {
                        auction_id: auction_id.to_string(),
                        buyer_id: bidder_id.to_string(),
                        amount: price,
                    })
                    .await;

                    return Ok(SoldAuction {
                        auction_id: auction_id.to_string(),
                        winner_id: bidder_id.to_string(),
                        price,
                        bid,
                    });
                }
                WriteOutcome::Conflict => {
                    debug!(
                        "Buy-now write conflict: auction={} buyer={} attempt={}/{}",
                        auction_id, bidder_id, attempt, self.max_retries
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(
            "Buy-now gave up after {} conflicting writes: auction={} buyer={}",
            self.max_retries, auction_id, bidder_id
        );
        Err(BidRejection::Conflict {
            attempts: self.max_retries,
        }
        .into())
    }

    /// Close an auction whose deadline has passed (`active -> ended`).
    ///
    /// Returns `None` when the auction is not (yet) expired or already
    /// terminal.
    pub async fn close_expired(&self, auction_id: &str) -> MarketResult<Option<ClosedAuction>> {
        for _ in 0..self.max_retries {
            let snapshot = self.load(auction_id).await?;
            if !lifecycle::is_expired(&snapshot, Utc::now()) {
                return Ok(None);
            }

            let update = lifecycle::expiry_update(&snapshot);
            let winner_id = update.winner_id.clone();

            match self.write(&snapshot, update).await? {
                WriteOutcome::Applied => {
                    match &winner_id {
                        Some(winner) => {
                            info!(
                                "Auction {} ended; won by {} at {}",
                                auction_id, winner, snapshot.current_price
                            );
                            self.publish(DomainEvent::AuctionWon {
                                auction_id: auction_id.to_string(),
                                winner_id: winner.clone(),
                                amount: snapshot.current_price,
                            })
                            .await;
                        }
                        None => info!("Auction {} ended with no bids", auction_id),
                    }

                    return Ok(Some(ClosedAuction {
                        auction_id: auction_id.to_string(),
                        winner_id,
                        final_price: snapshot.current_price,
                    }));
                }
                WriteOutcome::Conflict => tokio::task::yield_now().await,
            }
        }

        Err(BidRejection::Conflict {
            attempts: self.max_retries,
        }
        .into())
    }

    /// Conditional write keyed on the snapshot's price, refusing any status
    /// change the lifecycle does not allow.
    async fn write(
        &self,
        snapshot: &AuctionSnapshot,
        update: AuctionUpdate,
    ) -> MarketResult<WriteOutcome> {
        if !lifecycle::permits(snapshot.status, update.status) {
            return Err(BidRejection::InvalidAuctionState {
                status: snapshot.status,
            }
            .into());
        }
        Ok(self
            .repo
            .conditional_write(&snapshot.id, snapshot.current_price, update)
            .await?)
    }

    async fn load(&self, auction_id: &str) -> MarketResult<AuctionSnapshot> {
        self.repo
            .read(auction_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(auction_id.to_string()))
    }

    /// The write is already durable, so a sink failure is only logged.
    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.sink.publish(&event).await {
            warn!(
                "Failed to publish {} for auction {}: {:#}",
                event.kind(),
                event.auction_id(),
                e
            );
        }
    }
}
