//! Bidhouse — live ascending-price auctions with automated bidding agents.
//!
//! Every bid, human or automated, goes through one acceptance protocol that
//! validates against a snapshot and commits with a compare-and-swap on the
//! auction's price, retrying a bounded number of times on conflict.

pub mod bots;
pub mod config;
pub mod error;
pub mod market;
pub mod state;
pub mod sweeper;
pub mod types;
