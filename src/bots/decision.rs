//! Per-wake-up bidding decision for one automated agent.
//!
//! Steps:
//! 1. Candidates: active auctions, narrowed to the agent's targets if any
//! 2. Affordable: price under the ceiling and balance covers one increment
//! 3. Pick one uniformly at random
//! 4. Skip it if the agent leads or is the seller
//! 5. Draw a random increment multiple in `[price + increment, min(ceiling, balance)]`
//!
//! The RNG is injected so tests can seed it.

use crate::market::lifecycle;
use crate::types::{AuctionSnapshot, AutomatedBidAgent, BidIntent};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;

/// Why a wake-up produced no bid. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    NoCandidates,
    NothingAffordable,
    AlreadyLeading,
    OwnAuction,
    NoValidAmount,
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidates => write!(f, "no_candidates"),
            Self::NothingAffordable => write!(f, "nothing_affordable"),
            Self::AlreadyLeading => write!(f, "already_leading"),
            Self::OwnAuction => write!(f, "own_auction"),
            Self::NoValidAmount => write!(f, "no_valid_amount"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Bid(BidIntent),
    NoOp(NoOpReason),
}

pub fn decide<R: Rng + ?Sized>(
    agent: &AutomatedBidAgent,
    live: &[AuctionSnapshot],
    increment: u64,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Decision {
    if increment == 0 {
        return Decision::NoOp(NoOpReason::NoValidAmount);
    }

    let candidates: Vec<&AuctionSnapshot> = live
        .iter()
        .filter(|a| lifecycle::accepts_bids(a, now))
        .filter(|a| {
            agent.target_auction_ids.is_empty() || agent.target_auction_ids.contains(&a.id)
        })
        .collect();
    if candidates.is_empty() {
        return Decision::NoOp(NoOpReason::NoCandidates);
    }

    let affordable: Vec<&AuctionSnapshot> = candidates
        .into_iter()
        .filter(|a| {
            a.current_price < agent.bid_ceiling
                && agent.balance >= a.current_price.saturating_add(increment)
        })
        .collect();

    let Some(auction) = affordable.choose(rng).copied() else {
        return Decision::NoOp(NoOpReason::NothingAffordable);
    };

    if auction.leading_bidder() == Some(agent.id.as_str()) {
        return Decision::NoOp(NoOpReason::AlreadyLeading);
    }
    if auction.seller_id == agent.id {
        return Decision::NoOp(NoOpReason::OwnAuction);
    }

    let min_bid = auction.current_price.saturating_add(increment);
    let max_bid = agent.bid_ceiling.min(agent.balance);
    if min_bid > max_bid {
        return Decision::NoOp(NoOpReason::NoValidAmount);
    }

    let lo = min_bid.div_ceil(increment);
    let hi = max_bid / increment;
    if lo > hi {
        return Decision::NoOp(NoOpReason::NoValidAmount);
    }

    let multiple = rng.gen_range(lo..=hi);
    Decision::Bid(BidIntent {
        agent_id: agent.id.clone(),
        display_name: agent.name.clone(),
        auction_id: auction.id.clone(),
        amount: multiple * increment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuctionStatus, Bid};
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const INC: u64 = 500;

    fn agent(balance: u64, ceiling: u64) -> AutomatedBidAgent {
        AutomatedBidAgent {
            id: "bot-1".into(),
            name: "Bidbot".into(),
            balance,
            bid_ceiling: ceiling,
            interval_min: 1,
            interval_max: 5,
            active: true,
            target_auction_ids: Vec::new(),
        }
    }

    fn auction(id: &str, current_price: u64) -> AuctionSnapshot {
        let now = Utc::now();
        AuctionSnapshot {
            id: id.into(),
            seller_id: "seller".into(),
            title: format!("Lot {id}"),
            description: String::new(),
            images: Vec::new(),
            starting_price: current_price,
            current_price,
            buy_now_price: None,
            end_time: now + Duration::hours(1),
            status: AuctionStatus::Active,
            winner_id: None,
            bid_count: 0,
            last_bid: None,
            created_at: now,
        }
    }

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn min_bid_above_balance_is_noop() {
        let decision = decide(&agent(5_000, 12_000), &[auction("a", 10_000)], INC, Utc::now(), &mut rng(1));
        assert_eq!(decision, Decision::NoOp(NoOpReason::NothingAffordable));
    }

    #[test]
    fn empty_market_is_noop() {
        assert_eq!(
            decide(&agent(50_000, 50_000), &[], INC, Utc::now(), &mut rng(1)),
            Decision::NoOp(NoOpReason::NoCandidates)
        );
    }

    #[test]
    fn terminal_and_expired_auctions_are_not_candidates() {
        let mut sold = auction("sold", 1_000);
        sold.status = AuctionStatus::Sold;
        let mut expired = auction("expired", 1_000);
        expired.end_time = Utc::now() - Duration::seconds(1);

        assert_eq!(
            decide(&agent(50_000, 50_000), &[sold, expired], INC, Utc::now(), &mut rng(1)),
            Decision::NoOp(NoOpReason::NoCandidates)
        );
    }

    #[test]
    fn same_seed_same_intent() {
        let live = vec![auction("a", 1_000), auction("b", 2_000), auction("c", 3_000)];
        let bot = agent(40_000, 30_000);
        let first = decide(&bot, &live, INC, Utc::now(), &mut rng(42));
        let second = decide(&bot, &live, INC, Utc::now(), &mut rng(42));
        assert_eq!(first, second);
        assert!(matches!(first, Decision::Bid(_)));
    }

    #[test]
    fn single_valid_amount_is_exact() {
        // min 10_500, max min(11_000, 10_900) = 10_900 -> only 10_500
        let decision = decide(&agent(10_900, 11_000), &[auction("a", 10_000)], INC, Utc::now(), &mut rng(5));
        assert_eq!(
            decision,
            Decision::Bid(BidIntent {
                agent_id: "bot-1".into(),
                display_name: "Bidbot".into(),
                auction_id: "a".into(),
                amount: 10_500,
            })
        );
    }

    #[test]
    fn off_grid_price_rounds_min_bid_up() {
        // 10_200 + 500 = 10_700 -> first multiple is 11_000
        let decision = decide(&agent(11_000, 11_000), &[auction("a", 10_200)], INC, Utc::now(), &mut rng(9));
        match decision {
            Decision::Bid(intent) => assert_eq!(intent.amount, 11_000),
            other => panic!("expected bid, got {other:?}"),
        }
    }

    #[test]
    fn ceiling_below_next_step_is_noop() {
        // Affordable (price under ceiling, balance covers a step) but no multiple fits.
        let decision = decide(&agent(100_000, 10_400), &[auction("a", 10_000)], INC, Utc::now(), &mut rng(2));
        assert_eq!(decision, Decision::NoOp(NoOpReason::NoValidAmount));
    }

    #[test]
    fn leading_agent_stays_put() {
        let mut a = auction("a", 10_500);
        a.last_bid = Some(Bid::new("a", "bot-1", "Bidbot", 10_500, true));
        assert_eq!(
            decide(&agent(50_000, 50_000), &[a], INC, Utc::now(), &mut rng(1)),
            Decision::NoOp(NoOpReason::AlreadyLeading)
        );
    }

    #[test]
    fn agent_never_bids_on_its_own_listing() {
        let mut a = auction("a", 1_000);
        a.seller_id = "bot-1".into();
        assert_eq!(
            decide(&agent(50_000, 50_000), &[a], INC, Utc::now(), &mut rng(1)),
            Decision::NoOp(NoOpReason::OwnAuction)
        );
    }

    #[test]
    fn targets_restrict_candidates() {
        let mut bot = agent(50_000, 50_000);
        bot.target_auction_ids = vec!["b".into()];
        let live = vec![auction("a", 1_000), auction("b", 1_000), auction("c", 1_000)];
        for seed in 0..50 {
            match decide(&bot, &live, INC, Utc::now(), &mut rng(seed)) {
                Decision::Bid(intent) => assert_eq!(intent.auction_id, "b"),
                other => panic!("expected bid, got {other:?}"),
            }
        }

        bot.target_auction_ids = vec!["gone".into()];
        assert_eq!(
            decide(&bot, &live, INC, Utc::now(), &mut rng(1)),
            Decision::NoOp(NoOpReason::NoCandidates)
        );
    }

    #[test]
    fn intents_never_exceed_ceiling_or_balance() {
        let mut r = rng(1234);
        for seed in 0..500u64 {
            let balance = r.gen_range(0..40u64) * 700;
            let ceiling = r.gen_range(0..40u64) * 650;
            let live: Vec<_> = (0..4)
                .map(|i| auction(&format!("a{i}"), r.gen_range(1..50u64) * 300))
                .collect();
            let bot = agent(balance, ceiling);

            if let Decision::Bid(intent) = decide(&bot, &live, INC, Utc::now(), &mut rng(seed)) {
                let target = live.iter().find(|a| a.id == intent.auction_id).unwrap();
                assert!(intent.amount <= ceiling.min(balance));
                assert!(intent.amount > target.current_price);
                assert_eq!(intent.amount % INC, 0);
            }
        }
    }

    #[test]
    fn selection_is_uniform_across_affordable_auctions() {
        let live = vec![auction("a", 1_000), auction("b", 1_000), auction("c", 1_000)];
        let bot = agent(100_000, 100_000);
        let mut r = rng(2024);
        let mut counts: HashMap<String, u32> = HashMap::new();

        for _ in 0..3_000 {
            if let Decision::Bid(intent) = decide(&bot, &live, INC, Utc::now(), &mut r) {
                *counts.entry(intent.auction_id).or_default() += 1;
            }
        }

        assert_eq!(counts.values().sum::<u32>(), 3_000);
        for id in ["a", "b", "c"] {
            let n = counts[id];
            assert!((850..=1_150).contains(&n), "auction {id} picked {n} times");
        }
    }

    #[test]
    fn unaffordable_auctions_are_never_picked() {
        let live = vec![auction("cheap", 1_000), auction("pricey", 90_000)];
        let bot = agent(20_000, 20_000);
        for seed in 0..100 {
            match decide(&bot, &live, INC, Utc::now(), &mut rng(seed)) {
                Decision::Bid(intent) => assert_eq!(intent.auction_id, "cheap"),
                other => panic!("expected bid, got {other:?}"),
            }
        }
    }
}
