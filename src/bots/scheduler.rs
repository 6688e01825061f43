//! Agent scheduler: one independent, cancellable wake-up loop per roster
//! entry.
//!
//! The roster (active agents with a positive balance) is recomputed only
//! when agent configuration changes, signalled either by the in-process
//! registry or by the persisted config version moving (edits made by
//! another process). Each recomputation is a diff: new agents start,
//! removed agents are cancelled, changed agents restart, and everyone else
//! keeps their pending timer.

use crate::bots::decision::{self, Decision, NoOpReason};
use crate::bots::jitter;
use crate::error::MarketError;
use crate::market::protocol::BidDesk;
use crate::market::repository::AgentConfigStore;
use crate::types::{AppliedBid, AutomatedBidAgent};
use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one agent wake-up amounted to.
#[derive(Debug)]
pub enum WakeOutcome {
    Idle(NoOpReason),
    Placed(AppliedBid),
    /// The protocol refused the bid; the agent waits for its next tick.
    Dropped(MarketError),
}

/// Changes applied by one roster recomputation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RosterDiff {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: usize,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.restarted.is_empty() && self.stopped.is_empty()
    }
}

/// Agents eligible for scheduling right now.
pub fn compute_roster(agents: Vec<AutomatedBidAgent>) -> Vec<AutomatedBidAgent> {
    agents.into_iter().filter(|a| a.is_eligible()).collect()
}

/// Diff the running set against a freshly computed roster. Pure; ids in
/// each list are sorted.
pub fn plan_roster(
    running: &HashMap<String, AutomatedBidAgent>,
    roster: &[AutomatedBidAgent],
) -> RosterDiff {
    let mut diff = RosterDiff::default();

    for agent in roster {
        match running.get(&agent.id) {
            None => diff.started.push(agent.id.clone()),
            Some(current) if current != agent => diff.restarted.push(agent.id.clone()),
            Some(_) => diff.unchanged += 1,
        }
    }
    for id in running.keys() {
        if !roster.iter().any(|a| &a.id == id) {
            diff.stopped.push(id.clone());
        }
    }

    diff.started.sort();
    diff.restarted.sort();
    diff.stopped.sort();
    diff
}

/// Run one agent wake-up against the live auction set.
pub async fn wake<R: Rng + ?Sized>(
    desk: &BidDesk,
    agent: &AutomatedBidAgent,
    rng: &mut R,
) -> WakeOutcome {
    let live = match desk.repository().list_active().await {
        Ok(live) => live,
        Err(e) => return WakeOutcome::Dropped(MarketError::Store(e)),
    };

    let intent = match decision::decide(agent, &live, desk.increment(), Utc::now(), rng) {
        Decision::Bid(intent) => intent,
        Decision::NoOp(reason) => return WakeOutcome::Idle(reason),
    };

    match desk
        .place_bid(
            &intent.auction_id,
            &intent.agent_id,
            &intent.display_name,
            intent.amount,
            true,
        )
        .await
    {
        Ok(applied) => WakeOutcome::Placed(applied),
        Err(e) => WakeOutcome::Dropped(e),
    }
}

/// Free-running loop for one agent: sleep a fresh random interval, wake,
/// repeat until cancelled. A wake-up in progress is allowed to finish.
async fn agent_loop(desk: BidDesk, agent: AutomatedBidAgent, cancel: CancellationToken) {
    let mut rng = StdRng::from_entropy();
    info!(
        "Agent '{}' ({}) loop started: every {}-{}s, ceiling {}",
        agent.name, agent.id, agent.interval_min, agent.interval_max, agent.bid_ceiling
    );

    loop {
        let delay = jitter::next_delay(&mut rng, agent.interval_min, agent.interval_max);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        match wake(&desk, &agent, &mut rng).await {
            WakeOutcome::Idle(reason) => debug!("Agent {} idle: {}", agent.id, reason),
            WakeOutcome::Placed(applied) => info!(
                "Agent {} bid {} on auction {}",
                agent.id, applied.bid.amount, applied.bid.auction_id
            ),
            WakeOutcome::Dropped(MarketError::Rejected(rejection)) => {
                debug!("Agent {} bid dropped: {}", agent.id, rejection)
            }
            WakeOutcome::Dropped(e) => warn!("Agent {} wake-up failed: {}", agent.id, e),
        }
    }

    info!("Agent '{}' ({}) loop stopped", agent.name, agent.id);
}

struct AgentTask {
    agent: AutomatedBidAgent,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor owning the per-agent loops.
pub struct AgentScheduler {
    desk: BidDesk,
    agents: Arc<dyn AgentConfigStore>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    root: CancellationToken,
    tasks: HashMap<String, AgentTask>,
    /// Cancelled loops that may still be finishing a wake-up.
    retiring: Vec<JoinHandle<()>>,
}

impl AgentScheduler {
    pub fn new(
        desk: BidDesk,
        agents: Arc<dyn AgentConfigStore>,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            desk,
            agents,
            poll_interval,
            shutdown_timeout,
            root: CancellationToken::new(),
            tasks: HashMap::new(),
            retiring: Vec::new(),
        }
    }

    /// Ids of agents with a live loop, sorted.
    pub fn running_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Agent loops (scheduled or retiring) that have not finished yet.
    pub fn live_tasks(&self) -> usize {
        self.tasks.values().filter(|t| !t.handle.is_finished()).count()
            + self.retiring.iter().filter(|h| !h.is_finished()).count()
    }

    /// Recompute the roster from the config store and apply the diff.
    pub async fn sync_roster(&mut self) -> Result<RosterDiff> {
        let roster = compute_roster(self.agents.list_agents().await?);
        let running: HashMap<String, AutomatedBidAgent> = self
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.agent.clone()))
            .collect();
        let diff = plan_roster(&running, &roster);

        for id in diff.stopped.iter().chain(diff.restarted.iter()) {
            self.stop(id);
        }
        for agent in roster {
            if diff.started.contains(&agent.id) || diff.restarted.contains(&agent.id) {
                self.start(agent);
            }
        }
        self.retiring.retain(|h| !h.is_finished());

        if !diff.is_empty() {
            info!(
                "Roster updated: {} started, {} restarted, {} stopped, {} unchanged",
                diff.started.len(),
                diff.restarted.len(),
                diff.stopped.len(),
                diff.unchanged
            );
        }
        Ok(diff)
    }

    /// Run until `cancel` fires, recomputing the roster on config changes.
    pub async fn run(
        &mut self,
        mut changes: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("Agent scheduler started");

        let mut seen_version = self.agents.config_version().await?;
        self.sync_roster().await?;

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll.tick().await;

        let mut watching = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = changes.changed(), if watching => {
                    if changed.is_err() {
                        debug!("Agent registry dropped; relying on version polling");
                        watching = false;
                        continue;
                    }
                    self.resync(&mut seen_version).await;
                }
                _ = poll.tick() => {
                    match self.agents.config_version().await {
                        Ok(version) if version != seen_version => {
                            self.resync(&mut seen_version).await;
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to poll agent config version: {}", e),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn resync(&mut self, seen_version: &mut u64) {
        match self.agents.config_version().await {
            Ok(version) => *seen_version = version,
            Err(e) => warn!("Failed to read agent config version: {}", e),
        }
        if let Err(e) = self.sync_roster().await {
            error!("Roster recomputation failed: {}", e);
        }
    }

    /// Cancel every loop and wait (bounded) for them to finish. Loops still
    /// running at the deadline are aborted.
    pub async fn shutdown(&mut self) {
        self.root.cancel();

        let live = self.live_tasks();
        let mut handles: Vec<JoinHandle<()>> = self.retiring.drain(..).collect();
        handles.extend(self.tasks.drain().map(|(_, task)| task.handle));

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut aborted = 0;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Agent task join error: {}", e),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            warn!(
                "{} agent loops did not stop within {:?}; aborted",
                aborted, self.shutdown_timeout
            );
        }
        info!("Agent scheduler stopped ({} loops)", live);
    }

    fn start(&mut self, agent: AutomatedBidAgent) {
        let cancel = self.root.child_token();
        let handle = tokio::spawn(agent_loop(self.desk.clone(), agent.clone(), cancel.clone()));
        self.tasks.insert(
            agent.id.clone(),
            AgentTask {
                agent,
                cancel,
                handle,
            },
        );
    }

    fn stop(&mut self, agent_id: &str) {
        if let Some(task) = self.tasks.remove(agent_id) {
            task.cancel.cancel();
            self.retiring.push(task.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::registry::{AgentRegistry, AgentSettings};
    use crate::market::events::BroadcastSink;
    use crate::market::repository::AuctionRepository;
    use crate::state::SqliteStore;
    use crate::types::NewAuction;
    use chrono::Duration as ChronoDuration;

    const INC: u64 = 500;

    fn bot(id: &str, balance: u64, active: bool) -> AutomatedBidAgent {
        AutomatedBidAgent {
            id: id.into(),
            name: id.to_uppercase(),
            balance,
            bid_ceiling: 20_000,
            interval_min: 1,
            interval_max: 3,
            active,
            target_auction_ids: Vec::new(),
        }
    }

    fn settings(name: &str, ceiling: u64, interval_min: u64, interval_max: u64) -> AgentSettings {
        AgentSettings {
            name: name.into(),
            balance: 100_000,
            bid_ceiling: ceiling,
            interval_min,
            interval_max,
            target_auction_ids: Vec::new(),
        }
    }

    async fn market(start: u64) -> (SqliteStore, BidDesk, String) {
        let store = SqliteStore::in_memory().unwrap();
        let id = market_on(&store, start).await;
        let desk = BidDesk::new(Arc::new(store.clone()), Arc::new(BroadcastSink::new(64)), INC, 5);
        (store, desk, id)
    }

    async fn market_on(store: &SqliteStore, start: u64) -> String {
        store
            .create_auction(NewAuction {
                seller_id: "seller".into(),
                title: "Record player".into(),
                description: String::new(),
                images: Vec::new(),
                starting_price: start,
                buy_now_price: None,
                end_time: Utc::now() + ChronoDuration::hours(1),
            }, INC)
            .await
            .unwrap()
            .id
    }

    fn scheduler(store: &SqliteStore, desk: &BidDesk) -> AgentScheduler {
        AgentScheduler::new(
            desk.clone(),
            Arc::new(store.clone()),
            Duration::from_secs(10),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn roster_excludes_inactive_and_broke_agents() {
        let roster = compute_roster(vec![
            bot("a", 1_000, true),
            bot("b", 0, true),
            bot("c", 1_000, false),
        ]);
        let ids: Vec<&str> = roster.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn plan_only_touches_changed_agents() {
        let running: HashMap<String, AutomatedBidAgent> = [bot("a", 1_000, true), bot("b", 1_000, true), bot("c", 1_000, true)]
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let mut b = bot("b", 1_000, true);
        b.bid_ceiling = 30_000;
        let roster = vec![bot("a", 1_000, true), b, bot("d", 1_000, true)];

        assert_eq!(
            plan_roster(&running, &roster),
            RosterDiff {
                started: vec!["d".into()],
                restarted: vec!["b".into()],
                stopped: vec!["c".into()],
                unchanged: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_starts_and_stops_loops_by_diff() {
        let (store, desk, _id) = market(10_000).await;
        let registry = AgentRegistry::new(Arc::new(store.clone()));
        let mut sched = scheduler(&store, &desk);

        let a = registry.create(settings("a", 20_000, 5, 10)).await.unwrap();
        let b = registry.create(settings("b", 20_000, 5, 10)).await.unwrap();
        let diff = sched.sync_roster().await.unwrap();
        assert_eq!(diff.started.len(), 2);

        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(sched.running_agents(), expected);

        // No config change: nothing restarts.
        assert!(sched.sync_roster().await.unwrap().is_empty());

        registry.set_active(&a.id, false).await.unwrap();
        let diff = sched.sync_roster().await.unwrap();
        assert_eq!(diff.stopped, vec![a.id.clone()]);
        assert_eq!(diff.unchanged, 1);
        assert_eq!(sched.running_agents(), vec![b.id.clone()]);

        let mut richer = b.clone();
        richer.bid_ceiling = 40_000;
        registry.update(richer).await.unwrap();
        let diff = sched.sync_roster().await.unwrap();
        assert_eq!(diff.restarted, vec![b.id.clone()]);

        let mut broke = registry.get(&b.id).await.unwrap().unwrap();
        broke.balance = 0;
        registry.update(broke).await.unwrap();
        let diff = sched.sync_roster().await.unwrap();
        assert_eq!(diff.stopped, vec![b.id.clone()]);
        assert!(sched.running_agents().is_empty());

        sched.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lone_agent_bids_once_then_holds_the_lead() {
        let (store, desk, id) = market(10_000).await;
        let registry = AgentRegistry::new(Arc::new(store.clone()));
        let agent = registry.create(settings("solo", 20_000, 1, 2)).await.unwrap();

        let mut sched = scheduler(&store, &desk);
        let cancel = CancellationToken::new();
        let changes = registry.subscribe();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { sched.run(changes, run_cancel).await });

        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let history = store.bid_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].bidder_id, agent.id);
        assert!(history[0].is_automated);
        assert!(history[0].amount > 10_000 && history[0].amount <= 20_000);
    }

    #[tokio::test(start_paused = true)]
    async fn agents_created_while_running_join_the_roster() {
        let (store, desk, id) = market(10_000).await;
        let registry = AgentRegistry::new(Arc::new(store.clone()));

        let mut sched = scheduler(&store, &desk);
        let cancel = CancellationToken::new();
        let changes = registry.subscribe();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { sched.run(changes, run_cancel).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.bid_history(&id).await.unwrap().is_empty());

        registry.create(settings("late", 20_000, 1, 2)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.bid_history(&id).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_process_edits_are_picked_up_by_polling() {
        let (store, desk, id) = market(10_000).await;

        let mut sched = scheduler(&store, &desk);
        let cancel = CancellationToken::new();
        // A registry nobody writes through: only polling can notice changes.
        let (_tx, changes) = watch::channel(0u64);
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { sched.run(changes, run_cancel).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        store.save_agent(bot("remote", 100_000, true)).await.unwrap();

        // Poll interval is 10s, wake-up interval at most 3s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let history = store.bid_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].bidder_id, "remote");
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_agent_stops_bidding() {
        let (store, desk, id) = market(10_000).await;
        let registry = AgentRegistry::new(Arc::new(store.clone()));
        let agent = registry.create(settings("quitter", 50_000, 5, 6)).await.unwrap();

        let mut sched = scheduler(&store, &desk);
        let cancel = CancellationToken::new();
        let changes = registry.subscribe();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { sched.run(changes, run_cancel).await });

        tokio::time::sleep(Duration::from_secs(7)).await;
        let first = store.bid_history(&id).await.unwrap();
        assert_eq!(first.len(), 1);

        // Outbid the agent, then switch it off before its next wake-up.
        let price = store.read(&id).await.unwrap().unwrap().current_price;
        desk.place_bid(&id, "human", "Human", price + INC, false)
            .await
            .unwrap();
        registry.set_active(&agent.id, false).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let history = store.bid_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].bidder_id, "human");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let store = SqliteStore::in_memory().unwrap();
        let id = market_on(&store, 10_000).await;
        let repo = Arc::new(store.clone());
        let desk = BidDesk::new(repo.clone(), Arc::new(BroadcastSink::new(64)), INC, 5);
        let registry = AgentRegistry::new(Arc::new(store.clone()));
        for name in ["north", "east", "west"] {
            let mut s = settings(name, 1_000_000_000, 1, 2);
            s.balance = 1_000_000_000;
            registry.create(s).await.unwrap();
        }

        let mut sched = scheduler(&store, &desk);
        let baseline = Arc::strong_count(&repo);
        sched.sync_roster().await.unwrap();
        assert_eq!(sched.live_tasks(), 3);
        assert!(Arc::strong_count(&repo) > baseline);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!store.bid_history(&id).await.unwrap().is_empty());

        sched.shutdown().await;
        assert_eq!(sched.live_tasks(), 0);
        assert!(sched.running_agents().is_empty());
        // Every loop's future (and its desk clone) is gone.
        assert_eq!(Arc::strong_count(&repo), baseline);

        // Give every agent a reason to bid, then let the clock run.
        let price = store.read(&id).await.unwrap().unwrap().current_price;
        desk.place_bid(&id, "human", "Human", price + INC, false)
            .await
            .unwrap();
        let settled = store.bid_history(&id).await.unwrap().len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.bid_history(&id).await.unwrap().len(), settled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_agents_apply_exactly_one_bid() {
        let (store, desk, id) = market(10_000).await;
        // Both can only afford the very next step.
        let mut first = bot("first", 100_000, true);
        first.bid_ceiling = 10_500;
        let mut second = bot("second", 100_000, true);
        second.bid_ceiling = 10_500;

        let (d1, d2) = (desk.clone(), desk.clone());
        let t1 = tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(1);
            wake(&d1, &first, &mut rng).await
        });
        let t2 = tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(2);
            wake(&d2, &second, &mut rng).await
        });
        let outcomes = [t1.await.unwrap(), t2.await.unwrap()];

        let placed = outcomes
            .iter()
            .filter(|o| matches!(o, WakeOutcome::Placed(_)))
            .count();
        assert_eq!(placed, 1);

        let history = store.bid_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 10_500);
        assert_eq!(store.read(&id).await.unwrap().unwrap().current_price, 10_500);
    }

    #[tokio::test]
    async fn wake_without_auctions_is_idle() {
        let store = SqliteStore::in_memory().unwrap();
        let desk = BidDesk::new(Arc::new(store.clone()), Arc::new(BroadcastSink::new(8)), INC, 5);
        let outcome = wake(&desk, &bot("x", 1_000, true), &mut StdRng::seed_from_u64(0)).await;
        assert!(matches!(outcome, WakeOutcome::Idle(NoOpReason::NoCandidates)));
    }
}
