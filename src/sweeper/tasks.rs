//! Built-in sweep task implementations.

use crate::market::lifecycle;
use crate::market::protocol::BidDesk;
use crate::market::repository::AuctionRepository;
use crate::state::SqliteStore;
use anyhow::{bail, Result};
use chrono::Utc;
use tracing::warn;

/// Execute a named sweep task.
pub async fn execute_task(
    task_name: &str,
    _params: &serde_json::Value,
    desk: &BidDesk,
    store: &SqliteStore,
) -> Result<String> {
    match task_name {
        "close_expired_auctions" => task_close_expired(desk, store).await,
        "heartbeat_ping" => task_heartbeat_ping(store).await,
        _ => bail!("Unknown sweep task: {}", task_name),
    }
}

/// Move every past-deadline auction to `ended`.
async fn task_close_expired(desk: &BidDesk, store: &SqliteStore) -> Result<String> {
    let now = Utc::now();
    let expired: Vec<_> = store
        .list_active()
        .await?
        .into_iter()
        .filter(|a| lifecycle::is_expired(a, now))
        .collect();

    let mut closed = 0;
    let mut with_winner = 0;
    for auction in &expired {
        match desk.close_expired(&auction.id).await {
            Ok(Some(result)) => {
                closed += 1;
                if result.winner_id.is_some() {
                    with_winner += 1;
                }
            }
            Ok(None) => {}
            // Left active; the next sweep tries again.
            Err(e) => warn!("Could not close auction {}: {}", auction.id, e),
        }
    }

    Ok(format!(
        "closed {} of {} expired ({} with winner)",
        closed,
        expired.len(),
        with_winner
    ))
}

/// Record that the sweeper is alive.
async fn task_heartbeat_ping(store: &SqliteStore) -> Result<String> {
    let now = Utc::now().to_rfc3339();
    store
        .with_db(move |db| db.kv_set("last_sweep", &now))
        .await?;
    Ok("pong".into())
}
