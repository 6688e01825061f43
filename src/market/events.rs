//! Notification sinks for domain events (`bid_placed`, `auction_won`,
//! `auction_sold`). Delivery itself happens elsewhere.

use crate::state::SqliteStore;
use crate::types::DomainEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// Persists events to the `events` outbox table.
pub struct OutboxSink {
    store: SqliteStore,
}

impl OutboxSink {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for OutboxSink {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let event = event.clone();
        self.store.with_db(move |db| db.append_event(&event)).await
    }
}

/// In-process fan-out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        // No subscribers is not a failure.
        if self.tx.send(event.clone()).is_err() {
            debug!("No subscribers for {} event", event.kind());
        }
        Ok(())
    }
}

/// Publishes to every inner sink, reporting the first failure after all ran.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
