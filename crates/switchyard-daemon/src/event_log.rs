//! Bounded in-memory log of recent control plane events

use std::collections::VecDeque;
use std::sync::Arc;
use switchyard_types::{EventEnvelope, ServiceKey};
use tokio::sync::{broadcast, watch, RwLock};

/// Keeps the most recent events for the REST API
pub struct EventLog {
    entries: RwLock<VecDeque<EventEnvelope>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, event: EventEnvelope) {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Newest first, optionally limited to one service
    pub async fn recent(&self, limit: usize, key: Option<&ServiceKey>) -> Vec<EventEnvelope> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| key.map_or(true, |k| e.event.key() == k))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Record everything published on `events` until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<EventEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.record(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
