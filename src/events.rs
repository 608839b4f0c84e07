// Execution event bus
//
// Broadcasts terminal attempts, pipeline outcomes and provider health
// transitions to subscribers, and keeps a bounded history for the API.
//
// Numan Thabit 2025 Nov

use crate::router::health::HealthState;
use crate::types::{Direction, ExecutionAttempt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A provider attempt reached a terminal status.
    Attempt(ExecutionAttempt),
    HealthTransition {
        provider: String,
        from: HealthState,
        to: HealthState,
        consecutive_failures: u32,
        at: DateTime<Utc>,
    },
    /// Terminal outcome of one signal.
    Outcome {
        pair: String,
        direction: Direction,
        order_id: Option<Uuid>,
        outcome: &'static str,
        signature: Option<String>,
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    history: Arc<RwLock<VecDeque<ExecutionEvent>>>,
    capacity: usize,
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    pub async fn publish(&self, event: ExecutionEvent) {
        {
            let mut history = self.history.write().await;
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Most recent events, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<ExecutionEvent> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}
