//! Domain event system — decoupled observation of runs.
//!
//! The agent loop publishes events as a run progresses. Other components
//! (logging, the HTTP layer, tests) can subscribe without coupling to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run passed validation and entered the loop
    RunStarted {
        query_preview: String,
        attachments: usize,
        timestamp: DateTime<Utc>,
    },

    /// The model answered (or failed) for one iteration
    ModelResponded {
        iteration: u32,
        model: String,
        tokens_used: u32,
        parse_strategy: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        iteration: u32,
        tool_name: String,
        success: bool,
        degraded: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run returned
    RunCompleted {
        iterations: u32,
        exhausted: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
