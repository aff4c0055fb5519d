//! Domain event system: decoupled observation of the control plane.
//!
//! The orchestrator and registry publish events when something interesting
//! happens; a CLI status line or a test can subscribe without coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool server process was started and completed its handshake
    ServerStarted {
        server: String,
        tool_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool server connection was closed
    ServerStopped {
        server: String,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator began a turn
    TurnStarted {
        input_preview: String,
        synthetic: bool,
        timestamp: DateTime<Utc>,
    },

    /// The router returned a decision
    DecisionReceived {
        tool_count: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The agent talked about work instead of doing it
    LazyBehaviorDetected {
        behavior: String,
        timestamp: DateTime<Utc>,
    },

    /// The supervisor check rejected a step
    SupervisorRejected {
        tool_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An episodic memory record was written
    EpisodeStored {
        task_id: String,
        artifacts: usize,
        timestamp: DateTime<Utc>,
    },

    /// The user interrupted a turn
    TurnCancelled { timestamp: DateTime<Utc> },
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "read_file".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "read_file");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnCancelled { timestamp: Utc::now() });
    }
}
