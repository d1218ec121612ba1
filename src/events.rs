//! The fleet event stream (spec §6 "Event stream (produced)").
//!
//! Re-architected per design note §9 as a broadcast channel with bounded
//! buffering: subscribers pull at their own pace, and a slow subscriber sees
//! `RecvError::Lagged` rather than stalling producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Default bounded capacity for a subsystem's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// The enumerated fleet event types (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    AgentUpdated,
    AgentRemoved,
    AgentSuspended,
    AgentQuarantined,
    AgentRoleSwitched,
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    RoundtableStarted,
    RoundtableVote,
    RoundtableConcluded,
    TrustUpdated,
    SecurityAlert,
}

/// A single fleet event, as broadcast by any subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub data: HashMap<String, Value>,
}

impl FleetEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            agent_id: None,
            task_id: None,
            data: HashMap::new(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A subsystem's outgoing event channel.
///
/// Wraps `tokio::sync::broadcast` so publishing never blocks on a slow
/// subscriber. Constructing a new subscriber is cheap and safe to do at any
/// time; events published before subscription are simply not seen.
#[derive(Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of active receivers, or `0` if
    /// there are none (never an error: a channel with no subscribers is a
    /// normal, supported state).
    pub fn publish(&self, event: FleetEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let channel = EventChannel::new();
        let mut rx = channel.subscribe();
        channel.publish(FleetEvent::new(EventType::AgentRegistered).with_agent("agent-1"));
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.event_type, EventType::AgentRegistered);
        assert_eq!(evt.agent_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_error() {
        let channel = EventChannel::new();
        assert_eq!(channel.publish(FleetEvent::new(EventType::TrustUpdated)), 0);
    }
}
