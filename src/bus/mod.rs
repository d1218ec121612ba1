//! Message Bus (spec §4.4... / §6): in-memory pub/sub with topic channels,
//! per-sender sequence, and wildcard subscription.

mod topic;

pub use topic::{build_topic, parse_topic, topic_matches, Channel};

use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// A message published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub sender_id: String,
    /// Strictly increasing per-sender sequence number (spec §5 "Ordering
    /// guarantees").
    pub sequence: u64,
    pub payload: Payload,
}

/// In-memory pub/sub bus. One broadcast channel carries every message;
/// subscribers filter by topic pattern on receipt so wildcard matching
/// doesn't require the publisher to know every subscriber's pattern.
pub struct MessageBus {
    sender: broadcast::Sender<BusMessage>,
    sequences: RwLock<HashMap<String, AtomicU64>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender, sequences: RwLock::new(HashMap::new()) }
    }

    fn next_sequence(&self, sender_id: &str) -> u64 {
        {
            let sequences = self.sequences.read().expect("bus lock poisoned");
            if let Some(counter) = sequences.get(sender_id) {
                return counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        let mut sequences = self.sequences.write().expect("bus lock poisoned");
        let counter = sequences.entry(sender_id.to_string()).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish `payload` to `topic` on behalf of `sender_id`, stamping it
    /// with that sender's next sequence number.
    pub fn publish(&self, topic: impl Into<String>, sender_id: impl Into<String>, payload: Payload) {
        let sender_id = sender_id.into();
        let sequence = self.next_sequence(&sender_id);
        let _ = self.sender.send(BusMessage { topic: topic.into(), sender_id, sequence, payload });
    }

    /// Subscribe to every message on the bus matching `pattern` (may
    /// contain `*` wildcard segments, or be a lone `*` matching everything).
    pub fn subscribe(&self, pattern: impl Into<String>) -> TopicSubscription {
        TopicSubscription { pattern: pattern.into(), receiver: self.sender.subscribe() }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription filtered to a topic pattern.
pub struct TopicSubscription {
    pattern: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscription {
    /// Await the next message matching this subscription's pattern,
    /// skipping any that don't match.
    pub async fn recv(&mut self) -> Result<BusMessage, broadcast::error::RecvError> {
        loop {
            let msg = self.receiver.recv().await?;
            if topic_matches(&self.pattern, &msg.topic) {
                return Ok(msg);
            }
        }
    }
}
