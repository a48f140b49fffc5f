//! Message-bus port
//!
//! Topic-based publish/subscribe with consumer groups: a message on a topic
//! is delivered to every group, and to exactly one subscriber within each
//! group. Outbound messages carry a partition key so per-charger order is
//! preserved downstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::support::{BusError, CircuitBreaker};

/// A message as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`, partitioned by `key` when present.
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &str)
        -> Result<(), BusError>;

    /// Subscribe to `topic` as a member of `group`.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<BusSubscription, BusError>;
}

pub struct BusSubscription {
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl BusSubscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

// ── In-memory implementation ───────────────────────────────────

struct Group {
    members: Vec<mpsc::UnboundedSender<BusMessage>>,
    next: AtomicUsize,
}

/// In-memory bus for tests and single-node runs. Messages within a group
/// rotate across members; every group sees every message.
#[derive(Default)]
pub struct MemoryMessageBus {
    // topic → group → members
    topics: Mutex<HashMap<String, HashMap<String, Group>>>,
}

impl MemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl MessageBus for MemoryMessageBus {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &str,
    ) -> Result<(), BusError> {
        let mut topics = self.topics.lock().unwrap();
        let Some(groups) = topics.get_mut(topic) else {
            debug!(topic, "Publish with no subscribers");
            return Ok(());
        };
        let message = BusMessage {
            topic: topic.to_string(),
            key: key.map(String::from),
            payload: payload.to_string(),
        };
        for group in groups.values_mut() {
            // Rotate within the group; skip members that have gone away.
            group.members.retain(|m| !m.is_closed());
            if group.members.is_empty() {
                continue;
            }
            let idx = group.next.fetch_add(1, Ordering::Relaxed) % group.members.len();
            let _ = group.members[idx].send(message.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<BusSubscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_insert_with(|| Group {
                members: Vec::new(),
                next: AtomicUsize::new(0),
            })
            .members
            .push(tx);
        Ok(BusSubscription { receiver: rx })
    }
}

// ── Circuit-breaker guard ──────────────────────────────────────

/// Guards the publish path with a deadline and a circuit breaker.
/// Subscriptions are long-lived and pass through untouched.
pub struct GuardedMessageBus {
    inner: Arc<dyn MessageBus>,
    breaker: Arc<CircuitBreaker>,
    op_timeout: Duration,
}

impl GuardedMessageBus {
    pub fn new(
        inner: Arc<dyn MessageBus>,
        breaker: Arc<CircuitBreaker>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker,
            op_timeout,
        }
    }
}

#[async_trait]
impl MessageBus for GuardedMessageBus {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &str,
    ) -> Result<(), BusError> {
        if !self.breaker.allow() {
            return Err(BusError::CircuitOpen);
        }
        match timeout(self.op_timeout, self.inner.publish(topic, key, payload)).await {
            Ok(Ok(())) => {
                self.breaker.record_success();
                Ok(())
            }
            Ok(Err(err)) => {
                self.breaker.record_failure();
                Err(err)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(BusError::PublishFailed("publish timed out".into()))
            }
        }
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<BusSubscription, BusError> {
        self.inner.subscribe(topic, group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_group_sees_the_message() {
        let bus = MemoryMessageBus::new();
        let mut a = bus.subscribe("t", "group-a").await.unwrap();
        let mut b = bus.subscribe("t", "group-b").await.unwrap();
        bus.publish("t", Some("CP-1"), "hello").await.unwrap();

        let ma = a.recv().await.unwrap();
        let mb = b.recv().await.unwrap();
        assert_eq!(ma.payload, "hello");
        assert_eq!(ma.key.as_deref(), Some("CP-1"));
        assert_eq!(mb.payload, "hello");
    }

    #[tokio::test]
    async fn group_members_share_work() {
        let bus = MemoryMessageBus::new();
        let mut one = bus.subscribe("t", "g").await.unwrap();
        let mut two = bus.subscribe("t", "g").await.unwrap();
        bus.publish("t", None, "m1").await.unwrap();
        bus.publish("t", None, "m2").await.unwrap();

        // Exactly one member receives each message.
        let m1 = one.recv().await.unwrap();
        let m2 = two.recv().await.unwrap();
        assert_ne!(m1.payload, m2.payload);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryMessageBus::new();
        bus.publish("empty", None, "x").await.unwrap();
    }
}
