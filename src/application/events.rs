//! Event publisher
//!
//! Wraps the message-bus port with the gateway's envelope, topic map and
//! partitioning rules. Publish failures are contained here: telemetry loss
//! is logged and counted, never propagated into the receive loop.

use std::sync::Arc;

use tracing::warn;

use crate::domain::events::{topics, EventEnvelope};
use crate::infrastructure::MessageBus;

#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    node_id: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, node_id: impl Into<String>) -> Self {
        Self {
            bus,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start an envelope attributed to this node.
    pub fn envelope(&self, event_type: impl Into<String>, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(event_type, self.node_id.clone(), payload)
    }

    pub async fn station_event(&self, envelope: EventEnvelope) {
        self.publish(topics::STATION_EVENTS, envelope).await;
    }

    pub async fn session_event(&self, envelope: EventEnvelope) {
        self.publish(topics::SESSION_EVENTS, envelope).await;
    }

    pub async fn command_event(&self, envelope: EventEnvelope) {
        self.publish(topics::COMMAND_EVENTS, envelope).await;
    }

    pub async fn audit_event(&self, envelope: EventEnvelope) {
        self.publish(topics::AUDIT_EVENTS, envelope).await;
    }

    async fn publish(&self, topic: &str, envelope: EventEnvelope) {
        let key = envelope.partition_key().map(String::from);
        let event_type = envelope.event_type.clone();
        let body = match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(err) => {
                warn!(topic, event_type, %err, "Failed to encode event envelope");
                return;
            }
        };

        match self.bus.publish(topic, key.as_deref(), &body).await {
            Ok(()) => {
                metrics::counter!("ocpp_events_published_total", "topic" => topic.to_string())
                    .increment(1);
            }
            Err(err) => {
                metrics::counter!("ocpp_events_dropped_total", "topic" => topic.to_string())
                    .increment(1);
                warn!(topic, event_type, %err, "Event publish failed; dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MemoryMessageBus, MessageBus};

    #[tokio::test]
    async fn partitions_by_charge_point_id() {
        let bus = MemoryMessageBus::shared();
        let mut sub = bus.subscribe(topics::STATION_EVENTS, "test").await.unwrap();

        let publisher = EventPublisher::new(bus.clone(), "node-1");
        let env = publisher
            .envelope("ConnectorStatusChanged", serde_json::json!({"status": "Available"}))
            .with_charge_point("CP-1");
        publisher.station_event(env).await;

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.key.as_deref(), Some("CP-1"));
        let body: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(body["eventType"], "ConnectorStatusChanged");
        assert_eq!(body["source"], "node-1");
    }
}
