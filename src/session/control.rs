//! Session control — cross-node force-disconnect
//!
//! When a claim results in TAKEOVER, the winning node tells the previous
//! owner to drop its socket via the loser's session-control topic. The
//! consumer side only closes when the local epoch is strictly older than
//! the takeover's epoch, so echoes can never kill a freshly-won session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::topics;
use crate::infrastructure::MessageBus;
use crate::session::SharedSessionRegistry;
use crate::support::{BusError, Shutdown};

/// Close code sent when a session moves to another node.
pub const CLOSE_SESSION_TRANSFERRED: u16 = 1012;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceDisconnect {
    pub charge_point_id: String,
    pub new_epoch: u64,
    pub new_owner_node_id: String,
    pub reason: String,
}

pub struct SessionControl {
    bus: Arc<dyn MessageBus>,
    registry: SharedSessionRegistry,
    node_id: String,
}

impl SessionControl {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: SharedSessionRegistry,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            registry,
            node_id: node_id.into(),
        }
    }

    /// Tell `previous_owner` to drop its socket for this charger.
    pub async fn publish_force_disconnect(
        &self,
        previous_owner: &str,
        message: ForceDisconnect,
    ) -> Result<(), BusError> {
        let topic = topics::node_session_control(previous_owner);
        let body = serde_json::to_string(&message)
            .map_err(|e| BusError::PublishFailed(e.to_string()))?;
        info!(
            charge_point_id = message.charge_point_id.as_str(),
            previous_owner,
            new_epoch = message.new_epoch,
            "Publishing force-disconnect"
        );
        self.bus
            .publish(&topic, Some(&message.charge_point_id), &body)
            .await
    }

    /// Consume this node's control topic and close superseded sockets.
    pub fn spawn_consumer(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let topic = topics::node_session_control(&self.node_id);
            let group = format!("session-control-{}", self.node_id);
            let mut subscription = match self.bus.subscribe(&topic, &group).await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(topic = topic.as_str(), %err, "Session-control subscribe failed");
                    return;
                }
            };
            info!(topic = topic.as_str(), "Session-control consumer started");

            loop {
                tokio::select! {
                    message = subscription.recv() => {
                        let Some(message) = message else { break };
                        self.handle(&message.payload);
                    }
                    _ = shutdown.triggered() => break,
                }
            }
        })
    }

    fn handle(&self, payload: &str) {
        let message: ForceDisconnect = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, "Dropping undecodable session-control message");
                return;
            }
        };

        let closed = self.registry.close_if_epoch_older(
            &message.charge_point_id,
            message.new_epoch,
            CLOSE_SESSION_TRANSFERRED,
            "session transferred",
        );
        if closed {
            metrics::counter!("ocpp_forced_disconnects_total").increment(1);
            info!(
                charge_point_id = message.charge_point_id.as_str(),
                new_owner = message.new_owner_node_id.as_str(),
                new_epoch = message.new_epoch,
                "Closed session superseded by takeover"
            );
        } else {
            debug!(
                charge_point_id = message.charge_point_id.as_str(),
                new_epoch = message.new_epoch,
                "Ignoring force-disconnect (no session or epoch not older)"
            );
        }
    }
}
