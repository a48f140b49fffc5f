//! Node directory
//!
//! Each gateway instance advertises its routing topics under
//! `nodes:{nodeId}` with a TTL, refreshed by a heartbeat task. Command
//! routing looks the owner's topics up here and falls back to the
//! deterministic names when the entry is missing or unreadable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::topics;
use crate::infrastructure::KvStore;
use crate::support::{KvError, Shutdown};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub command_topic: String,
    pub session_control_topic: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

fn node_key(node_id: &str) -> String {
    format!("nodes:{node_id}")
}

pub struct NodeDirectory {
    kv: Arc<dyn KvStore>,
    node_id: String,
    ttl: Duration,
    heartbeat_interval: Duration,
    started_at: DateTime<Utc>,
}

impl NodeDirectory {
    pub fn new(
        kv: Arc<dyn KvStore>,
        node_id: impl Into<String>,
        ttl: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            kv,
            node_id: node_id.into(),
            ttl,
            heartbeat_interval,
            started_at: Utc::now(),
        }
    }

    /// Write this node's advertisement.
    pub async fn register(&self) -> Result<(), KvError> {
        let entry = NodeEntry {
            command_topic: topics::node_command_requests(&self.node_id),
            session_control_topic: topics::node_session_control(&self.node_id),
            started_at: self.started_at,
            last_seen_at: Utc::now(),
        };
        let body = serde_json::to_string(&entry)?;
        self.kv
            .set(&node_key(&self.node_id), &body, Some(self.ttl))
            .await
    }

    /// Remove the advertisement (clean shutdown).
    pub async fn unregister(&self) -> Result<(), KvError> {
        self.kv.delete(&node_key(&self.node_id)).await
    }

    /// Advertised command topic of `node_id`, or the deterministic name.
    pub async fn command_topic_for(&self, node_id: &str) -> String {
        match self.lookup(node_id).await {
            Ok(Some(entry)) => entry.command_topic,
            Ok(None) => topics::node_command_requests(node_id),
            Err(err) => {
                debug!(node_id, %err, "Node directory lookup failed; using deterministic topic");
                topics::node_command_requests(node_id)
            }
        }
    }

    pub async fn lookup(&self, node_id: &str) -> Result<Option<NodeEntry>, KvError> {
        let raw = self.kv.get(&node_key(node_id)).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    /// Register now and keep the entry fresh until shutdown.
    pub fn spawn_heartbeat(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.register().await {
                warn!(%err, "Initial node registration failed");
            } else {
                info!(node_id = self.node_id.as_str(), "Node registered in directory");
            }

            let mut ticker = tokio::time::interval(self.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick consumed above

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.register().await {
                            warn!(%err, "Node heartbeat failed");
                        }
                    }
                    _ = shutdown.triggered() => {
                        if let Err(err) = self.unregister().await {
                            debug!(%err, "Node unregister on shutdown failed");
                        }
                        break;
                    }
                }
            }
        })
    }
}
