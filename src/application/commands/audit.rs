//! Command audit trail
//!
//! Mirrors the dispatch state machine `Sent → {Accepted | Rejected |
//! Failed | Timeout}` into the KV store and onto the audit topic. Audit is
//! best-effort: a degraded store must never block command dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::application::events::EventPublisher;
use crate::infrastructure::{CasDecision, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditState {
    Sent,
    Accepted,
    Rejected,
    Failed,
    Timeout,
}

impl AuditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "Sent",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Failed => "Failed",
            Self::Timeout => "Timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub command_id: String,
    pub charge_point_id: String,
    pub command_type: String,
    pub action: String,
    pub message_id: String,
    pub state: AuditState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn audit_key(command_id: &str) -> String {
    format!("command-audit:{command_id}")
}

fn unique_key(message_id: &str) -> String {
    format!("command-audit:unique:{message_id}")
}

pub struct CommandAudit {
    kv: Arc<dyn KvStore>,
    events: EventPublisher,
    ttl: Duration,
}

impl CommandAudit {
    pub fn new(kv: Arc<dyn KvStore>, events: EventPublisher, ttl: Duration) -> Self {
        Self { kv, events, ttl }
    }

    /// Record dispatch of a command and index its message id.
    pub async fn record_sent(
        &self,
        command_id: &str,
        charge_point_id: &str,
        command_type: &str,
        action: &str,
        message_id: &str,
    ) {
        let record = AuditRecord {
            command_id: command_id.to_string(),
            charge_point_id: charge_point_id.to_string(),
            command_type: command_type.to_string(),
            action: action.to_string(),
            message_id: message_id.to_string(),
            state: AuditState::Sent,
            detail: None,
            updated_at: Utc::now(),
        };
        self.write(&record).await;
        if let Err(err) = self
            .kv
            .set(&unique_key(message_id), command_id, Some(self.ttl))
            .await
        {
            debug!(command_id, message_id, %err, "Audit message-id index write failed");
        }
        self.emit(&record).await;
    }

    /// Record the terminal state of a dispatched command.
    pub async fn record_outcome(&self, command_id: &str, state: AuditState, detail: Option<String>) {
        let key = audit_key(command_id);
        let ttl = self.ttl;
        let updated_at = Utc::now();
        let detail_for_write = detail.clone();

        let result = self
            .kv
            .compare_and_update(
                &key,
                Box::new(move |current| {
                    let Some(mut record) = current
                        .and_then(|raw| serde_json::from_str::<AuditRecord>(raw).ok())
                    else {
                        return CasDecision::Keep;
                    };
                    record.state = state;
                    record.detail = detail_for_write;
                    record.updated_at = updated_at;
                    match serde_json::to_string(&record) {
                        Ok(value) => CasDecision::Write {
                            value,
                            ttl: Some(ttl),
                        },
                        Err(_) => CasDecision::Keep,
                    }
                }),
            )
            .await;
        if let Err(err) = result {
            debug!(command_id, state = state.as_str(), %err, "Audit outcome write failed");
        }

        let envelope = self.events.envelope(
            "CommandAudit",
            json!({
                "commandId": command_id,
                "state": state.as_str(),
                "detail": detail,
            }),
        );
        self.events.audit_event(envelope).await;
    }

    /// Command id indexed by outbound message id, when still retained.
    pub async fn command_for_message(&self, message_id: &str) -> Option<String> {
        self.kv.get(&unique_key(message_id)).await.ok().flatten()
    }

    async fn write(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(body) => {
                if let Err(err) = self
                    .kv
                    .set(&audit_key(&record.command_id), &body, Some(self.ttl))
                    .await
                {
                    debug!(command_id = record.command_id.as_str(), %err, "Audit write failed");
                }
            }
            Err(err) => {
                debug!(command_id = record.command_id.as_str(), %err, "Audit encode failed");
            }
        }
    }

    async fn emit(&self, record: &AuditRecord) {
        let envelope = self
            .events
            .envelope(
                "CommandAudit",
                json!({
                    "commandId": record.command_id,
                    "commandType": record.command_type,
                    "action": record.action,
                    "messageId": record.message_id,
                    "state": record.state.as_str(),
                }),
            )
            .with_charge_point(record.charge_point_id.clone());
        self.events.audit_event(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MemoryKvStore, MemoryMessageBus};

    fn audit(kv: Arc<MemoryKvStore>) -> CommandAudit {
        let events = EventPublisher::new(MemoryMessageBus::shared(), "node-a");
        CommandAudit::new(kv, events, Duration::from_secs(86400))
    }

    #[tokio::test]
    async fn sent_then_outcome_transitions_state() {
        let kv = MemoryKvStore::shared();
        let a = audit(kv.clone());

        a.record_sent("c1", "CP-1", "Reset", "Reset", "m1").await;
        let raw = kv.get("command-audit:c1").await.unwrap().unwrap();
        let record: AuditRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.state, AuditState::Sent);
        assert_eq!(a.command_for_message("m1").await.as_deref(), Some("c1"));

        a.record_outcome("c1", AuditState::Accepted, None).await;
        let raw = kv.get("command-audit:c1").await.unwrap().unwrap();
        let record: AuditRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.state, AuditState::Accepted);
        assert_eq!(record.message_id, "m1");
    }
}
