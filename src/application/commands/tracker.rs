//! Outbound request tracker
//!
//! Every CS→CP CALL registers here before it is written to the socket. The
//! charger's CALLRESULT/CALLERROR resolves the pending entry exactly once;
//! replies for unknown or already-resolved ids are silently dropped (the
//! charger may have answered after we gave up). CALLRESULT payloads are
//! validated against the response schema before the caller sees them.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::OcppVersion;
use crate::protocol::SchemaRegistry;

/// What a pending request resolves to.
#[derive(Debug)]
pub enum TrackerReply {
    /// CALLRESULT whose payload passed response validation.
    Result(Value),
    /// CALLERROR from the charger.
    CallError {
        code: String,
        description: String,
        details: Value,
    },
    /// CALLRESULT payload that failed response-schema validation.
    ResponseInvalid { errors: Vec<String> },
}

struct Pending {
    action: String,
    version: OcppVersion,
    audit_command_id: Option<String>,
    sender: oneshot::Sender<TrackerReply>,
}

pub struct RequestTracker {
    registry: Arc<SchemaRegistry>,
    // (chargePointId, messageId) → pending
    pending: DashMap<(String, String), Pending>,
}

impl RequestTracker {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            pending: DashMap::new(),
        }
    }

    /// Register a pending request. The returned receiver resolves once, on
    /// reply; the caller owns the timeout and must call [`abandon`] when it
    /// gives up so the entry does not leak.
    ///
    /// [`abandon`]: RequestTracker::abandon
    pub fn register(
        &self,
        charge_point_id: &str,
        message_id: &str,
        action: &str,
        version: OcppVersion,
        audit_command_id: Option<String>,
    ) -> oneshot::Receiver<TrackerReply> {
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            (charge_point_id.to_string(), message_id.to_string()),
            Pending {
                action: action.to_string(),
                version,
                audit_command_id,
                sender,
            },
        );
        metrics::gauge!("ocpp_pending_requests").set(self.pending.len() as f64);
        receiver
    }

    /// Remove a pending entry without resolving it (timeout or send failure).
    pub fn abandon(&self, charge_point_id: &str, message_id: &str) {
        self.pending
            .remove(&(charge_point_id.to_string(), message_id.to_string()));
        metrics::gauge!("ocpp_pending_requests").set(self.pending.len() as f64);
    }

    /// Audit id attached to a pending request, if any.
    pub fn audit_command_id(&self, charge_point_id: &str, message_id: &str) -> Option<String> {
        self.pending
            .get(&(charge_point_id.to_string(), message_id.to_string()))
            .and_then(|p| p.audit_command_id.clone())
    }

    /// Resolve with a CALLRESULT.
    pub fn handle_call_result(&self, charge_point_id: &str, message_id: &str, payload: Value) {
        let Some((_, pending)) = self
            .pending
            .remove(&(charge_point_id.to_string(), message_id.to_string()))
        else {
            debug!(charge_point_id, message_id, "CALLRESULT for unknown request; dropping");
            return;
        };
        metrics::gauge!("ocpp_pending_requests").set(self.pending.len() as f64);

        let outcome = self
            .registry
            .validate_response(pending.version, &pending.action, &payload);
        let reply = if outcome.is_valid() {
            TrackerReply::Result(payload)
        } else {
            warn!(
                charge_point_id,
                message_id,
                action = pending.action.as_str(),
                errors = ?outcome.errors(),
                "Command response failed schema validation"
            );
            TrackerReply::ResponseInvalid {
                errors: outcome.errors().to_vec(),
            }
        };
        let _ = pending.sender.send(reply);
    }

    /// Resolve with a CALLERROR.
    pub fn handle_call_error(
        &self,
        charge_point_id: &str,
        message_id: &str,
        code: &str,
        description: &str,
        details: Value,
    ) {
        let Some((_, pending)) = self
            .pending
            .remove(&(charge_point_id.to_string(), message_id.to_string()))
        else {
            debug!(charge_point_id, message_id, "CALLERROR for unknown request; dropping");
            return;
        };
        metrics::gauge!("ocpp_pending_requests").set(self.pending.len() as f64);

        warn!(
            charge_point_id,
            message_id,
            action = pending.action.as_str(),
            code,
            description,
            "Command answered with CALLERROR"
        );
        let _ = pending.sender.send(TrackerReply::CallError {
            code: code.to_string(),
            description: description.to_string(),
            details,
        });
    }

    /// Drop every pending entry for a charger whose socket closed. The
    /// receivers observe the dropped sender and fail their waits.
    pub fn drop_pending_for(&self, charge_point_id: &str) {
        self.pending.retain(|key, _| key.0 != charge_point_id);
        metrics::gauge!("ocpp_pending_requests").set(self.pending.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> RequestTracker {
        RequestTracker::new(Arc::new(SchemaRegistry::with_defaults().unwrap()))
    }

    #[tokio::test]
    async fn resolves_validated_result_once() {
        let t = tracker();
        let rx = t.register("CP-1", "m1", "Reset", OcppVersion::V16, None);

        t.handle_call_result("CP-1", "m1", json!({"status": "Accepted"}));
        match rx.await.unwrap() {
            TrackerReply::Result(payload) => assert_eq!(payload["status"], "Accepted"),
            other => panic!("unexpected: {other:?}"),
        }

        // A duplicate reply has nothing to resolve and is dropped.
        t.handle_call_result("CP-1", "m1", json!({"status": "Accepted"}));
    }

    #[tokio::test]
    async fn invalid_response_payload_surfaces_validation_failure() {
        let t = tracker();
        let rx = t.register("CP-1", "m1", "Reset", OcppVersion::V16, None);

        t.handle_call_result("CP-1", "m1", json!({"status": "Maybe"}));
        match rx.await.unwrap() {
            TrackerReply::ResponseInvalid { errors } => assert!(!errors.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_error_resolves_with_code() {
        let t = tracker();
        let rx = t.register("CP-1", "m1", "Reset", OcppVersion::V16, None);

        t.handle_call_error("CP-1", "m1", "NotSupported", "no reset", json!({}));
        match rx.await.unwrap() {
            TrackerReply::CallError { code, .. } => assert_eq!(code, "NotSupported"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_from_wrong_charger_is_dropped() {
        let t = tracker();
        let mut rx = t.register("CP-1", "m1", "Reset", OcppVersion::V16, None);

        t.handle_call_result("CP-2", "m1", json!({"status": "Accepted"}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn socket_close_drops_pending() {
        let t = tracker();
        let rx = t.register("CP-1", "m1", "Reset", OcppVersion::V16, None);
        t.drop_pending_for("CP-1");
        assert!(rx.await.is_err());
    }
}
