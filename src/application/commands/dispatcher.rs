//! Command dispatcher
//!
//! Translates back-office command requests into version-correct OCPP CALLs,
//! validates the payload against the request schema, sends through the
//! local socket and waits on the tracker for the charger's verdict.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::info;

use super::audit::{AuditState, CommandAudit};
use super::tracker::{RequestTracker, TrackerReply};
use crate::domain::{CommandRequest, CommandType, OcppVersion};
use crate::protocol::{OcppFrame, SchemaRegistry};
use crate::session::SharedSessionRegistry;
use uuid::Uuid;

/// Terminal result of a dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Charger answered with a CALLRESULT; `status` is propagated verbatim.
    Completed { status: String, payload: Value },
    /// Charger answered with a CALLERROR.
    CallError { code: String, description: String },
    /// No reply within the deadline.
    Timeout,
    /// No request schema shipped for `(version, action)`.
    SchemaMissing,
    /// The normalized payload failed request validation.
    PayloadInvalid { errors: Vec<String> },
    /// The command has no action for the charger's OCPP version.
    Unsupported { reason: String },
    /// The socket went away mid-flight.
    SendFailed { reason: String },
    /// The CALLRESULT payload failed response validation.
    ResponseInvalid { errors: Vec<String> },
}

impl DispatchOutcome {
    /// Audit state mirrored for this outcome.
    pub fn audit_state(&self) -> AuditState {
        match self {
            Self::Completed { status, .. } if status == "Accepted" => AuditState::Accepted,
            Self::Completed { .. } | Self::CallError { .. } | Self::ResponseInvalid { .. } => {
                AuditState::Rejected
            }
            Self::Timeout => AuditState::Timeout,
            Self::SchemaMissing
            | Self::PayloadInvalid { .. }
            | Self::Unsupported { .. }
            | Self::SendFailed { .. } => AuditState::Failed,
        }
    }
}

/// Version-aware command → action table.
pub fn action_for(version: OcppVersion, command: CommandType) -> Option<&'static str> {
    match (command, version.is_v2()) {
        (CommandType::Reset, _) => Some("Reset"),
        (CommandType::RemoteStart, false) => Some("RemoteStartTransaction"),
        (CommandType::RemoteStart, true) => Some("RequestStartTransaction"),
        (CommandType::RemoteStop, false) => Some("RemoteStopTransaction"),
        (CommandType::RemoteStop, true) => Some("RequestStopTransaction"),
        (CommandType::UnlockConnector, _) => Some("UnlockConnector"),
        (CommandType::ChangeConfiguration, false) => Some("ChangeConfiguration"),
        (CommandType::ChangeConfiguration, true) => None,
        (CommandType::TriggerMessage, false) => Some("TriggerMessage"),
        (CommandType::TriggerMessage, true) => None,
        (CommandType::UpdateFirmware, _) => Some("UpdateFirmware"),
    }
}

pub struct CommandDispatcher {
    registry: Arc<SchemaRegistry>,
    tracker: Arc<RequestTracker>,
    sessions: SharedSessionRegistry,
    audit: Arc<CommandAudit>,
    default_timeout: Duration,
    remote_start_seq: AtomicI64,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        tracker: Arc<RequestTracker>,
        sessions: SharedSessionRegistry,
        audit: Arc<CommandAudit>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            sessions,
            audit,
            default_timeout,
            remote_start_seq: AtomicI64::new(1),
        }
    }

    /// Adapt a bus payload to the wire shape of the selected action.
    pub fn normalize_payload(
        &self,
        version: OcppVersion,
        command: CommandType,
        payload: &Value,
    ) -> Value {
        let mut payload = if payload.is_object() {
            payload.clone()
        } else if payload.is_null() {
            json!({})
        } else {
            return payload.clone();
        };
        let obj = payload.as_object_mut().unwrap();

        if command == CommandType::RemoteStop {
            // Back-office APIs say `sessionId`; the wire says `transactionId`
            // (a string in 2.x, an integer in 1.6J).
            if let Some(session_id) = obj.remove("sessionId") {
                obj.entry("transactionId".to_string())
                    .or_insert(session_id);
            }
            if let Some(tx) = obj.get("transactionId").cloned() {
                let converted = if version.is_v2() {
                    match tx {
                        Value::Number(n) => Value::String(n.to_string()),
                        other => other,
                    }
                } else {
                    match tx {
                        Value::String(s) => s
                            .parse::<i64>()
                            .map(|n| Value::Number(n.into()))
                            .unwrap_or(Value::String(s)),
                        other => other,
                    }
                };
                obj.insert("transactionId".to_string(), converted);
            }
        }

        if command == CommandType::RemoteStart && version.is_v2() {
            // Legacy requests carry a bare 1.6-style idTag.
            if let Some(id_tag) = obj.remove("idTag") {
                obj.entry("idToken".to_string()).or_insert(json!({
                    "idToken": id_tag,
                    "type": "Central",
                }));
            }
            if !obj.contains_key("remoteStartId") {
                let seq = self.remote_start_seq.fetch_add(1, Ordering::Relaxed);
                obj.insert("remoteStartId".to_string(), json!(seq));
            }
        }

        payload
    }

    /// Dispatch one command to a locally connected charger.
    pub async fn dispatch(&self, request: &CommandRequest) -> DispatchOutcome {
        let charge_point_id = match request.charge_point_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return DispatchOutcome::SendFailed {
                    reason: "Missing chargePointId".to_string(),
                }
            }
        };

        let Some(meta) = self.sessions.get_meta(charge_point_id) else {
            return DispatchOutcome::SendFailed {
                reason: "Charge point offline".to_string(),
            };
        };
        let version = meta.ocpp_version;

        let Some(action) = action_for(version, request.command_type) else {
            return DispatchOutcome::Unsupported {
                reason: format!(
                    "{} is not available on {}",
                    request.command_type.as_str(),
                    version
                ),
            };
        };

        let payload = self.normalize_payload(version, request.command_type, &request.payload);

        if !self.registry.has_request_schema(version, action) {
            return DispatchOutcome::SchemaMissing;
        }
        let validation = self.registry.validate_request(version, action, &payload);
        if !validation.is_valid() {
            return DispatchOutcome::PayloadInvalid {
                errors: validation.errors().to_vec(),
            };
        }

        let message_id = Uuid::new_v4().to_string();
        let start = std::time::Instant::now();
        info!(
            charge_point_id,
            action,
            command_id = request.command_id.as_str(),
            message_id = message_id.as_str(),
            "Sending command"
        );

        self.audit
            .record_sent(
                &request.command_id,
                charge_point_id,
                request.command_type.as_str(),
                action,
                &message_id,
            )
            .await;

        let receiver = self.tracker.register(
            charge_point_id,
            &message_id,
            action,
            version,
            Some(request.command_id.clone()),
        );

        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };
        if let Err(reason) = self.sessions.send_text(charge_point_id, frame.serialize()) {
            self.tracker.abandon(charge_point_id, &message_id);
            let outcome = DispatchOutcome::SendFailed { reason };
            self.finish(request, action, &outcome, start).await;
            return outcome;
        }

        let deadline = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let outcome = match timeout(deadline, receiver).await {
            Ok(Ok(TrackerReply::Result(payload))) => {
                let status = payload
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("Accepted")
                    .to_string();
                DispatchOutcome::Completed { status, payload }
            }
            Ok(Ok(TrackerReply::CallError {
                code, description, ..
            })) => DispatchOutcome::CallError { code, description },
            Ok(Ok(TrackerReply::ResponseInvalid { errors })) => {
                DispatchOutcome::ResponseInvalid { errors }
            }
            // Sender dropped: the socket closed underneath the wait.
            Ok(Err(_)) => DispatchOutcome::SendFailed {
                reason: "Connection closed".to_string(),
            },
            Err(_) => {
                self.tracker.abandon(charge_point_id, &message_id);
                DispatchOutcome::Timeout
            }
        };

        self.finish(request, action, &outcome, start).await;
        outcome
    }

    async fn finish(
        &self,
        request: &CommandRequest,
        action: &'static str,
        outcome: &DispatchOutcome,
        start: std::time::Instant,
    ) {
        let state = outcome.audit_state();
        metrics::histogram!("ocpp_command_latency_seconds", "action" => action)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            "ocpp_commands_total",
            "action" => action,
            "state" => state.as_str()
        )
        .increment(1);

        let detail = match outcome {
            DispatchOutcome::Completed { status, .. } => Some(status.clone()),
            DispatchOutcome::CallError { code, .. } => Some(code.clone()),
            DispatchOutcome::PayloadInvalid { errors } | DispatchOutcome::ResponseInvalid { errors } => {
                Some(errors.join("; "))
            }
            DispatchOutcome::Unsupported { reason } | DispatchOutcome::SendFailed { reason } => {
                Some(reason.clone())
            }
            DispatchOutcome::SchemaMissing => Some("schema_missing".to_string()),
            DispatchOutcome::Timeout => None,
        };
        self.audit
            .record_outcome(&request.command_id, state, detail)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventPublisher;
    use crate::domain::ConnectionMeta;
    use crate::infrastructure::{MemoryKvStore, MemoryMessageBus};
    use crate::session::{Outbound, SessionRegistry};
    use tokio::sync::mpsc;

    #[test]
    fn action_table_matches_versions() {
        assert_eq!(
            action_for(OcppVersion::V16, CommandType::RemoteStart),
            Some("RemoteStartTransaction")
        );
        assert_eq!(
            action_for(OcppVersion::V201, CommandType::RemoteStart),
            Some("RequestStartTransaction")
        );
        assert_eq!(
            action_for(OcppVersion::V21, CommandType::RemoteStop),
            Some("RequestStopTransaction")
        );
        assert_eq!(action_for(OcppVersion::V201, CommandType::ChangeConfiguration), None);
        assert_eq!(action_for(OcppVersion::V21, CommandType::TriggerMessage), None);
        assert_eq!(
            action_for(OcppVersion::V16, CommandType::UpdateFirmware),
            Some("UpdateFirmware")
        );
    }

    fn dispatcher(sessions: SharedSessionRegistry) -> CommandDispatcher {
        let registry = Arc::new(SchemaRegistry::with_defaults().unwrap());
        let tracker = Arc::new(RequestTracker::new(registry.clone()));
        let events = EventPublisher::new(MemoryMessageBus::shared(), "node-a");
        let audit = Arc::new(CommandAudit::new(
            MemoryKvStore::shared(),
            events,
            Duration::from_secs(3600),
        ));
        CommandDispatcher::new(registry, tracker, sessions, audit, Duration::from_secs(1))
    }

    fn meta(cp: &str, version: OcppVersion) -> ConnectionMeta {
        ConnectionMeta {
            connection_id: "c1".into(),
            charge_point_id: cp.to_string(),
            ocpp_version: version,
            station_id: "ST-1".into(),
            tenant_id: "T-1".into(),
            session_epoch: 1,
            ip: "127.0.0.1".parse().unwrap(),
        }
    }

    #[test]
    fn remote_stop_session_id_maps_to_transaction_id() {
        let d = dispatcher(SessionRegistry::shared());

        let v16 = d.normalize_payload(
            OcppVersion::V16,
            CommandType::RemoteStop,
            &json!({"sessionId": "42"}),
        );
        assert_eq!(v16, json!({"transactionId": 42}));

        let v2 = d.normalize_payload(
            OcppVersion::V201,
            CommandType::RemoteStop,
            &json!({"sessionId": 42}),
        );
        assert_eq!(v2, json!({"transactionId": "42"}));
    }

    #[test]
    fn legacy_id_tag_wraps_into_id_token() {
        let d = dispatcher(SessionRegistry::shared());
        let payload = d.normalize_payload(
            OcppVersion::V201,
            CommandType::RemoteStart,
            &json!({"idTag": "TAG-1"}),
        );
        assert_eq!(payload["idToken"]["idToken"], "TAG-1");
        assert_eq!(payload["idToken"]["type"], "Central");
        assert!(payload.get("idTag").is_none());
        assert!(payload["remoteStartId"].is_i64());
    }

    #[tokio::test]
    async fn offline_charger_fails_fast() {
        let d = dispatcher(SessionRegistry::shared());
        let request = CommandRequest {
            command_id: "c1".into(),
            charge_point_id: Some("CP-404".into()),
            command_type: CommandType::Reset,
            payload: json!({"type": "Soft"}),
            timeout_seconds: None,
            correlation_id: None,
        };
        assert!(matches!(
            d.dispatch(&request).await,
            DispatchOutcome::SendFailed { .. }
        ));
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_send() {
        let sessions = SessionRegistry::shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        sessions.register(meta("CP-1", OcppVersion::V16), tx);

        let d = dispatcher(sessions);
        let request = CommandRequest {
            command_id: "c1".into(),
            charge_point_id: Some("CP-1".into()),
            command_type: CommandType::Reset,
            payload: json!({"type": "Gentle"}),
            timeout_seconds: None,
            correlation_id: None,
        };
        assert!(matches!(
            d.dispatch(&request).await,
            DispatchOutcome::PayloadInvalid { .. }
        ));
    }

    #[tokio::test]
    async fn unsupported_command_for_version() {
        let sessions = SessionRegistry::shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        sessions.register(meta("CP-1", OcppVersion::V201), tx);

        let d = dispatcher(sessions);
        let request = CommandRequest {
            command_id: "c1".into(),
            charge_point_id: Some("CP-1".into()),
            command_type: CommandType::ChangeConfiguration,
            payload: json!({"key": "A", "value": "B"}),
            timeout_seconds: None,
            correlation_id: None,
        };
        assert!(matches!(
            d.dispatch(&request).await,
            DispatchOutcome::Unsupported { .. }
        ));
    }

    #[tokio::test]
    async fn full_round_trip_resolves_with_charger_status() {
        let sessions = SessionRegistry::shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sessions.register(meta("CP-1", OcppVersion::V16), tx);

        let d = Arc::new(dispatcher(sessions));
        let request = CommandRequest {
            command_id: "c1".into(),
            charge_point_id: Some("CP-1".into()),
            command_type: CommandType::Reset,
            payload: json!({"type": "Soft"}),
            timeout_seconds: Some(2),
            correlation_id: None,
        };

        let dispatch = {
            let d = d.clone();
            tokio::spawn(async move { d.dispatch(&request).await })
        };

        // Pretend to be the charger: read the CALL, answer it.
        let outbound = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Outbound::Text(text) = outbound else {
            panic!("expected a CALL frame");
        };
        let frame = OcppFrame::parse(&text).unwrap();
        let OcppFrame::Call {
            unique_id, action, ..
        } = frame
        else {
            panic!("expected CALL");
        };
        assert_eq!(action, "Reset");
        d.tracker
            .handle_call_result("CP-1", &unique_id, json!({"status": "Rejected"}));

        match dispatch.await.unwrap() {
            DispatchOutcome::Completed { status, .. } => assert_eq!(status, "Rejected"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        let sessions = SessionRegistry::shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        sessions.register(meta("CP-1", OcppVersion::V16), tx);

        let d = dispatcher(sessions);
        let request = CommandRequest {
            command_id: "c1".into(),
            charge_point_id: Some("CP-1".into()),
            command_type: CommandType::Reset,
            payload: json!({"type": "Soft"}),
            timeout_seconds: Some(1),
            correlation_id: None,
        };
        assert_eq!(d.dispatch(&request).await, DispatchOutcome::Timeout);
    }
}
