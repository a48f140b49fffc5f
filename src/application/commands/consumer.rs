//! Command consumer
//!
//! Each node consumes the shared `cpms.command.requests` topic (one shared
//! consumer group across the fleet) and its own node topic (a group no other
//! node joins). Commands for chargers owned elsewhere are republished
//! verbatim onto the owner's node topic; locally owned ones are deduplicated
//! and dispatched, and every step emits a command event.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatcher::{CommandDispatcher, DispatchOutcome};
use crate::application::events::EventPublisher;
use crate::domain::command::{idempotency_key, CommandRequest};
use crate::domain::events::topics;
use crate::infrastructure::{KvStore, MessageBus};
use crate::session::{NodeDirectory, SessionDirectory, SharedSessionRegistry};
use crate::support::Shutdown;

pub struct CommandConsumer {
    bus: Arc<dyn MessageBus>,
    kv: Arc<dyn KvStore>,
    dispatcher: Arc<CommandDispatcher>,
    directory: Arc<SessionDirectory>,
    nodes: Arc<NodeDirectory>,
    sessions: SharedSessionRegistry,
    events: EventPublisher,
    node_id: String,
    group_base: String,
    idempotency_ttl: Duration,
}

impl CommandConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        kv: Arc<dyn KvStore>,
        dispatcher: Arc<CommandDispatcher>,
        directory: Arc<SessionDirectory>,
        nodes: Arc<NodeDirectory>,
        sessions: SharedSessionRegistry,
        events: EventPublisher,
        node_id: impl Into<String>,
        group_base: impl Into<String>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            bus,
            kv,
            dispatcher,
            directory,
            nodes,
            sessions,
            events,
            node_id: node_id.into(),
            group_base: group_base.into(),
            idempotency_ttl,
        }
    }

    /// Start both consumer loops: shared topic and node-specific topic.
    pub fn spawn(self: Arc<Self>, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let shared = {
            let consumer = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                consumer
                    .run_topic(
                        topics::COMMAND_REQUESTS.to_string(),
                        consumer.group_base.clone(),
                        shutdown,
                    )
                    .await;
            })
        };
        let node = {
            let consumer = self.clone();
            tokio::spawn(async move {
                let topic = topics::node_command_requests(&consumer.node_id);
                let group = format!("{}-{}", consumer.group_base, consumer.node_id);
                consumer.run_topic(topic, group, shutdown).await;
            })
        };
        vec![shared, node]
    }

    async fn run_topic(&self, topic: String, group: String, shutdown: Shutdown) {
        let mut subscription = match self.bus.subscribe(&topic, &group).await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(topic = topic.as_str(), group = group.as_str(), %err, "Command subscribe failed");
                return;
            }
        };
        info!(topic = topic.as_str(), group = group.as_str(), "Command consumer started");

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else { break };
                    self.process(&message.payload).await;
                }
                _ = shutdown.triggered() => break,
            }
        }
    }

    /// Handle one raw command message.
    pub async fn process(&self, raw: &str) {
        let request: CommandRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                metrics::counter!("ocpp_command_decode_failures_total").increment(1);
                debug!(%err, "Dropping undecodable command request");
                return;
            }
        };

        let Some(charge_point_id) = request
            .charge_point_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(String::from)
        else {
            self.emit(&request, None, "CommandFailed", json!({"reason": "Missing chargePointId"}))
                .await;
            return;
        };

        // Ownership routing: hand the command to the node holding the socket.
        match self.directory.lookup(&charge_point_id).await {
            Ok(Some(entry)) if entry.node_id != self.node_id => {
                let owner_topic = self.nodes.command_topic_for(&entry.node_id).await;
                match self
                    .bus
                    .publish(&owner_topic, Some(&charge_point_id), raw)
                    .await
                {
                    Ok(()) => {
                        metrics::counter!("ocpp_commands_routed_total").increment(1);
                        info!(
                            command_id = request.command_id.as_str(),
                            charge_point_id = charge_point_id.as_str(),
                            owner = entry.node_id.as_str(),
                            "Routed command to owning node"
                        );
                        self.emit(
                            &request,
                            Some(&charge_point_id),
                            "CommandRouted",
                            json!({"ownerNodeId": entry.node_id}),
                        )
                        .await;
                    }
                    Err(err) => {
                        self.emit(
                            &request,
                            Some(&charge_point_id),
                            "CommandFailed",
                            json!({"reason": format!("Routing failed: {err}")}),
                        )
                        .await;
                    }
                }
                return;
            }
            Ok(_) => {}
            Err(err) => {
                // Directory unavailable: fall through and try locally; the
                // socket lookup below is the ground truth for this node.
                debug!(charge_point_id = charge_point_id.as_str(), %err, "Owner lookup failed");
            }
        }

        // Claim dispatch of this command id exactly once per TTL window.
        match self
            .kv
            .set_nx(&idempotency_key(&request.command_id), "1", Some(self.idempotency_ttl))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                metrics::counter!("ocpp_commands_duplicate_total").increment(1);
                self.emit(&request, Some(&charge_point_id), "CommandDuplicate", json!({}))
                    .await;
                return;
            }
            Err(err) => {
                debug!(command_id = request.command_id.as_str(), %err, "Idempotency claim failed; proceeding");
            }
        }

        if self.sessions.get_meta(&charge_point_id).is_none() {
            self.emit(
                &request,
                Some(&charge_point_id),
                "CommandFailed",
                json!({"reason": "Charge point offline"}),
            )
            .await;
            return;
        }

        self.emit(&request, Some(&charge_point_id), "CommandDispatched", json!({}))
            .await;

        let outcome = self.dispatcher.dispatch(&request).await;
        let (event_type, payload) = outcome_event(&outcome);
        self.emit(&request, Some(&charge_point_id), event_type, payload)
            .await;
    }

    async fn emit(
        &self,
        request: &CommandRequest,
        charge_point_id: Option<&str>,
        event_type: &str,
        detail: serde_json::Value,
    ) {
        let mut payload = json!({
            "commandId": request.command_id,
            "commandType": request.command_type.as_str(),
        });
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), detail.as_object()) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }

        let mut envelope = self.events.envelope(event_type, payload);
        if let Some(cp) = charge_point_id {
            envelope = envelope.with_charge_point(cp);
        }
        if let Some(correlation_id) = &request.correlation_id {
            envelope = envelope.with_correlation(correlation_id.clone());
        }
        self.events.command_event(envelope).await;
    }
}

/// Map a dispatch outcome to its command event.
fn outcome_event(outcome: &DispatchOutcome) -> (&'static str, serde_json::Value) {
    match outcome {
        DispatchOutcome::Completed { status, payload } if status == "Accepted" => (
            "CommandAccepted",
            json!({"status": status, "response": payload}),
        ),
        DispatchOutcome::Completed { status, payload } => (
            "CommandRejected",
            json!({"status": status, "response": payload}),
        ),
        DispatchOutcome::CallError { code, description } => (
            "CommandRejected",
            json!({"errorCode": code, "errorDescription": description}),
        ),
        DispatchOutcome::ResponseInvalid { errors } => (
            "CommandRejected",
            json!({"errorCode": "ResponseValidationFailed", "errors": errors}),
        ),
        DispatchOutcome::Timeout => ("CommandTimeout", json!({})),
        DispatchOutcome::SchemaMissing => (
            "CommandFailed",
            json!({"reason": "SchemaMissing"}),
        ),
        DispatchOutcome::PayloadInvalid { errors } => (
            "CommandFailed",
            json!({"reason": "PayloadValidationFailed", "errors": errors}),
        ),
        DispatchOutcome::Unsupported { reason } => (
            "CommandFailed",
            json!({"reason": format!("UnsupportedCommand: {reason}")}),
        ),
        DispatchOutcome::SendFailed { reason } => ("CommandFailed", json!({"reason": reason})),
    }
}
