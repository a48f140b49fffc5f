//! OCPP 2.x adapter, shared by 2.0.1 and 2.1.
//!
//! The two versions differ only in schema coverage for the actions the
//! gateway terminates; the handling semantics are identical, so one adapter
//! carries its version tag.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{
    connection_envelope, handle_data_transfer, handle_notification, now_iso, CallOutcome,
    VersionAdapter, BOOT_INTERVAL_SECONDS,
};
use crate::application::events::EventPublisher;
use crate::application::state::{ChargePointStateStore, TxEventInput, TxEventType};
use crate::domain::{ConnectionMeta, OcppVersion};

pub struct V2Adapter {
    version: OcppVersion,
    state: Arc<ChargePointStateStore>,
    events: EventPublisher,
}

impl V2Adapter {
    pub fn new(
        version: OcppVersion,
        state: Arc<ChargePointStateStore>,
        events: EventPublisher,
    ) -> Self {
        Self {
            version,
            state,
            events,
        }
    }

    async fn handle_status_notification(
        &self,
        meta: &ConnectionMeta,
        payload: &Value,
    ) -> CallOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusNotification {
            evse_id: i64,
            #[serde(default)]
            connector_id: Option<i64>,
            connector_status: String,
        }

        let req: StatusNotification = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(e) => {
                return CallOutcome::error(
                    self.version.format_violation_code(),
                    format!("Malformed StatusNotification: {e}"),
                )
            }
        };

        let connector_id = req.connector_id.unwrap_or(req.evse_id);
        self.state.update_connector(
            &meta.charge_point_id,
            connector_id,
            &req.connector_status,
            None,
        );

        let envelope = connection_envelope(
            &self.events,
            meta,
            "ConnectorStatusChanged",
            json!({
                "evseId": req.evse_id,
                "connectorId": req.connector_id,
                "status": req.connector_status,
            }),
        )
        .with_connector(connector_id);
        self.events.station_event(envelope).await;

        CallOutcome::Reply(json!({}))
    }

    async fn handle_transaction_event(
        &self,
        meta: &ConnectionMeta,
        payload: &Value,
    ) -> CallOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Evse {
            id: i64,
            #[serde(default)]
            connector_id: Option<i64>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TransactionInfo {
            #[serde(default)]
            transaction_id: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct IdToken {
            id_token: String,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TransactionEvent {
            event_type: String,
            seq_no: i64,
            transaction_info: TransactionInfo,
            #[serde(default)]
            evse: Option<Evse>,
            #[serde(default)]
            id_token: Option<IdToken>,
        }

        let req: TransactionEvent = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(e) => {
                return CallOutcome::error(
                    self.version.format_violation_code(),
                    format!("Malformed TransactionEvent: {e}"),
                )
            }
        };

        let Some(event_type) = TxEventType::parse(&req.event_type) else {
            return CallOutcome::error(
                self.version.format_violation_code(),
                format!("Unknown eventType: {}", req.event_type),
            );
        };

        let input = TxEventInput {
            event_type,
            seq_no: req.seq_no,
            transaction_id: req.transaction_info.transaction_id.clone(),
            evse_id: req.evse.as_ref().map(|e| e.id),
            connector_id: req.evse.as_ref().and_then(|e| e.connector_id),
            id_token: req.id_token.map(|t| t.id_token),
        };

        let outcome =
            match self
                .state
                .transaction_event(&meta.charge_point_id, self.version, input)
            {
                Ok(outcome) => outcome,
                Err(violation) => return CallOutcome::from_violation(violation),
            };

        if !outcome.idempotent {
            info!(
                charge_point_id = meta.charge_point_id.as_str(),
                event_type = req.event_type.as_str(),
                seq_no = req.seq_no,
                transaction_id = req.transaction_info.transaction_id.as_deref().unwrap_or(""),
                "Transaction event"
            );
            let envelope = connection_envelope(
                &self.events,
                meta,
                "TransactionEventReceived",
                payload.clone(),
            );
            self.events.station_event(envelope).await;
        }

        CallOutcome::Reply(json!({}))
    }
}

#[async_trait]
impl VersionAdapter for V2Adapter {
    fn version(&self) -> OcppVersion {
        self.version
    }

    async fn handle_call(
        &self,
        meta: &ConnectionMeta,
        action: &str,
        payload: &Value,
    ) -> CallOutcome {
        match action {
            "BootNotification" => {
                self.state.record_boot(&meta.charge_point_id);
                CallOutcome::Reply(json!({
                    "status": "Accepted",
                    "currentTime": now_iso(),
                    "interval": BOOT_INTERVAL_SECONDS,
                }))
            }
            "Heartbeat" => {
                self.state.record_heartbeat(&meta.charge_point_id);
                CallOutcome::Reply(json!({ "currentTime": now_iso() }))
            }
            "Authorize" => CallOutcome::Reply(json!({ "idTokenInfo": { "status": "Accepted" } })),
            "StatusNotification" => self.handle_status_notification(meta, payload).await,
            "TransactionEvent" => self.handle_transaction_event(meta, payload).await,
            "DataTransfer" => handle_data_transfer(&self.events, meta, payload).await,
            "SecurityEventNotification"
            | "FirmwareStatusNotification"
            | "LogStatusNotification" => {
                handle_notification(&self.events, meta, action, payload).await
            }
            _ => CallOutcome::not_implemented(action),
        }
    }
}
