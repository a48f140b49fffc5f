//! OCPP 1.6J adapter.

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
use crate::application::state::ChargePointStateStore;
use crate::domain::{ConnectionMeta, OcppVersion};

pub struct V16Adapter {
    state: Arc<ChargePointStateStore>,
    events: EventPublisher,
}

impl V16Adapter {
    pub fn new(state: Arc<ChargePointStateStore>, events: EventPublisher) -> Self {
        Self { state, events }
    }

    async fn handle_status_notification(
        &self,
        meta: &ConnectionMeta,
        payload: &Value,
    ) -> CallOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusNotification {
            connector_id: i64,
            status: String,
            error_code: String,
        }

        let req: StatusNotification = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(e) => {
                return CallOutcome::error(
                    meta.ocpp_version.format_violation_code(),
                    format!("Malformed StatusNotification: {e}"),
                )
            }
        };

        self.state.update_connector(
            &meta.charge_point_id,
            req.connector_id,
            &req.status,
            Some(&req.error_code),
        );

        let envelope = connection_envelope(
            &self.events,
            meta,
            "ConnectorStatusChanged",
            json!({
                "connectorId": req.connector_id,
                "status": req.status,
                "errorCode": req.error_code,
            }),
        )
        .with_connector(req.connector_id);
        self.events.station_event(envelope).await;

        CallOutcome::Reply(json!({}))
    }

    async fn handle_start_transaction(
        &self,
        meta: &ConnectionMeta,
        payload: &Value,
    ) -> CallOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StartTransaction {
            connector_id: i64,
            id_tag: String,
            meter_start: i64,
            timestamp: String,
        }

        let req: StartTransaction = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(e) => {
                return CallOutcome::error(
                    meta.ocpp_version.format_violation_code(),
                    format!("Malformed StartTransaction: {e}"),
                )
            }
        };

        let outcome = match self.state.start_transaction(
            &meta.charge_point_id,
            req.connector_id,
            &req.id_tag,
            req.meter_start,
            &req.timestamp,
        ) {
            Ok(outcome) => outcome,
            Err(violation) => return CallOutcome::from_violation(violation),
        };

        if !outcome.idempotent {
            info!(
                charge_point_id = meta.charge_point_id.as_str(),
                connector_id = req.connector_id,
                transaction_id = outcome.transaction_id,
                "Transaction started"
            );
            let envelope = connection_envelope(
                &self.events,
                meta,
                "TransactionStarted",
                json!({
                    "transactionId": outcome.transaction_id,
                    "connectorId": req.connector_id,
                    "idTag": req.id_tag,
                    "meterStart": req.meter_start,
                    "timestamp": req.timestamp,
                }),
            )
            .with_connector(req.connector_id);
            self.events.station_event(envelope).await;
        }

        CallOutcome::Reply(json!({
            "transactionId": outcome.transaction_id,
            "idTagInfo": { "status": "Accepted" },
        }))
    }

    async fn handle_stop_transaction(
        &self,
        meta: &ConnectionMeta,
        payload: &Value,
    ) -> CallOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StopTransaction {
            transaction_id: i64,
            meter_stop: i64,
            timestamp: String,
        }

        let req: StopTransaction = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(e) => {
                return CallOutcome::error(
                    meta.ocpp_version.format_violation_code(),
                    format!("Malformed StopTransaction: {e}"),
                )
            }
        };

        let outcome = match self.state.stop_transaction(
            &meta.charge_point_id,
            req.transaction_id,
            req.meter_stop,
            &req.timestamp,
        ) {
            Ok(outcome) => outcome,
            Err(violation) => return CallOutcome::from_violation(violation),
        };

        if !outcome.idempotent {
            info!(
                charge_point_id = meta.charge_point_id.as_str(),
                transaction_id = req.transaction_id,
                "Transaction stopped"
            );
            let envelope = connection_envelope(
                &self.events,
                meta,
                "TransactionStopped",
                json!({
                    "transactionId": req.transaction_id,
                    "meterStop": req.meter_stop,
                    "timestamp": req.timestamp,
                }),
            );
            self.events.station_event(envelope).await;
        }

        CallOutcome::Reply(json!({ "idTagInfo": { "status": "Accepted" } }))
    }

    async fn handle_meter_values(&self, meta: &ConnectionMeta, payload: &Value) -> CallOutcome {
        let transaction_id = payload.get("transactionId").and_then(Value::as_i64);

        let outcome = match self.state.meter_values(&meta.charge_point_id, transaction_id) {
            Ok(outcome) => outcome,
            Err(violation) => return CallOutcome::from_violation(violation),
        };

        let mut event_payload = payload.clone();
        if outcome.orphaned {
            // Lenient mode annotation: the referenced transaction is unknown
            // here, downstream decides what to do with the samples.
            if let Some(obj) = event_payload.as_object_mut() {
                obj.insert("orphaned".to_string(), Value::Bool(true));
            }
        }
        let connector_id = payload.get("connectorId").and_then(Value::as_i64);
        let mut envelope =
            connection_envelope(&self.events, meta, "MeterValuesReceived", event_payload);
        if let Some(connector_id) = connector_id {
            envelope = envelope.with_connector(connector_id);
        }
        self.events.station_event(envelope).await;

        CallOutcome::Reply(json!({}))
    }
}

#[async_trait]
impl VersionAdapter for V16Adapter {
    fn version(&self) -> OcppVersion {
        OcppVersion::V16
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
            "Authorize" => CallOutcome::Reply(json!({ "idTagInfo": { "status": "Accepted" } })),
            "StatusNotification" => self.handle_status_notification(meta, payload).await,
            "DataTransfer" => handle_data_transfer(&self.events, meta, payload).await,
            "StartTransaction" => self.handle_start_transaction(meta, payload).await,
            "StopTransaction" => self.handle_stop_transaction(meta, payload).await,
            "MeterValues" => self.handle_meter_values(meta, payload).await,
            "FirmwareStatusNotification"
            | "DiagnosticsStatusNotification"
            | "SecurityEventNotification"
            | "LogStatusNotification" => {
                handle_notification(&self.events, meta, action, payload).await
            }
            _ => CallOutcome::not_implemented(action),
        }
    }
}
