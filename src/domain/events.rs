//! Outbound event envelope and bus topic names
//!
//! Every message the gateway publishes is wrapped in [`EventEnvelope`] and
//! partitioned by `chargePointId` (fallback `stationId`) so downstream
//! consumers observe per-charger order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::version::OcppVersion;

/// Bus topic names. Inbound topics are per-node where noted.
pub mod topics {
    pub const STATION_EVENTS: &str = "ocpp.station.events";
    pub const SESSION_EVENTS: &str = "ocpp.session.events";
    pub const COMMAND_EVENTS: &str = "ocpp.command.events";
    pub const AUDIT_EVENTS: &str = "cpms.audit.events";
    pub const COMMAND_REQUESTS: &str = "cpms.command.requests";

    /// Node-specific command topic (work must not be shared across nodes).
    pub fn node_command_requests(node_id: &str) -> String {
        format!("{COMMAND_REQUESTS}.node.{node_id}")
    }

    /// Node-specific session-control topic (force-disconnect messages).
    pub fn node_session_control(node_id: &str) -> String {
        format!("ocpp.session.control.node.{node_id}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    /// Node id of the emitting gateway instance.
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_point_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocpp_version: Option<OcppVersion>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            occurred_at: Utc::now(),
            correlation_id: None,
            station_id: None,
            tenant_id: None,
            charge_point_id: None,
            connector_id: None,
            ocpp_version: None,
            payload,
        }
    }

    pub fn with_charge_point(mut self, charge_point_id: impl Into<String>) -> Self {
        self.charge_point_id = Some(charge_point_id.into());
        self
    }

    pub fn with_station(mut self, station_id: impl Into<String>) -> Self {
        self.station_id = Some(station_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_connector(mut self, connector_id: i64) -> Self {
        self.connector_id = Some(connector_id);
        self
    }

    pub fn with_version(mut self, version: OcppVersion) -> Self {
        self.ocpp_version = Some(version);
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Partition key: `chargePointId`, falling back to `stationId`.
    pub fn partition_key(&self) -> Option<&str> {
        self.charge_point_id
            .as_deref()
            .or(self.station_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let env = EventEnvelope::new("ConnectorStatusChanged", "node-1", serde_json::json!({"status": "Available"}))
            .with_charge_point("CP-1")
            .with_connector(1)
            .with_version(OcppVersion::V16);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["eventType"], "ConnectorStatusChanged");
        assert_eq!(json["source"], "node-1");
        assert_eq!(json["chargePointId"], "CP-1");
        assert_eq!(json["connectorId"], 1);
        assert_eq!(json["ocppVersion"], "1.6J");
        assert!(json.get("correlationId").is_none());
    }

    #[test]
    fn partition_key_falls_back_to_station() {
        let env = EventEnvelope::new("SessionStarted", "node-1", Value::Null).with_station("ST-9");
        assert_eq!(env.partition_key(), Some("ST-9"));
        let env = env.with_charge_point("CP-9");
        assert_eq!(env.partition_key(), Some("CP-9"));
    }
}
