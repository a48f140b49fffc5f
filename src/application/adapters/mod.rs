//! Version adapters
//!
//! One adapter per OCPP version maps validated CALL payloads to responses,
//! state updates and domain events. Dispatch is by the [`OcppVersion`] tag;
//! the hot path never compares version strings.

pub mod v16;
pub mod v2;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::application::events::EventPublisher;
use crate::application::state::{ChargePointStateStore, StateViolation};
use crate::domain::{ConnectionMeta, EventEnvelope, OcppVersion};

pub use v16::V16Adapter;
pub use v2::V2Adapter;

/// Heartbeat interval handed to chargers in BootNotification responses.
pub const BOOT_INTERVAL_SECONDS: i64 = 300;

/// Outcome of handling one CALL.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Reply(Value),
    Error {
        code: String,
        description: String,
        details: Value,
    },
}

impl CallOutcome {
    pub fn error(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            description: description.into(),
            details: json!({}),
        }
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::error("NotImplemented", format!("Action not implemented: {action}"))
    }

    pub fn from_violation(violation: StateViolation) -> Self {
        Self::error(violation.code, violation.description)
    }
}

#[async_trait]
pub trait VersionAdapter: Send + Sync {
    fn version(&self) -> OcppVersion;

    async fn handle_call(
        &self,
        meta: &ConnectionMeta,
        action: &str,
        payload: &Value,
    ) -> CallOutcome;
}

/// Adapter set, selected by version tag.
pub struct Adapters {
    v16: V16Adapter,
    v201: V2Adapter,
    v21: V2Adapter,
}

impl Adapters {
    pub fn new(state: Arc<ChargePointStateStore>, events: EventPublisher) -> Self {
        Self {
            v16: V16Adapter::new(state.clone(), events.clone()),
            v201: V2Adapter::new(OcppVersion::V201, state.clone(), events.clone()),
            v21: V2Adapter::new(OcppVersion::V21, state, events),
        }
    }

    pub fn for_version(&self, version: OcppVersion) -> &dyn VersionAdapter {
        match version {
            OcppVersion::V16 => &self.v16,
            OcppVersion::V201 => &self.v201,
            OcppVersion::V21 => &self.v21,
        }
    }
}

// ── Shared handler pieces ──────────────────────────────────────

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Envelope pre-filled with connection attribution.
pub(crate) fn connection_envelope(
    events: &EventPublisher,
    meta: &ConnectionMeta,
    event_type: &str,
    payload: Value,
) -> EventEnvelope {
    events
        .envelope(event_type, payload)
        .with_charge_point(meta.charge_point_id.clone())
        .with_station(meta.station_id.clone())
        .with_tenant(meta.tenant_id.clone())
        .with_version(meta.ocpp_version)
}

/// Actions that are pure notifications: emit `{Action}Received`, reply `{}`.
pub(crate) async fn handle_notification(
    events: &EventPublisher,
    meta: &ConnectionMeta,
    action: &str,
    payload: &Value,
) -> CallOutcome {
    let envelope = connection_envelope(
        events,
        meta,
        &format!("{action}Received"),
        payload.clone(),
    );
    events.station_event(envelope).await;
    CallOutcome::Reply(json!({}))
}

pub(crate) async fn handle_data_transfer(
    events: &EventPublisher,
    meta: &ConnectionMeta,
    payload: &Value,
) -> CallOutcome {
    let envelope = connection_envelope(events, meta, "DataTransferReceived", payload.clone());
    events.station_event(envelope).await;
    CallOutcome::Reply(json!({"status": "Accepted"}))
}
