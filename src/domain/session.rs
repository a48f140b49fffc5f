//! Session entries and per-connection metadata
//!
//! A `SessionEntry` is the cluster-wide ownership record stored under
//! `sessions:{chargePointId}`; `ConnectionMeta` is the in-process view a
//! node keeps for each accepted socket.

use serde::{Deserialize, Serialize};

use super::version::OcppVersion;

/// Ownership record stored in the KV store with `SESSION_TTL_SECONDS`.
///
/// At most one entry exists per charger; `epoch` increases on every
/// takeover and `lastSeenAtMs` is advanced only by the owning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub charge_point_id: String,
    pub ocpp_version: OcppVersion,
    pub node_id: String,
    pub station_id: String,
    pub tenant_id: String,
    pub connected_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub epoch: u64,
}

/// In-process metadata for one accepted WebSocket.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// Unique per accepted socket; guards unregistration races when a
    /// charger reconnects to the same node.
    pub connection_id: String,
    pub charge_point_id: String,
    pub ocpp_version: OcppVersion,
    pub station_id: String,
    pub tenant_id: String,
    /// Epoch of the session entry this connection claimed.
    pub session_epoch: u64,
    pub ip: std::net::IpAddr,
}

/// KV key for a session entry.
pub fn session_key(charge_point_id: &str) -> String {
    format!("sessions:{charge_point_id}")
}
