//! Remote-control command requests consumed off the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Back-office command kinds the gateway can translate to OCPP CALLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Reset,
    RemoteStart,
    RemoteStop,
    UnlockConnector,
    ChangeConfiguration,
    TriggerMessage,
    UpdateFirmware,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::RemoteStart => "RemoteStart",
            Self::RemoteStop => "RemoteStop",
            Self::UnlockConnector => "UnlockConnector",
            Self::ChangeConfiguration => "ChangeConfiguration",
            Self::TriggerMessage => "TriggerMessage",
            Self::UpdateFirmware => "UpdateFirmware",
        }
    }
}

/// A command request as published on `cpms.command.requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_point_id: Option<String>,
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: Value,
    /// Per-command override of the outbound CALL timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// KV key claiming dispatch of a command id (set-if-absent).
pub fn idempotency_key(command_id: &str) -> String {
    format!("command-idempotency:{command_id}")
}
