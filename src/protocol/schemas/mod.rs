//! Shipped request/response schema maps, one module per OCPP version.
//!
//! These are distilled from the official OCPP JSON schemas to the actions
//! the gateway terminates or originates. `additionalProperties` is mostly
//! left unstated here; the registry's tightening pass closes the schemas
//! unless the action is exempted.

pub mod v16;
pub mod v201;
pub mod v21;

use serde_json::Value;

use crate::domain::OcppVersion;

/// Request and response schema for one action.
pub struct ActionSchemas {
    pub action: &'static str,
    pub request: Value,
    pub response: Value,
}

impl ActionSchemas {
    pub fn new(action: &'static str, request: Value, response: Value) -> Self {
        Self {
            action,
            request,
            response,
        }
    }
}

/// All shipped schemas for a version.
pub fn all(version: OcppVersion) -> Vec<ActionSchemas> {
    match version {
        OcppVersion::V16 => v16::schemas(),
        OcppVersion::V201 => v201::schemas(),
        OcppVersion::V21 => v21::schemas(),
    }
}
