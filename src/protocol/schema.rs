//! Schema registry & validator
//!
//! Compiles the shipped per-version request/response schema maps at startup
//! and validates payloads in both directions. Before compilation, every
//! object schema that omits an `additionalProperties` directive gets it set
//! to `false`, recursively — unknown fields from chargers are a protocol
//! violation, not an extension point. Actions on the exempt list (default
//! `DataTransfer`) keep their shipped strictness.

use std::collections::{HashMap, HashSet};

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

use crate::domain::OcppVersion;
use crate::protocol::schemas;

/// Result of validating a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid { errors: Vec<String> },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn errors(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid { errors } => errors,
        }
    }

    fn schema_missing() -> Self {
        Self::Invalid {
            errors: vec!["schema_missing".to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to compile {direction} schema for {version} {action}: {message}")]
    Compile {
        version: &'static str,
        action: String,
        direction: &'static str,
        message: String,
    },
}

pub struct SchemaRegistry {
    request: HashMap<(OcppVersion, String), Validator>,
    response: HashMap<(OcppVersion, String), Validator>,
}

impl SchemaRegistry {
    /// Compile all shipped schemas. `exempt_actions` suppresses the
    /// `additionalProperties` tightening for the named actions.
    pub fn new(exempt_actions: &HashSet<String>) -> Result<Self, SchemaError> {
        let mut request = HashMap::new();
        let mut response = HashMap::new();

        for version in OcppVersion::ALL.iter().copied() {
            for action_schemas in schemas::all(version) {
                let exempt = exempt_actions.contains(action_schemas.action);

                let mut req = action_schemas.request;
                let mut resp = action_schemas.response;
                if !exempt {
                    tighten(&mut req);
                    tighten(&mut resp);
                }

                request.insert(
                    (version, action_schemas.action.to_string()),
                    compile(version, action_schemas.action, "request", &req)?,
                );
                response.insert(
                    (version, action_schemas.action.to_string()),
                    compile(version, action_schemas.action, "response", &resp)?,
                );
            }
        }

        Ok(Self { request, response })
    }

    /// Registry with the default exemptions.
    pub fn with_defaults() -> Result<Self, SchemaError> {
        let mut exempt = HashSet::new();
        exempt.insert("DataTransfer".to_string());
        Self::new(&exempt)
    }

    pub fn has_request_schema(&self, version: OcppVersion, action: &str) -> bool {
        self.request.contains_key(&(version, action.to_string()))
    }

    pub fn has_response_schema(&self, version: OcppVersion, action: &str) -> bool {
        self.response.contains_key(&(version, action.to_string()))
    }

    pub fn validate_request(
        &self,
        version: OcppVersion,
        action: &str,
        payload: &Value,
    ) -> ValidationOutcome {
        match self.request.get(&(version, action.to_string())) {
            Some(validator) => run(validator, payload),
            None => ValidationOutcome::schema_missing(),
        }
    }

    pub fn validate_response(
        &self,
        version: OcppVersion,
        action: &str,
        payload: &Value,
    ) -> ValidationOutcome {
        match self.response.get(&(version, action.to_string())) {
            Some(validator) => run(validator, payload),
            None => ValidationOutcome::schema_missing(),
        }
    }
}

fn compile(
    version: OcppVersion,
    action: &str,
    direction: &'static str,
    schema: &Value,
) -> Result<Validator, SchemaError> {
    jsonschema::validator_for(schema).map_err(|e| SchemaError::Compile {
        version: version.wire_name(),
        action: action.to_string(),
        direction,
        message: e.to_string(),
    })
}

fn run(validator: &Validator, payload: &Value) -> ValidationOutcome {
    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|err| {
            let path = err.instance_path.to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{path} {err}")
        })
        .collect();

    if errors.is_empty() {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid { errors }
    }
}

// ── Tightening ─────────────────────────────────────────────────

/// Recursively set `additionalProperties: false` on every object schema
/// that does not already carry the directive.
pub fn tighten(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    let is_object_schema = obj.contains_key("properties")
        || obj.contains_key("patternProperties")
        || match obj.get("type") {
            Some(Value::String(t)) => t == "object",
            Some(Value::Array(ts)) => ts.iter().any(|t| t == "object"),
            _ => false,
        };

    if is_object_schema && !obj.contains_key("additionalProperties") {
        obj.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    // Subschemas in single-schema positions.
    for key in [
        "items",
        "additionalItems",
        "contains",
        "not",
        "if",
        "then",
        "else",
        "propertyNames",
        "additionalProperties",
        "unevaluatedProperties",
        "unevaluatedItems",
    ] {
        if let Some(sub) = obj.get_mut(key) {
            // "items" may also be an array of schemas (older drafts).
            if let Value::Array(arr) = sub {
                for item in arr.iter_mut() {
                    tighten(item);
                }
            } else {
                tighten(sub);
            }
        }
    }

    // Maps of subschemas.
    for key in [
        "properties",
        "patternProperties",
        "$defs",
        "definitions",
        "dependentSchemas",
    ] {
        if let Some(Value::Object(map)) = obj.get_mut(key) {
            for sub in map.values_mut() {
                tighten(sub);
            }
        }
    }

    // Arrays of subschemas.
    for key in ["allOf", "anyOf", "oneOf", "prefixItems"] {
        if let Some(Value::Array(arr)) = obj.get_mut(key) {
            for sub in arr.iter_mut() {
                tighten(sub);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_defaults().expect("schemas compile")
    }

    #[test]
    fn tighten_sets_additional_properties_recursively() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "inner": {
                    "type": "object",
                    "properties": { "x": { "type": "string" } }
                },
                "list": {
                    "type": "array",
                    "items": { "type": "object", "properties": {} }
                }
            }
        });
        tighten(&mut schema);
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["inner"]["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["list"]["items"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn tighten_respects_explicit_directive() {
        let mut schema = json!({
            "type": "object",
            "additionalProperties": true,
            "properties": {}
        });
        tighten(&mut schema);
        assert_eq!(schema["additionalProperties"], json!(true));
    }

    #[test]
    fn boot_notification_requires_model() {
        let reg = registry();
        let outcome = reg.validate_request(
            OcppVersion::V16,
            "BootNotification",
            &json!({"chargePointVendor": "E"}),
        );
        let errors = outcome.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("chargePointModel"), "got: {errors:?}");
        assert!(errors[0].starts_with('/'), "got: {errors:?}");
    }

    #[test]
    fn unknown_fields_are_rejected_after_tightening() {
        let reg = registry();
        let outcome = reg.validate_request(
            OcppVersion::V16,
            "Heartbeat",
            &json!({"unexpected": 1}),
        );
        assert!(!outcome.is_valid());
    }

    #[test]
    fn data_transfer_is_exempt_from_tightening() {
        let reg = registry();
        let outcome = reg.validate_request(
            OcppVersion::V16,
            "DataTransfer",
            &json!({"vendorId": "V", "data": {"anything": ["goes", 1]}}),
        );
        assert!(outcome.is_valid(), "got: {:?}", outcome.errors());
    }

    #[test]
    fn unknown_action_reports_schema_missing() {
        let reg = registry();
        let outcome = reg.validate_request(OcppVersion::V16, "NoSuchAction", &json!({}));
        assert_eq!(outcome.errors(), ["schema_missing"]);
        assert!(!reg.has_request_schema(OcppVersion::V16, "NoSuchAction"));
    }

    #[test]
    fn valid_payload_still_valid_after_tightening() {
        // Tightening never widens: a fully-specified payload passes.
        let reg = registry();
        let outcome = reg.validate_request(
            OcppVersion::V16,
            "StartTransaction",
            &json!({
                "connectorId": 1,
                "idTag": "TAG-1",
                "meterStart": 100,
                "timestamp": "2024-01-01T00:00:00Z"
            }),
        );
        assert!(outcome.is_valid(), "got: {:?}", outcome.errors());
    }

    #[test]
    fn v2_transaction_event_schema_present_for_both_versions() {
        let reg = registry();
        for v in [OcppVersion::V201, OcppVersion::V21] {
            assert!(reg.has_request_schema(v, "TransactionEvent"));
            assert!(reg.has_response_schema(v, "TransactionEvent"));
        }
        assert!(!reg.has_request_schema(OcppVersion::V16, "TransactionEvent"));
    }

    #[test]
    fn response_schemas_validate_gateway_replies() {
        let reg = registry();
        let ok = reg.validate_response(
            OcppVersion::V16,
            "BootNotification",
            &json!({"status": "Accepted", "currentTime": "2024-01-01T00:00:00Z", "interval": 300}),
        );
        assert!(ok.is_valid());

        let bad = reg.validate_response(OcppVersion::V16, "BootNotification", &json!({}));
        assert!(!bad.is_valid());
    }
}
