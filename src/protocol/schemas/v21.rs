//! OCPP 2.1 schema map.
//!
//! 2.1 keeps the 2.0.1 message shapes for every action this gateway
//! terminates; the map starts from the 2.0.1 definitions and overrides
//! `TransactionEvent`, whose request gained the 2.1 cost-details object.
//! New 2.1-only actions surface as `NotImplemented` until schemas land.

use serde_json::json;

use super::{v201, ActionSchemas};

pub fn schemas() -> Vec<ActionSchemas> {
    let mut schemas = v201::schemas();

    for entry in schemas.iter_mut() {
        if entry.action == "TransactionEvent" {
            if let Some(props) = entry
                .request
                .get_mut("properties")
                .and_then(|p| p.as_object_mut())
            {
                props.insert(
                    "costDetails".to_string(),
                    json!({
                        "type": "object",
                        "properties": {
                            "totalCost": { "type": "number" },
                            "currency": { "type": "string", "maxLength": 3 },
                            "failureToCalculate": { "type": "boolean" }
                        }
                    }),
                );
                props.insert(
                    "preconditioningStatus".to_string(),
                    json!({
                        "type": "string",
                        "enum": ["Ready", "NotReady", "Preconditioning"]
                    }),
                );
            }
        }
    }

    schemas
}
