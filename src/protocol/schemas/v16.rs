//! OCPP 1.6J schema map.

use serde_json::json;

use super::ActionSchemas;

fn id_tag_info() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["Accepted", "Blocked", "Expired", "Invalid", "ConcurrentTx"]
            },
            "expiryDate": { "type": "string", "format": "date-time" },
            "parentIdTag": { "type": "string", "maxLength": 20 }
        },
        "required": ["status"]
    })
}

pub fn schemas() -> Vec<ActionSchemas> {
    vec![
        ActionSchemas::new(
            "BootNotification",
            json!({
                "type": "object",
                "properties": {
                    "chargePointVendor": { "type": "string", "maxLength": 20 },
                    "chargePointModel": { "type": "string", "maxLength": 20 },
                    "chargePointSerialNumber": { "type": "string", "maxLength": 25 },
                    "chargeBoxSerialNumber": { "type": "string", "maxLength": 25 },
                    "firmwareVersion": { "type": "string", "maxLength": 50 },
                    "iccid": { "type": "string", "maxLength": 20 },
                    "imsi": { "type": "string", "maxLength": 20 },
                    "meterType": { "type": "string", "maxLength": 25 },
                    "meterSerialNumber": { "type": "string", "maxLength": 25 }
                },
                "required": ["chargePointVendor", "chargePointModel"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Pending", "Rejected"] },
                    "currentTime": { "type": "string", "format": "date-time" },
                    "interval": { "type": "integer" }
                },
                "required": ["status", "currentTime", "interval"]
            }),
        ),
        ActionSchemas::new(
            "Heartbeat",
            json!({ "type": "object", "properties": {} }),
            json!({
                "type": "object",
                "properties": {
                    "currentTime": { "type": "string", "format": "date-time" }
                },
                "required": ["currentTime"]
            }),
        ),
        ActionSchemas::new(
            "Authorize",
            json!({
                "type": "object",
                "properties": {
                    "idTag": { "type": "string", "maxLength": 20 }
                },
                "required": ["idTag"]
            }),
            json!({
                "type": "object",
                "properties": { "idTagInfo": id_tag_info() },
                "required": ["idTagInfo"]
            }),
        ),
        ActionSchemas::new(
            "StatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "connectorId": { "type": "integer", "minimum": 0 },
                    "errorCode": {
                        "type": "string",
                        "enum": [
                            "ConnectorLockFailure", "EVCommunicationError", "GroundFailure",
                            "HighTemperature", "InternalError", "LocalListConflict", "NoError",
                            "OtherError", "OverCurrentFailure", "PowerMeterFailure",
                            "PowerSwitchFailure", "ReaderFailure", "ResetFailure",
                            "UnderVoltage", "OverVoltage", "WeakSignal"
                        ]
                    },
                    "info": { "type": "string", "maxLength": 50 },
                    "status": {
                        "type": "string",
                        "enum": [
                            "Available", "Preparing", "Charging", "SuspendedEVSE", "SuspendedEV",
                            "Finishing", "Reserved", "Unavailable", "Faulted"
                        ]
                    },
                    "timestamp": { "type": "string", "format": "date-time" },
                    "vendorId": { "type": "string", "maxLength": 255 },
                    "vendorErrorCode": { "type": "string", "maxLength": 50 }
                },
                "required": ["connectorId", "errorCode", "status"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "StartTransaction",
            json!({
                "type": "object",
                "properties": {
                    "connectorId": { "type": "integer", "minimum": 1 },
                    "idTag": { "type": "string", "maxLength": 20 },
                    "meterStart": { "type": "integer" },
                    "reservationId": { "type": "integer" },
                    "timestamp": { "type": "string", "format": "date-time" }
                },
                "required": ["connectorId", "idTag", "meterStart", "timestamp"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "idTagInfo": id_tag_info(),
                    "transactionId": { "type": "integer" }
                },
                "required": ["idTagInfo", "transactionId"]
            }),
        ),
        ActionSchemas::new(
            "StopTransaction",
            json!({
                "type": "object",
                "properties": {
                    "idTag": { "type": "string", "maxLength": 20 },
                    "meterStop": { "type": "integer" },
                    "timestamp": { "type": "string", "format": "date-time" },
                    "transactionId": { "type": "integer" },
                    "reason": {
                        "type": "string",
                        "enum": [
                            "EmergencyStop", "EVDisconnected", "HardReset", "Local", "Other",
                            "PowerLoss", "Reboot", "Remote", "SoftReset", "UnlockCommand",
                            "DeAuthorized"
                        ]
                    },
                    "transactionData": {
                        "type": "array",
                        "items": meter_value()
                    }
                },
                "required": ["meterStop", "timestamp", "transactionId"]
            }),
            json!({
                "type": "object",
                "properties": { "idTagInfo": id_tag_info() }
            }),
        ),
        ActionSchemas::new(
            "MeterValues",
            json!({
                "type": "object",
                "properties": {
                    "connectorId": { "type": "integer", "minimum": 0 },
                    "transactionId": { "type": "integer" },
                    "meterValue": {
                        "type": "array",
                        "minItems": 1,
                        "items": meter_value()
                    }
                },
                "required": ["connectorId", "meterValue"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "DataTransfer",
            json!({
                "type": "object",
                "properties": {
                    "vendorId": { "type": "string", "maxLength": 255 },
                    "messageId": { "type": "string", "maxLength": 50 },
                    "data": {}
                },
                "required": ["vendorId"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Accepted", "Rejected", "UnknownMessageId", "UnknownVendorId"]
                    },
                    "data": {}
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "FirmwareStatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "Downloaded", "DownloadFailed", "Downloading", "Idle",
                            "InstallationFailed", "Installing", "Installed"
                        ]
                    }
                },
                "required": ["status"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "DiagnosticsStatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Idle", "Uploaded", "UploadFailed", "Uploading"]
                    }
                },
                "required": ["status"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "SecurityEventNotification",
            json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "maxLength": 50 },
                    "timestamp": { "type": "string", "format": "date-time" },
                    "techInfo": { "type": "string", "maxLength": 255 }
                },
                "required": ["type", "timestamp"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "LogStatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "BadMessage", "Idle", "NotSupportedOperation", "PermissionDenied",
                            "Uploaded", "UploadFailure", "Uploading"
                        ]
                    },
                    "requestId": { "type": "integer" }
                },
                "required": ["status"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        // ── CS → CP commands ───────────────────────────────
        ActionSchemas::new(
            "Reset",
            json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "enum": ["Hard", "Soft"] }
                },
                "required": ["type"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected"] }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "RemoteStartTransaction",
            json!({
                "type": "object",
                "properties": {
                    "connectorId": { "type": "integer", "minimum": 1 },
                    "idTag": { "type": "string", "maxLength": 20 },
                    // Charging profiles are vendor-extended in the field;
                    // deliberately left open.
                    "chargingProfile": { "type": "object", "additionalProperties": true }
                },
                "required": ["idTag"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected"] }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "RemoteStopTransaction",
            json!({
                "type": "object",
                "properties": {
                    "transactionId": { "type": "integer" }
                },
                "required": ["transactionId"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected"] }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "UnlockConnector",
            json!({
                "type": "object",
                "properties": {
                    "connectorId": { "type": "integer", "minimum": 1 }
                },
                "required": ["connectorId"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Unlocked", "UnlockFailed", "NotSupported"]
                    }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "ChangeConfiguration",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "maxLength": 50 },
                    "value": { "type": "string", "maxLength": 500 }
                },
                "required": ["key", "value"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Accepted", "Rejected", "RebootRequired", "NotSupported"]
                    }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "TriggerMessage",
            json!({
                "type": "object",
                "properties": {
                    "requestedMessage": {
                        "type": "string",
                        "enum": [
                            "BootNotification", "DiagnosticsStatusNotification",
                            "FirmwareStatusNotification", "Heartbeat", "MeterValues",
                            "StatusNotification"
                        ]
                    },
                    "connectorId": { "type": "integer", "minimum": 1 }
                },
                "required": ["requestedMessage"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Accepted", "Rejected", "NotImplemented"]
                    }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "UpdateFirmware",
            json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "format": "uri" },
                    "retries": { "type": "integer" },
                    "retrieveDate": { "type": "string", "format": "date-time" },
                    "retryInterval": { "type": "integer" }
                },
                "required": ["location", "retrieveDate"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

fn meter_value() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "timestamp": { "type": "string", "format": "date-time" },
            "sampledValue": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "properties": {
                        "value": { "type": "string" },
                        "context": {
                            "type": "string",
                            "enum": [
                                "Interruption.Begin", "Interruption.End", "Sample.Clock",
                                "Sample.Periodic", "Transaction.Begin", "Transaction.End",
                                "Trigger", "Other"
                            ]
                        },
                        "format": { "type": "string", "enum": ["Raw", "SignedData"] },
                        "measurand": { "type": "string" },
                        "phase": { "type": "string" },
                        "location": {
                            "type": "string",
                            "enum": ["Cable", "EV", "Inlet", "Outlet", "Body"]
                        },
                        "unit": { "type": "string" }
                    },
                    "required": ["value"]
                }
            }
        },
        "required": ["timestamp", "sampledValue"]
    })
}
