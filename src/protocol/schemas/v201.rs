//! OCPP 2.0.1 schema map.

use serde_json::{json, Value};

use super::ActionSchemas;

fn status_info() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasonCode": { "type": "string", "maxLength": 20 },
            "additionalInfo": { "type": "string", "maxLength": 512 }
        },
        "required": ["reasonCode"]
    })
}

fn id_token() -> Value {
    json!({
        "type": "object",
        "properties": {
            "idToken": { "type": "string", "maxLength": 36 },
            "type": {
                "type": "string",
                "enum": [
                    "Central", "eMAID", "ISO14443", "ISO15693", "KeyCode",
                    "Local", "MacAddress", "NoAuthorization"
                ]
            }
        },
        "required": ["idToken", "type"]
    })
}

fn id_token_info() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": [
                    "Accepted", "Blocked", "ConcurrentTx", "Expired", "Invalid",
                    "NoCredit", "NotAllowedTypeEVSE", "NotAtThisLocation",
                    "NotAtThisTime", "Unknown"
                ]
            },
            "cacheExpiryDateTime": { "type": "string", "format": "date-time" },
            "chargingPriority": { "type": "integer" },
            "groupIdToken": id_token(),
            "personalMessage": {
                "type": "object",
                "properties": {
                    "format": { "type": "string", "enum": ["ASCII", "HTML", "URI", "UTF8"] },
                    "language": { "type": "string", "maxLength": 8 },
                    "content": { "type": "string", "maxLength": 512 }
                },
                "required": ["format", "content"]
            }
        },
        "required": ["status"]
    })
}

fn evse() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer" },
            "connectorId": { "type": "integer" }
        },
        "required": ["id"]
    })
}

fn meter_value() -> Value {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "properties": {
                "timestamp": { "type": "string", "format": "date-time" },
                "sampledValue": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "value": { "type": "number" },
                            "context": { "type": "string" },
                            "measurand": { "type": "string" },
                            "phase": { "type": "string" },
                            "location": { "type": "string" },
                            "signedMeterValue": {
                                "type": "object",
                                "properties": {
                                    "signedMeterData": { "type": "string", "maxLength": 2500 },
                                    "signingMethod": { "type": "string", "maxLength": 50 },
                                    "encodingMethod": { "type": "string", "maxLength": 50 },
                                    "publicKey": { "type": "string", "maxLength": 2500 }
                                },
                                "required": [
                                    "signedMeterData", "signingMethod",
                                    "encodingMethod", "publicKey"
                                ]
                            },
                            "unitOfMeasure": {
                                "type": "object",
                                "properties": {
                                    "unit": { "type": "string", "maxLength": 20 },
                                    "multiplier": { "type": "integer" }
                                }
                            }
                        },
                        "required": ["value"]
                    }
                }
            },
            "required": ["timestamp", "sampledValue"]
        }
    })
}

pub fn schemas() -> Vec<ActionSchemas> {
    vec![
        ActionSchemas::new(
            "BootNotification",
            json!({
                "type": "object",
                "properties": {
                    "chargingStation": {
                        "type": "object",
                        "properties": {
                            "serialNumber": { "type": "string", "maxLength": 25 },
                            "model": { "type": "string", "maxLength": 20 },
                            "vendorName": { "type": "string", "maxLength": 50 },
                            "firmwareVersion": { "type": "string", "maxLength": 50 },
                            "modem": {
                                "type": "object",
                                "properties": {
                                    "iccid": { "type": "string", "maxLength": 20 },
                                    "imsi": { "type": "string", "maxLength": 20 }
                                }
                            }
                        },
                        "required": ["model", "vendorName"]
                    },
                    "reason": {
                        "type": "string",
                        "enum": [
                            "ApplicationReset", "FirmwareUpdate", "LocalReset", "PowerUp",
                            "RemoteReset", "ScheduledReset", "Triggered", "Unknown", "Watchdog"
                        ]
                    }
                },
                "required": ["chargingStation", "reason"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "currentTime": { "type": "string", "format": "date-time" },
                    "interval": { "type": "integer" },
                    "status": { "type": "string", "enum": ["Accepted", "Pending", "Rejected"] },
                    "statusInfo": status_info()
                },
                "required": ["currentTime", "interval", "status"]
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
                    "idToken": id_token(),
                    "certificate": { "type": "string", "maxLength": 5500 },
                    "iso15118CertificateHashData": {
                        "type": "array",
                        "items": { "type": "object", "additionalProperties": true }
                    }
                },
                "required": ["idToken"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "idTokenInfo": id_token_info(),
                    "certificateStatus": {
                        "type": "string",
                        "enum": [
                            "Accepted", "SignatureError", "CertificateExpired",
                            "CertificateRevoked", "NoCertificateAvailable", "CertChainError",
                            "ContractCancelled"
                        ]
                    }
                },
                "required": ["idTokenInfo"]
            }),
        ),
        ActionSchemas::new(
            "StatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "timestamp": { "type": "string", "format": "date-time" },
                    "connectorStatus": {
                        "type": "string",
                        "enum": ["Available", "Occupied", "Reserved", "Unavailable", "Faulted"]
                    },
                    "evseId": { "type": "integer" },
                    "connectorId": { "type": "integer" }
                },
                "required": ["timestamp", "connectorStatus", "evseId"]
            }),
            json!({ "type": "object", "properties": {} }),
        ),
        ActionSchemas::new(
            "TransactionEvent",
            json!({
                "type": "object",
                "properties": {
                    "eventType": { "type": "string", "enum": ["Ended", "Started", "Updated"] },
                    "timestamp": { "type": "string", "format": "date-time" },
                    "triggerReason": { "type": "string", "maxLength": 50 },
                    "seqNo": { "type": "integer", "minimum": 0 },
                    "offline": { "type": "boolean" },
                    "numberOfPhasesUsed": { "type": "integer" },
                    "cableMaxCurrent": { "type": "integer" },
                    "reservationId": { "type": "integer" },
                    "transactionInfo": {
                        "type": "object",
                        "properties": {
                            "transactionId": { "type": "string", "maxLength": 36 },
                            "chargingState": {
                                "type": "string",
                                "enum": ["Charging", "EVConnected", "SuspendedEV", "SuspendedEVSE", "Idle"]
                            },
                            "timeSpentCharging": { "type": "integer" },
                            "stoppedReason": { "type": "string", "maxLength": 50 },
                            "remoteStartId": { "type": "integer" }
                        },
                        "required": ["transactionId"]
                    },
                    "evse": evse(),
                    "idToken": id_token(),
                    "meterValue": meter_value()
                },
                "required": ["eventType", "timestamp", "seqNo", "transactionInfo"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "totalCost": { "type": "number" },
                    "chargingPriority": { "type": "integer" },
                    "idTokenInfo": id_token_info(),
                    "updatedPersonalMessage": {
                        "type": "object",
                        "additionalProperties": true
                    }
                }
            }),
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
                    "statusInfo": status_info(),
                    "data": {}
                },
                "required": ["status"]
            }),
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
            "FirmwareStatusNotification",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "Downloaded", "DownloadFailed", "Downloading", "DownloadScheduled",
                            "DownloadPaused", "Idle", "InstallationFailed", "Installing",
                            "Installed", "InstallRebooting", "InstallScheduled",
                            "InstallVerificationFailed", "InvalidSignature", "SignatureVerified"
                        ]
                    },
                    "requestId": { "type": "integer" }
                },
                "required": ["status"]
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
                            "Uploaded", "UploadFailure", "Uploading", "AcceptedCanceled"
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
                    "type": { "type": "string", "enum": ["Immediate", "OnIdle"] },
                    "evseId": { "type": "integer" }
                },
                "required": ["type"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected", "Scheduled"] },
                    "statusInfo": status_info()
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "RequestStartTransaction",
            json!({
                "type": "object",
                "properties": {
                    "evseId": { "type": "integer", "minimum": 1 },
                    "remoteStartId": { "type": "integer" },
                    "idToken": id_token(),
                    "groupIdToken": id_token(),
                    // Deliberately open, as with the 1.6J charging profile.
                    "chargingProfile": { "type": "object", "additionalProperties": true }
                },
                "required": ["remoteStartId", "idToken"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected"] },
                    "statusInfo": status_info(),
                    "transactionId": { "type": "string", "maxLength": 36 }
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "RequestStopTransaction",
            json!({
                "type": "object",
                "properties": {
                    "transactionId": { "type": "string", "maxLength": 36 }
                },
                "required": ["transactionId"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["Accepted", "Rejected"] },
                    "statusInfo": status_info()
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "UnlockConnector",
            json!({
                "type": "object",
                "properties": {
                    "evseId": { "type": "integer" },
                    "connectorId": { "type": "integer" }
                },
                "required": ["evseId", "connectorId"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "Unlocked", "UnlockFailed", "OngoingAuthorizedTransaction",
                            "UnknownConnector"
                        ]
                    },
                    "statusInfo": status_info()
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
                            "BootNotification", "LogStatusNotification",
                            "FirmwareStatusNotification", "Heartbeat", "MeterValues",
                            "SignChargingStationCertificate", "SignV2GCertificate",
                            "StatusNotification", "TransactionEvent", "SignCombinedCertificate",
                            "PublishFirmwareStatusNotification"
                        ]
                    },
                    "evse": evse()
                },
                "required": ["requestedMessage"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["Accepted", "Rejected", "NotImplemented"]
                    },
                    "statusInfo": status_info()
                },
                "required": ["status"]
            }),
        ),
        ActionSchemas::new(
            "UpdateFirmware",
            json!({
                "type": "object",
                "properties": {
                    "retries": { "type": "integer" },
                    "retryInterval": { "type": "integer" },
                    "requestId": { "type": "integer" },
                    "firmware": {
                        "type": "object",
                        "properties": {
                            "location": { "type": "string", "maxLength": 512 },
                            "retrieveDateTime": { "type": "string", "format": "date-time" },
                            "installDateTime": { "type": "string", "format": "date-time" },
                            "signingCertificate": { "type": "string", "maxLength": 5500 },
                            "signature": { "type": "string", "maxLength": 800 }
                        },
                        "required": ["location", "retrieveDateTime"]
                    }
                },
                "required": ["requestId", "firmware"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": [
                            "Accepted", "Rejected", "AcceptedCanceled", "InvalidCertificate",
                            "RevokedCertificate"
                        ]
                    },
                    "statusInfo": status_info()
                },
                "required": ["status"]
            }),
        ),
    ]
}
