//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport framing, identical
//! across all OCPP versions (1.6, 2.0.1, 2.1):
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", <payload>]`
//! - **CallResult** `[3, "<uniqueId>", <payload>]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! The parser keeps the `uniqueId` of a malformed CALL when it can be
//! extracted, so the engine can still answer with a CALLERROR referencing it.

use serde_json::Value;
use std::fmt;

// ── Message-type constants ─────────────────────────────────────

pub const MSG_TYPE_CALL: u64 = 2;
pub const MSG_TYPE_CALL_RESULT: u64 = 3;
pub const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (version-agnostic transport envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::new(format!("invalid JSON: {e}")))?;

        let Value::Array(arr) = value else {
            return Err(FrameError::new("message is not a JSON array"));
        };

        if arr.is_empty() {
            return Err(FrameError::new("empty message array"));
        }

        let Some(msg_type) = arr[0].as_u64() else {
            return Err(FrameError::new("messageTypeId is not a number"));
        };

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(&arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(&arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(&arr),
            other => Err(FrameError::new(format!("unknown messageTypeId {other}"))
                .with_message_type(other)),
        }
    }

    fn parse_call(arr: &[Value]) -> Result<Self, FrameError> {
        // A CALL with a salvageable uniqueId still gets one, so the caller
        // can reply with a CALLERROR.
        let salvage = |reason: String| {
            let mut err = FrameError::new(reason).with_message_type(MSG_TYPE_CALL);
            if let Some(id) = arr.get(1).and_then(Value::as_str) {
                if !id.is_empty() {
                    err = err.with_unique_id(id);
                }
            }
            err
        };

        if arr.len() != 4 {
            return Err(salvage(format!("CALL must have 4 elements, got {}", arr.len())));
        }
        let unique_id = match arr[1].as_str() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(salvage("CALL uniqueId must be a non-empty string".into())),
        };
        let action = match arr[2].as_str() {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => return Err(salvage("CALL action must be a non-empty string".into())),
        };

        Ok(Self::Call {
            unique_id,
            action,
            payload: arr[3].clone(),
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, FrameError> {
        if arr.len() != 3 {
            return Err(FrameError::new(format!(
                "CALLRESULT must have 3 elements, got {}",
                arr.len()
            ))
            .with_message_type(MSG_TYPE_CALL_RESULT));
        }
        let unique_id = match arr[1].as_str() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(FrameError::new("CALLRESULT uniqueId must be a non-empty string")
                    .with_message_type(MSG_TYPE_CALL_RESULT))
            }
        };
        Ok(Self::CallResult {
            unique_id,
            payload: arr[2].clone(),
        })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, FrameError> {
        if arr.len() != 5 {
            return Err(FrameError::new(format!(
                "CALLERROR must have 5 elements, got {}",
                arr.len()
            ))
            .with_message_type(MSG_TYPE_CALL_ERROR));
        }
        let unique_id = match arr[1].as_str() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(FrameError::new("CALLERROR uniqueId must be a non-empty string")
                    .with_message_type(MSG_TYPE_CALL_ERROR))
            }
        };
        let error_code = match arr[2].as_str() {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                return Err(FrameError::new("CALLERROR errorCode must be a non-empty string")
                    .with_message_type(MSG_TYPE_CALL_ERROR)
                    .with_unique_id(&unique_id))
            }
        };
        let error_description = match arr[3].as_str() {
            Some(d) => d.to_string(),
            None => {
                return Err(FrameError::new("CALLERROR errorDescription must be a string")
                    .with_message_type(MSG_TYPE_CALL_ERROR)
                    .with_unique_id(&unique_id))
            }
        };
        if !arr[4].is_object() {
            return Err(FrameError::new("CALLERROR errorDetails must be an object")
                .with_message_type(MSG_TYPE_CALL_ERROR)
                .with_unique_id(&unique_id));
        }

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details: arr[4].clone(),
        })
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to its JSON wire form.
    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Create a `CALLERROR` frame answering `unique_id`.
    pub fn error(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
        error_details: Value,
    ) -> Self {
        let error_details = if error_details.is_object() {
            error_details
        } else {
            Value::Object(Default::default())
        };
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// A frame that failed to parse. Carries whatever envelope context could be
/// salvaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    pub reason: String,
    pub message_type_id: Option<u64>,
    pub unique_id: Option<String>,
}

impl FrameError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message_type_id: None,
            unique_id: None,
        }
    }

    fn with_message_type(mut self, id: u64) -> Self {
        self.message_type_id = Some(id);
        self
    }

    fn with_unique_id(mut self, id: &str) -> Self {
        self.unique_id = Some(id.to_string());
        self
    }

    /// True when the failure came from a CALL whose uniqueId is known, i.e.
    /// the peer can be sent a CALLERROR for it.
    pub fn answerable_call_id(&self) -> Option<&str> {
        if self.message_type_id == Some(MSG_TYPE_CALL) {
            self.unique_id.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            _ => panic!("Expected Call frame"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"abc123",{"status":"Accepted","currentTime":"2024-01-01T00:00:00Z","interval":300}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(payload["status"], "Accepted");
            }
            _ => panic!("Expected CallResult frame"),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn call_error_details_must_be_object() {
        let err = OcppFrame::parse(r#"[4,"id","GenericError","boom","details"]"#).unwrap_err();
        assert_eq!(err.message_type_id, Some(4));
        assert_eq!(err.unique_id.as_deref(), Some("id"));
    }

    #[test]
    fn malformed_call_preserves_unique_id() {
        // Wrong arity, but the uniqueId is salvageable.
        let err = OcppFrame::parse(r#"[2,"msg-7","BootNotification"]"#).unwrap_err();
        assert_eq!(err.answerable_call_id(), Some("msg-7"));

        // Empty uniqueId is not salvageable.
        let err = OcppFrame::parse(r#"[2,"","BootNotification",{}]"#).unwrap_err();
        assert_eq!(err.answerable_call_id(), None);
    }

    #[test]
    fn non_call_errors_are_not_answerable() {
        let err = OcppFrame::parse(r#"[3,"id"]"#).unwrap_err();
        assert_eq!(err.answerable_call_id(), None);
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        for text in [
            r#"[2,"id1","Heartbeat",{}]"#,
            r#"[3,"id2",{"currentTime":"2024-01-01T00:00:00Z"}]"#,
            r#"[4,"id3","GenericError","Something went wrong",{}]"#,
        ] {
            let frame = OcppFrame::parse(text).unwrap();
            let emitted = frame.serialize();
            let reparsed = OcppFrame::parse(&emitted).unwrap();
            assert_eq!(reparsed, frame);
            assert_eq!(reparsed.serialize(), emitted);
        }
    }

    #[test]
    fn rejects_unknown_message_type() {
        let err = OcppFrame::parse(r#"[5,"id",{}]"#).unwrap_err();
        assert_eq!(err.message_type_id, Some(5));
    }
}
