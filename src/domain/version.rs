//! OCPP protocol version
//!
//! Defines the supported OCPP versions for multi-protocol support.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Supported OCPP protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
    /// OCPP 2.0.1
    V201,
    /// OCPP 2.1
    V21,
}

impl OcppVersion {
    /// All supported OCPP versions, ordered from newest to oldest.
    pub const ALL: &'static [OcppVersion] = &[Self::V21, Self::V201, Self::V16];

    /// Normalize a textual version as it appears in connection paths and
    /// identity records. `1.6` and `1.6j` (any case) both mean 1.6J.
    pub fn normalize(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1.6" | "1.6j" => Some(Self::V16),
            "2.0.1" => Some(Self::V201),
            "2.1" => Some(Self::V21),
            _ => None,
        }
    }

    /// Canonical version name used on the wire and in stored records.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::V16 => "1.6J",
            Self::V201 => "2.0.1",
            Self::V21 => "2.1",
        }
    }

    /// WebSocket subprotocol values accepted for this version.
    ///
    /// 1.6J chargers advertise either `ocpp1.6` or `ocpp1.6j` in the field.
    pub fn accepted_subprotocols(&self) -> &'static [&'static str] {
        match self {
            Self::V16 => &["ocpp1.6", "ocpp1.6j"],
            Self::V201 => &["ocpp2.0.1"],
            Self::V21 => &["ocpp2.1"],
        }
    }

    /// Error code for malformed payloads. 1.6J spells it
    /// `FormationViolation`; 2.x renamed it to `FormatViolation`. The
    /// spelling is part of the wire contract.
    pub fn format_violation_code(&self) -> &'static str {
        match self {
            Self::V16 => "FormationViolation",
            Self::V201 | Self::V21 => "FormatViolation",
        }
    }

    /// Whether this is a 2.x version (transaction model via TransactionEvent).
    pub fn is_v2(&self) -> bool {
        matches!(self, Self::V201 | Self::V21)
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.wire_name())
    }
}

// Stored and transported as the canonical wire name ("1.6J", "2.0.1", "2.1").
impl Serialize for OcppVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for OcppVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::normalize(&s)
            .ok_or_else(|| D::Error::custom(format!("unknown OCPP version: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_aliases() {
        assert_eq!(OcppVersion::normalize("1.6"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::normalize("1.6j"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::normalize("1.6J"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::normalize("2.0.1"), Some(OcppVersion::V201));
        assert_eq!(OcppVersion::normalize("2.1"), Some(OcppVersion::V21));
        assert_eq!(OcppVersion::normalize("2.0"), None);
    }

    #[test]
    fn format_violation_spelling() {
        assert_eq!(OcppVersion::V16.format_violation_code(), "FormationViolation");
        assert_eq!(OcppVersion::V201.format_violation_code(), "FormatViolation");
        assert_eq!(OcppVersion::V21.format_violation_code(), "FormatViolation");
    }

    #[test]
    fn serde_roundtrip_wire_name() {
        let json = serde_json::to_string(&OcppVersion::V16).unwrap();
        assert_eq!(json, "\"1.6J\"");
        let v: OcppVersion = serde_json::from_str("\"1.6j\"").unwrap();
        assert_eq!(v, OcppVersion::V16);
    }
}
