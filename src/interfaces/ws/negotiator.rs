//! OCPP subprotocol negotiation
//!
//! The charger advertises subprotocols in `Sec-WebSocket-Protocol`; the
//! accepted value must agree with the version in the connection path and is
//! echoed back in the handshake response. No offer, or no offer matching
//! the path version, fails the handshake with HTTP 400.

use crate::domain::OcppVersion;

/// Pick the subprotocol to accept for a path-negotiated version.
///
/// The first offered value that the version accepts wins, so a 1.6J charger
/// offering `ocpp1.6j, ocpp1.6` is echoed `ocpp1.6j` back.
pub fn negotiate(version: OcppVersion, offered: Option<&str>) -> Option<&'static str> {
    let offered = offered?;
    let accepted = version.accepted_subprotocols();

    offered
        .split(',')
        .map(str::trim)
        .find_map(|candidate| accepted.iter().find(|a| **a == candidate).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v16_accepts_both_spellings() {
        assert_eq!(negotiate(OcppVersion::V16, Some("ocpp1.6")), Some("ocpp1.6"));
        assert_eq!(negotiate(OcppVersion::V16, Some("ocpp1.6j")), Some("ocpp1.6j"));
        assert_eq!(
            negotiate(OcppVersion::V16, Some("ocpp1.6j, ocpp1.6")),
            Some("ocpp1.6j")
        );
    }

    #[test]
    fn version_and_subprotocol_must_agree() {
        assert_eq!(negotiate(OcppVersion::V16, Some("ocpp2.0.1")), None);
        assert_eq!(negotiate(OcppVersion::V201, Some("ocpp1.6")), None);
        assert_eq!(
            negotiate(OcppVersion::V201, Some("ocpp1.6, ocpp2.0.1")),
            Some("ocpp2.0.1")
        );
        assert_eq!(negotiate(OcppVersion::V21, Some("ocpp2.1")), Some("ocpp2.1"));
    }

    #[test]
    fn missing_offer_fails() {
        assert_eq!(negotiate(OcppVersion::V16, None), None);
        assert_eq!(negotiate(OcppVersion::V16, Some("")), None);
        assert_eq!(negotiate(OcppVersion::V16, Some("graphql-ws")), None);
    }
}
