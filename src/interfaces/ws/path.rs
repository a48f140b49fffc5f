//! Connection path parsing
//!
//! Chargers connect to `/ocpp/{version}/{chargePointId}`. Anything else is
//! rejected, and paths that look like scanner probes are classified
//! separately so their rejections can be flood-logged.

use crate::domain::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// Not the expected shape, bad version or bad charge-point id.
    Invalid,
    /// Matches a known probe signature.
    Suspicious,
}

const SUSPICIOUS_FRAGMENTS: &[&str] = &[
    ".env",
    "/etc/passwd",
    "admin",
    "login",
    "wp-admin",
    "phpmyadmin",
    "xmlrpc",
    "..",
];

/// Scanner-probe heuristics, checked before shape validation so probes are
/// classified even when they also fail the shape.
pub fn is_suspicious(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if SUSPICIOUS_FRAGMENTS.iter().any(|f| lower.contains(f)) {
        return true;
    }
    // Crude SQL probe: SELECT ... FROM anywhere in the path.
    lower.contains("select") && lower.contains("from")
}

/// Charge-point ids are word characters and dashes, at least 3 long.
fn valid_charge_point_id(id: &str) -> bool {
    id.len() >= 3
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse and validate `/ocpp/{version}/{chargePointId}`.
pub fn parse_path(path: &str) -> Result<(OcppVersion, String), PathError> {
    if is_suspicious(path) {
        return Err(PathError::Suspicious);
    }

    // Ignore any query string.
    let path = path.split('?').next().unwrap_or(path);
    let mut segments = path.trim_matches('/').split('/');

    if segments.next() != Some("ocpp") {
        return Err(PathError::Invalid);
    }
    let version = segments
        .next()
        .and_then(OcppVersion::normalize)
        .ok_or(PathError::Invalid)?;
    let id = segments.next().ok_or(PathError::Invalid)?;
    if segments.next().is_some() || !valid_charge_point_id(id) {
        return Err(PathError::Invalid);
    }

    Ok((version, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_version_spellings() {
        assert_eq!(
            parse_path("/ocpp/1.6/CP-1").unwrap(),
            (OcppVersion::V16, "CP-1".to_string())
        );
        assert_eq!(parse_path("/ocpp/1.6j/CP-1").unwrap().0, OcppVersion::V16);
        assert_eq!(parse_path("/ocpp/2.0.1/CP-1").unwrap().0, OcppVersion::V201);
        assert_eq!(parse_path("/ocpp/2.1/CP_001").unwrap().0, OcppVersion::V21);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert_eq!(parse_path("/"), Err(PathError::Invalid));
        assert_eq!(parse_path("/ocpp/1.6"), Err(PathError::Invalid));
        assert_eq!(parse_path("/ocpp/9.9/CP-1"), Err(PathError::Invalid));
        assert_eq!(parse_path("/other/1.6/CP-1"), Err(PathError::Invalid));
        assert_eq!(parse_path("/ocpp/1.6/CP-1/extra"), Err(PathError::Invalid));
        // Too-short or bad-charset ids.
        assert_eq!(parse_path("/ocpp/1.6/ab"), Err(PathError::Invalid));
        assert_eq!(parse_path("/ocpp/1.6/CP%201"), Err(PathError::Invalid));
    }

    #[test]
    fn flags_probe_paths() {
        assert_eq!(parse_path("/.env"), Err(PathError::Suspicious));
        assert_eq!(parse_path("/ocpp/1.6/../../etc/passwd"), Err(PathError::Suspicious));
        assert_eq!(parse_path("/wp-admin/setup.php"), Err(PathError::Suspicious));
        assert!(is_suspicious("/search?q=select+*+from+users"));
        assert!(!is_suspicious("/ocpp/1.6/CP-1"));
    }

    #[test]
    fn query_strings_are_ignored() {
        assert_eq!(
            parse_path("/ocpp/1.6/CP-1?vendor=acme").unwrap().1,
            "CP-1"
        );
    }
}
