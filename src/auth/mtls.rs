//! mTLS binding checks
//!
//! The TLS terminator hands us the peer certificate's identity material;
//! admission matches it against the identity record's pinned bindings.

use chrono::{DateTime, Utc};

use crate::domain::identity::CertificateBinding;

/// Peer certificate fields extracted after TLS verification.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    /// DER digest; any case, with or without colons.
    pub fingerprint: String,
    pub subject_common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub serial_number: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Strip colons, upper-case. The normalized form is the KV revocation key
/// and the comparison form everywhere.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Whether the presented certificate is inside its own validity window.
pub fn certificate_current(cert: &PeerCertificate, now: DateTime<Utc>) -> bool {
    cert.not_before <= now && now <= cert.not_after
}

/// Find a binding matching the peer certificate by any of fingerprint,
/// subject CN, subjectAltName or serial number. Only bindings that are
/// active, inside their window and not revoked qualify.
pub fn match_binding<'a>(
    cert: &PeerCertificate,
    bindings: &'a [CertificateBinding],
    revoked_fingerprints: &[String],
    now: DateTime<Utc>,
) -> Option<&'a CertificateBinding> {
    let fingerprint = normalize_fingerprint(&cert.fingerprint);
    let revoked: Vec<String> = revoked_fingerprints
        .iter()
        .map(|f| normalize_fingerprint(f))
        .collect();

    bindings.iter().find(|binding| {
        if !binding.is_current(now) {
            return false;
        }
        let binding_fp = normalize_fingerprint(&binding.fingerprint);
        if revoked.contains(&binding_fp) {
            return false;
        }

        if binding_fp == fingerprint {
            return true;
        }
        if let (Some(subject), Some(cn)) = (&binding.subject, &cert.subject_common_name) {
            if subject == cn {
                return true;
            }
        }
        if let Some(san) = &binding.subject_alt_name {
            if cert.subject_alt_names.iter().any(|name| name == san) {
                return true;
            }
        }
        if let (Some(serial), Some(peer_serial)) = (&binding.serial_number, &cert.serial_number) {
            if serial.eq_ignore_ascii_case(peer_serial) {
                return true;
            }
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::BindingStatus;
    use chrono::Duration;

    fn cert(fingerprint: &str) -> PeerCertificate {
        PeerCertificate {
            fingerprint: fingerprint.to_string(),
            subject_common_name: Some("CN-CP-1".to_string()),
            subject_alt_names: vec!["cp1.chargers.example".to_string()],
            serial_number: Some("0A1B2C".to_string()),
            not_before: Utc::now() - Duration::days(1),
            not_after: Utc::now() + Duration::days(30),
        }
    }

    fn binding(fingerprint: &str) -> CertificateBinding {
        CertificateBinding {
            fingerprint: fingerprint.to_string(),
            subject: None,
            subject_alt_name: None,
            serial_number: None,
            valid_from: Utc::now() - Duration::days(10),
            valid_to: Utc::now() + Duration::days(10),
            status: BindingStatus::Active,
        }
    }

    #[test]
    fn fingerprint_normalization() {
        assert_eq!(normalize_fingerprint("ab:cd:ef"), "ABCDEF");
        assert_eq!(normalize_fingerprint("ABCDEF"), "ABCDEF");
    }

    #[test]
    fn matches_by_fingerprint_despite_formatting() {
        let bindings = vec![binding("AA:BB:CC:DD")];
        let found = match_binding(&cert("aabbccdd"), &bindings, &[], Utc::now());
        assert!(found.is_some());
    }

    #[test]
    fn matches_by_subject_san_or_serial() {
        let mut by_subject = binding("FF00");
        by_subject.subject = Some("CN-CP-1".to_string());
        assert!(match_binding(&cert("0000"), &[by_subject], &[], Utc::now()).is_some());

        let mut by_san = binding("FF00");
        by_san.subject_alt_name = Some("cp1.chargers.example".to_string());
        assert!(match_binding(&cert("0000"), &[by_san], &[], Utc::now()).is_some());

        let mut by_serial = binding("FF00");
        by_serial.serial_number = Some("0a1b2c".to_string());
        assert!(match_binding(&cert("0000"), &[by_serial], &[], Utc::now()).is_some());
    }

    #[test]
    fn revoked_or_expired_bindings_never_match() {
        let mut expired = binding("AABB");
        expired.valid_to = Utc::now() - Duration::days(1);
        assert!(match_binding(&cert("AABB"), &[expired], &[], Utc::now()).is_none());

        let mut revoked_status = binding("AABB");
        revoked_status.status = BindingStatus::Revoked;
        assert!(match_binding(&cert("AABB"), &[revoked_status], &[], Utc::now()).is_none());

        let listed = binding("AABB");
        assert!(match_binding(
            &cert("AABB"),
            &[listed],
            &["aa:bb".to_string()],
            Utc::now()
        )
        .is_none());
    }
}
