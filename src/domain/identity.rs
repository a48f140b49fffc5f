//! Charger identity records
//!
//! Fetched from the KV store under `chargers:{chargePointId}` during
//! connection admission. The record carries the credential material and the
//! per-charger allow-lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::version::OcppVersion;

/// Minimum hex length of a stored secret/token digest (sha256 = 64).
pub const MIN_SECRET_HASH_LEN: usize = 64;
/// Minimum length of a stored salt.
pub const MIN_SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Scrypt,
}

/// Authentication modes an identity may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Basic,
    Token,
    Mtls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    Active,
    Revoked,
}

/// One certificate pinned to an identity for mTLS admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBinding {
    /// DER digest, colons stripped, upper-case hex.
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_alt_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: BindingStatus,
}

impl CertificateBinding {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == BindingStatus::Active && self.valid_from <= now && now <= self.valid_to
    }
}

/// Credential material, tagged by authentication mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthCredentials {
    #[serde(rename_all = "camelCase")]
    Basic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        secret_hash: String,
        secret_salt: String,
        hash_algorithm: HashAlgorithm,
    },
    #[serde(rename_all = "camelCase")]
    Token {
        token_hash: String,
        secret_salt: String,
        hash_algorithm: HashAlgorithm,
    },
    #[serde(rename_all = "camelCase")]
    Mtls {
        certificates: Vec<CertificateBinding>,
        #[serde(default)]
        revoked_fingerprints: Vec<String>,
    },
}

impl AuthCredentials {
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Basic { .. } => AuthMode::Basic,
            Self::Token { .. } => AuthMode::Token,
            Self::Mtls { .. } => AuthMode::Mtls,
        }
    }
}

/// The identity record stored under `chargers:{chargePointId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerIdentity {
    pub charge_point_id: String,
    pub station_id: String,
    pub tenant_id: String,
    pub status: IdentityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_protocols: Option<Vec<OcppVersion>>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
    /// When present, restricts which auth modes may be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<AuthMode>>,
    pub auth: AuthCredentials,
}

impl ChargerIdentity {
    /// Structural invariants checked after lookup. `key` is the charge-point
    /// id the record was fetched under; the stored id must match it.
    pub fn validate(&self, key: &str, now: DateTime<Utc>) -> Result<(), String> {
        if self.charge_point_id != key {
            return Err(format!(
                "identity key mismatch: stored {:?}, looked up {:?}",
                self.charge_point_id, key
            ));
        }
        match &self.auth {
            AuthCredentials::Basic {
                secret_hash,
                secret_salt,
                ..
            } => validate_digest(secret_hash, secret_salt),
            AuthCredentials::Token {
                token_hash,
                secret_salt,
                ..
            } => validate_digest(token_hash, secret_salt),
            AuthCredentials::Mtls { certificates, .. } => {
                if certificates.iter().any(|c| c.is_current(now)) {
                    Ok(())
                } else {
                    Err("no currently valid certificate binding".to_string())
                }
            }
        }
    }
}

fn validate_digest(hash: &str, salt: &str) -> Result<(), String> {
    if hash.len() < MIN_SECRET_HASH_LEN {
        return Err(format!(
            "stored digest too short ({} < {MIN_SECRET_HASH_LEN})",
            hash.len()
        ));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(format!("stored salt too short ({} < {MIN_SALT_LEN})", salt.len()));
    }
    Ok(())
}

/// KV key for an identity record.
pub fn identity_key(charge_point_id: &str) -> String {
    format!("chargers:{charge_point_id}")
}

/// KV key flagging a revoked certificate fingerprint.
pub fn revoked_cert_key(normalized_fingerprint: &str) -> String {
    format!("revoked-certs:{normalized_fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_identity() -> ChargerIdentity {
        ChargerIdentity {
            charge_point_id: "CP-1".into(),
            station_id: "ST-1".into(),
            tenant_id: "T-1".into(),
            status: IdentityStatus::Active,
            allowed_protocols: Some(vec![OcppVersion::V16, OcppVersion::V201]),
            allowed_ips: vec![],
            allowed_cidrs: vec![],
            allowed_types: None,
            auth: AuthCredentials::Basic {
                username: None,
                secret_hash: "a".repeat(64),
                secret_salt: "saltsalt".into(),
                hash_algorithm: HashAlgorithm::Sha256,
            },
        }
    }

    #[test]
    fn identity_json_shape() {
        let json = serde_json::to_value(basic_identity()).unwrap();
        assert_eq!(json["chargePointId"], "CP-1");
        assert_eq!(json["status"], "active");
        assert_eq!(json["allowedProtocols"][0], "1.6J");
        assert_eq!(json["auth"]["type"], "basic");
        assert_eq!(json["auth"]["hashAlgorithm"], "sha256");
    }

    #[test]
    fn validate_rejects_key_mismatch() {
        let id = basic_identity();
        assert!(id.validate("CP-1", Utc::now()).is_ok());
        assert!(id.validate("CP-2", Utc::now()).is_err());
    }

    #[test]
    fn validate_rejects_short_digest() {
        let mut id = basic_identity();
        if let AuthCredentials::Basic { secret_hash, .. } = &mut id.auth {
            *secret_hash = "short".into();
        }
        assert!(id.validate("CP-1", Utc::now()).is_err());
    }

    #[test]
    fn mtls_requires_current_binding() {
        let now = Utc::now();
        let id = ChargerIdentity {
            auth: AuthCredentials::Mtls {
                certificates: vec![CertificateBinding {
                    fingerprint: "AB".repeat(20),
                    subject: None,
                    subject_alt_name: None,
                    serial_number: None,
                    valid_from: now - chrono::Duration::days(2),
                    valid_to: now - chrono::Duration::days(1),
                    status: BindingStatus::Active,
                }],
                revoked_fingerprints: vec![],
            },
            ..basic_identity()
        };
        assert!(id.validate("CP-1", now).is_err());
    }
}
