//! Connection admission
//!
//! Ordered checks against the identity record fetched from the KV store:
//! status, protocol allow-list, IP allow-lists, then the credential mode the
//! record demands (basic / token / mTLS). Every failure collapses to
//! "unauthenticated" towards the charger; details only reach the logs, and
//! at most once per source per cooldown.

pub mod flood;
pub mod ip;
pub mod mtls;
pub mod secret;

use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use ipnet::IpNet;
use tracing::{info, warn};

use crate::domain::identity::{identity_key, revoked_cert_key, AuthCredentials, IdentityStatus};
use crate::domain::{ChargerIdentity, OcppVersion};
use crate::infrastructure::KvStore;

pub use flood::FloodControl;
pub use mtls::PeerCertificate;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub allow_basic: bool,
    pub allow_token: bool,
    pub allow_mtls: bool,
    /// Reject identities that do not pin an explicit protocol list.
    pub require_protocol_list: bool,
    pub trust_proxy_headers: bool,
    pub global_allowed_cidrs: Vec<IpNet>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_basic: true,
            allow_token: true,
            allow_mtls: true,
            require_protocol_list: false,
            trust_proxy_headers: false,
            global_allowed_cidrs: Vec::new(),
        }
    }
}

/// Connection material the WebSocket layer hands to admission.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    pub forwarded_for: Option<String>,
    pub forwarded: Option<String>,
    pub authorization: Option<String>,
    pub x_api_key: Option<String>,
    pub peer_certificate: Option<PeerCertificate>,
}

/// Why admission failed. Logged, never sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub reason: String,
}

impl AuthFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub struct Authenticator {
    kv: Arc<dyn KvStore>,
    flood: Arc<FloodControl>,
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(kv: Arc<dyn KvStore>, flood: Arc<FloodControl>, config: AuthConfig) -> Self {
        Self { kv, flood, config }
    }

    /// Run the admission pipeline; success returns the identity record for
    /// downstream session context.
    pub async fn authenticate(
        &self,
        charge_point_id: &str,
        version: OcppVersion,
        peer_addr: SocketAddr,
        hello: &ClientHello,
    ) -> Result<ChargerIdentity, AuthFailure> {
        let client_ip = ip::resolve_client_ip(
            peer_addr.ip(),
            hello.forwarded_for.as_deref(),
            hello.forwarded.as_deref(),
            self.config.trust_proxy_headers,
        );

        match self.run_checks(charge_point_id, version, client_ip, hello).await {
            Ok(identity) => {
                info!(
                    charge_point_id,
                    %client_ip,
                    station_id = identity.station_id.as_str(),
                    "Charge point authenticated"
                );
                Ok(identity)
            }
            Err(failure) => {
                metrics::counter!("ocpp_auth_failures_total").increment(1);
                if self
                    .flood
                    .should_log("unauthorized", &client_ip.to_string())
                    .await
                {
                    warn!(
                        charge_point_id,
                        %client_ip,
                        reason = failure.reason.as_str(),
                        "Rejecting unauthenticated connection"
                    );
                }
                Err(failure)
            }
        }
    }

    async fn run_checks(
        &self,
        charge_point_id: &str,
        version: OcppVersion,
        client_ip: std::net::IpAddr,
        hello: &ClientHello,
    ) -> Result<ChargerIdentity, AuthFailure> {
        // 1. Identity lookup. A degraded KV store fails closed.
        let raw = self
            .kv
            .get(&identity_key(charge_point_id))
            .await
            .map_err(|e| AuthFailure::new(format!("identity lookup failed: {e}")))?
            .ok_or_else(|| AuthFailure::new("unknown charge point"))?;
        let identity: ChargerIdentity = serde_json::from_str(&raw)
            .map_err(|e| AuthFailure::new(format!("unreadable identity record: {e}")))?;

        let now = Utc::now();
        identity
            .validate(charge_point_id, now)
            .map_err(AuthFailure::new)?;
        if identity.status != IdentityStatus::Active {
            return Err(AuthFailure::new("identity disabled"));
        }

        // 2. Protocol allow-list.
        match &identity.allowed_protocols {
            Some(allowed) => {
                if !allowed.contains(&version) {
                    return Err(AuthFailure::new(format!(
                        "protocol {} not allowed for this identity",
                        version.wire_name()
                    )));
                }
            }
            None if self.config.require_protocol_list => {
                return Err(AuthFailure::new("identity has no protocol allow-list"));
            }
            None => {}
        }

        // 3. IP allow-lists: global first, then per-identity.
        if !self.config.global_allowed_cidrs.is_empty()
            && !self
                .config
                .global_allowed_cidrs
                .iter()
                .any(|net| net.contains(&ip::canonical(client_ip)))
        {
            return Err(AuthFailure::new("source address outside global allow-list"));
        }
        let identity_cidrs = ip::parse_cidrs(&identity.allowed_cidrs);
        if !ip::ip_allowed(client_ip, &identity.allowed_ips, &identity_cidrs) {
            return Err(AuthFailure::new("source address not allowed for identity"));
        }

        // 4. Credential mode, as demanded by the identity record.
        let mode = identity.auth.mode();
        if let Some(allowed_types) = &identity.allowed_types {
            if !allowed_types.contains(&mode) {
                return Err(AuthFailure::new("auth mode not allowed for identity"));
            }
        }

        match &identity.auth {
            AuthCredentials::Basic {
                username,
                secret_hash,
                secret_salt,
                hash_algorithm,
            } => {
                if !self.config.allow_basic {
                    return Err(AuthFailure::new("basic auth disabled"));
                }
                let (presented_user, presented_secret) = parse_basic(hello)
                    .ok_or_else(|| AuthFailure::new("missing or malformed Basic credentials"))?;

                let expected_user = username.as_deref().unwrap_or(charge_point_id);
                if presented_user != expected_user && presented_user != charge_point_id {
                    return Err(AuthFailure::new("username mismatch"));
                }
                if !secret::verify(*hash_algorithm, &presented_secret, secret_salt, secret_hash) {
                    return Err(AuthFailure::new("secret mismatch"));
                }
            }
            AuthCredentials::Token {
                token_hash,
                secret_salt,
                hash_algorithm,
            } => {
                if !self.config.allow_token {
                    return Err(AuthFailure::new("token auth disabled"));
                }
                let token = parse_token(hello)
                    .ok_or_else(|| AuthFailure::new("missing bearer token"))?;
                if !secret::verify(*hash_algorithm, &token, secret_salt, token_hash) {
                    return Err(AuthFailure::new("token mismatch"));
                }
            }
            AuthCredentials::Mtls {
                certificates,
                revoked_fingerprints,
            } => {
                if !self.config.allow_mtls {
                    return Err(AuthFailure::new("mTLS auth disabled"));
                }
                let cert = hello
                    .peer_certificate
                    .as_ref()
                    .ok_or_else(|| AuthFailure::new("no verified peer certificate"))?;
                if !mtls::certificate_current(cert, now) {
                    return Err(AuthFailure::new("peer certificate outside validity window"));
                }

                let fingerprint = mtls::normalize_fingerprint(&cert.fingerprint);
                // Revocation lookup failing must not grant access.
                let revoked = self
                    .kv
                    .get(&revoked_cert_key(&fingerprint))
                    .await
                    .map_err(|e| AuthFailure::new(format!("revocation lookup failed: {e}")))?;
                if revoked.is_some() {
                    return Err(AuthFailure::new("peer certificate revoked"));
                }
                if revoked_fingerprints
                    .iter()
                    .any(|f| mtls::normalize_fingerprint(f) == fingerprint)
                {
                    return Err(AuthFailure::new("peer certificate revoked for identity"));
                }

                mtls::match_binding(cert, certificates, revoked_fingerprints, now)
                    .ok_or_else(|| AuthFailure::new("no matching certificate binding"))?;
            }
        }

        Ok(identity)
    }
}

fn parse_basic(hello: &ClientHello) -> Option<(String, String)> {
    let header = hello.authorization.as_deref()?;
    let encoded = header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, secret) = decoded.split_once(':')?;
    Some((user.to_string(), secret.to_string()))
}

fn parse_token(hello: &ClientHello) -> Option<String> {
    if let Some(header) = hello.authorization.as_deref() {
        if let Some(token) = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
    }
    hello.x_api_key.as_ref().map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::HashAlgorithm;
    use crate::infrastructure::MemoryKvStore;
    use std::time::Duration;

    async fn seed_basic_identity(kv: &Arc<MemoryKvStore>, charge_point_id: &str, secret_text: &str) {
        let hash = secret::digest(HashAlgorithm::Sha256, secret_text, "pepper-salt").unwrap();
        let identity = serde_json::json!({
            "chargePointId": charge_point_id,
            "stationId": "ST-1",
            "tenantId": "T-1",
            "status": "active",
            "allowedProtocols": ["1.6J", "2.0.1"],
            "auth": {
                "type": "basic",
                "secretHash": hash,
                "secretSalt": "pepper-salt",
                "hashAlgorithm": "sha256"
            }
        });
        kv.set(
            &identity_key(charge_point_id),
            &identity.to_string(),
            None,
        )
        .await
        .unwrap();
    }

    fn authenticator(kv: Arc<MemoryKvStore>) -> Authenticator {
        let flood = Arc::new(FloodControl::new(kv.clone(), Duration::from_secs(300)));
        Authenticator::new(kv, flood, AuthConfig::default())
    }

    fn basic_hello(user: &str, secret: &str) -> ClientHello {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{secret}"));
        ClientHello {
            authorization: Some(format!("Basic {credentials}")),
            ..Default::default()
        }
    }

    fn peer() -> SocketAddr {
        "192.0.2.10:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn basic_auth_happy_path() {
        let kv = MemoryKvStore::shared();
        seed_basic_identity(&kv, "CP-1", "s3cret").await;
        let auth = authenticator(kv);

        let identity = auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &basic_hello("CP-1", "s3cret"))
            .await
            .unwrap();
        assert_eq!(identity.station_id, "ST-1");
    }

    #[tokio::test]
    async fn wrong_secret_or_unknown_charger_rejected() {
        let kv = MemoryKvStore::shared();
        seed_basic_identity(&kv, "CP-1", "s3cret").await;
        let auth = authenticator(kv);

        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &basic_hello("CP-1", "wrong"))
            .await
            .is_err());
        assert!(auth
            .authenticate("CP-404", OcppVersion::V16, peer(), &basic_hello("CP-404", "s3cret"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn protocol_not_in_allow_list_rejected() {
        let kv = MemoryKvStore::shared();
        seed_basic_identity(&kv, "CP-1", "s3cret").await;
        let auth = authenticator(kv);

        let failure = auth
            .authenticate("CP-1", OcppVersion::V21, peer(), &basic_hello("CP-1", "s3cret"))
            .await
            .unwrap_err();
        assert!(failure.reason.contains("protocol"));
    }

    #[tokio::test]
    async fn identity_ip_allow_list_enforced() {
        let kv = MemoryKvStore::shared();
        let hash = secret::digest(HashAlgorithm::Sha256, "s3cret", "pepper-salt").unwrap();
        let identity = serde_json::json!({
            "chargePointId": "CP-1",
            "stationId": "ST-1",
            "tenantId": "T-1",
            "status": "active",
            "allowedCidrs": ["10.0.0.0/8"],
            "auth": {
                "type": "basic",
                "secretHash": hash,
                "secretSalt": "pepper-salt",
                "hashAlgorithm": "sha256"
            }
        });
        kv.set(&identity_key("CP-1"), &identity.to_string(), None)
            .await
            .unwrap();
        let auth = authenticator(kv);

        // 192.0.2.10 is outside 10.0.0.0/8.
        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &basic_hello("CP-1", "s3cret"))
            .await
            .is_err());

        let inside: SocketAddr = "10.1.2.3:1234".parse().unwrap();
        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, inside, &basic_hello("CP-1", "s3cret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn disabled_identity_rejected() {
        let kv = MemoryKvStore::shared();
        let hash = secret::digest(HashAlgorithm::Sha256, "s3cret", "pepper-salt").unwrap();
        let identity = serde_json::json!({
            "chargePointId": "CP-1",
            "stationId": "ST-1",
            "tenantId": "T-1",
            "status": "disabled",
            "auth": {
                "type": "basic",
                "secretHash": hash,
                "secretSalt": "pepper-salt",
                "hashAlgorithm": "sha256"
            }
        });
        kv.set(&identity_key("CP-1"), &identity.to_string(), None)
            .await
            .unwrap();
        let auth = authenticator(kv);

        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &basic_hello("CP-1", "s3cret"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn mtls_revocation_key_blocks() {
        let kv = MemoryKvStore::shared();
        let now = Utc::now();
        let identity = serde_json::json!({
            "chargePointId": "CP-1",
            "stationId": "ST-1",
            "tenantId": "T-1",
            "status": "active",
            "auth": {
                "type": "mtls",
                "certificates": [{
                    "fingerprint": "AA:BB:CC:DD",
                    "validFrom": now - chrono::Duration::days(1),
                    "validTo": now + chrono::Duration::days(30),
                    "status": "active"
                }]
            }
        });
        kv.set(&identity_key("CP-1"), &identity.to_string(), None)
            .await
            .unwrap();
        let auth = authenticator(kv.clone());

        let hello = ClientHello {
            peer_certificate: Some(PeerCertificate {
                fingerprint: "aabbccdd".into(),
                subject_common_name: None,
                subject_alt_names: vec![],
                serial_number: None,
                not_before: now - chrono::Duration::days(1),
                not_after: now + chrono::Duration::days(30),
            }),
            ..Default::default()
        };

        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &hello)
            .await
            .is_ok());

        // Flag the fingerprint revoked in the KV store.
        kv.set("revoked-certs:AABBCCDD", "1", None).await.unwrap();
        assert!(auth
            .authenticate("CP-1", OcppVersion::V16, peer(), &hello)
            .await
            .is_err());
    }
}
