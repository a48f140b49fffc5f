//! Gateway configuration
//!
//! Every knob is environment-driven with a default; integer knobs carry
//! bounds that are validated at startup so a bad deployment fails fast
//! instead of misbehaving under load.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::AuthConfig;
use crate::support::{BreakerConfig, ConfigError};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub node_id: String,

    pub session_ttl_seconds: u64,
    /// Zero disables stale takeover.
    pub session_stale_seconds: u64,
    pub node_ttl_seconds: u64,
    pub node_heartbeat_seconds: u64,

    pub max_payload_bytes: usize,
    pub pending_message_limit: usize,
    /// `<= 0` disables the response cache.
    pub response_cache_ttl_seconds: i64,
    pub call_timeout_seconds: u64,

    pub command_idempotency_ttl_seconds: u64,
    pub command_audit_ttl_seconds: u64,
    pub command_group_base: String,

    pub rate_limit_window_seconds: u64,
    pub rate_limit_per_charger: u64,
    pub rate_limit_global: u64,
    pub flood_log_cooldown_seconds: u64,

    pub auth: AuthConfig,
    pub strict_transactions: bool,
    /// Actions exempt from `additionalProperties` tightening.
    pub schema_exempt_actions: HashSet<String>,

    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_cooldown_seconds: u64,
    /// Fail-fast deadline on every KV/bus round trip.
    pub infra_op_timeout_ms: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let auth = AuthConfig {
            allow_basic: bool_var(&lookup, "AUTH_ALLOW_BASIC", true)?,
            allow_token: bool_var(&lookup, "AUTH_ALLOW_TOKEN", true)?,
            allow_mtls: bool_var(&lookup, "AUTH_ALLOW_MTLS", true)?,
            require_protocol_list: bool_var(&lookup, "AUTH_REQUIRE_PROTOCOL_LIST", false)?,
            trust_proxy_headers: bool_var(&lookup, "AUTH_TRUST_PROXY_HEADERS", false)?,
            global_allowed_cidrs: cidr_list_var(&lookup, "AUTH_GLOBAL_ALLOWED_CIDRS")?,
        };

        let schema_exempt_actions = lookup("SCHEMA_TIGHTEN_EXEMPT_ACTIONS")
            .unwrap_or_else(|| "DataTransfer".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: lookup("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: int_var(&lookup, "GATEWAY_PORT", 9310u16, 1, 65535)?,
            node_id: node_id_var(&lookup)?,

            session_ttl_seconds: int_var(&lookup, "SESSION_TTL_SECONDS", 300u64, 5, 86_400)?,
            session_stale_seconds: int_var(&lookup, "SESSION_STALE_SECONDS", 90u64, 0, 86_400)?,
            node_ttl_seconds: int_var(&lookup, "NODE_TTL_SECONDS", 120u64, 10, 3_600)?,
            node_heartbeat_seconds: int_var(&lookup, "NODE_HEARTBEAT_SECONDS", 30u64, 1, 3_600)?,

            max_payload_bytes: int_var(
                &lookup,
                "OCPP_MAX_PAYLOAD_BYTES",
                131_072usize,
                1_024,
                10_485_760,
            )?,
            pending_message_limit: int_var(&lookup, "OCPP_PENDING_MESSAGE_LIMIT", 32usize, 1, 1_024)?,
            response_cache_ttl_seconds: int_var(
                &lookup,
                "OCPP_RESPONSE_CACHE_TTL_SECONDS",
                300i64,
                i64::MIN,
                86_400,
            )?,
            call_timeout_seconds: int_var(&lookup, "OCPP_CALL_TIMEOUT_SECONDS", 15u64, 1, 300)?,

            command_idempotency_ttl_seconds: int_var(
                &lookup,
                "COMMAND_IDEMPOTENCY_TTL_SECONDS",
                86_400u64,
                60,
                604_800,
            )?,
            command_audit_ttl_seconds: int_var(
                &lookup,
                "COMMAND_AUDIT_TTL_SECONDS",
                86_400u64,
                60,
                604_800,
            )?,
            command_group_base: lookup("COMMAND_CONSUMER_GROUP")
                .unwrap_or_else(|| "gateway".to_string()),

            rate_limit_window_seconds: int_var(&lookup, "RATE_LIMIT_WINDOW_SECONDS", 60u64, 1, 3_600)?,
            rate_limit_per_charger: int_var(
                &lookup,
                "RATE_LIMIT_PER_CHARGER",
                120u64,
                1,
                1_000_000,
            )?,
            rate_limit_global: int_var(&lookup, "RATE_LIMIT_GLOBAL", 6_000u64, 1, 100_000_000)?,
            flood_log_cooldown_seconds: int_var(
                &lookup,
                "FLOOD_LOG_COOLDOWN_SECONDS",
                300u64,
                1,
                86_400,
            )?,

            auth,
            strict_transactions: bool_var(&lookup, "OCPP_STRICT_TRANSACTIONS", true)?,
            schema_exempt_actions,

            breaker_failure_threshold: int_var(&lookup, "CIRCUIT_BREAKER_FAILURES", 5u32, 1, 1_000)?,
            breaker_success_threshold: int_var(&lookup, "CIRCUIT_BREAKER_SUCCESSES", 2u32, 1, 1_000)?,
            breaker_cooldown_seconds: int_var(
                &lookup,
                "CIRCUIT_BREAKER_COOLDOWN_SECONDS",
                10u64,
                1,
                3_600,
            )?,
            infra_op_timeout_ms: int_var(&lookup, "INFRA_OP_TIMEOUT_MS", 2_000u64, 50, 60_000)?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn session_stale(&self) -> Duration {
        Duration::from_secs(self.session_stale_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn infra_op_timeout(&self) -> Duration {
        Duration::from_millis(self.infra_op_timeout_ms)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            cooldown: Duration::from_secs(self.breaker_cooldown_seconds),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None).expect("defaults are in bounds")
    }
}

// ── Variable parsing helpers ───────────────────────────────────

fn int_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, format!("not an integer: {raw:?}")))?;
    if value < min || value > max {
        return Err(ConfigError::invalid(
            name,
            format!("{value} outside bounds [{min}, {max}]"),
        ));
    }
    Ok(value)
}

fn bool_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(name, format!("not a boolean: {other:?}"))),
    }
}

fn cidr_list_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Vec<ipnet::IpNet>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            entry
                .parse()
                .map_err(|_| ConfigError::invalid(name, format!("not a CIDR: {entry:?}")))
        })
        .collect()
}

fn node_id_var(lookup: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    match lookup("GATEWAY_NODE_ID") {
        Some(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(_) => Err(ConfigError::invalid("GATEWAY_NODE_ID", "must not be empty")),
        None => {
            let suffix = Uuid::new_v4().simple().to_string();
            Ok(format!("node-{}", &suffix[..8]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 9310);
        assert_eq!(config.session_ttl_seconds, 300);
        assert_eq!(config.call_timeout_seconds, 15);
        assert!(config.node_id.starts_with("node-"));
        assert!(config.schema_exempt_actions.contains("DataTransfer"));
        assert!(config.strict_transactions);
    }

    #[test]
    fn bounds_are_enforced() {
        assert!(from_map(&[("GATEWAY_PORT", "0")]).is_err());
        assert!(from_map(&[("SESSION_TTL_SECONDS", "2")]).is_err());
        assert!(from_map(&[("OCPP_PENDING_MESSAGE_LIMIT", "100000")]).is_err());
        assert!(from_map(&[("OCPP_CALL_TIMEOUT_SECONDS", "banana")]).is_err());
    }

    #[test]
    fn overrides_apply() {
        let config = from_map(&[
            ("GATEWAY_NODE_ID", "node-test"),
            ("SESSION_STALE_SECONDS", "0"),
            ("OCPP_RESPONSE_CACHE_TTL_SECONDS", "-1"),
            ("SCHEMA_TIGHTEN_EXEMPT_ACTIONS", "DataTransfer, BootNotification"),
            ("AUTH_TRUST_PROXY_HEADERS", "true"),
            ("AUTH_GLOBAL_ALLOWED_CIDRS", "10.0.0.0/8, 192.168.0.0/16"),
        ])
        .unwrap();
        assert_eq!(config.node_id, "node-test");
        assert_eq!(config.session_stale_seconds, 0);
        assert_eq!(config.response_cache_ttl_seconds, -1);
        assert!(config.schema_exempt_actions.contains("BootNotification"));
        assert!(config.auth.trust_proxy_headers);
        assert_eq!(config.auth.global_allowed_cidrs.len(), 2);
    }

    #[test]
    fn bad_cidr_is_a_startup_error() {
        assert!(from_map(&[("AUTH_GLOBAL_ALLOWED_CIDRS", "not-a-cidr")]).is_err());
    }
}
