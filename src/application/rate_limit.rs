//! Rate limiter
//!
//! Sliding-window counters in the KV store, per action per scope. Only
//! high-volume telemetry actions are limited by default. The counter is
//! incremented before the check, so the first violating message is both
//! counted and rejected; later messages in the same window keep
//! incrementing. Consumers tune limits with that in mind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::infrastructure::KvStore;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub per_charger_limit: u64,
    pub global_limit: u64,
    /// Actions subject to limiting; defaults to MeterValues and
    /// StatusNotification.
    pub limited_actions: HashSet<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut limited_actions = HashSet::new();
        limited_actions.insert("MeterValues".to_string());
        limited_actions.insert("StatusNotification".to_string());
        Self {
            window: Duration::from_secs(60),
            per_charger_limit: 120,
            global_limit: 6000,
            limited_actions,
        }
    }
}

/// Decision for one inbound CALL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { scope: &'static str, limit: u64 },
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Count this CALL and decide whether it may proceed. A degraded KV
    /// store fails open: telemetry pressure is preferable to dropping
    /// well-behaved chargers.
    pub async fn check(&self, action: &str, charge_point_id: &str) -> RateDecision {
        if !self.config.limited_actions.contains(action) {
            return RateDecision::Allowed;
        }

        let charger_key = format!("rate:{action}:cp:{charge_point_id}");
        let global_key = format!("rate:{action}:global");

        let charger_count = match self.kv.increment(&charger_key, self.config.window).await {
            Ok(count) => count,
            Err(err) => {
                debug!(action, charge_point_id, %err, "Rate counter unavailable");
                return RateDecision::Allowed;
            }
        };
        let global_count = match self.kv.increment(&global_key, self.config.window).await {
            Ok(count) => count,
            Err(err) => {
                debug!(action, %err, "Global rate counter unavailable");
                return RateDecision::Allowed;
            }
        };

        if charger_count > self.config.per_charger_limit {
            metrics::counter!("ocpp_rate_limited_total", "scope" => "charge_point").increment(1);
            return RateDecision::Limited {
                scope: "charge_point",
                limit: self.config.per_charger_limit,
            };
        }
        if global_count > self.config.global_limit {
            metrics::counter!("ocpp_rate_limited_total", "scope" => "global").increment(1);
            return RateDecision::Limited {
                scope: "global",
                limit: self.config.global_limit,
            };
        }
        RateDecision::Allowed
    }

    /// CALLERROR details object for a limited message.
    pub fn violation_details(&self, action: &str, decision: &RateDecision) -> serde_json::Value {
        match decision {
            RateDecision::Limited { scope, limit } => json!({
                "scope": scope,
                "limit": limit,
                "action": action,
                "windowSeconds": self.config.window.as_secs(),
            }),
            RateDecision::Allowed => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryKvStore;

    fn limiter(per_charger: u64, global: u64) -> RateLimiter {
        RateLimiter::new(
            MemoryKvStore::shared(),
            RateLimitConfig {
                window: Duration::from_secs(60),
                per_charger_limit: per_charger,
                global_limit: global,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn unlimited_actions_pass_through() {
        let rl = limiter(1, 1);
        for _ in 0..5 {
            assert_eq!(rl.check("BootNotification", "CP-1").await, RateDecision::Allowed);
        }
    }

    #[tokio::test]
    async fn per_charger_limit_trips_and_keeps_counting() {
        let rl = limiter(2, 100);
        assert_eq!(rl.check("MeterValues", "CP-1").await, RateDecision::Allowed);
        assert_eq!(rl.check("MeterValues", "CP-1").await, RateDecision::Allowed);
        // Third message is counted and rejected.
        assert!(matches!(
            rl.check("MeterValues", "CP-1").await,
            RateDecision::Limited { scope: "charge_point", limit: 2 }
        ));
        // Still rejected within the window.
        assert!(matches!(
            rl.check("MeterValues", "CP-1").await,
            RateDecision::Limited { .. }
        ));
        // Another charger has its own counter.
        assert_eq!(rl.check("MeterValues", "CP-2").await, RateDecision::Allowed);
    }

    #[tokio::test]
    async fn global_limit_spans_chargers() {
        let rl = limiter(100, 3);
        assert_eq!(rl.check("StatusNotification", "CP-1").await, RateDecision::Allowed);
        assert_eq!(rl.check("StatusNotification", "CP-2").await, RateDecision::Allowed);
        assert_eq!(rl.check("StatusNotification", "CP-3").await, RateDecision::Allowed);
        assert!(matches!(
            rl.check("StatusNotification", "CP-4").await,
            RateDecision::Limited { scope: "global", limit: 3 }
        ));
    }

    #[tokio::test]
    async fn violation_details_shape() {
        let rl = limiter(1, 10);
        rl.check("MeterValues", "CP-1").await;
        let decision = rl.check("MeterValues", "CP-1").await;
        let details = rl.violation_details("MeterValues", &decision);
        assert_eq!(details["scope"], "charge_point");
        assert_eq!(details["limit"], 1);
        assert_eq!(details["action"], "MeterValues");
        assert_eq!(details["windowSeconds"], 60);
    }
}
