//! Response cache
//!
//! Short-lived memoization of replies keyed by `(chargePointId, messageId)`.
//! Chargers retry CALLs over flaky links; on a hit the previously emitted
//! reply is re-sent verbatim, before any validation runs. Two levels: a
//! per-process map (always) and the shared KV store (optional) so a charger
//! that reconnected to another node still gets its reply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::infrastructure::KvStore;

struct CachedReply {
    body: String,
    stored_at: Instant,
}

pub struct ResponseCache {
    local: DashMap<(String, String), CachedReply>,
    kv: Option<Arc<dyn KvStore>>,
    ttl: Option<Duration>,
}

fn kv_key(charge_point_id: &str, message_id: &str) -> String {
    format!("response-cache:{charge_point_id}:{message_id}")
}

impl ResponseCache {
    /// `ttl_seconds <= 0` disables the cache entirely.
    pub fn new(ttl_seconds: i64, kv: Option<Arc<dyn KvStore>>) -> Self {
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds as u64));
        Self {
            local: DashMap::new(),
            kv,
            ttl,
        }
    }

    pub fn enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Look up the reply previously sent for this message id.
    pub async fn get(&self, charge_point_id: &str, message_id: &str) -> Option<String> {
        let ttl = self.ttl?;
        let key = (charge_point_id.to_string(), message_id.to_string());

        if let Some(entry) = self.local.get(&key) {
            if entry.stored_at.elapsed() < ttl {
                metrics::counter!("ocpp_response_cache_hits_total", "level" => "local")
                    .increment(1);
                return Some(entry.body.clone());
            }
        }
        self.local
            .remove_if(&key, |_, e| e.stored_at.elapsed() >= ttl);

        if let Some(kv) = &self.kv {
            match kv.get(&kv_key(charge_point_id, message_id)).await {
                Ok(Some(body)) => {
                    metrics::counter!("ocpp_response_cache_hits_total", "level" => "shared")
                        .increment(1);
                    return Some(body);
                }
                Ok(None) => {}
                Err(err) => {
                    // Cache degradation is not an error path for the charger.
                    debug!(charge_point_id, message_id, %err, "Response cache lookup failed");
                }
            }
        }
        None
    }

    /// Store the reply exactly as it was sent.
    pub async fn store(&self, charge_point_id: &str, message_id: &str, body: &str) {
        let Some(ttl) = self.ttl else { return };

        self.local.insert(
            (charge_point_id.to_string(), message_id.to_string()),
            CachedReply {
                body: body.to_string(),
                stored_at: Instant::now(),
            },
        );

        if let Some(kv) = &self.kv {
            if let Err(err) = kv
                .set(&kv_key(charge_point_id, message_id), body, Some(ttl))
                .await
            {
                debug!(charge_point_id, message_id, %err, "Response cache store failed");
            }
        }
    }

    /// Drop expired local entries. Called opportunistically by the owner loop.
    pub fn purge_expired(&self) {
        let Some(ttl) = self.ttl else { return };
        self.local.retain(|_, e| e.stored_at.elapsed() < ttl);
    }
}
