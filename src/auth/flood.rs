//! Flood-controlled logging
//!
//! Port scanners and misconfigured fleets produce the same rejection
//! thousands of times. A KV marker with a cooldown TTL keeps each
//! (kind, source) pair to one log line per cooldown window.

use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::KvStore;

pub struct FloodControl {
    kv: Arc<dyn KvStore>,
    cooldown: Duration,
}

impl FloodControl {
    pub fn new(kv: Arc<dyn KvStore>, cooldown: Duration) -> Self {
        Self { kv, cooldown }
    }

    /// True when this (kind, source) should be logged now. A degraded KV
    /// store logs unconditionally; losing suppression is the safe failure.
    pub async fn should_log(&self, kind: &str, source: &str) -> bool {
        let key = format!("log:flood:{kind}:{source}");
        self.kv
            .set_nx(&key, "1", Some(self.cooldown))
            .await
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryKvStore;

    #[tokio::test]
    async fn suppresses_within_cooldown() {
        let flood = FloodControl::new(MemoryKvStore::shared(), Duration::from_secs(300));
        assert!(flood.should_log("unauthorized", "203.0.113.5").await);
        assert!(!flood.should_log("unauthorized", "203.0.113.5").await);
        // Different kind or source logs independently.
        assert!(flood.should_log("suspicious", "203.0.113.5").await);
        assert!(flood.should_log("unauthorized", "203.0.113.6").await);
    }

    #[tokio::test]
    async fn cooldown_expiry_logs_again() {
        let flood = FloodControl::new(MemoryKvStore::shared(), Duration::from_millis(20));
        assert!(flood.should_log("unauthorized", "ip").await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(flood.should_log("unauthorized", "ip").await);
    }
}
