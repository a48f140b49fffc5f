//! Key/value store port
//!
//! The gateway stores identities, session ownership, idempotency claims,
//! audit records, rate counters and flood-control markers behind this trait.
//! All TTLs are owned by the store; callers never re-implement expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::time::timeout;

use crate::support::{CircuitBreaker, KvError};

/// Outcome of a [`KvStore::compare_and_update`] transform.
pub enum CasDecision {
    Write { value: String, ttl: Option<Duration> },
    Keep,
    Delete,
}

/// Key/value store operations used by the gateway.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Set-if-absent. Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Increment a counter, creating it at 1. The TTL is applied only on
    /// creation, so the counter expires with its window regardless of later
    /// increments.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, KvError>;

    /// Atomic read-modify-write of a single key. The transform observes the
    /// current value and decides whether to write, keep or delete. A Redis
    /// implementation executes this as a server-side script; no other writer
    /// may interleave.
    async fn compare_and_update(
        &self,
        key: &str,
        transform: Box<dyn for<'a> FnOnce(Option<&'a str>) -> CasDecision + Send>,
    ) -> Result<(), KvError>;
}

// ── In-memory implementation ───────────────────────────────────

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn expiry(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|t| Instant::now() + t)
}

/// In-memory store with lazy expiry. Per-key atomicity comes from the
/// sharded map's entry lock, which is what the CAS contract requires.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop expired entries on access.
        self.entries.remove_if(key, |_, e| e.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                if occ.get().is_expired() {
                    occ.insert(Entry {
                        value: value.to_string(),
                        expires_at: expiry(ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vac) => {
                vac.insert(Entry {
                    value: value.to_string(),
                    expires_at: expiry(ttl),
                });
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, KvError> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                if occ.get().is_expired() {
                    occ.insert(Entry {
                        value: "1".to_string(),
                        expires_at: expiry(Some(ttl)),
                    });
                    return Ok(1);
                }
                let count = occ.get().value.parse::<u64>().unwrap_or(0) + 1;
                occ.get_mut().value = count.to_string();
                Ok(count)
            }
            MapEntry::Vacant(vac) => {
                vac.insert(Entry {
                    value: "1".to_string(),
                    expires_at: expiry(Some(ttl)),
                });
                Ok(1)
            }
        }
    }

    async fn compare_and_update(
        &self,
        key: &str,
        transform: Box<dyn for<'a> FnOnce(Option<&'a str>) -> CasDecision + Send>,
    ) -> Result<(), KvError> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                let current = if occ.get().is_expired() {
                    None
                } else {
                    Some(occ.get().value.clone())
                };
                match transform(current.as_deref()) {
                    CasDecision::Write { value, ttl } => {
                        occ.insert(Entry {
                            value,
                            expires_at: expiry(ttl),
                        });
                    }
                    CasDecision::Keep => {
                        if current.is_none() {
                            occ.remove();
                        }
                    }
                    CasDecision::Delete => {
                        occ.remove();
                    }
                }
                Ok(())
            }
            MapEntry::Vacant(vac) => {
                match transform(None) {
                    CasDecision::Write { value, ttl } => {
                        vac.insert(Entry {
                            value,
                            expires_at: expiry(ttl),
                        });
                    }
                    CasDecision::Keep | CasDecision::Delete => {}
                }
                Ok(())
            }
        }
    }
}

// ── Circuit-breaker guard ──────────────────────────────────────

/// Wraps any [`KvStore`] with a fail-fast deadline and a circuit breaker.
/// Open circuit rejects without calling the downstream.
pub struct GuardedKvStore {
    inner: Arc<dyn KvStore>,
    breaker: Arc<CircuitBreaker>,
    op_timeout: Duration,
}

impl GuardedKvStore {
    pub fn new(inner: Arc<dyn KvStore>, breaker: Arc<CircuitBreaker>, op_timeout: Duration) -> Self {
        Self {
            inner,
            breaker,
            op_timeout,
        }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, KvError>
    where
        F: std::future::Future<Output = Result<T, KvError>> + Send,
    {
        if !self.breaker.allow() {
            return Err(KvError::CircuitOpen);
        }
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                Err(err)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(KvError::Timeout)
            }
        }
    }
}

#[async_trait]
impl KvStore for GuardedKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.run(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.run(self.inner.set(key, value, ttl)).await
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        self.run(self.inner.set_nx(key, value, ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.run(self.inner.delete(key)).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, KvError> {
        self.run(self.inner.increment(key, ttl)).await
    }

    async fn compare_and_update(
        &self,
        key: &str,
        transform: Box<dyn for<'a> FnOnce(Option<&'a str>) -> CasDecision + Send>,
    ) -> Result<(), KvError> {
        self.run(self.inner.compare_and_update(key, transform)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::BreakerConfig;

    #[tokio::test]
    async fn set_get_delete() {
        let kv = MemoryKvStore::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires() {
        let kv = MemoryKvStore::new();
        kv.set("a", "1", Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_claims_once() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_nx("claim", "1", None).await.unwrap());
        assert!(!kv.set_nx("claim", "2", None).await.unwrap());
        assert_eq!(kv.get("claim").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn increment_keeps_creation_ttl() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.increment("c", Duration::from_millis(30)).await.unwrap(), 1);
        assert_eq!(kv.increment("c", Duration::from_millis(30)).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Window elapsed: the counter restarts.
        assert_eq!(kv.increment("c", Duration::from_millis(30)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn compare_and_update_observes_current() {
        let kv = MemoryKvStore::new();
        kv.set("k", "old", None).await.unwrap();
        kv.compare_and_update(
            "k",
            Box::new(|current| {
                assert_eq!(current, Some("old"));
                CasDecision::Write {
                    value: "new".into(),
                    ttl: None,
                }
            }),
        )
        .await
        .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn guarded_store_fast_fails_when_open() {
        struct FailingKv;
        #[async_trait]
        impl KvStore for FailingKv {
            async fn get(&self, _: &str) -> Result<Option<String>, KvError> {
                Err(KvError::Unavailable("down".into()))
            }
            async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), KvError> {
                Err(KvError::Unavailable("down".into()))
            }
            async fn set_nx(
                &self,
                _: &str,
                _: &str,
                _: Option<Duration>,
            ) -> Result<bool, KvError> {
                Err(KvError::Unavailable("down".into()))
            }
            async fn delete(&self, _: &str) -> Result<(), KvError> {
                Err(KvError::Unavailable("down".into()))
            }
            async fn increment(&self, _: &str, _: Duration) -> Result<u64, KvError> {
                Err(KvError::Unavailable("down".into()))
            }
            async fn compare_and_update(
                &self,
                _: &str,
                _: Box<dyn for<'a> FnOnce(Option<&'a str>) -> CasDecision + Send>,
            ) -> Result<(), KvError> {
                Err(KvError::Unavailable("down".into()))
            }
        }

        let breaker = Arc::new(CircuitBreaker::new(
            "kv",
            BreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
        ));
        let kv = GuardedKvStore::new(Arc::new(FailingKv), breaker, Duration::from_millis(100));
        assert!(matches!(kv.get("x").await, Err(KvError::Unavailable(_))));
        assert!(matches!(kv.get("x").await, Err(KvError::Unavailable(_))));
        // Breaker now open: downstream is no longer called.
        assert!(matches!(kv.get("x").await, Err(KvError::CircuitOpen)));
    }
}
