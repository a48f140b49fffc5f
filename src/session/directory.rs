//! Session directory — cluster-wide ownership protocol
//!
//! One entry per charger under `sessions:{chargePointId}`. The claim is a
//! single atomic compare-and-update against the KV store, so takeover
//! arbitration has exactly one winner regardless of how many nodes race:
//!
//! 1. no entry                         → write epoch=1            → FRESH
//! 2. entry owned by this node         → rewrite, keep epoch      → REFRESHED
//! 3. entry stale (lastSeen too old)   → rewrite, epoch+1         → TAKEOVER
//! 4. otherwise                        → leave unchanged          → DENIED

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::session::{session_key, SessionEntry};
use crate::domain::OcppVersion;
use crate::infrastructure::{CasDecision, KvStore};
use crate::support::KvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Fresh,
    Refreshed,
    Takeover,
    Denied,
}

#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub status: ClaimStatus,
    pub previous_owner_node_id: Option<String>,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub charge_point_id: String,
    pub ocpp_version: OcppVersion,
    pub station_id: String,
    pub tenant_id: String,
}

pub struct SessionDirectory {
    kv: Arc<dyn KvStore>,
    node_id: String,
    session_ttl: Duration,
    /// Zero disables takeover entirely (case 3 never fires).
    stale_after: Duration,
}

impl SessionDirectory {
    pub fn new(
        kv: Arc<dyn KvStore>,
        node_id: impl Into<String>,
        session_ttl: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            kv,
            node_id: node_id.into(),
            session_ttl,
            stale_after,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Attempt to claim ownership of a charger for this node.
    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimResult, KvError> {
        let key = session_key(&request.charge_point_id);
        let charge_point_id = request.charge_point_id.clone();
        let now_ms = Utc::now().timestamp_millis();
        let stale_ms = self.stale_after.as_millis() as i64;
        let ttl = self.session_ttl;
        let node_id = self.node_id.clone();

        // The transform runs inside the store's atomic section; the slot
        // carries its verdict back out.
        let result_slot: Arc<Mutex<Option<ClaimResult>>> = Arc::new(Mutex::new(None));
        let slot = result_slot.clone();

        self.kv
            .compare_and_update(
                &key,
                Box::new(move |current| {
                    let current: Option<SessionEntry> =
                        current.and_then(|raw| serde_json::from_str(raw).ok());

                    let (status, previous_owner, epoch) = match &current {
                        None => (ClaimStatus::Fresh, None, 1),
                        Some(entry) if entry.node_id == node_id => {
                            (ClaimStatus::Refreshed, Some(entry.node_id.clone()), entry.epoch)
                        }
                        Some(entry)
                            if stale_ms > 0 && now_ms - entry.last_seen_at_ms > stale_ms =>
                        {
                            (
                                ClaimStatus::Takeover,
                                Some(entry.node_id.clone()),
                                entry.epoch + 1,
                            )
                        }
                        Some(entry) => {
                            *slot.lock().unwrap() = Some(ClaimResult {
                                status: ClaimStatus::Denied,
                                previous_owner_node_id: Some(entry.node_id.clone()),
                                epoch: entry.epoch,
                            });
                            return CasDecision::Keep;
                        }
                    };

                    let connected_at_ms = match &current {
                        // A refresh keeps the original connect time.
                        Some(entry) if status == ClaimStatus::Refreshed => entry.connected_at_ms,
                        _ => now_ms,
                    };

                    let entry = SessionEntry {
                        charge_point_id: request.charge_point_id.clone(),
                        ocpp_version: request.ocpp_version,
                        node_id: node_id.clone(),
                        station_id: request.station_id.clone(),
                        tenant_id: request.tenant_id.clone(),
                        connected_at_ms,
                        last_seen_at_ms: now_ms,
                        epoch,
                    };

                    *slot.lock().unwrap() = Some(ClaimResult {
                        status,
                        previous_owner_node_id: previous_owner,
                        epoch,
                    });

                    match serde_json::to_string(&entry) {
                        Ok(value) => CasDecision::Write {
                            value,
                            ttl: Some(ttl),
                        },
                        Err(_) => CasDecision::Keep,
                    }
                }),
            )
            .await?;

        let result = result_slot.lock().unwrap().take().ok_or_else(|| {
            KvError::Unavailable("session claim transform did not run".to_string())
        })?;

        match result.status {
            ClaimStatus::Takeover => {
                metrics::counter!("ocpp_session_takeovers_total").increment(1);
                info!(
                    charge_point_id = charge_point_id.as_str(),
                    previous_owner = result.previous_owner_node_id.as_deref().unwrap_or(""),
                    epoch = result.epoch,
                    "Session taken over"
                );
            }
            ClaimStatus::Denied => {
                warn!(
                    charge_point_id = charge_point_id.as_str(),
                    owner = result.previous_owner_node_id.as_deref().unwrap_or(""),
                    "Session claim denied; charger already connected elsewhere"
                );
            }
            _ => {}
        }

        Ok(result)
    }

    /// Refresh the entry on inbound traffic. Only the owner advances
    /// `lastSeenAtMs`; a non-owner logs and leaves the entry alone.
    pub async fn touch(&self, charge_point_id: &str) -> Result<(), KvError> {
        let key = session_key(charge_point_id);
        let now_ms = Utc::now().timestamp_millis();
        let ttl = self.session_ttl;
        let node_id = self.node_id.clone();
        let cp = charge_point_id.to_string();

        self.kv
            .compare_and_update(
                &key,
                Box::new(move |current| {
                    let Some(mut entry) = current
                        .and_then(|raw| serde_json::from_str::<SessionEntry>(raw).ok())
                    else {
                        return CasDecision::Keep;
                    };
                    if entry.node_id != node_id {
                        warn!(
                            charge_point_id = cp.as_str(),
                            owner = entry.node_id.as_str(),
                            "Not refreshing session owned by another node"
                        );
                        return CasDecision::Keep;
                    }
                    entry.last_seen_at_ms = now_ms;
                    match serde_json::to_string(&entry) {
                        Ok(value) => CasDecision::Write {
                            value,
                            ttl: Some(ttl),
                        },
                        Err(_) => CasDecision::Keep,
                    }
                }),
            )
            .await
    }

    /// Delete the entry on clean close, but never another node's entry.
    pub async fn unregister(&self, charge_point_id: &str) -> Result<(), KvError> {
        let key = session_key(charge_point_id);
        let node_id = self.node_id.clone();

        self.kv
            .compare_and_update(
                &key,
                Box::new(move |current| {
                    let owned = current
                        .and_then(|raw| serde_json::from_str::<SessionEntry>(raw).ok())
                        .is_some_and(|entry| entry.node_id == node_id);
                    if owned {
                        CasDecision::Delete
                    } else {
                        CasDecision::Keep
                    }
                }),
            )
            .await
    }

    /// Current owner entry, if any.
    pub async fn lookup(&self, charge_point_id: &str) -> Result<Option<SessionEntry>, KvError> {
        let raw = self.kv.get(&session_key(charge_point_id)).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }
}
