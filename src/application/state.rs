//! Per-charger in-process state
//!
//! Connector status plus the transactional bookkeeping behind
//! StartTransaction / StopTransaction / MeterValues (1.6J) and
//! TransactionEvent (2.x). Mutated only by the receive loop that owns the
//! charger, so each entry has exactly one writer.
//!
//! All rules are strict by default; the lenient flag relaxes only the cases
//! that explicitly allow it (orphaned MeterValues, unknown-transaction
//! TransactionEvent updates).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::OcppVersion;

// ── Violations ─────────────────────────────────────────────────

/// A state-machine violation, surfaced to the charger as a CALLERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateViolation {
    pub code: &'static str,
    pub description: String,
}

impl StateViolation {
    fn occurrence(description: impl Into<String>) -> Self {
        Self {
            code: "OccurrenceConstraintViolation",
            description: description.into(),
        }
    }

    fn format(version: OcppVersion, description: impl Into<String>) -> Self {
        Self {
            code: version.format_violation_code(),
            description: description.into(),
        }
    }
}

// ── State model ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectorState {
    pub status: String,
    pub error_code: Option<String>,
    pub last_status_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V16TxState {
    Active,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct V16StopRecord {
    pub meter_stop: i64,
    /// Kept verbatim as sent, for idempotency matching.
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct V16Transaction {
    pub connector_id: i64,
    pub id_tag: String,
    pub meter_start: i64,
    /// Kept verbatim as sent, for idempotency matching.
    pub timestamp: String,
    pub state: V16TxState,
    pub stop: Option<V16StopRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V2TxState {
    Active,
    Ended,
}

#[derive(Debug, Clone)]
pub struct V2Transaction {
    pub evse_id: Option<i64>,
    pub connector_id: Option<i64>,
    pub id_token: Option<String>,
    pub started_at: DateTime<Utc>,
    pub state: V2TxState,
    pub last_seq_no: i64,
}

/// Which transaction currently owns a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    V16(i64),
    V2(String),
}

#[derive(Debug, Default)]
pub struct ChargePointState {
    pub last_boot_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub connectors: HashMap<i64, ConnectorState>,
    transaction_counter: i64,
    pub v16_transactions: HashMap<i64, V16Transaction>,
    pub v2_transactions: HashMap<String, V2Transaction>,
    /// At most one active transaction per connector.
    pub active_by_connector: HashMap<i64, TransactionRef>,
}

// ── Operation inputs/outcomes ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub transaction_id: i64,
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterOutcome {
    pub orphaned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEventType {
    Started,
    Updated,
    Ended,
}

impl TxEventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Started" => Some(Self::Started),
            "Updated" => Some(Self::Updated),
            "Ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxEventInput {
    pub event_type: TxEventType,
    pub seq_no: i64,
    pub transaction_id: Option<String>,
    pub evse_id: Option<i64>,
    pub connector_id: Option<i64>,
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEventOutcome {
    pub idempotent: bool,
}

// ── Store ──────────────────────────────────────────────────────

/// In-process state store, keyed by charge-point id. Entries are created
/// lazily on first action and live for the process lifetime.
pub struct ChargePointStateStore {
    strict: bool,
    state: DashMap<String, ChargePointState>,
}

impl ChargePointStateStore {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            state: DashMap::new(),
        }
    }

    /// Read-only access for diagnostics and tests.
    pub fn inspect<R>(&self, charge_point_id: &str, f: impl FnOnce(&ChargePointState) -> R) -> Option<R> {
        self.state.get(charge_point_id).map(|s| f(&s))
    }

    fn with_state<R>(&self, charge_point_id: &str, f: impl FnOnce(&mut ChargePointState) -> R) -> R {
        let mut entry = self.state.entry(charge_point_id.to_string()).or_default();
        f(&mut entry)
    }

    pub fn record_boot(&self, charge_point_id: &str) {
        self.with_state(charge_point_id, |s| s.last_boot_at = Some(Utc::now()));
    }

    pub fn record_heartbeat(&self, charge_point_id: &str) {
        self.with_state(charge_point_id, |s| s.last_heartbeat_at = Some(Utc::now()));
    }

    pub fn update_connector(
        &self,
        charge_point_id: &str,
        connector_id: i64,
        status: &str,
        error_code: Option<&str>,
    ) {
        self.with_state(charge_point_id, |s| {
            s.connectors.insert(
                connector_id,
                ConnectorState {
                    status: status.to_string(),
                    error_code: error_code.map(String::from),
                    last_status_at: Utc::now(),
                },
            );
        });
    }

    // ── 1.6J transactions ──────────────────────────────────

    pub fn start_transaction(
        &self,
        charge_point_id: &str,
        connector_id: i64,
        id_tag: &str,
        meter_start: i64,
        timestamp: &str,
    ) -> Result<StartOutcome, StateViolation> {
        self.with_state(charge_point_id, |s| {
            if let Some(TransactionRef::V16(active)) = s.active_by_connector.get(&connector_id) {
                let active = *active;
                let existing = s
                    .v16_transactions
                    .get(&active)
                    .ok_or_else(|| StateViolation::occurrence("Unknown transaction"))?;
                // A verbatim retransmission resolves to the same transaction.
                if existing.connector_id == connector_id
                    && existing.id_tag == id_tag
                    && existing.meter_start == meter_start
                    && existing.timestamp == timestamp
                {
                    return Ok(StartOutcome {
                        transaction_id: active,
                        idempotent: true,
                    });
                }
                return Err(StateViolation::occurrence(
                    "Connector already has an active transaction",
                ));
            }

            s.transaction_counter += 1;
            let transaction_id = s.transaction_counter;
            s.v16_transactions.insert(
                transaction_id,
                V16Transaction {
                    connector_id,
                    id_tag: id_tag.to_string(),
                    meter_start,
                    timestamp: timestamp.to_string(),
                    state: V16TxState::Active,
                    stop: None,
                },
            );
            s.active_by_connector
                .insert(connector_id, TransactionRef::V16(transaction_id));
            Ok(StartOutcome {
                transaction_id,
                idempotent: false,
            })
        })
    }

    pub fn stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i64,
        meter_stop: i64,
        timestamp: &str,
    ) -> Result<StopOutcome, StateViolation> {
        self.with_state(charge_point_id, |s| {
            let tx = s
                .v16_transactions
                .get_mut(&transaction_id)
                .ok_or_else(|| StateViolation::occurrence("Unknown transaction"))?;

            if tx.state == V16TxState::Stopped {
                let matches = tx
                    .stop
                    .as_ref()
                    .is_some_and(|stop| stop.meter_stop == meter_stop && stop.timestamp == timestamp);
                if matches {
                    return Ok(StopOutcome { idempotent: true });
                }
                return Err(StateViolation::occurrence(
                    "Transaction already stopped with different values",
                ));
            }

            tx.state = V16TxState::Stopped;
            tx.stop = Some(V16StopRecord {
                meter_stop,
                timestamp: timestamp.to_string(),
            });
            let connector_id = tx.connector_id;
            if s.active_by_connector.get(&connector_id)
                == Some(&TransactionRef::V16(transaction_id))
            {
                s.active_by_connector.remove(&connector_id);
            }
            Ok(StopOutcome { idempotent: false })
        })
    }

    pub fn meter_values(
        &self,
        charge_point_id: &str,
        transaction_id: Option<i64>,
    ) -> Result<MeterOutcome, StateViolation> {
        let Some(transaction_id) = transaction_id else {
            return Ok(MeterOutcome { orphaned: false });
        };
        self.with_state(charge_point_id, |s| {
            if s.v16_transactions.contains_key(&transaction_id) {
                return Ok(MeterOutcome { orphaned: false });
            }
            if self.strict {
                Err(StateViolation::occurrence("Unknown transaction"))
            } else {
                Ok(MeterOutcome { orphaned: true })
            }
        })
    }

    // ── 2.x transactions ───────────────────────────────────

    pub fn transaction_event(
        &self,
        charge_point_id: &str,
        version: OcppVersion,
        input: TxEventInput,
    ) -> Result<TxEventOutcome, StateViolation> {
        let Some(transaction_id) = input.transaction_id.clone() else {
            return Err(StateViolation::format(version, "Missing transactionId"));
        };

        self.with_state(charge_point_id, |s| {
            if let Some(tx) = s.v2_transactions.get_mut(&transaction_id) {
                if input.seq_no <= tx.last_seq_no {
                    return Ok(TxEventOutcome { idempotent: true });
                }
                tx.last_seq_no = input.seq_no;

                match input.event_type {
                    // A repeated Started for a known transaction is a retry.
                    TxEventType::Started => Ok(TxEventOutcome { idempotent: true }),
                    TxEventType::Updated => Ok(TxEventOutcome { idempotent: false }),
                    TxEventType::Ended => {
                        tx.state = V2TxState::Ended;
                        let connector = tx.connector_id.or(tx.evse_id);
                        if let Some(connector_id) = connector {
                            if s.active_by_connector.get(&connector_id)
                                == Some(&TransactionRef::V2(transaction_id.clone()))
                            {
                                s.active_by_connector.remove(&connector_id);
                            }
                        }
                        Ok(TxEventOutcome { idempotent: false })
                    }
                }
            } else {
                match input.event_type {
                    TxEventType::Started => {}
                    TxEventType::Updated | TxEventType::Ended if self.strict => {
                        return Err(StateViolation::occurrence("Unknown transaction"));
                    }
                    // Lenient mode adopts the unknown transaction.
                    TxEventType::Updated | TxEventType::Ended => {}
                }

                let state = if input.event_type == TxEventType::Ended {
                    V2TxState::Ended
                } else {
                    V2TxState::Active
                };
                let active = state == V2TxState::Active;
                s.v2_transactions.insert(
                    transaction_id.clone(),
                    V2Transaction {
                        evse_id: input.evse_id,
                        connector_id: input.connector_id,
                        id_token: input.id_token.clone(),
                        started_at: Utc::now(),
                        state,
                        last_seq_no: input.seq_no,
                    },
                );
                if active {
                    if let Some(connector_id) = input.connector_id.or(input.evse_id) {
                        s.active_by_connector
                            .insert(connector_id, TransactionRef::V2(transaction_id.clone()));
                    }
                }
                Ok(TxEventOutcome { idempotent: false })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChargePointStateStore {
        ChargePointStateStore::new(true)
    }

    #[test]
    fn start_is_idempotent_on_verbatim_retry() {
        let s = store();
        let first = s
            .start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(!first.idempotent);

        let second = s
            .start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(second.transaction_id, first.transaction_id);
        assert!(second.idempotent);
    }

    #[test]
    fn start_rejects_conflicting_transaction() {
        let s = store();
        s.start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap();
        let err = s
            .start_transaction("CP-1", 1, "OTHER", 100, "2024-01-01T00:00:00Z")
            .unwrap_err();
        assert_eq!(err.code, "OccurrenceConstraintViolation");
        assert_eq!(err.description, "Connector already has an active transaction");
    }

    #[test]
    fn start_on_free_connector_allocates_monotonic_ids() {
        let s = store();
        let a = s
            .start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap();
        let b = s
            .start_transaction("CP-1", 2, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(b.transaction_id > a.transaction_id);
    }

    #[test]
    fn stop_unknown_transaction_is_a_violation() {
        let s = store();
        let err = s.stop_transaction("CP-1", 42, 200, "2024-01-01T01:00:00Z").unwrap_err();
        assert_eq!(err.code, "OccurrenceConstraintViolation");
        assert_eq!(err.description, "Unknown transaction");
    }

    #[test]
    fn stop_is_idempotent_on_matching_retry() {
        let s = store();
        let tx = s
            .start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap()
            .transaction_id;
        let first = s
            .stop_transaction("CP-1", tx, 200, "2024-01-01T01:00:00Z")
            .unwrap();
        assert!(!first.idempotent);
        let second = s
            .stop_transaction("CP-1", tx, 200, "2024-01-01T01:00:00Z")
            .unwrap();
        assert!(second.idempotent);

        // Differing stop values are a violation.
        let err = s
            .stop_transaction("CP-1", tx, 999, "2024-01-01T01:00:00Z")
            .unwrap_err();
        assert_eq!(err.code, "OccurrenceConstraintViolation");
    }

    #[test]
    fn stop_frees_the_connector() {
        let s = store();
        let tx = s
            .start_transaction("CP-1", 1, "T", 100, "2024-01-01T00:00:00Z")
            .unwrap()
            .transaction_id;
        s.stop_transaction("CP-1", tx, 200, "2024-01-01T01:00:00Z")
            .unwrap();
        let again = s
            .start_transaction("CP-1", 1, "T2", 200, "2024-01-01T02:00:00Z")
            .unwrap();
        assert!(!again.idempotent);
        assert_ne!(again.transaction_id, tx);
    }

    #[test]
    fn meter_values_without_transaction_id_is_fine() {
        let s = store();
        assert_eq!(s.meter_values("CP-1", None).unwrap(), MeterOutcome { orphaned: false });
    }

    #[test]
    fn meter_values_unknown_transaction_strict_vs_lenient() {
        let strict = ChargePointStateStore::new(true);
        assert!(strict.meter_values("CP-1", Some(9)).is_err());

        let lenient = ChargePointStateStore::new(false);
        assert_eq!(
            lenient.meter_values("CP-1", Some(9)).unwrap(),
            MeterOutcome { orphaned: true }
        );
    }

    fn tx_event(event_type: TxEventType, seq_no: i64, id: &str) -> TxEventInput {
        TxEventInput {
            event_type,
            seq_no,
            transaction_id: Some(id.to_string()),
            evse_id: Some(1),
            connector_id: Some(1),
            id_token: None,
        }
    }

    #[test]
    fn transaction_event_missing_id_is_format_violation() {
        let s = store();
        let input = TxEventInput {
            transaction_id: None,
            ..tx_event(TxEventType::Started, 0, "x")
        };
        let err = s
            .transaction_event("CP-1", OcppVersion::V201, input)
            .unwrap_err();
        assert_eq!(err.code, "FormatViolation");
        assert_eq!(err.description, "Missing transactionId");
    }

    #[test]
    fn transaction_event_unknown_update_is_strict_violation() {
        let s = store();
        let err = s
            .transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Updated, 1, "TX-X"))
            .unwrap_err();
        assert_eq!(err.code, "OccurrenceConstraintViolation");
        assert_eq!(err.description, "Unknown transaction");
    }

    #[test]
    fn transaction_event_seq_no_is_monotonic() {
        let s = store();
        s.transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Started, 0, "TX-1"))
            .unwrap();
        s.transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Updated, 2, "TX-1"))
            .unwrap();

        // Replay with an old seqNo: accepted, idempotent, no state change.
        let replay = s
            .transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Updated, 1, "TX-1"))
            .unwrap();
        assert!(replay.idempotent);
        s.inspect("CP-1", |st| {
            assert_eq!(st.v2_transactions["TX-1"].last_seq_no, 2);
        })
        .unwrap();
    }

    #[test]
    fn transaction_event_ended_clears_connector() {
        let s = store();
        s.transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Started, 0, "TX-1"))
            .unwrap();
        s.inspect("CP-1", |st| assert!(!st.active_by_connector.is_empty()))
            .unwrap();
        s.transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Ended, 3, "TX-1"))
            .unwrap();
        s.inspect("CP-1", |st| {
            assert!(st.active_by_connector.is_empty());
            assert_eq!(st.v2_transactions["TX-1"].state, V2TxState::Ended);
        })
        .unwrap();
    }

    #[test]
    fn repeated_started_is_idempotent() {
        let s = store();
        s.transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Started, 0, "TX-1"))
            .unwrap();
        let retry = s
            .transaction_event("CP-1", OcppVersion::V201, tx_event(TxEventType::Started, 1, "TX-1"))
            .unwrap();
        assert!(retry.idempotent);
    }
}
