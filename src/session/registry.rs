//! Session registry — manages active charge point WebSocket connections

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::ConnectionMeta;

/// Messages the writer task drains to the socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct Connection {
    meta: ConnectionMeta,
    sender: mpsc::UnboundedSender<Outbound>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Connection {
    fn send(&self, message: Outbound) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| format!("send channel closed for {}", self.meta.charge_point_id))
    }
}

/// Thread-safe registry of active OCPP charge point sessions on this node.
pub struct SessionRegistry {
    sessions: DashMap<String, Connection>,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register an accepted connection. If this node already holds a socket
    /// for the charger (the cluster claim reported REFRESHED), the old
    /// socket is told to close with 1012 and replaced.
    pub fn register(&self, meta: ConnectionMeta, sender: mpsc::UnboundedSender<Outbound>) {
        let charge_point_id = meta.charge_point_id.clone();
        let connection = Connection {
            meta,
            sender,
            connected_at: Utc::now(),
            last_activity: Utc::now(),
        };

        if let Some(old) = self.sessions.insert(charge_point_id.clone(), connection) {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                old_connection_id = old.meta.connection_id.as_str(),
                connected_since = %old.connected_at,
                last_activity = %old.last_activity,
                "Replacing existing local session"
            );
            let _ = old.send(Outbound::Close {
                code: 1012,
                reason: "session transferred".to_string(),
            });
        } else {
            info!(charge_point_id = charge_point_id.as_str(), "Registered charge point session");
        }

        metrics::gauge!("ocpp_connected_stations").set(self.sessions.len() as f64);
    }

    /// Unregister, but only if the entry still belongs to `connection_id`.
    /// A reconnect that already replaced the entry must not be torn down by
    /// the old socket's cleanup.
    pub fn unregister(&self, charge_point_id: &str, connection_id: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, conn| {
                conn.meta.connection_id == connection_id
            })
            .is_some();
        if removed {
            metrics::gauge!("ocpp_connected_stations").set(self.sessions.len() as f64);
            info!(charge_point_id, "Unregistered charge point session");
        }
        removed
    }

    /// Send a text frame to a connected charge point.
    pub fn send_text(&self, charge_point_id: &str, text: String) -> Result<(), String> {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn.send(Outbound::Text(text)),
            None => Err(format!("Charge point {charge_point_id} not connected")),
        }
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self, charge_point_id: &str, code: u16, reason: &str) -> bool {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn
                .send(Outbound::Close {
                    code,
                    reason: reason.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Close only when the local session's epoch is older than `new_epoch`.
    /// Used by the session-control consumer so a freshly-won session is not
    /// torn down by an echo of its own takeover.
    pub fn close_if_epoch_older(&self, charge_point_id: &str, new_epoch: u64, code: u16, reason: &str) -> bool {
        match self.sessions.get(charge_point_id) {
            Some(conn) if conn.meta.session_epoch < new_epoch => conn
                .send(Outbound::Close {
                    code,
                    reason: reason.to_string(),
                })
                .is_ok(),
            _ => false,
        }
    }

    pub fn touch(&self, charge_point_id: &str) {
        if let Some(mut conn) = self.sessions.get_mut(charge_point_id) {
            conn.last_activity = Utc::now();
        }
    }

    pub fn get_meta(&self, charge_point_id: &str) -> Option<ConnectionMeta> {
        self.sessions.get(charge_point_id).map(|c| c.meta.clone())
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OcppVersion;

    fn meta(cp: &str, connection_id: &str, epoch: u64) -> ConnectionMeta {
        ConnectionMeta {
            connection_id: connection_id.to_string(),
            charge_point_id: cp.to_string(),
            ocpp_version: OcppVersion::V16,
            station_id: "ST-1".into(),
            tenant_id: "T-1".into(),
            session_epoch: epoch,
            ip: "127.0.0.1".parse().unwrap(),
        }
    }

    #[test]
    fn register_and_send() {
        let reg = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reg.register(meta("CP-1", "c1", 1), tx);

        reg.send_text("CP-1", "hello".into()).unwrap();
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(reg.send_text("CP-2", "x".into()).is_err());
    }

    #[test]
    fn replacement_closes_old_socket() {
        let reg = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        reg.register(meta("CP-1", "c1", 1), tx1);
        let (tx2, _rx2) = mpsc::unbounded_channel();
        reg.register(meta("CP-1", "c2", 1), tx2);

        match rx1.try_recv().unwrap() {
            Outbound::Close { code, .. } => assert_eq!(code, 1012),
            other => panic!("unexpected: {other:?}"),
        }

        // Old socket's cleanup must not remove the replacement.
        assert!(!reg.unregister("CP-1", "c1"));
        assert!(reg.is_connected("CP-1"));
        assert!(reg.unregister("CP-1", "c2"));
    }

    #[test]
    fn epoch_guard_prevents_echo_close() {
        let reg = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reg.register(meta("CP-1", "c1", 3), tx);

        // Same or older epoch: no close.
        assert!(!reg.close_if_epoch_older("CP-1", 3, 1012, "transfer"));
        assert!(rx.try_recv().is_err());

        // Strictly newer epoch closes.
        assert!(reg.close_if_epoch_older("CP-1", 4, 1012, "transfer"));
        match rx.try_recv().unwrap() {
            Outbound::Close { code, .. } => assert_eq!(code, 1012),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
