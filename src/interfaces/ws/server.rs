//! OCPP gateway WebSocket server
//!
//! Accepts charger connections at `ws://<host>:<port>/ocpp/{version}/{chargePointId}`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::connection::{handle_connection, ConnectionDeps};
use crate::support::Shutdown;

pub struct GatewayServer {
    address: String,
    deps: Arc<ConnectionDeps>,
}

impl GatewayServer {
    pub fn new(address: impl Into<String>, deps: Arc<ConnectionDeps>) -> Self {
        Self {
            address: address.into(),
            deps,
        }
    }

    /// Bind and serve until shutdown. Each accepted socket gets its own
    /// task; within a task, message handling is strictly serialized.
    pub async fn run(&self, shutdown: Shutdown) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(
            "OCPP gateway listening on ws://{}/ocpp/{{version}}/{{chargePointId}}",
            self.address
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(err) => error!(%err, "Failed to accept connection"),
                    }
                }
                _ = shutdown.triggered() => {
                    info!("WebSocket server received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let deps = self.deps.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr, deps).await;
        });
    }
}
