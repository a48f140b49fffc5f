//! OCPP WebSocket endpoint: upgrade handling, subprotocol negotiation,
//! per-connection receive loops.

pub mod connection;
pub mod negotiator;
pub mod path;
pub mod server;

pub use connection::{ConnectionDeps, ConnectionLimits};
pub use server::GatewayServer;
