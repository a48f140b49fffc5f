//! Delivery mechanisms. The gateway's only surface is the OCPP WebSocket
//! endpoint.

pub mod ws;
