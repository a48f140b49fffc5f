//! # OCPP Gateway
//!
//! Horizontally-scaled gateway between EV charging stations and a
//! back-office CPMS. Chargers hold long-lived OCPP-over-WebSocket sessions
//! (1.6J, 2.0.1, 2.1); the gateway validates and answers their telemetry
//! locally, relays it onto the event bus, and accepts remote-control
//! commands back off that bus.
//!
//! ## Layout
//!
//! - **support**: cross-cutting utilities (errors, shutdown, circuit breaker)
//! - **domain**: entities and value objects (versions, identities, sessions,
//!   events, commands)
//! - **protocol**: OCPP-J framing and the per-version schema registry
//! - **application**: message engine, charge-point state, version adapters,
//!   response cache, rate limiter, command pipeline
//! - **auth**: connection admission (credentials, IP allow-lists, mTLS)
//! - **session**: socket registry, cluster ownership directory, session
//!   control, node directory
//! - **infrastructure**: KV-store and message-bus ports with in-memory
//!   implementations
//! - **interfaces**: the WebSocket endpoint
//! - **config / server**: environment configuration and the runtime that
//!   wires everything together

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod protocol;
pub mod server;
pub mod session;
pub mod support;

pub use config::GatewayConfig;
pub use domain::OcppVersion;
pub use infrastructure::{KvStore, MemoryKvStore, MemoryMessageBus, MessageBus};
pub use server::{GatewayHandle, GatewayOptions};
pub use support::Shutdown;
