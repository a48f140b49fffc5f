//! Application layer: the message engine, per-charger state, version
//! adapters, response cache, rate limiting and the outbound command
//! pipeline.

pub mod adapters;
pub mod commands;
pub mod engine;
pub mod events;
pub mod rate_limit;
pub mod response_cache;
pub mod state;

pub use adapters::Adapters;
pub use engine::MessageEngine;
pub use events::EventPublisher;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use response_cache::ResponseCache;
pub use state::ChargePointStateStore;
