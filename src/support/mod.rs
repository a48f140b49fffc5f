//! Cross-cutting utilities: error taxonomy, shutdown, circuit breaker.

pub mod circuit_breaker;
pub mod errors;
pub mod shutdown;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use errors::{AdmissionReject, BusError, ConfigError, KvError};
pub use shutdown::Shutdown;
