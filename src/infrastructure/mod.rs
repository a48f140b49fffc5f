//! Infrastructure ports (KV store, message bus) and their in-memory
//! implementations.
//!
//! Production deployments plug in Redis/Kafka-backed implementations of the
//! same traits; the in-memory ones back tests and single-node runs.

pub mod bus;
pub mod kv;

pub use bus::{BusMessage, BusSubscription, GuardedMessageBus, MemoryMessageBus, MessageBus};
pub use kv::{CasDecision, GuardedKvStore, KvStore, MemoryKvStore};
