//! Outbound command pipeline: pending-request tracking, command dispatch,
//! bus consumption and auditing.

pub mod audit;
pub mod consumer;
pub mod dispatcher;
pub mod tracker;

pub use audit::{AuditState, CommandAudit};
pub use consumer::CommandConsumer;
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use tracker::{RequestTracker, TrackerReply};
