//! OCPP-J wire protocol: framing and schema validation.

pub mod frame;
pub mod schema;
pub mod schemas;

pub use frame::{FrameError, OcppFrame};
pub use schema::{SchemaRegistry, ValidationOutcome};
