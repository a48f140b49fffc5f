//! Core entities and value objects.

pub mod command;
pub mod events;
pub mod identity;
pub mod session;
pub mod version;

pub use command::{CommandRequest, CommandType};
pub use events::EventEnvelope;
pub use identity::{
    AuthCredentials, AuthMode, BindingStatus, CertificateBinding, ChargerIdentity, HashAlgorithm,
    IdentityStatus,
};
pub use session::{ConnectionMeta, SessionEntry};
pub use version::OcppVersion;
