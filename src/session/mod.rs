//! Session management: in-process socket registry, cluster-wide ownership
//! directory, cross-node session control and the node directory.

pub mod control;
pub mod directory;
pub mod nodes;
pub mod registry;

pub use control::{ForceDisconnect, SessionControl};
pub use directory::{ClaimResult, ClaimStatus, SessionDirectory};
pub use nodes::NodeDirectory;
pub use registry::{Outbound, SessionRegistry, SharedSessionRegistry};
