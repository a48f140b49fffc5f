use thiserror::Error;

/// Errors surfaced by the key/value store port.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV store unavailable: {0}")]
    Unavailable(String),

    #[error("KV operation timed out")]
    Timeout,

    #[error("KV circuit breaker is open")]
    CircuitOpen,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KvError {
    /// Whether the failure is an infrastructure condition (as opposed to a
    /// serialization bug) and the caller may degrade to best-effort mode.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::CircuitOpen)
    }
}

/// Errors surfaced by the message-bus port.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Bus circuit breaker is open")]
    CircuitOpen,
}

/// Why a connection was refused admission.
///
/// Each variant maps to the WebSocket close code sent to the peer
/// (handshake-phase rejections are answered with HTTP 400 instead).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionReject {
    #[error("invalid connection path")]
    InvalidPath,

    #[error("suspicious connection path")]
    SuspiciousPath,

    #[error("unsupported OCPP version")]
    UnsupportedVersion,

    #[error("missing or mismatched subprotocol")]
    SubprotocolMismatch,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("already connected")]
    AlreadyConnected,

    #[error("session directory unavailable")]
    DirectoryUnavailable,

    #[error("pending message queue overflow")]
    QueueOverflow,
}

impl AdmissionReject {
    /// WebSocket close code for post-upgrade rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidPath
            | Self::SuspiciousPath
            | Self::UnsupportedVersion
            | Self::SubprotocolMismatch
            | Self::Unauthenticated => 1008,
            Self::AlreadyConnected | Self::DirectoryUnavailable | Self::QueueOverflow => 1013,
        }
    }
}

/// Configuration loading/validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable}: {message}")]
    Invalid {
        variable: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid(variable: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            variable,
            message: message.into(),
        }
    }
}
