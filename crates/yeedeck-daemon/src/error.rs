//! Error types for the yeedeck daemon.

use yeedeck_light::LightError;

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Host websocket could not be opened or broke
    #[error("Connection error: {0}")]
    Connection(String),

    /// Inbound host message that is not a valid event
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(#[source] serde_json::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device driver failure (connect, command or reply)
    #[error("Device error: {0}")]
    Device(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Action settings rejected before any device contact
    #[error("Invalid settings: {0}")]
    Validation(String),

    /// No device session for the address
    #[error("No device session for address [{0}]")]
    NotFound(String),

    /// Outbound queue is gone because the writer stopped
    #[error("Host transport closed")]
    TransportClosed,

    /// Invalid launch arguments
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Whether the error ends the host link rather than a single event.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::TransportClosed | Self::Config(_) | Self::Io(_)
        )
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<LightError> for DaemonError {
    fn from(err: LightError) -> Self {
        DaemonError::Device(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
