//! Error types for the yeedeck-light crate.

use crate::transport::CodecError;

/// Errors that can occur while talking to a bulb
#[derive(Debug, thiserror::Error)]
pub enum LightError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid device address: {0:?}")]
    InvalidAddress(String),

    /// The bulb answered with an error object
    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Command timeout")]
    Timeout,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, LightError>;
