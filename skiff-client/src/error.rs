//! Client error types.

use skiff_protocol::{ApplicationException, MessageType};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] skiff_protocol::ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] skiff_protocol::CodecError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("application exception: {0}")]
    Application(ApplicationException),

    #[error("reply for '{actual}' does not match call to '{expected}'")]
    WrongMethodName { expected: String, actual: String },

    #[error("unexpected {0} message in reply")]
    UnexpectedReply(MessageType),
}

impl From<skiff_protocol::DecodeError> for ClientError {
    fn from(e: skiff_protocol::DecodeError) -> Self {
        ClientError::Codec(e.into())
    }
}

impl From<skiff_protocol::EncodeError> for ClientError {
    fn from(e: skiff_protocol::EncodeError) -> Self {
        ClientError::Codec(e.into())
    }
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }

    /// Returns the application exception, if the server raised one.
    pub fn application_exception(&self) -> Option<&ApplicationException> {
        match self {
            ClientError::Application(e) => Some(e),
            _ => None,
        }
    }
}
