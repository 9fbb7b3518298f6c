//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] skiff_protocol::ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] skiff_protocol::CodecError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the error was caused by the peer sending bad bytes.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            ServerError::Protocol(_) => true,
            ServerError::Codec(e) => e.is_fatal(),
            _ => false,
        }
    }
}
