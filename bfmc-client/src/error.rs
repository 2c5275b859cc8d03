//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] bfmc_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("SPI link not configured")]
    NoSpiLink,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no confirmation for {key} within {timeout_ms} ms")]
    Timeout { key: String, timeout_ms: u64 },
}

impl ClientError {
    /// Returns whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout { .. } => true,
            ClientError::ConnectionClosed => true,
            _ => false,
        }
    }

    /// Returns whether the request was rejected before anything was written.
    pub fn is_not_encodable(&self) -> bool {
        matches!(self, ClientError::Protocol(e) if e.is_caller_error())
    }
}
