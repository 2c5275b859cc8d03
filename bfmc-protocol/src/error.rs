//! Protocol error types.

use crate::message::CommandKey;
use thiserror::Error;

/// Errors raised while encoding or decoding BFMC frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{key} command not encodable: {reason}")]
    NotEncodable {
        key: CommandKey,
        reason: &'static str,
    },

    #[error("invalid SPI command id: {0} (must be 0..=31)")]
    InvalidCommandId(u8),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid SPI length field: {0}")]
    InvalidSpiLength(usize),

    #[error("unknown command key: {0:?}")]
    UnknownKey(String),

    #[error("malformed response frame: {0:?}")]
    MalformedResponse(String),
}

impl ProtocolError {
    pub(crate) fn not_encodable(key: CommandKey, reason: &'static str) -> Self {
        ProtocolError::NotEncodable { key, reason }
    }

    /// Returns whether the caller can fix the failure by changing its arguments.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotEncodable { .. }
                | ProtocolError::InvalidCommandId(_)
                | ProtocolError::PayloadTooLarge { .. }
        )
    }
}
