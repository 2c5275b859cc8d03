//! Binary frame format for the SPI link.
//!
//! Short frame (payload of 1 to 7 bytes), padded to `1 << n` bytes in total:
//!
//! ```text
//! +------------------------------+-----------------+-------------+
//! | command_id:5 | ext=0:1 | n:2 | payload         | zero padding|
//! +------------------------------+-----------------+-------------+
//! ```
//!
//! Extended frame (payload of 8 or more bytes), no padding:
//!
//! ```text
//! +------------------------------+-------------+-------------------+
//! | command_id:5 | ext=1:1 | n:2 | length low  | payload           |
//! +------------------------------+-------------+-------------------+
//! ```
//!
//! For extended frames the length field is `payload_len + 1`, split into the
//! two high bits carried by `n` and the low byte that follows the header. The
//! length field also equals the number of bytes after the header.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Highest command id that fits the 5-bit field.
pub const MAX_COMMAND_ID: u8 = 31;

/// Largest payload sent in a short frame.
pub const SHORT_PAYLOAD_MAX: usize = 7;

/// Largest payload whose length field fits in 10 bits.
pub const MAX_PAYLOAD: usize = 1022;

/// Command id driving the vehicle lights.
pub const LIGHTS_COMMAND_ID: u8 = 5;

/// Length class `n` indexed by the number of header and payload bytes.
const LENGTH_CLASS: [u8; 9] = [0, 1, 1, 2, 2, 3, 3, 3, 3];

const EXTEND_BIT: u8 = 1 << 2;
const N_MASK: u8 = 0b11;

/// Decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiHeader {
    pub command_id: u8,
    pub extended: bool,
    pub n: u8,
}

impl SpiHeader {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            command_id: byte >> 3,
            extended: byte & EXTEND_BIT != 0,
            n: byte & N_MASK,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.command_id << 3) | (u8::from(self.extended) << 2) | (self.n & N_MASK)
    }

    /// Number of bytes that follow the header byte.
    ///
    /// Extended frames need their length byte; `None` is returned until it is known.
    pub fn remaining(&self, length_byte: Option<u8>) -> Option<usize> {
        if self.extended {
            length_byte.map(|low| ((self.n as usize) << 8) | low as usize)
        } else {
            Some((1usize << self.n) - 1)
        }
    }
}

/// A frame read back from the SPI wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiFrame {
    pub header: SpiHeader,
    /// Payload bytes. Short frames keep their zero padding.
    pub payload: Bytes,
}

impl SpiFrame {
    /// Total number of bytes the frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        if self.header.extended {
            2 + self.payload.len()
        } else {
            1 + self.payload.len()
        }
    }
}

/// Builds the SPI frame for `command_id` carrying `payload`.
pub fn build_frame(command_id: u8, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    if command_id > MAX_COMMAND_ID {
        return Err(ProtocolError::InvalidCommandId(command_id));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    if payload.is_empty() {
        // A bare header: n = 0, one byte in total.
        let header = SpiHeader {
            command_id,
            extended: false,
            n: 0,
        };
        let mut buf = BytesMut::with_capacity(1);
        buf.put_u8(header.to_byte());
        return Ok(buf);
    }

    if payload.len() <= SHORT_PAYLOAD_MAX {
        let n = LENGTH_CLASS[payload.len() + 1];
        let frame_len = 1usize << n;
        let header = SpiHeader {
            command_id,
            extended: false,
            n,
        };

        let mut buf = BytesMut::with_capacity(frame_len);
        buf.put_u8(header.to_byte());
        buf.put_slice(payload);
        buf.put_bytes(0, frame_len - buf.len());
        return Ok(buf);
    }

    let length_field = payload.len() + 1;
    let header = SpiHeader {
        command_id,
        extended: true,
        n: ((length_field >> 8) as u8) & N_MASK,
    };

    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u8(header.to_byte());
    buf.put_u8((length_field & 0xFF) as u8);
    buf.put_slice(payload);
    Ok(buf)
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` if more bytes are needed. On success the frame bytes are consumed.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<SpiFrame>, ProtocolError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let header = SpiHeader::from_byte(first);

    let Some(remaining) = header.remaining(buf.get(1).copied()) else {
        return Ok(None);
    };

    if header.extended && remaining < 1 {
        return Err(ProtocolError::InvalidSpiLength(remaining));
    }

    if buf.len() < 1 + remaining {
        return Ok(None);
    }

    buf.advance(1);
    if header.extended {
        buf.advance(1);
        let payload = buf.split_to(remaining - 1).freeze();
        return Ok(Some(SpiFrame { header, payload }));
    }

    let payload = buf.split_to(remaining).freeze();
    Ok(Some(SpiFrame { header, payload }))
}
