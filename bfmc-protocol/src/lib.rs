//! # bfmc-protocol
//!
//! Wire protocol for the BFMC actuator board (motor, steering, lights).
//!
//! This crate provides:
//! - Textual command encoding for the serial link (`#KEY:f1;f2;;\r\n`)
//! - A byte-stream framer that recovers `@...\r` response frames
//! - Compact binary frames for the SPI link
//! - Command keys, typed commands and response frames

pub mod codec;
pub mod error;
pub mod message;
pub mod spi;

pub use codec::{Encoder, StreamFramer};
pub use error::ProtocolError;
pub use message::{Command, CommandKey, Complex, ControlPoint, ResponseFrame};
pub use spi::{build_frame, decode_frame, SpiFrame, SpiHeader};

/// Default serial device of the board.
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyACM0";

/// Default baud rate of the serial link.
pub const DEFAULT_BAUD_RATE: u32 = 460_800;

/// Start marker of a request frame.
pub const REQUEST_START: u8 = b'#';

/// Start marker of a response frame.
pub const RESPONSE_START: u8 = b'@';

/// End marker of a response frame.
pub const RESPONSE_END: u8 = b'\r';

/// Trailer closing every request frame.
pub const REQUEST_TRAILER: &str = ";;\r\n";

/// Maximum response frame body length accepted by the framer.
pub const MAX_RESPONSE_LEN: usize = 1024;
