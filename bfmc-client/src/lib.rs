//! # bfmc-client
//!
//! Transport layer for the BFMC actuator board.
//!
//! This crate provides:
//! - A connection owning the serial and SPI links, with one write lock
//! - A background framer that turns incoming bytes into response frames
//! - A waiter registry correlating responses with the callers awaiting them
//! - A high-level client that sends a command and waits for its acknowledgement

pub mod client;
pub mod connection;
pub mod error;
pub mod registry;
pub mod signal;
pub mod stream;
pub mod traffic;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionConfig, LinkStats};
pub use error::ClientError;
pub use registry::{Callback, WaiterRegistry};
pub use signal::Signal;
pub use stream::LinkStream;
pub use traffic::TrafficLog;
