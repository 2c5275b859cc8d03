//! Serial port access.
//!
//! `serialport` handles are blocking, so two worker threads pump bytes between
//! the port and an in-process duplex pipe whose other end is handed to the
//! connection.

use serialport::{available_ports, SerialPortType};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;

/// Read timeout of the port. Bounds how long the receive thread takes to
/// notice the bridge shutting down.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the duplex pipe in each direction.
const PIPE_CAPACITY: usize = 4096;

/// Opens `device` and returns the async end of the bridge.
///
/// Must be called within a Tokio runtime.
pub fn open(device: &str, baud_rate: u32) -> io::Result<DuplexStream> {
    let port = serialport::new(device, baud_rate)
        .timeout(POLL_INTERVAL)
        .open()?;
    let reader = port.try_clone()?;
    let handle = Handle::try_current().map_err(io::Error::other)?;
    tracing::debug!("opened {} at {} baud", device, baud_rate);
    bridge(reader, port, handle)
}

/// Pumps bytes from `reader` into the returned stream and bytes written to the
/// stream into `writer`.
///
/// The bridge ends when either side closes. A `reader` returning `Ok(0)` is
/// treated as a device that went away; timeouts are retried.
pub fn bridge<R, W>(mut reader: R, mut writer: W, handle: Handle) -> io::Result<DuplexStream>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (ours, pipe) = tokio::io::duplex(PIPE_CAPACITY);
    let (mut from_conn, mut to_conn) = tokio::io::split(pipe);
    let stop = Arc::new(AtomicBool::new(false));

    let rx_stop = stop.clone();
    let rx_handle = handle.clone();
    thread::Builder::new()
        .name("serial-rx".into())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            while !rx_stop.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("serial-rx: device closed");
                        break;
                    }
                    Ok(n) => {
                        if rx_handle.block_on(to_conn.write_all(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        tracing::warn!("serial-rx: read failed: {}", e);
                        break;
                    }
                }
            }
            rx_stop.store(true, Ordering::SeqCst);
            let _ = rx_handle.block_on(to_conn.shutdown());
        })?;

    thread::Builder::new()
        .name("serial-tx".into())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            loop {
                let n = match handle.block_on(from_conn.read(&mut buf)) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
                    tracing::warn!("serial-tx: write failed: {}", e);
                    break;
                }
            }
            stop.store(true, Ordering::SeqCst);
        })?;

    Ok(ours)
}

/// Lists serial ports with a short description of each.
pub fn list_ports() -> io::Result<Vec<String>> {
    let ports = available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => format!(
                "{} (usb vid={:04x} pid={:04x} {})",
                p.port_name,
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            SerialPortType::PciPort => format!("{} (pci)", p.port_name),
            SerialPortType::BluetoothPort => format!("{} (bluetooth)", p.port_name),
            SerialPortType::Unknown => p.port_name,
        })
        .collect())
}
