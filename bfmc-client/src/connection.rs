//! Connection management.

use crate::error::ClientError;
use crate::registry::{Callback, WaiterRegistry};
use crate::signal::Signal;
use crate::traffic::TrafficLog;
use bfmc_protocol::{
    build_frame, Command, CommandKey, ControlPoint, Encoder, ResponseFrame, StreamFramer,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size. The board talks at 460800 baud, so reads are small.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 16;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default capacity for the frame broadcast channel.
const FRAME_CHANNEL_CAPACITY: usize = 256;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Raw traffic capture file (optional).
    pub history_file: Option<PathBuf>,
    /// Also capture bytes written to the serial link.
    pub log_outgoing: bool,
    /// Read buffer size for serial reads.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            history_file: None,
            log_outgoing: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn with_log_outgoing(mut self, enabled: bool) -> Self {
        self.log_outgoing = enabled;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// Traffic counters of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub frames_received: u64,
    /// Frames no waiter was registered for.
    pub frames_unmatched: u64,
    /// Non-ASCII or overflowing bytes dropped by the framer.
    pub noise_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    frames_received: AtomicU64,
    frames_unmatched: AtomicU64,
    noise_bytes: AtomicU64,
}

/// Write sinks. The mutex around them is the single write lock.
struct Links {
    serial: Option<BoxedWriter>,
    spi: Option<BoxedWriter>,
}

/// State shared with the background read loop.
struct ReaderContext {
    registry: Arc<WaiterRegistry>,
    traffic: Arc<TrafficLog>,
    frames: broadcast::Sender<ResponseFrame>,
    counters: Arc<Counters>,
    reading: Arc<AtomicBool>,
    buffer_size: usize,
}

impl ReaderContext {
    fn route(&self, body: &str) {
        let frame = match ResponseFrame::parse(body) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!("read_loop: dropping {}", e);
                return;
            }
        };

        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        if self.registry.dispatch(&frame) == 0 {
            self.counters.frames_unmatched.fetch_add(1, Ordering::Relaxed);
        }
        if self.frames.receiver_count() > 0 {
            let _ = self.frames.send(frame);
        }
    }
}

/// A connection to the actuator board.
///
/// Owns the serial link (and optionally the SPI link). A background task
/// reads the serial link, frames responses and dispatches them to waiters.
pub struct Connection {
    config: ConnectionConfig,
    links: Mutex<Links>,
    registry: Arc<WaiterRegistry>,
    traffic: Arc<TrafficLog>,
    frames: broadcast::Sender<ResponseFrame>,
    shutdown: watch::Sender<bool>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<Result<(), ClientError>>>>,
    counters: Arc<Counters>,
    reading: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Connection {
    /// Takes ownership of `stream` and starts the read loop.
    ///
    /// Must be called within a Tokio runtime.
    pub fn open<S>(stream: S, config: ConnectionConfig) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let traffic = match &config.history_file {
            Some(path) => TrafficLog::open(path)?,
            None => TrafficLog::disabled(),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let conn = Self {
            links: Mutex::new(Links {
                serial: Some(Box::new(write_half)),
                spi: None,
            }),
            registry: Arc::new(WaiterRegistry::new()),
            traffic: Arc::new(traffic),
            frames,
            shutdown,
            reader_task: parking_lot::Mutex::new(None),
            counters: Arc::new(Counters::default()),
            reading: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
            config,
        };

        let ctx = ReaderContext {
            registry: conn.registry.clone(),
            traffic: conn.traffic.clone(),
            frames: conn.frames.clone(),
            counters: conn.counters.clone(),
            reading: conn.reading.clone(),
            buffer_size: conn.config.read_buffer_size,
        };
        let task = tokio::spawn(read_loop(Box::new(read_half), ctx, shutdown_rx));
        *conn.reader_task.lock() = Some(task);

        tracing::debug!("connection opened");
        Ok(conn)
    }

    /// Attaches the SPI link.
    pub fn with_spi<W>(mut self, spi: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.links.get_mut().spi = Some(Box::new(spi));
        self
    }

    // =========================================================================
    // Waiters
    // =========================================================================

    /// Registers a waiter released by the next response under `key`.
    pub fn register_waiter(&self, key: CommandKey, signal: &Signal, callback: Option<Callback>) {
        self.registry.register(key, signal, callback);
    }

    /// Removes a waiter. Safe to call for waiters already released or removed.
    pub fn delete_waiter(&self, key: CommandKey, signal: &Signal) -> bool {
        self.registry.unregister(key, signal)
    }

    pub fn registry(&self) -> &Arc<WaiterRegistry> {
        &self.registry
    }

    /// Subscribes to every completed response frame.
    pub fn subscribe(&self) -> broadcast::Receiver<ResponseFrame> {
        self.frames.subscribe()
    }

    // =========================================================================
    // Serial commands
    // =========================================================================

    pub async fn send_command(&self, command: &Command) -> Result<(), ClientError> {
        let encoded = Encoder::encode(command)?;
        self.write_serial(encoded.as_bytes()).await
    }

    pub async fn send_move(&self, speed: f64, angle: f64) -> Result<(), ClientError> {
        let encoded = Encoder::encode_move(speed, angle)?;
        self.write_serial(encoded.as_bytes()).await
    }

    pub async fn send_brake(&self, angle: f64) -> Result<(), ClientError> {
        let encoded = Encoder::encode_brake(angle)?;
        self.write_serial(encoded.as_bytes()).await
    }

    pub async fn send_spline(
        &self,
        points: &[ControlPoint; 4],
        duration: f64,
        forward: bool,
    ) -> Result<(), ClientError> {
        let encoded = Encoder::encode_spline(points, duration, forward)?;
        self.write_serial(encoded.as_bytes()).await
    }

    pub async fn send_pid_gains(
        &self,
        kp: f64,
        ki: f64,
        kd: f64,
        tf: f64,
    ) -> Result<(), ClientError> {
        let encoded = Encoder::encode_pid_gains(kp, ki, kd, tf)?;
        self.write_serial(encoded.as_bytes()).await
    }

    pub async fn send_pid_activate(&self, on: bool) -> Result<(), ClientError> {
        self.write_serial(Encoder::encode_pid_activate(on).as_bytes())
            .await
    }

    pub async fn send_safety_brake(&self, on: bool) -> Result<(), ClientError> {
        self.write_serial(Encoder::encode_safety_brake(on).as_bytes())
            .await
    }

    pub async fn send_distance_publisher(&self, on: bool) -> Result<(), ClientError> {
        self.write_serial(Encoder::encode_distance_publisher(on).as_bytes())
            .await
    }

    pub async fn send_encoder_publisher(&self, on: bool) -> Result<(), ClientError> {
        self.write_serial(Encoder::encode_encoder_publisher(on).as_bytes())
            .await
    }

    /// Writes bytes to the serial link as-is.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.write_serial(bytes).await
    }

    // =========================================================================
    // SPI
    // =========================================================================

    /// Builds the SPI frame for `command_id` and writes it to the SPI link.
    pub async fn send_spi(&self, command_id: u8, payload: &[u8]) -> Result<(), ClientError> {
        let frame = build_frame(command_id, payload)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        {
            let mut links = self.links.lock().await;
            let spi = links.spi.as_mut().ok_or(ClientError::NoSpiLink)?;
            spi.write_all(&frame).await?;
            spi.flush().await?;
        }
        tracing::debug!(
            "SPI frame sent: id={} ({} bytes)",
            command_id,
            frame.len()
        );
        Ok(())
    }

    async fn write_serial(&self, bytes: &[u8]) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        if !self.reading.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }

        {
            let mut links = self.links.lock().await;
            let serial = links.serial.as_mut().ok_or(ClientError::NotConnected)?;
            serial.write_all(bytes).await?;
            serial.flush().await?;
        }
        self.counters
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if self.config.log_outgoing {
            if let Err(e) = self.traffic.append(bytes) {
                tracing::warn!("traffic log write failed: {}", e);
            }
        }
        tracing::debug!("sent {:?}", String::from_utf8_lossy(bytes).trim_end());
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns whether the connection is open and its read loop is running.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.reading.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            bytes_read: self.counters.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            frames_unmatched: self.counters.frames_unmatched.load(Ordering::Relaxed),
            noise_bytes: self.counters.noise_bytes.load(Ordering::Relaxed),
        }
    }

    /// Closes the connection.
    ///
    /// Stops the read loop and waits for it, then shuts the links down, then
    /// closes the traffic log.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        // Mark as closed first to stop any new sends
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let task = self.reader_task.lock().take();
        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => tracing::debug!("read loop stopped"),
                Ok(Err(e)) => tracing::debug!("read loop had already ended: {}", e),
                Err(e) => tracing::warn!("read loop task failed: {}", e),
            }
        }

        let (serial, spi) = {
            let mut links = self.links.lock().await;
            (links.serial.take(), links.spi.take())
        };
        for mut writer in [serial, spi].into_iter().flatten() {
            let _ = writer.shutdown().await;
        }

        self.traffic.close()?;

        let pending = self.registry.pending_count();
        if pending > 0 {
            tracing::debug!("{} waiter(s) still registered at close", pending);
        }
        tracing::debug!("Connection closed");
        Ok(())
    }
}

/// Reads the serial link until stopped, framing and dispatching responses.
async fn read_loop(
    mut reader: BoxedReader,
    ctx: ReaderContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ClientError> {
    tracing::debug!("read_loop started");
    let mut framer = StreamFramer::new();
    let mut buf = vec![0u8; ctx.buffer_size];

    let result = loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!("read_loop: stop requested");
                break Ok(());
            }
            read = reader.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("read_loop: read failed: {}", e);
                    break Err(ClientError::Io(e));
                }
            },
        };

        if n == 0 {
            tracing::debug!("read_loop: connection closed");
            break Err(ClientError::ConnectionClosed);
        }

        let chunk = &buf[..n];
        ctx.counters
            .bytes_read
            .fetch_add(n as u64, Ordering::Relaxed);
        if let Err(e) = ctx.traffic.append(chunk) {
            tracing::warn!("traffic log write failed: {}", e);
        }

        for &byte in chunk {
            if let Some(body) = framer.push(byte) {
                ctx.route(&body);
            }
        }
        ctx.counters
            .noise_bytes
            .store(framer.dropped(), Ordering::Relaxed);
    };

    ctx.reading.store(false, Ordering::SeqCst);
    result
}
