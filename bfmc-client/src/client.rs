//! High-level client API.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::registry::Callback;
use crate::signal::Signal;
use bfmc_protocol::spi::LIGHTS_COMMAND_ID;
use bfmc_protocol::{Command, CommandKey, ControlPoint, Encoder};
use std::sync::Arc;
use std::time::Duration;

/// Default wait for a plain acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for motion commands (move, brake, spline).
pub const DEFAULT_MOTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ack_timeout: Duration,
    pub motion_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            motion_timeout: DEFAULT_MOTION_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_motion_timeout(mut self, timeout: Duration) -> Self {
        self.motion_timeout = timeout;
        self
    }

    /// How long to wait for the acknowledgement of `key`.
    pub fn timeout_for(&self, key: CommandKey) -> Duration {
        if key.is_motion() {
            self.motion_timeout
        } else {
            self.ack_timeout
        }
    }
}

/// High-level client for the actuator board.
///
/// Every command method sends the command and waits for the board to echo
/// its key back, returning the payload of that response.
pub struct Client {
    conn: Arc<Connection>,
    config: ClientConfig,
}

impl Client {
    pub fn new(conn: Connection, config: ClientConfig) -> Self {
        Self::from_shared(Arc::new(conn), config)
    }

    /// Creates a client over a connection that other components also use.
    pub fn from_shared(conn: Arc<Connection>, config: ClientConfig) -> Self {
        Self { conn, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection (for subscriptions and raw sends).
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Request / acknowledgement
    // =========================================================================

    /// Sends `command` and waits for the response carrying its key.
    ///
    /// The waiter is registered before the command is written so a fast reply
    /// cannot be missed. On timeout it is removed again.
    pub async fn request(&self, command: &Command) -> Result<String, ClientError> {
        let key = command.key();
        let encoded = Encoder::encode(command)?;

        let signal = Signal::new();
        let reply = Arc::new(parking_lot::Mutex::new(None::<String>));
        let sink = reply.clone();
        let callback: Callback = Arc::new(move |payload: &str| {
            *sink.lock() = Some(payload.to_string());
        });
        self.conn.register_waiter(key, &signal, Some(callback));

        if let Err(e) = self.conn.send_raw(encoded.as_bytes()).await {
            self.conn.delete_waiter(key, &signal);
            return Err(e);
        }

        let timeout = self.config.timeout_for(key);
        if !signal.wait(timeout).await {
            self.conn.delete_waiter(key, &signal);
            tracing::debug!("no response for {} after {:?}", key, timeout);
            return Err(ClientError::Timeout {
                key: key.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let payload = reply.lock().take().unwrap_or_default();
        tracing::debug!("{} acknowledged: {:?}", key, payload);
        Ok(payload)
    }

    /// Sends `command` without waiting for a response.
    pub async fn send(&self, command: &Command) -> Result<(), ClientError> {
        self.conn.send_command(command).await
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Sets motor speed and steering angle.
    pub async fn move_to(&self, speed: f64, angle: f64) -> Result<String, ClientError> {
        self.request(&Command::Move { speed, angle }).await
    }

    /// Brakes while holding the steering angle.
    pub async fn brake(&self, angle: f64) -> Result<String, ClientError> {
        self.request(&Command::Brake { angle }).await
    }

    /// Follows a cubic Bezier path given by four control points.
    pub async fn spline(
        &self,
        points: [ControlPoint; 4],
        duration: f64,
        forward: bool,
    ) -> Result<String, ClientError> {
        self.request(&Command::Spline {
            points,
            duration,
            forward,
        })
        .await
    }

    // =========================================================================
    // Controller settings
    // =========================================================================

    pub async fn set_pid_gains(
        &self,
        kp: f64,
        ki: f64,
        kd: f64,
        tf: f64,
    ) -> Result<String, ClientError> {
        self.request(&Command::PidGains { kp, ki, kd, tf }).await
    }

    pub async fn activate_pid(&self, on: bool) -> Result<String, ClientError> {
        self.request(&Command::PidActivate(on)).await
    }

    pub async fn activate_safety_brake(&self, on: bool) -> Result<String, ClientError> {
        self.request(&Command::SafetyBrake(on)).await
    }

    /// Turns the distance sensor publisher on or off.
    pub async fn publish_distance(&self, on: bool) -> Result<String, ClientError> {
        self.request(&Command::DistancePublisher(on)).await
    }

    /// Turns the encoder speed publisher on or off.
    pub async fn publish_encoder(&self, on: bool) -> Result<String, ClientError> {
        self.request(&Command::EncoderPublisher(on)).await
    }

    // =========================================================================
    // SPI
    // =========================================================================

    /// Sends a binary frame over the SPI link. There is no acknowledgement.
    pub async fn spi(&self, command_id: u8, payload: &[u8]) -> Result<(), ClientError> {
        self.conn.send_spi(command_id, payload).await
    }

    /// Sets the lights state.
    pub async fn lights(&self, state: u8) -> Result<(), ClientError> {
        self.spi(LIGHTS_COMMAND_ID, &[state]).await
    }
}
