//! Command keys, typed commands and response frames.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four-character tag identifying a command and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKey {
    /// Motor speed and steering angle.
    #[serde(rename = "MCTL")]
    Move,
    /// Brake with a steering angle.
    #[serde(rename = "BRAK")]
    Brake,
    /// Bezier trajectory.
    #[serde(rename = "SPLN")]
    Spline,
    /// PID controller gains.
    #[serde(rename = "PIDS")]
    PidGains,
    /// PID controller activation.
    #[serde(rename = "PIDA")]
    PidActivate,
    /// Safety brake activation.
    #[serde(rename = "SFBR")]
    SafetyBrake,
    /// Distance sensor publisher toggle.
    #[serde(rename = "DSPB")]
    DistancePublisher,
    /// Encoder publisher toggle.
    #[serde(rename = "ENPB")]
    EncoderPublisher,
}

impl CommandKey {
    /// Every key the board understands.
    pub const ALL: [CommandKey; 8] = [
        CommandKey::Move,
        CommandKey::Brake,
        CommandKey::Spline,
        CommandKey::PidGains,
        CommandKey::PidActivate,
        CommandKey::SafetyBrake,
        CommandKey::DistancePublisher,
        CommandKey::EncoderPublisher,
    ];

    /// Wire tag of this key.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandKey::Move => "MCTL",
            CommandKey::Brake => "BRAK",
            CommandKey::Spline => "SPLN",
            CommandKey::PidGains => "PIDS",
            CommandKey::PidActivate => "PIDA",
            CommandKey::SafetyBrake => "SFBR",
            CommandKey::DistancePublisher => "DSPB",
            CommandKey::EncoderPublisher => "ENPB",
        }
    }

    /// Whether commands under this key move the vehicle.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            CommandKey::Move | CommandKey::Brake | CommandKey::Spline
        )
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKey(s.to_string()))
    }
}

/// A point on the complex plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// A Bezier control point, given either as a complex number or as a coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlPoint {
    Complex(Complex),
    /// Must hold exactly two coordinates to be encodable.
    Pair(Vec<f64>),
}

impl ControlPoint {
    pub fn complex(re: f64, im: f64) -> Self {
        ControlPoint::Complex(Complex::new(re, im))
    }

    pub fn pair(x: f64, y: f64) -> Self {
        ControlPoint::Pair(vec![x, y])
    }
}

impl From<Complex> for ControlPoint {
    fn from(c: Complex) -> Self {
        ControlPoint::Complex(c)
    }
}

impl From<[f64; 2]> for ControlPoint {
    fn from(p: [f64; 2]) -> Self {
        ControlPoint::Pair(p.to_vec())
    }
}

/// A typed command for the actuator board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Motor PWM (or reference speed in cm/s when PID is active) and steering angle.
    Move { speed: f64, angle: f64 },
    Brake { angle: f64 },
    Spline {
        points: [ControlPoint; 4],
        duration: f64,
        forward: bool,
    },
    PidGains { kp: f64, ki: f64, kd: f64, tf: f64 },
    PidActivate(bool),
    SafetyBrake(bool),
    DistancePublisher(bool),
    EncoderPublisher(bool),
}

impl Command {
    /// Key carried by the encoded command and by its acknowledgement.
    pub fn key(&self) -> CommandKey {
        match self {
            Command::Move { .. } => CommandKey::Move,
            Command::Brake { .. } => CommandKey::Brake,
            Command::Spline { .. } => CommandKey::Spline,
            Command::PidGains { .. } => CommandKey::PidGains,
            Command::PidActivate(_) => CommandKey::PidActivate,
            Command::SafetyBrake(_) => CommandKey::SafetyBrake,
            Command::DistancePublisher(_) => CommandKey::DistancePublisher,
            Command::EncoderPublisher(_) => CommandKey::EncoderPublisher,
        }
    }

    pub fn is_motion(&self) -> bool {
        self.key().is_motion()
    }
}

/// A completed response frame, delimiters removed.
///
/// The body `ENPB:12.50;;` parses to key `ENPB` and payload `12.50`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub key: String,
    pub payload: String,
}

impl ResponseFrame {
    /// Length of the `KEY:` prefix.
    pub const HEADER_LEN: usize = 5;
    /// Length of the `;;` trailer.
    pub const TRAILER_LEN: usize = 2;

    /// Parses a frame body. Bodies shorter than a key are malformed.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let key = body
            .get(..4)
            .ok_or_else(|| ProtocolError::MalformedResponse(body.to_string()))?;
        let end = body.len().saturating_sub(Self::TRAILER_LEN);
        let payload = body.get(Self::HEADER_LEN..end).unwrap_or("");
        Ok(Self {
            key: key.to_string(),
            payload: payload.to_string(),
        })
    }

    /// The command key of this frame, if it is one the board defines.
    pub fn command_key(&self) -> Option<CommandKey> {
        self.key.parse().ok()
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{};;", self.key, self.payload)
    }
}
