//! Textual encoder and stream framer for the serial link.
//!
//! Requests travel as `#KEY:field;field;;\r\n`. Responses come back as
//! `@KEY:payload;;\r`, interleaved with free-form debug output from the board.

use crate::error::ProtocolError;
use crate::message::{Command, CommandKey, ControlPoint};
use crate::{MAX_RESPONSE_LEN, REQUEST_START, REQUEST_TRAILER, RESPONSE_END, RESPONSE_START};

/// Renders typed commands into request frames.
///
/// Every function is pure. An argument that fails its precondition yields
/// [`ProtocolError::NotEncodable`] and nothing must be sent.
pub struct Encoder;

impl Encoder {
    /// Encodes any command.
    pub fn encode(command: &Command) -> Result<String, ProtocolError> {
        match command {
            Command::Move { speed, angle } => Self::encode_move(*speed, *angle),
            Command::Brake { angle } => Self::encode_brake(*angle),
            Command::Spline {
                points,
                duration,
                forward,
            } => Self::encode_spline(points, *duration, *forward),
            Command::PidGains { kp, ki, kd, tf } => Self::encode_pid_gains(*kp, *ki, *kd, *tf),
            Command::PidActivate(on) => Ok(Self::encode_toggle(CommandKey::PidActivate, *on)),
            Command::SafetyBrake(on) => Ok(Self::encode_toggle(CommandKey::SafetyBrake, *on)),
            Command::DistancePublisher(on) => {
                Ok(Self::encode_toggle(CommandKey::DistancePublisher, *on))
            }
            Command::EncoderPublisher(on) => {
                Ok(Self::encode_toggle(CommandKey::EncoderPublisher, *on))
            }
        }
    }

    /// `#MCTL:<speed>;<angle>;;\r\n`
    pub fn encode_move(speed: f64, angle: f64) -> Result<String, ProtocolError> {
        let key = CommandKey::Move;
        let speed = fixed2(key, speed, "speed is not finite")?;
        let angle = fixed2(key, angle, "angle is not finite")?;
        Ok(request(key, &[speed, angle]))
    }

    /// `#BRAK:<angle>;;\r\n`
    pub fn encode_brake(angle: f64) -> Result<String, ProtocolError> {
        let key = CommandKey::Brake;
        let angle = fixed2(key, angle, "angle is not finite")?;
        Ok(request(key, &[angle]))
    }

    /// `#SPLN:<fwd>;<ax>;<ay>;<bx>;<by>;<cx>;<cy>;<dx>;<dy>;<duration>;;\r\n`
    ///
    /// All four points must be complex numbers, or all four must be
    /// two-element coordinate pairs.
    pub fn encode_spline(
        points: &[ControlPoint; 4],
        duration: f64,
        forward: bool,
    ) -> Result<String, ProtocolError> {
        let key = CommandKey::Spline;
        let duration = fixed2(key, duration, "duration is not finite")?;

        let coords: Vec<f64> = if points.iter().all(|p| matches!(p, ControlPoint::Complex(_))) {
            points
                .iter()
                .filter_map(|p| match p {
                    ControlPoint::Complex(c) => Some([c.re, c.im]),
                    ControlPoint::Pair(_) => None,
                })
                .flatten()
                .collect()
        } else if points
            .iter()
            .all(|p| matches!(p, ControlPoint::Pair(xy) if xy.len() == 2))
        {
            points
                .iter()
                .filter_map(|p| match p {
                    ControlPoint::Pair(xy) => Some(xy.iter().copied()),
                    ControlPoint::Complex(_) => None,
                })
                .flatten()
                .collect()
        } else {
            return Err(ProtocolError::not_encodable(
                key,
                "control points must be all complex or all 2-element pairs",
            ));
        };

        let mut fields = Vec::with_capacity(10);
        fields.push(flag(forward).to_string());
        for c in coords {
            fields.push(fixed2(key, c, "control point is not finite")?);
        }
        fields.push(duration);
        Ok(request(key, &fields))
    }

    /// `#PIDS:<kp>;<ki>;<kd>;<tf>;;\r\n`, five decimals per gain.
    pub fn encode_pid_gains(kp: f64, ki: f64, kd: f64, tf: f64) -> Result<String, ProtocolError> {
        let key = CommandKey::PidGains;
        let mut fields = Vec::with_capacity(4);
        for gain in [kp, ki, kd, tf] {
            if !gain.is_finite() {
                return Err(ProtocolError::not_encodable(key, "gain is not finite"));
            }
            fields.push(format!("{:.5}", gain));
        }
        Ok(request(key, &fields))
    }

    pub fn encode_pid_activate(on: bool) -> String {
        Self::encode_toggle(CommandKey::PidActivate, on)
    }

    pub fn encode_safety_brake(on: bool) -> String {
        Self::encode_toggle(CommandKey::SafetyBrake, on)
    }

    pub fn encode_distance_publisher(on: bool) -> String {
        Self::encode_toggle(CommandKey::DistancePublisher, on)
    }

    pub fn encode_encoder_publisher(on: bool) -> String {
        Self::encode_toggle(CommandKey::EncoderPublisher, on)
    }

    fn encode_toggle(key: CommandKey, on: bool) -> String {
        request(key, &[flag(on).to_string()])
    }
}

fn request(key: CommandKey, fields: &[String]) -> String {
    format!(
        "{}{}:{}{}",
        REQUEST_START as char,
        key,
        fields.join(";"),
        REQUEST_TRAILER
    )
}

fn fixed2(key: CommandKey, value: f64, reason: &'static str) -> Result<String, ProtocolError> {
    if !value.is_finite() {
        return Err(ProtocolError::not_encodable(key, reason));
    }
    Ok(format!("{:.2}", value))
}

fn flag(on: bool) -> u8 {
    u8::from(on)
}

/// Recovers response frames from an unframed byte stream.
///
/// A frame starts at `@` and ends at the next `\r`. A new `@` flushes whatever
/// was accumulated before it. Bytes outside a frame are ignored, and bytes that
/// are not ASCII are dropped wherever they appear.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: Vec<u8>,
    in_frame: bool,
    dropped: u64,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte. Returns the body of a frame completed by this byte.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if !byte.is_ascii() {
            self.dropped += 1;
            return None;
        }

        match byte {
            RESPONSE_START => {
                let completed = self.take();
                self.in_frame = true;
                completed
            }
            RESPONSE_END => {
                self.in_frame = false;
                self.take()
            }
            _ if self.in_frame => {
                if self.buffer.len() >= MAX_RESPONSE_LEN {
                    self.dropped += self.buffer.len() as u64 + 1;
                    self.reset();
                } else {
                    self.buffer.push(byte);
                }
                None
            }
            _ => None,
        }
    }

    /// Feeds a chunk of bytes and returns every frame it completes, in order.
    pub fn extend(&mut self, data: &[u8]) -> Vec<String> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Number of bytes currently buffered for an unfinished frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes discarded as noise or overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether a start marker has been seen without its end marker.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
    }

    fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let body = std::mem::take(&mut self.buffer);
        // Only ASCII bytes are ever buffered.
        String::from_utf8(body).ok()
    }
}
