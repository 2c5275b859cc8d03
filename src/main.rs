//! bfmc - Command-line driver for the BFMC actuator board
//!
//! Sends motion and controller commands over the serial link, waits for the
//! board's acknowledgements, drives the SPI peripheral and monitors telemetry.

mod commands;
mod config;
mod serial;

use bfmc_client::{Client, ClientConfig, Connection, ConnectionConfig, LinkStream};
use bfmc_protocol::CommandKey;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bfmc")]
#[command(about = "Command-line driver for the BFMC actuator board")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "BFMC_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device
    #[arg(short, long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Serial-to-TCP bridge address, used instead of a local device
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// SPI device used for binary frames
    #[arg(long)]
    spi: Option<PathBuf>,

    /// Raw traffic capture file
    #[arg(long, conflicts_with = "no_history")]
    history: Option<PathBuf>,

    /// Disable raw traffic capture
    #[arg(long)]
    no_history: bool,

    /// Also capture outgoing bytes
    #[arg(long)]
    log_outgoing: bool,

    /// Send without waiting for the acknowledgement
    #[arg(long, global = true)]
    no_wait: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Command-line flags override file and environment settings.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.serial.device = device.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(addr) = self.tcp {
            config.serial.tcp = Some(addr);
        }
        if let Some(spi) = &self.spi {
            config.spi.device = Some(spi.clone());
        }
        if self.no_history {
            config.history.file = None;
        } else if let Some(path) = &self.history {
            config.history.file = Some(path.clone());
        }
        if self.log_outgoing {
            config.history.log_outgoing = true;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        toggle == Toggle::On
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Set motor speed and steering angle
    Move {
        /// Motor PWM, or reference speed in cm/s when PID is active
        #[arg(allow_negative_numbers = true)]
        speed: f64,

        /// Steering angle in degrees
        #[arg(allow_negative_numbers = true)]
        angle: f64,
    },

    /// Brake while holding a steering angle
    Brake {
        /// Steering angle in degrees
        #[arg(allow_negative_numbers = true)]
        angle: f64,
    },

    /// Follow a Bezier path through four control points
    Spline {
        /// Control points as x y pairs: ax ay bx by cx cy dx dy
        #[arg(num_args = 8, required = true, allow_negative_numbers = true)]
        points: Vec<f64>,

        /// Duration in seconds
        #[arg(short, long, default_value = "1.0")]
        duration: f64,

        /// Drive backwards
        #[arg(long)]
        reverse: bool,
    },

    /// Set the speed controller gains
    PidGains {
        kp: f64,
        ki: f64,
        kd: f64,
        /// Derivative filter time constant
        tf: f64,
    },

    /// Turn the speed controller on or off
    Pid { state: Toggle },

    /// Turn the safety brake on or off
    SafetyBrake { state: Toggle },

    /// Turn the distance publisher on or off
    DistancePublish { state: Toggle },

    /// Turn the encoder publisher on or off
    EncoderPublish { state: Toggle },

    /// Send a request frame as typed (CRLF appended if missing)
    Raw {
        /// Frame text, e.g. "#MCTL:10.00;0.00;;"
        frame: String,
    },

    /// Send a binary frame over the SPI link
    SpiSend {
        /// Command id (0-31)
        command_id: u8,

        /// Payload as hex
        payload: String,
    },

    /// Set the lights over the SPI link
    Lights {
        /// Lights state byte
        state: u8,
    },

    /// Print the SPI frame for a command id and payload without sending it
    SpiFrame {
        /// Command id (0-31)
        command_id: u8,

        /// Payload as hex
        payload: String,
    },

    /// Print response frames as they arrive
    Monitor {
        /// Print frames as JSON
        #[arg(long)]
        json: bool,

        /// Only show frames with this key
        #[arg(short, long)]
        key: Option<CommandKey>,

        /// Append frame payloads to this file, one per line
        #[arg(long)]
        save: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Enable the encoder publisher while monitoring
        #[arg(long)]
        encoder: bool,

        /// Enable the distance publisher while monitoring
        #[arg(long)]
        distance: bool,
    },

    /// List available serial ports
    Ports,
}

async fn connect(config: &Config) -> Result<Client, Box<dyn std::error::Error>> {
    let stream = match config.serial.tcp {
        Some(addr) => {
            tracing::info!("Connecting to serial bridge at {}", addr);
            LinkStream::connect_tcp(addr).await?
        }
        None => {
            tracing::info!(
                "Opening {} at {} baud",
                config.serial.device,
                config.serial.baud_rate
            );
            LinkStream::serial(serial::open(
                &config.serial.device,
                config.serial.baud_rate,
            )?)
        }
    };

    let spi = match &config.spi.device {
        Some(path) => {
            tracing::info!("  SPI device: {}", path.display());
            Some(tokio::fs::OpenOptions::new().write(true).open(path).await?)
        }
        None => None,
    };

    let mut conn_config = ConnectionConfig::new().with_log_outgoing(config.history.log_outgoing);
    if let Some(path) = &config.history.file {
        tracing::info!("  History file: {}", path.display());
        conn_config = conn_config.with_history_file(path);
    }

    let mut conn = Connection::open(stream, conn_config)?;
    if let Some(spi) = spi {
        conn = conn.with_spi(spi);
    }

    let client_config = ClientConfig::new()
        .with_ack_timeout(config.timeouts.ack_timeout())
        .with_motion_timeout(config.timeouts.motion_timeout());
    Ok(Client::new(conn, client_config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Commands that never touch the board
    match commands::execute_offline(&cli.command) {
        Ok(Some(output)) => {
            println!("{}", output);
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    // Load configuration (file, then env overrides, then flags)
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    cli.apply_overrides(&mut config);
    config.validate()?;

    let client = connect(&config).await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = commands::execute(&client, cli.command, cli.no_wait).await;

    let stats = client.connection().stats();
    tracing::debug!(
        "link stats: {} bytes in, {} bytes out, {} frames ({} unmatched)",
        stats.bytes_read,
        stats.bytes_written,
        stats.frames_received,
        stats.frames_unmatched
    );
    client.close().await?;

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
