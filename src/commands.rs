//! Command execution.

use crate::{serial, Commands};
use bfmc_client::Client;
use bfmc_protocol::spi::SpiHeader;
use bfmc_protocol::{build_frame, Command, CommandKey, ControlPoint};
use colored::Colorize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// How often the monitor checks that the link is still up.
const LINK_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Executes commands that need no connection. Returns `None` for the others.
pub fn execute_offline(cmd: &Commands) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match cmd {
        Commands::SpiFrame {
            command_id,
            payload,
        } => Ok(Some(spi_frame(*command_id, payload)?)),
        Commands::Ports => {
            let ports = serial::list_ports()?;
            if ports.is_empty() {
                return Ok(Some("No serial ports found".yellow().to_string()));
            }
            Ok(Some(ports.join("\n")))
        }
        _ => Ok(None),
    }
}

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands, no_wait: bool) -> CommandResult {
    match cmd {
        Commands::Move { speed, angle } => {
            acknowledge(client, Command::Move { speed, angle }, no_wait).await
        }

        Commands::Brake { angle } => acknowledge(client, Command::Brake { angle }, no_wait).await,

        Commands::Spline {
            points,
            duration,
            reverse,
        } => {
            let command = Command::Spline {
                points: control_points(&points)?,
                duration,
                forward: !reverse,
            };
            acknowledge(client, command, no_wait).await
        }

        Commands::PidGains { kp, ki, kd, tf } => {
            acknowledge(client, Command::PidGains { kp, ki, kd, tf }, no_wait).await
        }

        Commands::Pid { state } => {
            acknowledge(client, Command::PidActivate(state.into()), no_wait).await
        }

        Commands::SafetyBrake { state } => {
            acknowledge(client, Command::SafetyBrake(state.into()), no_wait).await
        }

        Commands::DistancePublish { state } => {
            acknowledge(client, Command::DistancePublisher(state.into()), no_wait).await
        }

        Commands::EncoderPublish { state } => {
            acknowledge(client, Command::EncoderPublisher(state.into()), no_wait).await
        }

        Commands::Raw { frame } => {
            let mut bytes = frame.into_bytes();
            if !bytes.ends_with(b"\r\n") {
                bytes.extend_from_slice(b"\r\n");
            }
            client.connection().send_raw(&bytes).await?;
            Ok(format!(
                "{} {}",
                "Sent".green(),
                String::from_utf8_lossy(&bytes).trim_end()
            ))
        }

        Commands::SpiSend {
            command_id,
            payload,
        } => {
            let payload = parse_hex(&payload)?;
            client.spi(command_id, &payload).await?;
            Ok(format!(
                "{} SPI frame id={} ({} payload bytes)",
                "Sent".green(),
                command_id,
                payload.len()
            ))
        }

        Commands::Lights { state } => {
            client.lights(state).await?;
            Ok(format!("{} lights state {}", "Sent".green(), state))
        }

        Commands::Monitor {
            json,
            key,
            save,
            duration,
            encoder,
            distance,
        } => {
            let opts = MonitorOptions {
                json,
                key,
                save,
                duration: duration.map(Duration::from_secs),
                encoder,
                distance,
            };
            monitor(client, opts).await
        }

        Commands::SpiFrame { .. } | Commands::Ports => {
            Err("command does not use the board connection".into())
        }
    }
}

/// Sends `command` and formats the board's acknowledgement.
async fn acknowledge(client: &Client, command: Command, no_wait: bool) -> CommandResult {
    let key = command.key();
    if no_wait {
        client.send(&command).await?;
        return Ok(format!("{} {}", "Sent".green(), key.as_str().cyan()));
    }

    let payload = client.request(&command).await?;
    if payload.is_empty() {
        Ok(format!("{} {}", key.as_str().cyan(), "acknowledged".green()))
    } else {
        Ok(format!(
            "{} {}: {}",
            key.as_str().cyan(),
            "acknowledged".green(),
            payload
        ))
    }
}

struct MonitorOptions {
    json: bool,
    key: Option<CommandKey>,
    save: Option<PathBuf>,
    duration: Option<Duration>,
    encoder: bool,
    distance: bool,
}

/// Prints response frames until interrupted, the duration elapses or the link drops.
async fn monitor(client: &Client, opts: MonitorOptions) -> CommandResult {
    // Subscribe before enabling publishers so no frame is missed
    let mut frames = client.connection().subscribe();

    let mut save = match &opts.save {
        Some(path) => Some(BufWriter::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if opts.encoder {
        client.publish_encoder(true).await?;
    }
    if opts.distance {
        client.publish_distance(true).await?;
    }

    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    let deadline = async {
        match opts.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut link_check = tokio::time::interval(LINK_CHECK_INTERVAL);
    let mut shown = 0u64;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Ok(frame) => {
                        if opts.key.is_some_and(|k| frame.key != k.as_str()) {
                            continue;
                        }
                        shown += 1;
                        if opts.json {
                            println!("{}", serde_json::to_string(&frame)?);
                        } else {
                            println!("{} {}", frame.key.cyan(), frame.payload);
                        }
                        if let Some(w) = save.as_mut() {
                            writeln!(w, "{}", frame.payload)?;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        eprintln!("{}: lagged {} frames", "Warning".yellow(), n);
                    }
                    Err(RecvError::Closed) => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                }
            }
            _ = link_check.tick() => {
                if !client.is_connected() {
                    eprintln!("{}", "Connection closed".red());
                    break;
                }
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping monitor...".dimmed());
                break;
            }
        }
    }

    if let Some(mut w) = save {
        w.flush()?;
    }
    if client.is_connected() {
        if opts.encoder {
            if let Err(e) = client.publish_encoder(false).await {
                eprintln!("{}: {}", "Warning".yellow(), e);
            }
        }
        if opts.distance {
            if let Err(e) = client.publish_distance(false).await {
                eprintln!("{}: {}", "Warning".yellow(), e);
            }
        }
    }

    Ok(format!("{} frame(s) shown", shown))
}

/// Formats the SPI frame for `command_id` and a hex payload.
fn spi_frame(command_id: u8, payload: &str) -> CommandResult {
    let payload = parse_hex(payload)?;
    let frame = build_frame(command_id, &payload)?;
    let header = SpiHeader::from_byte(frame[0]);
    Ok(format!(
        "{}\n{}",
        hex::encode(&frame),
        format!(
            "id={} ext={} n={} ({} bytes)",
            header.command_id,
            u8::from(header.extended),
            header.n,
            frame.len()
        )
        .dimmed()
    ))
}

/// Parses hex bytes. Whitespace, `:` separators and a `0x` prefix are allowed.
fn parse_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(cleaned)
}

/// Turns eight numbers into four pair control points.
fn control_points(values: &[f64]) -> Result<[ControlPoint; 4], String> {
    match values {
        [ax, ay, bx, by, cx, cy, dx, dy] => Ok([
            ControlPoint::pair(*ax, *ay),
            ControlPoint::pair(*bx, *by),
            ControlPoint::pair(*cx, *cy),
            ControlPoint::pair(*dx, *dy),
        ]),
        _ => Err(format!("expected 8 coordinates, got {}", values.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Toggle;
    use bfmc_client::{ClientConfig, Connection, ConnectionConfig};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn spawn_echo_board(board: DuplexStream) {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(board);
            let mut reader = BufReader::new(read);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let Some(key) = line.get(1..5) else { continue };
                let reply = format!("@{}:ok;;\r\n", String::from_utf8_lossy(key));
                if write.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }

    fn client_pair() -> (Client, DuplexStream) {
        let (ours, board) = tokio::io::duplex(4096);
        let conn = Connection::open(ours, ConnectionConfig::new()).unwrap();
        (Client::new(conn, ClientConfig::new()), board)
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("02").unwrap(), vec![2]);
        assert_eq!(parse_hex("0xDEADbeef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("01:02 03").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("0g").is_err());
        assert!(parse_hex("123").is_err());
    }

    #[test]
    fn test_spi_frame_output() {
        let output = spi_frame(5, "02").unwrap();
        assert!(output.starts_with("2902\n"));
        assert!(output.contains("id=5 ext=0 n=1 (2 bytes)"));

        assert!(spi_frame(32, "02").is_err());
    }

    #[test]
    fn test_offline_commands() {
        let cmd = Commands::SpiFrame {
            command_id: 5,
            payload: "02".into(),
        };
        let output = execute_offline(&cmd).unwrap().unwrap();
        assert!(output.starts_with("2902"));

        let cmd = Commands::Pid { state: Toggle::On };
        assert!(execute_offline(&cmd).unwrap().is_none());
    }

    #[test]
    fn test_control_points() {
        let points = control_points(&[0.0, 0.0, 1.0, 0.5, 2.0, 0.5, 3.0, 0.0]).unwrap();
        assert_eq!(points[1], ControlPoint::pair(1.0, 0.5));
        assert!(control_points(&[0.0; 6]).is_err());
    }

    #[tokio::test]
    async fn test_execute_waits_for_ack() {
        let (client, board) = client_pair();
        spawn_echo_board(board);

        let output = execute(
            &client,
            Commands::Move {
                speed: 10.0,
                angle: -5.0,
            },
            false,
        )
        .await
        .unwrap();
        assert!(output.contains("MCTL"));
        assert!(output.contains("acknowledged"));
        assert!(output.contains("ok"));
    }

    #[tokio::test]
    async fn test_execute_no_wait() {
        let (client, mut board) = client_pair();

        let output = execute(&client, Commands::Pid { state: Toggle::Off }, true)
            .await
            .unwrap();
        assert!(output.contains("PIDA"));

        let mut buf = [0u8; 11];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"#PIDA:0;;\r\n");
    }

    #[tokio::test]
    async fn test_execute_raw_appends_crlf() {
        let (client, mut board) = client_pair();

        execute(
            &client,
            Commands::Raw {
                frame: "#BRAK:0.00;;".into(),
            },
            false,
        )
        .await
        .unwrap();

        let mut buf = [0u8; 14];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"#BRAK:0.00;;\r\n");
    }

    #[tokio::test]
    async fn test_monitor_filters_and_saves() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("encoder.txt");
        let (client, mut board) = client_pair();

        let opts = MonitorOptions {
            json: false,
            key: Some(CommandKey::EncoderPublisher),
            save: Some(path.clone()),
            duration: Some(Duration::from_millis(300)),
            encoder: false,
            distance: false,
        };

        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            board
                .write_all(b"@ENPB:1.25;;\r\n@DSPB:0.40;;\r\n@ENPB:1.50;;\r\n")
                .await
                .unwrap();
            board
        });

        let output = monitor(&client, opts).await.unwrap();
        let _board = feeder.await.unwrap();
        assert!(output.starts_with("2 frame(s)"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1.25\n1.50\n");
    }
}
