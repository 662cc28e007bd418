//! Transmit text to a serial device on a fixed interval.
//!
//! # Usage
//!
//! ```bash
//! rs232-tx /dev/ttyUSB0
//! rs232-tx COM3 --message "hello\r\n" --interval 250 --count 10
//! ```

use clap::Parser;
use rs232_transport::config::SerialArgs;
use rs232_transport::port::open_with_retry;
use rs232_transport::{logging, SerialPort};
use std::error::Error;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_LINES: [&str; 2] = [
    "The quick brown fox jumped over the lazy grey dog.\r\n",
    "Happy serial programming!\r\n",
];

#[derive(Parser, Debug)]
#[command(version, about = "Send text to a serial device repeatedly")]
struct Cli {
    /// Device path or COM name (defaults to serial.device from the config)
    device: Option<String>,

    #[command(flatten)]
    serial: SerialArgs,

    /// Text to send; without it two sample lines alternate
    #[arg(long)]
    message: Option<String>,

    /// Pause between sends in milliseconds
    #[arg(short, long, value_name = "MS", default_value_t = 1000)]
    interval: u64,

    /// Stop after this many sends
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Write timeout in milliseconds
    #[arg(short, long, value_name = "MS")]
    timeout: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = cli.serial.load()?;
    if let Some(ms) = cli.timeout {
        config.serial.write_timeout_ms = ms;
    }
    logging::init(&config.logging)?;

    let device = cli
        .device
        .or(config.serial.device.clone())
        .ok_or("no device given and serial.device is not configured")?;
    let line = config.serial.line_config()?;
    let timeout = config.serial.write_timeout();
    let messages: Vec<String> = match cli.message {
        Some(message) => vec![message.replace("\\r", "\r").replace("\\n", "\n")],
        None => DEFAULT_LINES.iter().map(|s| s.to_string()).collect(),
    };

    println!("Using serial port {device}.");
    let policy = config.retry.policy();
    let options = config.serial.open_options();
    let mut port = open_with_retry(&policy, |_| {
        SerialPort::open_with(&device, &line, &options)
    })?;
    info!(device = %device, line = %line, "transmitting");

    let mut sent = 0u64;
    for message in messages.iter().cycle() {
        if cli.count.is_some_and(|count| sent >= count) {
            break;
        }
        let n = port.write(message.as_bytes(), timeout)?;
        if n < message.len() {
            warn!(written = n, len = message.len(), "write timed out");
        }
        print!("sent: {message}");
        sent += 1;
        thread::sleep(Duration::from_millis(cli.interval));
    }

    port.close()?;
    Ok(())
}
