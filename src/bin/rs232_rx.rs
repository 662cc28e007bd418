//! Receive bytes from a serial device and print them.
//!
//! Non-printable bytes are shown as `.`. Runs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! rs232-rx /dev/ttyUSB0
//! rs232-rx COM3 --baud 9600 --mode 7E1
//! ```

use clap::Parser;
use rs232_transport::config::SerialArgs;
use rs232_transport::port::{open_with_retry, PortBackend};
use rs232_transport::{logging, SerialPort};
use std::error::Error;
use std::io::{self, Write};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Print bytes received on a serial device")]
struct Cli {
    /// Device path or COM name (defaults to serial.device from the config)
    device: Option<String>,

    #[command(flatten)]
    serial: SerialArgs,

    /// Read timeout in milliseconds
    #[arg(short, long, value_name = "MS")]
    timeout: Option<u64>,
}

fn printable(byte: u8) -> u8 {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte
    } else {
        b'.'
    }
}

fn print_bytes(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    let text: Vec<u8> = bytes.iter().copied().map(printable).collect();
    out.write_all(&text)?;
    out.flush()
}

/// One timed read, printed. Bytes that arrived before a failure are printed
/// before the error is returned.
fn receive<B: PortBackend>(
    port: &mut SerialPort<B>,
    buffer: &mut [u8],
    timeout: Duration,
    out: &mut impl Write,
) -> Result<usize, Box<dyn Error + Send + Sync>> {
    match port.read(buffer, timeout) {
        Ok(n) => {
            print_bytes(out, &buffer[..n])?;
            Ok(n)
        }
        Err(err) => {
            print_bytes(out, &buffer[..err.transferred()])?;
            Err(err.into())
        }
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = cli.serial.load()?;
    if let Some(ms) = cli.timeout {
        config.serial.read_timeout_ms = ms;
    }
    logging::init(&config.logging)?;

    let device = cli
        .device
        .or(config.serial.device.clone())
        .ok_or("no device given and serial.device is not configured")?;
    let line = config.serial.line_config()?;
    let timeout = config.serial.read_timeout();

    println!("Using serial port {device}.");
    let policy = config.retry.policy();
    let options = config.serial.open_options();
    let mut port = open_with_retry(&policy, |_| {
        SerialPort::open_with(&device, &line, &options)
    })?;
    info!(device = %device, line = %line, "receiving");

    let stdout = io::stdout();
    let mut buffer = [0u8; 4096];
    loop {
        let n = receive(&mut port, &mut buffer, timeout, &mut stdout.lock())?;
        if n == 0 {
            info!("Nothing read: timeout after {} ms", timeout.as_millis());
        }
    }
}
