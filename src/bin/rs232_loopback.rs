//! Null-modem loopback test for two serial devices.
//!
//! Connect the two devices with a null-modem cable (TX/RX, RTS/CTS and
//! DTR/DSR crossed). The suite runs once without flow control, then the
//! round trip is repeated with RTS/CTS flow control for each parity.
//!
//! # Usage
//!
//! ```bash
//! rs232-loopback /dev/ttyUSB0 /dev/ttyUSB1
//! ```

use clap::Parser;
use rs232_transport::config::SerialArgs;
use rs232_transport::loopback::{self, LoopbackOptions};
use rs232_transport::port::{open_with_retry, LineConfig, OpenFlags, OpenOptions, RetryPolicy};
use rs232_transport::{logging, SerialPort};
use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Run the loopback suite over a null-modem cable")]
struct Cli {
    /// First device (defaults to testing.port)
    src: Option<String>,

    /// Second device (defaults to testing.peer_port)
    dst: Option<String>,

    #[command(flatten)]
    serial: SerialArgs,

    /// Bytes per round trip
    #[arg(long, default_value_t = 256)]
    payload: usize,

    /// Break pulses sent by the break check
    #[arg(long, default_value_t = 256)]
    breaks: usize,

    /// Skip the hardware flow control runs
    #[arg(long)]
    no_flow_control: bool,
}

type Pair = (SerialPort, SerialPort);

fn open_pair(
    src: &str,
    dst: &str,
    line: &LineConfig,
    policy: &RetryPolicy,
) -> Result<Pair, Box<dyn Error + Send + Sync>> {
    let options = OpenOptions::default();
    let a = open_with_retry(policy, |_| SerialPort::open_with(src, line, &options))?;
    let b = open_with_retry(policy, |_| SerialPort::open_with(dst, line, &options))?;
    Ok((a, b))
}

fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = cli.serial.load()?;
    logging::init(&config.logging)?;

    let src = cli
        .src
        .or(config.testing.port.clone())
        .ok_or("no first device given and testing.port is not configured")?;
    let dst = cli
        .dst
        .or(config.testing.peer_port.clone())
        .ok_or("no second device given and testing.peer_port is not configured")?;
    let baud = cli.serial.baud.unwrap_or(config.testing.baud);
    let policy = config.retry.policy();
    let options = LoopbackOptions {
        payload_len: cli.payload,
        break_count: cli.breaks,
        timeout: Duration::from_millis(1000),
        ..LoopbackOptions::default()
    };

    let line = LineConfig::new(baud, &config.serial.mode, OpenFlags::NONE)?;
    info!(src = %src, dst = %dst, line = %line, "running loopback suite");
    let (mut a, mut b) = open_pair(&src, &dst, &line, &policy)?;
    loopback::run_all(&mut a, &mut b, &options)?;
    a.close()?;
    b.close()?;

    if cli.no_flow_control {
        return Ok(());
    }
    for mode in ["8E1", "8O1", "8N1"] {
        let line = LineConfig::new(baud, mode, OpenFlags::HW_FLOW_CONTROL)?;
        info!(line = %line, "flow control round trip");
        let (mut a, mut b) = open_pair(&src, &dst, &line, &policy)?;
        loopback::cts_asserted(&a, &b)?;
        loopback::round_trip(&mut a, &mut b, &options)?;
        a.close()?;
        b.close()?;
    }

    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => {
            println!("All loopback checks passed.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            eprintln!("Loopback failed: {e}");
            ExitCode::FAILURE
        }
    }
}
