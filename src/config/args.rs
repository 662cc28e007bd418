//! Command-line overrides shared by the binaries.

use super::error::ConfigResult;
use super::loader::ConfigLoader;
use super::schema::Config;
use clap::Args;
use std::path::PathBuf;

/// Line settings given on the command line. Anything omitted falls back to
/// the loaded configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct SerialArgs {
    /// Configuration file (defaults to the usual search path)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Baud rate, e.g. 115200
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Mode code: data bits, parity (N/E/O), stop bits, e.g. 8N1
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Enable RTS/CTS hardware flow control
    #[arg(long)]
    pub hw_flow: bool,

    /// Take an exclusive advisory lock on the device (POSIX)
    #[arg(long)]
    pub lock: bool,

    /// Open attempts while the device is unavailable
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
}

impl SerialArgs {
    /// Load the configuration and apply these overrides on top of it.
    pub fn load(&self) -> ConfigResult<Config> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::load_from(path)?,
            None => ConfigLoader::load()?,
        };
        let mut config = loader.into_config();
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(mode) = &self.mode {
            config.serial.mode = mode.clone();
        }
        if self.hw_flow {
            config.serial.hardware_flow_control = true;
        }
        if self.lock {
            config.serial.exclusive_lock = true;
        }
        if let Some(retries) = self.retries {
            config.retry.attempts = retries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        serial: SerialArgs,
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "rs232", "-b", "9600", "--mode", "7E1", "--hw-flow", "--retries", "3",
        ]);
        let mut config = Config::default();
        cli.serial.apply(&mut config);

        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.mode, "7E1");
        assert!(config.serial.hardware_flow_control);
        assert!(!config.serial.exclusive_lock);
        assert_eq!(config.retry.attempts, 3);
    }

    #[test]
    fn test_omitted_flags_keep_config() {
        let cli = Cli::parse_from(["rs232"]);
        let mut config = Config::default();
        config.serial.baud = 57600;
        cli.serial.apply(&mut config);
        assert_eq!(config.serial.baud, 57600);
        assert_eq!(config.serial.mode, "8N1");
    }
}
