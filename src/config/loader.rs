//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "RS232";

/// File name looked for in the working directory
const LOCAL_FILE_NAME: &str = "rs232.toml";

/// File name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "RS232_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `RS232_CONFIG` environment variable (explicit path)
    /// 2. `./rs232.toml` (current directory)
    /// 3. `rs232/config.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(LOCAL_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    default_config_path().filter(|path| path.exists())
}

/// Where a per-user config file would live on this platform.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rs232").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn env_var(section: &str, key: &str) -> Option<(String, String)> {
    let name = format!("{ENV_PREFIX}_{section}_{key}");
    std::env::var(&name).ok().map(|value| (name, value))
}

fn parse_env<T: FromStr>(section: &str, key: &str, what: &str) -> ConfigResult<Option<T>> {
    match env_var(section, key) {
        Some((name, value)) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(name, format!("Invalid {what}: '{value}'"))),
        None => Ok(None),
    }
}

fn parse_bool(section: &str, key: &str) -> ConfigResult<Option<bool>> {
    match env_var(section, key) {
        Some((name, value)) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::env_parse(name, format!("Invalid boolean: '{value}'"))),
        },
        None => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `RS232_<SECTION>_<KEY>`
/// For example:
/// - `RS232_SERIAL_DEVICE=/dev/ttyUSB0`
/// - `RS232_SERIAL_BAUD=9600`
/// - `RS232_RETRY_ATTEMPTS=5`
///
/// The hardware test variables `TEST_PORT`, `TEST_PEER_PORT` and `TEST_BAUD`
/// are honored as fallbacks for the testing section.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some((_, val)) = env_var("SERIAL", "DEVICE") {
        config.serial.device = Some(val);
    }
    if let Some(val) = parse_env("SERIAL", "BAUD", "baud rate")? {
        config.serial.baud = val;
    }
    if let Some((_, val)) = env_var("SERIAL", "MODE") {
        config.serial.mode = val;
    }
    if let Some(val) = parse_bool("SERIAL", "HARDWARE_FLOW_CONTROL")? {
        config.serial.hardware_flow_control = val;
    }
    if let Some(val) = parse_bool("SERIAL", "EXCLUSIVE_LOCK")? {
        config.serial.exclusive_lock = val;
    }
    if let Some(val) = parse_env("SERIAL", "READ_TIMEOUT_MS", "timeout")? {
        config.serial.read_timeout_ms = val;
    }
    if let Some(val) = parse_env("SERIAL", "WRITE_TIMEOUT_MS", "timeout")? {
        config.serial.write_timeout_ms = val;
    }

    // Retry overrides
    if let Some(val) = parse_env("RETRY", "ATTEMPTS", "attempt count")? {
        config.retry.attempts = val;
    }
    if let Some(val) = parse_env("RETRY", "INTERVAL_MS", "interval")? {
        config.retry.interval_ms = val;
    }

    // Logging overrides
    if let Some((_, val)) = env_var("LOGGING", "LEVEL") {
        config.logging.level = val;
    }
    if let Some((name, val)) = env_var("LOGGING", "FORMAT") {
        config.logging.format = match val.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env_parse(name, format!("Invalid log format: '{val}'"))),
        };
    }

    // Testing overrides (also support TEST_PORT etc.)
    if let Some(val) = env_var("TESTING", "PORT")
        .map(|(_, v)| v)
        .or_else(|| std::env::var("TEST_PORT").ok())
    {
        config.testing.port = Some(val);
    }
    if let Some(val) = env_var("TESTING", "PEER_PORT")
        .map(|(_, v)| v)
        .or_else(|| std::env::var("TEST_PEER_PORT").ok())
    {
        config.testing.peer_port = Some(val);
    }
    let test_baud = env_var("TESTING", "BAUD")
        .or_else(|| std::env::var("TEST_BAUD").ok().map(|v| ("TEST_BAUD".to_string(), v)));
    if let Some((name, val)) = test_baud {
        config.testing.baud = val
            .trim()
            .parse()
            .map_err(|_| ConfigError::env_parse(name, format!("Invalid baud rate: '{val}'")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().serial.baud, 115200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("RS232_SERIAL_BAUD", "9600");
        env::set_var("RS232_SERIAL_HARDWARE_FLOW_CONTROL", "yes");
        env::set_var("RS232_RETRY_INTERVAL_MS", "50");

        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().serial.baud, 9600);
        assert!(loader.config().serial.hardware_flow_control);
        assert_eq!(loader.config().retry.interval_ms, 50);

        env::remove_var("RS232_SERIAL_BAUD");
        env::remove_var("RS232_SERIAL_HARDWARE_FLOW_CONTROL");
        env::remove_var("RS232_RETRY_INTERVAL_MS");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        env::set_var("RS232_RETRY_ATTEMPTS", "many");

        let err = ConfigLoader::with_defaults().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvParseError { ref var, .. } if var == "RS232_RETRY_ATTEMPTS"
        ));

        env::remove_var("RS232_RETRY_ATTEMPTS");
    }

    #[test]
    #[serial]
    fn test_hardware_test_env_fallbacks() {
        env::set_var("TEST_PORT", "/dev/ttyUSB0");
        env::set_var("TEST_PEER_PORT", "/dev/ttyUSB1");
        env::set_var("TEST_BAUD", "57600");

        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().testing.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(loader.config().testing.peer_port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(loader.config().testing.baud, 57600);

        env::remove_var("TEST_PORT");
        env::remove_var("TEST_PEER_PORT");
        env::remove_var("TEST_BAUD");
    }

    #[test]
    #[serial]
    fn test_load_from_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\ndevice = \"COM7\"\nbaud = 19200\n\n[logging]\nformat = \"compact\""
        )
        .unwrap();
        env::set_var("RS232_SERIAL_DEVICE", "COM9");

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
        assert_eq!(loader.config().serial.baud, 19200);
        assert_eq!(loader.config().serial.device.as_deref(), Some("COM9"));
        assert_eq!(loader.config().logging.format, LogFormat::Compact);

        env::remove_var("RS232_SERIAL_DEVICE");
    }

    #[test]
    #[serial]
    fn test_explicit_path_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[retry]\nattempts = 2\n").unwrap();
        env::set_var(CONFIG_PATH_ENV, &path);

        let loader = ConfigLoader::load().unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(loader.config().retry.attempts, 2);

        env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    #[serial]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[serial\nbaud = ").unwrap();

        assert!(matches!(
            ConfigLoader::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            ConfigLoader::load_from(dir.path().join("absent.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
