//! Service configuration.
//!
//! Settings come from a `key=value` file and from long command-line flags
//! that mirror every key. Flags are applied after the file, so they win.
//!
//! ```text
//! # sht4x_reader.cfg
//! mqtt-server = mqtts://broker.example.com
//! mqtt-topic  = server/conditions
//! device-path = /dev/sht4x
//! report-period = 60
//! debug = false
//! ```
//!
//! Invalid values never abort startup: the typed getters log a warning and
//! fall back to the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sht4x_reader.cfg";

/// Maximum number of distinct keys kept by a [`ConfigStore`].
pub const DEFAULT_CAPACITY: usize = 128;

/// Recognized configuration keys.
pub mod keys {
    pub const MQTT_SERVER: &str = "mqtt-server";
    pub const MQTT_CLIENT: &str = "mqtt-client";
    pub const MQTT_TOPIC: &str = "mqtt-topic";
    pub const MQTT_TLS_INSECURE: &str = "mqtt-tls-insecure";
    pub const DEVICE_PATH: &str = "device-path";
    pub const REPORT_PERIOD: &str = "report-period";
    pub const STATS_PERIOD: &str = "stats-period";
    pub const RECOVERY_ATTEMPTS: &str = "recovery-attempts";
    pub const RECOVERY_DELAY: &str = "recovery-delay";
    pub const DEBUG: &str = "debug";

    /// All keys, in the order they are reported at startup.
    pub const ALL: &[&str] = &[
        MQTT_CLIENT,
        MQTT_SERVER,
        MQTT_TOPIC,
        MQTT_TLS_INSECURE,
        DEVICE_PATH,
        REPORT_PERIOD,
        STATS_PERIOD,
        RECOVERY_ATTEMPTS,
        RECOVERY_DELAY,
        DEBUG,
    ];
}

pub const DEFAULT_MQTT_SERVER: &str = "mqtt://localhost";
pub const DEFAULT_MQTT_CLIENT: &str = "sht4x_reader";
pub const DEFAULT_MQTT_TOPIC: &str = "server/conditions";
pub const DEFAULT_DEVICE_PATH: &str = "/dev/sht4x";
pub const DEFAULT_REPORT_PERIOD: u64 = 60;
pub const DEFAULT_STATS_PERIOD: u64 = 300;
pub const DEFAULT_RECOVERY_ATTEMPTS: u64 = 1;
pub const DEFAULT_RECOVERY_DELAY: u64 = 5;

/// Command-line flags. Each one overrides the config key of the same name.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "sht4x-reader")]
#[command(version, about = "Publish SHT4x sensor readings to an MQTT broker", long_about = None)]
pub struct Args {
    /// Path to configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Client name; a random suffix is appended.
    #[arg(long, value_name = "NAME")]
    pub mqtt_client: Option<String>,

    /// Broker URI (mqtt://host[:port] or mqtts://host[:port]).
    #[arg(long, value_name = "URI")]
    pub mqtt_server: Option<String>,

    /// Topic readings are published to.
    #[arg(long, value_name = "TOPIC")]
    pub mqtt_topic: Option<String>,

    /// Skip certificate validation for mqtts:// (true/false).
    #[arg(long, value_name = "BOOL")]
    pub mqtt_tls_insecure: Option<String>,

    /// Sensor device node.
    #[arg(long, value_name = "PATH")]
    pub device_path: Option<String>,

    /// Seconds between published readings.
    #[arg(long, value_name = "SECS")]
    pub report_period: Option<String>,

    /// Seconds between statistics log lines.
    #[arg(long, value_name = "SECS")]
    pub stats_period: Option<String>,

    /// Reopen attempts after a device failure before giving up.
    #[arg(long, value_name = "COUNT")]
    pub recovery_attempts: Option<String>,

    /// Seconds to wait before each reopen attempt.
    #[arg(long, value_name = "SECS")]
    pub recovery_delay: Option<String>,

    /// Verbose logging (true/false).
    #[arg(long, value_name = "BOOL")]
    pub debug: Option<String>,
}

impl Args {
    /// Flag values keyed by their configuration key.
    pub fn overrides(&self) -> Vec<(&'static str, &str)> {
        [
            (keys::MQTT_CLIENT, &self.mqtt_client),
            (keys::MQTT_SERVER, &self.mqtt_server),
            (keys::MQTT_TOPIC, &self.mqtt_topic),
            (keys::MQTT_TLS_INSECURE, &self.mqtt_tls_insecure),
            (keys::DEVICE_PATH, &self.device_path),
            (keys::REPORT_PERIOD, &self.report_period),
            (keys::STATS_PERIOD, &self.stats_period),
            (keys::RECOVERY_ATTEMPTS, &self.recovery_attempts),
            (keys::RECOVERY_DELAY, &self.recovery_delay),
            (keys::DEBUG, &self.debug),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }

    /// The config file to read.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

/// Bounded key/value store with last-write-wins semantics.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    entries: Vec<(String, String)>,
    capacity: usize,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Create an empty store holding up to [`DEFAULT_CAPACITY`] keys.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty store with a custom key limit.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite a value.
    ///
    /// Returns `false` if the key is new and the store is full; the entry is
    /// dropped with a warning.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
            return true;
        }
        if self.entries.len() >= self.capacity {
            warn!("Too many config entries, ignoring {}={}", key, value);
            return false;
        }
        self.entries.push((key.to_string(), value.to_string()));
        true
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// String value or the default.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Integer value or the default.
    ///
    /// Accepts decimal and `0x`-prefixed hexadecimal.
    pub fn get_integer(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            None => default,
            Some(value) => parse_integer(value).unwrap_or_else(|| {
                warn!(
                    "Invalid integer value '{}' for key '{}', using default {}",
                    value, key, default
                );
                default
            }),
        }
    }

    /// Non-negative integer value or the default.
    pub fn get_unsigned(&self, key: &str, default: u64) -> u64 {
        let value = self.get_integer(key, default as i64);
        u64::try_from(value).unwrap_or_else(|_| {
            warn!(
                "Negative value {} for key '{}', using default {}",
                value, key, default
            );
            default
        })
    }

    /// Boolean value or the default.
    ///
    /// Accepts `true`/`false` in any case and `1`/`0`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(value) => parse_bool(value).unwrap_or_else(|| {
                warn!(
                    "Invalid boolean value '{}' for key '{}', using default {}",
                    value, key, default
                );
                default
            }),
        }
    }

    /// Merge `key=value` lines into the store.
    ///
    /// Blank lines, `#` comments and lines without `=` are skipped. Returns the
    /// number of entries applied.
    pub fn load_str(&mut self, content: &str) -> usize {
        let mut applied = 0;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                debug!("Ignoring config line without '=': {}", trimmed);
                continue;
            };
            if self.set(key.trim(), value.trim()) {
                applied += 1;
            }
        }
        applied
    }

    /// Merge a configuration file into the store.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        Ok(self.load_str(&content))
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") || value == "1" {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value == "0" {
        Some(false)
    } else {
        None
    }
}

/// Resolved service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Broker settings.
    pub mqtt: MqttConfig,
    /// Device and reporting settings.
    pub sensor: SensorConfig,
    /// Recovery settings.
    pub recovery: RecoveryConfig,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_store(&ConfigStore::new())
    }
}

impl Config {
    /// Read the config file named by `args` and apply the flag overrides.
    ///
    /// A missing or unreadable file is logged and treated as empty.
    pub fn load(args: &Args) -> Self {
        let path = args.config_path();
        let mut store = ConfigStore::new();
        match store.load_file(&path) {
            Ok(count) => debug!("Loaded {} entries from {}", count, path.display()),
            Err(e) => warn!("{}", e),
        }
        for (key, value) in args.overrides() {
            store.set(key, value);
        }

        let summary = keys::ALL
            .iter()
            .filter_map(|key| store.get(key).map(|v| format!("{}='{}'", key, v)))
            .collect::<Vec<_>>();
        info!(
            "Configuration file='{}'{}{}",
            path.display(),
            if summary.is_empty() { "" } else { ", " },
            summary.join(", ")
        );

        Self::from_store(&store)
    }

    /// Build typed settings from a store, falling back to defaults.
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            mqtt: MqttConfig {
                server: store.get_string(keys::MQTT_SERVER, DEFAULT_MQTT_SERVER),
                client: store.get_string(keys::MQTT_CLIENT, DEFAULT_MQTT_CLIENT),
                topic: store.get_string(keys::MQTT_TOPIC, DEFAULT_MQTT_TOPIC),
                tls_insecure: store.get_bool(keys::MQTT_TLS_INSECURE, true),
            },
            sensor: SensorConfig {
                device_path: PathBuf::from(store.get_string(keys::DEVICE_PATH, DEFAULT_DEVICE_PATH)),
                report_period: Duration::from_secs(
                    store.get_unsigned(keys::REPORT_PERIOD, DEFAULT_REPORT_PERIOD),
                ),
                stats_period: Duration::from_secs(
                    store.get_unsigned(keys::STATS_PERIOD, DEFAULT_STATS_PERIOD),
                ),
            },
            recovery: RecoveryConfig {
                attempts: u32::try_from(
                    store.get_unsigned(keys::RECOVERY_ATTEMPTS, DEFAULT_RECOVERY_ATTEMPTS),
                )
                .unwrap_or(u32::MAX),
                delay: Duration::from_secs(
                    store.get_unsigned(keys::RECOVERY_DELAY, DEFAULT_RECOVERY_DELAY),
                ),
            },
            debug: store.get_bool(keys::DEBUG, false),
        }
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    /// Broker URI.
    pub server: String,
    /// Client name hint.
    pub client: String,
    /// Publish topic.
    pub topic: String,
    /// Skip certificate validation for TLS connections.
    pub tls_insecure: bool,
}

/// Device and reporting settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Device node to read.
    pub device_path: PathBuf,
    /// Minimum time between published readings.
    pub report_period: Duration,
    /// Minimum time between statistics log lines.
    pub stats_period: Duration,
}

/// Device recovery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Reopen attempts before giving up.
    pub attempts: u32,
    /// Wait before each attempt.
    pub delay: Duration,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.mqtt.server, "mqtt://localhost");
        assert_eq!(config.mqtt.client, "sht4x_reader");
        assert_eq!(config.mqtt.topic, "server/conditions");
        assert!(config.mqtt.tls_insecure);
        assert_eq!(config.sensor.device_path, PathBuf::from("/dev/sht4x"));
        assert_eq!(config.sensor.report_period, Duration::from_secs(60));
        assert_eq!(config.sensor.stats_period, Duration::from_secs(300));
        assert_eq!(config.recovery.attempts, 1);
        assert_eq!(config.recovery.delay, Duration::from_secs(5));
        assert!(!config.debug);
    }

    #[test]
    fn test_load_str() {
        let mut store = ConfigStore::new();
        let applied = store.load_str(
            "# broker\n\
             \n\
             mqtt-server = mqtts://broker:8884  \n\
             \t# indented comment\n\
             report-period=30\n\
             no equals sign here\n\
             mqtt-topic = a=b\n",
        );

        assert_eq!(applied, 3);
        assert_eq!(store.get("mqtt-server"), Some("mqtts://broker:8884"));
        assert_eq!(store.get("report-period"), Some("30"));
        // Only the first '=' splits
        assert_eq!(store.get("mqtt-topic"), Some("a=b"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = ConfigStore::new();
        store.load_str("debug=false\ndebug=true\n");
        assert_eq!(store.len(), 1);
        assert!(store.get_bool("debug", false));
    }

    #[test]
    fn test_capacity_overflow_dropped() {
        let mut store = ConfigStore::with_capacity(2);
        assert!(store.set("a", "1"));
        assert!(store.set("b", "2"));
        assert!(!store.set("c", "3"));
        // Existing keys can still be overwritten when full
        assert!(store.set("a", "10"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some("10"));
        assert_eq!(store.get("c"), None);
    }

    #[test]
    fn test_get_integer() {
        let mut store = ConfigStore::new();
        store.set("dec", "42");
        store.set("hex", "0x1F");
        store.set("neg", "-7");
        store.set("bad", "12abc");
        store.set("empty", "");

        assert_eq!(store.get_integer("dec", 0), 42);
        assert_eq!(store.get_integer("hex", 0), 31);
        assert_eq!(store.get_integer("neg", 0), -7);
        assert_eq!(store.get_integer("bad", 5), 5);
        assert_eq!(store.get_integer("empty", 5), 5);
        assert_eq!(store.get_integer("missing", 9), 9);
    }

    #[test]
    fn test_get_unsigned_rejects_negative() {
        let mut store = ConfigStore::new();
        store.set("report-period", "-10");
        assert_eq!(store.get_unsigned("report-period", 60), 60);
    }

    #[test]
    fn test_get_bool() {
        let mut store = ConfigStore::new();
        store.set("a", "TRUE");
        store.set("b", "0");
        store.set("c", "1");
        store.set("d", "False");
        store.set("e", "yes");

        assert!(store.get_bool("a", false));
        assert!(!store.get_bool("b", true));
        assert!(store.get_bool("c", false));
        assert!(!store.get_bool("d", true));
        // Invalid falls back to default
        assert!(store.get_bool("e", true));
        assert!(!store.get_bool("e", false));
        assert!(store.get_bool("missing", true));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let mut store = ConfigStore::new();
        store.load_str("report-period=soon\ndebug=maybe\nrecovery-attempts=-1\n");
        let config = Config::from_store(&store);
        assert_eq!(config.sensor.report_period, Duration::from_secs(60));
        assert!(!config.debug);
        assert_eq!(config.recovery.attempts, 1);
    }

    #[test]
    fn test_load_file_missing() {
        let mut store = ConfigStore::new();
        let result = store.load_file("/nonexistent/path/sht4x_reader.cfg");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "sht4x-reader",
            "--mqtt-server=mqtt://10.0.0.2",
            "--report-period",
            "15",
            "--debug=true",
        ])
        .unwrap();

        assert_eq!(args.mqtt_server.as_deref(), Some("mqtt://10.0.0.2"));
        assert_eq!(args.report_period.as_deref(), Some("15"));
        assert_eq!(
            args.overrides(),
            vec![
                ("mqtt-server", "mqtt://10.0.0.2"),
                ("report-period", "15"),
                ("debug", "true"),
            ]
        );
        assert_eq!(args.config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_args_reject_unknown_flag() {
        assert!(Args::try_parse_from(["sht4x-reader", "--bogus=1"]).is_err());
    }

    #[test]
    fn test_command_line_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.cfg");
        std::fs::write(
            &path,
            "mqtt-topic = from/file\nreport-period = 120\ndevice-path = /dev/file\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "sht4x-reader".to_string(),
            format!("--config={}", path.display()),
            "--mqtt-topic=from/cli".to_string(),
        ])
        .unwrap();
        let config = Config::load(&args);

        assert_eq!(config.mqtt.topic, "from/cli");
        assert_eq!(config.sensor.report_period, Duration::from_secs(120));
        assert_eq!(config.sensor.device_path, PathBuf::from("/dev/file"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let args = Args {
            config: Some(PathBuf::from("/nonexistent/reader.cfg")),
            device_path: Some("/dev/ttyUSB0".to_string()),
            ..Default::default()
        };
        let config = Config::load(&args);
        assert_eq!(config.sensor.device_path, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.mqtt.server, DEFAULT_MQTT_SERVER);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Read {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let display = format!("{}", error);
        assert!(display.contains("/test/path"));
        assert!(display.contains("not found"));
    }
}
