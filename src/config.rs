//! ==============================================================================
//! config.rs - Hub Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults, then lets
//!     command line / environment values (args.rs) override the file.
//!
//! structure:
//!     - ServerConfig: listen port, static dashboard directory.
//!     - BrokerConfig: mqtt broker uri, topic, credentials, timings.
//!     - DeviceDefaults: identifiers stamped on readings that lack them.
//!     - HistoryConfig: ring capacity and default history page size.
//!     - LoggingConfig: log level, per-reading log lines.
//!     - OtaConfig: candidate firmware and its changelog.
//!
//! secrets:
//!     broker credentials have no defaults. set them through MQTT_USERNAME /
//!     MQTT_PASSWORD rather than committing them to hub.toml.
//!
//! ==============================================================================

use crate::args::Args;
use crate::normalize::DeviceDefaults;
use crate::ota::OtaConfig;
use crate::store::DEFAULT_CAPACITY;

use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub device: DeviceDefaults,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ota: OtaConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// directory holding index.html and friends
    pub static_dir: PathBuf,
    /// reported by /api/status; true when served behind tls termination
    pub ssl: bool,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    /// mqtts:// (tls) or mqtt:// (plain, local development only)
    pub uri: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    /// page size for /api/sensor-history when no limit is given
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000, static_dir: PathBuf::from("public"), ssl: true }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "mqtts://localhost:8883".to_string(),
            topic: "climate/telemetry".to_string(),
            client_id: "climate-hub".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

// keep the password out of debug output
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("uri", &self.uri)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .finish()
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, default_limit: 50 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: {:#}", e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Resolve from the command line: an explicit path must load, otherwise search
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                let config = Self::load(path)?;
                println!("[CONFIG] Loaded from {}", path.display());
                config
            }
            None => Self::load_or_default(),
        };
        config.apply_overrides(args);
        Ok(config)
    }

    /// command line / environment values win over the file
    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(uri) = &args.broker_uri {
            self.broker.uri = uri.clone();
        }
        if let Some(topic) = &args.topic {
            self.broker.topic = topic.clone();
        }
        if let Some(client_id) = &args.client_id {
            self.broker.client_id = client_id.clone();
        }
        if let Some(username) = &args.username {
            self.broker.username = Some(username.clone());
        }
        if let Some(password) = &args.password {
            self.broker.password = Some(password.clone());
        }
        if let Some(device_id) = &args.device_id {
            self.device.device_id = device_id.clone();
        }
        if let Some(version) = &args.firmware_version {
            self.device.firmware_version = version.clone();
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let credentials = match (&self.broker.username, &self.broker.password) {
            (Some(_), Some(_)) => "set",
            (Some(_), None) => "username only",
            _ => "not set",
        };
        println!("┌─────────────────────────────────────────┐");
        println!("│            HUB CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Port: {}", self.server.port);
        println!("│ Broker: {}", self.broker.uri);
        println!("│ Topic: {}", self.broker.topic);
        println!("│ Credentials: {}", credentials);
        println!("│ History Capacity: {}", self.history.capacity);
        println!("│ Default Device: {} (fw {})", self.device.device_id, self.device.firmware_version);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
