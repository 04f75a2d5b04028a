//! # Configuration Management
//!
//! Centralized configuration for the SBTP client and server.
//!
//! This module holds the wire constants, default timeouts, and structured
//! configuration for servers, clients and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Limits
//! - The wire format allows payloads up to 2^64-1 bytes; decoding refuses
//!   anything above `max_payload_size` (16 MB by default) before allocating

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Version tag opening every packet
pub const PACKET_VERSION: &[u8; 6] = b"SBTPv1";

/// Separator following the version tag and the content length
pub const BYTE_NULL: u8 = 0x00;

/// End-of-transmission byte closing every packet
pub const BYTE_EOT: u8 = 0x04;

/// Size of the fixed header: tag(6) + NUL(1) + length(8) + NUL(1)
pub const HEADER_LEN: usize = 16;

/// Size of the trailer (the EOT byte)
pub const TRAILER_LEN: usize = 1;

/// Max allowed payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default client read/write/dial timeout
pub const CLIENT_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default server per-connection and accept timeout
pub const SERVER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest server timeout; smaller values are raised to this
pub const SERVER_MIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Longest server timeout; larger values are lowered to this
pub const SERVER_MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// How often `Server::stop` wakes while waiting for the accept loop to exit
pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SBTP_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("SBTP_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(timeout) = std::env::var("SBTP_SERVER_TIMEOUT_MS") {
            config.server.timeout = parse_millis("SBTP_SERVER_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(timeout) = std::env::var("SBTP_CLIENT_TIMEOUT_MS") {
            config.client.timeout = parse_millis("SBTP_CLIENT_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(size) = std::env::var("SBTP_MAX_PAYLOAD_SIZE") {
            let val = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SBTP_MAX_PAYLOAD_SIZE '{size}': {e}"))
            })?;
            config.server.max_payload_size = val;
            config.client.max_payload_size = val;
        }

        if let Ok(level) = std::env::var("SBTP_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid SBTP_LOG_LEVEL '{level}'"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_millis(var: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ProtocolError::ConfigError(format!("Invalid {var} '{value}': {e}")))
}

fn validate_payload_limit(errors: &mut Vec<String>, max_payload_size: usize) {
    if max_payload_size == 0 {
        errors.push("Max payload size cannot be 0".to_string());
    } else if max_payload_size > 1024 * 1024 * 1024 {
        errors.push(format!(
            "Max payload size too large: {max_payload_size} bytes (maximum recommended: 1 GB)"
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Per-connection read/write timeout, also the accept wake-up period
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Largest request payload the server will allocate for
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            timeout: SERVER_DEFAULT_TIMEOUT,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        // Every accept, read and write on the server is bounded by this
        if self.timeout < SERVER_MIN_TIMEOUT {
            errors.push("Server timeout too short (minimum: 10ms)".to_string());
        } else if self.timeout > SERVER_MAX_TIMEOUT {
            errors.push("Server timeout too long (maximum: 1 hour)".to_string());
        }

        validate_payload_limit(&mut errors, self.max_payload_size);

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Transport used to dial the server ("tcp" or "unix")
    pub transport: String,

    /// Target server address
    pub address: String,

    /// Timeout for dialing and for each read or write
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Largest response payload the client will allocate for
    pub max_payload_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: String::from("tcp"),
            address: String::from("127.0.0.1:9000"),
            timeout: CLIENT_DEFAULT_TIMEOUT,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.transport.parse::<crate::transport::TransportKind>() {
            errors.push(e.to_string());
        }

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        }

        if self.timeout.is_zero() {
            errors.push("Client timeout must be greater than 0".to_string());
        } else if self.timeout.as_secs() > 3600 {
            errors.push("Client timeout too long (maximum: 1 hour)".to_string());
        }

        validate_payload_limit(&mut errors, self.max_payload_size);

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("sbtp"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
