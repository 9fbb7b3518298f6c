//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SKIFF_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use skiff_protocol::codec::{DEFAULT_MAX_CONTAINER_LEN, DEFAULT_MAX_DEPTH, DEFAULT_MAX_STRING_LEN};
use skiff_protocol::{CodecOptions, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Wire protocol limits.
    pub protocol: ProtocolConfig,
    /// Handler dispatch configuration.
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SKIFF_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a `SKIFF_*` variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&lookup);
        self.protocol.apply_overrides(&lookup);
        self.dispatch.apply_overrides(&lookup);
    }

    /// Checks that limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.protocol.max_frame_size == 0 || self.protocol.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::ValidationError(format!(
                "protocol.max_frame_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.protocol.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "protocol.max_depth must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("SKIFF_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(timeout) = lookup("SKIFF_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Some(max) = lookup("SKIFF_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Wire protocol limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Reject envelopes without the version word.
    pub strict_read: bool,
    /// Write envelopes with the version word.
    pub strict_write: bool,
    /// Largest accepted string or binary field.
    pub max_string_len: usize,
    /// Largest accepted list, set or map.
    pub max_container_len: usize,
    /// Deepest accepted struct/container nesting.
    pub max_depth: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            strict_read: true,
            strict_write: true,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_container_len: DEFAULT_MAX_CONTAINER_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ProtocolConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(size) = lookup("SKIFF_MAX_FRAME_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_frame_size = n;
            }
        }
        if let Some(strict) = lookup("SKIFF_STRICT_READ") {
            self.strict_read = parse_bool(&strict);
        }
        if let Some(strict) = lookup("SKIFF_STRICT_WRITE") {
            self.strict_write = parse_bool(&strict);
        }
        if let Some(len) = lookup("SKIFF_MAX_STRING_LEN") {
            if let Ok(n) = len.parse() {
                self.max_string_len = n;
            }
        }
        if let Some(len) = lookup("SKIFF_MAX_CONTAINER_LEN") {
            if let Ok(n) = len.parse() {
                self.max_container_len = n;
            }
        }
        if let Some(depth) = lookup("SKIFF_MAX_DEPTH") {
            if let Ok(n) = depth.parse() {
                self.max_depth = n;
            }
        }
    }

    /// Returns the codec options these limits describe.
    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions::new()
            .with_strict_read(self.strict_read)
            .with_strict_write(self.strict_write)
            .with_max_string_len(self.max_string_len)
            .with_max_container_len(self.max_container_len)
            .with_max_depth(self.max_depth)
    }
}

/// Handler dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum handler invocations running at once per connection.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 64 }
    }
}

impl DispatchConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(max) = lookup("SKIFF_MAX_IN_FLIGHT") {
            if let Ok(n) = max.parse() {
                self.max_in_flight = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.protocol.max_frame_size, 16 * 1024 * 1024);
        assert!(config.protocol.strict_read);
        assert_eq!(config.dispatch.max_in_flight, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.protocol.max_depth, config.protocol.max_depth);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:7000\"\nprotocol:\n  strict_read: false\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 7000);
        assert!(!config.protocol.strict_read);
        // untouched sections keep their defaults
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.dispatch.max_in_flight, 64);
    }

    #[test]
    fn test_from_file_errors() {
        let err = Config::from_file("/nonexistent/skiff.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network: [not, a, map]").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SKIFF_BIND", "127.0.0.1:6000"),
            ("SKIFF_MAX_IN_FLIGHT", "8"),
            ("SKIFF_STRICT_WRITE", "false"),
            ("SKIFF_MAX_DEPTH", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.network.bind_addr.port(), 6000);
        assert_eq!(config.dispatch.max_in_flight, 8);
        assert!(!config.protocol.strict_write);
        assert_eq!(config.protocol.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.dispatch.max_in_flight = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.protocol.max_frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_codec_options() {
        let mut config = ProtocolConfig::default();
        config.strict_read = false;
        config.max_depth = 8;
        let options = config.codec_options();
        assert!(!options.strict_read);
        assert!(options.strict_write);
        assert_eq!(options.max_depth, 8);
    }
}
