//! # Configuration
//!
//! Plain serde structs with defaults for every knob of the bridge. Missing sections and
//! missing keys fall back to the defaults below, so an empty TOML document is a valid
//! configuration.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on a single encoded or decoded message (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': '{source}'")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': '{source}'")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grpc: ConnectionConfig,
    pub descriptor_set: DescriptorSetConfig,
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Target server and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host of the target server. Defaults to "localhost".
    pub host: String,
    /// Port of the target server. Defaults to 50051.
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Applied to both directions of every call.
    pub max_message_size: usize,
    pub keep_alive: KeepAliveConfig,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionConfig {
    /// The `http://host:port` URI the channel dials.
    pub fn target(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 50051,
            connect_timeout_secs: 5,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            keep_alive: KeepAliveConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// HTTP/2 keep-alive pings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Keep pinging while no call is in flight.
    pub permit_without_stream: bool,
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 5,
            permit_without_stream: true,
        }
    }
}

/// Bounded retry loop used by [`crate::ServiceDiscoverer::reconnect`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Delay between two consecutive attempts, in milliseconds.
    pub interval_ms: u64,
}

impl ReconnectPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 5_000,
        }
    }
}

/// Precompiled `FileDescriptorSet` used instead of, or before, server reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSetConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    /// Try the descriptor set first and fall back to reflection. When false, reflection is
    /// tried first and the descriptor set is the fallback.
    pub prefer_over_reflection: bool,
    /// Surface comments and source locations from the set's `SourceCodeInfo`.
    pub include_source_info: bool,
}

impl DescriptorSetConfig {
    /// The configured path, only when the store is enabled.
    pub fn active_path(&self) -> Option<&Path> {
        if self.enabled {
            self.path.as_deref()
        } else {
            None
        }
    }

    /// The configured path, only when the store is enabled and tried before reflection.
    ///
    /// Discovery can then complete without a live connection.
    pub fn preferred_path(&self) -> Option<&Path> {
        self.active_path().filter(|_| self.prefer_over_reflection)
    }
}

impl Default for DescriptorSetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            prefer_over_reflection: true,
            include_source_info: true,
        }
    }
}
