//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `chatlink` binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use http::Uri;
use serde::{Deserialize, Serialize};

use crate::codec::{GzipCodec, DEFAULT_LEVEL, DEFAULT_MAX_FRAME_BYTES};
use crate::error::{ChatLinkError, Result};
use crate::protocol::KeyPolicy;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Client-side cooldowns
    #[serde(default)]
    pub limits: RateLimitConfig,

    /// Frame codec configuration
    #[serde(default)]
    pub codec: CodecConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ChatLinkError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| ChatLinkError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("CHATLINK_ENDPOINT") {
            config.client.endpoint = endpoint;
        }
        if let Ok(delay) = std::env::var("CHATLINK_RECONNECT_DELAY_MS") {
            if let Ok(delay) = delay.parse() {
                config.client.reconnect_delay_ms = delay;
            }
        }
        if let Ok(policy) = std::env::var("CHATLINK_KEY_POLICY") {
            match policy.parse() {
                Ok(policy) => config.client.key_policy = policy,
                Err(e) => tracing::warn!(error = %e, "Ignoring CHATLINK_KEY_POLICY"),
            }
        }

        config
    }

    /// Default config file location (`<config dir>/chatlink/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("chatlink").join("config.toml"))
    }

    /// File (explicit, or the default path when it exists) overlaid with the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        Ok(file.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let client_defaults = ClientConfig::default();
        Self {
            client: ClientConfig {
                endpoint: if other.client.endpoint != client_defaults.endpoint {
                    other.client.endpoint
                } else {
                    self.client.endpoint
                },
                reconnect_delay_ms: if other.client.reconnect_delay_ms
                    != client_defaults.reconnect_delay_ms
                {
                    other.client.reconnect_delay_ms
                } else {
                    self.client.reconnect_delay_ms
                },
                connect_timeout_secs: if other.client.connect_timeout_secs
                    != client_defaults.connect_timeout_secs
                {
                    other.client.connect_timeout_secs
                } else {
                    self.client.connect_timeout_secs
                },
                key_policy: if other.client.key_policy != client_defaults.key_policy {
                    other.client.key_policy
                } else {
                    self.client.key_policy
                },
                event_capacity: if other.client.event_capacity != client_defaults.event_capacity {
                    other.client.event_capacity
                } else {
                    self.client.event_capacity
                },
            },
            limits: if other.limits != RateLimitConfig::default() {
                other.limits
            } else {
                self.limits
            },
            codec: if other.codec != CodecConfig::default() {
                other.codec
            } else {
                self.codec
            },
        }
    }

    /// Check everything a connection needs before one is attempted
    pub fn validate(&self) -> Result<()> {
        self.client.endpoint_uri()?;
        if self.codec.compression_level > 9 {
            return Err(ChatLinkError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.codec.compression_level
            )));
        }
        Ok(())
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint (`ws://` or `wss://`)
    pub endpoint: String,

    /// Delay between connection attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Per-attempt connect timeout in seconds; also bounds a single send
    pub connect_timeout_secs: u64,

    /// When the session key is regenerated
    pub key_policy: KeyPolicy,

    /// Capacity of the connection event channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            reconnect_delay_ms: 1000,
            connect_timeout_secs: 10,
            key_policy: KeyPolicy::PerConnection,
            event_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Configuration for an endpoint with everything else defaulted
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parse and validate the endpoint.
    pub fn endpoint_uri(&self) -> Result<Uri> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ChatLinkError::Config("No endpoint configured".to_string()));
        }

        let uri: Uri = endpoint
            .parse()
            .map_err(|e| ChatLinkError::Config(format!("Invalid endpoint {endpoint}: {e}")))?;

        match uri.scheme_str() {
            Some("ws" | "wss") => {},
            other => {
                return Err(ChatLinkError::Config(format!(
                    "Endpoint scheme must be ws or wss, got {}",
                    other.unwrap_or("none")
                )))
            },
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(ChatLinkError::Config(format!(
                "Endpoint {endpoint} has no host"
            )));
        }
        Ok(uri)
    }

    /// Delay between connection attempts
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Per-attempt connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Client-side cooldowns per action category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Cooldown for login, account creation and verification requests (ms)
    pub pre_authentication_cooldown_ms: u64,

    /// Cooldown for relationship updates (ms)
    pub relationship_update_cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            pre_authentication_cooldown_ms: 3000,
            relationship_update_cooldown_ms: 1000,
        }
    }
}

/// Frame codec configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Gzip level (0-9)
    pub compression_level: u32,

    /// Largest inflated frame accepted, in bytes
    pub max_frame_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_LEVEL,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl CodecConfig {
    /// Gzip codec for these settings
    pub fn gzip(&self) -> GzipCodec {
        GzipCodec::with_level(self.compression_level).with_max_output(self.max_frame_bytes)
    }
}
