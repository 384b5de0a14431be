//! Client configuration.
//!
//! All settings live in `~/.config/linkcall/config.toml` by default. Missing
//! sections and keys fall back to their defaults, so an empty file is valid.
//!
//! `server.token` supports secret references (see [`crate::secret`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use linkcall_signaling::PeerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::correlator::CorrelatorConfig;
use crate::secret::{self, SecretError};
use crate::transport::{HeartbeatConfig, ReconnectPolicy, TransportConfig};

/// Growth factor of the exponential reconnect policy.
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Errors loading or interpreting the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cannot resolve `server.token`: {0}")]
    Secret(#[from] SecretError),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Configuration for the linkcall client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug logging.
    pub debug: bool,
    pub server: ServerSettings,
    pub transport: TransportSettings,
    pub signaling: SignalingSettings,
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Bearer token (supports `pass::` and `env::` prefixes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            token: None,
        }
    }
}

/// Reconnect delay schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    #[default]
    Fixed,
    Exponential,
}

/// Link timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub request_timeout_secs: u64,
    pub watchdog_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub reconnect: ReconnectMode,
    /// Fixed delay, or the first delay of the exponential schedule.
    pub reconnect_delay_ms: u64,
    /// Cap of the exponential schedule.
    pub max_reconnect_delay_ms: u64,
    /// 0 retries forever.
    pub max_reconnect_attempts: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            watchdog_secs: 10,
            heartbeat_interval_secs: 10,
            pong_timeout_secs: 5,
            reconnect: ReconnectMode::Fixed,
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 0,
        }
    }
}

/// Peer connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// STUN/TURN URLs. Empty uses the public STUN defaults.
    pub ice_servers: Vec<String>,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            ice_servers: PeerConfig::default()
                .ice_servers
                .into_iter()
                .flat_map(|server| server.urls)
                .collect(),
        }
    }
}

impl ClientConfig {
    /// Loads the default file, or the defaults when it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("linkcall")
    }

    /// Checks every value without resolving secrets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_url()?;

        let t = &self.transport;
        for (key, value) in [
            ("transport.request_timeout_secs", t.request_timeout_secs),
            ("transport.watchdog_secs", t.watchdog_secs),
            ("transport.heartbeat_interval_secs", t.heartbeat_interval_secs),
            ("transport.pong_timeout_secs", t.pong_timeout_secs),
            ("transport.reconnect_delay_ms", t.reconnect_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        if t.reconnect == ReconnectMode::Exponential && t.max_reconnect_delay_ms < t.reconnect_delay_ms
        {
            return Err(ConfigError::invalid(
                "transport.max_reconnect_delay_ms",
                "must not be below reconnect_delay_ms",
            ));
        }

        if let Some(bad) = self
            .signaling
            .ice_servers
            .iter()
            .find(|u| !["stun:", "turn:", "turns:"].iter().any(|p| u.starts_with(p)))
        {
            return Err(ConfigError::invalid(
                "signaling.ice_servers",
                format!("`{}` is not a stun:, turn: or turns: URL", bad),
            ));
        }
        Ok(())
    }

    /// The parsed endpoint.
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server.url)
            .map_err(|e| ConfigError::invalid("server.url", e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::invalid(
                "server.url",
                format!("expected ws:// or wss://, got {}://", other),
            )),
        }
    }

    /// Builds the transport configuration, resolving the token.
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let t = &self.transport;
        let reconnect = match t.reconnect {
            ReconnectMode::Fixed => ReconnectPolicy::Fixed {
                delay: Duration::from_millis(t.reconnect_delay_ms),
            },
            ReconnectMode::Exponential => ReconnectPolicy::Exponential {
                initial: Duration::from_millis(t.reconnect_delay_ms),
                max: Duration::from_millis(t.max_reconnect_delay_ms),
                multiplier: BACKOFF_MULTIPLIER,
            },
        };

        let token = match self.server.token.as_deref() {
            Some(value) => Some(secret::resolve(value)?),
            None => None,
        };

        Ok(TransportConfig {
            token: token.filter(|t| !t.is_empty()),
            watchdog: Duration::from_secs(t.watchdog_secs),
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(t.heartbeat_interval_secs),
                pong_timeout: Duration::from_secs(t.pong_timeout_secs),
            },
            reconnect,
            max_reconnect_attempts: (t.max_reconnect_attempts > 0)
                .then_some(t.max_reconnect_attempts),
            ..TransportConfig::default()
        })
    }

    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            timeout: Duration::from_secs(self.transport.request_timeout_secs),
        }
    }

    pub fn peer_config(&self) -> PeerConfig {
        if self.signaling.ice_servers.is_empty() {
            PeerConfig::default()
        } else {
            PeerConfig::from_urls(self.signaling.ice_servers.iter().cloned())
        }
    }
}
