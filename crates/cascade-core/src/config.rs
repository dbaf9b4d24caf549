//! Configuration system for the Cascade coordinator.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CASCADE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cascade/config.toml
//!   3. ~/.config/cascade/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub coordinator: CoordinatorSettings,
    pub network: NetworkConfig,
    pub chain: ChainSettings,
}

/// Round timing and durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Mixing service name negotiated with the chain.
    pub service: String,
    /// Length of the client submission window.
    pub mix_wait_ms: u64,
    /// Pause between closing one round and opening the next.
    pub round_wait_ms: u64,
    /// Delay between the round-open announcement and negotiation.
    pub announce_delay_ms: u64,
    /// Backoff after a failed negotiation.
    pub retry_delay_ms: u64,
    /// Per-member timeout for settings negotiation. 0 = no timeout.
    /// Batch runs are never timed out.
    pub rpc_timeout_ms: u64,
    /// File holding the persisted round counter. Required.
    pub persist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// JSON file describing the mix chain.
    pub config_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            service: "Convo".to_string(),
            mix_wait_ms: 10_000,
            round_wait_ms: 5_000,
            announce_delay_ms: 500,
            retry_delay_ms: 10_000,
            rpc_timeout_ms: 60_000,
            persist_path: Some(data_dir().join("coordinator-state.json")),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            config_path: config_dir().join("chain.json"),
        }
    }
}

impl CoordinatorSettings {
    pub fn mix_wait(&self) -> Duration {
        Duration::from_millis(self.mix_wait_ms)
    }

    pub fn round_wait(&self) -> Duration {
        Duration::from_millis(self.round_wait_ms)
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Option<Duration> {
        (self.rpc_timeout_ms > 0).then(|| Duration::from_millis(self.rpc_timeout_ms))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cascade")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("cascade")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to parse {0}: {1}")]
    ParseJsonFailed(PathBuf, serde_json::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("chain config is for service {got:?}, coordinator runs {expected:?}")]
    ServiceMismatch { expected: String, got: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CascadeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            CascadeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CASCADE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CascadeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CASCADE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CASCADE_COORDINATOR__SERVICE") {
            self.coordinator.service = v;
        }
        if let Some(v) = lookup("CASCADE_COORDINATOR__MIX_WAIT_MS").and_then(|v| v.parse().ok()) {
            self.coordinator.mix_wait_ms = v;
        }
        if let Some(v) = lookup("CASCADE_COORDINATOR__ROUND_WAIT_MS").and_then(|v| v.parse().ok()) {
            self.coordinator.round_wait_ms = v;
        }
        if let Some(v) =
            lookup("CASCADE_COORDINATOR__ANNOUNCE_DELAY_MS").and_then(|v| v.parse().ok())
        {
            self.coordinator.announce_delay_ms = v;
        }
        if let Some(v) = lookup("CASCADE_COORDINATOR__RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.coordinator.retry_delay_ms = v;
        }
        if let Some(v) = lookup("CASCADE_COORDINATOR__RPC_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.coordinator.rpc_timeout_ms = v;
        }
        if let Some(v) = lookup("CASCADE_COORDINATOR__PERSIST_PATH") {
            self.coordinator.persist_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("CASCADE_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = lookup("CASCADE_CHAIN__CONFIG_PATH") {
            self.chain.config_path = PathBuf::from(v);
        }
    }
}
