//! Configuration system for Punch.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PUNCH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/punch/config.toml
//!   3. ~/.config/punch/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    validate_name, DEFAULT_PORT, KEEPALIVE_INTERVAL_SECS, RPC_ATTEMPTS, RPC_TIMEOUT_MS,
    SETTLE_DELAY_SECS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PunchConfig {
    pub broker: BrokerConfig,
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// UDP address the broker listens on.
    pub bind: String,
    /// Seconds a registration stays visible. 0 = never expire.
    pub registration_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Local UDP address. The same socket talks to the broker and the partner.
    pub bind: String,
    /// Name this peer registers under.
    pub local_name: String,
    /// Name of the partner to look up.
    pub remote_name: String,
    /// Broker address, host:port.
    pub broker: String,
    /// Wait between registration and lookup.
    pub settle_secs: u64,
    /// Keepalive cadence toward the partner.
    pub keepalive_secs: u64,
    /// Per-attempt timeout for broker round trips.
    pub rpc_timeout_ms: u64,
    /// Attempts per broker round trip.
    pub rpc_attempts: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            registration_ttl_secs: 0,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            local_name: "peerA".to_string(),
            remote_name: "peerZ".to_string(),
            broker: format!("127.0.0.1:{DEFAULT_PORT}"),
            settle_secs: SETTLE_DELAY_SECS,
            keepalive_secs: KEEPALIVE_INTERVAL_SECS,
            rpc_timeout_ms: RPC_TIMEOUT_MS,
            rpc_attempts: RPC_ATTEMPTS,
        }
    }
}

impl BrokerConfig {
    pub fn registration_ttl(&self) -> Option<Duration> {
        (self.registration_ttl_secs > 0).then(|| Duration::from_secs(self.registration_ttl_secs))
    }
}

impl PeerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("punch")
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
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PunchConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PunchConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PUNCH_CONFIG")
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
            let text = toml::to_string_pretty(&PunchConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PUNCH_* overrides. `lookup` is `std::env::var` in production.
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PUNCH_BROKER__BIND") {
            self.broker.bind = v;
        }
        if let Some(Ok(v)) = lookup("PUNCH_BROKER__REGISTRATION_TTL_SECS").map(|v| v.parse()) {
            self.broker.registration_ttl_secs = v;
        }
        if let Some(v) = lookup("PUNCH_PEER__BIND") {
            self.peer.bind = v;
        }
        if let Some(v) = lookup("PUNCH_PEER__LOCAL_NAME") {
            self.peer.local_name = v;
        }
        if let Some(v) = lookup("PUNCH_PEER__REMOTE_NAME") {
            self.peer.remote_name = v;
        }
        if let Some(v) = lookup("PUNCH_PEER__BROKER") {
            self.peer.broker = v;
        }
        if let Some(Ok(v)) = lookup("PUNCH_PEER__SETTLE_SECS").map(|v| v.parse()) {
            self.peer.settle_secs = v;
        }
        if let Some(Ok(v)) = lookup("PUNCH_PEER__KEEPALIVE_SECS").map(|v| v.parse()) {
            self.peer.keepalive_secs = v;
        }
        if let Some(Ok(v)) = lookup("PUNCH_PEER__RPC_TIMEOUT_MS").map(|v| v.parse()) {
            self.peer.rpc_timeout_ms = v;
        }
        if let Some(Ok(v)) = lookup("PUNCH_PEER__RPC_ATTEMPTS").map(|v| v.parse()) {
            self.peer.rpc_attempts = v;
        }
    }
}

impl PeerConfig {
    /// Reject settings that cannot produce a working session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });

        if let Err(e) = validate_name(&self.local_name) {
            return invalid("peer.local_name", e.to_string());
        }
        if let Err(e) = validate_name(&self.remote_name) {
            return invalid("peer.remote_name", e.to_string());
        }
        if self.local_name == self.remote_name {
            return invalid("peer.remote_name", "must differ from peer.local_name".into());
        }
        if self.keepalive_secs == 0 {
            return invalid("peer.keepalive_secs", "must be at least 1".into());
        }
        if self.rpc_timeout_ms == 0 {
            return invalid("peer.rpc_timeout_ms", "must be at least 1".into());
        }
        if self.rpc_attempts == 0 {
            return invalid("peer.rpc_attempts", "must be at least 1".into());
        }
        Ok(())
    }
}
