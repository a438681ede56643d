//! Configuration system for Junction.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $JUNCTION_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/junction/config.toml
//!   3. ~/.config/junction/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{DEFAULT_PORT, HEARTBEAT_INTERVAL_SECS, HOST_TTL_SECS, SESSION_TIMEOUT_MS, TICK_MS};

/// Heartbeat key used when none is configured. Only good for local testing.
pub const DEFAULT_HEARTBEAT_KEY: &str = "junction-insecure-default";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JunctionConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both service sockets bind to.
    pub bind: IpAddr,
    /// UDP and TCP port the service binds. 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pending sessions fail after this many milliseconds.
    pub timeout_ms: u64,
    /// Scheduler period in milliseconds.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hosts silent for this long are evicted from the pool.
    pub host_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Shared passphrase for heartbeat encryption.
    pub key: String,
    /// Reflector only: seconds between heartbeats.
    pub interval_secs: u64,
    /// Reflector only: info blob announced in each heartbeat.
    pub info: String,
    /// Reflector only: rendezvous services to announce to ("host:port").
    pub services: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: SESSION_TIMEOUT_MS,
            tick_ms: TICK_MS,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host_ttl_secs: HOST_TTL_SECS,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_HEARTBEAT_KEY.to_string(),
            interval_secs: HEARTBEAT_INTERVAL_SECS,
            info: String::new(),
            services: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl PoolConfig {
    pub fn host_ttl(&self) -> Duration {
        Duration::from_secs(self.host_ttl_secs)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn uses_default_key(&self) -> bool {
        self.key == DEFAULT_HEARTBEAT_KEY
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("junction")
}

fn home_dir() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl JunctionConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            JunctionConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("JUNCTION_CONFIG")
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
            let text = toml::to_string_pretty(&JunctionConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply JUNCTION_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("JUNCTION_NETWORK__BIND").and_then(|v| v.parse().ok()) {
            self.network.bind = ip;
        }
        if let Some(p) = lookup("JUNCTION_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(ms) = lookup("JUNCTION_SESSION__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.session.timeout_ms = ms;
        }
        if let Some(ms) = lookup("JUNCTION_SESSION__TICK_MS").and_then(|v| v.parse().ok()) {
            self.session.tick_ms = ms;
        }
        if let Some(s) = lookup("JUNCTION_POOL__HOST_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.pool.host_ttl_secs = s;
        }
        if let Some(key) = lookup("JUNCTION_HEARTBEAT__KEY") {
            self.heartbeat.key = key;
        }
        if let Some(list) = lookup("JUNCTION_HEARTBEAT__SERVICES") {
            self.heartbeat.services = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
