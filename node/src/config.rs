// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node configuration.
//!
//! Loaded from a YAML file; every key is optional. A missing file means
//! defaults. Environment variables override file values either way.

use logpulse_persistence::StoreOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: "8080".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub chunk_size_bytes: u64,
    pub retention_days: u32,
    pub sync_writes: bool,
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/logs"),
            chunk_size_bytes: 1024 * 1024, // 1MB
            retention_days: 7,
            sync_writes: true,
            sweep_interval_secs: 3600,
        }
    }
}

/// What a full ingest buffer does with a new record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer until space frees or its deadline passes.
    #[default]
    Block,
    /// Evict the oldest buffered record.
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    pub enqueue_timeout_ms: u64,
    pub overflow_policy: OverflowPolicy,
    pub flush_max_retries: u32,
    pub flush_retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            flush_interval_ms: 5000,
            enqueue_timeout_ms: 1000,
            overflow_policy: OverflowPolicy::Block,
            flush_max_retries: 3,
            flush_retry_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst: u32,
    /// Limit only the ingest route.
    pub ingest_only: bool,
    pub whitelist_ips: Vec<IpAddr>,
    pub blacklist_ips: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 1000,
            burst: 100,
            ingest_only: false,
            whitelist_ips: Vec::new(),
            blacklist_ips: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent,
    /// then apply process environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    /// Empty values and unparsable numbers are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = get("LOKILITE_PORT") {
            self.server.port = port;
        }
        if let Some(api_key) = get("LOKILITE_API_KEY") {
            self.auth.api_key = api_key;
            self.auth.enabled = true;
        }
        if let Some(path) = get("LOKILITE_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(enabled) = get("LOGPULSE_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = enabled == "true";
        }
        if let Some(rpm) = get("LOGPULSE_RATE_LIMIT_REQUESTS_PER_MINUTE").and_then(|v| v.parse().ok()) {
            self.rate_limit.requests_per_minute = rpm;
        }
        if let Some(burst) = get("LOGPULSE_RATE_LIMIT_BURST").and_then(|v| v.parse().ok()) {
            self.rate_limit.burst = burst;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid("storage.chunk_size_bytes must be positive".into()));
        }
        if self.ingest.buffer_size == 0 {
            return Err(ConfigError::Invalid("ingest.buffer_size must be positive".into()));
        }
        if self.ingest.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("ingest.flush_interval_ms must be positive".into()));
        }
        if self.storage.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("storage.sweep_interval_secs must be positive".into()));
        }
        if self.auth.enabled && self.auth.api_key.is_empty() {
            return Err(ConfigError::Invalid("auth.enabled requires auth.api_key".into()));
        }
        self.bind_addr().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let port: u16 = self
            .server
            .port
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.port {:?} is not a port", self.server.port)))?;
        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::new(&self.storage.path)
            .with_chunk_size(self.storage.chunk_size_bytes)
            .with_sync_writes(self.storage.sync_writes)
    }
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_retry_backoff_ms)
    }
}

impl StorageConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
