// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor reader configuration

use crate::endpoint::{BusUrl, EndpointError, StoreAddress};
use crate::parser::DEFAULT_SAMPLE_LEN;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Relational backend for readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Sqlite,
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// PostgreSQL server (`host:port`)
    pub address: StoreAddress,

    pub database: String,
    pub user: String,

    /// PostgreSQL password (empty = none)
    #[serde(skip_serializing)]
    pub password: String,

    /// SQLite database file (in memory when unset)
    pub path: Option<PathBuf>,

    /// Readings table
    pub table: String,

    /// Value stored for a missing reading
    pub null_sentinel: i32,

    /// Attempts per write before the reading is dropped
    pub write_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            address: StoreAddress::default(),
            database: "postgres".to_string(),
            user: "sensor_reader".to_string(),
            password: String::new(),
            path: None,
            table: "sensor_data".to_string(),
            null_sentinel: 10,
            write_attempts: 3,
        }
    }
}

/// Bus topics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Inbound raw readings
    pub raw_data: String,
    /// Inbound commands
    pub command: String,
    /// Outbound normalized readings
    pub publishing: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            raw_data: "sensors".to_string(),
            command: "app_command".to_string(),
            publishing: "publishing".to_string(),
        }
    }
}

/// Sensor reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bus server URL (`nats://host:port`)
    pub bus_url: BusUrl,

    pub store: StoreConfig,

    pub topics: TopicConfig,

    /// Values per reading
    pub sample_len: usize,

    /// Delay between published readings
    pub report_interval_ms: u64,

    /// Poll interval while idle
    pub standby_poll_ms: u64,

    /// Delay between connection attempts
    pub reconnect_delay_ms: u64,

    /// Upper bound for a single connection attempt
    pub connect_timeout_ms: u64,

    /// Name announced to the bus server
    pub client_name: String,

    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_url: BusUrl::default(),
            store: StoreConfig::default(),
            topics: TopicConfig::default(),
            sample_len: DEFAULT_SAMPLE_LEN,
            report_interval_ms: 5000,
            standby_poll_ms: 200,
            reconnect_delay_ms: 2000,
            connect_timeout_ms: 10_000,
            client_name: "sensor-reader".to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn identifier_regex() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from a TOML file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_len == 0 {
            return Err(ConfigError::Invalid("sample_len must be positive".into()));
        }
        if self.store.write_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store.write_attempts must be at least 1".into(),
            ));
        }
        // the table name is interpolated into SQL
        if !identifier_regex().is_some_and(|re| re.is_match(&self.store.table)) {
            return Err(ConfigError::Invalid(format!(
                "store.table '{}' is not a valid SQL identifier",
                self.store.table
            )));
        }
        if self.topics.raw_data == self.topics.command {
            return Err(ConfigError::Invalid(format!(
                "raw data and command topics must differ (both '{}')",
                self.topics.raw_data
            )));
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn standby_poll(&self) -> Duration {
        Duration::from_millis(self.standby_poll_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    bus_url: Option<BusUrl>,
    store: Option<StoreConfig>,
    topics: Option<TopicConfig>,
    sample_len: Option<usize>,
    report_interval_ms: Option<u64>,
    standby_poll_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    client_name: Option<String>,
}

impl ConfigBuilder {
    pub fn bus_url(mut self, url: BusUrl) -> Self {
        self.bus_url = Some(url);
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    pub fn topics(mut self, topics: TopicConfig) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set the number of values per reading
    pub fn sample_len(mut self, len: usize) -> Self {
        self.sample_len = Some(len);
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn standby_poll(mut self, interval: Duration) -> Self {
        self.standby_poll_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            bus_url: self.bus_url.unwrap_or(defaults.bus_url),
            store: self.store.unwrap_or(defaults.store),
            topics: self.topics.unwrap_or(defaults.topics),
            sample_len: self.sample_len.unwrap_or(defaults.sample_len),
            report_interval_ms: self
                .report_interval_ms
                .unwrap_or(defaults.report_interval_ms),
            standby_poll_ms: self.standby_poll_ms.unwrap_or(defaults.standby_poll_ms),
            reconnect_delay_ms: self
                .reconnect_delay_ms
                .unwrap_or(defaults.reconnect_delay_ms),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or(defaults.connect_timeout_ms),
            client_name: self.client_name.unwrap_or(defaults.client_name),
            log_level: defaults.log_level,
        }
    }
}
