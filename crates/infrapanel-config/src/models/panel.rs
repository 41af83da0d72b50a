use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::lifecycle::{LifecycleConfig, MonitorConfig};
use super::logging::{LogType, LoggingConfig};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON array holding every server record.
    pub registry_path: PathBuf,
    /// Parent of the per-server working directories.
    pub servers_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("data/servers.json"),
            servers_dir: PathBuf::from("servers"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub lifecycle: LifecycleConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl PanelConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PanelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(
            log_type = LogType::Config.as_str(),
            "Loading configuration from {}",
            path.display()
        );

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.java_path.trim().is_empty() {
            return Err(ConfigError::invalid("lifecycle.java_path must not be empty"));
        }
        if self.lifecycle.stop_command.trim().is_empty() {
            return Err(ConfigError::invalid(
                "lifecycle.stop_command must not be empty",
            ));
        }
        if self.monitor.stats_interval.is_zero() {
            return Err(ConfigError::invalid("monitor.stats_interval must be > 0"));
        }
        if self.monitor.recovered_watch_interval.is_zero() {
            return Err(ConfigError::invalid(
                "monitor.recovered_watch_interval must be > 0",
            ));
        }
        if self.storage.registry_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("storage.registry_path must be set"));
        }
        Ok(())
    }
}
