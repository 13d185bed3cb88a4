//! Configuration surface: the top-level `wharfctl.toml` (host knobs) and
//! the per-app YAML files under the workspace's `apps/` directory.

pub mod app;
pub mod duration;

pub use app::{load_app, load_workspace, merge_environment, App, ConfigError};

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub proxy: ProxyAdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyAdminConfig {
    #[serde(default = "default_admin_url")]
    pub admin_url: String,
}

impl Default for ProxyAdminConfig {
    fn default() -> Self {
        Self { admin_url: default_admin_url() }
    }
}

fn default_admin_url() -> String {
    "http://localhost:2019".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_file")]
    pub file_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: default_db_file(),
        }
    }
}

fn default_db_file() -> String {
    "wharfctl.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_socket")]
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
        }
    }
}

fn default_docker_socket() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "/var/run/docker.sock".to_string()
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            tracing::info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
            docker: DockerConfig::default(),
            proxy: ProxyAdminConfig::default(),
        }
    }
}

/// Resolve the db file path relative to the workspace root.
pub fn db_path(workspace_root: &std::path::Path, config: &Config) -> PathBuf {
    workspace_root.join(&config.store.file_name)
}
