//! Per-app declarative configuration (one YAML file per app).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::duration::deserialize_duration;

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub docker: DockerSpec,
    pub ports: Ports,
    #[serde(default)]
    pub health_check: HealthCheckSpec,
    #[serde(default)]
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub proxy: ProxySpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerSpec {
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub environment_overrides: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub volumes: Vec<String>,
    pub expose_port: u16,
    pub network: Option<String>,
}

impl Default for DockerSpec {
    fn default() -> Self {
        Self {
            restart_policy: default_restart_policy(),
            pull_policy: default_pull_policy(),
            memory_limit: None,
            cpu_limit: None,
            environment: HashMap::new(),
            environment_overrides: HashMap::new(),
            volumes: Vec::new(),
            expose_port: 0,
            network: None,
        }
    }
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

fn default_pull_policy() -> String {
    "always".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Ports {
    pub blue: u16,
    pub green: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckSpec {
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default = "default_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            endpoint: None,
            method: default_method(),
            timeout: default_timeout(),
            interval: default_interval(),
            retries: default_retries(),
            success_threshold: default_success_threshold(),
            expected_status: default_expected_status(),
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_retries() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    1
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default = "default_startup_delay", deserialize_with = "deserialize_duration")]
    pub startup_delay: Duration,
    #[serde(default = "default_drain_timeout", deserialize_with = "deserialize_duration")]
    pub drain_timeout: Duration,
    #[serde(default = "default_stop_timeout", deserialize_with = "deserialize_duration")]
    pub stop_timeout: Duration,
    #[serde(default)]
    pub auto_rollback: bool,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            startup_delay: default_startup_delay(),
            drain_timeout: default_drain_timeout(),
            stop_timeout: default_stop_timeout(),
            auto_rollback: false,
        }
    }
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(0)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySpec {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub host: Option<String>,
    pub path_prefix: Option<String>,
}

impl Default for ProxySpec {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            host: None,
            path_prefix: None,
        }
    }
}

fn default_listen_port() -> u16 {
    443
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("app name '{name}' must be non-empty and match the filename stem '{stem}'")]
    NameMismatch { name: String, stem: String },
    #[error("app '{app}': expose_port must be > 0")]
    ExposePort { app: String },
    #[error("app '{app}': blue_port ({blue}) must differ from green_port ({green})")]
    PortCollision { app: String, blue: u16, green: u16 },
    #[error("app '{app}': ports must be > 0")]
    ZeroPort { app: String },
    #[error("app '{app}': success_threshold must be >= 1")]
    SuccessThreshold { app: String },
    #[error("app '{app}': expected_status must be in 100..600, got {status}")]
    ExpectedStatus { app: String, status: u16 },
    #[error("app '{app}': environment_overrides key '{key}' is not 'blue' or 'green'")]
    BadOverrideColor { app: String, key: String },
    #[error(
        "port tuple (expose={expose}, blue={blue}, green={green}, proxy_listen={listen}) for app '{app}' collides with app '{other}'"
    )]
    GlobalPortCollision {
        app: String,
        other: String,
        expose: u16,
        blue: u16,
        green: u16,
        listen: u16,
    },
}

/// Load and validate a single app config file. `retries >= 0` is implied
/// by the field type (`u32`) and needs no runtime check.
/// Content-hash fingerprint used to detect unchanged app config across
/// `InsertAppConfig` calls (spec §3, §8 property 5/6).
pub fn fingerprint(payload: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn load_app(path: &Path) -> Result<App, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let app: App = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    validate_app(&app, &stem)?;
    Ok(app)
}

fn validate_app(app: &App, filename_stem: &str) -> Result<(), ConfigError> {
    if app.name.is_empty() || app.name != filename_stem {
        return Err(ConfigError::NameMismatch {
            name: app.name.clone(),
            stem: filename_stem.to_string(),
        });
    }
    if app.docker.expose_port == 0 {
        return Err(ConfigError::ExposePort { app: app.name.clone() });
    }
    if app.ports.blue == 0 || app.ports.green == 0 {
        return Err(ConfigError::ZeroPort { app: app.name.clone() });
    }
    if app.ports.blue == app.ports.green {
        return Err(ConfigError::PortCollision {
            app: app.name.clone(),
            blue: app.ports.blue,
            green: app.ports.green,
        });
    }
    if app.health_check.success_threshold < 1 {
        return Err(ConfigError::SuccessThreshold { app: app.name.clone() });
    }
    if !(100..600).contains(&app.health_check.expected_status) {
        return Err(ConfigError::ExpectedStatus {
            app: app.name.clone(),
            status: app.health_check.expected_status,
        });
    }
    for key in app.docker.environment_overrides.keys() {
        if key != "blue" && key != "green" {
            return Err(ConfigError::BadOverrideColor {
                app: app.name.clone(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

/// Load every `apps/*.yaml` file and check the global port-uniqueness
/// invariant from spec §3 across the whole set.
pub fn load_workspace(apps_dir: &Path) -> Result<Vec<App>, ConfigError> {
    let mut apps = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(apps_dir)
        .map_err(|source| ConfigError::Read {
            path: apps_dir.display().to_string(),
            source,
        })?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|ext| ext == "yaml" || ext == "yml").unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        apps.push(load_app(&entry.path())?);
    }

    check_global_uniqueness(&apps)?;
    Ok(apps)
}

fn check_global_uniqueness(apps: &[App]) -> Result<(), ConfigError> {
    let mut seen: Vec<(&str, u16, u16, u16, u16)> = Vec::new();
    for app in apps {
        let tuple = (
            app.name.as_str(),
            app.docker.expose_port,
            app.ports.blue,
            app.ports.green,
            app.proxy.listen_port,
        );
        for (other, expose, blue, green, listen) in &seen {
            if tuple.1 == *expose && tuple.2 == *blue && tuple.3 == *green && tuple.4 == *listen {
                return Err(ConfigError::GlobalPortCollision {
                    app: app.name.clone(),
                    other: other.to_string(),
                    expose: tuple.1,
                    blue: tuple.2,
                    green: tuple.3,
                    listen: tuple.4,
                });
            }
        }
        seen.push(tuple);
    }
    Ok(())
}

/// Merge base environment with a color's overrides per spec §4.B:
/// override keys replace base keys, absent overrides leave base unchanged,
/// no other keys appear.
pub fn merge_environment(app: &App, color: crate::color::Color) -> HashMap<String, String> {
    let mut merged = app.docker.environment.clone();
    if let Some(overrides) = app.docker.environment_overrides.get(color.as_str()) {
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use std::io::Write;

    fn write_yaml(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(format!("{}.yaml", name));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const MINIMAL: &str = r#"
name: web-api
docker:
  expose_port: 8080
ports:
  blue: 8081
  green: 8082
"#;

    #[test]
    fn loads_minimal_app_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(dir.path(), "web-api", MINIMAL);
        let app = load_app(&path).unwrap();
        assert_eq!(app.name, "web-api");
        assert_eq!(app.health_check.success_threshold, 1);
        assert_eq!(app.deployment.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(dir.path(), "other-name", MINIMAL);
        let err = load_app(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NameMismatch { .. }));
    }

    #[test]
    fn rejects_equal_ports() {
        let dir = tempfile::tempdir().unwrap();
        let body = MINIMAL.replace("green: 8082", "green: 8081");
        let path = write_yaml(dir.path(), "web-api", &body);
        let err = load_app(&path).unwrap_err();
        assert!(matches!(err, ConfigError::PortCollision { .. }));
    }

    #[test]
    fn rejects_bad_override_color() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "{}\ndocker:\n  expose_port: 8080\n  environment_overrides:\n    purple:\n      FOO: bar\n",
            MINIMAL
        );
        let path = write_yaml(dir.path(), "web-api", &body);
        let err = load_app(&path).unwrap_err();
        assert!(matches!(err, ConfigError::BadOverrideColor { .. }));
    }

    #[test]
    fn detects_global_port_collisions() {
        let a = load_yaml_str(MINIMAL, "web-api");
        let b = load_yaml_str(&MINIMAL.replace("web-api", "web-api-2"), "web-api-2");
        let err = check_global_uniqueness(&[a, b]).unwrap_err();
        assert!(matches!(err, ConfigError::GlobalPortCollision { .. }));
    }

    fn load_yaml_str(body: &str, stem: &str) -> App {
        let app: App = serde_yaml::from_str(body).unwrap();
        validate_app(&app, stem).unwrap();
        app
    }

    #[test]
    fn environment_merge_rules() {
        let mut app: App = serde_yaml::from_str(MINIMAL).unwrap();
        app.docker.environment.insert("A".into(), "base-a".into());
        app.docker.environment.insert("B".into(), "base-b".into());
        app.docker
            .environment_overrides
            .entry("blue".into())
            .or_default()
            .insert("A".into(), "blue-a".into());

        let merged = merge_environment(&app, Color::Blue);
        assert_eq!(merged.get("A"), Some(&"blue-a".to_string()));
        assert_eq!(merged.get("B"), Some(&"base-b".to_string()));
        assert_eq!(merged.len(), 2);

        let merged_green = merge_environment(&app, Color::Green);
        assert_eq!(merged_green.get("A"), Some(&"base-a".to_string()));
    }
}
