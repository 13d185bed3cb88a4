//! Proxy Controller: turns the engine's routing intent into a reverse-proxy
//! configuration file and pushes it to an externally managed proxy (spec
//! §4.D). Keeps the teacher's `ArcSwap`-guarded shared-view idiom and
//! `reqwest::Client` admin-caller shape, repointed at a template+reload
//! contract instead of serving traffic itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::color::Color;
use crate::config::app::App;
use crate::db::CurrentStateRecord;

const DEFAULT_TEMPLATE: &str = r#"{
  "apps": [
    {{routes}}
  ]
}
"#;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read proxy template at {path}: {source}")]
    ReadTemplate { path: PathBuf, source: std::io::Error },
    #[error("failed to write proxy template at {path}: {source}")]
    WriteTemplate { path: PathBuf, source: std::io::Error },
    #[error("failed to write proxy config at {path}: {source}")]
    WriteConfig { path: PathBuf, source: std::io::Error },
    #[error("rendered proxy config is not well-formed structured data: {0}")]
    MalformedConfig(#[from] serde_json::Error),
    #[error("app '{0}' has no corresponding current state")]
    MissingState(String),
    #[error("current state for '{app}' has invalid active color '{color}'")]
    InvalidActiveColor { app: String, color: String },
    #[error("proxy reload failed: HTTP {status}")]
    ReloadFailed { status: u16 },
    #[error("proxy did not respond successfully: {0}")]
    Unreachable(#[from] reqwest::Error),
}

/// One `(app, active_host_port, proxy_listen_port, host, path_prefix)`
/// routing tuple, as the engine hands it to the controller on every
/// reload.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub app: String,
    pub active_host_port: u16,
    pub proxy_listen_port: u16,
    pub host: Option<String>,
    pub path_prefix: Option<String>,
}

impl RouteEntry {
    /// Resolve the host port for the current active color from the app's
    /// declared port pair, rejecting any color other than blue/green.
    pub fn from_app_and_state(app: &App, state: &CurrentStateRecord) -> Result<Self, ProxyError> {
        let color: Color = state.active_color.parse().map_err(|_| ProxyError::InvalidActiveColor {
            app: app.name.clone(),
            color: state.active_color.clone(),
        })?;

        let active_host_port = match color {
            Color::Blue => app.ports.blue,
            Color::Green => app.ports.green,
        };

        Ok(RouteEntry {
            app: app.name.clone(),
            active_host_port,
            proxy_listen_port: app.proxy.listen_port,
            host: app.proxy.host.clone(),
            path_prefix: app.proxy.path_prefix.clone(),
        })
    }

    fn to_json_fragment(&self) -> serde_json::Value {
        serde_json::json!({
            "app": self.app,
            "upstream": format!("127.0.0.1:{}", self.active_host_port),
            "listen": self.proxy_listen_port,
            "host": self.host,
            "path_prefix": self.path_prefix,
        })
    }
}

/// Last config this process rendered, kept for `status`/`config show`
/// without re-reading disk every time.
#[derive(Debug, Clone, Default)]
pub struct RenderedConfig {
    pub body: String,
}

pub struct ProxyController {
    workspace_root: PathBuf,
    admin_url: String,
    client: reqwest::Client,
    last_rendered: Arc<ArcSwap<RenderedConfig>>,
}

impl ProxyController {
    pub fn new(workspace_root: PathBuf, admin_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            workspace_root,
            admin_url,
            client,
            last_rendered: Arc::new(ArcSwap::new(Arc::new(RenderedConfig::default()))),
        }
    }

    fn template_path(&self) -> PathBuf {
        self.workspace_root.join("caddy").join("template.json")
    }

    fn config_path(&self) -> PathBuf {
        self.workspace_root.join("caddy").join("config.json")
    }

    pub fn has_template(&self) -> bool {
        self.template_path().is_file()
    }

    pub fn create_default_template(&self) -> Result<(), ProxyError> {
        let path = self.template_path();
        std::fs::write(&path, DEFAULT_TEMPLATE).map_err(|source| ProxyError::WriteTemplate { path, source })?;
        info!(path = %self.template_path().display(), "wrote default proxy template");
        Ok(())
    }

    /// Renders the template against `configs`/`states`, validates it's
    /// well-formed structured data, and writes it atomically.
    pub fn generate_config(&self, configs: &[App], states: &[CurrentStateRecord]) -> Result<String, ProxyError> {
        let template_path = self.template_path();
        let template = std::fs::read_to_string(&template_path)
            .map_err(|source| ProxyError::ReadTemplate { path: template_path, source })?;

        let mut routes = Vec::with_capacity(configs.len());
        for app in configs {
            let state = states
                .iter()
                .find(|s| s.app_name == app.name)
                .ok_or_else(|| ProxyError::MissingState(app.name.clone()))?;
            routes.push(RouteEntry::from_app_and_state(app, state)?.to_json_fragment());
        }

        let routes_json = routes
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",\n    ");
        let rendered = template.replace("{{routes}}", &routes_json);

        // Validate the rendered artifact is well-formed structured data.
        let _: serde_json::Value = serde_json::from_str(&rendered)?;

        let config_path = self.config_path();
        let tmp_path = config_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &rendered).map_err(|source| ProxyError::WriteConfig { path: tmp_path.clone(), source })?;
        std::fs::rename(&tmp_path, &config_path).map_err(|source| ProxyError::WriteConfig { path: config_path, source })?;

        self.last_rendered.store(Arc::new(RenderedConfig { body: rendered.clone() }));
        debug!(app_count = configs.len(), "regenerated proxy config");

        Ok(rendered)
    }

    pub fn last_config(&self) -> RenderedConfig {
        (**self.last_rendered.load()).clone()
    }

    /// POSTs the rendered config body to the proxy's admin `/load`
    /// endpoint. Never starts or stops the proxy process itself.
    pub async fn reload_proxy(&self, body: &str) -> Result<(), ProxyError> {
        let url = format!("{}/load", self.admin_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            info!(url = %url, "proxy reload succeeded");
            Ok(())
        } else {
            let status = response.status().as_u16();
            warn!(url = %url, status, "proxy reload rejected");
            Err(ProxyError::ReloadFailed { status })
        }
    }

    /// GET against the admin root; success iff 2xx within 10s.
    pub async fn validate_proxy_running(&self) -> Result<(), ProxyError> {
        let response = self.client.get(&self.admin_url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProxyError::ReloadFailed { status: response.status().as_u16() })
        }
    }
}

pub fn caddy_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("caddy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::app::{DeploymentSpec, DockerSpec, HealthCheckSpec, Ports, ProxySpec};
    use tempfile::tempdir;

    fn test_app(name: &str) -> App {
        App {
            name: name.to_string(),
            docker: DockerSpec::default(),
            ports: Ports { blue: 9001, green: 9002 },
            health_check: HealthCheckSpec::default(),
            deployment: DeploymentSpec::default(),
            proxy: ProxySpec { listen_port: 443, host: Some("example.com".into()), path_prefix: None },
        }
    }

    fn test_state(app: &str, color: &str) -> CurrentStateRecord {
        CurrentStateRecord {
            app_name: app.to_string(),
            deployment_id: "dep-1".to_string(),
            active_color: color.to_string(),
            image: "img:1".to_string(),
            status: "stable".to_string(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn route_entry_picks_port_for_active_color() {
        let app = test_app("web-api");
        let state = test_state("web-api", "green");
        let entry = RouteEntry::from_app_and_state(&app, &state).unwrap();
        assert_eq!(entry.active_host_port, 9002);
    }

    #[test]
    fn route_entry_rejects_invalid_active_color() {
        let app = test_app("web-api");
        let state = test_state("web-api", "purple");
        assert!(RouteEntry::from_app_and_state(&app, &state).is_err());
    }

    #[test]
    fn generate_config_fails_when_app_has_no_state() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("caddy")).unwrap();
        let controller = ProxyController::new(dir.path().to_path_buf(), "http://localhost:2019".into());
        controller.create_default_template().unwrap();

        let result = controller.generate_config(&[test_app("web-api")], &[]);
        assert!(matches!(result, Err(ProxyError::MissingState(_))));
    }

    #[test]
    fn generate_config_writes_valid_json_atomically() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("caddy")).unwrap();
        let controller = ProxyController::new(dir.path().to_path_buf(), "http://localhost:2019".into());
        controller.create_default_template().unwrap();

        let app = test_app("web-api");
        let state = test_state("web-api", "blue");
        let rendered = controller.generate_config(&[app], &[state]).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert!(parsed.get("apps").is_some());
        assert!(dir.path().join("caddy").join("config.json").is_file());
    }
}
