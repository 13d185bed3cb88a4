mod docker;

pub use docker::DockerDriver;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::color::Color;

/// Everything the engine needs to create a container for `(app, color)`.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub expose_port: u16,
    pub host_port: u16,
    pub environment: HashMap<String, String>,
    pub volumes: Vec<String>,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub restart_policy: String,
    pub network: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Docker-reported health status, if the image declares a HEALTHCHECK.
    pub runtime_health: Option<String>,
    pub image: String,
    pub created_at: String,
    pub port_map: Vec<(u16, u16)>,
}

/// Canonical container name for `(app, color)`: `<app>-<color>`.
pub fn container_name(app: &str, color: Color) -> String {
    format!("{}-{}", app, color)
}

/// Labels every managed container carries, so the driver can enumerate its
/// own containers without ambiguity (spec §3).
pub fn managed_labels(app: &str, color: Color) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert("managed".to_string(), "true".to_string());
    labels.insert("app".to_string(), app.to_string());
    labels.insert("color".to_string(), color.as_str().to_string());
    labels
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn ensure_network(&self, name: &str) -> anyhow::Result<()>;

    /// Fails if a container with the canonical name already exists; the
    /// engine always calls `remove_container(force=true)` first if
    /// `container_exists` reported one.
    async fn create_container(&self, app: &str, color: Color, spec: &ContainerSpec) -> anyhow::Result<String>;

    async fn start_container(&self, app: &str, color: Color) -> anyhow::Result<()>;

    /// Sends stop with a grace period; forced kill after grace expires.
    async fn stop_container(&self, app: &str, color: Color, grace: std::time::Duration) -> anyhow::Result<()>;

    /// Preserves volumes.
    async fn remove_container(&self, app: &str, color: Color, force: bool) -> anyhow::Result<()>;

    async fn container_exists(&self, app: &str, color: Color) -> anyhow::Result<bool>;

    async fn get_container_info(&self, app: &str, color: Color) -> anyhow::Result<ContainerInfo>;

    async fn list_managed(&self, app: &str) -> anyhow::Result<Vec<ContainerInfo>>;

    /// Time-bounded wait for draining connections; the driver monitors
    /// active connections if it can, else sleeps up to `timeout`. Always
    /// returns after `timeout` regardless (spec §4.E drain contract).
    async fn drain_connections(&self, app: &str, color: Color, timeout: std::time::Duration) -> anyhow::Result<()>;

    /// Human-readable `docker run`-equivalent command, for operator
    /// debugging (`dbg-cmd`).
    fn generate_run_description(&self, app: &str, color: Color, spec: &ContainerSpec) -> String;

    /// Last `lines` of combined stdout/stderr, for the `logs` diagnostic
    /// surface (spec §6).
    async fn tail_logs(&self, app: &str, color: Color, lines: usize) -> anyhow::Result<Vec<String>>;
}

/// Fallback driver used when the configured container runtime is
/// unreachable, so `status`/`history` keep working instead of the whole
/// binary refusing to start.
pub struct NoopDriver;

#[async_trait]
impl ContainerDriver for NoopDriver {
    async fn ensure_network(&self, _name: &str) -> anyhow::Result<()> {
        anyhow::bail!("no container runtime available")
    }
    async fn create_container(&self, _app: &str, _color: Color, _spec: &ContainerSpec) -> anyhow::Result<String> {
        anyhow::bail!("no container runtime available")
    }
    async fn start_container(&self, _app: &str, _color: Color) -> anyhow::Result<()> {
        anyhow::bail!("no container runtime available")
    }
    async fn stop_container(&self, _app: &str, _color: Color, _grace: std::time::Duration) -> anyhow::Result<()> {
        anyhow::bail!("no container runtime available")
    }
    async fn remove_container(&self, _app: &str, _color: Color, _force: bool) -> anyhow::Result<()> {
        anyhow::bail!("no container runtime available")
    }
    async fn container_exists(&self, _app: &str, _color: Color) -> anyhow::Result<bool> {
        Ok(false)
    }
    async fn get_container_info(&self, _app: &str, _color: Color) -> anyhow::Result<ContainerInfo> {
        anyhow::bail!("no container runtime available")
    }
    async fn list_managed(&self, _app: &str) -> anyhow::Result<Vec<ContainerInfo>> {
        Ok(vec![])
    }
    async fn drain_connections(&self, _app: &str, _color: Color, timeout: std::time::Duration) -> anyhow::Result<()> {
        tokio::time::sleep(timeout).await;
        Ok(())
    }
    fn generate_run_description(&self, app: &str, color: Color, spec: &ContainerSpec) -> String {
        format!("# no container runtime available for {}-{} ({})", app, color, spec.image)
    }
    async fn tail_logs(&self, _app: &str, _color: Color, _lines: usize) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("no container runtime available")
    }
}

/// Connect to the configured Docker socket, falling back to a `NoopDriver`
/// if the daemon is unreachable (mirrors the teacher's `detect_runtime`).
pub async fn detect_driver(socket: &str) -> std::sync::Arc<dyn ContainerDriver> {
    match DockerDriver::new(socket) {
        Ok(driver) => std::sync::Arc::new(driver),
        Err(e) => {
            tracing::warn!("Failed to connect to Docker: {}. Deployments will not work.", e);
            std::sync::Arc::new(NoopDriver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_app_dash_color() {
        assert_eq!(container_name("web-api", Color::Blue), "web-api-blue");
        assert_eq!(container_name("web-api", Color::Green), "web-api-green");
    }

    #[test]
    fn managed_labels_carry_app_and_color() {
        let labels = managed_labels("web-api", Color::Green);
        assert_eq!(labels.get("managed"), Some(&"true".to_string()));
        assert_eq!(labels.get("app"), Some(&"web-api".to_string()));
        assert_eq!(labels.get("color"), Some(&"green".to_string()));
    }
}
