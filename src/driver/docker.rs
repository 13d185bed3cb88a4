use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::time::Duration;

use crate::color::Color;

use super::{container_name, managed_labels, ContainerDriver, ContainerInfo, ContainerSpec};

pub struct DockerDriver {
    client: Docker,
}

impl DockerDriver {
    pub fn new(socket: &str) -> Result<Self> {
        let client = if cfg!(windows) || socket.starts_with("npipe://") || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        };

        Ok(Self { client })
    }

    fn container_config(&self, app: &str, color: Color, spec: &ContainerSpec) -> Config<String> {
        let env: Vec<String> = spec
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let port_key = format!("{}/tcp", spec.expose_port);
        let mut port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![bollard::service::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let binds = if spec.volumes.is_empty() {
            None
        } else {
            Some(spec.volumes.clone())
        };

        let restart_policy = bollard::service::RestartPolicy {
            name: Some(restart_policy_name(&spec.restart_policy)),
            maximum_retry_count: None,
        };

        let host_config = bollard::service::HostConfig {
            port_bindings: Some(port_bindings),
            memory: spec.memory_limit.as_deref().and_then(parse_memory),
            nano_cpus: spec.cpu_limit.as_deref().and_then(parse_cpu),
            binds,
            restart_policy: Some(restart_policy),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(managed_labels(app, color)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let networks = self
            .client
            .list_networks::<String>(None)
            .await
            .context("failed to list networks")?;

        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }

        self.client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .context("failed to create network")?;

        Ok(())
    }

    async fn create_container(&self, app: &str, color: Color, spec: &ContainerSpec) -> Result<String> {
        let name = container_name(app, color);
        let config = self.container_config(app, color, spec);

        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .context("failed to create container")?;

        Ok(response.id)
    }

    async fn start_container(&self, app: &str, color: Color) -> Result<()> {
        let name = container_name(app, color);
        self.client
            .start_container::<String>(&name, None)
            .await
            .context("failed to start container")?;
        Ok(())
    }

    async fn stop_container(&self, app: &str, color: Color, grace: Duration) -> Result<()> {
        let name = container_name(app, color);
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.client
            .stop_container(&name, Some(options))
            .await
            .context("failed to stop container")?;
        Ok(())
    }

    async fn remove_container(&self, app: &str, color: Color, force: bool) -> Result<()> {
        let name = container_name(app, color);
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.client.remove_container(&name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(e).context("failed to remove container"),
        }
    }

    async fn container_exists(&self, app: &str, color: Color) -> Result<bool> {
        let name = container_name(app, color);
        match self
            .client
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e).context("failed to inspect container"),
        }
    }

    async fn get_container_info(&self, app: &str, color: Color) -> Result<ContainerInfo> {
        let name = container_name(app, color);
        let info = self
            .client
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
            .context("failed to inspect container")?;

        let running = info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let runtime_health = info
            .state
            .as_ref()
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status.as_ref())
            .map(|status| format!("{:?}", status));

        let image = info
            .config
            .as_ref()
            .and_then(|c| c.image.clone())
            .unwrap_or_default();

        let port_map = info
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|(container_port, bindings)| {
                        let container_port: u16 = container_port.split('/').next()?.parse().ok()?;
                        let host_port: u16 = bindings
                            .as_ref()?
                            .first()?
                            .host_port
                            .as_ref()?
                            .parse()
                            .ok()?;
                        Some((container_port, host_port))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ContainerInfo {
            id: info.id.unwrap_or_default(),
            name: info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            running,
            runtime_health,
            image,
            created_at: info.created.unwrap_or_default(),
            port_map,
        })
    }

    async fn list_managed(&self, app: &str) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("app={}", app), "managed=true".to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("failed to list containers")?;

        let mut result = Vec::new();
        for container in containers {
            let name = container
                .names
                .and_then(|names| names.first().cloned())
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string();

            let running = container
                .state
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("running"))
                .unwrap_or(false);

            let port_map = container
                .ports
                .unwrap_or_default()
                .iter()
                .filter_map(|p| Some((p.private_port, p.public_port?)))
                .collect();

            result.push(ContainerInfo {
                id: container.id.unwrap_or_default(),
                name,
                running,
                runtime_health: None,
                image: container.image.unwrap_or_default(),
                created_at: container.created.map(|c| c.to_string()).unwrap_or_default(),
                port_map,
            });
        }

        Ok(result)
    }

    async fn drain_connections(&self, _app: &str, _color: Color, timeout: Duration) -> Result<()> {
        // Docker gives no connection-level visibility; honor the timeout as a
        // flat grace window before the caller proceeds to stop the container.
        tokio::time::sleep(timeout).await;
        Ok(())
    }

    fn generate_run_description(&self, app: &str, color: Color, spec: &ContainerSpec) -> String {
        let name = container_name(app, color);
        let mut parts = vec![
            "docker run -d".to_string(),
            format!("--name {}", name),
            format!("-p {}:{}", spec.host_port, spec.expose_port),
        ];

        for (k, v) in &spec.environment {
            parts.push(format!("-e {}={}", k, v));
        }
        for volume in &spec.volumes {
            parts.push(format!("-v {}", volume));
        }
        if let Some(mem) = &spec.memory_limit {
            parts.push(format!("--memory {}", mem));
        }
        if let Some(cpu) = &spec.cpu_limit {
            parts.push(format!("--cpus {}", cpu));
        }
        if let Some(net) = &spec.network {
            parts.push(format!("--network {}", net));
        }
        parts.push(format!("--restart {}", spec.restart_policy));
        for (k, v) in managed_labels(app, color) {
            parts.push(format!("--label {}={}", k, v));
        }
        parts.push(spec.image.clone());

        parts.join(" \\\n  ")
    }

    async fn tail_logs(&self, app: &str, color: Color, lines: usize) -> Result<Vec<String>> {
        use bollard::container::LogsOptions;
        use futures::StreamExt;

        let name = container_name(app, color);
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: true,
            tail: lines.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(&name, Some(options));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => out.push(String::from_utf8_lossy(&output.into_bytes()).trim_end().to_string()),
                Err(e) => {
                    out.push(format!("<error reading logs: {}>", e));
                    break;
                }
            }
        }
        Ok(out)
    }
}

fn restart_policy_name(policy: &str) -> bollard::service::RestartPolicyNameEnum {
    match policy {
        "no" => bollard::service::RestartPolicyNameEnum::NO,
        "always" => bollard::service::RestartPolicyNameEnum::ALWAYS,
        "on-failure" => bollard::service::RestartPolicyNameEnum::ON_FAILURE,
        _ => bollard::service::RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

fn parse_memory(s: &str) -> Option<i64> {
    let s = s.to_lowercase();
    if let Some(n) = s.strip_suffix("gb").or_else(|| s.strip_suffix('g')) {
        n.parse::<i64>().ok().map(|n| n * 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("mb").or_else(|| s.strip_suffix('m')) {
        n.parse::<i64>().ok().map(|n| n * 1024 * 1024)
    } else {
        s.parse::<i64>().ok()
    }
}

fn parse_cpu(s: &str) -> Option<i64> {
    s.parse::<f64>().ok().map(|n| (n * 1_000_000_000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_suffixes() {
        assert_eq!(parse_memory("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory("2gb"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("not-a-number"), None);
    }

    #[test]
    fn parses_cpu_as_nanocpus() {
        assert_eq!(parse_cpu("1"), Some(1_000_000_000));
        assert_eq!(parse_cpu("0.5"), Some(500_000_000));
    }

    #[test]
    fn restart_policy_maps_known_values() {
        assert_eq!(restart_policy_name("no"), bollard::service::RestartPolicyNameEnum::NO);
        assert_eq!(restart_policy_name("always"), bollard::service::RestartPolicyNameEnum::ALWAYS);
        assert_eq!(
            restart_policy_name("unless-stopped"),
            bollard::service::RestartPolicyNameEnum::UNLESS_STOPPED
        );
        assert_eq!(restart_policy_name("garbage"), bollard::service::RestartPolicyNameEnum::UNLESS_STOPPED);
    }
}
