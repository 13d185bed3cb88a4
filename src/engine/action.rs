//! The action-injection contract (spec §9): the engine depends only on
//! this trait, never on the concrete driver/prober/proxy types, so the
//! state machine stays unit-testable without a real container runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::color::Color;
use crate::config::app::App;
use crate::db::Store;
use crate::driver::{ContainerDriver, ContainerSpec};
use crate::health::HealthProber;
use crate::proxy::{ProxyController, RouteEntry};

#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn start_container(&self, app: &str, color: Color, image: &str) -> anyhow::Result<()>;
    async fn check_health(&self, app: &str, color: Color) -> anyhow::Result<bool>;
    async fn update_proxy(&self, app: &str, color: Color) -> anyhow::Result<()>;
    async fn drain_connections(&self, app: &str, color: Color) -> anyhow::Result<()>;
    async fn stop_container(&self, app: &str, color: Color) -> anyhow::Result<()>;
    /// Present for symmetry with spec.md §9; the engine never needs to
    /// call this because a rolled-back `switching` never had a
    /// successful reload to reverse (spec §7).
    async fn rollback_proxy(&self, app: &str, color: Color) -> anyhow::Result<()>;
}

/// Production `ActionProvider`, backed by the container driver, the
/// health prober, and the proxy controller for one app.
pub struct LiveActionProvider {
    pub app: App,
    pub all_apps: Arc<Vec<App>>,
    pub driver: Arc<dyn ContainerDriver>,
    pub prober: Arc<HealthProber>,
    pub proxy: Arc<ProxyController>,
    pub store: Store,
}

impl LiveActionProvider {
    fn host_port(&self, color: Color) -> u16 {
        match color {
            Color::Blue => self.app.ports.blue,
            Color::Green => self.app.ports.green,
        }
    }

    fn container_spec(&self, color: Color, image: &str) -> ContainerSpec {
        let environment = crate::config::merge_environment(&self.app, color);
        ContainerSpec {
            image: image.to_string(),
            expose_port: self.app.docker.expose_port,
            host_port: self.host_port(color),
            environment,
            volumes: self.app.docker.volumes.clone(),
            memory_limit: self.app.docker.memory_limit.clone(),
            cpu_limit: self.app.docker.cpu_limit.clone(),
            restart_policy: self.app.docker.restart_policy.clone(),
            network: self.app.docker.network.clone(),
        }
    }
}

#[async_trait]
impl ActionProvider for LiveActionProvider {
    async fn start_container(&self, app: &str, color: Color, image: &str) -> anyhow::Result<()> {
        if let Some(network) = &self.app.docker.network {
            self.driver.ensure_network(network).await?;
        }

        if self.driver.container_exists(app, color).await? {
            self.driver.remove_container(app, color, true).await?;
        }

        let spec = self.container_spec(color, image);
        self.driver.create_container(app, color, &spec).await?;
        self.driver.start_container(app, color).await?;

        if !self.app.deployment.startup_delay.is_zero() {
            tokio::time::sleep(self.app.deployment.startup_delay).await;
        }

        Ok(())
    }

    async fn check_health(&self, app: &str, color: Color) -> anyhow::Result<bool> {
        let budget = self.app.health_check.interval * self.app.health_check.retries.max(1) * 2;
        self.prober
            .wait_for_healthy(
                self.driver.as_ref(),
                app,
                color,
                self.host_port(color),
                &self.app.health_check,
                budget,
            )
            .await
    }

    async fn update_proxy(&self, app: &str, color: Color) -> anyhow::Result<()> {
        // Regenerates from every app's persisted state plus this app's
        // tentative target color; the engine only commits that color to
        // CurrentState once the whole transition (not just this side
        // effect) has succeeded.
        let states = self.store.get_all_current_states().await?;
        let mut states_by_app: HashMap<String, crate::db::CurrentStateRecord> =
            states.into_iter().map(|s| (s.app_name.clone(), s)).collect();

        states_by_app
            .entry(app.to_string())
            .and_modify(|s| s.active_color = color.as_str().to_string())
            .or_insert_with(|| crate::db::CurrentStateRecord {
                app_name: app.to_string(),
                deployment_id: String::new(),
                active_color: color.as_str().to_string(),
                image: String::new(),
                status: "switching".to_string(),
                updated_at: chrono::Utc::now(),
            });

        let states: Vec<_> = states_by_app.into_values().collect();
        let rendered = self.proxy.generate_config(&self.all_apps, &states)?;
        self.proxy.reload_proxy(&rendered).await?;
        Ok(())
    }

    async fn drain_connections(&self, app: &str, color: Color) -> anyhow::Result<()> {
        self.driver
            .drain_connections(app, color, self.app.deployment.drain_timeout)
            .await
    }

    async fn stop_container(&self, app: &str, color: Color) -> anyhow::Result<()> {
        self.driver
            .stop_container(app, color, self.app.deployment.stop_timeout)
            .await?;
        self.driver.remove_container(app, color, false).await
    }

    async fn rollback_proxy(&self, app: &str, color: Color) -> anyhow::Result<()> {
        warn!(app, %color, "rollback_proxy invoked; no-op by design (spec §7)");
        Ok(())
    }
}

/// A scripted outcome for one `ActionProvider` call, consumed in order.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Ok,
    Err(String),
}

/// Feeds synthetic outcomes to the engine in tests (spec §9).
pub struct MockActionProvider {
    pub start_container: Vec<ScriptedOutcome>,
    pub check_health: Vec<bool>,
    pub update_proxy: Vec<ScriptedOutcome>,
    pub drain_connections: Vec<ScriptedOutcome>,
    pub stop_container: Vec<ScriptedOutcome>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockActionProvider {
    pub fn new() -> Self {
        Self {
            start_container: vec![ScriptedOutcome::Ok],
            check_health: vec![true],
            update_proxy: vec![ScriptedOutcome::Ok],
            drain_connections: vec![ScriptedOutcome::Ok],
            stop_container: vec![ScriptedOutcome::Ok],
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Default for MockActionProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_at(outcomes: &[ScriptedOutcome], index: usize) -> anyhow::Result<()> {
    match outcomes.get(index).or_else(|| outcomes.last()) {
        Some(ScriptedOutcome::Ok) | None => Ok(()),
        Some(ScriptedOutcome::Err(msg)) => Err(anyhow::anyhow!(msg.clone())),
    }
}

#[async_trait]
impl ActionProvider for MockActionProvider {
    async fn start_container(&self, _app: &str, _color: Color, _image: &str) -> anyhow::Result<()> {
        let idx = self.calls().iter().filter(|c| *c == "start_container").count();
        self.record("start_container");
        outcome_at(&self.start_container, idx)
    }

    async fn check_health(&self, _app: &str, _color: Color) -> anyhow::Result<bool> {
        let idx = self.calls().iter().filter(|c| *c == "check_health").count();
        self.record("check_health");
        Ok(*self.check_health.get(idx).or_else(|| self.check_health.last()).unwrap_or(&true))
    }

    async fn update_proxy(&self, _app: &str, _color: Color) -> anyhow::Result<()> {
        let idx = self.calls().iter().filter(|c| *c == "update_proxy").count();
        self.record("update_proxy");
        outcome_at(&self.update_proxy, idx)
    }

    async fn drain_connections(&self, _app: &str, _color: Color) -> anyhow::Result<()> {
        let idx = self.calls().iter().filter(|c| *c == "drain_connections").count();
        self.record("drain_connections");
        outcome_at(&self.drain_connections, idx)
    }

    async fn stop_container(&self, _app: &str, _color: Color) -> anyhow::Result<()> {
        let idx = self.calls().iter().filter(|c| *c == "stop_container").count();
        self.record("stop_container");
        outcome_at(&self.stop_container, idx)
    }

    async fn rollback_proxy(&self, _app: &str, _color: Color) -> anyhow::Result<()> {
        self.record("rollback_proxy");
        Ok(())
    }
}
