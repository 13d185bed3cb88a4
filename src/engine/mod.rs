//! The deployment engine: an actor-loop shape grounded on the teacher's
//! `DeploymentEngine::run` (an `mpsc`-fed loop that `tokio::spawn`s one
//! task per job), generalized to one engine *instance per app* with its
//! own single-slot "in flight" guard (spec §9's `CanDeploy()`).

pub mod action;
pub mod transition;

pub use action::{ActionProvider, LiveActionProvider, MockActionProvider};
pub use transition::{transition, ActiveColorEffect, Event, SideEffect, State};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::color::Color;
use crate::db::Store;

/// Deployment-wide timeout budget (spec §5): caps the whole orchestrator
/// loop for a single deploy attempt, regardless of how far it's gotten.
pub const DEPLOYMENT_BUDGET: Duration = Duration::from_secs(10 * 60);

/// `Deployment.status` vocabulary (spec §3) — distinct from the engine
/// FSM's `State` names used for `CurrentState.status`. A deployment row
/// tracks the outcome of one attempt, not the live state machine.
const DEPLOYMENT_STATUS_DEPLOYING: &str = "deploying";
const DEPLOYMENT_STATUS_SUCCESS: &str = "success";
const DEPLOYMENT_STATUS_ROLLED_BACK: &str = "rolled_back";
const DEPLOYMENT_STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub deployment_id: String,
    pub final_state: State,
}

/// One app's deployment state machine, plus the single-in-flight-deploy
/// guard the orchestrator relies on to keep `deploy` calls serialized per
/// app while letting different apps run concurrently.
pub struct DeploymentEngine {
    app_name: String,
    action: Arc<dyn ActionProvider>,
    store: Store,
    in_flight: Arc<AtomicBool>,
}

impl DeploymentEngine {
    pub fn new(app_name: String, action: Arc<dyn ActionProvider>, store: Store) -> Self {
        Self {
            app_name,
            action,
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn can_deploy(&self) -> bool {
        !self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs one full deploy attempt from `stable` to a terminal state.
    /// Fails fast (before touching anything) if another deploy is
    /// already in flight for this app.
    pub async fn deploy(&self, image: &str, config_id: &str) -> anyhow::Result<DeployOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            anyhow::bail!("a deployment is already in flight for '{}'", self.app_name);
        }
        let _guard = InFlightGuard(self.in_flight.clone());

        let current = self.store.get_current_state(&self.app_name).await?;
        let previous: Color = current.active_color.parse().unwrap_or(Color::Blue);
        let target = previous.other();
        // An app is "established" once a prior deploy has actually flipped
        // its active color (spec §3 Lifecycles: "born on first successful
        // deploy"). `get_current_state` reports status "unknown" for an app
        // that has never reached that point.
        let established = current.status != "unknown";

        let deployment_id = self
            .store
            .insert_deployment(&self.app_name, config_id, image, DEPLOYMENT_STATUS_DEPLOYING, target, None)
            .await?;

        info!(app = %self.app_name, %deployment_id, target = %target, "deploy started");

        let (final_state, flipped) = self
            .run_to_terminal(
                &deployment_id,
                Event::Deploy { image: image.to_string() },
                target,
                previous,
                &current.image,
                image,
                established,
            )
            .await?;

        let closing_status = match final_state {
            State::Stable if flipped => DEPLOYMENT_STATUS_SUCCESS,
            State::Stable => DEPLOYMENT_STATUS_ROLLED_BACK,
            _ => DEPLOYMENT_STATUS_FAILED,
        };
        self.store.close_deployment(&deployment_id, closing_status).await?;

        info!(app = %self.app_name, %deployment_id, final = %final_state, status = closing_status, "deploy finished");

        Ok(DeployOutcome { deployment_id, final_state })
    }

    /// Drives `transition` to a terminal state. Returns that state plus
    /// whether the active color actually flipped to `target` during this
    /// run, which `deploy` needs to pick the right `Deployment.status`
    /// (spec §3) — "success" only holds for a flip, not for every `stable`
    /// landing, since a rollback also ends in `stable`.
    async fn run_to_terminal(
        &self,
        deployment_id: &str,
        first_event: Event,
        target: Color,
        previous: Color,
        previous_image: &str,
        image: &str,
        established: bool,
    ) -> anyhow::Result<(State, bool)> {
        let deadline = tokio::time::Instant::now() + DEPLOYMENT_BUDGET;

        let mut state = State::Stable;
        let mut event = first_event;
        let mut pending_error: Option<String> = None;
        let mut active_color = previous;
        let mut active_image = previous_image.to_string();
        let mut established = established;
        let mut flipped = false;

        loop {
            let (next_state, effect, active_effect) = transition(state, &event)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;

            self.store
                .insert_deployment_event(deployment_id, &self.app_name, event.name(), None, pending_error.take().as_deref())
                .await?;

            if active_effect == ActiveColorEffect::BecomesTarget {
                active_color = target;
                active_image = image.to_string();
                established = true;
                flipped = true;
            }

            // A `stable` landing only reflects a genuinely established app;
            // otherwise this deploy rolled back without the app ever having
            // had a successful deploy, and CurrentState should say so
            // rather than falsely claim `stable` (spec §3 Lifecycles, §8 S5).
            let current_state_status = if next_state == State::Stable && !established {
                "unknown"
            } else {
                next_state.as_str()
            };

            self.store
                .upsert_current_state(&self.app_name, deployment_id, active_color, &active_image, current_state_status)
                .await?;

            state = next_state;
            if state.is_terminal() {
                return Ok((state, flipped));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(app = %self.app_name, %deployment_id, "deployment budget exhausted");
                let failed = self.force_failed(deployment_id, state, active_color, &active_image).await?;
                return Ok((failed, flipped));
            }

            let step = tokio::time::timeout(
                remaining,
                self.execute_side_effect(effect, state, target, previous, image),
            )
            .await;

            match step {
                Ok(Some((next_event, error))) => {
                    pending_error = error;
                    event = next_event;
                }
                Ok(None) => return Ok((state, flipped)),
                Err(_) => {
                    warn!(app = %self.app_name, %deployment_id, "deployment budget exhausted mid side-effect");
                    let failed = self.force_failed(deployment_id, state, active_color, &active_image).await?;
                    return Ok((failed, flipped));
                }
            }
        }
    }

    async fn force_failed(&self, deployment_id: &str, from: State, active_color: Color, active_image: &str) -> anyhow::Result<State> {
        self.store
            .insert_deployment_event(
                deployment_id,
                &self.app_name,
                "deployment_timeout",
                None,
                Some(format!("deployment budget exceeded while in '{}'", from)),
            )
            .await?;
        self.store
            .upsert_current_state(&self.app_name, deployment_id, active_color, active_image, State::Failed.as_str())
            .await
            .ok();
        Ok(State::Failed)
    }

    /// Maps a transition's `SideEffect` role onto the concrete
    /// `ActionProvider` call, returning the event the engine should feed
    /// back into `transition` next. `None` means the state just reached
    /// is terminal and no further action is needed.
    async fn execute_side_effect(
        &self,
        effect: SideEffect,
        landed_in: State,
        target: Color,
        previous: Color,
        image: &str,
    ) -> Option<(Event, Option<String>)> {
        match effect {
            SideEffect::None => {
                if landed_in == State::HealthCheck {
                    match self.action.check_health(&self.app_name, target).await {
                        Ok(true) => Some((Event::HealthCheckPassed, None)),
                        Ok(false) => Some((Event::HealthCheckFailed, Some("health check did not pass within budget".to_string()))),
                        Err(e) => Some((Event::HealthCheckFailed, Some(e.to_string()))),
                    }
                } else {
                    None
                }
            }
            SideEffect::StartTargetContainer => match self.action.start_container(&self.app_name, target, image).await {
                Ok(()) => Some((Event::ContainerStarted, None)),
                Err(e) => Some((Event::ContainerFailed, Some(e.to_string()))),
            },
            SideEffect::UpdateProxyToTarget => match self.action.update_proxy(&self.app_name, target).await {
                Ok(()) => Some((Event::ProxyUpdated, None)),
                Err(e) => Some((Event::ProxyFailed, Some(e.to_string()))),
            },
            SideEffect::DrainPreviousConnections => {
                if let Err(e) = self.action.drain_connections(&self.app_name, previous).await {
                    warn!(app = %self.app_name, error = %e, "drain reported an error; proceeding to stop regardless");
                }
                Some((Event::DrainComplete, None))
            }
            SideEffect::StopTargetContainer => match self.action.stop_container(&self.app_name, target).await {
                Ok(()) => Some((Event::RollbackComplete, None)),
                Err(e) => Some((Event::RollbackFailed, Some(e.to_string()))),
            },
            SideEffect::StopPreviousContainer => match self.action.stop_container(&self.app_name, previous).await {
                Ok(()) => Some((Event::ContainerStopped, None)),
                Err(e) => Some((Event::StopFailed, Some(e.to_string()))),
            },
        }
    }

    /// `switch(app, color)` is a distinct command path, not a `transition`
    /// event (spec §4.E): it bypasses the state machine entirely.
    pub async fn switch(&self, color: Color, driver: &dyn crate::driver::ContainerDriver, auto_rollback: bool) -> anyhow::Result<()> {
        let current = self.store.get_current_state(&self.app_name).await?;
        let current_color: Color = current.active_color.parse().unwrap_or(Color::Blue);

        if current_color == color {
            info!(app = %self.app_name, %color, "switch is a no-op, already active");
            return Ok(());
        }

        if !driver.container_exists(&self.app_name, color).await? {
            anyhow::bail!("no {} container for '{}'", color, self.app_name);
        }

        if !self.action.check_health(&self.app_name, color).await? {
            anyhow::bail!("target container is not healthy — run `health {}`", self.app_name);
        }

        self.action.update_proxy(&self.app_name, color).await?;

        self.store
            .upsert_current_state(&self.app_name, &current.deployment_id, color, &current.image, "stable")
            .await?;

        if auto_rollback {
            if let Err(e) = self.action.stop_container(&self.app_name, current_color).await {
                warn!(app = %self.app_name, error = %e, "auto_rollback cleanup of previous container failed");
            }
        }

        Ok(())
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> Store {
        let pool = SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Store::new(pool)
    }

    #[tokio::test]
    async fn first_deploy_reaches_stable_with_flipped_color() {
        let store = memory_store().await;
        let action = Arc::new(MockActionProvider::new());
        let engine = DeploymentEngine::new("web-api".to_string(), action.clone(), store.clone());

        let outcome = engine.deploy("nginx:1.21", "cfg-1").await.unwrap();
        assert_eq!(outcome.final_state, State::Stable);

        let state = store.get_current_state("web-api").await.unwrap();
        assert_eq!(state.active_color, "green");
        assert_eq!(state.image, "nginx:1.21");

        let events = store.get_deployment_events(&outcome.deployment_id).await.unwrap();
        assert!(events.len() >= 6);

        let history = store.get_deployment_history("web-api").await.unwrap();
        assert_eq!(history[0].status, "success");
    }

    #[tokio::test]
    async fn health_check_failure_rolls_back_and_keeps_previous_active() {
        let store = memory_store().await;
        let mut action = MockActionProvider::new();
        action.check_health = vec![false];
        let action = Arc::new(action);
        let engine = DeploymentEngine::new("web-api".to_string(), action.clone(), store.clone());

        let outcome = engine.deploy("nginx:bad", "cfg-1").await.unwrap();
        assert_eq!(outcome.final_state, State::Stable);

        let state = store.get_current_state("web-api").await.unwrap();
        assert_eq!(state.active_color, "blue");
        assert!(action.calls().contains(&"stop_container".to_string()));

        let history = store.get_deployment_history("web-api").await.unwrap();
        assert_eq!(history[0].status, "rolled_back");
    }

    #[tokio::test]
    async fn second_concurrent_deploy_is_rejected() {
        let store = memory_store().await;
        let action = Arc::new(MockActionProvider::new());
        let engine = Arc::new(DeploymentEngine::new("web-api".to_string(), action.clone(), store.clone()));

        assert!(engine.can_deploy());
        engine.in_flight.store(true, Ordering::SeqCst);
        let result = engine.deploy("nginx:1.21", "cfg-1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn proxy_failure_on_first_deploy_rolls_back_without_touching_routing() {
        let store = memory_store().await;
        let mut action = MockActionProvider::new();
        action.update_proxy = vec![action::ScriptedOutcome::Err("admin API returned 500".to_string())];
        let action = Arc::new(action);
        let engine = DeploymentEngine::new("web-api".to_string(), action.clone(), store.clone());

        let outcome = engine.deploy("nginx:1.21", "cfg-1").await.unwrap();
        assert_eq!(outcome.final_state, State::Stable);

        // Rolled back on an app that never had a successful deploy: the
        // CurrentState row must not claim "stable" (spec §8 S5).
        let state = store.get_current_state("web-api").await.unwrap();
        assert_eq!(state.active_color, "blue");
        assert_ne!(state.status, "stable");
        assert!(action.calls().contains(&"update_proxy".to_string()));
        assert!(action.calls().contains(&"stop_container".to_string()));

        let history = store.get_deployment_history("web-api").await.unwrap();
        assert_eq!(history[0].status, "rolled_back");
    }

    #[tokio::test]
    async fn switch_to_missing_container_is_rejected() {
        let store = memory_store().await;
        let action = Arc::new(MockActionProvider::new());
        let engine = DeploymentEngine::new("web-api".to_string(), action, store.clone());
        let driver = crate::driver::NoopDriver;

        let result = engine.switch(Color::Green, &driver, false).await;
        assert!(result.is_err());

        let state = store.get_current_state("web-api").await.unwrap();
        assert_eq!(state.active_color, "blue");
    }
}
