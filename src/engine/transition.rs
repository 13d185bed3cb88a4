//! The pure deployment state machine (spec §4.E). `transition` has no I/O
//! and no knowledge of colors or images; the actor loop in `mod.rs` holds
//! that context and maps `SideEffect` roles onto concrete driver/proxy
//! calls for the deployment in progress.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Stable,
    Starting,
    HealthCheck,
    Switching,
    Draining,
    Stopping,
    RollingBack,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stable => "stable",
            State::Starting => "starting",
            State::HealthCheck => "health_check",
            State::Switching => "switching",
            State::Draining => "draining",
            State::Stopping => "stopping",
            State::RollingBack => "rolling_back",
            State::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Stable | State::Failed)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Deploy { image: String },
    ContainerStarted,
    ContainerFailed,
    HealthCheckPassed,
    HealthCheckFailed,
    ProxyUpdated,
    ProxyFailed,
    DrainComplete,
    ContainerStopped,
    StopFailed,
    RollbackComplete,
    RollbackFailed,
    ManualRecovery,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Deploy { .. } => "deploy",
            Event::ContainerStarted => "container_started",
            Event::ContainerFailed => "container_failed",
            Event::HealthCheckPassed => "health_check_passed",
            Event::HealthCheckFailed => "health_check_failed",
            Event::ProxyUpdated => "proxy_updated",
            Event::ProxyFailed => "proxy_failed",
            Event::DrainComplete => "drain_complete",
            Event::ContainerStopped => "container_stopped",
            Event::StopFailed => "stop_failed",
            Event::RollbackComplete => "rollback_complete",
            Event::RollbackFailed => "rollback_failed",
            Event::ManualRecovery => "manual_recovery",
        }
    }
}

/// The action the actor loop must perform after landing in the returned
/// state, before waiting for the next event. Colors are resolved by the
/// caller from the deployment's target/previous color, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    None,
    StartTargetContainer,
    StopTargetContainer,
    StopPreviousContainer,
    DrainPreviousConnections,
    UpdateProxyToTarget,
}

/// On reaching `Stable` from `Stopping`, the deployment's target color
/// becomes the new active color; every other transition leaves the
/// active color untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveColorEffect {
    Unchanged,
    BecomesTarget,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: event '{event}' is not accepted in state '{state}'")]
pub struct EngineError {
    pub state: String,
    pub event: String,
}

/// Applies one event to one state per the canonical transition table.
/// Pure: no I/O, no context beyond the two arguments.
pub fn transition(state: State, event: &Event) -> Result<(State, SideEffect, ActiveColorEffect), EngineError> {
    use ActiveColorEffect::*;
    use SideEffect::*;
    use State::*;

    let outcome = match (state, event) {
        (Stable, Event::Deploy { .. }) => (Starting, StartTargetContainer, Unchanged),
        (Starting, Event::ContainerStarted) => (HealthCheck, None, Unchanged),
        (Starting, Event::ContainerFailed) => (Failed, SideEffect::None, Unchanged),
        (HealthCheck, Event::HealthCheckPassed) => (Switching, UpdateProxyToTarget, Unchanged),
        (HealthCheck, Event::HealthCheckFailed) => (RollingBack, StopTargetContainer, Unchanged),
        (Switching, Event::ProxyUpdated) => (Draining, DrainPreviousConnections, Unchanged),
        (Switching, Event::ProxyFailed) => (RollingBack, StopTargetContainer, Unchanged),
        (Draining, Event::DrainComplete) => (Stopping, StopPreviousContainer, Unchanged),
        (Stopping, Event::ContainerStopped) => (Stable, SideEffect::None, BecomesTarget),
        (Stopping, Event::StopFailed) => (Failed, SideEffect::None, Unchanged),
        (RollingBack, Event::RollbackComplete) => (Stable, SideEffect::None, Unchanged),
        (RollingBack, Event::RollbackFailed) => (Failed, SideEffect::None, Unchanged),
        (Failed, Event::ManualRecovery) => (Stable, SideEffect::None, Unchanged),
        (Stable, Event::ManualRecovery) => (Stable, SideEffect::None, Unchanged),
        _ => {
            return Err(EngineError {
                state: state.as_str().to_string(),
                event: event.name().to_string(),
            })
        }
    };

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_deploy_starts_target_container() {
        let (next, effect, active) = transition(State::Stable, &Event::Deploy { image: "nginx:1".into() }).unwrap();
        assert_eq!(next, State::Starting);
        assert_eq!(effect, SideEffect::StartTargetContainer);
        assert_eq!(active, ActiveColorEffect::Unchanged);
    }

    #[test]
    fn full_happy_path_reaches_stable_with_active_color_flip() {
        let mut state = State::Stable;
        let events = [
            Event::Deploy { image: "nginx:1".into() },
            Event::ContainerStarted,
            Event::HealthCheckPassed,
            Event::ProxyUpdated,
            Event::DrainComplete,
            Event::ContainerStopped,
        ];
        let mut saw_flip = false;
        for event in &events {
            let (next, _effect, active) = transition(state, event).unwrap();
            if active == ActiveColorEffect::BecomesTarget {
                saw_flip = true;
            }
            state = next;
        }
        assert_eq!(state, State::Stable);
        assert!(saw_flip);
    }

    #[test]
    fn health_check_failure_rolls_back() {
        let (next, effect, _) = transition(State::HealthCheck, &Event::HealthCheckFailed).unwrap();
        assert_eq!(next, State::RollingBack);
        assert_eq!(effect, SideEffect::StopTargetContainer);
    }

    #[test]
    fn proxy_failure_in_switching_rolls_back_without_touching_routing() {
        let (next, effect, _) = transition(State::Switching, &Event::ProxyFailed).unwrap();
        assert_eq!(next, State::RollingBack);
        assert_eq!(effect, SideEffect::StopTargetContainer);
    }

    #[test]
    fn failed_accepts_only_manual_recovery() {
        assert!(transition(State::Failed, &Event::ManualRecovery).is_ok());
        assert!(transition(State::Failed, &Event::Deploy { image: "x".into() }).is_err());
    }

    #[test]
    fn stable_manual_recovery_is_a_noop() {
        let (next, effect, active) = transition(State::Stable, &Event::ManualRecovery).unwrap();
        assert_eq!(next, State::Stable);
        assert_eq!(effect, SideEffect::None);
        assert_eq!(active, ActiveColorEffect::Unchanged);
    }

    #[test]
    fn invalid_pairs_are_rejected() {
        let err = transition(State::Stable, &Event::ContainerStarted).unwrap_err();
        assert_eq!(err.state, "stable");
        assert_eq!(err.event, "container_started");
    }

    #[test]
    fn every_non_terminal_state_has_at_least_one_accepted_event() {
        let all_events = [
            Event::Deploy { image: "x".into() },
            Event::ContainerStarted,
            Event::ContainerFailed,
            Event::HealthCheckPassed,
            Event::HealthCheckFailed,
            Event::ProxyUpdated,
            Event::ProxyFailed,
            Event::DrainComplete,
            Event::ContainerStopped,
            Event::StopFailed,
            Event::RollbackComplete,
            Event::RollbackFailed,
            Event::ManualRecovery,
        ];
        let all_states = [
            State::Stable,
            State::Starting,
            State::HealthCheck,
            State::Switching,
            State::Draining,
            State::Stopping,
            State::RollingBack,
            State::Failed,
        ];
        for state in all_states {
            let accepted = all_events.iter().any(|event| transition(state, event).is_ok());
            assert!(accepted, "state {:?} accepts no event", state);
        }
    }
}
