//! Health Prober: answers "is `(app, color)` healthy?" by combining
//! container-driver-reported health with an HTTP probe (spec §4.C).

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::color::Color;
use crate::config::app::HealthCheckSpec;
use crate::driver::{ContainerDriver, ContainerInfo};

/// Health verdict for a single `(app, color)` at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Unhealthy,
    Starting,
    Unknown,
}

impl Status {
    fn from_driver(info: &ContainerInfo) -> Self {
        if !info.running {
            return Status::Unhealthy;
        }
        match info.runtime_health.as_deref() {
            None => Status::Healthy,
            Some(s) if s.eq_ignore_ascii_case("healthy") => Status::Healthy,
            Some(s) if s.eq_ignore_ascii_case("starting") => Status::Starting,
            Some(_) => Status::Unhealthy,
        }
    }
}

/// Combine driver-reported health with the HTTP probe result per spec §4.C:
/// either signal unhealthy dominates, then either starting, then both
/// healthy, else starting.
pub fn combine(docker: Status, http: Option<Status>) -> Status {
    let Some(http) = http else {
        return docker;
    };

    if docker == Status::Unhealthy || http == Status::Unhealthy {
        Status::Unhealthy
    } else if docker == Status::Starting || http == Status::Starting {
        Status::Starting
    } else if docker == Status::Healthy && http == Status::Healthy {
        Status::Healthy
    } else {
        Status::Starting
    }
}

pub struct HealthProber {
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// A single point-in-time health check of `(app, color)`.
    pub async fn check(
        &self,
        driver: &dyn ContainerDriver,
        app: &str,
        color: Color,
        host_port: u16,
        spec: &HealthCheckSpec,
    ) -> anyhow::Result<Status> {
        let info = driver.get_container_info(app, color).await?;
        let docker_status = Status::from_driver(&info);

        let http_status = match &spec.endpoint {
            None => None,
            Some(endpoint) => Some(self.probe(host_port, endpoint, spec).await),
        };

        Ok(combine(docker_status, http_status))
    }

    /// Runs up to `retries` probe attempts, sleeping `interval` between
    /// them. Healthy iff any attempt returns `expected_status` within
    /// `timeout`.
    async fn probe(&self, host_port: u16, endpoint: &str, spec: &HealthCheckSpec) -> Status {
        let url = format!("http://localhost:{}{}", host_port, endpoint);

        for attempt in 0..spec.retries.max(1) {
            let start = Instant::now();
            let outcome = tokio::time::timeout(
                spec.timeout,
                self.client.request(parse_method(&spec.method), &url).send(),
            )
            .await;

            let passed = match outcome {
                Ok(Ok(response)) => response.status().as_u16() == spec.expected_status,
                Ok(Err(e)) => {
                    debug!(url = %url, error = %e, attempt, "health probe request failed");
                    false
                }
                Err(_) => {
                    debug!(url = %url, elapsed = ?start.elapsed(), attempt, "health probe timed out");
                    false
                }
            };

            if passed {
                return Status::Healthy;
            }

            if attempt + 1 < spec.retries.max(1) {
                sleep(spec.interval).await;
            }
        }

        Status::Unhealthy
    }

    /// Polls `(app, color)` on `spec.interval` until `success_threshold`
    /// consecutive `Healthy` observations are seen, or `budget` elapses.
    pub async fn wait_for_healthy(
        &self,
        driver: &dyn ContainerDriver,
        app: &str,
        color: Color,
        host_port: u16,
        spec: &HealthCheckSpec,
        budget: Duration,
    ) -> anyhow::Result<bool> {
        let deadline = Instant::now() + budget;
        let mut consecutive = 0u32;

        loop {
            let status = self.check(driver, app, color, host_port, spec).await?;
            if status == Status::Healthy {
                consecutive += 1;
                if consecutive >= spec.success_threshold.max(1) {
                    return Ok(true);
                }
            } else {
                consecutive = 0;
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }

            sleep(spec.interval.min(deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)))).await;
        }
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_method(method: &str) -> reqwest::Method {
    method.parse().unwrap_or(reqwest::Method::GET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn either_unhealthy_dominates() {
        assert_eq!(combine(Status::Unhealthy, Some(Status::Healthy)), Status::Unhealthy);
        assert_eq!(combine(Status::Healthy, Some(Status::Unhealthy)), Status::Unhealthy);
    }

    #[test]
    fn either_starting_dominates_over_otherwise_healthy() {
        assert_eq!(combine(Status::Starting, Some(Status::Healthy)), Status::Starting);
        assert_eq!(combine(Status::Healthy, Some(Status::Starting)), Status::Starting);
    }

    #[test]
    fn both_healthy_is_healthy() {
        assert_eq!(combine(Status::Healthy, Some(Status::Healthy)), Status::Healthy);
    }

    #[test]
    fn no_http_signal_uses_driver_status_only() {
        assert_eq!(combine(Status::Healthy, None), Status::Healthy);
        assert_eq!(combine(Status::Unknown, None), Status::Unknown);
    }

    #[test]
    fn driver_status_from_container_info() {
        let running_no_health = ContainerInfo {
            id: "x".into(),
            name: "x".into(),
            running: true,
            runtime_health: None,
            image: "img".into(),
            created_at: "now".into(),
            port_map: vec![],
        };
        assert_eq!(Status::from_driver(&running_no_health), Status::Healthy);

        let stopped = ContainerInfo {
            running: false,
            ..running_no_health.clone()
        };
        assert_eq!(Status::from_driver(&stopped), Status::Unhealthy);

        let starting = ContainerInfo {
            runtime_health: Some("starting".into()),
            ..running_no_health.clone()
        };
        assert_eq!(Status::from_driver(&starting), Status::Starting);

        let unhealthy = ContainerInfo {
            runtime_health: Some("unhealthy".into()),
            ..running_no_health
        };
        assert_eq!(Status::from_driver(&unhealthy), Status::Unhealthy);
    }
}
