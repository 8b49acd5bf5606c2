//! Convergence polling: wait for an environment to settle and recover.
//!
//! Two loops share one engine. The deployment loop waits for the in-flight
//! operation to finish (status no longer transitioning); the health loop then
//! waits for the environment to serve traffic acceptably. Both tail platform
//! events between probes so operators see progress while waiting, and both
//! keep timing out distinct from observed failure: a deadline expiry says
//! "still not there", a terminal status says "never will be".

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{EnvironmentDescription, EventSeverity, PlatformApi};
use crate::error::{EngineError, EngineResult};
use crate::types::EnvironmentState;

/// How many error-severity event messages are retained for diagnostics.
const ERROR_EVENT_WINDOW: usize = 5;

/// Event message fragments that mean the platform has given up on the
/// operation, regardless of what the status field still says.
const HARD_FAILURE_PATTERNS: &[&str] = &["failed to deploy", "deployment failed"];

/// What one observed snapshot means for the loop.
enum PollVerdict {
    /// Goal reached, stop with success.
    Settled,
    /// Definitive failure, stop with an error.
    Failed(String),
    /// Keep waiting.
    Pending,
}

/// Incremental tail over an environment's event stream.
///
/// Events are fetched with a start-time cursor just past the last event seen,
/// so each event is logged exactly once across successive drains. Fetch
/// failures are swallowed: the events are operator diagnostics, and a flaky
/// event endpoint must not abort an otherwise healthy wait.
pub struct EventTail {
    application: String,
    environment: String,
    cursor: DateTime<Utc>,
    recent_errors: Vec<String>,
    hard_failure: Option<String>,
}

impl EventTail {
    /// Start tailing events emitted from `since` onwards.
    #[must_use]
    pub fn new(application: &str, environment: &str, since: DateTime<Utc>) -> Self {
        Self {
            application: application.to_owned(),
            environment: environment.to_owned(),
            cursor: since,
            recent_errors: Vec::new(),
            hard_failure: None,
        }
    }

    /// Fetch and log events that arrived since the previous drain.
    pub async fn drain(&mut self, platform: &dyn PlatformApi) {
        let events = match platform
            .environment_events(&self.application, &self.environment, Some(self.cursor))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                debug!(error = %e, "event fetch failed, continuing without events");
                return;
            }
        };

        for event in events {
            match event.severity {
                EventSeverity::Error => {
                    warn!(
                        environment = %self.environment,
                        at = %event.timestamp,
                        "platform event: {}",
                        event.message
                    );
                    if self.recent_errors.len() == ERROR_EVENT_WINDOW {
                        self.recent_errors.remove(0);
                    }
                    let lower = event.message.to_lowercase();
                    if HARD_FAILURE_PATTERNS.iter().any(|p| lower.contains(p)) {
                        self.hard_failure = Some(event.message.clone());
                    }
                    self.recent_errors.push(event.message.clone());
                }
                EventSeverity::Warn => warn!(
                    environment = %self.environment,
                    at = %event.timestamp,
                    "platform event: {}",
                    event.message
                ),
                EventSeverity::Info => info!(
                    environment = %self.environment,
                    at = %event.timestamp,
                    "platform event: {}",
                    event.message
                ),
            }
            // Advance just past the event so the next drain excludes it.
            self.cursor = event.timestamp + chrono::Duration::milliseconds(1);
        }
    }

    /// Error-severity event messages seen so far, oldest first.
    #[must_use]
    pub fn recent_errors(&self) -> &[String] {
        &self.recent_errors
    }

    /// An event announcing the platform has given up, if one was seen.
    #[must_use]
    pub fn hard_failure(&self) -> Option<&str> {
        self.hard_failure.as_deref()
    }
}

fn snapshot_state(description: &EnvironmentDescription) -> EnvironmentState {
    EnvironmentState {
        exists: true,
        id: Some(description.id.clone()),
        status: Some(description.status),
        health: Some(description.health),
        cname: description.cname.clone(),
    }
}

fn failure_reason(base: String, tail: &EventTail) -> String {
    if tail.recent_errors().is_empty() {
        base
    } else {
        format!("{base}; recent errors: {}", tail.recent_errors().join("; "))
    }
}

async fn poll_until<F>(
    platform: &dyn PlatformApi,
    application: &str,
    environment: &str,
    phase: &str,
    timeout: Duration,
    interval: Duration,
    judge: F,
) -> EngineResult<EnvironmentState>
where
    F: Fn(&EnvironmentDescription) -> PollVerdict,
{
    let deadline = Instant::now() + timeout;
    let mut tail = EventTail::new(application, environment, Utc::now());

    loop {
        match platform.describe_environment(application, environment).await {
            Ok(Some(description)) => {
                tail.drain(platform).await;

                if let Some(message) = tail.hard_failure() {
                    return Err(EngineError::ConvergenceFailed {
                        phase: phase.to_owned(),
                        reason: message.to_owned(),
                    });
                }

                match judge(&description) {
                    PollVerdict::Settled => {
                        info!(
                            environment = %environment,
                            status = %description.status,
                            health = %description.health,
                            phase = %phase,
                            "environment converged"
                        );
                        return Ok(snapshot_state(&description));
                    }
                    PollVerdict::Failed(reason) => {
                        return Err(EngineError::ConvergenceFailed {
                            phase: phase.to_owned(),
                            reason: failure_reason(reason, &tail),
                        });
                    }
                    PollVerdict::Pending => {
                        debug!(
                            environment = %environment,
                            status = %description.status,
                            health = %description.health,
                            phase = %phase,
                            "still waiting"
                        );
                    }
                }
            }
            Ok(None) => {
                return Err(EngineError::ConvergenceFailed {
                    phase: phase.to_owned(),
                    reason: failure_reason(
                        format!("environment {environment} disappeared while waiting"),
                        &tail,
                    ),
                });
            }
            // Transient probe failures must not abort a long wait; fatal
            // errors (revoked credentials and the like) will not heal.
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    environment = %environment,
                    error = %e,
                    "environment probe failed, will retry on next tick"
                );
            }
        }

        if Instant::now() + interval > deadline {
            return Err(EngineError::ConvergenceTimeout {
                phase: phase.to_owned(),
                timeout_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait for the in-flight deployment operation to finish.
///
/// Settles as soon as the status stops transitioning, regardless of health;
/// health recovery is a separate, longer wait. A terminating or terminated
/// environment is a definitive failure.
pub async fn wait_for_deployment(
    platform: &dyn PlatformApi,
    application: &str,
    environment: &str,
    timeout: Duration,
    interval: Duration,
) -> EngineResult<EnvironmentState> {
    info!(
        environment = %environment,
        timeout_secs = timeout.as_secs(),
        "waiting for deployment to settle"
    );

    poll_until(
        platform,
        application,
        environment,
        "deployment",
        timeout,
        interval,
        |description| {
            if description.status.is_terminal_failure() {
                PollVerdict::Failed(format!(
                    "environment reached status {} during deployment",
                    description.status
                ))
            } else if description.status.is_transitioning() {
                PollVerdict::Pending
            } else {
                PollVerdict::Settled
            }
        },
    )
    .await
}

/// Wait for the environment to serve traffic at an acceptable health level.
///
/// Green and Yellow settle the wait. Red does not fail it: environments
/// routinely pass through Red while instances cycle, so only a terminal
/// status fails here and a persistently Red environment surfaces as a
/// timeout instead.
pub async fn wait_for_health(
    platform: &dyn PlatformApi,
    application: &str,
    environment: &str,
    timeout: Duration,
    interval: Duration,
) -> EngineResult<EnvironmentState> {
    info!(
        environment = %environment,
        timeout_secs = timeout.as_secs(),
        "waiting for environment health to recover"
    );

    poll_until(
        platform,
        application,
        environment,
        "health",
        timeout,
        interval,
        |description| {
            if description.status.is_terminal_failure() {
                PollVerdict::Failed(format!(
                    "environment reached status {} while waiting for health",
                    description.status
                ))
            } else if description.health.is_acceptable() {
                PollVerdict::Settled
            } else {
                PollVerdict::Pending
            }
        },
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::mock::MockPlatform;
    use crate::types::{EnvironmentHealth, EnvironmentStatus};

    const FAST: Duration = Duration::from_millis(1);
    const PLENTY: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn deployment_settles_when_status_stops_transitioning() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Updating,
            EnvironmentHealth::Grey,
        );
        platform.script_snapshots([
            (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
            (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
            (EnvironmentStatus::Ready, EnvironmentHealth::Red),
        ]);

        let state = wait_for_deployment(&platform, "orders", "orders-prod", PLENTY, FAST)
            .await
            .unwrap();

        // Settles on status alone, even though health is still Red.
        assert_eq!(state.status, Some(EnvironmentStatus::Ready));
        assert_eq!(state.health, Some(EnvironmentHealth::Red));
    }

    #[tokio::test]
    async fn terminating_environment_fails_deployment_wait() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Updating,
            EnvironmentHealth::Grey,
        );
        platform.script_snapshots([
            (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
            (EnvironmentStatus::Terminating, EnvironmentHealth::Grey),
        ]);

        let result =
            wait_for_deployment(&platform, "orders", "orders-prod", PLENTY, FAST).await;
        match result {
            Err(EngineError::ConvergenceFailed { phase, reason }) => {
                assert_eq!(phase, "deployment");
                assert!(reason.contains("Terminating"));
            }
            other => panic!("expected ConvergenceFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deployment_wait_times_out() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Updating,
            EnvironmentHealth::Grey,
        );
        // Single snapshot repeats forever.
        platform.script_snapshots([(EnvironmentStatus::Updating, EnvironmentHealth::Grey)]);

        let result = wait_for_deployment(
            &platform,
            "orders",
            "orders-prod",
            Duration::from_millis(30),
            FAST,
        )
        .await;
        assert!(matches!(
            result,
            Err(EngineError::ConvergenceTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn health_wait_accepts_yellow() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Ready,
            EnvironmentHealth::Grey,
        );
        platform.script_snapshots([
            (EnvironmentStatus::Ready, EnvironmentHealth::Grey),
            (EnvironmentStatus::Ready, EnvironmentHealth::Yellow),
        ]);

        let state = wait_for_health(&platform, "orders", "orders-prod", PLENTY, FAST)
            .await
            .unwrap();
        assert_eq!(state.health, Some(EnvironmentHealth::Yellow));
    }

    #[tokio::test]
    async fn persistent_red_health_times_out_rather_than_failing() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Ready,
            EnvironmentHealth::Red,
        );
        platform.script_snapshots([(EnvironmentStatus::Ready, EnvironmentHealth::Red)]);

        let result = wait_for_health(
            &platform,
            "orders",
            "orders-prod",
            Duration::from_millis(30),
            FAST,
        )
        .await;
        match result {
            Err(EngineError::ConvergenceTimeout { phase, .. }) => assert_eq!(phase, "health"),
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_environment_fails_the_wait() {
        let platform = MockPlatform::new();
        let result =
            wait_for_deployment(&platform, "orders", "ghost", PLENTY, FAST).await;
        assert!(matches!(
            result,
            Err(EngineError::ConvergenceFailed { .. })
        ));
    }

    #[tokio::test]
    async fn error_events_are_folded_into_the_failure_reason() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Updating,
            EnvironmentHealth::Grey,
        );
        platform.script_snapshots([
            (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
            (EnvironmentStatus::Terminating, EnvironmentHealth::Grey),
        ]);
        platform.push_event(
            Utc::now() + chrono::Duration::seconds(1),
            EventSeverity::Error,
            "instance launch failed: insufficient capacity",
        );

        let result =
            wait_for_deployment(&platform, "orders", "orders-prod", PLENTY, FAST).await;
        match result {
            Err(EngineError::ConvergenceFailed { reason, .. }) => {
                assert!(reason.contains("insufficient capacity"));
            }
            other => panic!("expected ConvergenceFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deployment_failed_event_is_a_hard_failure() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Updating,
            EnvironmentHealth::Grey,
        );
        // Status keeps reading as in-flight; only the event reveals the truth.
        platform.script_snapshots([(EnvironmentStatus::Updating, EnvironmentHealth::Grey)]);
        platform.push_event(
            Utc::now() + chrono::Duration::seconds(1),
            EventSeverity::Error,
            "Failed to deploy application version v7",
        );

        let result =
            wait_for_deployment(&platform, "orders", "orders-prod", PLENTY, FAST).await;
        match result {
            Err(EngineError::ConvergenceFailed { reason, .. }) => {
                assert!(reason.contains("Failed to deploy"));
            }
            other => panic!("expected ConvergenceFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_tail_reports_each_event_once() {
        let platform = MockPlatform::new();
        let start = Utc::now();
        platform.push_event(
            start + chrono::Duration::seconds(1),
            EventSeverity::Error,
            "first",
        );

        let mut tail = EventTail::new("orders", "orders-prod", start);
        tail.drain(&platform).await;
        assert_eq!(tail.recent_errors(), ["first"]);

        // Draining again without new events must not duplicate.
        tail.drain(&platform).await;
        assert_eq!(tail.recent_errors(), ["first"]);

        platform.push_event(
            start + chrono::Duration::seconds(2),
            EventSeverity::Error,
            "second",
        );
        tail.drain(&platform).await;
        assert_eq!(tail.recent_errors(), ["first", "second"]);
    }
}
