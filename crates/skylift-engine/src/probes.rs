//! Read-only existence probes against the platform service.

use tracing::{debug, warn};

use crate::api::PlatformApi;
use crate::error::{EngineError, EngineResult};
use crate::types::{ArtifactLocation, EnvironmentState};

/// Check whether an application version exists.
///
/// Query errors are treated as "does not exist": the caller will fall back
/// to creating the version, which is the conservative direction here.
pub async fn version_exists(platform: &dyn PlatformApi, application: &str, label: &str) -> bool {
    match platform.describe_version(application, label).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!(
                application = %application,
                label = %label,
                error = %e,
                "version existence query failed, assuming absent"
            );
            false
        }
    }
}

/// Look up the stored source bundle location of an existing version.
///
/// Unlike [`version_exists`] this fails loudly: it is only called after the
/// caller has asserted the version exists, so a missing version or
/// incomplete storage metadata here is real corruption worth surfacing.
pub async fn version_location(
    platform: &dyn PlatformApi,
    application: &str,
    label: &str,
) -> EngineResult<ArtifactLocation> {
    let description = platform
        .describe_version(application, label)
        .await?
        .ok_or_else(|| {
            EngineError::not_found(format!(
                "version {label} of application {application} does not exist"
            ))
        })?;

    match (description.bucket, description.key) {
        (Some(bucket), Some(key)) => Ok(ArtifactLocation { bucket, key }),
        _ => Err(EngineError::not_found(format!(
            "version {label} of application {application} has no stored source bundle location"
        ))),
    }
}

/// Probe environment existence and current status/health.
///
/// A `Terminated` environment cannot receive updates, so it maps to
/// `exists = false` and the caller branches into creation. A genuine
/// not-found also maps to absent; any other query error propagates, because
/// confusing "couldn't tell" with "truly absent" could trigger an unwanted
/// create over a live environment.
pub async fn environment_state(
    platform: &dyn PlatformApi,
    application: &str,
    environment: &str,
) -> EngineResult<EnvironmentState> {
    let Some(description) = platform
        .describe_environment(application, environment)
        .await?
    else {
        debug!(environment = %environment, "environment not found");
        return Ok(EnvironmentState::absent());
    };

    if description.status == crate::types::EnvironmentStatus::Terminated {
        debug!(environment = %environment, "environment is terminated, treating as absent");
        return Ok(EnvironmentState::absent());
    }

    Ok(EnvironmentState {
        exists: true,
        id: Some(description.id),
        status: Some(description.status),
        health: Some(description.health),
        cname: description.cname,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::api::mock::MockPlatform;
    use crate::api::{
        CreateEnvironmentRequest, CreateVersionRequest, EnvironmentDescription,
        EventDescription, UpdateEnvironmentRequest, VersionDescription,
    };
    use crate::types::{EnvironmentHealth, EnvironmentStatus};

    #[tokio::test]
    async fn version_exists_for_seeded_version() {
        let platform = MockPlatform::new();
        platform.seed_version("orders", "v1", "bucket", "orders/v1.zip");

        assert!(version_exists(&platform, "orders", "v1").await);
        assert!(!version_exists(&platform, "orders", "v2").await);
    }

    #[tokio::test]
    async fn version_location_found() {
        let platform = MockPlatform::new();
        platform.seed_version("orders", "v1", "bucket", "orders/v1.zip");

        let location = version_location(&platform, "orders", "v1").await.unwrap();
        assert_eq!(location.bucket, "bucket");
        assert_eq!(location.key, "orders/v1.zip");
    }

    #[tokio::test]
    async fn version_location_fails_loudly_when_absent() {
        let platform = MockPlatform::new();
        let result = version_location(&platform, "orders", "ghost").await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn terminated_environment_maps_to_absent() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Terminated,
            EnvironmentHealth::Grey,
        );

        let state = environment_state(&platform, "orders", "orders-prod")
            .await
            .unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn ready_environment_reports_state() {
        let platform = MockPlatform::new();
        platform.seed_environment(
            "orders",
            "orders-prod",
            EnvironmentStatus::Ready,
            EnvironmentHealth::Green,
        );

        let state = environment_state(&platform, "orders", "orders-prod")
            .await
            .unwrap();
        assert!(state.exists);
        assert_eq!(state.status, Some(EnvironmentStatus::Ready));
        assert_eq!(state.health, Some(EnvironmentHealth::Green));
        assert!(state.cname.is_some());
    }

    /// Platform stub whose queries always fail.
    struct FailingPlatform {
        queried: AtomicBool,
    }

    #[async_trait]
    impl crate::api::PlatformApi for FailingPlatform {
        async fn describe_version(
            &self,
            _application: &str,
            _label: &str,
        ) -> EngineResult<Option<VersionDescription>> {
            self.queried.store(true, Ordering::SeqCst);
            Err(EngineError::remote("internal server error"))
        }

        async fn create_version(&self, _request: &CreateVersionRequest) -> EngineResult<()> {
            unreachable!("not used by probes")
        }

        async fn describe_environment(
            &self,
            _application: &str,
            _environment: &str,
        ) -> EngineResult<Option<EnvironmentDescription>> {
            Err(EngineError::remote("internal server error"))
        }

        async fn create_environment(
            &self,
            _request: &CreateEnvironmentRequest,
        ) -> EngineResult<EnvironmentDescription> {
            unreachable!("not used by probes")
        }

        async fn update_environment(
            &self,
            _request: &UpdateEnvironmentRequest,
        ) -> EngineResult<EnvironmentDescription> {
            unreachable!("not used by probes")
        }

        async fn environment_events(
            &self,
            _application: &str,
            _environment: &str,
            _start_time: Option<DateTime<Utc>>,
        ) -> EngineResult<Vec<EventDescription>> {
            unreachable!("not used by probes")
        }
    }

    #[tokio::test]
    async fn version_query_error_is_swallowed_as_absent() {
        let platform = FailingPlatform {
            queried: AtomicBool::new(false),
        };
        assert!(!version_exists(&platform, "orders", "v1").await);
        assert!(platform.queried.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn environment_query_error_propagates() {
        let platform = FailingPlatform {
            queried: AtomicBool::new(false),
        };
        let result = environment_state(&platform, "orders", "orders-prod").await;
        assert!(matches!(result, Err(EngineError::Remote(_))));
    }
}
