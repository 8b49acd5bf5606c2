//! Deployment orchestrator.
//!
//! Sequences one deployment end to end: resolve identity, get the source
//! bundle into storage (or reuse a registered version), register the
//! version, then create or update the environment and optionally wait for
//! it to converge. Each step goes through the retrier; the orchestrator
//! itself holds no retry logic.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::api::{CreateVersionRequest, IdentityApi, PlatformApi, StorageApi};
use crate::artifact::{publish, PublishArtifact};
use crate::client::RegionClients;
use crate::config::PollConfig;
use crate::environment::{create_environment, update_environment};
use crate::error::{EngineError, EngineResult};
use crate::poll::{wait_for_deployment, wait_for_health};
use crate::probes::{environment_state, version_exists, version_location};
use crate::retry::retry;
use crate::types::{
    ArtifactLocation, DeployAction, DeploymentOutcome, DeploymentRequest, EnvironmentState,
};

/// Drives one deployment against a region's service clients.
pub struct Deployer {
    identity: Arc<dyn IdentityApi>,
    storage: Arc<dyn StorageApi>,
    platform: Arc<dyn PlatformApi>,
    poll: PollConfig,
    default_storage_region: String,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("poll", &self.poll)
            .field("default_storage_region", &self.default_storage_region)
            .finish_non_exhaustive()
    }
}

impl Deployer {
    /// Build a deployer over a region's clients.
    #[must_use]
    pub fn new(
        clients: &RegionClients,
        poll: PollConfig,
        default_storage_region: impl Into<String>,
    ) -> Self {
        Self {
            identity: clients.identity.clone(),
            storage: clients.storage.clone(),
            platform: clients.platform.clone(),
            poll,
            default_storage_region: default_storage_region.into(),
        }
    }

    /// Run one deployment to completion.
    ///
    /// `artifact` is the local source bundle to upload; it may be `None`
    /// only when an already-registered version is being reused. Returns the
    /// action taken and the final observed environment state. Partial
    /// progress is not rolled back on failure: an uploaded bundle or a
    /// registered version stays registered, and rerunning with
    /// `use_existing_version` picks it back up.
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        artifact: Option<&Path>,
    ) -> EngineResult<DeploymentOutcome> {
        let started = Instant::now();
        request.validate()?;

        info!(
            application = %request.application,
            environment = %request.environment,
            version = %request.version_label,
            region = %request.region,
            "starting deployment"
        );

        let account_id = retry(&request.retry, "resolve account identity", || {
            self.identity.account_id()
        })
        .await?;

        let location = self.resolve_version(request, artifact, &account_id).await?;
        info!(
            version = %request.version_label,
            location = %location,
            "version ready"
        );

        let state = environment_state(
            self.platform.as_ref(),
            &request.application,
            &request.environment,
        )
        .await?;

        let action = if state.exists {
            update_environment(self.platform.as_ref(), &request.retry, request).await?;
            DeployAction::Update
        } else {
            if !request.create_environment_if_missing {
                return Err(EngineError::validation(format!(
                    "environment {} does not exist and environment creation is disabled",
                    request.environment
                )));
            }
            create_environment(self.platform.as_ref(), &request.retry, request).await?;
            DeployAction::Create
        };

        let environment = self.converge(request).await?;

        let outcome = DeploymentOutcome {
            action,
            version_label: request.version_label.clone(),
            environment,
            elapsed_secs: started.elapsed().as_secs(),
        };
        info!(
            action = %outcome.action,
            version = %outcome.version_label,
            elapsed_secs = outcome.elapsed_secs,
            "deployment finished"
        );
        Ok(outcome)
    }

    /// Get a registered version with the requested label into place.
    ///
    /// Reuse short-circuits both the upload and the registration; otherwise
    /// the local bundle is published and registered. The existence probe is
    /// deliberately forgiving (a failed query falls through to the publish
    /// path), which keeps reuse an optimization rather than a correctness
    /// dependency.
    async fn resolve_version(
        &self,
        request: &DeploymentRequest,
        artifact: Option<&Path>,
        account_id: &str,
    ) -> EngineResult<ArtifactLocation> {
        if request.use_existing_version
            && version_exists(
                self.platform.as_ref(),
                &request.application,
                &request.version_label,
            )
            .await
        {
            info!(
                version = %request.version_label,
                "reusing registered version, skipping upload"
            );
            return version_location(
                self.platform.as_ref(),
                &request.application,
                &request.version_label,
            )
            .await;
        }

        let Some(artifact) = artifact else {
            return Err(EngineError::validation(format!(
                "version {} is not registered and no source bundle was supplied",
                request.version_label
            )));
        };

        let location = publish(
            self.storage.as_ref(),
            &request.retry,
            PublishArtifact {
                region: &request.region,
                default_region: &self.default_storage_region,
                account_id,
                application: &request.application,
                version_label: &request.version_label,
                bucket: request.bucket.as_deref(),
                create_bucket_if_missing: request.create_bucket_if_missing,
            },
            artifact,
        )
        .await?;

        let create = CreateVersionRequest {
            application: request.application.clone(),
            label: request.version_label.clone(),
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            auto_create_application: true,
        };
        retry(&request.retry, "register version", || {
            self.platform.create_version(&create)
        })
        .await?;

        Ok(location)
    }

    /// Run the enabled wait phases and return the final environment state.
    async fn converge(&self, request: &DeploymentRequest) -> EngineResult<EnvironmentState> {
        let interval = self.poll.interval();

        if request.wait_for_deployment {
            wait_for_deployment(
                self.platform.as_ref(),
                &request.application,
                &request.environment,
                request.deployment_timeout,
                interval,
            )
            .await?;
        }

        if request.wait_for_health {
            return wait_for_health(
                self.platform.as_ref(),
                &request.application,
                &request.environment,
                request.health_timeout,
                interval,
            )
            .await;
        }

        // No health wait: report whatever the platform says right now.
        environment_state(
            self.platform.as_ref(),
            &request.application,
            &request.environment,
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::api::mock::{MockIdentity, MockPlatform, MockStorage};
    use crate::config::RetryPolicy;
    use crate::types::{OptionSetting, PlatformSelector};
    use crate::types::{IAM_NAMESPACE, INSTANCE_PROFILE_OPTION, SERVICE_ROLE_OPTION};

    const ACCOUNT: &str = "123456789012";

    fn deployer(platform: MockPlatform, storage: MockStorage) -> Deployer {
        Deployer {
            identity: Arc::new(MockIdentity::new(ACCOUNT)),
            storage: Arc::new(storage),
            platform: Arc::new(platform),
            poll: PollConfig::with_interval_secs(0),
            default_storage_region: "us-east-1".to_owned(),
        }
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            region: "eu-west-1".to_owned(),
            application: "orders".to_owned(),
            environment: "orders-prod".to_owned(),
            version_label: "v7".to_owned(),
            platform: PlatformSelector::SolutionStack("64bit linux v4".to_owned()),
            option_settings: Some(vec![
                OptionSetting::new(IAM_NAMESPACE, INSTANCE_PROFILE_OPTION, "app-instances"),
                OptionSetting::new(IAM_NAMESPACE, SERVICE_ROLE_OPTION, "platform-service"),
            ]),
            bucket: None,
            create_bucket_if_missing: true,
            create_environment_if_missing: true,
            use_existing_version: false,
            cname_prefix: None,
            wait_for_deployment: false,
            wait_for_health: false,
            deployment_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
        }
    }

    fn bundle() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        file.write_all(b"bundle bytes").unwrap();
        file
    }

    #[tokio::test]
    async fn missing_artifact_without_reusable_version_fails() {
        let deployer = deployer(MockPlatform::new(), MockStorage::new(ACCOUNT));
        let mut req = request();
        req.use_existing_version = true;

        let result = deployer.deploy(&req, None).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_environment_with_create_disabled_fails() {
        let deployer = deployer(MockPlatform::new(), MockStorage::new(ACCOUNT));
        let mut req = request();
        req.create_environment_if_missing = false;
        let file = bundle();

        let result = deployer.deploy(&req, Some(file.path())).await;
        match result {
            Err(EngineError::Validation(msg)) => {
                assert!(msg.contains("orders-prod"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reuse_skips_upload_even_with_artifact_supplied() {
        let platform = MockPlatform::new();
        platform.seed_version("orders", "v7", "bucket", "orders/v7.zip");
        platform.seed_environment(
            "orders",
            "orders-prod",
            crate::types::EnvironmentStatus::Ready,
            crate::types::EnvironmentHealth::Green,
        );
        let storage = MockStorage::new(ACCOUNT);
        let deployer = deployer(platform, storage);

        let mut req = request();
        req.use_existing_version = true;
        let file = bundle();

        let outcome = deployer.deploy(&req, Some(file.path())).await.unwrap();
        assert_eq!(outcome.action, DeployAction::Update);
    }
}
