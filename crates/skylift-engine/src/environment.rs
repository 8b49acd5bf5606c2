//! Environment mutator: issue create or update commands.
//!
//! Both operations only confirm that the platform *accepted* the request;
//! completion is observed separately by the convergence poller. The remote
//! platform transitions state asynchronously and collapsing this into one
//! synchronous call would misrepresent its model.

use tracing::info;

use crate::api::{
    CreateEnvironmentRequest, EnvironmentDescription, PlatformApi, UpdateEnvironmentRequest,
};
use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};
use crate::retry::retry;
use crate::types::{
    DeploymentRequest, OptionSetting, IAM_NAMESPACE, INSTANCE_PROFILE_OPTION,
    SERVICE_ROLE_OPTION,
};

fn has_setting(settings: &[OptionSetting], namespace: &str, option_name: &str) -> bool {
    settings
        .iter()
        .any(|s| s.namespace == namespace && s.option_name == option_name)
}

/// Validate the local preconditions for environment creation.
///
/// The platform will reject a create without these anyway, but much later
/// and with a worse message; failing before the remote call keeps the error
/// in the precondition category where it belongs.
pub fn validate_create(request: &DeploymentRequest) -> EngineResult<()> {
    if !request.platform.is_specified() {
        return Err(EngineError::validation(
            "creating an environment requires a solution stack or a platform ARN",
        ));
    }

    let settings = request.option_settings.as_deref().unwrap_or_default();
    if !has_setting(settings, IAM_NAMESPACE, INSTANCE_PROFILE_OPTION) {
        return Err(EngineError::validation(format!(
            "creating an environment requires the {IAM_NAMESPACE}/{INSTANCE_PROFILE_OPTION} option setting"
        )));
    }
    if !has_setting(settings, IAM_NAMESPACE, SERVICE_ROLE_OPTION) {
        return Err(EngineError::validation(format!(
            "creating an environment requires the {IAM_NAMESPACE}/{SERVICE_ROLE_OPTION} option setting"
        )));
    }

    Ok(())
}

/// Ask the platform to create the environment described by `request`.
pub async fn create_environment(
    platform: &dyn PlatformApi,
    policy: &RetryPolicy,
    request: &DeploymentRequest,
) -> EngineResult<EnvironmentDescription> {
    validate_create(request)?;

    let command = CreateEnvironmentRequest {
        application: request.application.clone(),
        environment: request.environment.clone(),
        version_label: request.version_label.clone(),
        platform: request.platform.clone(),
        option_settings: request.option_settings.clone().unwrap_or_default(),
        cname_prefix: request.effective_cname_prefix().to_owned(),
    };

    let description = retry(policy, "create environment", || {
        platform.create_environment(&command)
    })
    .await?;

    info!(
        environment = %description.name,
        id = %description.id,
        version = %request.version_label,
        "environment creation accepted"
    );

    Ok(description)
}

/// Ask the platform to switch an existing environment to a new version.
///
/// Omitting the platform selector leaves the environment's current platform
/// untouched; platform changes must be explicit.
pub async fn update_environment(
    platform: &dyn PlatformApi,
    policy: &RetryPolicy,
    request: &DeploymentRequest,
) -> EngineResult<EnvironmentDescription> {
    let command = UpdateEnvironmentRequest {
        application: request.application.clone(),
        environment: request.environment.clone(),
        version_label: request.version_label.clone(),
        platform: request.platform.clone(),
        option_settings: request.option_settings.clone(),
    };

    let description = retry(policy, "update environment", || {
        platform.update_environment(&command)
    })
    .await?;

    info!(
        environment = %description.name,
        id = %description.id,
        version = %request.version_label,
        "environment update accepted"
    );

    Ok(description)
}
