//! Core types for skylift-engine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};

/// A single platform configuration entry.
///
/// A list of these configures platform behaviour for an environment. Two
/// entries (the instance profile and the service role, both in the
/// [`IAM_NAMESPACE`] namespace) are mandatory when creating an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OptionSetting {
    /// Configuration namespace.
    pub namespace: String,
    /// Option name within the namespace.
    pub option_name: String,
    /// Option value.
    pub value: String,
}

impl OptionSetting {
    /// Create a new option setting.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        option_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            option_name: option_name.into(),
            value: value.into(),
        }
    }
}

/// Namespace holding the mandatory role settings.
pub const IAM_NAMESPACE: &str = "platform:iam";

/// Option name for the instance profile role setting.
pub const INSTANCE_PROFILE_OPTION: &str = "InstanceProfile";

/// Option name for the service role setting.
pub const SERVICE_ROLE_OPTION: &str = "ServiceRole";

/// Platform selector for an environment.
///
/// At most one of the two concrete selectors may be supplied; the invariant
/// is structural rather than checked ad hoc on two nullable fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformSelector {
    /// Named solution stack (e.g. a platform/runtime release name).
    SolutionStack(String),
    /// Explicit platform ARN.
    PlatformArn(String),
    /// Leave the environment's current platform untouched.
    #[default]
    Unspecified,
}

impl PlatformSelector {
    /// Whether a concrete platform was selected.
    #[must_use]
    pub const fn is_specified(&self) -> bool {
        !matches!(self, Self::Unspecified)
    }
}

/// Where a version's source bundle lives in the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// Storage bucket name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Lifecycle phase of an environment, orthogonal to health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    /// Environment is being created.
    Launching,
    /// A configuration or version change is being applied.
    Updating,
    /// Environment is stable.
    Ready,
    /// Environment is shutting down.
    Terminating,
    /// Environment no longer runs; treated as non-existent for
    /// create-vs-update branching.
    Terminated,
}

impl EnvironmentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "Launching",
            Self::Updating => "Updating",
            Self::Ready => "Ready",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
        }
    }

    /// Whether a deployment operation is still in flight.
    #[must_use]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self, Self::Launching | Self::Updating)
    }

    /// Whether the environment is on its way out (or gone).
    ///
    /// Observing this mid-deployment is a definitive failure signal.
    #[must_use]
    pub const fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time traffic-serving condition of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentHealth {
    /// Healthy and serving traffic.
    Green,
    /// Degraded but serving traffic.
    Yellow,
    /// Failing.
    Red,
    /// Unknown or transitioning.
    Grey,
}

impl EnvironmentHealth {
    /// Get the health name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "Green",
            Self::Yellow => "Yellow",
            Self::Red => "Red",
            Self::Grey => "Grey",
        }
    }

    /// Whether this health level counts as a terminal success.
    ///
    /// Yellow signals partial degradation but the environment is serving
    /// traffic, so both Green and Yellow are acceptable.
    #[must_use]
    pub const fn is_acceptable(&self) -> bool {
        matches!(self, Self::Green | Self::Yellow)
    }
}

impl fmt::Display for EnvironmentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote-observed snapshot of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Whether the environment exists (Terminated maps to `false`).
    pub exists: bool,
    /// Environment identifier, when known.
    pub id: Option<String>,
    /// Lifecycle status.
    pub status: Option<EnvironmentStatus>,
    /// Traffic-serving health.
    pub health: Option<EnvironmentHealth>,
    /// Public CNAME/URL, when known.
    pub cname: Option<String>,
}

impl EnvironmentState {
    /// Snapshot for an environment that does not exist.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            exists: false,
            id: None,
            status: None,
            health: None,
            cname: None,
        }
    }
}

/// Which mutation the orchestrator performed on the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    /// A new environment was created.
    Create,
    /// An existing environment was updated.
    Update,
}

impl DeployAction {
    /// Get the action name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable input bundle for one deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Target region.
    pub region: String,
    /// Application name.
    pub application: String,
    /// Environment name within the application.
    pub environment: String,
    /// Version label to deploy.
    pub version_label: String,
    /// Platform selector (create requires a concrete selection).
    pub platform: PlatformSelector,
    /// Option settings to apply. `None` leaves an updated environment's
    /// configuration untouched.
    pub option_settings: Option<Vec<OptionSetting>>,
    /// Bucket override; a deterministic default is derived when absent.
    pub bucket: Option<String>,
    /// Whether a missing bucket may be created.
    pub create_bucket_if_missing: bool,
    /// Whether a missing environment may be created.
    pub create_environment_if_missing: bool,
    /// Reuse an already-registered version with this label when one exists,
    /// skipping both upload and registration.
    pub use_existing_version: bool,
    /// External name prefix for a created environment; defaults to the
    /// environment name.
    pub cname_prefix: Option<String>,
    /// Wait for the deployment operation to settle.
    pub wait_for_deployment: bool,
    /// Wait for environment health to recover after the deployment settles.
    pub wait_for_health: bool,
    /// Deadline for the deployment-completion polling phase.
    pub deployment_timeout: Duration,
    /// Deadline for the health-recovery polling phase.
    pub health_timeout: Duration,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
}

impl DeploymentRequest {
    /// Validate request invariants that hold regardless of the branch taken.
    ///
    /// The platform-selector exclusivity invariant is structural (see
    /// [`PlatformSelector`]); this checks what the type system cannot.
    pub fn validate(&self) -> EngineResult<()> {
        if self.version_label.trim().is_empty() {
            return Err(EngineError::validation("version label must not be empty"));
        }
        if self.application.trim().is_empty() {
            return Err(EngineError::validation("application name must not be empty"));
        }
        if self.environment.trim().is_empty() {
            return Err(EngineError::validation("environment name must not be empty"));
        }
        Ok(())
    }

    /// The external name prefix a created environment will use.
    #[must_use]
    pub fn effective_cname_prefix(&self) -> &str {
        self.cname_prefix.as_deref().unwrap_or(&self.environment)
    }
}

/// Final result of a successful deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    /// Which mutation was performed.
    pub action: DeployAction,
    /// Version label that was deployed.
    pub version_label: String,
    /// Final observed environment snapshot.
    pub environment: EnvironmentState,
    /// Wall-clock duration of the run in seconds.
    pub elapsed_secs: u64,
}
