//! Outbound control-plane boundary.
//!
//! Three logical services: identity (who am I), object storage (buckets and
//! source bundles) and the application platform (versions, environments,
//! events). Each is a trait so the orchestrator can run against real HTTP
//! clients or the in-memory fakes in [`mock`].

pub mod http;
pub mod mock;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{EnvironmentHealth, EnvironmentStatus, OptionSetting, PlatformSelector};

/// Resolves the caller's account identity.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Resolve the caller's account identifier.
    async fn account_id(&self) -> EngineResult<String>;
}

/// Result of an ownership-aware bucket existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketProbe {
    /// The bucket exists and belongs to the expected account.
    Owned,
    /// The bucket exists but belongs to a different account.
    ForeignOwner,
    /// No such bucket.
    Missing,
}

/// Outcome of a bucket creation call.
///
/// Bucket names are global, so a create can race with another actor;
/// `AlreadyExists` tells the caller to re-verify ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketCreation {
    /// The bucket was created by this call.
    Created,
    /// The bucket already existed when the call landed.
    AlreadyExists,
}

/// Object storage service: buckets and source bundle objects.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Check bucket existence scoped to the expected owner account.
    async fn probe_bucket(&self, bucket: &str, expected_owner: &str)
        -> EngineResult<BucketProbe>;

    /// Create a bucket. `location` carries the region qualifier; `None`
    /// means the storage backend's default region.
    async fn create_bucket(&self, bucket: &str, location: Option<&str>)
        -> EngineResult<BucketCreation>;

    /// Upload a local file, streaming from disk.
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> EngineResult<()>;
}

/// A registered application version as described by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDescription {
    /// Version label.
    pub label: String,
    /// Source bundle bucket, when recorded.
    pub bucket: Option<String>,
    /// Source bundle key, when recorded.
    pub key: Option<String>,
}

/// An environment as described by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentDescription {
    /// Environment identifier.
    pub id: String,
    /// Environment name.
    pub name: String,
    /// Lifecycle status.
    pub status: EnvironmentStatus,
    /// Traffic-serving health.
    pub health: EnvironmentHealth,
    /// Public CNAME, when assigned.
    pub cname: Option<String>,
    /// Version label currently running, when known.
    pub version_label: Option<String>,
}

/// Severity of a platform event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    /// Informational.
    Info,
    /// Something degraded but the operation continues.
    Warn,
    /// The operation failed or is failing.
    Error,
}

/// A status-change event emitted by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescription {
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub severity: EventSeverity,
    /// Human-readable message.
    pub message: String,
}

/// Request to register a new application version.
#[derive(Debug, Clone, Serialize)]
pub struct CreateVersionRequest {
    /// Application name.
    pub application: String,
    /// Version label.
    pub label: String,
    /// Source bundle bucket.
    pub bucket: String,
    /// Source bundle key.
    pub key: String,
    /// Create the parent application if it does not exist yet.
    pub auto_create_application: bool,
}

/// Request to create a new environment.
#[derive(Debug, Clone, Serialize)]
pub struct CreateEnvironmentRequest {
    /// Application name.
    pub application: String,
    /// Environment name.
    pub environment: String,
    /// Version label to launch with.
    pub version_label: String,
    /// Concrete platform selection (required on create).
    pub platform: PlatformSelector,
    /// Fully resolved option settings, including the mandatory role entries.
    pub option_settings: Vec<OptionSetting>,
    /// External name prefix for the environment's public address.
    pub cname_prefix: String,
}

/// Request to update an existing environment.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEnvironmentRequest {
    /// Application name.
    pub application: String,
    /// Environment name.
    pub environment: String,
    /// Version label to switch to.
    pub version_label: String,
    /// Platform selection; `Unspecified` leaves the current platform as-is.
    pub platform: PlatformSelector,
    /// Option settings to apply; `None` leaves configuration untouched.
    pub option_settings: Option<Vec<OptionSetting>>,
}

/// Application platform service: versions, environments and events.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Describe a version by application and label; `None` when absent.
    async fn describe_version(
        &self,
        application: &str,
        label: &str,
    ) -> EngineResult<Option<VersionDescription>>;

    /// Register a new application version.
    async fn create_version(&self, request: &CreateVersionRequest) -> EngineResult<()>;

    /// Describe an environment by application and name; `None` when absent.
    async fn describe_environment(
        &self,
        application: &str,
        environment: &str,
    ) -> EngineResult<Option<EnvironmentDescription>>;

    /// Ask the platform to create an environment. Returns the accepted
    /// environment description; completion is observed separately by
    /// polling.
    async fn create_environment(
        &self,
        request: &CreateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription>;

    /// Ask the platform to update an environment. Fire-and-forget like
    /// create: only acceptance is confirmed here.
    async fn update_environment(
        &self,
        request: &UpdateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription>;

    /// Fetch environment events, chronologically ordered, optionally
    /// filtered to those at or after `start_time`.
    async fn environment_events(
        &self,
        application: &str,
        environment: &str,
        start_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<EventDescription>>;
}
