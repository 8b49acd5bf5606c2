//! In-memory service fakes.
//!
//! Used by the integration tests and by the CLI's offline mode
//! (`api.mode = "mock"`). Every mutation is counted so tests can assert
//! which remote calls were (not) issued.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::{
    BucketCreation, BucketProbe, CreateEnvironmentRequest, CreateVersionRequest,
    EnvironmentDescription, EventDescription, IdentityApi, PlatformApi, StorageApi,
    UpdateEnvironmentRequest, VersionDescription,
};
use crate::error::{EngineError, EngineResult};
use crate::types::{EnvironmentHealth, EnvironmentStatus};

fn poisoned() -> EngineError {
    EngineError::remote("mock state lock poisoned")
}

/// Identity fake returning a fixed account.
#[derive(Debug)]
pub struct MockIdentity {
    account_id: String,
}

impl MockIdentity {
    /// Create an identity fake for the given account.
    #[must_use]
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

impl Default for MockIdentity {
    fn default() -> Self {
        Self::new("123456789012")
    }
}

#[async_trait]
impl IdentityApi for MockIdentity {
    async fn account_id(&self) -> EngineResult<String> {
        Ok(self.account_id.clone())
    }
}

/// Object storage fake with ownership-aware buckets.
#[derive(Debug, Default)]
pub struct MockStorage {
    /// Bucket name to owning account.
    buckets: RwLock<HashMap<String, String>>,
    /// "bucket/key" to object size in bytes.
    objects: RwLock<HashMap<String, u64>>,
    /// Account recorded as owner for buckets created through this fake.
    creating_account: RwLock<Option<String>>,
    create_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MockStorage {
    /// Create an empty storage fake; created buckets are owned by `account`.
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        let storage = Self::default();
        if let Ok(mut creating) = storage.creating_account.write() {
            *creating = Some(account.into());
        }
        storage
    }

    /// Pre-seed a bucket with an owner.
    pub fn seed_bucket(&self, bucket: impl Into<String>, owner: impl Into<String>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.insert(bucket.into(), owner.into());
        }
    }

    /// Number of bucket creation calls issued.
    #[must_use]
    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of object upload calls issued.
    #[must_use]
    pub fn put_call_count(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Whether an object was stored under `bucket/key`.
    #[must_use]
    pub fn has_object(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(&format!("{bucket}/{key}")))
            .unwrap_or(false)
    }
}

#[async_trait]
impl StorageApi for MockStorage {
    async fn probe_bucket(
        &self,
        bucket: &str,
        expected_owner: &str,
    ) -> EngineResult<BucketProbe> {
        let buckets = self.buckets.read().map_err(|_| poisoned())?;
        Ok(match buckets.get(bucket) {
            Some(owner) if owner == expected_owner => BucketProbe::Owned,
            Some(_) => BucketProbe::ForeignOwner,
            None => BucketProbe::Missing,
        })
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        _location: Option<&str>,
    ) -> EngineResult<BucketCreation> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let owner = self
            .creating_account
            .read()
            .map_err(|_| poisoned())?
            .clone()
            .unwrap_or_else(|| "123456789012".to_owned());

        let mut buckets = self.buckets.write().map_err(|_| poisoned())?;
        if buckets.contains_key(bucket) {
            return Ok(BucketCreation::AlreadyExists);
        }
        buckets.insert(bucket.to_owned(), owner);
        Ok(BucketCreation::Created)
    }

    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> EngineResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        {
            let buckets = self.buckets.read().map_err(|_| poisoned())?;
            if !buckets.contains_key(bucket) {
                return Err(EngineError::remote(format!("no such bucket: {bucket}")));
            }
        }

        let size = tokio::fs::metadata(source).await?.len();
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(format!("{bucket}/{key}"), size);
        Ok(())
    }
}

/// Application platform fake.
///
/// `describe_environment` walks an optional scripted sequence of
/// (status, health) snapshots so tests can drive the convergence loops; the
/// last scripted snapshot repeats once the script is exhausted. Without a
/// script, created and updated environments settle immediately.
#[derive(Debug, Default)]
pub struct MockPlatform {
    versions: RwLock<HashMap<String, VersionDescription>>,
    environments: RwLock<HashMap<String, EnvironmentDescription>>,
    events: RwLock<Vec<EventDescription>>,
    snapshots: Mutex<VecDeque<(EnvironmentStatus, EnvironmentHealth)>>,
    create_version_calls: AtomicUsize,
    create_environment_calls: AtomicUsize,
    update_environment_calls: AtomicUsize,
}

fn env_key(application: &str, environment: &str) -> String {
    format!("{application}/{environment}")
}

fn version_key(application: &str, label: &str) -> String {
    format!("{application}/{label}")
}

impl MockPlatform {
    /// Create an empty platform fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a registered version.
    pub fn seed_version(&self, application: &str, label: &str, bucket: &str, key: &str) {
        if let Ok(mut versions) = self.versions.write() {
            versions.insert(
                version_key(application, label),
                VersionDescription {
                    label: label.to_owned(),
                    bucket: Some(bucket.to_owned()),
                    key: Some(key.to_owned()),
                },
            );
        }
    }

    /// Pre-seed an environment snapshot.
    pub fn seed_environment(
        &self,
        application: &str,
        environment: &str,
        status: EnvironmentStatus,
        health: EnvironmentHealth,
    ) {
        if let Ok(mut environments) = self.environments.write() {
            environments.insert(
                env_key(application, environment),
                EnvironmentDescription {
                    id: format!("e-{environment}"),
                    name: environment.to_owned(),
                    status,
                    health,
                    cname: Some(format!("{environment}.skylift.example.com")),
                    version_label: None,
                },
            );
        }
    }

    /// Script the (status, health) sequence that successive
    /// `describe_environment` calls will observe.
    pub fn script_snapshots(
        &self,
        snapshots: impl IntoIterator<Item = (EnvironmentStatus, EnvironmentHealth)>,
    ) {
        if let Ok(mut script) = self.snapshots.lock() {
            script.extend(snapshots);
        }
    }

    /// Append a platform event.
    pub fn push_event(
        &self,
        timestamp: DateTime<Utc>,
        severity: crate::api::EventSeverity,
        message: impl Into<String>,
    ) {
        if let Ok(mut events) = self.events.write() {
            events.push(EventDescription {
                timestamp,
                severity,
                message: message.into(),
            });
        }
    }

    /// Number of version registration calls issued.
    #[must_use]
    pub fn create_version_call_count(&self) -> usize {
        self.create_version_calls.load(Ordering::SeqCst)
    }

    /// Number of environment creation calls issued.
    #[must_use]
    pub fn create_environment_call_count(&self) -> usize {
        self.create_environment_calls.load(Ordering::SeqCst)
    }

    /// Number of environment update calls issued.
    #[must_use]
    pub fn update_environment_call_count(&self) -> usize {
        self.update_environment_calls.load(Ordering::SeqCst)
    }

    fn next_snapshot(&self) -> Option<(EnvironmentStatus, EnvironmentHealth)> {
        let mut script = self.snapshots.lock().ok()?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        }
    }

    fn has_script(&self) -> bool {
        self.snapshots.lock().map(|s| !s.is_empty()).unwrap_or(false)
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn describe_version(
        &self,
        application: &str,
        label: &str,
    ) -> EngineResult<Option<VersionDescription>> {
        let versions = self.versions.read().map_err(|_| poisoned())?;
        Ok(versions.get(&version_key(application, label)).cloned())
    }

    async fn create_version(&self, request: &CreateVersionRequest) -> EngineResult<()> {
        self.create_version_calls.fetch_add(1, Ordering::SeqCst);

        let mut versions = self.versions.write().map_err(|_| poisoned())?;
        let key = version_key(&request.application, &request.label);
        if versions.contains_key(&key) {
            return Err(EngineError::VersionConflict {
                application: request.application.clone(),
                label: request.label.clone(),
            });
        }
        versions.insert(
            key,
            VersionDescription {
                label: request.label.clone(),
                bucket: Some(request.bucket.clone()),
                key: Some(request.key.clone()),
            },
        );
        Ok(())
    }

    async fn describe_environment(
        &self,
        application: &str,
        environment: &str,
    ) -> EngineResult<Option<EnvironmentDescription>> {
        let key = env_key(application, environment);

        let snapshot = self.next_snapshot();
        let mut environments = self.environments.write().map_err(|_| poisoned())?;
        let Some(description) = environments.get_mut(&key) else {
            return Ok(None);
        };

        if let Some((status, health)) = snapshot {
            description.status = status;
            description.health = health;
        }

        Ok(Some(description.clone()))
    }

    async fn create_environment(
        &self,
        request: &CreateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription> {
        self.create_environment_calls.fetch_add(1, Ordering::SeqCst);

        let key = env_key(&request.application, &request.environment);
        let mut environments = self.environments.write().map_err(|_| poisoned())?;
        if environments
            .get(&key)
            .is_some_and(|e| !e.status.is_terminal_failure())
        {
            return Err(EngineError::remote(format!(
                "environment {} already exists",
                request.environment
            )));
        }

        let (status, health) = if self.has_script() {
            (EnvironmentStatus::Launching, EnvironmentHealth::Grey)
        } else {
            (EnvironmentStatus::Ready, EnvironmentHealth::Green)
        };

        let description = EnvironmentDescription {
            id: format!("e-{}", request.environment),
            name: request.environment.clone(),
            status,
            health,
            cname: Some(format!(
                "{}.skylift.example.com",
                request.cname_prefix
            )),
            version_label: Some(request.version_label.clone()),
        };
        environments.insert(key, description.clone());
        Ok(description)
    }

    async fn update_environment(
        &self,
        request: &UpdateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription> {
        self.update_environment_calls.fetch_add(1, Ordering::SeqCst);

        let key = env_key(&request.application, &request.environment);
        let mut environments = self.environments.write().map_err(|_| poisoned())?;
        let Some(description) = environments.get_mut(&key) else {
            return Err(EngineError::not_found(format!(
                "environment {} not found for update",
                request.environment
            )));
        };

        if self.has_script() {
            description.status = EnvironmentStatus::Updating;
            description.health = EnvironmentHealth::Grey;
        } else {
            description.status = EnvironmentStatus::Ready;
            description.health = EnvironmentHealth::Green;
        }
        description.version_label = Some(request.version_label.clone());
        Ok(description.clone())
    }

    async fn environment_events(
        &self,
        _application: &str,
        _environment: &str,
        start_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<EventDescription>> {
        let events = self.events.read().map_err(|_| poisoned())?;
        let mut selected: Vec<EventDescription> = events
            .iter()
            .filter(|e| start_time.map_or(true, |start| e.timestamp >= start))
            .cloned()
            .collect();
        selected.sort_by_key(|e| e.timestamp);
        Ok(selected)
    }
}
