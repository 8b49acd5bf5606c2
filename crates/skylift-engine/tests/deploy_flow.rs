//! End-to-end deployment flows against the in-memory service fakes.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use skylift_engine::api::mock::{MockIdentity, MockPlatform, MockStorage};
use skylift_engine::{
    DeployAction, Deployer, DeploymentRequest, EngineError, EnvironmentHealth,
    EnvironmentStatus, OptionSetting, PlatformSelector, PollConfig, RegionClients, RetryPolicy,
};
use skylift_engine::types::{IAM_NAMESPACE, INSTANCE_PROFILE_OPTION, SERVICE_ROLE_OPTION};

const ACCOUNT: &str = "123456789012";

struct Harness {
    platform: Arc<MockPlatform>,
    storage: Arc<MockStorage>,
    deployer: Deployer,
}

fn harness() -> Harness {
    let platform = Arc::new(MockPlatform::new());
    let storage = Arc::new(MockStorage::new(ACCOUNT));
    let clients = RegionClients {
        identity: Arc::new(MockIdentity::new(ACCOUNT)),
        storage: storage.clone(),
        platform: platform.clone(),
    };
    let deployer = Deployer::new(&clients, PollConfig::with_interval_secs(0), "us-east-1");
    Harness {
        platform,
        storage,
        deployer,
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
        wait_for_deployment: true,
        wait_for_health: true,
        deployment_timeout: Duration::from_secs(30),
        health_timeout: Duration::from_secs(30),
        retry: RetryPolicy::none(),
    }
}

fn bundle() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
    file.write_all(b"source bundle bytes").unwrap();
    file
}

#[tokio::test]
async fn fresh_deploy_creates_the_environment() {
    let h = harness();
    h.platform.script_snapshots([
        (EnvironmentStatus::Launching, EnvironmentHealth::Grey),
        (EnvironmentStatus::Launching, EnvironmentHealth::Grey),
        (EnvironmentStatus::Ready, EnvironmentHealth::Green),
    ]);
    let file = bundle();

    let outcome = h.deployer.deploy(&request(), Some(file.path())).await.unwrap();

    assert_eq!(outcome.action, DeployAction::Create);
    assert_eq!(outcome.version_label, "v7");
    assert!(outcome.environment.exists);
    assert_eq!(outcome.environment.status, Some(EnvironmentStatus::Ready));
    assert_eq!(outcome.environment.health, Some(EnvironmentHealth::Green));

    // Bucket derived, created and uploaded into exactly once.
    assert_eq!(h.storage.create_call_count(), 1);
    assert_eq!(h.storage.put_call_count(), 1);
    assert!(h
        .storage
        .has_object("skylift-artifacts-eu-west-1-123456789012", "orders/v7.zip"));

    assert_eq!(h.platform.create_version_call_count(), 1);
    assert_eq!(h.platform.create_environment_call_count(), 1);
    assert_eq!(h.platform.update_environment_call_count(), 0);
}

#[tokio::test]
async fn deploy_to_existing_environment_updates_it() {
    let h = harness();
    h.platform.seed_environment(
        "orders",
        "orders-prod",
        EnvironmentStatus::Ready,
        EnvironmentHealth::Green,
    );
    h.platform.script_snapshots([
        (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
        (EnvironmentStatus::Ready, EnvironmentHealth::Green),
    ]);
    let file = bundle();

    let outcome = h.deployer.deploy(&request(), Some(file.path())).await.unwrap();

    assert_eq!(outcome.action, DeployAction::Update);
    assert_eq!(h.platform.create_environment_call_count(), 0);
    assert_eq!(h.platform.update_environment_call_count(), 1);
    assert_eq!(h.storage.put_call_count(), 1);
}

#[tokio::test]
async fn reusing_a_registered_version_skips_upload_and_registration() {
    let h = harness();
    h.platform
        .seed_version("orders", "v7", "prior-bucket", "orders/v7.zip");
    h.platform.seed_environment(
        "orders",
        "orders-prod",
        EnvironmentStatus::Ready,
        EnvironmentHealth::Green,
    );

    let mut req = request();
    req.use_existing_version = true;

    // No local artifact at all: the registered version carries the bundle.
    let outcome = h.deployer.deploy(&req, None).await.unwrap();

    assert_eq!(outcome.action, DeployAction::Update);
    assert_eq!(h.storage.create_call_count(), 0);
    assert_eq!(h.storage.put_call_count(), 0);
    assert_eq!(h.platform.create_version_call_count(), 0);
    assert_eq!(h.platform.update_environment_call_count(), 1);
}

#[tokio::test]
async fn persistently_red_environment_times_out_on_health() {
    let h = harness();
    h.platform.seed_environment(
        "orders",
        "orders-prod",
        EnvironmentStatus::Ready,
        EnvironmentHealth::Green,
    );
    // Deployment settles but health stays Red for good.
    h.platform.script_snapshots([
        (EnvironmentStatus::Updating, EnvironmentHealth::Grey),
        (EnvironmentStatus::Ready, EnvironmentHealth::Red),
    ]);
    let file = bundle();

    let mut req = request();
    req.health_timeout = Duration::from_millis(50);

    let result = h.deployer.deploy(&req, Some(file.path())).await;
    match result {
        Err(EngineError::ConvergenceTimeout { phase, .. }) => assert_eq!(phase, "health"),
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_version_label_fails_without_retries() {
    let h = harness();
    h.platform
        .seed_version("orders", "v7", "prior-bucket", "orders/v7.zip");
    h.platform.seed_environment(
        "orders",
        "orders-prod",
        EnvironmentStatus::Ready,
        EnvironmentHealth::Green,
    );
    let file = bundle();

    // Same label, reuse disabled: registration conflicts.
    let mut req = request();
    req.retry = RetryPolicy {
        max_retries: 3,
        base_delay_secs: 0,
    };

    let result = h.deployer.deploy(&req, Some(file.path())).await;
    assert!(matches!(result, Err(EngineError::VersionConflict { .. })));
    assert_eq!(h.platform.create_version_call_count(), 1);
}

#[tokio::test]
async fn foreign_owned_default_bucket_aborts_before_upload() {
    let h = harness();
    h.storage
        .seed_bucket("skylift-artifacts-eu-west-1-123456789012", "999988887777");
    let file = bundle();

    let result = h.deployer.deploy(&request(), Some(file.path())).await;
    assert!(matches!(result, Err(EngineError::BucketOwnership { .. })));
    assert_eq!(h.storage.put_call_count(), 0);
    assert_eq!(h.platform.create_version_call_count(), 0);
}
