//! Deploy command - package and deploy an application version.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use regex::Regex;
use thiserror::Error;
use skylift_engine::{
    ClientFactory, Deployer, DeploymentRequest, EngineConfig, EngineError, OptionSetting,
    PlatformSelector, RetryPolicy,
};

use crate::package::{package_directory, PackageError};

const REGION_PATTERN: &str = r"^[a-z]{2,3}(-[a-z]+)+-\d+$";

const MIN_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_RETRIES: u32 = 10;
const MIN_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to package source: {0}")]
    Package(#[from] PackageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Application name
    #[arg(long)]
    pub application: String,

    /// Environment name
    #[arg(long)]
    pub environment: String,

    /// Version label to deploy
    #[arg(long)]
    pub version_label: String,

    /// Target region, e.g. eu-west-1
    #[arg(long)]
    pub region: String,

    /// Local artifact: a ready zip file, or a directory to package
    /// (defaults to the current directory)
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Glob patterns to exclude when packaging a directory
    #[arg(long = "exclude")]
    pub excludes: Vec<String>,

    /// Solution stack for environment creation
    #[arg(long, conflicts_with = "platform_arn")]
    pub solution_stack: Option<String>,

    /// Platform ARN for environment creation
    #[arg(long)]
    pub platform_arn: Option<String>,

    /// Option settings as a JSON array of
    /// {"namespace", "option_name", "value"} objects
    #[arg(long)]
    pub option_settings: Option<String>,

    /// Storage bucket override for the source bundle
    #[arg(long)]
    pub bucket: Option<String>,

    /// External name prefix for a created environment
    /// (defaults to the environment name)
    #[arg(long)]
    pub cname_prefix: Option<String>,

    /// Fail instead of creating a missing bucket
    #[arg(long)]
    pub no_create_bucket: bool,

    /// Fail instead of creating a missing environment
    #[arg(long)]
    pub no_create_environment: bool,

    /// Reuse an already-registered version with this label if one exists
    #[arg(long)]
    pub use_existing_version: bool,

    /// Do not wait for the deployment to settle
    #[arg(long)]
    pub no_wait: bool,

    /// Wait for environment health to recover after the deployment settles
    #[arg(long)]
    pub wait_for_health: bool,

    /// Seconds to wait for the deployment to settle (60-3600)
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Seconds to wait for health recovery (60-3600)
    #[arg(long, default_value_t = 600)]
    pub health_timeout: u64,

    /// Retries per remote call after the first attempt (0-10)
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Base delay before the first retry, in seconds (1-60); doubles per retry
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Configuration file (defaults to skylift.toml in the current directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: DeployArgs) -> Result<(), DeployError> {
    let request = build_request(&args)?;

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };

    // Packaged bundles live in a temp dir that outlives the upload.
    let staging = tempfile::tempdir()?;
    let artifact = resolve_artifact(&args, staging.path()).await?;

    println!(
        "Deploying {} version {} to environment {} in {}",
        request.application, request.version_label, request.environment, request.region
    );

    let factory = ClientFactory::new(config.api.clone());
    let clients = factory.for_region(&request.region).await?;
    let deployer = Deployer::new(&clients, config.poll, config.api.default_storage_region);

    let started = std::time::Instant::now();
    let outcome = match deployer.deploy(&request, artifact.as_deref()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                environment = %request.environment,
                elapsed_secs = started.elapsed().as_secs(),
                error = %e,
                "deployment failed"
            );
            return Err(e.into());
        }
    };

    println!(
        "\nDeployment finished: {} of version {} ({}s)",
        outcome.action, outcome.version_label, outcome.elapsed_secs
    );
    if let Some(id) = &outcome.environment.id {
        println!("  Environment ID: {id}");
    }
    if let Some(status) = outcome.environment.status {
        println!("  Status: {status}");
    }
    if let Some(health) = outcome.environment.health {
        println!("  Health: {health}");
    }
    if let Some(cname) = &outcome.environment.cname {
        println!("  URL: http://{cname}");
    }

    Ok(())
}

fn build_request(args: &DeployArgs) -> Result<DeploymentRequest, DeployError> {
    validate_bounds(args)?;

    let region_format = Regex::new(REGION_PATTERN)
        .map_err(|e| DeployError::InvalidArgument(e.to_string()))?;
    if !region_format.is_match(&args.region) {
        return Err(DeployError::InvalidArgument(format!(
            "region '{}' does not look like a region name (e.g. eu-west-1)",
            args.region
        )));
    }

    let platform = match (&args.solution_stack, &args.platform_arn) {
        (Some(stack), None) => PlatformSelector::SolutionStack(stack.clone()),
        (None, Some(arn)) => PlatformSelector::PlatformArn(arn.clone()),
        (None, None) => PlatformSelector::Unspecified,
        // clap's conflicts_with already rejects this; belt for direct construction.
        (Some(_), Some(_)) => {
            return Err(DeployError::InvalidArgument(
                "--solution-stack and --platform-arn are mutually exclusive".to_owned(),
            ))
        }
    };

    let option_settings = args
        .option_settings
        .as_deref()
        .map(parse_option_settings)
        .transpose()?;

    Ok(DeploymentRequest {
        region: args.region.clone(),
        application: args.application.clone(),
        environment: args.environment.clone(),
        version_label: args.version_label.clone(),
        platform,
        option_settings,
        bucket: args.bucket.clone(),
        create_bucket_if_missing: !args.no_create_bucket,
        create_environment_if_missing: !args.no_create_environment,
        use_existing_version: args.use_existing_version,
        cname_prefix: args.cname_prefix.clone(),
        wait_for_deployment: !args.no_wait,
        wait_for_health: args.wait_for_health,
        deployment_timeout: Duration::from_secs(args.timeout),
        health_timeout: Duration::from_secs(args.health_timeout),
        retry: RetryPolicy {
            max_retries: args.retries,
            base_delay_secs: args.retry_delay,
        },
    })
}

fn validate_bounds(args: &DeployArgs) -> Result<(), DeployError> {
    for (label, value) in [
        ("--timeout", args.timeout),
        ("--health-timeout", args.health_timeout),
    ] {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&value) {
            return Err(DeployError::InvalidArgument(format!(
                "{label} must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds"
            )));
        }
    }
    if args.retries > MAX_RETRIES {
        return Err(DeployError::InvalidArgument(format!(
            "--retries must be at most {MAX_RETRIES}"
        )));
    }
    if !(MIN_RETRY_DELAY_SECS..=MAX_RETRY_DELAY_SECS).contains(&args.retry_delay) {
        return Err(DeployError::InvalidArgument(format!(
            "--retry-delay must be between {MIN_RETRY_DELAY_SECS} and {MAX_RETRY_DELAY_SECS} seconds"
        )));
    }
    Ok(())
}

fn parse_option_settings(raw: &str) -> Result<Vec<OptionSetting>, DeployError> {
    serde_json::from_str(raw).map_err(|e| {
        DeployError::InvalidArgument(format!("--option-settings is not valid JSON: {e}"))
    })
}

/// Turn the artifact argument into an uploadable zip, packaging a directory
/// when one is given. Returns `None` only when the run reuses a registered
/// version and no local artifact was supplied.
///
/// A pre-built artifact must resolve inside the working directory; a path
/// that escapes it is rejected before anything is read.
async fn resolve_artifact(
    args: &DeployArgs,
    staging: &std::path::Path,
) -> Result<Option<PathBuf>, DeployError> {
    let source = match &args.artifact {
        Some(path) if path.is_file() => {
            let resolved = path.canonicalize()?;
            let root = std::env::current_dir()?.canonicalize()?;
            if !resolved.starts_with(&root) {
                return Err(DeployError::InvalidArgument(format!(
                    "artifact {} resolves outside the working directory",
                    path.display()
                )));
            }
            return Ok(Some(resolved));
        }
        Some(path) => path.clone(),
        None if args.use_existing_version => return Ok(None),
        None => PathBuf::from("."),
    };

    let bundle = staging.join(format!("{}.zip", args.version_label));
    println!("Packaging {} ...", source.display());
    package_directory(&source, &bundle, &args.excludes).await?;
    Ok(Some(bundle))
}
