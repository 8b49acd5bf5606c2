//! Deployment engine for the skylift application platform.
//!
//! Takes a local source bundle and an environment name and drives the full
//! deployment sequence: resolve identity, ensure the artifact bucket (with
//! ownership verification), upload the bundle, register the version, create
//! or update the environment, then poll until it converges. Remote calls go
//! through a bounded exponential-backoff retrier that fails fast on errors
//! retrying cannot fix.
//!
//! The service boundary is three traits ([`api::IdentityApi`],
//! [`api::StorageApi`], [`api::PlatformApi`]) with HTTP implementations for
//! the regional control plane and in-memory fakes for offline runs and
//! tests.

pub mod api;
pub mod artifact;
pub mod bucket;
pub mod client;
pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod poll;
pub mod probes;
pub mod retry;
pub mod types;

pub use client::{ClientFactory, RegionClients};
pub use config::{ApiConfig, ApiMode, EngineConfig, PollConfig, RetryPolicy};
pub use deploy::Deployer;
pub use error::{EngineError, EngineResult};
pub use types::{
    DeployAction, DeploymentOutcome, DeploymentRequest, EnvironmentHealth, EnvironmentState,
    EnvironmentStatus, OptionSetting, PlatformSelector,
};
